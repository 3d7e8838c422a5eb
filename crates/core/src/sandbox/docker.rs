//! Docker backend.

use crate::sandbox::oci::{Dialect, OciBackend};

pub struct Docker;

impl Dialect for Docker {
    const BINARY: &'static str = "docker";
}

pub type DockerBackend = OciBackend<Docker>;
