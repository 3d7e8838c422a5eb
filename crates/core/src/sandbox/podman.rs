//! Podman backend.
//!
//! Rootless podman maps the host user into the container with
//! `--userns=keep-id` so files the agent writes in the bind-mounted worktree
//! stay owned by the developer. Binds are relabelled (`z`) for SELinux hosts.

use crate::sandbox::oci::{Dialect, OciBackend};

pub struct Podman;

impl Dialect for Podman {
    const BINARY: &'static str = "podman";

    fn create_flags() -> Vec<String> {
        vec!["--userns=keep-id".to_string()]
    }

    fn bind_options(read_only: bool) -> Option<String> {
        Some(if read_only { "ro,z" } else { "z" }.to_string())
    }
}

pub type PodmanBackend = OciBackend<Podman>;
