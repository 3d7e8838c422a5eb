//! Small helpers for reading and writing JSON records atomically.

use crate::state::error::{io_error, StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// The record is written to a temporary file in the same directory and then
/// renamed over the target, so readers never observe a partial record.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;

    let body = serde_json::to_vec_pretty(value).map_err(|e| StoreError::InvalidRecord {
        path: path.to_path_buf(),
        reason: format!("Failed to serialize: {e}"),
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    tmp.write_all(&body).map_err(io_error(path))?;
    tmp.write_all(b"\n").map_err(io_error(path))?;
    tmp.persist(path)
        .map_err(|e| io_error(path)(e.error))?;
    Ok(())
}

/// Read a JSON record as an untyped value.
pub fn read_json_value(path: &Path) -> StoreResult<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&content).map_err(|e| StoreError::InvalidRecord {
        path: path.to_path_buf(),
        reason: format!("Malformed JSON: {e}"),
    })
}

/// Read and deserialize a JSON record.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let value = read_json_value(path)?;
    from_value(path, value)
}

pub fn from_value<T: DeserializeOwned>(path: &Path, value: serde_json::Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::InvalidRecord {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Parse a `Major.Minor` schema version.
pub fn parse_version(path: &Path, version: &str) -> StoreResult<(u32, u32)> {
    let invalid = || StoreError::InvalidRecord {
        path: path.to_path_buf(),
        reason: format!("Invalid schema version '{version}'"),
    };
    let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
    let major = major.parse().map_err(|_| invalid())?;
    let minor = minor.parse().map_err(|_| invalid())?;
    Ok((major, minor))
}

/// Read an optional text artifact.
///
/// Returns `None` when the file is missing or unreadable. Anything other
/// than a missing file is logged, since it usually points at a permissions
/// or encoding problem worth noticing.
pub fn read_artifact(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable artifact");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/record.json");

        write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        let value = read_json_value(&path).unwrap();

        assert_eq!(value["a"], 1);
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1, "No temporary files should remain");
    }

    #[test]
    fn test_read_json_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = read_json_value(&path);
        assert!(matches!(result, Err(StoreError::InvalidRecord { .. })));
    }

    #[test]
    fn test_parse_version() {
        let path = Path::new("task.json");
        assert_eq!(parse_version(path, "1.1").unwrap(), (1, 1));
        assert_eq!(parse_version(path, "12.0").unwrap(), (12, 0));
        assert!(parse_version(path, "1").is_err());
        assert!(parse_version(path, "a.b").is_err());
    }

    #[test]
    fn test_read_artifact_missing_is_none() {
        let dir = tempdir().unwrap();
        assert!(read_artifact(&dir.path().join("plan.md")).is_none());

        std::fs::write(dir.path().join("plan.md"), "plan").unwrap();
        assert_eq!(read_artifact(&dir.path().join("plan.md")).as_deref(), Some("plan"));
    }
}
