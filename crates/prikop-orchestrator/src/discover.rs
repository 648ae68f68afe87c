//! Decoy payload discovery
//!
//! Scans the fake-payload directory once at startup. An empty result is
//! startup-fatal: without payloads most of the search space is dead.

use std::path::Path;

use crate::error::OrchestratorError;

/// List `*.bin` files in the payload directory.
pub fn discover_payloads(dir: &Path) -> Result<Vec<String>, OrchestratorError> {
    let entries = std::fs::read_dir(dir)?;

    let mut payloads = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "bin") {
            payloads.push(path.display().to_string());
        }
    }
    payloads.sort();

    if payloads.is_empty() {
        return Err(OrchestratorError::NoPayloads {
            path: dir.to_path_buf(),
        });
    }
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_discovers_only_bin_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tls_a.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("quic_b.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.bin")).unwrap();

        let payloads = discover_payloads(dir.path()).unwrap();
        assert_eq!(payloads.len(), 2);
        assert!(payloads.iter().all(|p| p.ends_with(".bin")));
    }

    #[test]
    fn test_empty_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let err = discover_payloads(dir.path()).unwrap_err();
        assert!(matches!(err, OrchestratorError::NoPayloads { .. }));
    }

    #[test]
    fn test_order_is_stable() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        let payloads = discover_payloads(dir.path()).unwrap();
        assert!(payloads[0] < payloads[1]);
    }
}
