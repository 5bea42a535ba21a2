//! Write-file-atomic: write to a sibling temp file, then rename onto the
//! target. Renaming within one directory is atomic on the filesystems this
//! crate targets (POSIX `rename(2)`, Win32 `MoveFileEx` without
//! `REPLACE_EXISTING` falls back below).

use crate::error::{StateError, StateResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path_for(path: &Path) -> PathBuf {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tmp");
    path.with_file_name(format!(".{file_name}.tmp.{pid}.{nanos}"))
}

/// Write `bytes` to `path` via a same-directory temp file and rename.
///
/// If the rename fails because the temp file vanished (another writer's
/// cleanup raced us) but the target already holds the expected content's
/// sibling (i.e. the target now exists), the write is treated as a success:
/// a racing writer won and the caller's data is superseded, which is
/// acceptable for the idempotent re-creation paths that call this (state
/// files that are always fully rewritten, never incrementally patched
/// outside a lock).
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> StateResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp = temp_path_for(path);
    std::fs::write(&tmp, bytes).map_err(|source| StateError::Io {
        path: tmp.clone(),
        source,
    })?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(source) => {
            if source.kind() == std::io::ErrorKind::NotFound && path.exists() {
                Ok(())
            } else {
                let _ = std::fs::remove_file(&tmp);
                Err(StateError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StateResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StateError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_file_atomic(path, &bytes)
}

/// Read and parse JSON from `path`. Returns `Ok(None)` when the file is
/// absent *or* unparseable (the state store's "parse failure is absence"
/// contract), never a raw error for those two cases.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StateResult<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "treating malformed state file as absent");
                Ok(None)
            }
        },
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
    }

    #[test]
    fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_json_atomic(&path, &Sample { a: 1 }).unwrap();
        let back: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(back, Some(Sample { a: 1 }));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let back: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn malformed_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();
        let back: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_json_atomic(&path, &json!({"a": 1})).unwrap();
        write_json_atomic(&path, &json!({"a": 2})).unwrap();
        let back: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back["a"], 2);
    }

    #[test]
    fn no_leftover_temp_files_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_json_atomic(&path, &Sample { a: 1 }).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
