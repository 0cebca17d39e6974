//! Shared atomic-write-with-lock discipline for every store in this crate
//! (spec §4.8): acquire a file lock, write to a temp file in the same
//! directory, then rename over the target. Readers tolerate a concurrent
//! writer by retrying a parse failure once.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use gateway_core::GatewayError;

/// Holds the advisory lock on `<path>.lock` for the duration of one
/// read-modify-write cycle against `path`.
struct FileLock {
    _handle: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, GatewayError> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(GatewayError::Io)?;
        }
        let handle = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(GatewayError::Io)?;
        handle.lock_exclusive().map_err(|e| {
            GatewayError::Store(format!("failed to lock {}: {e}", lock_path.display()))
        })?;
        Ok(Self { _handle: handle })
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

/// Load and parse the JSON document at `path`, or `default` if it does not
/// exist yet. Retries a parse failure once, in case a concurrent writer's
/// rename was mid-flight on the first read.
pub fn read_json<T>(path: &Path, default: T) -> Result<T, GatewayError>
where
    T: DeserializeOwned,
{
    if !path.exists() {
        return Ok(default);
    }
    let bytes = fs::read(path).map_err(GatewayError::Io)?;
    match serde_json::from_slice(&bytes) {
        Ok(v) => Ok(v),
        Err(_) => {
            let retry = fs::read(path).map_err(GatewayError::Io)?;
            serde_json::from_slice(&retry).map_err(|e| {
                GatewayError::Store(format!("parse failure reading {}: {e}", path.display()))
            })
        }
    }
}

/// Apply `mutate` to the document at `path` under an exclusive lock, then
/// persist the result atomically. `mutate` receives the current value
/// (or `default` if the file doesn't exist yet) and returns the new value.
pub fn update_json<T, F>(path: &Path, default: T, mutate: F) -> Result<T, GatewayError>
where
    T: Serialize + DeserializeOwned + Clone,
    F: FnOnce(T) -> T,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(GatewayError::Io)?;
    }
    let _lock = FileLock::acquire(path)?;

    let current = read_json(path, default)?;
    let updated = mutate(current);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(GatewayError::Io)?;
    serde_json::to_writer_pretty(&mut tmp, &updated)
        .map_err(|e| GatewayError::Store(format!("serializing {}: {e}", path.display())))?;
    tmp.as_file().sync_all().map_err(GatewayError::Io)?;
    tmp.persist(path)
        .map_err(|e| GatewayError::Store(format!("persisting {}: {e}", path.display())))?;

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
    struct Doc {
        version: u32,
        items: Vec<String>,
    }

    #[test]
    fn read_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc: Doc = read_json(&path, Doc::default()).unwrap();
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn update_json_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        update_json(&path, Doc::default(), |mut d| {
            d.version = 1;
            d.items.push("a".to_string());
            d
        })
        .unwrap();

        let reloaded: Doc = read_json(&path, Doc::default()).unwrap();
        assert_eq!(reloaded.version, 1);
        assert_eq!(reloaded.items, vec!["a".to_string()]);
    }

    #[test]
    fn update_json_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("doc.json");
        update_json(&path, Doc::default(), |mut d| {
            d.version = 2;
            d
        })
        .unwrap();
        assert!(path.exists());
    }
}
