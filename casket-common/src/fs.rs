// casket-common/src/fs.rs
//! Small filesystem primitives shared by the metadata stores.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CasketError, Result};

/// Writes `content` to a temp file beside `path`, then renames it into place.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        CasketError::Generic(format!(
            "Cannot get parent directory for {}",
            path.display()
        ))
    })?;
    fs::create_dir_all(dir)?;

    let original_perms = fs::metadata(path).map(|m| m.permissions()).ok();
    let mut temp_file = NamedTempFile::new_in(dir)?;
    debug!(
        "Atomically writing {} bytes to {} via {}",
        content.len(),
        path.display(),
        temp_file.path().display()
    );
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    if let Some(perms) = original_perms {
        fs::set_permissions(temp_file.path(), perms)?;
    }
    temp_file
        .persist(path)
        .map_err(|e| CasketError::Io(std::sync::Arc::new(e.error)))?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    debug!("Writing JSON to: {}", path.display());
    let bytes = serde_json::to_vec_pretty(data)?;
    atomic_write(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Reading JSON from: {}", path.display());
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Removes a file if present; a missing file is not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes a directory tree if present; a missing tree is not an error.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn json_roundtrip_through_atomic_write() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/data.json");
        let mut data = BTreeMap::new();
        data.insert("appdir".to_string(), "/Applications".to_string());

        write_json(&path, &data).unwrap();
        let back: BTreeMap<String, String> = read_json(&path).unwrap();
        assert_eq!(back, data);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn removing_missing_paths_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        remove_file_if_exists(&tmp.path().join("nope")).unwrap();
        remove_dir_all_if_exists(&tmp.path().join("nope")).unwrap();
    }
}
