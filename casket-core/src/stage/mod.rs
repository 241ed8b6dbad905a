// casket-core/src/stage/mod.rs
//! Turns a downloaded container into the versioned staging directory.

pub mod extract;
pub mod quarantine;

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use bzip2::read::BzDecoder;
use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use flate2::read::GzDecoder;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;
use xz2::read::XzDecoder;

pub use self::extract::ContainerKind;
use self::extract::extract_container;
pub use self::quarantine::{NoQuarantine, QuarantineService, XattrQuarantine};

const TAR_MAGIC_OFFSET: usize = 257;

/// True when the (decompressed) stream starts with a POSIX tar header.
fn looks_like_tar<R: Read>(mut reader: R) -> bool {
    let mut header = [0u8; 512];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return false,
        }
    }
    filled > TAR_MAGIC_OFFSET + 5 && &header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar"
}

fn from_declared_type(kind: &str) -> Option<ContainerKind> {
    match kind.trim_start_matches(':') {
        "zip" => Some(ContainerKind::Zip),
        "tar" => Some(ContainerKind::Tar),
        "gzip" => Some(ContainerKind::Gzip),
        "rar" => Some(ContainerKind::Rar),
        "seven_zip" | "7z" | "sevenzip" => Some(ContainerKind::SevenZip),
        "xar" => Some(ContainerKind::Xar),
        "dmg" => Some(ContainerKind::Dmg),
        "naked" | "pkg" => Some(ContainerKind::Naked),
        _ => None,
    }
}

/// Detects the container from its bytes, then from its name.
///
/// A declared type wins, except that a declared `tar` is refined to its compression.
pub fn detect_container(path: &Path, declared: Option<&str>) -> Result<ContainerKind> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if name.ends_with(".pkg") || name.ends_with(".mpkg") {
        return Ok(ContainerKind::Naked);
    }
    let declared = declared.and_then(from_declared_type);
    if let Some(kind) = declared.filter(|k| *k != ContainerKind::Tar) {
        return Ok(kind);
    }

    let open = || File::open(path);
    let detected = match infer::get_from_path(path)?.map(|k| k.extension()) {
        Some("zip") => ContainerKind::Zip,
        Some("gz") if looks_like_tar(GzDecoder::new(open()?)) => ContainerKind::TarGz,
        Some("gz") => ContainerKind::Gzip,
        Some("bz2") if looks_like_tar(BzDecoder::new(open()?)) => ContainerKind::TarBz2,
        Some("xz") if looks_like_tar(XzDecoder::new(open()?)) => ContainerKind::TarXz,
        Some("tar") => ContainerKind::Tar,
        Some("rar") => ContainerKind::Rar,
        Some("7z") => ContainerKind::SevenZip,
        Some("xar") => ContainerKind::Xar,
        _ if name.ends_with(".dmg") => ContainerKind::Dmg,
        _ if looks_like_tar(open()?) => ContainerKind::Tar,
        other => {
            debug!(
                "No archive format recognized for {} ({:?}), keeping it as-is",
                path.display(),
                other
            );
            ContainerKind::Naked
        }
    };
    Ok(detected)
}

/// Gives the owner write access to every entry under `root`.
pub fn make_writable_recursive(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| CasketError::Staging(e.to_string()))?;
        if entry.path_is_symlink() {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| CasketError::Staging(e.to_string()))?;
        let mut perms = metadata.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() | 0o200);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);
        fs::set_permissions(entry.path(), perms)?;
    }
    Ok(())
}

pub struct Stager {
    quarantine: Arc<dyn QuarantineService>,
    quarantine_enabled: bool,
}

impl Stager {
    pub fn new(quarantine: Arc<dyn QuarantineService>, quarantine_enabled: bool) -> Self {
        Self {
            quarantine,
            quarantine_enabled,
        }
    }

    /// Extracts `download` into `staged_path`. Partial output is left for the caller to purge.
    #[instrument(skip(self, cask, download, staged_path), fields(token = %cask.token))]
    pub fn stage(&self, cask: &Cask, download: &Path, staged_path: &Path) -> Result<()> {
        let container = cask.container.clone().unwrap_or_default();
        let file_name = cask.download_file_name();
        let outer = detect_container(download, container.kind.as_deref())?;

        match container.nested.as_deref() {
            Some(nested) => {
                let tmp = tempfile::Builder::new()
                    .prefix(&format!("{}-outer", cask.token))
                    .tempdir()?;
                extract_container(download, tmp.path(), outer, &file_name)?;
                make_writable_recursive(tmp.path())?;

                let inner = tmp.path().join(nested);
                if !inner.exists() {
                    return Err(CasketError::Staging(format!(
                        "nested container '{}' not found in {}",
                        nested,
                        download.display()
                    )));
                }
                let inner_kind = detect_container(&inner, None)?;
                let inner_name = inner
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| file_name.clone());
                debug!("Extracting nested {} container {}", inner_kind, inner.display());
                extract_container(&inner, staged_path, inner_kind, &inner_name)?;
            }
            None => extract_container(download, staged_path, outer, &file_name)?,
        }

        if self.quarantine_enabled && self.quarantine.is_available() {
            if let Err(e) = self.quarantine.propagate(download, staged_path) {
                warn!(
                    "Could not propagate quarantine from {} to {}: {}",
                    download.display(),
                    staged_path.display(),
                    e
                );
            }
        }
        Ok(())
    }
}
