// casket-core/src/artifacts/helpers.rs
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output};

use casket_common::error::{CasketError, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Removes a file, symlink or directory tree. A missing path counts as removed.
/// With `use_sudo_if_needed`, retries `sudo rm -rf` on permission errors.
pub fn remove_path_robustly(path: &Path, use_sudo_if_needed: bool) -> bool {
    let Ok(meta) = path.symlink_metadata() else {
        debug!("Path {} not found for removal.", path.display());
        return true;
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            debug!("Removed {}.", path.display());
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) if use_sudo_if_needed && e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(
                "Direct removal of {} failed (Permission Denied). Trying with sudo rm -rf.",
                path.display()
            );
            match Command::new("sudo").arg("rm").arg("-rf").arg(path).output() {
                Ok(out) if out.status.success() => true,
                Ok(out) => {
                    debug!(
                        "`sudo rm -rf {}` failed ({}): {}",
                        path.display(),
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    );
                    false
                }
                Err(sudo_e) => {
                    debug!("Error executing sudo for {}: {}", path.display(), sudo_e);
                    false
                }
            }
        }
        Err(e) => {
            debug!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// True if anything, including a dangling symlink, sits at `path`.
pub fn path_occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        home.to_path_buf()
    } else if let Some(stripped) = path.strip_prefix("~/") {
        home.join(stripped)
    } else {
        PathBuf::from(path)
    }
}

/// Expands `~` and glob patterns; a pattern with no match yields nothing.
pub fn expand_path_pattern(pattern: &str, home: &Path) -> Vec<PathBuf> {
    let expanded = expand_tilde(pattern, home);
    let as_str = expanded.to_string_lossy();
    if !as_str.contains(['*', '?', '[']) {
        return vec![expanded];
    }
    match glob::glob(&as_str) {
        Ok(paths) => paths.filter_map(|p| p.ok()).collect(),
        Err(e) => {
            warn!("Invalid glob pattern '{}': {}", pattern, e);
            Vec::new()
        }
    }
}

/// Refuses relative paths, `..`, the filesystem root, the home directory and
/// any of the `protected` directories themselves.
pub fn is_safe_path(path: &Path, home: &Path, protected: &[PathBuf]) -> bool {
    if !path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
        return false;
    }
    if path == Path::new("/") || path == home {
        return false;
    }
    !protected.iter().any(|p| p == path)
}

pub fn copy_recursive(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| CasketError::Generic(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| CasketError::Generic(e.to_string()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            unix_fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Renames `src` to `dest`, copying across filesystems when a rename is impossible.
pub fn move_path(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                "rename {} -> {} failed ({}), copying instead",
                src.display(),
                dest.display(),
                e
            );
            copy_recursive(src, dest)?;
            if !remove_path_robustly(src, false) {
                warn!("Copied {} but could not remove the original", src.display());
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path)?;
    if meta.is_file() {
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o111);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Runs a tool only when it is on PATH; a missing tool yields `None`.
pub fn run_if_available(program: &str, args: &[&str]) -> Option<Output> {
    let tool = which::which(program).ok()?;
    debug!("Running {} {:?}", tool.display(), args);
    match Command::new(&tool).args(args).output() {
        Ok(output) => Some(output),
        Err(e) => {
            debug!("Failed to run {}: {}", tool.display(), e);
            None
        }
    }
}

pub fn command_failure(program: &str, output: &Output) -> String {
    format!(
        "{} exited with {}: {}",
        program,
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_and_glob_expansion() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path();
        fs::create_dir_all(home.join("Library/Caches/com.foo.a")).unwrap();
        fs::create_dir_all(home.join("Library/Caches/com.foo.b")).unwrap();

        assert_eq!(expand_tilde("~/x", home), home.join("x"));
        let mut found = expand_path_pattern("~/Library/Caches/com.foo.*", home);
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(expand_path_pattern("~/Library/Nope*", home).is_empty());
    }

    #[test]
    fn unsafe_paths_are_refused() {
        let home = Path::new("/Users/me");
        let protected = vec![PathBuf::from("/Applications")];
        assert!(is_safe_path(Path::new("/Users/me/Library/Foo"), home, &protected));
        assert!(!is_safe_path(Path::new("/"), home, &protected));
        assert!(!is_safe_path(home, home, &protected));
        assert!(!is_safe_path(Path::new("/Applications"), home, &protected));
        assert!(!is_safe_path(Path::new("/Users/me/../other"), home, &protected));
        assert!(!is_safe_path(Path::new("relative/path"), home, &protected));
    }

    #[test]
    fn move_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("Foo.app");
        fs::create_dir_all(src.join("Contents")).unwrap();
        fs::write(src.join("Contents/Info.plist"), "x").unwrap();
        let dest = tmp.path().join("Applications/Foo.app");

        move_path(&src, &dest).unwrap();
        assert!(!src.exists());
        assert!(dest.join("Contents/Info.plist").is_file());

        assert!(remove_path_robustly(&dest, false));
        assert!(!path_occupied(&dest));
        assert!(remove_path_robustly(&dest, false));
    }
}
