// casket-core/src/stage/extract.rs
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use bzip2::read::BzDecoder;
use casket_common::error::{CasketError, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, error};
use xz2::read::XzDecoder;
use zip::read::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    /// A single gzip-compressed file.
    Gzip,
    Rar,
    SevenZip,
    Xar,
    Dmg,
    /// Kept as-is, e.g. a bare `.pkg` or binary.
    Naked,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerKind::Zip => "zip",
            ContainerKind::Tar => "tar",
            ContainerKind::TarGz => "tar.gz",
            ContainerKind::TarBz2 => "tar.bz2",
            ContainerKind::TarXz => "tar.xz",
            ContainerKind::Gzip => "gzip",
            ContainerKind::Rar => "rar",
            ContainerKind::SevenZip => "7z",
            ContainerKind::Xar => "xar",
            ContainerKind::Dmg => "dmg",
            ContainerKind::Naked => "naked",
        };
        f.write_str(name)
    }
}

fn staging_error(archive: &Path, msg: impl fmt::Display) -> CasketError {
    CasketError::Staging(format!("{}: {}", archive.display(), msg))
}

/// Extracts `archive` into `target_dir`. `file_name` names a naked or gzip payload.
pub fn extract_container(
    archive: &Path,
    target_dir: &Path,
    kind: ContainerKind,
    file_name: &str,
) -> Result<()> {
    debug!(
        "Extracting '{}' ({}) into '{}'",
        archive.display(),
        kind,
        target_dir.display()
    );
    fs::create_dir_all(target_dir)?;
    let open = || File::open(archive).map_err(|e| staging_error(archive, e));

    match kind {
        ContainerKind::Zip => extract_zip_archive(open()?, target_dir, archive),
        ContainerKind::Tar => extract_tar_archive(open()?, target_dir, archive),
        ContainerKind::TarGz => extract_tar_archive(GzDecoder::new(open()?), target_dir, archive),
        ContainerKind::TarBz2 => extract_tar_archive(BzDecoder::new(open()?), target_dir, archive),
        ContainerKind::TarXz => extract_tar_archive(XzDecoder::new(open()?), target_dir, archive),
        ContainerKind::Gzip => {
            let name = file_name
                .strip_suffix(".gz")
                .filter(|n| !n.is_empty())
                .unwrap_or(file_name);
            let mut out = File::create(target_dir.join(name))?;
            io::copy(&mut GzDecoder::new(open()?), &mut out)
                .map_err(|e| staging_error(archive, e))?;
            Ok(())
        }
        ContainerKind::Naked => {
            let dest = target_dir.join(file_name);
            fs::copy(archive, &dest).map_err(|e| staging_error(archive, e))?;
            Ok(())
        }
        ContainerKind::Rar => run_tool(
            archive,
            &["unar"],
            &["-force-overwrite", "-quiet", "-no-directory", "-output-directory"],
            target_dir,
        ),
        ContainerKind::SevenZip => {
            let out_flag = format!("-o{}", target_dir.display());
            run_tool_with(archive, &["7zz", "7z"], |cmd| {
                cmd.arg("x").arg("-y").arg(&out_flag).arg(archive);
            })
        }
        ContainerKind::Xar => run_tool_with(archive, &["xar"], |cmd| {
            cmd.arg("-x").arg("-f").arg(archive).arg("-C").arg(target_dir);
        }),
        ContainerKind::Dmg => Err(CasketError::UnsupportedContainer(format!(
            "disk images are not supported ({})",
            archive.display()
        ))),
    }
}

fn run_tool(archive: &Path, tools: &[&str], args: &[&str], target_dir: &Path) -> Result<()> {
    run_tool_with(archive, tools, |cmd| {
        cmd.args(args).arg(target_dir).arg(archive);
    })
}

/// Runs the first of `tools` found on PATH.
fn run_tool_with<F>(archive: &Path, tools: &[&str], configure: F) -> Result<()>
where
    F: FnOnce(&mut Command),
{
    let Some(tool) = tools.iter().find_map(|t| which::which(t).ok()) else {
        return Err(CasketError::UnsupportedContainer(format!(
            "{} requires one of: {}",
            archive.display(),
            tools.join(", ")
        )));
    };
    let mut cmd = Command::new(&tool);
    configure(&mut cmd);
    debug!("Running {:?}", cmd);
    let output = cmd.output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(staging_error(
            archive,
            format!(
                "{} exited with {}: {}",
                tool.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ))
    }
}

fn extract_tar_archive<R: Read>(reader: R, target_dir: &Path, archive_path: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut errors: Vec<String> = Vec::new();
    for entry_result in archive
        .entries()
        .map_err(|e| staging_error(archive_path, e))?
    {
        let mut entry = entry_result.map_err(|e| staging_error(archive_path, e))?;
        let path_in_archive = entry
            .path()
            .map_err(|e| staging_error(archive_path, e))?
            .into_owned();
        // unpack_in refuses entries that would land outside target_dir.
        match entry.unpack_in(target_dir) {
            Ok(true) => {}
            Ok(false) => {
                let msg = format!("Refused unsafe TAR path {}", path_in_archive.display());
                error!("{}", msg);
                errors.push(msg);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                let msg = format!("Failed to unpack {}: {}", path_in_archive.display(), e);
                error!("{}", msg);
                errors.push(msg);
            }
        }
    }

    if !errors.is_empty() {
        return Err(staging_error(
            archive_path,
            format!("{} error(s): {}", errors.len(), errors.join("; ")),
        ));
    }
    Ok(())
}

fn safe_join(target_dir: &Path, relative: &Path) -> Option<PathBuf> {
    let mut out = target_dir.to_path_buf();
    for comp in relative.components() {
        match comp {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => return None,
        }
    }
    Some(out)
}

fn extract_zip_archive<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    archive_path: &Path,
) -> Result<()> {
    let mut archive = ZipArchive::new(reader).map_err(|e| staging_error(archive_path, e))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| staging_error(archive_path, e))?;
        let Some(relative) = file.enclosed_name() else {
            return Err(staging_error(
                archive_path,
                format!("unsafe ZIP entry name {}", file.name()),
            ));
        };
        let Some(dest) = safe_join(target_dir, &relative) else {
            return Err(staging_error(
                archive_path,
                format!("ZIP path traversal in {}", relative.display()),
            ));
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if file.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file.is_symlink() {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let link_target = PathBuf::from(String::from_utf8_lossy(&buf).to_string());
            #[cfg(unix)]
            {
                if dest.symlink_metadata().is_ok() {
                    let _ = fs::remove_file(&dest);
                }
                unix_fs::symlink(&link_target, &dest)?;
            }
            #[cfg(not(unix))]
            debug!(
                "Cannot create symlink on non-unix system: {} -> {}",
                dest.display(),
                link_target.display()
            );
        } else {
            if dest.symlink_metadata().is_ok() {
                casket_common::fs::remove_file_if_exists(&dest)?;
            }
            let mut out = File::create(&dest)?;
            io::copy(&mut file, &mut out)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                if !file.is_symlink() && dest.is_file() {
                    fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    fn tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_tar_gz() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("foo.tar.gz");
        tar_gz(&archive, &[("Foo.app/Contents/Info.plist", b"<plist/>")]);

        let out = tmp.path().join("out");
        extract_container(&archive, &out, ContainerKind::TarGz, "foo.tar.gz").unwrap();
        assert!(out.join("Foo.app/Contents/Info.plist").is_file());
    }

    #[test]
    fn extracts_zip_and_keeps_modes() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tool.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
            zip.start_file("bin/tool", options).unwrap();
            zip.write_all(b"#!/bin/sh\n").unwrap();
            zip.finish().unwrap();
        }
        let out = tmp.path().join("out");
        extract_container(&archive, &out, ContainerKind::Zip, "tool.zip").unwrap();
        assert!(out.join("bin/tool").is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(out.join("bin/tool")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn naked_payload_is_copied_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let download = tmp.path().join("foo--1.0--Foo.pkg");
        fs::write(&download, b"xar!").unwrap();
        let out = tmp.path().join("out");
        extract_container(&download, &out, ContainerKind::Naked, "Foo.pkg").unwrap();
        assert!(out.join("Foo.pkg").is_file());
    }

    #[test]
    fn disk_images_are_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let download = tmp.path().join("Foo.dmg");
        fs::write(&download, b"koly").unwrap();
        assert!(matches!(
            extract_container(&download, &tmp.path().join("out"), ContainerKind::Dmg, "Foo.dmg"),
            Err(CasketError::UnsupportedContainer(_))
        ));
    }
}
