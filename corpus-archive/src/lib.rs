//! Archive expansion (C8).
//!
//! The teacher pack has no archive-handling code to ground this on
//! directly (it only ever produces synthetic `ChunkRecord`s in tests), so
//! this follows the `zip` crate's own idiomatic read API — already a
//! teacher dependency (`file-chunker/Cargo.toml`) — and extends it with
//! `tar`+`flate2`+`bzip2` for the tar family, the registry-standard
//! counterpart crates for that format.

use std::io::Read;
use std::path::{Component, Path};

use thiserror::Error;

const MAX_MEMBER_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unsupported archive format for `{0}`")]
    UnsupportedFormat(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
}

impl ArchiveFormat {
    pub fn detect(rel_path: &str) -> Option<Self> {
        let lower = rel_path.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.bz2") {
            Some(Self::TarBz2)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// One extracted archive member, not yet a document; nested archives are
/// reported with `is_nested_archive=true` so the caller can persist them
/// as `skipped` rather than recursing (depth is capped at 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub rel_path: String,
    pub data: Vec<u8>,
    pub is_nested_archive: bool,
}

/// Expands one archive's members. `archive_rel_path` is the archive
/// document's own `rel_path`, prefixed onto every member's `rel_path`.
/// Corrupted archives yield whatever members were successfully parsed;
/// individual bad entries are skipped and logged rather than aborting.
pub fn expand_archive(abs_path: &Path, archive_rel_path: &str) -> Result<Vec<ArchiveMember>, ArchiveError> {
    let format = ArchiveFormat::detect(archive_rel_path)
        .ok_or_else(|| ArchiveError::UnsupportedFormat(archive_rel_path.to_string()))?;

    match format {
        ArchiveFormat::Zip => expand_zip(abs_path, archive_rel_path),
        ArchiveFormat::Tar => {
            let file = std::fs::File::open(abs_path)?;
            expand_tar(file, archive_rel_path)
        }
        ArchiveFormat::TarGz => {
            let file = std::fs::File::open(abs_path)?;
            expand_tar(flate2::read::GzDecoder::new(file), archive_rel_path)
        }
        ArchiveFormat::TarBz2 => {
            let file = std::fs::File::open(abs_path)?;
            expand_tar(bzip2::read::BzDecoder::new(file), archive_rel_path)
        }
    }
}

fn expand_zip(abs_path: &Path, archive_rel_path: &str) -> Result<Vec<ArchiveMember>, ArchiveError> {
    let file = std::fs::File::open(abs_path)?;
    let mut zip = zip::ZipArchive::new(file)?;

    let mut members = Vec::new();
    for i in 0..zip.len() {
        let mut entry = match zip.by_index(i) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(archive = archive_rel_path, error = %err, "skipping unreadable zip entry");
                continue;
            }
        };

        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().map(|p| p.to_string_lossy().replace('\\', "/")) else {
            tracing::warn!(archive = archive_rel_path, "skipping zip entry with traversal path");
            continue;
        };
        if !is_safe_member_path(&name) {
            continue;
        }
        if entry.size() > MAX_MEMBER_BYTES {
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        if let Err(err) = entry.by_ref().take(MAX_MEMBER_BYTES).read_to_end(&mut data) {
            tracing::warn!(archive = archive_rel_path, member = %name, error = %err, "failed reading zip entry");
            continue;
        }

        let is_nested_archive = ArchiveFormat::detect(&name).is_some();
        members.push(ArchiveMember {
            rel_path: format!("{archive_rel_path}/{name}"),
            data,
            is_nested_archive,
        });
    }
    Ok(members)
}

fn expand_tar<R: Read>(reader: R, archive_rel_path: &str) -> Result<Vec<ArchiveMember>, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let entries = match archive.entries() {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!(archive = archive_rel_path, error = %err, "failed to read tar entries");
            return Ok(Vec::new());
        }
    };

    let mut members = Vec::new();
    for entry in entries {
        let mut entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(archive = archive_rel_path, error = %err, "skipping unreadable tar entry");
                continue;
            }
        };

        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }

        let path = match entry.path() {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if !is_safe_member_path(&path) {
            tracing::warn!(archive = archive_rel_path, member = %path, "skipping tar entry with traversal path");
            continue;
        }

        let size = entry.header().size().unwrap_or(0);
        if size > MAX_MEMBER_BYTES {
            continue;
        }

        let mut data = Vec::with_capacity(size as usize);
        if let Err(err) = entry.by_ref().take(MAX_MEMBER_BYTES).read_to_end(&mut data) {
            tracing::warn!(archive = archive_rel_path, member = %path, error = %err, "failed reading tar entry");
            continue;
        }

        let is_nested_archive = ArchiveFormat::detect(&path).is_some();
        members.push(ArchiveMember {
            rel_path: format!("{archive_rel_path}/{path}"),
            data,
            is_nested_archive,
        });
    }
    Ok(members)
}

fn is_safe_member_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return false;
    }
    !p.components().any(|c| matches!(c, Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_detection_by_extension() {
        assert_eq!(ArchiveFormat::detect("bundle.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect("bundle.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::detect("bundle.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("bundle.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("bundle.tar.bz2"), Some(ArchiveFormat::TarBz2));
        assert_eq!(ArchiveFormat::detect("bundle.rar"), None);
    }

    #[test]
    fn rejects_traversal_paths() {
        assert!(!is_safe_member_path("../etc/passwd"));
        assert!(!is_safe_member_path("a/../../b"));
        assert!(is_safe_member_path("a/b/c.txt"));
    }

    #[test]
    fn expands_zip_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer.start_file("notes.txt", zip::write::FileOptions::default()).unwrap();
            writer.write_all(b"hello archive").unwrap();
            writer.finish().unwrap();
        }

        let members = expand_archive(&path, "bundle.zip").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].rel_path, "bundle.zip/notes.txt");
        assert_eq!(members[0].data, b"hello archive");
        assert!(!members[0].is_nested_archive);
    }
}
