//! Filesystem discovery (C4).
//!
//! Grounded on `vyotiq-ai-vyotiq-agent`'s `IndexManager::index_workspace`
//! (`ignore::WalkBuilder` with gitignore/global/exclude composition, a
//! heavy-directory skip list, and a file-size cap) generalized from a
//! tantivy-specific indexer into a plain candidate-file walker.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

const HEAVY_DIRS: &[&str] = &[".git", "node_modules", "vendor", "__pycache__"];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid root directory `{0}`: {1}")]
    InvalidRoot(String, std::io::Error),
    #[error("invalid exclude glob `{0}`: {1}")]
    InvalidGlob(String, globset::Error),
    #[error("walk error: {0}")]
    Walk(#[from] ignore::Error),
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub root_dir: PathBuf,
    pub max_size_bytes: u64,
    pub follow_symlinks: bool,
    pub use_gitignore: bool,
    pub path_excludes: Vec<String>,
    /// Extra directory basenames to skip, beyond the built-in heavy list
    /// (callers pass the state directory's basename here).
    pub extra_skip_dirs: Vec<String>,
}

impl DiscoveryConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_size_bytes: 50 * 1024 * 1024,
            follow_symlinks: false,
            use_gitignore: true,
            path_excludes: Vec::new(),
            extra_skip_dirs: Vec::new(),
        }
    }
}

/// One candidate file surfaced by a scan, not yet classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub size_bytes: u64,
    pub mtime_unix: i64,
    pub mode: u32,
}

/// Walks `config.root_dir` and returns candidate files in deterministic
/// (`rel_path` ascending) order.
pub fn discover(config: &DiscoveryConfig) -> Result<Vec<DiscoveredFile>, DiscoveryError> {
    let root = config
        .root_dir
        .canonicalize()
        .map_err(|e| DiscoveryError::InvalidRoot(config.root_dir.display().to_string(), e))?;

    let excludes = build_excludes(&config.path_excludes)?;
    let skip_dirs: HashSet<&str> = HEAVY_DIRS
        .iter()
        .copied()
        .chain(config.extra_skip_dirs.iter().map(|s| s.as_str()))
        .collect();

    let mut builder = ignore::WalkBuilder::new(&root);
    builder
        .hidden(false)
        .git_ignore(config.use_gitignore)
        .git_global(config.use_gitignore)
        .git_exclude(config.use_gitignore)
        .follow_links(config.follow_symlinks)
        .ignore(config.use_gitignore)
        .parents(config.use_gitignore);

    let mut out = Vec::new();
    let mut visited_inodes: HashSet<u64> = HashSet::new();

    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "discovery walk entry error");
                continue;
            }
        };

        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) && skip_dirs.contains(name) {
                continue;
            }
        }

        let file_type = match entry.file_type() {
            Some(t) => t,
            None => continue,
        };
        if !file_type.is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to stat discovered entry");
                continue;
            }
        };

        if metadata.len() > config.max_size_bytes {
            continue;
        }

        if config.follow_symlinks {
            if let Ok(resolved) = path.canonicalize() {
                if !resolved.starts_with(&root) {
                    tracing::warn!(path = %path.display(), "skipping symlink target escaping root");
                    continue;
                }
            }
            if let Some(ino) = inode_of(&metadata) {
                if !visited_inodes.insert(ino) {
                    continue;
                }
            }
        }

        let rel_path = match path.strip_prefix(&root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };

        if excludes.is_match(&rel_path) {
            continue;
        }

        let mtime_unix = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        out.push(DiscoveredFile {
            abs_path: path.to_path_buf(),
            rel_path,
            size_bytes: metadata.len(),
            mtime_unix,
            mode: mode_of(&metadata),
        });
    }

    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet, DiscoveryError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| DiscoveryError::InvalidGlob(pattern.clone(), e))?;
        builder.add(glob);
    }
    builder.build().map_err(|e| DiscoveryError::InvalidGlob("<set>".into(), e))
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode_of(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_of(_metadata: &std::fs::Metadata) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_files_in_deterministic_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/skip.txt"), "skip").unwrap();

        let config = DiscoveryConfig::new(dir.path());
        let files = discover(&config).unwrap();
        let rel_paths: Vec<_> = files.iter().map(|f| f.rel_path.clone()).collect();
        assert_eq!(rel_paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn respects_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.txt"), vec![0u8; 1024]).unwrap();

        let mut config = DiscoveryConfig::new(dir.path());
        config.max_size_bytes = 10;
        let files = discover(&config).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn respects_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), "k").unwrap();
        fs::write(dir.path().join("skip.log"), "s").unwrap();

        let mut config = DiscoveryConfig::new(dir.path());
        config.path_excludes.push("*.log".to_string());
        let files = discover(&config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "keep.txt");
    }
}
