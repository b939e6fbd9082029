//! Checkpoint discovery.
//!
//! Training writes checkpoint files somewhere below the save directory, at a
//! depth and under names chosen by the framework. The resolver walks the tree
//! and picks one file:
//!
//! 1. files whose name contains the marker (`last`) win; the greatest by path
//!    ordering among them is returned
//! 2. otherwise the greatest of all checkpoint files is returned
//! 3. otherwise there is no checkpoint
//!
//! The walk does not descend into symlinked directories.
//!
//! Ordering is plain path/string ordering, so `epoch=2.ckpt` sorts after
//! `epoch=10.ckpt`.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// Default checkpoint file extension.
pub const DEFAULT_EXTENSION: &str = "ckpt";
/// Default substring marking the most recently saved checkpoint.
pub const DEFAULT_MARKER: &str = "last";

/// Finds the most relevant checkpoint file under a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointResolver {
    extension: String,
    marker: String,
}

impl Default for CheckpointResolver {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION, DEFAULT_MARKER)
    }
}

impl CheckpointResolver {
    #[must_use]
    pub fn new(extension: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            marker: marker.into(),
        }
    }

    /// All checkpoint files under `root`, sorted.
    ///
    /// A missing root yields an empty list. Symlinked directories are not
    /// descended into; symlinks to files are listed.
    pub fn list(&self, root: impl AsRef<Path>) -> Result<Vec<PathBuf>, CheckpointError> {
        let root = root.as_ref();
        if !root.is_dir() {
            tracing::debug!("Checkpoint root {} does not exist", root.display());
            return Ok(Vec::new());
        }

        let pattern = format!("*.{}", glob::Pattern::escape(&self.extension));
        let pattern =
            glob::Pattern::new(&pattern).map_err(|e| CheckpointError::Pattern(pattern.clone(), e))?;

        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                // removed while we were walking
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(CheckpointError::Access { path: dir, source }),
            };
            for entry in entries {
                let entry = entry.map_err(|source| CheckpointError::Access {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();
                // file_type does not follow symlinks
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    pending.push(path);
                } else if pattern.matches(&entry.file_name().to_string_lossy()) && path.is_file() {
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// The single most relevant checkpoint under `root`, or `None`.
    pub fn resolve(&self, root: impl AsRef<Path>) -> Result<Option<PathBuf>, CheckpointError> {
        let root = root.as_ref();
        let candidates = self.list(root)?;
        tracing::debug!(
            "Found {} checkpoint file(s) under {}",
            candidates.len(),
            root.display()
        );

        let (marked, unmarked): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|p| self.is_marked(p));

        Ok(if marked.is_empty() {
            unmarked.into_iter().max()
        } else {
            marked.into_iter().max()
        })
    }

    fn is_marked(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().contains(&self.marker))
    }
}

/// Resolve with the default extension and marker.
pub fn find_checkpoint(root: impl AsRef<Path>) -> Result<Option<PathBuf>, CheckpointError> {
    CheckpointResolver::default().resolve(root)
}

/// Errors that can occur while searching for checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("invalid checkpoint file pattern {0}: {1}")]
    Pattern(String, glob::PatternError),
    #[error("failed to read {path} while searching for checkpoints: {source}")]
    Access {
        path: PathBuf,
        source: std::io::Error,
    },
}
