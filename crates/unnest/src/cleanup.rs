//! Removal of metadata noise and directories emptied by extraction

use crate::{
    config::{Config, MetadataConfig},
    error::Result,
};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What the cleanup pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Metadata marker directories and files
    pub removed_markers: Vec<PathBuf>,
    /// Directories that were empty
    pub removed_directories: Vec<PathBuf>,
}

/// Removes metadata markers and empty directories below a root.
///
/// The root itself, the protected (master) directories and their ancestors
/// are never removed.
#[derive(Debug, Clone)]
pub struct Cleaner {
    protected: Vec<PathBuf>,
    metadata: MetadataConfig,
}

impl Cleaner {
    pub fn new(protected: Vec<PathBuf>, metadata: MetadataConfig) -> Self {
        Self {
            protected,
            metadata,
        }
    }

    pub fn from_config(config: &Config, working_dir: &Path) -> Self {
        Self::new(
            config.master_directories(working_dir),
            config.metadata.clone(),
        )
    }

    fn is_protected(&self, dir: &Path) -> bool {
        self.protected.iter().any(|master| master.starts_with(dir))
    }

    fn is_inside_protected(&self, path: &Path) -> bool {
        self.protected.iter().any(|master| path.starts_with(master))
    }

    fn is_marker_name(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.metadata.is_marker(name))
    }

    fn has_marker_ancestor(&self, root: &Path, path: &Path) -> bool {
        let Some(parent) = path.strip_prefix(root).ok().and_then(Path::parent) else {
            return false;
        };
        parent.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|name| self.metadata.is_marker(name)),
            _ => false,
        })
    }

    /// Remove metadata markers, then every directory left empty, children
    /// before parents.
    pub fn cleanup(&self, source_root: &Path) -> Result<CleanupReport> {
        let mut markers = Vec::new();
        let mut directories = Vec::new();

        let walker = WalkDir::new(source_root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_entry(|entry| !self.is_inside_protected(entry.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if self.has_marker_ancestor(source_root, path) {
                continue;
            }
            if self.is_marker_name(path) {
                markers.push((entry.path().to_path_buf(), entry.file_type().is_dir()));
            } else if entry.file_type().is_dir() {
                directories.push(entry.path().to_path_buf());
            }
        }

        let mut report = CleanupReport::default();

        for (marker, is_dir) in markers {
            let removed = if is_dir {
                fs_err::remove_dir_all(&marker)
            } else {
                fs_err::remove_file(&marker)
            };
            match removed {
                Ok(()) => {
                    debug!(?marker, "removed metadata marker");
                    report.removed_markers.push(marker);
                }
                Err(e) => warn!(?marker, error = %e, "failed to remove metadata marker"),
            }
        }

        // `directories` is in post-order, so children were handled first
        for dir in directories {
            if self.is_protected(&dir) {
                continue;
            }
            let is_empty = match fs_err::read_dir(&dir) {
                Ok(mut entries) => entries.next().is_none(),
                Err(e) => {
                    warn!(?dir, error = %e, "failed to read directory");
                    continue;
                }
            };
            if !is_empty {
                continue;
            }
            match fs_err::remove_dir(&dir) {
                Ok(()) => {
                    debug!(?dir, "removed empty directory");
                    report.removed_directories.push(dir);
                }
                Err(e) => warn!(?dir, error = %e, "failed to remove empty directory"),
            }
        }

        info!(
            markers = report.removed_markers.len(),
            directories = report.removed_directories.len(),
            "cleanup finished"
        );
        Ok(report)
    }
}
