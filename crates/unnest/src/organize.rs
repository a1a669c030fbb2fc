//! Relocation of payload files into master directories

use crate::{
    config::{Config, MetadataConfig, PayloadKind},
    error::Result,
};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A payload kind resolved against the working directory
#[derive(Debug, Clone)]
struct Master {
    kind: PayloadKind,
    directory: PathBuf,
}

/// What the organizer moved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeReport {
    /// `(source, destination)` pairs per payload kind name
    pub moved: BTreeMap<String, Vec<(PathBuf, PathBuf)>>,
    /// Destinations that were overwritten by a later file of the same name
    pub collisions: Vec<PathBuf>,
    /// Files that could not be moved
    pub failures: Vec<(PathBuf, String)>,
}

impl OrganizeReport {
    /// Total number of relocated files
    pub fn moved_count(&self) -> usize {
        self.moved.values().map(Vec::len).sum()
    }
}

/// Moves payload files found anywhere in a tree into master directories.
///
/// Name collisions are not resolved: the file written last wins and the
/// overwritten destination is reported.
#[derive(Debug, Clone)]
pub struct Organizer {
    masters: Vec<Master>,
    metadata: MetadataConfig,
}

impl Organizer {
    /// Create an organizer for `working_dir` using the configured payload kinds
    pub fn from_config(config: &Config, working_dir: &Path) -> Self {
        Self {
            masters: config
                .payloads
                .iter()
                .map(|kind| Master {
                    directory: kind.master_directory(working_dir),
                    kind: kind.clone(),
                })
                .collect(),
            metadata: config.metadata.clone(),
        }
    }

    /// The master directories this organizer writes to
    pub fn master_directories(&self) -> Vec<PathBuf> {
        self.masters.iter().map(|m| m.directory.clone()).collect()
    }

    fn is_master(&self, path: &Path) -> bool {
        self.masters.iter().any(|m| path.starts_with(&m.directory))
    }

    fn master_for(&self, file_name: &str) -> Option<&Master> {
        self.masters.iter().find(|m| m.kind.matches(file_name))
    }

    /// Relocate every payload file below `source_root` into its master
    /// directory.
    pub fn organize(&self, source_root: &Path) -> Result<OrganizeReport> {
        for master in &self.masters {
            fs_err::create_dir_all(&master.directory)?;
        }

        // Collect first, the tree must not change under the walker
        let mut planned = Vec::new();
        let walker = WalkDir::new(source_root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(self.is_master(entry.path())
                        || entry
                            .file_name()
                            .to_str()
                            .is_some_and(|name| self.metadata.is_marker(name)))
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if let Some(master) = self.master_for(name) {
                planned.push((entry.path().to_path_buf(), master));
            }
        }

        let mut report = OrganizeReport::default();
        let mut written: HashSet<PathBuf> = HashSet::new();
        for (source, master) in planned {
            let Some(file_name) = source.file_name() else {
                continue;
            };
            let destination = master.directory.join(file_name);

            if written.contains(&destination) || destination.exists() {
                warn!(
                    ?source,
                    ?destination,
                    "destination already exists, overwriting (last write wins)"
                );
                report.collisions.push(destination.clone());
            }

            match move_file(&source, &destination) {
                Ok(()) => {
                    debug!(?source, ?destination, kind = %master.kind.name, "moved payload file");
                    written.insert(destination.clone());
                    report
                        .moved
                        .entry(master.kind.name.clone())
                        .or_default()
                        .push((source, destination));
                }
                Err(e) => {
                    warn!(?source, error = %e, "failed to move payload file");
                    report.failures.push((source, e.to_string()));
                }
            }
        }

        info!(
            moved = report.moved_count(),
            collisions = report.collisions.len(),
            "organize finished"
        );
        Ok(report)
    }
}

/// Move a file, replacing the destination. Falls back to copy and delete when
/// a rename is not possible (different filesystems).
fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs_err::remove_file(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    match fs_err::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(?source, error = %e, "rename failed, copying instead");
            copy_then_remove(source, destination, |path| fs_err::remove_file(path))
        }
    }
}

/// Copy `source` to `destination` and remove `source`. The copy is deleted
/// again when the source cannot be removed, so the file never exists twice.
fn copy_then_remove(
    source: &Path,
    destination: &Path,
    remove_source: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    fs_err::copy(source, destination)?;
    if let Err(e) = remove_source(source) {
        if let Err(cleanup) = fs_err::remove_file(destination) {
            warn!(?destination, error = %cleanup, "failed to remove copy");
        }
        return Err(e);
    }
    Ok(())
}
