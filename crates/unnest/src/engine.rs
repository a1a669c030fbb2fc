//! Recursive extraction engine
//!
//! Drains a directory tree of archives until no archive-classified file is
//! left. Directories waiting to be scanned live on an explicit stack, so the
//! nesting depth of archives does not grow the call stack.

use crate::{
    config::{Config, RetryConfig},
    error::{ArchiveError, Result},
    extractor::{check_signature, is_staging_name, Extractor},
    format::{ArchiveFormat, Candidate, Classifier},
    progress::{NoProgressReporter, ProgressReporter},
    retry::remove_with_retry,
};
use std::collections::HashSet;
use std::fs::FileType;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix appended to an archive's full file name to form its extraction
/// target directory.
pub const EXTRACTED_SUFFIX: &str = "_extracted";

/// A failure local to one filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything an extraction run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Archives that were expanded (and, unless listed in `failures`, deleted)
    pub extracted: Vec<PathBuf>,
    /// Extraction target directories that received archive contents
    pub targets: Vec<PathBuf>,
    /// Files produced by decompressing bare gzip streams
    pub decompressed: Vec<PathBuf>,
    /// Provisional archives whose content was not a container; left in place
    pub revoked: Vec<PathBuf>,
    /// Per-entry failures; the entries were left in place
    pub failures: Vec<ExtractionFailure>,
}

impl ExtractionReport {
    /// Whether `path` was deliberately left in place by this run
    pub fn accounts_for(&self, path: &Path) -> bool {
        self.revoked.iter().any(|p| p == path) || self.failures.iter().any(|f| f.path == path)
    }

    /// True when nothing was changed on disk
    pub fn is_noop(&self) -> bool {
        self.extracted.is_empty() && self.targets.is_empty() && self.decompressed.is_empty()
    }
}

/// Name of the directory an archive is extracted into
pub fn extraction_target(archive_path: &Path) -> Option<PathBuf> {
    let name = archive_path.file_name()?;
    let mut target = name.to_os_string();
    target.push(EXTRACTED_SUFFIX);
    Some(archive_path.with_file_name(target))
}

/// Recursive extraction engine
pub struct ExtractionEngine<P: ProgressReporter = NoProgressReporter> {
    classifier: Classifier,
    extractor: Extractor<P>,
    retry: RetryConfig,
    excluded: Vec<PathBuf>,
    remove_source: fn(&Path) -> io::Result<()>,
}

fn remove_source_file(path: &Path) -> io::Result<()> {
    fs_err::remove_file(path)
}

/// Work item of the explicit traversal stack
enum Frame {
    /// Schedule the subdirectories of a directory, then its archives
    Visit(PathBuf),
    /// Expand the archives directly inside a directory
    Expand(PathBuf),
}

impl ExtractionEngine<NoProgressReporter> {
    /// Create an engine from the run configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Classifier::from_config(config),
            Extractor::new(),
            config.delete_retry.clone(),
        )
    }
}

impl<P: ProgressReporter> ExtractionEngine<P> {
    pub fn new(classifier: Classifier, extractor: Extractor<P>, retry: RetryConfig) -> Self {
        Self {
            classifier,
            extractor,
            retry,
            excluded: Vec::new(),
            remove_source: remove_source_file,
        }
    }

    #[cfg(test)]
    fn with_source_remover(mut self, remove: fn(&Path) -> io::Result<()>) -> Self {
        self.remove_source = remove;
        self
    }

    /// Never descend into these directories (the master directories)
    pub fn with_excluded(mut self, directories: impl IntoIterator<Item = PathBuf>) -> Self {
        self.excluded.extend(directories);
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|dir| path.starts_with(dir))
    }

    fn should_descend(&self, path: &Path, name: &str) -> bool {
        !(self.is_excluded(path) || self.classifier.is_marker(name) || is_staging_name(name))
    }

    /// Expand every archive reachable from `directory`.
    ///
    /// Subdirectories of a directory are drained before the archives sitting
    /// directly in it. Only a failure to read `directory` itself is returned
    /// as an error; everything below it is recorded in the report.
    pub fn extract(&self, directory: &Path) -> Result<ExtractionReport> {
        fs_err::read_dir(directory)?;

        let mut report = ExtractionReport::default();
        let mut settled: HashSet<PathBuf> = HashSet::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut stack = vec![Frame::Visit(directory.to_path_buf())];
        visited.insert(directory.to_path_buf());

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(dir) => {
                    debug!(?dir, "scanning directory");
                    let Some(children) = self.list(&dir, &mut report) else {
                        continue;
                    };
                    stack.push(Frame::Expand(dir));
                    for (path, file_type) in children {
                        if file_type.is_dir() && self.descend_once(&path, &mut visited) {
                            stack.push(Frame::Visit(path));
                        }
                    }
                }
                Frame::Expand(dir) => self.expand_directory(
                    &dir,
                    directory,
                    &mut stack,
                    &mut visited,
                    &mut settled,
                    &mut report,
                ),
            }
        }

        info!(
            extracted = report.extracted.len(),
            revoked = report.revoked.len(),
            failed = report.failures.len(),
            "extraction finished"
        );

        Ok(report)
    }

    fn list(&self, dir: &Path, report: &mut ExtractionReport) -> Option<Vec<(PathBuf, FileType)>> {
        match list_children(dir) {
            Ok(children) => Some(children),
            Err(e) => {
                warn!(?dir, error = %e, "failed to list directory");
                report.failures.push(ExtractionFailure {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn descend_once(&self, path: &Path, visited: &mut HashSet<PathBuf>) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.should_descend(path, name) && visited.insert(path.to_path_buf())
    }

    fn expand_directory(
        &self,
        dir: &Path,
        root: &Path,
        stack: &mut Vec<Frame>,
        visited: &mut HashSet<PathBuf>,
        settled: &mut HashSet<PathBuf>,
        report: &mut ExtractionReport,
    ) {
        // A decompressed gzip stream may itself be an archive, so the
        // directory is listed again until a pass expands nothing.
        loop {
            let Some(children) = self.list(dir, report) else {
                return;
            };

            let mut relist = false;
            for (path, file_type) in children {
                if file_type.is_dir() {
                    if self.descend_once(&path, visited) {
                        stack.push(Frame::Visit(path));
                    }
                    continue;
                }

                if !file_type.is_file() || settled.contains(&path) {
                    continue;
                }

                let Some(candidate) = self.classifier.candidate_in(root, &path) else {
                    continue;
                };

                match self.expand(&path, candidate) {
                    Ok(produced) => {
                        report.extracted.push(path.clone());
                        if let Err(e) = remove_with_retry(&path, &self.retry, self.remove_source) {
                            report.failures.push(ExtractionFailure {
                                path: path.clone(),
                                reason: format!("extracted but not deleted: {e}"),
                            });
                            settled.insert(path.clone());
                        }

                        if candidate.format == ArchiveFormat::Gzip {
                            report.decompressed.push(produced);
                            relist = true;
                        } else {
                            visited.insert(produced.clone());
                            report.targets.push(produced.clone());
                            stack.push(Frame::Visit(produced));
                        }
                    }
                    Err(e) if candidate.provisional && e.is_format_rejection() => {
                        debug!(?path, reason = %e, "not a container, leaving in place");
                        report.revoked.push(path.clone());
                        settled.insert(path);
                    }
                    Err(e) => {
                        warn!(?path, error = %e, "failed to extract archive");
                        report.failures.push(ExtractionFailure {
                            path: path.clone(),
                            reason: e.to_string(),
                        });
                        settled.insert(path);
                    }
                }
            }

            if !relist {
                return;
            }
        }
    }

    fn expand(&self, path: &Path, candidate: Candidate) -> Result<PathBuf> {
        if candidate.provisional {
            check_signature(path, candidate.format)?;
        }

        let destination = if candidate.format == ArchiveFormat::Gzip {
            path.parent().map(Path::to_path_buf)
        } else {
            extraction_target(path)
        }
        .ok_or_else(|| ArchiveError::unsupported_format(&path.display().to_string()))?;

        info!(?path, format = candidate.format.name(), "extracting");
        self.extractor.extract(candidate.format, path, &destination)
    }

    /// Archive-classified files still present below `directory`, outside of
    /// excluded and metadata marker directories.
    pub fn pending(&self, directory: &Path) -> Vec<PathBuf> {
        WalkDir::new(directory)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| self.should_descend(entry.path(), name))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                self.classifier
                    .candidate_in(directory, entry.path())
                    .is_some()
            })
            .map(|entry| entry.into_path())
            .collect()
    }
}

fn list_children(dir: &Path) -> std::io::Result<Vec<(PathBuf, FileType)>> {
    let mut children = Vec::new();
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        children.push((entry.path(), entry.file_type()?));
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, contents) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }

    fn engine() -> ExtractionEngine {
        let mut config = Config::default();
        config.delete_retry.initial_delay_ms = 1;
        ExtractionEngine::from_config(&config)
    }

    #[test]
    fn test_target_name_keeps_full_name() {
        assert_eq!(
            extraction_target(Path::new("dir/a.tar")),
            Some(PathBuf::from("dir/a.tar_extracted"))
        );
        assert_ne!(
            extraction_target(Path::new("dir/a.tar")),
            extraction_target(Path::new("dir/a.tar.gz"))
        );
    }

    #[test]
    fn test_extracts_and_deletes_source() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("notes.txt", b"hi")]);

        let report = engine().extract(dir.path()).unwrap();

        assert_eq!(report.extracted, vec![archive.clone()]);
        assert!(!archive.exists());
        assert_eq!(
            fs_err::read_to_string(dir.path().join("bundle.zip_extracted/notes.txt")).unwrap(),
            "hi"
        );
    }

    #[test]
    fn test_skips_metadata_directory() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("__MACOSX");
        fs_err::create_dir(&marker).unwrap();
        write_zip(&marker.join("bundle.zip"), &[("notes.txt", b"hi")]);
        write_zip(&dir.path().join("._bundle.zip"), &[("notes.txt", b"hi")]);

        let report = engine().extract(dir.path()).unwrap();

        assert!(report.is_noop());
        assert!(marker.join("bundle.zip").exists());
        assert!(dir.path().join("._bundle.zip").exists());
    }

    #[test]
    fn test_skips_excluded_directory() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("stdf");
        fs_err::create_dir(&master).unwrap();
        write_zip(&master.join("kept.zip"), &[("a.txt", b"a")]);

        let report = engine()
            .with_excluded([master.clone()])
            .extract(dir.path())
            .unwrap();

        assert!(report.is_noop());
        assert!(master.join("kept.zip").exists());
        assert!(engine()
            .with_excluded([master])
            .pending(dir.path())
            .is_empty());
    }

    #[test]
    fn test_corrupt_tar_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.tar.gz");
        fs_err::write(&archive, b"not gzip at all").unwrap();

        let report = engine().extract(dir.path()).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, archive);
        assert!(archive.exists());
        assert!(!dir.path().join("broken.tar.gz_extracted").exists());
        assert_eq!(engine().pending(dir.path()), vec![archive.clone()]);
        assert!(report.accounts_for(&archive));
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(engine().extract(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_double_gzip_is_relisted() {
        let dir = tempfile::tempdir().unwrap();

        let mut inner = Vec::new();
        {
            let mut encoder =
                flate2::write::GzEncoder::new(&mut inner, flate2::Compression::default());
            encoder.write_all(b"payload").unwrap();
            encoder.finish().unwrap();
        }
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(dir.path().join("data.txt.gz.gz")).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(&inner).unwrap();
        encoder.finish().unwrap();

        let report = engine().extract(dir.path()).unwrap();

        assert_eq!(report.extracted.len(), 2);
        assert_eq!(
            fs_err::read_to_string(dir.path().join("data.txt")).unwrap(),
            "payload"
        );
        assert!(engine().pending(dir.path()).is_empty());
    }

    #[test]
    fn test_subdirectories_are_drained_first() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs_err::create_dir(&sub).unwrap();
        write_zip(&dir.path().join("top.zip"), &[("a.txt", b"a")]);
        write_zip(&sub.join("nested.zip"), &[("b.txt", b"b")]);

        let report = engine().extract(dir.path()).unwrap();

        assert_eq!(
            report.extracted,
            vec![sub.join("nested.zip"), dir.path().join("top.zip")]
        );
    }

    #[test]
    fn test_stdf_with_zip_signature_but_no_archive_is_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = b"PK\x03\x04".to_vec();
        contents.extend((0u8..=255).cycle().take(512));
        let fake = dir.path().join("lot.stdf");
        fs_err::write(&fake, &contents).unwrap();

        let report = engine().extract(dir.path()).unwrap();

        assert_eq!(report.revoked, vec![fake.clone()]);
        assert!(report.failures.is_empty());
        assert_eq!(fs_err::read(&fake).unwrap(), contents);
        assert!(!dir.path().join("lot.stdf_extracted").exists());
        let names: Vec<_> = fs_err::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["lot.stdf"]);
    }

    #[test]
    fn test_undeletable_source_is_reported_and_target_drained() {
        let dir = tempfile::tempdir().unwrap();
        let mut inner = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut inner));
            writer
                .start_file("x.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"x").unwrap();
            writer.finish().unwrap();
        }
        let archive = dir.path().join("outer.zip");
        write_zip(&archive, &[("inner.zip", inner.as_slice())]);

        let report = engine()
            .with_source_remover(|_| Err(io::ErrorKind::PermissionDenied.into()))
            .extract(dir.path())
            .unwrap();

        let inner_path = dir.path().join("outer.zip_extracted/inner.zip");
        assert_eq!(report.extracted, vec![archive.clone(), inner_path.clone()]);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.reason.starts_with("extracted but not deleted")));
        assert!(archive.exists());
        assert!(inner_path.exists());
        assert_eq!(
            fs_err::read(dir.path().join("outer.zip_extracted/inner.zip_extracted/x.txt"))
                .unwrap(),
            b"x"
        );
        assert!(engine()
            .pending(dir.path())
            .iter()
            .all(|path| report.accounts_for(path)));
    }
}
