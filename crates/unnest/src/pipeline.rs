//! The three phase run: extract to a fixed point, organize, clean up

use crate::{
    cleanup::{CleanupReport, Cleaner},
    config::Config,
    engine::{ExtractionEngine, ExtractionReport},
    error::{ArchiveError, Result},
    extractor::Extractor,
    format::{ArchiveKind, Classifier},
    organize::{OrganizeReport, Organizer},
    progress::{NoProgressReporter, ProgressReporter},
};
use std::path::{Path, PathBuf};
use tracing::info;

/// Outcome of a complete run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub working_dir: PathBuf,
    pub extraction: ExtractionReport,
    /// `None` when the organize phase is disabled
    pub organize: Option<OrganizeReport>,
    /// `None` when the cleanup phase is disabled
    pub cleanup: Option<CleanupReport>,
}

/// Runs extraction, organization and cleanup for one root archive.
pub struct Pipeline<P: ProgressReporter = NoProgressReporter> {
    config: Config,
    progress_reporter: P,
}

impl Pipeline<NoProgressReporter> {
    /// Create a pipeline, validating the configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress_reporter: NoProgressReporter,
        })
    }
}

impl<P: ProgressReporter> Pipeline<P> {
    /// Set a custom progress reporter
    pub fn with_progress_reporter<R: ProgressReporter>(self, reporter: R) -> Pipeline<R> {
        Pipeline {
            config: self.config,
            progress_reporter: reporter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Expand `input` into `working_dir` and sort the payload files.
    ///
    /// Fails before touching the filesystem when `input` is not a ZIP or
    /// tar-family archive. Failures below the root input are recorded in the
    /// report instead.
    pub fn run(&self, input: &Path, working_dir: &Path) -> Result<RunReport> {
        let classifier = Classifier::from_config(&self.config);
        let name = input.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let candidate = classifier
            .candidate(name)
            .filter(|c| {
                !c.provisional && matches!(c.format.kind(), ArchiveKind::Zip | ArchiveKind::Tar)
            })
            .ok_or_else(|| ArchiveError::unsupported_format(&input.display().to_string()))?;

        fs_err::metadata(input)?;
        fs_err::create_dir_all(working_dir)?;
        if fs_err::canonicalize(input)?.starts_with(fs_err::canonicalize(working_dir)?) {
            return Err(ArchiveError::config(format!(
                "input {} must not be inside the working directory {}",
                input.display(),
                working_dir.display()
            )));
        }

        let extractor = Extractor::new().with_progress_reporter(&self.progress_reporter);

        info!(?input, ?working_dir, "extracting root archive");
        extractor.extract(candidate.format, input, working_dir)?;

        let masters = self.config.master_directories(working_dir);
        let engine = ExtractionEngine::new(classifier, extractor, self.config.delete_retry.clone())
            .with_excluded(masters);

        info!("phase 1: expanding nested archives");
        let extraction = engine.extract(working_dir)?;

        let unaccounted: Vec<PathBuf> = engine
            .pending(working_dir)
            .into_iter()
            .filter(|path| !extraction.accounts_for(path))
            .collect();
        if !unaccounted.is_empty() {
            return Err(ArchiveError::FixedPointNotReached {
                pending: unaccounted,
            });
        }

        let organize = if self.config.organize {
            info!("phase 2: organizing payload files");
            Some(Organizer::from_config(&self.config, working_dir).organize(working_dir)?)
        } else {
            None
        };

        let cleanup = if self.config.cleanup {
            info!("phase 3: cleaning up");
            Some(Cleaner::from_config(&self.config, working_dir).cleanup(working_dir)?)
        } else {
            None
        };

        Ok(RunReport {
            working_dir: working_dir.to_path_buf(),
            extraction,
            organize,
            cleanup,
        })
    }
}
