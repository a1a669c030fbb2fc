//! Archive format detection and classification

use crate::config::{Config, MetadataConfig};
use std::ffi::OsStr;
use std::path::{Component, Path};

/// Container family of a file, derived from its name alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// ZIP archive (including provisional ZIP suffixes)
    Zip,
    /// Tar archive, plain or gzip-compressed
    Tar,
    /// A single gzip-compressed stream that is not a tar archive
    Gzip,
    /// Not an archive
    None,
}

impl ArchiveKind {
    /// Whether this kind denotes an archive at all
    pub fn is_archive(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Plain tar archive
    Tar,
    /// Gzip-compressed tar archive (.tar.gz, .tgz)
    TarGz,
    /// Bare gzip stream (.gz)
    Gzip,
    /// ZIP archive
    Zip,
}

impl ArchiveFormat {
    /// Detect archive format from filename
    pub fn detect_from_filename(filename: &str) -> Option<Self> {
        let filename = filename.to_lowercase();

        // Tar-based formats first, `.tar.gz` would otherwise match `.gz`
        if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        if filename.ends_with(".tar") {
            return Some(Self::Tar);
        }
        if filename.ends_with(".gz") {
            return Some(Self::Gzip);
        }
        if filename.ends_with(".zip") {
            return Some(Self::Zip);
        }

        None
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tar => "TAR",
            Self::TarGz => "TAR.GZ",
            Self::Gzip => "GZ",
            Self::Zip => "ZIP",
        }
    }

    /// The container family of this format
    pub fn kind(&self) -> ArchiveKind {
        match self {
            Self::Tar | Self::TarGz => ArchiveKind::Tar,
            Self::Gzip => ArchiveKind::Gzip,
            Self::Zip => ArchiveKind::Zip,
        }
    }

    /// Get the typical file extensions for this format
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Tar => &[".tar"],
            Self::TarGz => &[".tar.gz", ".tgz"],
            Self::Gzip => &[".gz"],
            Self::Zip => &[".zip"],
        }
    }
}

/// A file that the classifier considers an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub format: ArchiveFormat,
    /// Set for names that are only sometimes ZIP containers. The
    /// classification is revoked when the content is not a ZIP archive.
    pub provisional: bool,
}

/// Name based classifier that knows about metadata markers and provisional
/// ZIP suffixes.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    provisional_zip_suffixes: Vec<String>,
    metadata: MetadataConfig,
}

impl Classifier {
    /// Create a classifier from explicit settings
    pub fn new(provisional_zip_suffixes: Vec<String>, metadata: MetadataConfig) -> Self {
        Self {
            provisional_zip_suffixes: provisional_zip_suffixes
                .into_iter()
                .map(|suffix| suffix.to_lowercase())
                .collect(),
            metadata,
        }
    }

    /// Create a classifier from the run configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.provisional_zip_suffixes.clone(),
            config.metadata.clone(),
        )
    }

    /// Classify a single file name
    pub fn classify(&self, name: &str) -> ArchiveKind {
        self.candidate(name)
            .map_or(ArchiveKind::None, |candidate| candidate.format.kind())
    }

    /// Classify a file name, keeping the concrete format
    pub fn candidate(&self, name: &str) -> Option<Candidate> {
        if self.metadata.is_marker(name) {
            return None;
        }

        if let Some(format) = ArchiveFormat::detect_from_filename(name) {
            return Some(Candidate {
                format,
                provisional: false,
            });
        }

        let lower = name.to_lowercase();
        self.provisional_zip_suffixes
            .iter()
            .any(|suffix| lower.ends_with(suffix.as_str()))
            .then_some(Candidate {
                format: ArchiveFormat::Zip,
                provisional: true,
            })
    }

    /// Classify a file below `root`. Files inside a metadata marker directory
    /// are never archives.
    pub fn candidate_in(&self, root: &Path, path: &Path) -> Option<Candidate> {
        if self.is_inside_marker(root, path) {
            return None;
        }
        path.file_name()
            .and_then(OsStr::to_str)
            .and_then(|name| self.candidate(name))
    }

    /// Whether `name` is a platform metadata marker
    pub fn is_marker(&self, name: &str) -> bool {
        self.metadata.is_marker(name)
    }

    /// Whether any directory between `root` and `path` is a metadata marker
    pub fn is_inside_marker(&self, root: &Path, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        let parent = relative.parent().unwrap_or(Path::new(""));
        parent.components().any(|component| match component {
            Component::Normal(name) => name.to_str().is_some_and(|name| self.is_marker(name)),
            _ => false,
        })
    }
}
