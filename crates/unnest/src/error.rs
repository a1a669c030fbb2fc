//! Error types for the unnest crate

use std::path::PathBuf;

/// Result type for unnest operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error type for unnest operations
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error during archive operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown or unsupported archive format
    #[error("Unsupported archive format for file: {filename}")]
    UnsupportedFormat { filename: String },

    /// Error extracting tar archive
    #[error("Failed to extract tar archive: {message}")]
    TarExtraction { message: String },

    /// Error extracting zip archive
    #[error("Failed to extract zip archive: {message}")]
    ZipExtraction { message: String },

    /// Error decompressing a bare gzip stream
    #[error("Failed to decompress gzip stream: {message}")]
    GzipExtraction { message: String },

    /// A provisionally classified file turned out not to be a container
    #[error("{path} is not a valid {format} container: {reason}")]
    NotAContainer {
        path: PathBuf,
        format: &'static str,
        reason: String,
    },

    /// Error creating temporary directory
    #[error("Failed to create temporary directory: {0}")]
    TempDirCreation(String),

    /// Archive contains no files or directories
    #[error("Archive appears to be empty or contains no extractable content")]
    EmptyArchive,

    /// The decompressed output would overwrite an existing file
    #[error("Refusing to overwrite existing file {path}")]
    DestinationExists { path: PathBuf },

    /// Invalid or unreadable configuration
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Archives remain after the extraction engine returned
    #[error(
        "{} archive(s) remain unextracted, first: {}",
        .pending.len(),
        first_path(.pending)
    )]
    FixedPointNotReached { pending: Vec<PathBuf> },
}

fn first_path(paths: &[PathBuf]) -> String {
    paths
        .first()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

impl ArchiveError {
    /// Create a new unsupported format error
    pub fn unsupported_format(filename: &str) -> Self {
        Self::UnsupportedFormat {
            filename: filename.to_string(),
        }
    }

    /// Create a new tar extraction error
    pub fn tar_extraction(message: impl Into<String>) -> Self {
        Self::TarExtraction {
            message: message.into(),
        }
    }

    /// Create a new zip extraction error
    pub fn zip_extraction(message: impl Into<String>) -> Self {
        Self::ZipExtraction {
            message: message.into(),
        }
    }

    /// Create a new gzip extraction error
    pub fn gzip_extraction(message: impl Into<String>) -> Self {
        Self::GzipExtraction {
            message: message.into(),
        }
    }

    /// Create a new "not a container" error
    pub fn not_a_container(
        path: impl Into<PathBuf>,
        format: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::NotAContainer {
            path: path.into(),
            format,
            reason: reason.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether the decoder rejected the content as not being a container of
    /// the claimed kind, as opposed to an environmental failure.
    pub fn is_format_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotAContainer { .. } | Self::ZipExtraction { .. } | Self::EmptyArchive
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rejection() {
        let not_a_zip = ArchiveError::not_a_container("x.stdf", "ZIP", "no signature");
        assert!(not_a_zip.is_format_rejection());
        assert!(ArchiveError::zip_extraction("invalid Zip archive").is_format_rejection());
        let denied = ArchiveError::Io(std::io::ErrorKind::PermissionDenied.into());
        assert!(!denied.is_format_rejection());
        assert!(!ArchiveError::tar_extraction("truncated").is_format_rejection());
    }

    #[test]
    fn test_fixed_point_message() {
        let err = ArchiveError::FixedPointNotReached {
            pending: vec![PathBuf::from("a.zip"), PathBuf::from("b.tar")],
        };
        assert_eq!(
            err.to_string(),
            "2 archive(s) remain unextracted, first: a.zip"
        );
    }
}
