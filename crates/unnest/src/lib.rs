//! Recursive archive expansion and payload sorting
//!
//! This crate takes one root archive, expands every archive nested inside it
//! (zip, tar, tar.gz and bare gzip streams, to any depth), moves the payload
//! files it finds into one master directory per payload kind and finally
//! removes the directories left empty together with platform metadata noise.
//!
//! The run is split in strictly ordered phases so that every phase can be
//! checked on its own:
//!
//! 1. [`ExtractionEngine::extract`] runs until no archive is left (the fixed
//!    point),
//! 2. [`Organizer::organize`] relocates payload files,
//! 3. [`Cleaner::cleanup`] removes empty directories and metadata markers.
//!
//! # Examples
//!
//! ## Full run
//!
//! ```no_run
//! use unnest::{Config, Pipeline};
//! use std::path::Path;
//!
//! let pipeline = Pipeline::new(Config::default())?;
//! let report = pipeline.run(Path::new("lot42.zip"), Path::new("lot42"))?;
//! println!("expanded {} archives", report.extraction.extracted.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Single archive
//!
//! ```no_run
//! use unnest::{ArchiveFormat, Extractor};
//! use std::path::Path;
//!
//! Extractor::new().extract(
//!     ArchiveFormat::TarGz,
//!     Path::new("archive.tar.gz"),
//!     Path::new("output_dir"),
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod format;
pub mod organize;
pub mod pipeline;
pub mod progress;
pub mod retry;

pub use cleanup::{CleanupReport, Cleaner};
pub use config::{Config, MetadataConfig, PayloadKind, RetryConfig};
pub use engine::{ExtractionEngine, ExtractionFailure, ExtractionReport};
pub use error::{ArchiveError, Result};
pub use extractor::Extractor;
pub use format::{ArchiveFormat, ArchiveKind, Candidate, Classifier};
pub use organize::{OrganizeReport, Organizer};
pub use pipeline::{Pipeline, RunReport};

#[cfg(feature = "progress")]
pub use progress::IndicatifProgressReporter;
pub use progress::ProgressReporter;
