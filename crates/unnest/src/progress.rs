//! Progress reporting for archive operations

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{Read, Seek};
use std::path::Path;

/// A trait for reporting progress while archives are decompressed
pub trait ProgressReporter {
    /// Called when extraction of `archive` starts
    fn on_start(&self, archive: &Path, total_bytes: Option<u64>);

    /// Called when extraction progresses
    fn on_progress(&self, bytes_processed: u64);

    /// Called when extraction of the current archive finishes
    fn on_finish(&self, message: &str);
}

impl<P: ProgressReporter + ?Sized> ProgressReporter for &P {
    fn on_start(&self, archive: &Path, total_bytes: Option<u64>) {
        (**self).on_start(archive, total_bytes)
    }

    fn on_progress(&self, bytes_processed: u64) {
        (**self).on_progress(bytes_processed)
    }

    fn on_finish(&self, message: &str) {
        (**self).on_finish(message)
    }
}

/// A no-op progress reporter
#[derive(Default)]
pub struct NoProgressReporter;

impl ProgressReporter for NoProgressReporter {
    fn on_start(&self, _archive: &Path, _total_bytes: Option<u64>) {}
    fn on_progress(&self, _bytes_processed: u64) {}
    fn on_finish(&self, _message: &str) {}
}

/// Progress reporter using indicatif
#[cfg(feature = "progress")]
pub struct IndicatifProgressReporter {
    progress_bar: ProgressBar,
}

#[cfg(feature = "progress")]
impl IndicatifProgressReporter {
    /// Create a new indicatif progress reporter
    pub fn new(progress_bar: ProgressBar) -> Self {
        Self { progress_bar }
    }

    /// Create a new indicatif progress reporter with default styling
    pub fn with_default_style() -> Self {
        let progress_bar = ProgressBar::new(0);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:40!} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-")
        );
        Self { progress_bar }
    }

    /// The underlying progress bar
    pub fn progress_bar(&self) -> &ProgressBar {
        &self.progress_bar
    }
}

#[cfg(feature = "progress")]
impl ProgressReporter for IndicatifProgressReporter {
    fn on_start(&self, archive: &Path, total_bytes: Option<u64>) {
        self.progress_bar.reset();
        self.progress_bar.set_length(total_bytes.unwrap_or(0));
        if let Some(name) = archive.file_name() {
            self.progress_bar
                .set_message(name.to_string_lossy().into_owned());
        }
    }

    fn on_progress(&self, bytes_processed: u64) {
        self.progress_bar.set_position(bytes_processed);
    }

    fn on_finish(&self, message: &str) {
        self.progress_bar.set_message(message.to_string());
    }
}

/// A wrapper around a reader that reports progress
pub struct ProgressReader<R: Read, P: ProgressReporter> {
    inner: R,
    reporter: P,
    bytes_read: u64,
}

impl<R: Read, P: ProgressReporter> ProgressReader<R, P> {
    /// Create a new progress reader
    pub fn new(inner: R, reporter: P) -> Self {
        Self {
            inner,
            reporter,
            bytes_read: 0,
        }
    }
}

impl<R: Read, P: ProgressReporter> Read for ProgressReader<R, P> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.inner.read(buf)?;
        self.bytes_read += bytes_read as u64;
        self.reporter.on_progress(self.bytes_read);
        Ok(bytes_read)
    }
}

impl<R: Read + Seek, P: ProgressReporter> Seek for ProgressReader<R, P> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let position = self.inner.seek(pos)?;
        self.bytes_read = position;
        self.reporter.on_progress(position);
        Ok(position)
    }
}
