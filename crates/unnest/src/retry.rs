//! Bounded retry for deleting freshly extracted archives
//!
//! Some platforms keep a file locked for a short while after its last handle
//! was closed. Deletion is retried with exponential backoff, and gives up
//! after `max_attempts`.

use crate::config::RetryConfig;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Remove `path` with `remove`, retrying transient failures. A file that is
/// already gone counts as removed.
pub(crate) fn remove_with_retry(
    path: &Path,
    config: &RetryConfig,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> io::Result<()> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match remove(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt + 1 >= max_attempts => {
                warn!(?path, attempts = attempt + 1, error = %e, "giving up on deleting file");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt);
                debug!(
                    ?path,
                    attempt = attempt + 1,
                    max_attempts,
                    ?delay,
                    error = %e,
                    "delete failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
