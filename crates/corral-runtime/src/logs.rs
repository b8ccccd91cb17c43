//! Output of detached containers.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Reads the whole log file.
///
/// Foreground containers never write one, so a missing file reads as
/// empty output.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read(path: &Path) -> Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no log file");
            Ok(String::new())
        }
        Err(e) => Err(CorralError::io(path, e)),
    }
}
