use crate::error::{ProbeError, Result};
use std::path::PathBuf;
use tracing::debug;

/// Resolves `name` against the search path.
///
/// Names containing a path separator are checked as given.
pub fn resolve_executable(name: &str) -> Result<PathBuf> {
    match which::which(name) {
        Ok(path) => {
            debug!("resolved {} to {}", name, path.display());
            Ok(path)
        }
        Err(source) => Err(ProbeError::ExecutableNotFound {
            name: name.to_string(),
            source,
        }),
    }
}

pub fn is_available(name: &str) -> bool {
    resolve_executable(name).is_ok()
}
