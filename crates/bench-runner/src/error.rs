use std::path::PathBuf;
use thiserror::Error;

/// Setup defects found while resolving a job configuration. These abort the
/// batch before any job runs and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} does not exist: {}", path.display())]
    MissingPath { field: &'static str, path: PathBuf },

    #[error("cannot expand ~ in {field}: HOME is not set")]
    HomeUnset { field: &'static str },

    #[error("{field} is not a directory: {}", path.display())]
    NotADirectory { field: &'static str, path: PathBuf },

    #[error("{field} cannot contain a search path separator: {}", path.display())]
    SeparatorInPath { field: &'static str, path: PathBuf },
}
