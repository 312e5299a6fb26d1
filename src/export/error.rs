use std::path::PathBuf;

use thiserror::Error;

use crate::front::FrontError;

/// Errors that abort one export invocation.
///
/// Failures on individual messages, comments or attachments are not
/// represented here; they are logged and counted instead.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create export directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cached manifest {path} is not a valid conversation list: {source}")]
    ManifestFormat {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Inbox with ID {0} not found")]
    TargetNotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] FrontError),
}

impl ExportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
