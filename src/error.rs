// Error taxonomy for the upload workflow. Each variant maps to the stage
// that produced it; network variants keep the remote body so API-side
// problems can be diagnosed from the CLI output alone.

use std::path::PathBuf;
use thiserror::Error;

use crate::workflow::Stage;

/// Result type alias for upload workflow operations
pub type Result<T> = std::result::Result<T, UploadError>;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Missing or invalid local configuration, detected before any network I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The credential-issuance call was rejected or could not be completed.
    #[error("There was an issue grabbing credentials ({}): {body}", status_label(.status))]
    Authentication { status: Option<u16>, body: String },

    /// The local file could not be opened, read or sized.
    #[error("Could not read {}: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The object store transfer failed.
    #[error("Upload to storage failed: {0}")]
    UploadTransport(String),

    /// The tileset-creation call was rejected or could not be completed.
    #[error("Something went wrong converting to tileset ({}): {body}", status_label(.status))]
    Conversion { status: Option<u16>, body: String },
}

impl UploadError {
    /// The workflow stage this error aborts.
    pub fn stage(&self) -> Stage {
        match self {
            UploadError::Configuration(_) => Stage::Validating,
            UploadError::Authentication { .. } => Stage::BrokeringCredentials,
            UploadError::FileAccess { .. } | UploadError::UploadTransport(_) => Stage::Uploading,
            UploadError::Conversion { .. } => Stage::Converting,
        }
    }

    /// Remote response body, for errors that originate from the API.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            UploadError::Authentication { body, .. } | UploadError::Conversion { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }

    pub(crate) fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::FileAccess {
            path: path.into(),
            source,
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {}", code),
        None => "no response".to_string(),
    }
}
