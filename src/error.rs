//! Error taxonomy for the sync core.
//! Every failure is a discriminated variant so callers can branch on it
//! (NotFound triggers the create flow, Conflict requires a manual reload).
//! Nothing in the core retries automatically.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The backend rejected the credential. Fatal to the current operation.
    #[error("authentication rejected by the remote (check your token)")]
    Auth,

    /// The file does not exist on the remote. Recoverable via create.
    #[error("file not found on the remote: {path}")]
    NotFound { path: String },

    /// The remote content changed since it was last read. Recoverable by
    /// reloading and reapplying the edit.
    #[error("remote content changed since last load: {path}")]
    Conflict { path: String },

    /// A local invariant failed before any network activity.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The transport payload could not be decoded (bad base64, non-UTF-8
    /// bytes, or unparseable JSON).
    #[error("undecodable payload: {reason}")]
    Decode { reason: String },

    /// Any other non-success response. Status and body surfaced verbatim.
    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: String },

    /// Connection-level failure below the protocol.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// No registered app carries this name.
    #[error("no app named '{name}'")]
    UnknownApp { name: String },

    /// An operation was invoked in a document state that cannot accept it.
    #[error("invalid document state: {0}")]
    State(String),
}

impl SyncError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<base64::DecodeError> for SyncError {
    fn from(err: base64::DecodeError) -> Self {
        SyncError::Decode {
            reason: err.to_string(),
        }
    }
}

impl From<std::string::FromUtf8Error> for SyncError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        SyncError::Decode {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode {
            reason: err.to_string(),
        }
    }
}
