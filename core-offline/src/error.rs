use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OfflineError {
    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    #[error("Insufficient storage: {required} bytes required, {available} available")]
    StorageInsufficient { required: u64, available: u64 },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    // ------------------------------------------------------------------
    // Transfer
    // ------------------------------------------------------------------
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Server responded with HTTP {status}")]
    NonSuccessStatus { status: u16 },

    #[error("Unexpected content type: {content_type}")]
    ContentTypeMismatch { content_type: String },

    #[error("Size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    // ------------------------------------------------------------------
    // Local bookkeeping
    // ------------------------------------------------------------------
    #[error("Metadata store error: {0}")]
    MetadataStore(#[from] LibraryError),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unhandled fault: {0}")]
    UnhandledFault(String),
}

impl OfflineError {
    /// Typed transfer outcome, as opposed to an unexpected fault
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            OfflineError::NetworkFailure(_)
                | OfflineError::NonSuccessStatus { .. }
                | OfflineError::ContentTypeMismatch { .. }
                | OfflineError::SizeMismatch { .. }
                | OfflineError::Storage(_)
                | OfflineError::MissingCredentials(_)
        )
    }

    pub(crate) fn not_found(entity_type: &str, id: impl Into<String>) -> Self {
        OfflineError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;
