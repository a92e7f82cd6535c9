use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArchiverError>;

/// Error kinds for every failure the pipeline can produce.
///
/// The stage engine consults [`ArchiverError::is_retryable`] to decide
/// whether a failed run goes back through the retry loop or is recorded
/// immediately.
#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("another instance holds the lock '{path}' (pid {holder})")]
    LockHeld { path: String, holder: String },

    #[error("configuration store error: {0}")]
    ConfigStore(String),

    #[error("archive store error: {0}")]
    ArchiveStore(String),

    #[error("FHiCL preparation error: {0}")]
    FclPreparation(String),

    #[error("blob error: {0}")]
    BlobCreation(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("report delivery failed: {0}")]
    Reporting(String),

    #[error("run {run} permanently skipped: {reason}")]
    PermanentSkip { run: u32, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiverError {
    /// Whether the stage engine's retry loop should try this run again.
    ///
    /// Fatal kinds (configuration, lock contention) abort the dispatcher
    /// before any stage runs; they are never seen by the retry loop but are
    /// classified here for completeness.
    pub fn is_retryable(&self) -> bool {
        match self {
            ArchiverError::Config(_) => false,
            ArchiverError::LockHeld { .. } => false,
            ArchiverError::Reporting(_) => false,
            ArchiverError::PermanentSkip { .. } => false,
            ArchiverError::ConfigStore(_)
            | ArchiverError::ArchiveStore(_)
            | ArchiverError::FclPreparation(_)
            | ArchiverError::BlobCreation(_)
            | ArchiverError::Verification(_)
            | ArchiverError::Io(_) => true,
        }
    }
}
