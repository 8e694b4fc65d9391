use bridge_traits::BridgeError;
use core_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A sync pass is already running for this root")]
    SyncInProgress,

    #[error("Remote error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid sync configuration: {0}")]
    Config(String),

    #[error("Remote root {path} is not usable: {reason}")]
    InvalidRemoteRoot { path: String, reason: String },

    /// Broken internal invariant: a dependency cycle, a malformed triplet.
    #[error("Logic error: {0}")]
    Logic(String),

    /// A downstream stage stopped accepting work.
    #[error("Sync pass aborted")]
    Aborted,

    #[error("Task failed: {0}")]
    Task(String),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Bridge(e) if e.is_not_found())
    }
}

impl From<core_async::task::JoinError> for SyncError {
    fn from(err: core_async::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
