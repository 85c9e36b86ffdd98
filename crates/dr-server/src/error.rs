use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// The five error kinds spec.md §7 names, plus the policy each one
/// implies: `Protocol`/`Integrity` are local (log, release the node,
/// close the socket); `Resource` is fatal at startup and session-fatal at
/// steady state; `Clock` is a warning only; `Submit` increments the
/// supervisor's failure counter.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] dr_wire::ProtocolError),

    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("resource error: {0}")]
    Resource(#[from] std::io::Error),

    #[error("clock error: {0}")]
    Clock(String),

    #[error("submit error: {0}")]
    Submit(String),

    #[error(transparent)]
    Replica(#[from] dr_replica::ReplicaError),

    #[error(transparent)]
    Storage(#[from] dr_storage::StorageError),
}

impl ServerError {
    /// §7's policy split: true for the two kinds that are "local" to one
    /// session (log, release the node, close the socket, keep serving).
    pub fn is_session_local(&self) -> bool {
        matches!(self, ServerError::Protocol(_) | ServerError::Integrity(_))
    }
}

/// A commit-time integrity check (spec.md §4.2) that failed.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("restart blob was empty")]
    EmptyRestartBlob,

    #[error("energy blob had {got} f32 values, expected {expected}")]
    EnergyLengthMismatch { expected: u32, got: u32 },

    #[error("sample blob had {got} bytes, expected {expected}")]
    SampleSizeMismatch { expected: u32, got: u32 },

    #[error("additional-data blob {index} had {got} bytes, expected {expected}")]
    AdditionalDataSizeMismatch { index: u32, expected: u32, got: u32 },

    #[error("coordinate blob had {got} bytes, expected {expected}")]
    CoordinateSizeMismatch { expected: u32, got: u32 },

    #[error("replica {0:?} was not Running at commit time")]
    NotRunning(dr_types::ReplicaNumber),

    #[error("sequence number mismatch: server expected {expected}, wire carried {got}")]
    SequenceMismatch { expected: u32, got: u32 },
}
