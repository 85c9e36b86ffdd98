use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures opening, reading, or writing the force database or a
/// snapshot file. Distinct from `dr-wire::ProtocolError` — these are
/// local-disk failures, not wire-level ones (spec.md §7's
/// `ResourceError`).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("force database header mismatch: expected {expected:?}, file has {got:?}")]
    HeaderMismatch {
        expected: Box<crate::force_database::Header>,
        got: Box<crate::force_database::Header>,
    },

    #[error("record {index} is out of range (database has {n_records} records)")]
    RecordOutOfRange { index: u32, n_records: u32 },

    #[error("snapshot version {got} is not supported (current {current}, legacy {legacy})")]
    UnsupportedSnapshotVersion { got: f32, current: f32, legacy: f32 },

    #[error("legacy (1.0) snapshots may only be loaded for non-vRE runs")]
    LegacySnapshotRequiresNonVre,

    #[error("snapshot replica count {got} does not match the configured {expected}")]
    ReplicaCountMismatch { expected: u32, got: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
