use thiserror::Error;

use dr_types::ReplicaNumber;

pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Errors raised while applying a commit, a move decision, or a
/// node-lifecycle transition to the in-memory replica/node tables.
/// These are internal invariant violations, not client-facing protocol
/// errors (`dr-wire::ProtocolError` covers those); a caller that sees one
/// of these has found either a corrupt snapshot or a bug in the server.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("replica {0:?} is not present in the replica table")]
    UnknownReplica(ReplicaNumber),

    #[error("replica {replica:?} committed sequence {got}, but {expected} was next")]
    SequenceOutOfOrder {
        replica: ReplicaNumber,
        expected: u32,
        got: u32,
    },

    #[error("replica {replica:?} committed an energy blob of length {got}, expected {expected}")]
    EnergyLengthMismatch {
        replica: ReplicaNumber,
        expected: u32,
        got: u32,
    },

    #[error("node slot {0:?} is already bound to a different replica")]
    NodeSlotOccupied(dr_types::NodeSlot),

    #[error("node slot {0:?} has no bound replica")]
    NodeSlotEmpty(dr_types::NodeSlot),

    #[error("replica status {status:?} is inconsistent with node_slot {node_slot:?}")]
    StatusNodeMismatch {
        status: dr_types::ReplicaStatus,
        node_slot: Option<dr_types::NodeSlot>,
    },

    #[error("no free or reclaimable node slot is available")]
    NoNodeAvailable,

    #[error("the replica table is empty; no move can be proposed")]
    EmptyReplicaTable,

    #[error("replica {0:?} nominal value {1} lies outside the configured coordinate range")]
    NominalOutOfRange(ReplicaNumber, f64),

    #[error("system clock went backwards: {0}")]
    Clock(#[from] std::time::SystemTimeError),
}
