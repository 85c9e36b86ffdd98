use serde::{Deserialize, Serialize};

/// Index of a replica in the replica table. Also the wire `replica_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaNumber(pub u32);

impl ReplicaNumber {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ReplicaNumber {
    fn from(v: u32) -> Self {
        ReplicaNumber(v)
    }
}

/// Monotone per-replica round counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u32);

impl SequenceNumber {
    pub fn next(self) -> Self {
        SequenceNumber(self.0 + 1)
    }
}

/// Index into the node table. A node slot is never an owning handle: the
/// replica that currently binds it is looked up through `ReplicaTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeSlot(pub usize);
