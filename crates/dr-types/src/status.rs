use serde::{Deserialize, Serialize};

/// A replica's place in its lifecycle.
///
/// `status == Running` if and only if the replica is bound to a node slot;
/// that invariant is enforced by `dr_replica::ReplicaTable`, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaStatus {
    /// `N` on the wire and in the original log output: not currently assigned.
    Idle,
    /// `R`: bound to a node, a round is in flight.
    Running,
    /// `S`: outside the `RUNNINGREPLICAS` fence, never dispatched.
    Suspended,
}

impl ReplicaStatus {
    /// Single-character code matching the original server's log/snapshot convention.
    pub fn code(self) -> char {
        match self {
            ReplicaStatus::Idle => 'N',
            ReplicaStatus::Running => 'R',
            ReplicaStatus::Suspended => 'S',
        }
    }

    /// Parses the single-character status code used by the snapshot format.
    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'N' => Some(ReplicaStatus::Idle),
            'R' => Some(ReplicaStatus::Running),
            'S' => Some(ReplicaStatus::Suspended),
            _ => None,
        }
    }
}
