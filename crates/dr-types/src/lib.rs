//! Core type definitions shared across the Distributed Replica workspace.
//!
//! This crate has no I/O and no dependency on any other `dr-*` crate. It
//! exists so that `dr-wire`, `dr-config`, `dr-replica`, `dr-storage`,
//! `dr-server` and `dr-client` can agree on the vocabulary of the replica
//! state machine without pulling each other in.

mod constants;
mod coordinate;
mod ids;
mod status;

pub use constants::*;
pub use coordinate::{expected_energy_len, CoordinateKind, MoveAlgorithm};
pub use ids::{NodeSlot, ReplicaNumber, SequenceNumber};
pub use status::ReplicaStatus;
