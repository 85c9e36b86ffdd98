//! The in-memory replica and node state machines, the DRPE, the vRE
//! store, and the four move algorithms (spec.md §4.2–§4.5).
//!
//! Everything in this crate is pure in-memory state and arithmetic — no
//! sockets, no locks, no file I/O, no system clock reads. `dr-server`
//! wraps [`ReplicaTable`] and [`NodeTable`] in the ordered locks spec.md
//! §5 calls for and drives them from the session and supervisor loops.

mod drpe;
mod error;
mod moves;
mod node;
mod replica;
mod vre_store;

pub use drpe::{bin_of, drpe, drpe_of_configuration, linearize};
pub use error::{ReplicaError, ReplicaResult};
pub use moves::{
    accept_metropolis, continuous_boltzmann_cdf, discrete_boltzmann_distribution, mc_proposal,
    sample_discrete_boltzmann, solve_position_in_segment, spatial_delta_e, subdivide_segment,
    temperature_delta_e, umbrella_delta_e, within_running_fence, Candidate, DrpeDelta, Microdivision,
};
pub use node::{Node, NodeTable};
pub use replica::{PresenceBitmap, Replica, ReplicaTable};
pub use vre_store::{Popped, VreStore};
