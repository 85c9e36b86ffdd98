//! # dr-client: peers that speak the Distributed Replica wire protocol
//! from the client side.
//!
//! Three programs live in this crate's `src/bin/`: `dr_commander` (a
//! one-shot privileged `Exit`/`Snapshot` sender), `dr_client_comm` (one
//! round of a real simulation worker's conversation with the server),
//! and `dr_tester` (a script-driven fake worker that loops rounds
//! against a live server, with optional synthetic noise — used to
//! exercise a server end to end without a real physics engine). All
//! three share the [`ClientSession`] connection wrapper.

pub mod connection;
pub mod error;
pub mod restart;

pub use connection::ClientSession;
pub use error::{ClientError, ClientResult};
