//! # dr-server: coordination server for a Distributed Replica run
//!
//! Owns the TCP listener, the per-connection session handler, and the
//! one-second supervisor loop described in the project's server
//! specification (§4-5). Every session runs on its own blocking thread
//! (spec §5's thread-per-connection model); shared state lives behind the
//! five ordered locks on [`context::ServerContext`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        dr-server                          │
//! │  ┌───────────┐   ┌────────────┐   ┌──────────────────┐   │
//! │  │ Listener  │ → │ session(s) │ → │ ServerContext     │   │
//! │  │ (TCP)     │   │ (1/thread) │   │ (five locks)      │   │
//! │  └───────────┘   └────────────┘   └──────────────────┘   │
//! │                         supervisor (1 Hz tick) ───────────┘
//! ```

pub mod commit;
pub mod context;
pub mod error;
pub mod log;
pub mod mobile;
pub mod queue;
pub mod session;
pub mod supervisor;

pub use context::{ReplicaState, ServerContext, SimulationStatus};
pub use error::{IntegrityError, ServerError, ServerResult};
pub use session::{handle_connection, SessionState};
pub use supervisor::{tick, SupervisorTimers, TICK_INTERVAL};
