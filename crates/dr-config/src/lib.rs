//! Loading and validating the `SIMULATION` script file into a
//! [`ScriptConfig`]. The script's own line-oriented grammar is the one
//! external collaborator this workspace does not try to fully specify;
//! this crate reads the subset of it that a running server needs.

mod error;
mod loader;
mod script_config;

pub use error::{ConfigError, ConfigResult};
pub use loader::ScriptConfigLoader;
pub use script_config::{
    CancellationConfig, CircularConfig, DrpeScalars, ReplicaInit, RunningFence, ScriptConfig,
    SupervisorPolicy, VreConfig,
};
