//! The shared handle every session and the supervisor hold (spec.md §9's
//! replacement for the original's threaded globals): one context object
//! with named sub-managers, each behind its own lock, acquired in the
//! fixed order spec.md §5 specifies: replica lock, database lock, queue
//! lock, vRE lock, log lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dr_config::ScriptConfig;
use dr_replica::{NodeTable, ReplicaTable, VreStore};
use dr_storage::ForceDatabase;

use crate::log::LogSink;
use crate::queue::QueueState;

/// Top-level run state, set by the supervisor and the `Exit` command
/// (spec.md §4.8, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationStatus {
    Running,
    DiskAlmostFull,
    Finished,
    AllottedTimeOver,
}

/// The replica table and node table, guarded by the single *replica
/// lock* spec.md §5 requires (it also covers "all suspension/running
/// counters" — there are none beyond what's on `ReplicaTable`/`NodeTable`
/// themselves).
pub struct ReplicaState {
    pub replicas: ReplicaTable,
    pub nodes: NodeTable,
}

pub struct ServerContext {
    pub config: ScriptConfig,
    pub replica_state: Mutex<ReplicaState>,
    pub database: Mutex<ForceDatabase>,
    pub queue: Mutex<QueueState>,
    pub vre: Mutex<Option<VreStore>>,
    pub log: Mutex<LogSink>,
    pub status: Mutex<SimulationStatus>,
    /// Unix time the server process started, used by the supervisor's
    /// mobility check (`uptime > 2*job_timeout`) and by snapshot filenames.
    pub start_time: u64,
    /// Flipped by the listener's accept loop once a second so it can
    /// observe `Finished`/`AllottedTimeOver` within one second, per
    /// spec.md §5's liveness requirement, without taking the status lock
    /// on every accept.
    pub should_stop: AtomicBool,
}

impl ServerContext {
    pub fn new(
        config: ScriptConfig,
        replicas: ReplicaTable,
        nodes: NodeTable,
        database: ForceDatabase,
        vre: Option<VreStore>,
        log: LogSink,
        start_time: u64,
    ) -> Self {
        ServerContext {
            config,
            replica_state: Mutex::new(ReplicaState { replicas, nodes }),
            database: Mutex::new(database),
            queue: Mutex::new(QueueState::default()),
            vre: Mutex::new(vre),
            log: Mutex::new(log),
            status: Mutex::new(SimulationStatus::Running),
            start_time,
            should_stop: AtomicBool::new(false),
        }
    }

    pub fn now(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
    }

    pub fn uptime(&self) -> u64 {
        self.now().saturating_sub(self.start_time)
    }

    pub fn set_status(&self, status: SimulationStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
        if matches!(status, SimulationStatus::Finished | SimulationStatus::AllottedTimeOver) {
            self.should_stop.store(true, Ordering::SeqCst);
        }
    }

    pub fn status(&self) -> SimulationStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    /// Logs through both the text sink and `tracing`, taking the log lock
    /// last, as spec.md §5's ordering requires.
    pub fn log(&self, message: &str) {
        tracing::info!("{message}");
        if let Err(err) = self.log.lock().expect("log lock poisoned").append(message) {
            tracing::warn!(%err, "failed to append to text log");
        }
    }
}
