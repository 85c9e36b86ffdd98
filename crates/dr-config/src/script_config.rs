use dr_types::{CoordinateKind, MoveAlgorithm};

/// One `JOB` row: the per-replica initialization values named by the
/// preceding `COLUMNS` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaInit {
    pub w: f64,
    pub w2: Option<f64>,
    pub umbrella_k: Option<f64>,
    pub sampling_runs: u32,
    pub sampling_steps: u32,
    pub cancellation_energy: f32,
    pub starting_nominal: Option<f64>,
    pub vre_seed_file: Option<String>,
}

impl Default for ReplicaInit {
    fn default() -> Self {
        ReplicaInit {
            w: 0.0,
            w2: None,
            umbrella_k: None,
            sampling_runs: 1,
            sampling_steps: 1,
            cancellation_energy: 0.0,
            starting_nominal: None,
            vre_seed_file: None,
        }
    }
}

/// `RUNNINGREPLICAS min max` — the suspension fence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningFence {
    pub min: u32,
    pub max: u32,
}

/// `POTENTIALSCALAR α β` and the post-threshold `CANCELLATION α' β' threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrpeScalars {
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CancellationConfig {
    pub after_threshold: DrpeScalars,
    pub threshold_samples: u32,
}

/// `CIRCULAR lo hi` — periodic coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircularConfig {
    pub lo: f64,
    pub hi: f64,
}

impl CircularConfig {
    /// The identification distance `hi - lo` (spec.md §3).
    pub fn equality_distance(&self) -> f64 {
        self.hi - self.lo
    }
}

/// `VRE_INITIAL_NOMOVES`, `VRE_INITIAL_NOSAVE`, `VRE_SECONDARY_LIST_LENGTH`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VreConfig {
    pub initial_no_moves: u32,
    pub initial_no_save: u32,
    pub secondary_list_length: Option<usize>,
}

/// Supervisor/mobility policy knobs (spec.md §3's last bullet group).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorPolicy {
    pub stop_on_average_time_exceeded: bool,
    pub allow_requeue: bool,
    pub allotted_time_for_server: Option<u64>,
    pub define_starting_positions: bool,
    pub cycle_clients: f64,
    pub mobility_time_left: Option<i64>,
    pub mobility_required_time_gain: Option<i64>,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        SupervisorPolicy {
            stop_on_average_time_exceeded: false,
            allow_requeue: false,
            allotted_time_for_server: None,
            define_starting_positions: false,
            cycle_clients: -1.0,
            mobility_time_left: None,
            mobility_required_time_gain: None,
        }
    }
}

/// A fully validated, immutable-after-load script configuration
/// (spec.md §3's `ScriptConfig`). Construct one with
/// [`crate::ScriptConfigLoader`], never directly — the loader is what
/// enforces the cross-field invariants (e.g. `TEMPERATURE` required
/// unless the coordinate type is itself `Temperature`).
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptConfig {
    pub title: String,
    pub coordinate: CoordinateKind,
    pub move_algorithm: MoveAlgorithm,
    pub port: u16,
    pub temperature: Option<f64>,
    pub replica_step_fraction: f64,
    pub potential_scalar: DrpeScalars,
    pub cancellation: Option<CancellationConfig>,
    pub node_time: u64,
    pub replica_change_time: u64,
    pub snapshot_save_interval: u64,
    pub job_timeout: u64,
    pub running_fence: RunningFence,
    pub need_sample_data: bool,
    pub need_coordinate_data: bool,
    pub submit_jobs: bool,
    pub circular: Option<CircularConfig>,
    pub n_additional_data: u32,
    pub n_samesystem_uncoupled: u32,
    pub n_samples_per_run: u32,
    pub n_ligands: u32,
    pub vre: VreConfig,
    pub supervisor: SupervisorPolicy,
    pub replicas: Vec<ReplicaInit>,
}

impl ScriptConfig {
    pub fn n_replicas(&self) -> u32 {
        self.replicas.len() as u32
    }

    /// `β = 1 / (k_B T)`, used by the Temperature/Umbrella move energy
    /// expressions. Panics if called on a config where `temperature` was
    /// never set (the loader guarantees this can't happen for
    /// non-Temperature coordinates).
    pub fn beta(&self) -> f64 {
        let t = self
            .temperature
            .expect("beta() requires TEMPERATURE to have been validated");
        1.0 / (dr_types::BOLTZMANN_CONSTANT * t)
    }

    /// Node table size: `ceil(N_replicas / N_samesystem_uncoupled)`.
    pub fn node_table_size(&self) -> usize {
        let n = self.n_replicas() as usize;
        let k = self.n_samesystem_uncoupled.max(1) as usize;
        n.div_ceil(k)
    }
}
