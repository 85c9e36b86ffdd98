use std::fs;
use std::path::Path;

use dr_types::{CoordinateKind, MoveAlgorithm};

use crate::error::{ConfigError, ConfigResult};
use crate::script_config::{
    CancellationConfig, CircularConfig, DrpeScalars, ReplicaInit, RunningFence, ScriptConfig,
    SupervisorPolicy, VreConfig,
};

/// Column names recognized in a `COLUMNS` row, in the order the original
/// script format expects `JOB` rows to supply them. Any subset may be
/// named; unnamed fields keep [`ReplicaInit`]'s defaults.
const KNOWN_COLUMNS: &[&str] = &[
    "W",
    "W2",
    "UMBRELLA_K",
    "NSAMPLES",
    "NSTEPS",
    "ECANCEL",
    "STARTING_NOMINAL",
    "VRE_SEED_FILE",
];

#[derive(Default)]
struct Builder {
    title: Option<String>,
    coordinate: Option<CoordinateKind>,
    move_algorithm: Option<MoveAlgorithm>,
    port: Option<u16>,
    temperature: Option<f64>,
    replica_step_fraction: Option<f64>,
    potential_scalar: Option<DrpeScalars>,
    cancellation_scalar: Option<DrpeScalars>,
    cancellation_threshold: Option<u32>,
    node_time: Option<u64>,
    replica_change_time: Option<u64>,
    snapshot_save_interval: Option<u64>,
    job_timeout: Option<u64>,
    running_fence: Option<RunningFence>,
    need_sample_data: bool,
    need_coordinate_data: bool,
    submit_jobs: bool,
    circular: Option<CircularConfig>,
    n_additional_data: u32,
    n_samesystem_uncoupled: u32,
    vre: VreConfig,
    supervisor: SupervisorPolicy,
    columns: Option<Vec<String>>,
    replicas: Vec<ReplicaInit>,
}

/// Loads a `SIMULATION` script file into a validated [`ScriptConfig`].
///
/// This mirrors a layered-builder shape (`new` → options → `load`), but
/// unlike a config-directory loader there is exactly one source: the
/// script file itself. The "layers" here are the file's own lines, read
/// top to bottom, later `COLUMNS` rows re-defining the schema for the
/// `JOB` rows that follow them.
pub struct ScriptConfigLoader {
    builder: Builder,
}

impl ScriptConfigLoader {
    pub fn new() -> Self {
        ScriptConfigLoader {
            builder: Builder::default(),
        }
    }

    pub fn load_path(path: impl AsRef<Path>) -> ConfigResult<ScriptConfig> {
        let text = fs::read_to_string(path)?;
        Self::new().load_str(&text)
    }

    pub fn load_str(mut self, text: &str) -> ConfigResult<ScriptConfig> {
        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let keyword = tokens.next().expect("non-empty line has a first token");
            let args: Vec<&str> = tokens.collect();
            self.apply_line(line_no, keyword, &args)?;
        }
        self.finish()
    }

    fn apply_line(&mut self, line: usize, keyword: &str, args: &[&str]) -> ConfigResult<()> {
        let b = &mut self.builder;
        match keyword.to_ascii_uppercase().as_str() {
            "SIMULATION" => {
                require_arity(line, keyword, args, 2)?;
                b.coordinate = Some(parse_coordinate(line, args[0])?);
                b.move_algorithm = Some(parse_move_algorithm(line, args[1])?);
            }
            "TITLE" => {
                require_arity(line, keyword, args, 1)?;
                b.title = Some(args[0].to_string());
            }
            "PORT" => {
                require_arity(line, keyword, args, 1)?;
                b.port = Some(parse_value(line, keyword, args[0])?);
            }
            "TEMPERATURE" => {
                require_arity(line, keyword, args, 1)?;
                b.temperature = Some(parse_value(line, keyword, args[0])?);
            }
            "REPLICASTEP" => {
                require_arity(line, keyword, args, 1)?;
                b.replica_step_fraction = Some(parse_value(line, keyword, args[0])?);
            }
            "POTENTIALSCALAR" => {
                require_arity(line, keyword, args, 2)?;
                b.potential_scalar = Some(DrpeScalars {
                    alpha: parse_value(line, keyword, args[0])?,
                    beta: parse_value(line, keyword, args[1])?,
                });
            }
            "CANCELLATION" => {
                require_arity(line, keyword, args, 3)?;
                b.cancellation_scalar = Some(DrpeScalars {
                    alpha: parse_value(line, keyword, args[0])?,
                    beta: parse_value(line, keyword, args[1])?,
                });
                b.cancellation_threshold = Some(parse_value(line, keyword, args[2])?);
            }
            "NODETIME" => {
                require_arity(line, keyword, args, 1)?;
                b.node_time = Some(parse_value(line, keyword, args[0])?);
            }
            "REPLICACHANGETIME" => {
                require_arity(line, keyword, args, 1)?;
                b.replica_change_time = Some(parse_value(line, keyword, args[0])?);
            }
            "SNAPSHOTTIME" => {
                require_arity(line, keyword, args, 1)?;
                b.snapshot_save_interval = Some(parse_value(line, keyword, args[0])?);
            }
            "TIMEOUT" => {
                require_arity(line, keyword, args, 1)?;
                b.job_timeout = Some(parse_value(line, keyword, args[0])?);
            }
            "RUNNINGREPLICAS" => {
                require_arity(line, keyword, args, 2)?;
                b.running_fence = Some(RunningFence {
                    min: parse_value(line, keyword, args[0])?,
                    max: parse_value(line, keyword, args[1])?,
                });
            }
            "NEEDSAMPLEDATA" => {
                require_arity(line, keyword, args, 1)?;
                b.need_sample_data = parse_bool(line, keyword, args[0])?;
            }
            "NEEDCOORDINATEDATA" => {
                require_arity(line, keyword, args, 1)?;
                b.need_coordinate_data = parse_bool(line, keyword, args[0])?;
            }
            "SUBMITJOBS" => {
                require_arity(line, keyword, args, 1)?;
                b.submit_jobs = parse_bool(line, keyword, args[0])?;
            }
            "CIRCULAR" => {
                require_arity(line, keyword, args, 2)?;
                let lo = parse_value(line, keyword, args[0])?;
                let hi: f64 = parse_value(line, keyword, args[1])?;
                if hi <= lo {
                    return Err(ConfigError::InvalidCircularRange { lo, hi });
                }
                b.circular = Some(CircularConfig { lo, hi });
            }
            "ADDITIONALDATA" => {
                require_arity(line, keyword, args, 1)?;
                b.n_additional_data = parse_value(line, keyword, args[0])?;
            }
            "N_SAMESYSTEM_UNCOUPLED" => {
                require_arity(line, keyword, args, 1)?;
                b.n_samesystem_uncoupled = parse_value(line, keyword, args[0])?;
            }
            "STOP_ON_AVERAGE_TIME_EXCEEDED" => {
                require_arity(line, keyword, args, 1)?;
                b.supervisor.stop_on_average_time_exceeded = parse_bool(line, keyword, args[0])?;
            }
            "ALLOW_REQUEUE" => {
                require_arity(line, keyword, args, 1)?;
                b.supervisor.allow_requeue = parse_bool(line, keyword, args[0])?;
            }
            "ALLOTTED_TIME_FOR_SERVER" => {
                require_arity(line, keyword, args, 1)?;
                b.supervisor.allotted_time_for_server = Some(parse_value(line, keyword, args[0])?);
            }
            "DEFINE_STARTING_POSITIONS" => {
                require_arity(line, keyword, args, 1)?;
                b.supervisor.define_starting_positions = parse_bool(line, keyword, args[0])?;
            }
            "CYCLE_CLIENTS" => {
                require_arity(line, keyword, args, 1)?;
                b.supervisor.cycle_clients = parse_value(line, keyword, args[0])?;
            }
            "SERVER_TIMELEFT_ENTER_MOBILE_STATE" => {
                require_arity(line, keyword, args, 1)?;
                b.supervisor.mobility_time_left = Some(parse_value(line, keyword, args[0])?);
            }
            "SERVER_TIMEGAIN_ENTER_MOBILE_STATE" => {
                require_arity(line, keyword, args, 1)?;
                b.supervisor.mobility_required_time_gain = Some(parse_value(line, keyword, args[0])?);
            }
            "VRE_INITIAL_NOMOVES" => {
                require_arity(line, keyword, args, 1)?;
                b.vre.initial_no_moves = parse_value(line, keyword, args[0])?;
            }
            "VRE_INITIAL_NOSAVE" => {
                require_arity(line, keyword, args, 1)?;
                b.vre.initial_no_save = parse_value(line, keyword, args[0])?;
            }
            "VRE_SECONDARY_LIST_LENGTH" => {
                require_arity(line, keyword, args, 1)?;
                b.vre.secondary_list_length = Some(parse_value(line, keyword, args[0])?);
            }
            "COLUMNS" => {
                let names: Vec<String> = args.iter().map(|s| s.to_ascii_uppercase()).collect();
                for name in &names {
                    if !KNOWN_COLUMNS.contains(&name.as_str()) {
                        return Err(ConfigError::UnknownOption {
                            line,
                            option: format!("COLUMNS entry {name:?}"),
                        });
                    }
                }
                b.columns = Some(names);
            }
            "JOB" => {
                let columns = b.columns.as_ref().ok_or(ConfigError::JobBeforeColumns { line })?;
                require_arity(line, keyword, args, columns.len())?;
                b.replicas.push(parse_job_row(line, columns, args)?);
            }
            other => {
                return Err(ConfigError::UnknownOption {
                    line,
                    option: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn finish(self) -> ConfigResult<ScriptConfig> {
        let b = self.builder;

        let coordinate = b.coordinate.ok_or(ConfigError::MissingRequired("SIMULATION"))?;
        let move_algorithm = b.move_algorithm.ok_or(ConfigError::MissingRequired("SIMULATION"))?;
        if !coordinate.accepts(move_algorithm) {
            return Err(ConfigError::IncompatibleSimulation {
                coordinate,
                mv: move_algorithm,
            });
        }

        let n_samesystem_uncoupled = b.n_samesystem_uncoupled.max(1);
        if matches!(coordinate, CoordinateKind::Temperature | CoordinateKind::Umbrella)
            && n_samesystem_uncoupled > 1
        {
            return Err(ConfigError::MultiLigandNotSupported(n_samesystem_uncoupled));
        }

        if b.temperature.is_none() && !matches!(coordinate, CoordinateKind::Temperature) {
            return Err(ConfigError::MissingRequired("TEMPERATURE"));
        }

        let cancellation = match (b.cancellation_scalar, b.cancellation_threshold) {
            (Some(scalar), Some(threshold)) => Some(CancellationConfig {
                after_threshold: scalar,
                threshold_samples: threshold,
            }),
            _ => None,
        };

        let n_samples_per_run = b.replicas.first().map(|r| r.sampling_steps).unwrap_or(0);
        for (index, replica) in b.replicas.iter().enumerate().skip(1) {
            if replica.sampling_steps != n_samples_per_run {
                return Err(ConfigError::MismatchedSamplingSteps {
                    first: n_samples_per_run,
                    index,
                    got: replica.sampling_steps,
                });
            }
        }

        Ok(ScriptConfig {
            title: b.title.unwrap_or_else(|| "untitled".to_string()),
            coordinate,
            move_algorithm,
            port: b.port.ok_or(ConfigError::MissingRequired("PORT"))?,
            temperature: b.temperature,
            replica_step_fraction: b.replica_step_fraction.unwrap_or(0.1),
            potential_scalar: b.potential_scalar.ok_or(ConfigError::MissingRequired("POTENTIALSCALAR"))?,
            cancellation,
            node_time: b.node_time.ok_or(ConfigError::MissingRequired("NODETIME"))?,
            replica_change_time: b
                .replica_change_time
                .ok_or(ConfigError::MissingRequired("REPLICACHANGETIME"))?,
            snapshot_save_interval: b
                .snapshot_save_interval
                .ok_or(ConfigError::MissingRequired("SNAPSHOTTIME"))?,
            job_timeout: b.job_timeout.ok_or(ConfigError::MissingRequired("TIMEOUT"))?,
            running_fence: b.running_fence.unwrap_or(RunningFence {
                min: 0,
                max: b.replicas.len() as u32,
            }),
            need_sample_data: b.need_sample_data,
            need_coordinate_data: b.need_coordinate_data,
            submit_jobs: b.submit_jobs,
            circular: b.circular,
            n_additional_data: b.n_additional_data,
            n_samesystem_uncoupled,
            n_samples_per_run,
            n_ligands: n_samesystem_uncoupled,
            vre: b.vre,
            supervisor: b.supervisor,
            replicas: b.replicas,
        })
    }
}

impl Default for ScriptConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn require_arity(line: usize, keyword: &str, args: &[&str], expected: usize) -> ConfigResult<()> {
    if args.len() != expected {
        return Err(ConfigError::WrongArity {
            line,
            option: keyword.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(line: usize, _keyword: &str, raw: &str) -> ConfigResult<T> {
    raw.parse().map_err(|_| ConfigError::BadValue {
        line,
        value: raw.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

fn parse_bool(line: usize, _keyword: &str, raw: &str) -> ConfigResult<bool> {
    match raw.to_ascii_uppercase().as_str() {
        "T" | "TRUE" | "1" | "YES" => Ok(true),
        "F" | "FALSE" | "0" | "NO" => Ok(false),
        _ => Err(ConfigError::BadValue {
            line,
            value: raw.to_string(),
            expected: "bool",
        }),
    }
}

fn parse_coordinate(line: usize, raw: &str) -> ConfigResult<CoordinateKind> {
    match raw.to_ascii_uppercase().as_str() {
        "SPATIAL" => Ok(CoordinateKind::Spatial),
        "TEMPERATURE" => Ok(CoordinateKind::Temperature),
        "UMBRELLA" => Ok(CoordinateKind::Umbrella),
        _ => Err(ConfigError::BadValue {
            line,
            value: raw.to_string(),
            expected: "Spatial|Temperature|Umbrella",
        }),
    }
}

fn parse_move_algorithm(line: usize, raw: &str) -> ConfigResult<MoveAlgorithm> {
    match raw.to_ascii_uppercase().as_str() {
        "MONTECARLO" | "MC" => Ok(MoveAlgorithm::MonteCarlo),
        "BOLTZMANNJUMPING" | "BOLTZMANN" => Ok(MoveAlgorithm::Boltzmann),
        "CONTINUOUS" => Ok(MoveAlgorithm::Continuous),
        "NOMOVES" => Ok(MoveAlgorithm::NoMoves),
        "VRE" => Ok(MoveAlgorithm::VirtualReplicaExchange),
        _ => Err(ConfigError::BadValue {
            line,
            value: raw.to_string(),
            expected: "MonteCarlo|BoltzmannJumping|Continuous|NoMoves|vRE",
        }),
    }
}

fn parse_job_row(line: usize, columns: &[String], args: &[&str]) -> ConfigResult<ReplicaInit> {
    let mut init = ReplicaInit::default();
    for (name, value) in columns.iter().zip(args.iter()) {
        match name.as_str() {
            "W" => init.w = parse_value(line, "JOB", value)?,
            "W2" => init.w2 = Some(parse_value(line, "JOB", value)?),
            "UMBRELLA_K" => init.umbrella_k = Some(parse_value(line, "JOB", value)?),
            "NSAMPLES" => init.sampling_runs = parse_value(line, "JOB", value)?,
            "NSTEPS" => init.sampling_steps = parse_value(line, "JOB", value)?,
            "ECANCEL" => init.cancellation_energy = parse_value(line, "JOB", value)?,
            "STARTING_NOMINAL" => init.starting_nominal = Some(parse_value(line, "JOB", value)?),
            "VRE_SEED_FILE" => init.vre_seed_file = Some((*value).to_string()),
            other => {
                return Err(ConfigError::UnknownOption {
                    line,
                    option: format!("COLUMNS entry {other:?}"),
                })
            }
        }
    }
    Ok(init)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_script() -> String {
        [
            "SIMULATION Spatial MonteCarlo",
            "PORT 9001",
            "TEMPERATURE 300.0",
            "REPLICASTEP 0.1",
            "POTENTIALSCALAR 1.0 0.0",
            "NODETIME 600",
            "REPLICACHANGETIME 120",
            "SNAPSHOTTIME 3600",
            "TIMEOUT 1800",
            "COLUMNS W NSAMPLES NSTEPS",
            "JOB 0.0 10 100",
            "JOB 0.5 10 100",
        ]
        .join("\n")
    }

    #[test]
    fn minimal_script_loads() {
        let cfg = ScriptConfigLoader::new().load_str(&minimal_script()).unwrap();
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.n_replicas(), 2);
        assert_eq!(cfg.replicas[1].w, 0.5);
        assert_eq!(cfg.replicas[0].sampling_runs, 10);
    }

    #[test]
    fn job_before_columns_is_rejected() {
        let text = "SIMULATION Spatial MonteCarlo\nJOB 1.0\n";
        let err = ScriptConfigLoader::new().load_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::JobBeforeColumns { .. }));
    }

    #[test]
    fn missing_temperature_is_rejected_for_spatial() {
        let text = minimal_script().replace("TEMPERATURE 300.0\n", "");
        let err = ScriptConfigLoader::new().load_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("TEMPERATURE")));
    }

    #[test]
    fn incompatible_simulation_rejected() {
        let text = minimal_script().replace("SIMULATION Spatial MonteCarlo", "SIMULATION Spatial vRE");
        let err = ScriptConfigLoader::new().load_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleSimulation { .. }));
    }

    #[test]
    fn invalid_circular_range_rejected() {
        let text = format!("{}\nCIRCULAR 10.0 1.0\n", minimal_script());
        let err = ScriptConfigLoader::new().load_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCircularRange { .. }));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = format!("# a leading comment\n\n{}\n  # trailing\n", minimal_script());
        let cfg = ScriptConfigLoader::new().load_str(&text).unwrap();
        assert_eq!(cfg.n_replicas(), 2);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let text = format!("{}\nFROBNICATE 1\n", minimal_script());
        let err = ScriptConfigLoader::new().load_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption { .. }));
    }

    #[test]
    fn n_samples_per_run_is_derived_from_the_first_replicas_nsteps() {
        let cfg = ScriptConfigLoader::new().load_str(&minimal_script()).unwrap();
        assert_eq!(cfg.n_samples_per_run, 100);
    }

    #[test]
    fn mismatched_nsteps_across_jobs_is_rejected() {
        let text = minimal_script().replace("JOB 0.5 10 100", "JOB 0.5 10 200");
        let err = ScriptConfigLoader::new().load_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::MismatchedSamplingSteps { first: 100, index: 1, got: 200 }));
    }
}
