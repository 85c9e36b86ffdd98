use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors from parsing or validating a `SCRIPT` file into a
/// [`crate::ScriptConfig`]. The DSL grammar itself is the one external
/// collaborator spec.md §1 excludes; this is a straightforward,
/// original-grounded reader, not a hardened compiler — so its errors stay
/// line-oriented rather than offering recovery or suggestions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}: unrecognized option {option:?}")]
    UnknownOption { line: usize, option: String },

    #[error("line {line}: {option} expects {expected} argument(s), got {got}")]
    WrongArity {
        line: usize,
        option: String,
        expected: usize,
        got: usize,
    },

    #[error("line {line}: could not parse {value:?} as {expected}")]
    BadValue {
        line: usize,
        value: String,
        expected: &'static str,
    },

    #[error("a JOB row at line {line} appeared before any COLUMNS row")]
    JobBeforeColumns { line: usize },

    #[error("required option {0} was never set")]
    MissingRequired(&'static str),

    #[error("SIMULATION {coordinate:?} does not support move algorithm {mv:?}")]
    IncompatibleSimulation {
        coordinate: dr_types::CoordinateKind,
        mv: dr_types::MoveAlgorithm,
    },

    #[error("Temperature/Umbrella coordinates do not support multiple ligands (Nligands={0})")]
    MultiLigandNotSupported(u32),

    #[error("CIRCULAR requires hi > lo, got lo={lo} hi={hi}")]
    InvalidCircularRange { lo: f64, hi: f64 },

    #[error("JOB rows disagree on NSTEPS: replica 0 has {first}, replica {index} has {got}")]
    MismatchedSamplingSteps { first: u32, index: usize, got: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
