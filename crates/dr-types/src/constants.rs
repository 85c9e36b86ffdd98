//! Constants carried over verbatim from the original `DR_server.cpp` /
//! `read_input_script_file.h`, where spec.md leaves the numeric value
//! implicit ("the supervisor's crash check...", "statvfs...") but the
//! original source fixes it.

/// Number of bits in each replica's committed-sequence presence bitmap.
pub const N_PRESENCE_BITS: usize = 100_000;

/// Subdivisions per inter-nominal segment for continuous Boltzmann jumping.
/// Must be odd; the original comment notes this without explaining why a
/// midpoint matters, and neither do we.
pub const REPLICA_MICRODIVISIONS: usize = 51;

/// kcal/(mol*K), matching the original's `BOLTZMANN_CONSTANT` macro.
pub const BOLTZMANN_CONSTANT: f64 = 8.31451 / 4184.0;

pub const MAX_FILENAME_SIZE: usize = 128;
pub const MAX_PARAMETER_BLOCK_SIZE: usize = 2048;
pub const MAX_PARAMETER_LINE_LENGTH: usize = 500;

/// Current on-disk snapshot format version. 1.0 may still be loaded for
/// non-vRE runs (spec.md §4.6).
pub const SNAPSHOT_VERSION: f32 = 2.0;
pub const SNAPSHOT_VERSION_LEGACY: f32 = 1.0;

pub const QUEUE_INTERVAL_SECONDS: u64 = 3600;
pub const DISK_ALMOST_FULL_CHECK_SECONDS: u64 = 600;
pub const FINISH_ON_AVERAGE_CHECK_SECONDS: u64 = 600;
pub const NODE_DISPLAY_SECONDS: u64 = 600;
pub const MOBILITY_CHECK_SECONDS: u64 = 600;
pub const MAX_FAILURES_FOR_SUBMISSION: u32 = 1000;

/// Minimum free disk space, in bytes, required to keep accepting rounds.
pub const MIN_DISK_SPACE_TO_RUN_BYTES: u64 = 1024 * 1024 * 1024;

/// Default primary/secondary vRE bag capacities (`DEFAULT_NUMSAVES_PRIMARY`
/// / `DEFAULT_NUMSAVES_SECONDARY` in `vre.h`), used when a script omits
/// `VRE_SECONDARY_LIST_LENGTH` or the primary capacity is left at `-1`.
pub const DEFAULT_VRE_PRIMARY_CAPACITY: usize = 100_000;
pub const DEFAULT_VRE_SECONDARY_CAPACITY: usize = 1_000;

/// OS listen backlog recommended by spec.md §5.
pub const LISTEN_BACKLOG: u32 = 100;
