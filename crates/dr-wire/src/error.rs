use thiserror::Error;

pub type WireResult<T> = Result<T, ProtocolError>;

/// `ProtocolError` from spec.md §7: bad key, bad version, unknown tag,
/// short read. All are local/session-scoped — the caller logs, releases
/// the node if any, and closes the socket (spec.md §7 policy table).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("command key did not match either the regular or privileged key")]
    KeyMismatch,

    #[error("unknown command tag byte {0}")]
    UnknownTag(u8),

    #[error("frame declared size {declared} exceeds the hard ceiling {ceiling}")]
    SizeBudgetOverflow { declared: u32, ceiling: u32 },

    #[error("filename in TakeThisFile exceeds MAX_FILENAME_SIZE or has no nul terminator")]
    MalformedFilename,

    #[error("byte blob length {0} is not a multiple of 4 (not a whole number of f32 values)")]
    MisalignedFloatBlob(usize),

    #[error("parameter block line of {0} bytes exceeds MAX_PARAMETER_LINE_LENGTH")]
    ParameterLineTooLong(usize),

    #[error("malformed parameter block line")]
    MalformedParameterBlock,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// A short read (unexpected EOF) surfaces through `std::io::Error`
    /// with `ErrorKind::UnexpectedEof`; callers that need to distinguish
    /// "peer closed cleanly" from "other I/O error" can match on this.
    pub fn is_short_read(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}
