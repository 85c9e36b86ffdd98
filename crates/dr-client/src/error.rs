use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

/// Errors a client-side program can hit. `Protocol` covers anything the
/// wire codec itself rejects; `Rejected` covers a well-formed reply the
/// server sent that this client did not expect (e.g. a key mismatch when
/// asking for a privileged command).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] dr_wire::ProtocolError),

    #[error("I/O error talking to {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("server rejected the request: {0}")]
    Rejected(String),
}
