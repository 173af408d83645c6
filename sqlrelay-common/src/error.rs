use std::fmt;

/// Error taxonomy for the gateway core.
///
/// Each variant corresponds to one of the error kinds the core can
/// surface; `TRANSIENT_IO` is deliberately absent, it is not an error at
/// this layer and is represented by a plain `Ok(None)`/would-block return
/// instead of a `Result::Err`.
#[derive(Debug)]
pub enum GatewayError {
    /// Frame length mismatch, bad sequence number, truncated payload.
    ProtocolMalformed(String),
    /// Unknown user, bad scramble, missing database.
    AuthRejected(String),
    /// Peer requires a capability the core does not implement.
    Unsupported(String),
    /// Allocation failure in the buffer chain or elsewhere.
    ResourceExhausted(String),
    /// A module failed to register at startup.
    ModuleLoadFailed(String),
    /// Transport-level I/O failure.
    Io(std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::ProtocolMalformed(msg) => write!(f, "protocol malformed: {}", msg),
            GatewayError::AuthRejected(msg) => write!(f, "authentication rejected: {}", msg),
            GatewayError::Unsupported(msg) => write!(f, "unsupported capability: {}", msg),
            GatewayError::ResourceExhausted(msg) => write!(f, "resource exhausted: {}", msg),
            GatewayError::ModuleLoadFailed(msg) => write!(f, "module load failed: {}", msg),
            GatewayError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(e)
    }
}
