use std::io;
use thiserror::Error;

/// Errors produced by the capture core.
///
/// Transport and protocol failures carry enough context to be rendered by
/// the surrounding app; the core itself never displays anything.
#[derive(Debug, Error)]
pub enum CoreError {
    // -- Transport --
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("{what} timed out after {millis} ms")]
    Timeout { what: &'static str, millis: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),

    // -- Protocol --
    #[error("short frame: need {need} bytes, have {have}")]
    ShortFrame { need: usize, have: usize },

    #[error("unknown packet type 0x{0:08X}")]
    UnknownPacketType(u32),

    #[error("malformed {0} payload")]
    Malformed(&'static str),

    #[error("transaction id mismatch: sent {sent}, received {received}")]
    TransactionMismatch { sent: u32, received: u32 },

    #[error("operation 0x{opcode:04X} failed with response code 0x{code:04X}")]
    ResponseCode { opcode: u16, code: u16 },

    #[error("data phase size mismatch: announced {announced} bytes, received {received}")]
    SizeMismatch { announced: u64, received: u64 },

    #[error("camera rejected init: reason 0x{0:08X}")]
    InitFail(u32),

    // -- State --
    #[error("session already connected")]
    AlreadyConnected,

    #[error("session not connected")]
    NotConnected,

    #[error("session closed")]
    SessionClosed,

    // -- Vendor --
    #[error("sony in-memory gate did not open within {0} s")]
    SonyGateTimeout(u64),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Whether a failed connect attempt is worth retrying.
    ///
    /// Refused and timed-out connects are transient (camera still booting
    /// its PTP/IP service); unreachable-host/network and permission errors
    /// will not heal within a scan.
    pub fn is_retryable_connect(&self) -> bool {
        match self {
            CoreError::ConnectFailed { source, .. } => !matches!(
                source.kind(),
                io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
                    | io::ErrorKind::PermissionDenied
            ),
            CoreError::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_err(kind: io::ErrorKind) -> CoreError {
        CoreError::ConnectFailed {
            addr: "172.20.10.2:15740".into(),
            source: io::Error::new(kind, "probe"),
        }
    }

    #[test]
    fn refused_and_timeout_are_retryable() {
        assert!(connect_err(io::ErrorKind::ConnectionRefused).is_retryable_connect());
        assert!(connect_err(io::ErrorKind::TimedOut).is_retryable_connect());
        assert!(CoreError::Timeout { what: "connect", millis: 1500 }.is_retryable_connect());
    }

    #[test]
    fn unreachable_and_permission_are_fatal() {
        assert!(!connect_err(io::ErrorKind::HostUnreachable).is_retryable_connect());
        assert!(!connect_err(io::ErrorKind::NetworkUnreachable).is_retryable_connect());
        assert!(!connect_err(io::ErrorKind::PermissionDenied).is_retryable_connect());
    }

    #[test]
    fn non_connect_errors_are_not_retryable() {
        assert!(!CoreError::ConnectionClosed.is_retryable_connect());
        assert!(!CoreError::InitFail(1).is_retryable_connect());
    }
}
