//! Handshake error types, tagged with the FSM phase that failed.

use std::fmt;

/// The six wire phases of the client-side handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GreetWrite,
    GreetRead,
    AuthWrite,
    AuthRead,
    ConnectWrite,
    ConnectRead,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::GreetWrite => "greet-w",
            Phase::GreetRead => "greet-r",
            Phase::AuthWrite => "auth-w",
            Phase::AuthRead => "auth-r",
            Phase::ConnectWrite => "connect-w",
            Phase::ConnectRead => "connect-r",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that terminate a handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("I/O error during {phase}: {source}")]
    Io {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },

    #[error("short write during {phase}: wrote {got} of {want} bytes")]
    ShortWrite { phase: Phase, got: usize, want: usize },

    #[error("protocol error during {phase}: {reason}")]
    Protocol { phase: Phase, reason: String },

    /// The upstream demands username/password auth but none is configured.
    /// The message is the historical reason string surfaced to the bridge.
    #[error("socks5_handshake_read (we cannot auth)")]
    AuthRequiredButUnavailable,

    /// The upstream rejected the username/password subnegotiation.
    #[error("auth rejected by upstream (status 0x{status:02x})")]
    AuthRejected { status: u8 },

    /// The CONNECT reply header failed validation (wrong version, non-zero
    /// REP, non-zero RSV, or unknown ATYP). Dispatched to the bridge as the
    /// up-ready-error path rather than a generic failure.
    #[error("invalid CONNECT reply: {reason}")]
    ConnectReplyInvalid { reason: String },
}

impl HandshakeError {
    /// True for the CONNECT-reply-header path that the coordinator reports
    /// via `on_up_ready_error` instead of `on_error`.
    pub fn is_connect_reply_invalid(&self) -> bool {
        matches!(self, HandshakeError::ConnectReplyInvalid { .. })
    }

    pub(crate) fn io(phase: Phase, source: std::io::Error) -> Self {
        HandshakeError::Io { phase, source }
    }

    pub(crate) fn protocol(phase: Phase, reason: impl Into<String>) -> Self {
        HandshakeError::Protocol {
            phase,
            reason: reason.into(),
        }
    }
}
