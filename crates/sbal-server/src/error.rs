//! Server error types.

use crate::ingress::IngressError;

/// Errors that can occur while serving the balancer.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ingress error: {0}")]
    Ingress(#[from] IngressError),

    #[error("no eligible upstream")]
    NoEligibleUpstream,

    #[error("upstream connect failed: {0}")]
    UpstreamConnect(std::io::Error),

    #[error("upstream connect timed out")]
    UpstreamConnectTimeout,

    #[error("upstream handshake timed out")]
    HandshakeTimeout,

    #[error("upstream handshake failed: {0}")]
    Handshake(String),

    #[error("upstream rejected CONNECT")]
    UpstreamRejected,

    #[error("probe setup failed: {0}")]
    Probe(#[from] sbal_pool::ProbeError),

    #[error("config error: {0}")]
    Config(String),
}
