//! Client-side SOCKS5 handshake (RFC 1928, RFC 1929) against an upstream
//! proxy, plus the coordinator that reports the outcome to the bridge.
//!
//! The handshake runs on an already-connected stream and never touches user
//! payload: greeting, optional username/password subnegotiation, CONNECT,
//! reply validation. After success the stream is a transparent tunnel to the
//! requested target.

mod addr;
mod client;
mod coordinator;
mod error;

pub use addr::TargetAddr;
pub use client::run_handshake;
pub use coordinator::{BridgeEvents, Coordinator, HandshakeContext};
pub use error::{HandshakeError, Phase};
