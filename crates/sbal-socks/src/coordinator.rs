//! Handshake coordinator: owns one in-flight handshake and publishes its
//! outcome to the bridge.
//!
//! Exactly one of three event paths fires per handshake:
//! - READY:                     `on_up_ready` then `on_up_end`
//! - malformed CONNECT reply:   `on_up_ready_error` then `on_up_end`
//! - any other failure:         `on_error`
//!
//! The coordinator consumes itself in `run`, so no path can fire twice. If
//! the owning connection task is dropped mid-handshake, the future is simply
//! cancelled and no event fires at all.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::addr::TargetAddr;
use crate::client;
use crate::error::HandshakeError;

/// One-shot notifications delivered to the bridge.
pub trait BridgeEvents {
    /// Handshake complete; the upstream stream is now a transparent tunnel.
    fn on_up_ready(&mut self);
    /// The upstream answered CONNECT with a malformed or rejecting reply.
    fn on_up_ready_error(&mut self);
    /// The upstream half of connection setup is finished (either way).
    fn on_up_end(&mut self);
    /// The handshake failed before the CONNECT reply stage concluded.
    fn on_error(&mut self, error: &HandshakeError);
}

/// Per-connection handshake state, owned by the coordinator for the lifetime
/// of one handshake.
pub struct HandshakeContext<S> {
    /// Stream already connected to the chosen upstream server.
    pub upstream: S,
    /// What the downstream client asked to reach.
    pub target: TargetAddr,
    /// Upstream credentials; empty user means no-auth.
    pub auth_user: String,
    pub auth_pwd: String,
    /// Reserved UDP relay hook; inspected but never changes the command.
    pub udp_requested: bool,
}

/// Drives one handshake to completion and reports through [`BridgeEvents`].
pub struct Coordinator<S> {
    ctx: HandshakeContext<S>,
}

impl<S> Coordinator<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(ctx: HandshakeContext<S>) -> Self {
        Self { ctx }
    }

    /// Run the handshake. Returns the upstream stream for bridging on
    /// success, `None` on any failure.
    pub async fn run<E: BridgeEvents>(mut self, events: &mut E) -> Option<S> {
        let auth = if self.ctx.auth_user.is_empty() {
            None
        } else {
            Some((self.ctx.auth_user.as_str(), self.ctx.auth_pwd.as_str()))
        };

        match client::run_handshake(
            &mut self.ctx.upstream,
            &self.ctx.target,
            auth,
            self.ctx.udp_requested,
        )
        .await
        {
            Ok(()) => {
                events.on_up_ready();
                events.on_up_end();
                Some(self.ctx.upstream)
            }
            Err(e) if e.is_connect_reply_invalid() => {
                events.on_up_ready_error();
                events.on_up_end();
                None
            }
            Err(e) => {
                events.on_error(&e);
                None
            }
        }
    }
}
