//! Per-connection handling: ingress exchange, upstream selection, the
//! upstream handshake, then the byte bridge.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sbal_core::io::relay_bidirectional;
use sbal_pool::UpstreamServer;
use sbal_socks::{BridgeEvents, Coordinator, HandshakeContext, HandshakeError};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::ServerState;
use crate::error::ServerError;
use crate::ingress::{
    self, CMD_CONNECT, IngressRequest, REPLY_CONNECTION_NOT_ALLOWED, REPLY_CONNECTION_REFUSED,
    REPLY_COMMAND_NOT_SUPPORTED, REPLY_GENERAL_FAILURE, REPLY_HOST_UNREACHABLE,
    REPLY_NETWORK_UNREACHABLE, REPLY_SUCCEEDED, REPLY_TTL_EXPIRED, send_reply_unspecified,
};
use crate::metrics;

/// Handle one accepted client connection.
pub(crate) async fn handle_conn(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    metrics::record_connection_accepted();
    if let Err(e) = handle_conn_inner(stream, peer, &state).await {
        debug!(peer = %peer, error = %e, "connection ended with error");
    }
    metrics::record_connection_closed();
}

async fn handle_conn_inner(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: &ServerState,
) -> Result<(), ServerError> {
    let request = match ingress::accept_request(&mut stream).await {
        Ok(req) => req,
        Err(e @ ingress::IngressError::UnsupportedAddressType(_)) => {
            let _ = send_reply_unspecified(&mut stream, ingress::REPLY_ADDRESS_TYPE_NOT_SUPPORTED)
                .await;
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    match request.command {
        CMD_CONNECT => handle_connect(stream, peer, request, state).await,
        // UDP ASSOCIATE is a reserved hook; nothing sets udp_requested yet.
        cmd => {
            let _ = send_reply_unspecified(&mut stream, REPLY_COMMAND_NOT_SUPPORTED).await;
            Err(ingress::IngressError::UnsupportedCommand(cmd).into())
        }
    }
}

/// Outcome sink for the handshake coordinator. The reply to the downstream
/// client is sent after the coordinator returns, based on what fired.
#[derive(Default)]
struct ConnEvents {
    ready: bool,
    ready_error: bool,
    up_end: bool,
    error: Option<String>,
}

impl BridgeEvents for ConnEvents {
    fn on_up_ready(&mut self) {
        self.ready = true;
    }
    fn on_up_ready_error(&mut self) {
        self.ready_error = true;
    }
    fn on_up_end(&mut self) {
        self.up_end = true;
    }
    fn on_error(&mut self, error: &HandshakeError) {
        self.error = Some(error.to_string());
    }
}

async fn handle_connect(
    mut stream: TcpStream,
    peer: SocketAddr,
    request: IngressRequest,
    state: &ServerState,
) -> Result<(), ServerError> {
    let Some(server) = state.pool.pick() else {
        metrics::record_error(sbal_core::ERROR_NO_UPSTREAM);
        let _ = send_reply_unspecified(&mut stream, REPLY_GENERAL_FAILURE).await;
        return Err(ServerError::NoEligibleUpstream);
    };

    debug!(
        peer = %peer,
        target = %request.target,
        upstream = %server.name(),
        "CONNECT"
    );

    let connect_timeout = Duration::from_secs(state.balancer.connect_timeout_secs);
    let upstream = match timeout(
        connect_timeout,
        TcpStream::connect((server.host(), server.port())),
    )
    .await
    {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            metrics::record_error(sbal_core::ERROR_IO);
            let _ = send_reply_unspecified(&mut stream, reply_code_for_io_error(&e)).await;
            return Err(ServerError::UpstreamConnect(e));
        }
        Err(_) => {
            metrics::record_error(sbal_core::ERROR_TIMEOUT);
            let _ = send_reply_unspecified(&mut stream, REPLY_TTL_EXPIRED).await;
            return Err(ServerError::UpstreamConnectTimeout);
        }
    };
    apply_tcp_options(&upstream, &state.balancer.tcp)?;

    let ctx = HandshakeContext {
        upstream,
        target: request.target,
        auth_user: server.auth_user().to_string(),
        auth_pwd: server.auth_pwd().to_string(),
        udp_requested: false,
    };

    let mut events = ConnEvents::default();
    let handshake_timeout = Duration::from_secs(state.balancer.handshake_timeout_secs);
    let outcome = timeout(handshake_timeout, Coordinator::new(ctx).run(&mut events)).await;

    let upstream = match outcome {
        Err(_) => {
            metrics::record_handshake_failure(sbal_core::ERROR_TIMEOUT);
            let _ = send_reply_unspecified(&mut stream, REPLY_TTL_EXPIRED).await;
            return Err(ServerError::HandshakeTimeout);
        }
        Ok(Some(upstream)) => upstream,
        Ok(None) => {
            let _ = send_reply_unspecified(&mut stream, REPLY_GENERAL_FAILURE).await;
            return if events.ready_error {
                metrics::record_handshake_failure(sbal_core::ERROR_PROTOCOL);
                Err(ServerError::UpstreamRejected)
            } else {
                metrics::record_handshake_failure(sbal_core::ERROR_HANDSHAKE);
                Err(ServerError::Handshake(
                    events.error.unwrap_or_else(|| "unknown".into()),
                ))
            };
        }
    };

    bridge(stream, upstream, &server, state).await
}

/// Successful handshake: count the assignment, confirm to the client, pump.
async fn bridge(
    mut stream: TcpStream,
    upstream: TcpStream,
    server: &Arc<UpstreamServer>,
    state: &ServerState,
) -> Result<(), ServerError> {
    server.mark_bridged();
    metrics::record_handshake_ok();

    send_reply_unspecified(&mut stream, REPLY_SUCCEEDED).await?;

    let idle_timeout = Duration::from_secs(state.balancer.relay_idle_timeout_secs);
    let stats = relay_bidirectional(
        stream,
        upstream,
        idle_timeout,
        state.balancer.relay_buffer_size,
    )
    .await?;
    metrics::record_relay_bytes(stats.client_to_upstream, stats.upstream_to_client);

    debug!(
        upstream = %server.name(),
        up = stats.client_to_upstream,
        down = stats.upstream_to_client,
        "relay finished"
    );
    Ok(())
}

fn reply_code_for_io_error(error: &std::io::Error) -> u8 {
    match error.kind() {
        ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
        ErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
        ErrorKind::HostUnreachable => REPLY_HOST_UNREACHABLE,
        ErrorKind::PermissionDenied => REPLY_CONNECTION_NOT_ALLOWED,
        ErrorKind::TimedOut => REPLY_TTL_EXPIRED,
        ErrorKind::AddrNotAvailable => REPLY_HOST_UNREACHABLE,
        _ => REPLY_GENERAL_FAILURE,
    }
}

/// Apply TCP socket options.
pub(crate) fn apply_tcp_options(
    stream: &TcpStream,
    config: &sbal_config::TcpConfig,
) -> Result<(), ServerError> {
    stream.set_nodelay(config.no_delay).map_err(ServerError::Io)?;

    if config.keepalive_secs > 0 {
        let sock = SockRef::from(stream);
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive_secs));
        sock.set_tcp_keepalive(&keepalive).map_err(ServerError::Io)?;
    }

    Ok(())
}
