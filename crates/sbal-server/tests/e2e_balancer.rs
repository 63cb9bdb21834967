//! End-to-end tests: a real client speaks SOCKS5 to the balancer ingress,
//! the balancer handshakes with a mock SOCKS5 upstream, and bytes round-trip
//! to an echo server behind it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sbal_config::{
    BalancerConfig, CheckConfig, Config, SelectRule, StatusConfig, UpstreamConfig,
};
use sbal_pool::UpstreamPool;
use sbal_server::CancellationToken;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

async fn wait_for_tcp(addr: SocketAddr) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                drop(stream);
                break;
            }
            Err(_) => {
                if tokio::time::Instant::now() >= deadline {
                    panic!("timeout waiting for {addr}");
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Grab a port that nothing is listening on.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

struct TcpEchoServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TcpEchoServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        if let Ok((mut stream, _)) = res {
                            tokio::spawn(async move {
                                let mut buf = [0u8; 4096];
                                loop {
                                    match stream.read(&mut buf).await {
                                        Ok(0) => break,
                                        Ok(n) => {
                                            if stream.write_all(&buf[..n]).await.is_err() {
                                                break;
                                            }
                                        }
                                        Err(_) => break,
                                    }
                                }
                            });
                        }
                    }
                    _ = shutdown_task.cancelled() => break,
                }
            }
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// A real (if minimal) SOCKS5 upstream proxy: no-auth or user/pass, CONNECT
/// only, relays to the requested target.
struct MockSocks5Upstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl MockSocks5Upstream {
    async fn start(auth: Option<(&str, &str)>) -> Self {
        let auth = auth.map(|(u, p)| (u.to_string(), p.to_string()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        if let Ok((stream, _)) = res {
                            let auth = auth.clone();
                            tokio::spawn(async move {
                                let _ = proxy_conn(stream, auth).await;
                            });
                        }
                    }
                    _ = shutdown_task.cancelled() => break,
                }
            }
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

async fn proxy_conn(
    mut stream: TcpStream,
    auth: Option<(String, String)>,
) -> std::io::Result<()> {
    // greeting
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    assert_eq!(header[0], 0x05);
    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    match &auth {
        None => stream.write_all(&[0x05, 0x00]).await?,
        Some((user, pwd)) => {
            assert!(methods.contains(&0x02), "client did not offer user/pass");
            stream.write_all(&[0x05, 0x02]).await?;

            let mut ver_ulen = [0u8; 2];
            stream.read_exact(&mut ver_ulen).await?;
            assert_eq!(ver_ulen[0], 0x01);
            let mut uname = vec![0u8; ver_ulen[1] as usize];
            stream.read_exact(&mut uname).await?;
            let mut plen = [0u8; 1];
            stream.read_exact(&mut plen).await?;
            let mut passwd = vec![0u8; plen[0] as usize];
            stream.read_exact(&mut passwd).await?;

            if uname == user.as_bytes() && passwd == pwd.as_bytes() {
                stream.write_all(&[0x01, 0x00]).await?;
            } else {
                stream.write_all(&[0x01, 0x01]).await?;
                return Ok(());
            }
        }
    }

    // request
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    assert_eq!(request[0], 0x05);
    assert_eq!(request[1], 0x01, "mock upstream only supports CONNECT");

    let target = match request[3] {
        0x01 => {
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await?;
            let ip = std::net::Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            format!("{}:{}", ip, u16::from_be_bytes([buf[4], buf[5]]))
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut buf = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut buf).await?;
            let host = String::from_utf8_lossy(&buf[..len[0] as usize]).to_string();
            let port = u16::from_be_bytes([buf[len[0] as usize], buf[len[0] as usize + 1]]);
            format!("{host}:{port}")
        }
        other => panic!("unexpected ATYP {other}"),
    };

    let mut outbound = TcpStream::connect(&target).await?;
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut outbound).await;
    Ok(())
}

fn upstream_entry(name: &str, addr: SocketAddr, auth: Option<(&str, &str)>) -> UpstreamConfig {
    UpstreamConfig {
        name: name.into(),
        host: addr.ip().to_string(),
        port: addr.port(),
        disable: false,
        auth_user: auth.map(|(u, _)| u.to_string()).unwrap_or_default(),
        auth_pwd: auth.map(|(_, p)| p.to_string()).unwrap_or_default(),
    }
}

fn test_config(listen_port: u16, upstreams: Vec<UpstreamConfig>) -> Config {
    Config {
        balancer: BalancerConfig {
            listen: format!("127.0.0.1:{listen_port}"),
            select_rule: SelectRule::Loop,
            server_change_time_secs: 300,
            connect_timeout_secs: 2,
            handshake_timeout_secs: 2,
            relay_idle_timeout_secs: 10,
            relay_buffer_size: 16384,
            tcp: Default::default(),
        },
        upstream: upstreams,
        check: CheckConfig {
            tcp_check_start_secs: 0,
            tcp_check_period_secs: 1,
            connect_check_start_secs: 0,
            connect_check_period_secs: 1,
            test_remote_host: "127.0.0.1".into(),
            // nothing listens there; the HTTPS probe is expected to fail in
            // these hermetic tests
            test_remote_port: 1,
            ca: None,
        },
        status: Default::default(),
        metrics: Default::default(),
        logging: Default::default(),
    }
}

/// Build a pool from the config and force every server eligible, standing in
/// for a completed probe cycle.
fn eligible_pool(config: &Config) -> Arc<UpstreamPool> {
    let pool = Arc::new(UpstreamPool::from_config(config));
    for s in pool.servers() {
        s.record_tcp_ok();
        s.record_connect_ok();
    }
    pool
}

/// Minimal SOCKS5 client against the balancer ingress. Returns the stream
/// and the reply code.
async fn socks5_connect(
    balancer: SocketAddr,
    host: &str,
    port: u16,
) -> std::io::Result<(TcpStream, u8)> {
    let mut stream = TcpStream::connect(balancer).await?;
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await?;
    assert_eq!(method, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    assert_eq!(reply[0], 0x05);
    // consume the bind address (always ATYP=1 from the balancer)
    let mut bind = [0u8; 6];
    stream.read_exact(&mut bind).await?;
    Ok((stream, reply[1]))
}

#[tokio::test]
async fn connect_round_trips_through_balancer() {
    init_tracing();
    let echo = TcpEchoServer::start().await;
    let upstream = MockSocks5Upstream::start(None).await;

    let port = free_port().await;
    let config = test_config(port, vec![upstream_entry("up-0", upstream.addr, None)]);
    let pool = eligible_pool(&config);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(sbal_server::serve(config, pool.clone(), shutdown.clone()));

    let balancer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    wait_for_tcp(balancer).await;

    let (mut stream, reply) = socks5_connect(
        balancer,
        &echo.addr.ip().to_string(),
        echo.addr.port(),
    )
    .await
    .unwrap();
    assert_eq!(reply, 0x00);

    stream.write_all(b"hello through the tunnel").await.unwrap();
    let mut buf = [0u8; 24];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello through the tunnel");

    assert_eq!(pool.servers()[0].connect_count(), 1);

    shutdown.cancel();
    let _ = server.await.unwrap();
    upstream.stop().await;
    echo.stop().await;
}

#[tokio::test]
async fn authenticated_upstream_round_trips() {
    init_tracing();
    let echo = TcpEchoServer::start().await;
    let upstream = MockSocks5Upstream::start(Some(("user", "secret"))).await;

    let port = free_port().await;
    let config = test_config(
        port,
        vec![upstream_entry("auth-up", upstream.addr, Some(("user", "secret")))],
    );
    let pool = eligible_pool(&config);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(sbal_server::serve(config, pool, shutdown.clone()));

    let balancer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    wait_for_tcp(balancer).await;

    let (mut stream, reply) = socks5_connect(
        balancer,
        &echo.addr.ip().to_string(),
        echo.addr.port(),
    )
    .await
    .unwrap();
    assert_eq!(reply, 0x00);

    stream.write_all(b"authed").await.unwrap();
    let mut buf = [0u8; 6];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"authed");

    shutdown.cancel();
    let _ = server.await.unwrap();
    upstream.stop().await;
    echo.stop().await;
}

#[tokio::test]
async fn starvation_replies_general_failure() {
    init_tracing();
    let upstream = MockSocks5Upstream::start(None).await;

    let port = free_port().await;
    let config = test_config(port, vec![upstream_entry("down", upstream.addr, None)]);
    // pool built but never probed: every server stays ineligible
    let pool = Arc::new(UpstreamPool::from_config(&config));
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(sbal_server::serve(config, pool, shutdown.clone()));

    let balancer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    wait_for_tcp(balancer).await;

    let (_stream, reply) = socks5_connect(balancer, "127.0.0.1", 80).await.unwrap();
    assert_eq!(reply, 0x01);

    shutdown.cancel();
    let _ = server.await.unwrap();
    upstream.stop().await;
}

#[tokio::test]
async fn udp_associate_is_rejected() {
    init_tracing();
    let upstream = MockSocks5Upstream::start(None).await;

    let port = free_port().await;
    let config = test_config(port, vec![upstream_entry("up", upstream.addr, None)]);
    let pool = eligible_pool(&config);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(sbal_server::serve(config, pool, shutdown.clone()));

    let balancer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    wait_for_tcp(balancer).await;

    let mut stream = TcpStream::connect(balancer).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();

    // UDP ASSOCIATE to 0.0.0.0:0
    stream
        .write_all(&[
            0x05,
            sbal_server::ingress::CMD_UDP_ASSOCIATE,
            0x00,
            0x01,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x07);

    shutdown.cancel();
    let _ = server.await.unwrap();
    upstream.stop().await;
}

#[tokio::test]
async fn run_keeps_unconfirmed_upstream_out_of_rotation() {
    init_tracing();
    let upstream = MockSocks5Upstream::start(None).await;

    let port = free_port().await;
    // run() drives the real health checkers: the TCP probe will succeed
    // against the mock upstream, but the HTTPS probe target is unreachable,
    // so the server must never become eligible.
    let config = test_config(port, vec![upstream_entry("half-up", upstream.addr, None)]);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(sbal_server::run(config, shutdown.clone()));

    let balancer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    wait_for_tcp(balancer).await;

    // give the first probe rounds time to land
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (_stream, reply) = socks5_connect(balancer, "127.0.0.1", 80).await.unwrap();
    assert_eq!(reply, 0x01);

    shutdown.cancel();
    let _ = server.await.unwrap();
    upstream.stop().await;
}

#[tokio::test]
async fn status_endpoint_reports_and_mutates_pool() {
    init_tracing();
    let upstream = MockSocks5Upstream::start(None).await;

    let ingress_port = free_port().await;
    let status_port = free_port().await;
    let mut config = test_config(ingress_port, vec![upstream_entry("up", upstream.addr, None)]);
    config.status = StatusConfig {
        listen: Some(format!("127.0.0.1:{status_port}")),
    };

    let pool = eligible_pool(&config);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(sbal_server::serve(config, pool.clone(), shutdown.clone()));

    let status: SocketAddr = format!("127.0.0.1:{status_port}").parse().unwrap();
    wait_for_tcp(status).await;

    let state = http_get(status, "/state").await;
    assert!(state.contains("\"last_use_index\""), "body: {state}");
    assert!(state.contains("\"up\""), "body: {state}");

    let op = http_get(status, "/op?disable=0").await;
    assert!(op.contains("disable=0"), "body: {op}");
    assert!(!pool.servers()[0].is_eligible());

    let op = http_get(status, "/op?enable=0").await;
    assert!(op.contains("enable=0"), "body: {op}");
    assert!(pool.servers()[0].is_eligible());

    let bad = http_get(status, "/op?force_index=5").await;
    assert!(bad.contains("out of range"), "body: {bad}");

    shutdown.cancel();
    let _ = server.await.unwrap();
    upstream.stop().await;
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();
    body
}
