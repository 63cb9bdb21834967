//! Health probes: raw TCP reachability and end-to-end HTTPS through the
//! upstream's SOCKS5 tunnel.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use sbal_config::CheckConfig;
use sbal_socks::TargetAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::server::UpstreamServer;

/// Why a probe failed. Recorded as liveness state, never surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake: {0}")]
    Handshake(#[from] sbal_socks::HandshakeError),

    #[error("bad http status line: {0:?}")]
    BadStatusLine(String),

    #[error("config: {0}")]
    Config(String),
}

/// Raw TCP reachability: connect, then immediately close.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> Result<(), ProbeError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;
    drop(stream);
    Ok(())
}

/// End-to-end prober: SOCKS5 tunnel through the upstream to a known HTTPS
/// host, TLS handshake, one GET, and a parseable status line back.
pub struct HttpsProber {
    tls: TlsConnector,
    /// TLS SNI server name, validated at construction.
    sni: ServerName<'static>,
    test_remote_host: String,
    test_remote_port: u16,
    /// Bounds the upstream TCP connect, and separately the tunneled
    /// handshake + TLS + response exchange.
    timeout: Duration,
}

impl HttpsProber {
    pub fn new(check: &CheckConfig, timeout: Duration) -> Result<Self, ProbeError> {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(ca_path) = &check.ca {
            let ca_data = std::fs::read(ca_path)
                .map_err(|e| ProbeError::Config(format!("failed to read CA cert: {e}")))?;
            let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(&ca_data))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ProbeError::Config(format!("failed to parse CA cert: {e}")))?;
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|e| ProbeError::Config(format!("failed to add CA cert: {e}")))?;
            }
        } else {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let sni = ServerName::try_from(check.test_remote_host.clone())
            .map_err(|e| ProbeError::Config(format!("invalid test_remote_host: {e}")))?;

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
            sni,
            test_remote_host: check.test_remote_host.clone(),
            test_remote_port: check.test_remote_port,
            timeout,
        })
    }

    /// Run one probe through `server`. Any well-formed HTTP status line is a
    /// success; the response body is not read.
    pub async fn probe(&self, server: &UpstreamServer) -> Result<(), ProbeError> {
        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((server.host(), server.port())),
        )
        .await
        .map_err(|_| ProbeError::Timeout(self.timeout))??;

        tokio::time::timeout(self.timeout, self.exchange(server, stream))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    async fn exchange(
        &self,
        server: &UpstreamServer,
        mut stream: TcpStream,
    ) -> Result<(), ProbeError> {
        let target = TargetAddr::new(self.test_remote_host.clone(), self.test_remote_port);
        let auth = (!server.auth_user().is_empty())
            .then(|| (server.auth_user(), server.auth_pwd()));
        sbal_socks::run_handshake(&mut stream, &target, auth, false).await?;

        let mut tls = self.tls.connect(self.sni.clone(), stream).await?;

        // The request path is the literal backslash the original balancer
        // sends; servers typically answer 400, which still proves the whole
        // tunnel + TLS path works.
        let request = format!(
            "GET \\ HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.test_remote_host
        );
        tls.write_all(request.as_bytes()).await?;

        let status_line = read_status_line(&mut tls).await?;
        let code = parse_status_line(&status_line)?;
        debug!(host = %self.test_remote_host, code, "https probe response");
        Ok(())
    }
}

/// Read up to the first CRLF (bounded).
async fn read_status_line<S>(stream: &mut S) -> Result<String, ProbeError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while buf.len() < 1024 {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            buf.push(byte[0]);
        }
    }
    String::from_utf8(buf).map_err(|e| ProbeError::BadStatusLine(e.to_string()))
}

/// Accept any `HTTP/<v> <code> ...` line.
fn parse_status_line(line: &str) -> Result<u16, ProbeError> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(ProbeError::BadStatusLine(line.to_string()));
    }
    parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| ProbeError::BadStatusLine(line.to_string()))
}
