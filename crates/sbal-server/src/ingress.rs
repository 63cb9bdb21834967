//! SOCKS5 server side of the ingress: the exchange with the downstream
//! client that yields the target to reach (RFC 1928).

use sbal_socks::TargetAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SOCKS5_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 reply codes sent back to the downstream client.
pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_TTL_EXPIRED: u8 = 0x06;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Ingress protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid SOCKS version: 0x{0:02x}")]
    InvalidVersion(u8),

    #[error("no acceptable authentication methods")]
    NoAcceptableMethods,

    #[error("unsupported command: 0x{0:02x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type: 0x{0:02x}")]
    UnsupportedAddressType(u8),

    #[error("domain name is not valid UTF-8")]
    InvalidHostEncoding,
}

/// Parsed client request.
#[derive(Debug)]
pub struct IngressRequest {
    pub command: u8,
    pub target: TargetAddr,
}

/// Run the client-facing half of connection setup: answer the greeting with
/// NO AUTH (the balancer never authenticates clients, only upstreams), then
/// read the request that names the target.
pub async fn accept_request<S>(stream: &mut S) -> Result<IngressRequest, IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting: VER NMETHODS METHODS. A method list never exceeds 255
    // entries, so it fits a stack buffer.
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    let [version, nmethods] = greeting;
    if version != SOCKS5_VERSION {
        return Err(IngressError::InvalidVersion(version));
    }
    let mut methods = [0u8; 255];
    let offered = &mut methods[..nmethods as usize];
    stream.read_exact(offered).await?;

    let chosen = if offered.contains(&METHOD_NO_AUTH) {
        METHOD_NO_AUTH
    } else {
        METHOD_NO_ACCEPTABLE
    };
    stream.write_all(&[SOCKS5_VERSION, chosen]).await?;
    if chosen == METHOD_NO_ACCEPTABLE {
        return Err(IngressError::NoAcceptableMethods);
    }

    // Request: VER CMD RSV ATYP, then the ATYP-shaped address and the port.
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(IngressError::InvalidVersion(head[0]));
    }
    let host = read_host(stream, head[3]).await?;
    let port = read_port(stream).await?;

    Ok(IngressRequest {
        command: head[1],
        target: TargetAddr::new(host, port),
    })
}

/// Decode the target host per the address-type octet. IP literals are
/// rendered to strings; whether they go back out as IP or domain is decided
/// by the upstream handshake, which re-parses the host.
async fn read_host<S>(stream: &mut S, atyp: u8) -> Result<String, IngressError>
where
    S: AsyncRead + Unpin,
{
    match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ok(std::net::Ipv4Addr::from(octets).to_string())
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ok(std::net::Ipv6Addr::from(octets).to_string())
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name).map_err(|_| IngressError::InvalidHostEncoding)
        }
        other => Err(IngressError::UnsupportedAddressType(other)),
    }
}

async fn read_port<S>(stream: &mut S) -> Result<u16, IngressError>
where
    S: AsyncRead + Unpin,
{
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

/// Send a reply with a zeroed bind address (0.0.0.0:0).
pub async fn send_reply_unspecified<S>(stream: &mut S, reply: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let buf = [
        SOCKS5_VERSION,
        reply,
        0x00, // RSV
        ATYP_IPV4,
        0,
        0,
        0,
        0,
        0,
        0,
    ];
    stream.write_all(&buf).await
}
