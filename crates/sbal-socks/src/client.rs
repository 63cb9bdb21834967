//! The four-step client handshake: greeting, optional user/pass
//! subnegotiation, CONNECT, reply validation.

use std::net::IpAddr;

use sbal_core::defaults::{MAX_AUTH_FIELD_LEN, MAX_TARGET_HOST_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::addr::TargetAddr;
use crate::error::{HandshakeError, Phase};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Largest CONNECT reply: header + domain ATYP with a 255-byte name + port.
const MAX_CONNECT_REPLY: usize = 4 + 1 + 255 + 2;

/// Drive the full handshake on a stream already connected to the upstream.
///
/// `auth` carries the upstream's credentials; `None` advertises no-auth only.
/// `udp_requested` is a reserved hook: it is inspected but the request command
/// is always CONNECT in this release.
///
/// On success the stream is a transparent byte tunnel to `target`. No user
/// payload is read or written here.
pub async fn run_handshake<S>(
    stream: &mut S,
    target: &TargetAddr,
    auth: Option<(&str, &str)>,
    udp_requested: bool,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    greet(stream, auth).await?;
    connect(stream, target, udp_requested).await
}

/// Greeting exchange, plus the user/pass subnegotiation when the upstream
/// picks method 0x02.
async fn greet<S>(stream: &mut S, auth: Option<(&str, &str)>) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Exactly one method is advertised: user/pass when credentials are
    // configured, no-auth otherwise.
    let method = if auth.is_some() {
        METHOD_USER_PASS
    } else {
        METHOD_NO_AUTH
    };
    write_phase(stream, Phase::GreetWrite, &[SOCKS5_VERSION, 0x01, method]).await?;

    let mut reply = [0u8; 2];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| HandshakeError::io(Phase::GreetRead, e))?;

    if reply[0] != SOCKS5_VERSION {
        return Err(HandshakeError::protocol(
            Phase::GreetRead,
            format!("invalid version 0x{:02x}", reply[0]),
        ));
    }
    match reply[1] {
        METHOD_NO_AUTH => Ok(()),
        METHOD_USER_PASS => match auth {
            Some((user, pwd)) => authenticate(stream, user, pwd).await,
            None => Err(HandshakeError::AuthRequiredButUnavailable),
        },
        m => Err(HandshakeError::protocol(
            Phase::GreetRead,
            format!("invalid auth method 0x{m:02x}"),
        )),
    }
}

/// RFC 1929 username/password subnegotiation.
async fn authenticate<S>(stream: &mut S, user: &str, pwd: &str) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if user.is_empty() || user.len() > MAX_AUTH_FIELD_LEN {
        return Err(HandshakeError::protocol(
            Phase::AuthWrite,
            format!("username length {} outside 1..=255", user.len()),
        ));
    }
    if pwd.len() > MAX_AUTH_FIELD_LEN {
        return Err(HandshakeError::protocol(
            Phase::AuthWrite,
            format!("password length {} exceeds 255", pwd.len()),
        ));
    }

    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    let mut request = Vec::with_capacity(3 + user.len() + pwd.len());
    request.push(AUTH_VERSION);
    request.push(user.len() as u8);
    request.extend_from_slice(user.as_bytes());
    request.push(pwd.len() as u8);
    request.extend_from_slice(pwd.as_bytes());
    debug_assert_eq!(request.len(), 3 + user.len() + pwd.len());

    write_phase(stream, Phase::AuthWrite, &request).await?;

    let mut reply = [0u8; 2];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| HandshakeError::io(Phase::AuthRead, e))?;

    if reply[0] != AUTH_VERSION {
        return Err(HandshakeError::protocol(
            Phase::AuthRead,
            format!("invalid subnegotiation version 0x{:02x}", reply[0]),
        ));
    }
    if reply[1] != 0x00 {
        return Err(HandshakeError::AuthRejected { status: reply[1] });
    }
    Ok(())
}

/// CONNECT request and reply validation.
async fn connect<S>(
    stream: &mut S,
    target: &TargetAddr,
    udp_requested: bool,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_connect_request(target, udp_requested)?;
    write_phase(stream, Phase::ConnectWrite, &request).await?;
    read_connect_reply(stream).await
}

/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
fn build_connect_request(
    target: &TargetAddr,
    udp_requested: bool,
) -> Result<Vec<u8>, HandshakeError> {
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    match target.host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&v4.octets());
        }
        Ok(IpAddr::V6(v6)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            // Not an IP literal: send as a domain name.
            if target.host.len() > MAX_TARGET_HOST_LEN {
                return Err(HandshakeError::protocol(
                    Phase::ConnectWrite,
                    format!("target host longer than {MAX_TARGET_HOST_LEN} bytes"),
                ));
            }
            request.push(ATYP_DOMAIN);
            request.push(target.host.len() as u8);
            request.extend_from_slice(target.host.as_bytes());
        }
    }
    request.extend_from_slice(&target.port.to_be_bytes());

    if udp_requested {
        // Reserved: UDP relay mode would switch the command here. Not emitted
        // in this release; the request stays CMD_CONNECT.
    }

    Ok(request)
}

/// Read and validate the CONNECT reply.
///
/// The reply may arrive fragmented; bytes are accumulated until the
/// ATYP-determined total is reached, and the accumulated total must equal
/// that expected length exactly. A reply bundled with trailing bytes is
/// rejected the same way an over-long single read is.
async fn read_connect_reply<S>(stream: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; MAX_CONNECT_REPLY];
    let mut have = 0usize;

    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    while have < 6 {
        let n = stream
            .read(&mut buf[have..])
            .await
            .map_err(|e| HandshakeError::io(Phase::ConnectRead, e))?;
        if n == 0 {
            return Err(HandshakeError::protocol(
                Phase::ConnectRead,
                format!("connection closed after {have} reply bytes"),
            ));
        }
        have += n;
    }

    if buf[0] != SOCKS5_VERSION
        || buf[1] != 0x00
        || buf[2] != 0x00
        || !matches!(buf[3], ATYP_IPV4 | ATYP_DOMAIN | ATYP_IPV6)
    {
        return Err(HandshakeError::ConnectReplyInvalid {
            reason: format!(
                "header {:02x} {:02x} {:02x} {:02x}",
                buf[0], buf[1], buf[2], buf[3]
            ),
        });
    }

    let expected = match buf[3] {
        ATYP_IPV4 => 4 + 4 + 2,
        ATYP_IPV6 => 4 + 16 + 2,
        // one length octet then the bound name
        _ => 4 + 1 + buf[4] as usize + 2,
    };
    while have < expected {
        let n = stream
            .read(&mut buf[have..])
            .await
            .map_err(|e| HandshakeError::io(Phase::ConnectRead, e))?;
        if n == 0 {
            return Err(HandshakeError::protocol(
                Phase::ConnectRead,
                format!("reply truncated at {have} of {expected} bytes"),
            ));
        }
        have += n;
    }
    if have != expected {
        return Err(HandshakeError::protocol(
            Phase::ConnectRead,
            format!("reply length {have}, expected {expected}"),
        ));
    }

    let bnd_port = u16::from_be_bytes([buf[expected - 2], buf[expected - 1]]);
    if bnd_port != 0 {
        // The bound address is not used to redirect traffic; keep relaying on
        // this connection.
        warn!(bnd_port, "multi-homed SOCKS5 server not supported");
    }

    Ok(())
}

/// Write one phase's buffer, mapping failures to phase-tagged errors.
async fn write_phase<S>(stream: &mut S, phase: Phase, data: &[u8]) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(data).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::WriteZero => HandshakeError::ShortWrite {
            phase,
            got: 0,
            want: data.len(),
        },
        _ => HandshakeError::io(phase, e),
    })
}
