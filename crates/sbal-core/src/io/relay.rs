//! Bidirectional byte pump between the client socket and the upstream socket.
//!
//! Runs after the upstream SOCKS5 handshake has completed; from that point the
//! upstream stream is a transparent tunnel to the target and the bridge only
//! moves bytes. Each direction runs as its own task so back-pressure on one
//! direction never stalls the other. An idle timeout fires when neither
//! direction has transferred data within the window.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Bytes transferred in each direction during a relay session.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayStats {
    /// Bytes from client to upstream.
    pub client_to_upstream: u64,
    /// Bytes from upstream to client.
    pub upstream_to_client: u64,
}

impl RelayStats {
    /// Total bytes transferred in both directions.
    #[inline]
    pub fn total(self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }
}

/// Shared activity clock: milliseconds since the relay epoch at the last
/// transfer in either direction.
struct Activity {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    fn deadline(&self, idle_timeout: Duration) -> Instant {
        self.epoch + Duration::from_millis(self.last_ms.load(Ordering::Relaxed)) + idle_timeout
    }
}

/// One-directional copy loop with half-close on EOF.
async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    transferred: Arc<AtomicU64>,
    activity: Arc<Activity>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // EOF: propagate the half-close, leave the other direction alone.
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        transferred.fetch_add(n as u64, Ordering::Relaxed);
        activity.touch();
    }
}

/// Pump bytes between `client` and `upstream` until both directions reach EOF,
/// either side errors, or neither direction has moved data for `idle_timeout`.
///
/// The idle timeout and an error both tear down the whole relay; a clean EOF
/// on one side only half-closes and lets the other direction drain.
pub async fn relay_bidirectional<A, B>(
    client: A,
    upstream: B,
    idle_timeout: Duration,
    buffer_size: usize,
) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_r, client_w) = tokio::io::split(client);
    let (upstream_r, upstream_w) = tokio::io::split(upstream);

    let activity = Arc::new(Activity::new(Instant::now()));
    let up_bytes = Arc::new(AtomicU64::new(0));
    let down_bytes = Arc::new(AtomicU64::new(0));

    let mut up_task = tokio::spawn(copy_direction(
        client_r,
        upstream_w,
        buffer_size,
        up_bytes.clone(),
        activity.clone(),
    ));
    let mut down_task = tokio::spawn(copy_direction(
        upstream_r,
        client_w,
        buffer_size,
        down_bytes.clone(),
        activity.clone(),
    ));

    let mut up_done = false;
    let mut down_done = false;

    let result: io::Result<()> = loop {
        if up_done && down_done {
            break Ok(());
        }
        let deadline = activity.deadline(idle_timeout);
        tokio::select! {
            res = &mut up_task, if !up_done => {
                up_done = true;
                if let Err(e) = flatten_join(res) {
                    break Err(e);
                }
            }
            res = &mut down_task, if !down_done => {
                down_done = true;
                if let Err(e) = flatten_join(res) {
                    break Err(e);
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                // The timer was armed from a stale activity stamp; only stop
                // if the connection is genuinely idle now.
                if Instant::now() >= activity.deadline(idle_timeout) {
                    break Ok(());
                }
            }
        }
    };

    up_task.abort();
    down_task.abort();

    let stats = RelayStats {
        client_to_upstream: up_bytes.load(Ordering::Relaxed),
        upstream_to_client: down_bytes.load(Ordering::Relaxed),
    };
    result.map(|_| stats)
}

fn flatten_join(res: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    match res {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}
