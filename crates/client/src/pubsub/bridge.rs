//! Byte stream over a WebSocket.
//!
//! STOMP wants a byte stream; the pub/sub node speaks binary WebSocket
//! messages carrying one STOMP frame each. [`spawn`] hands out one end of an
//! in-memory duplex pipe and runs two tasks on the other end: a reader that
//! copies every inbound message into the pipe, and a writer that cuts what
//! the STOMP client writes back into frames, sends each as a binary message
//! and pings on a fixed period. Both stop when the [`BridgeHandle`] is
//! dropped or either side of the socket fails.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use px_domain::config::PubSubConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

const PIPE_CAPACITY: usize = 64 * 1024;
const READ_CHUNK: usize = 8 * 1024;

/// Control side of a running bridge. Dropping it tears the bridge down.
pub(crate) struct BridgeHandle {
    ping_tx: mpsc::Sender<()>,
    pongs: watch::Receiver<u64>,
    shutdown: CancellationToken,
    writer: Option<JoinHandle<Result<(), WsError>>>,
}

impl BridgeHandle {
    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once either bridge task has stopped.
    pub(crate) async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Send a ping and wait up to `wait` for any pong.
    pub(crate) async fn probe(&self, wait: Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut pongs = self.pongs.clone();
        pongs.borrow_and_update();
        if self.ping_tx.send(()).await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(wait, pongs.changed()).await, Ok(Ok(())))
    }

    /// Stop both tasks and wait for the socket close to go out. Returns
    /// why closing failed, if it did.
    pub(crate) async fn close(mut self) -> Option<String> {
        self.shutdown.cancel();
        match self.writer.take()?.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("writer task: {e}")),
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Start bridging `ws`. The returned stream is what the STOMP client reads
/// from and writes to.
pub(crate) fn spawn<S>(ws: WebSocketStream<S>, settings: &PubSubConfig) -> (DuplexStream, BridgeHandle)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
    let (pipe_rx, pipe_tx) = tokio::io::split(remote);
    let (sink, stream) = ws.split();
    let (ping_tx, ping_rx) = mpsc::channel(4);
    let (pong_tx, pong_rx) = watch::channel(0u64);
    let shutdown = CancellationToken::new();

    tokio::spawn(ws_reader(stream, pipe_tx, pong_tx, settings.pong_wait(), shutdown.clone()));
    let writer = tokio::spawn(ws_writer(sink, pipe_rx, ping_rx, settings.ping_period(), shutdown.clone()));

    let handle = BridgeHandle {
        ping_tx,
        pongs: pong_rx,
        shutdown,
        writer: Some(writer),
    };
    (local, handle)
}

/// Inbound messages into the pipe. The read deadline slides forward on
/// every pong.
async fn ws_reader<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    mut pipe: WriteHalf<DuplexStream>,
    pongs: watch::Sender<u64>,
    pong_wait: Duration,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(pong_wait_ms = pong_wait.as_millis() as u64, "no pong received, closing websocket");
                break;
            }
            m = stream.next() => m,
        };

        let data = match next {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Pong(_))) => {
                tracing::trace!("received pong");
                deadline = Instant::now() + pong_wait;
                pongs.send_modify(|n| *n = n.wrapping_add(1));
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "websocket closed by peer");
                break;
            }
            // Pings are answered by tungstenite itself.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        if pipe.write_all(&data).await.is_err() {
            break;
        }
    }
    shutdown.cancel();
}

/// Pipe into outbound binary messages, plus keepalive pings. Returns the
/// outcome of closing the socket.
async fn ws_writer<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut pipe: ReadHalf<DuplexStream>,
    mut ping_rx: mpsc::Receiver<()>,
    ping_period: Duration,
    shutdown: CancellationToken,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frames = FrameAccumulator::default();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            n = pipe.read(&mut buf) => {
                let n = match n {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut failed = false;
                for frame in frames.push(&buf[..n]) {
                    if let Err(e) = sink.send(Message::Binary(frame.to_vec())).await {
                        tracing::warn!(error = %e, "websocket write failed");
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }
            _ = ticker.tick() => {
                tracing::debug!("sending ping");
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    tracing::error!(error = %e, "ping failed");
                    break;
                }
            }
            Some(()) = ping_rx.recv() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    tracing::warn!(error = %e, "probe ping failed");
                    break;
                }
            }
        }
    }

    shutdown.cancel();
    match sink.close().await {
        Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
        Err(e) => Err(e),
    }
}

// ── frame cutting ───────────────────────────────────────────────────

/// Buffers written bytes until a whole STOMP frame or a heartbeat EOL is
/// present. Frames end at their NUL terminator, or after `content-length`
/// body bytes and the NUL when the header is present.
#[derive(Debug, Default)]
pub(crate) struct FrameAccumulator {
    buf: BytesMut,
}

impl FrameAccumulator {
    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        while let Some(len) = complete_len(&self.buf) {
            out.push(self.buf.split_to(len).freeze());
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn complete_len(buf: &[u8]) -> Option<usize> {
    match buf {
        [] => return None,
        [b'\n', ..] => return Some(1),
        [b'\r', b'\n', ..] => return Some(2),
        _ => {}
    }
    if let Some(body_start) = header_end(buf) {
        if let Some(len) = content_length(&buf[..body_start]) {
            let nul = body_start + len;
            return (buf.len() > nul).then_some(nul + 1);
        }
    }
    buf.iter().position(|&b| b == 0).map(|i| i + 1)
}

fn header_end(buf: &[u8]) -> Option<usize> {
    (0..buf.len()).find_map(|i| {
        if buf[i] != b'\n' {
            return None;
        }
        let rest = &buf[i + 1..];
        if rest.starts_with(b"\n") {
            Some(i + 2)
        } else if rest.starts_with(b"\r\n") {
            Some(i + 3)
        } else {
            None
        }
    })
}

fn content_length(head: &[u8]) -> Option<usize> {
    std::str::from_utf8(head)
        .ok()?
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
}
