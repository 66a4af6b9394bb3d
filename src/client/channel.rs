//! Command socket ownership and request/response sequencing.
//!
//! [`CommandChannel`] owns the TCP command socket and serializes all
//! outstanding requests over it. Neither protocol variant carries a
//! request id usable for pipelining, so correctness depends on full
//! serialization: **at most one command is in flight per socket**. The
//! channel enforces this with a FIFO-fair async mutex held for the whole
//! write→decode round trip, which also makes concurrent callers resolve
//! in submission order.
//!
//! A command that times out is connection-fatal: the daemon offers no way
//! to cancel a specific in-flight request, so the socket is dropped and
//! the caller sees `ClientError::Timeout`. Transport and protocol errors
//! tear the socket down the same way.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::error::{ClientError, Result};
use crate::core::trace::{Direction, FrameKind, FrameRecord, FrameTraceHandler, TraceConfig};
use crate::core::traits::ProtocolVariant;

/// Installed trace sink.
#[derive(Clone)]
struct TraceSink {
    handler: Arc<dyn FrameTraceHandler>,
    config: TraceConfig,
}

struct Conn {
    stream: TcpStream,
    /// Bytes received but not yet consumed by a decoder. Responses can
    /// arrive split across reads; the decoder is re-invoked on the
    /// concatenation.
    buf: Vec<u8>,
}

/// The command socket with single-in-flight sequencing.
pub struct CommandChannel {
    variant: ProtocolVariant,
    response_timeout: Duration,
    conn: Mutex<Option<Conn>>,
    trace: RwLock<Option<TraceSink>>,
}

impl CommandChannel {
    /// Create a channel with no socket attached.
    pub fn new(variant: ProtocolVariant, response_timeout: Duration) -> Self {
        Self {
            variant,
            response_timeout,
            conn: Mutex::new(None),
            trace: RwLock::new(None),
        }
    }

    /// Install a frame trace sink.
    pub fn set_trace(&self, handler: Arc<dyn FrameTraceHandler>, config: TraceConfig) {
        if let Ok(mut t) = self.trace.write() {
            *t = Some(TraceSink { handler, config });
        }
    }

    /// Remove the frame trace sink.
    pub fn clear_trace(&self) {
        if let Ok(mut t) = self.trace.write() {
            *t = None;
        }
    }

    /// Connect the command socket.
    pub async fn open(&self, addr: &str, connect_timeout: Duration) -> Result<()> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::transport(format!("connect to {} timed out", addr)))?
            .map_err(|e| ClientError::transport(format!("connect to {} failed: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ClientError::transport(e.to_string()))?;

        let mut conn = self.conn.lock().await;
        *conn = Some(Conn {
            stream,
            buf: Vec::with_capacity(4096),
        });
        Ok(())
    }

    /// Whether a socket is currently attached.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Drop the socket (idempotent).
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        *conn = None;
    }

    /// Send one encoded command and decode its response.
    ///
    /// The internal lock is held for the whole round trip; concurrent
    /// callers queue in submission order. On timeout, transport failure
    /// or undecodable bytes the socket is dropped and the error returned.
    pub async fn roundtrip<T, F>(&self, frame: &[u8], decode: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&[u8]) -> Result<Option<(usize, T)>> + Send,
    {
        let mut replies = self.transact(frame, 1, decode).await?;
        // transact returns exactly `count` replies on success
        replies.pop().ok_or_else(|| {
            ClientError::protocol("response sequencing produced no reply".to_string())
        })
    }

    /// Send a pre-concatenated batch of commands as one socket write and
    /// drain all their responses.
    ///
    /// The single-in-flight invariant holds at batch granularity: the
    /// lock covers the write and every response. This is the
    /// latency-sensitive path used for bit-banged LED words.
    pub async fn roundtrip_batch<T, F>(
        &self,
        frame: &[u8],
        count: usize,
        decode: F,
    ) -> Result<Vec<T>>
    where
        T: Send,
        F: FnMut(&[u8]) -> Result<Option<(usize, T)>> + Send,
    {
        self.transact(frame, count, decode).await
    }

    async fn transact<T, F>(&self, frame: &[u8], count: usize, mut decode: F) -> Result<Vec<T>>
    where
        T: Send,
        F: FnMut(&[u8]) -> Result<Option<(usize, T)>> + Send,
    {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ClientError::NotConnected)?;

        self.capture(Direction::Send, frame).await;

        let result = tokio::time::timeout(self.response_timeout, async {
            conn.stream
                .write_all(frame)
                .await
                .map_err(|e| ClientError::transport(format!("command write failed: {}", e)))?;

            let mut replies = Vec::with_capacity(count);
            while replies.len() < count {
                loop {
                    match decode(&conn.buf)? {
                        Some((consumed, reply)) => {
                            let raw: Vec<u8> = conn.buf.drain(..consumed).collect();
                            self.capture(Direction::Receive, &raw).await;
                            replies.push(reply);
                            break;
                        }
                        None => {
                            let n = conn.stream.read_buf(&mut conn.buf).await.map_err(|e| {
                                ClientError::transport(format!("command read failed: {}", e))
                            })?;
                            if n == 0 {
                                return Err(ClientError::transport(
                                    "daemon closed the command socket".to_string(),
                                ));
                            }
                        }
                    }
                }
            }
            Ok(replies)
        })
        .await
        .unwrap_or(Err(ClientError::Timeout(self.response_timeout)));

        if let Err(ref e) = result {
            if e.is_fatal() {
                debug!(error = %e, "fatal command error, dropping socket");
                *guard = None;
            }
        }
        result
    }

    async fn capture(&self, direction: Direction, bytes: &[u8]) {
        let sink = match self.trace.read() {
            Ok(t) => t.clone(),
            Err(_) => None,
        };
        if let Some(sink) = sink {
            if sink.config.wants(FrameKind::Command) {
                let record = FrameRecord::capture(
                    &sink.config,
                    direction,
                    FrameKind::Command,
                    self.variant,
                    bytes,
                );
                sink.handler.on_frame(record).await;
            }
        }
    }
}
