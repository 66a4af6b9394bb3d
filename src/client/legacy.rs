//! Legacy daemon client.
//!
//! Speaks the fixed-header protocol over two sockets: commands and
//! responses on one, the 12-byte bitmap notification stream on the other.
//! Connect issues a harmless capability query (`HWVER`) to confirm the
//! daemon answers; there is no login.
//!
//! # Example
//!
//! ```rust,ignore
//! use remgpio::client::legacy::{LegacyClient, LegacyClientConfig};
//!
//! let config = LegacyClientConfig::new("192.168.1.30").with_port(8888);
//! let client = LegacyClient::new(config);
//! client.connect().await?;
//! client.listen(1 << 17).await?;
//!
//! let mut rx = client.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     // ClientEvent::Gpio(..) for edges and watchdog re-announcements
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::channel::CommandChannel;
use crate::codec::legacy::{self, op, Reply, Request};
use crate::codec::report;
use crate::core::error::{ClientError, Result};
use crate::core::event::{ClientEvent, ClientEventReceiver, ClientEventSender};
use crate::core::trace::{FrameTraceHandler, TraceConfig};
use crate::core::traits::{
    check_permitted, ConnectionState, DaemonClient, Diagnostics, GpioMode, GpioPull, GpioWrite,
    ProtocolVariant,
};
use crate::notify::NotificationPipeline;

/// Default daemon command port.
pub const DEFAULT_PORT: u16 = 8888;

/// Default permitted mask: the user GPIOs 2..27 of a stock board.
pub const DEFAULT_PERMITTED_MASK: u32 = 0x0FFF_FFFC;

/// Largest chunk requested per remote file read.
const FILE_READ_CHUNK: u32 = 65_536;

// ============================================================================
// Configuration
// ============================================================================

/// Legacy client configuration.
#[derive(Debug, Clone)]
pub struct LegacyClientConfig {
    /// Daemon host name or address.
    pub host: String,

    /// Daemon command port (the notification socket uses the same port).
    pub port: u16,

    /// Socket connect timeout.
    pub connect_timeout: Duration,

    /// Per-command response deadline.
    pub response_timeout: Duration,

    /// Bitmask of GPIOs user code may touch.
    pub permitted_mask: u32,

    /// Event bus buffer size.
    pub event_buffer: usize,
}

impl LegacyClientConfig {
    /// Create a configuration for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            permitted_mask: DEFAULT_PERMITTED_MASK,
            event_buffer: 1024,
        }
    }

    /// Set the daemon port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-command response deadline.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the permitted GPIO mask.
    pub fn with_permitted_mask(mut self, mask: u32) -> Self {
        self.permitted_mask = mask;
        self
    }

    /// `host:port` target string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Legacy client parameters for JSON/TOML configuration.
///
/// # Example JSON
///
/// ```json
/// {
///     "host": "192.168.1.30",
///     "port": 8888,
///     "response_timeout_ms": 5000
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyParamsConfig {
    /// Daemon host name or address.
    pub host: String,

    /// Daemon port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Response deadline in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Permitted GPIO mask.
    #[serde(default = "default_permitted_mask")]
    pub permitted_mask: u32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_response_timeout_ms() -> u64 {
    5000
}

fn default_permitted_mask() -> u32 {
    DEFAULT_PERMITTED_MASK
}

impl LegacyParamsConfig {
    /// Convert to a [`LegacyClientConfig`].
    pub fn to_config(&self) -> LegacyClientConfig {
        LegacyClientConfig::new(&self.host)
            .with_port(self.port)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_response_timeout(Duration::from_millis(self.response_timeout_ms))
            .with_permitted_mask(self.permitted_mask)
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Default)]
struct Stats {
    commands: AtomicU64,
    errors: AtomicU64,
    last_error: std::sync::Mutex<Option<String>>,
}

impl Stats {
    fn success(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    fn failure(&self, msg: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(msg.to_string());
        }
    }

    fn last(&self) -> Option<String> {
        self.last_error.lock().map(|l| l.clone()).unwrap_or(None)
    }
}

/// Shared connection plumbing handed to the notification reader task.
#[derive(Clone)]
struct Link {
    channel: Arc<CommandChannel>,
    state: Arc<std::sync::RwLock<ConnectionState>>,
    event_tx: ClientEventSender,
    pipeline: Arc<NotificationPipeline>,
    cleanup_done: Arc<AtomicBool>,
}

impl Link {
    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut s) = self.state.write() {
            *s = state;
        }
    }

    fn get_state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Error)
    }

    /// Connection-loss cleanup. Runs at most once per connection; both
    /// the command path and the notification reader funnel through here.
    async fn connection_lost(&self, reason: String) {
        if self.cleanup_done.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(reason = %reason, "daemon connection lost");
        self.channel.close().await;
        self.pipeline.reset();
        self.set_state(ConnectionState::Error);
        let _ = self.event_tx.send(ClientEvent::Warning(reason));
        let _ = self
            .event_tx
            .send(ClientEvent::ConnectionChanged(ConnectionState::Error));
    }
}

struct NotifySession {
    handle: u32,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Session {
    notify: Option<NotifySession>,
    open_file: Option<u32>,
}

/// Client for the legacy daemon protocol.
pub struct LegacyClient {
    config: LegacyClientConfig,
    link: Link,
    session: Mutex<Session>,
    stats: Stats,
}

impl LegacyClient {
    /// Create a client. No I/O happens until [`DaemonClient::connect`].
    pub fn new(config: LegacyClientConfig) -> Self {
        let (event_tx, _) = tokio::sync::broadcast::channel(config.event_buffer);
        let channel = Arc::new(CommandChannel::new(
            ProtocolVariant::Legacy,
            config.response_timeout,
        ));
        let pipeline = Arc::new(NotificationPipeline::new(event_tx.clone()));
        Self {
            config,
            link: Link {
                channel,
                state: Arc::new(std::sync::RwLock::new(ConnectionState::Disconnected)),
                event_tx,
                pipeline,
                cleanup_done: Arc::new(AtomicBool::new(true)),
            },
            session: Mutex::new(Session::default()),
            stats: Stats::default(),
        }
    }

    /// Install a frame trace sink on the command socket.
    pub fn set_trace(&self, handler: Arc<dyn FrameTraceHandler>, config: TraceConfig) {
        self.link.channel.set_trace(handler, config);
    }

    /// Map a fatal channel error into connection-loss cleanup.
    async fn finish<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.stats.failure(&e.to_string());
                self.link.connection_lost(e.to_string()).await;
            }
        }
        result
    }

    /// Run one command on the open connection, without auto-connect.
    async fn exec(&self, req: Request) -> Result<Reply> {
        let frame = req.encode();
        let reply = self
            .finish(self.link.channel.roundtrip(&frame, legacy::decode).await)
            .await?;

        // Correlation is keyed on the opcode alone; the single-in-flight
        // invariant is what makes this safe.
        if reply.opcode != req.opcode {
            let e = ClientError::protocol(format!(
                "response opcode {} does not match request {}",
                reply.opcode, req.opcode
            ));
            self.stats.failure(&e.to_string());
            self.link.connection_lost(e.to_string()).await;
            return Err(e);
        }

        if reply.status() < 0 {
            let code = reply.status();
            let message = legacy::error_message(code);
            self.stats.failure(&message);
            return Err(ClientError::Daemon { code, message });
        }

        self.stats.success();
        Ok(reply)
    }

    /// Run one command, connecting first if necessary.
    async fn cmd(&self, req: Request) -> Result<Reply> {
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        self.exec(req).await
    }

    /// Open the notification socket and perform the `NOIB` handshake,
    /// returning the socket and the daemon's notification handle.
    async fn open_notify_socket(&self) -> Result<(TcpStream, u32)> {
        let addr = self.config.addr();
        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| ClientError::transport(format!("notify connect to {} timed out", addr)))?
        .map_err(|e| ClientError::transport(format!("notify connect to {} failed: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ClientError::transport(e.to_string()))?;

        use tokio::io::AsyncWriteExt;
        let frame = Request::new(op::NOIB, 0, 0).encode();
        stream
            .write_all(&frame)
            .await
            .map_err(|e| ClientError::transport(format!("notify handshake write failed: {}", e)))?;

        let mut buf = Vec::with_capacity(64);
        let reply = loop {
            if let Some((consumed, reply)) = legacy::decode(&buf)? {
                buf.drain(..consumed);
                break reply;
            }
            let n = stream
                .read_buf(&mut buf)
                .await
                .map_err(|e| ClientError::transport(format!("notify handshake read failed: {}", e)))?;
            if n == 0 {
                return Err(ClientError::transport(
                    "daemon closed the notification socket during handshake".to_string(),
                ));
            }
        };

        if reply.status() < 0 {
            let code = reply.status();
            return Err(ClientError::Daemon {
                code,
                message: legacy::error_message(code),
            });
        }
        Ok((stream, reply.value()))
    }
}

async fn run_notify_reader(mut stream: TcpStream, link: Link) {
    let mut buf = Vec::with_capacity(1024);
    loop {
        while let Some((consumed, packet)) = report::decode_bitmap(&buf) {
            buf.drain(..consumed);
            link.pipeline.ingest_bitmap(&packet);
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) => {
                link.connection_lost("daemon closed the notification socket".to_string())
                    .await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                link.connection_lost(format!("notification read failed: {}", e))
                    .await;
                break;
            }
        }
    }
}

#[async_trait]
impl DaemonClient for LegacyClient {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Legacy
    }

    fn connection_state(&self) -> ConnectionState {
        self.link.get_state()
    }

    fn permitted_mask(&self) -> u32 {
        self.config.permitted_mask
    }

    fn subscribe(&self) -> ClientEventReceiver {
        self.link.event_tx.subscribe()
    }

    async fn connect(&self) -> Result<()> {
        if self.connection_state().is_connected() {
            return Ok(());
        }
        self.link.set_state(ConnectionState::Connecting);

        let attempt = async {
            self.link
                .channel
                .open(&self.config.addr(), self.config.connect_timeout)
                .await?;
            self.link.cleanup_done.store(false, Ordering::SeqCst);
            // Liveness: a harmless capability query must answer.
            let reply = self.exec(Request::new(op::HWVER, 0, 0)).await?;
            debug!(hardware_revision = reply.value(), "daemon answered");
            Ok::<(), ClientError>(())
        };

        match attempt.await {
            Ok(()) => {
                self.link.set_state(ConnectionState::Connected);
                let _ = self
                    .link
                    .event_tx
                    .send(ClientEvent::ConnectionChanged(ConnectionState::Connected));
                Ok(())
            }
            Err(e) => {
                self.stats.failure(&e.to_string());
                self.link.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;

        if !self.link.cleanup_done.swap(true, Ordering::SeqCst) {
            // Release remote handles best-effort; the socket is being
            // discarded regardless, so failures only warrant warnings.
            if let Some(notify) = session.notify.take() {
                if let Err(e) = self.exec(Request::new(op::NC, notify.handle, 0)).await {
                    warn!(error = %e, "failed to release notification handle");
                    let _ = self.link.event_tx.send(ClientEvent::Warning(format!(
                        "failed to release notification handle: {}",
                        e
                    )));
                }
                notify.task.abort();
            }
            if let Some(handle) = session.open_file.take() {
                if let Err(e) = self.exec(Request::new(op::FC, handle, 0)).await {
                    warn!(error = %e, "failed to close remote file handle");
                }
            }
        } else if let Some(notify) = session.notify.take() {
            // Loss path already ran; just stop the reader.
            notify.task.abort();
        }

        self.link.channel.close().await;
        self.link.pipeline.reset();
        self.link.set_state(ConnectionState::Disconnected);
        let _ = self
            .link
            .event_tx
            .send(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
        Ok(())
    }

    async fn gpio_mode(&self, gpio: u8, mode: GpioMode) -> Result<()> {
        check_permitted(gpio, self.config.permitted_mask)?;
        let mode = match mode {
            GpioMode::Input => legacy::MODE_INPUT,
            GpioMode::Output => legacy::MODE_OUTPUT,
        };
        self.cmd(Request::new(op::MODES, gpio as u32, mode)).await?;
        Ok(())
    }

    async fn gpio_pull(&self, gpio: u8, pull: GpioPull) -> Result<()> {
        check_permitted(gpio, self.config.permitted_mask)?;
        let pud = match pull {
            GpioPull::Off => legacy::PUD_OFF,
            GpioPull::Down => legacy::PUD_DOWN,
            GpioPull::Up => legacy::PUD_UP,
        };
        self.cmd(Request::new(op::PUD, gpio as u32, pud)).await?;
        Ok(())
    }

    async fn gpio_read(&self, gpio: u8) -> Result<bool> {
        check_permitted(gpio, self.config.permitted_mask)?;
        let reply = self.cmd(Request::new(op::READ, gpio as u32, 0)).await?;
        Ok(reply.value() != 0)
    }

    async fn gpio_write(&self, gpio: u8, level: bool) -> Result<()> {
        check_permitted(gpio, self.config.permitted_mask)?;
        self.cmd(Request::new(op::WRITE, gpio as u32, level as u32))
            .await?;
        Ok(())
    }

    async fn gpio_write_batch(&self, writes: &[GpioWrite]) -> Result<()> {
        for w in writes {
            check_permitted(w.gpio, self.config.permitted_mask)?;
        }
        if writes.is_empty() {
            return Ok(());
        }
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }

        let mut frame = Vec::with_capacity(writes.len() * legacy::HEADER_LEN);
        for w in writes {
            frame.extend_from_slice(
                &Request::new(op::WRITE, w.gpio as u32, w.level as u32).encode(),
            );
        }

        let replies = self
            .finish(
                self.link
                    .channel
                    .roundtrip_batch(&frame, writes.len(), legacy::decode)
                    .await,
            )
            .await?;
        for reply in &replies {
            if reply.status() < 0 {
                let code = reply.status();
                let message = legacy::error_message(code);
                self.stats.failure(&message);
                return Err(ClientError::Daemon { code, message });
            }
        }
        self.stats.success();
        Ok(())
    }

    async fn read_bank(&self) -> Result<u32> {
        let reply = self.cmd(Request::new(op::BR1, 0, 0)).await?;
        Ok(reply.value())
    }

    async fn set_watchdog(&self, gpio: u8, millis: u32) -> Result<()> {
        check_permitted(gpio, self.config.permitted_mask)?;
        self.cmd(Request::new(op::WDOG, gpio as u32, millis)).await?;
        Ok(())
    }

    async fn listen(&self, mask: u32) -> Result<()> {
        if mask & !self.config.permitted_mask != 0 {
            return Err(ClientError::validation(format!(
                "listen mask {:#010x} exceeds the permitted mask {:#010x}",
                mask, self.config.permitted_mask
            )));
        }
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }

        let mut session = self.session.lock().await;

        let handle = match &session.notify {
            Some(notify) => notify.handle,
            None => {
                let (stream, handle) = self.open_notify_socket().await?;
                let task = tokio::spawn(run_notify_reader(stream, self.link.clone()));
                session.notify = Some(NotifySession { handle, task });
                handle
            }
        };

        // Prime the pipeline before arming delivery so the synthetic
        // initial events precede anything the daemon streams.
        let levels = self.exec(Request::new(op::BR1, 0, 0)).await?.value();
        let tick = self.exec(Request::new(op::TICK, 0, 0)).await?.value();
        self.link.pipeline.prime_legacy(mask, levels, tick);
        self.exec(Request::new(op::NB, handle, mask)).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let mut session = self.session.lock().await;

        let open = self
            .cmd(Request::new(op::FO, legacy::FILE_READ, 0).with_ext(path.as_bytes().to_vec()))
            .await?;
        let handle = open.status() as u32;
        session.open_file = Some(handle);

        let mut text = Vec::new();
        let result = loop {
            match self
                .exec(Request::new(op::FR, handle, FILE_READ_CHUNK))
                .await
            {
                Ok(reply) => {
                    if reply.ext.is_empty() {
                        break Ok(());
                    }
                    text.extend_from_slice(&reply.ext);
                }
                Err(e) => break Err(e),
            }
        };

        let close = self.exec(Request::new(op::FC, handle, 0)).await;
        session.open_file = None;
        if let Err(e) = close {
            warn!(error = %e, "failed to close remote file handle");
        }

        result?;
        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    async fn write_file(&self, path: &str, text: &str) -> Result<()> {
        let mut session = self.session.lock().await;

        let mode = legacy::FILE_WRITE | legacy::FILE_CREATE | legacy::FILE_TRUNC;
        let open = self
            .cmd(Request::new(op::FO, mode, 0).with_ext(path.as_bytes().to_vec()))
            .await?;
        let handle = open.status() as u32;
        session.open_file = Some(handle);

        let result = self
            .exec(Request::new(op::FW, handle, 0).with_ext(text.as_bytes().to_vec()))
            .await
            .map(|_| ());

        let close = self.exec(Request::new(op::FC, handle, 0)).await;
        session.open_file = None;
        if let Err(e) = close {
            warn!(error = %e, "failed to close remote file handle");
        }
        result
    }

    async fn shell(&self, script: &str) -> Result<i32> {
        let reply = self
            .cmd(Request::new(op::SHELL, 0, 0).with_ext(script.as_bytes().to_vec()))
            .await?;
        Ok(reply.status())
    }

    async fn diagnostics(&self) -> Result<Diagnostics> {
        Ok(Diagnostics {
            variant: self.variant().to_string(),
            connection_state: self.connection_state(),
            command_count: self.stats.commands.load(Ordering::Relaxed),
            notify_count: self.link.pipeline.packet_count(),
            error_count: self.stats.errors.load(Ordering::Relaxed),
            last_error: self.stats.last(),
            extra: serde_json::json!({
                "host": self.config.host,
                "port": self.config.port,
                "subscription_mask": self.link.pipeline.mask(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Minimal in-process daemon speaking the legacy protocol.
    ///
    /// The first accepted connection is treated as the command socket;
    /// the second as the notification socket (NOIB handshake, then one
    /// bitmap report per armed mask change).
    async fn spawn_mock_daemon() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // Signals the notification task once NB has armed delivery.
            let (nb_tx, nb_rx) = tokio::sync::oneshot::channel::<()>();
            let mut nb_tx = Some(nb_tx);

            // Command socket.
            let (mut cmd, _) = listener.accept().await.unwrap();
            let cmd_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut file_drained = false;
                loop {
                    let req = loop {
                        match legacy::decode_request(&buf) {
                            Ok(Some((consumed, req))) => {
                                buf.drain(..consumed);
                                break req;
                            }
                            Ok(None) => {
                                let n = match cmd.read_buf(&mut buf).await {
                                    Ok(n) => n,
                                    Err(_) => return,
                                };
                                if n == 0 {
                                    return;
                                }
                            }
                            Err(_) => return,
                        }
                    };

                    let mut reply_ext: Vec<u8> = Vec::new();
                    let result: u32 = match req.opcode {
                        op::HWVER => 0x00A2_2082,
                        op::READ => 1,
                        op::BR1 => 0b100, // GPIO 2 high
                        op::TICK => 1_000,
                        op::NB => {
                            if let Some(tx) = nb_tx.take() {
                                let _ = tx.send(());
                            }
                            0
                        }
                        op::MODES | op::PUD | op::WRITE | op::WDOG | op::NC | op::FC => 0,
                        op::FO => 7, // file handle
                        op::FR => {
                            if file_drained {
                                0
                            } else {
                                file_drained = true;
                                reply_ext = b"remote contents".to_vec();
                                reply_ext.len() as u32
                            }
                        }
                        op::FW => 0,
                        op::SHELL => 0,
                        // Simulate a daemon rejection for servo pulses.
                        op::SERVO => (-5i32) as u32,
                        _ => 0,
                    };

                    let mut out = Vec::new();
                    out.extend_from_slice(&req.opcode.to_le_bytes());
                    out.extend_from_slice(&req.p1.to_le_bytes());
                    out.extend_from_slice(&req.p2.to_le_bytes());
                    out.extend_from_slice(&result.to_le_bytes());
                    out.extend_from_slice(&reply_ext);
                    if cmd.write_all(&out).await.is_err() {
                        return;
                    }
                }
            });

            // Notification socket.
            if let Ok((mut ntfy, _)) = listener.accept().await {
                let mut hdr = [0u8; legacy::HEADER_LEN];
                if ntfy.read_exact(&mut hdr).await.is_ok() {
                    let (_, req) = legacy::decode_request(&hdr).unwrap().unwrap();
                    assert_eq!(req.opcode, op::NOIB);
                    let mut out = Vec::new();
                    out.extend_from_slice(&req.opcode.to_le_bytes());
                    out.extend_from_slice(&0u32.to_le_bytes());
                    out.extend_from_slice(&0u32.to_le_bytes());
                    out.extend_from_slice(&3u32.to_le_bytes()); // handle
                    ntfy.write_all(&out).await.unwrap();

                    // Wait until NB has armed delivery, then stream one
                    // live report: GPIO 2 falls at tick 2000.
                    let _ = nb_rx.await;
                    let mut packet = Vec::new();
                    packet.extend_from_slice(&0u16.to_le_bytes());
                    packet.extend_from_slice(&0u16.to_le_bytes());
                    packet.extend_from_slice(&2_000u32.to_le_bytes());
                    packet.extend_from_slice(&0u32.to_le_bytes());
                    ntfy.write_all(&packet).await.unwrap();

                    // Keep the socket open until the client goes away.
                    let mut sink = [0u8; 64];
                    while let Ok(n) = ntfy.read(&mut sink).await {
                        if n == 0 {
                            break;
                        }
                    }
                }
            }
            let _ = cmd_task.await;
        });

        addr
    }

    fn client_for(addr: SocketAddr) -> LegacyClient {
        let config = LegacyClientConfig::new(addr.ip().to_string())
            .with_port(addr.port())
            .with_permitted_mask(0xFFFF_FFFF)
            .with_response_timeout(Duration::from_secs(2));
        LegacyClient::new(config)
    }

    #[tokio::test]
    async fn test_connect_runs_liveness_query() {
        let addr = spawn_mock_daemon().await;
        let client = client_for(addr);

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        client.connect().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);

        assert!(client.gpio_read(2).await.unwrap());
        client.disconnect().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_daemon_error_is_local_to_the_command() {
        let addr = spawn_mock_daemon().await;
        let client = client_for(addr);
        client.connect().await.unwrap();

        let err = client
            .cmd(Request::new(op::SERVO, 17, 40_000))
            .await
            .unwrap_err();
        match err {
            ClientError::Daemon { code, message } => {
                assert_eq!(code, -5);
                assert_eq!(message, "pulsewidth not 0 or 500-2500");
            }
            other => panic!("expected daemon error, got {:?}", other),
        }

        // The connection survives a daemon error.
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert!(client.gpio_read(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_listen_primes_then_streams() {
        let addr = spawn_mock_daemon().await;
        let client = client_for(addr);
        client.connect().await.unwrap();

        let mut rx = client.subscribe();
        client.listen(0b100).await.unwrap();

        // Synthetic initial event first: GPIO 2 is high per BR1.
        let initial = loop {
            if let ClientEvent::Gpio(ev) = rx.recv().await.unwrap() {
                break ev;
            }
        };
        assert_eq!(initial.gpio, 2);
        assert!(initial.level);
        assert!(!initial.watchdog);

        // Then the live falling edge from the report stream.
        let live = loop {
            if let ClientEvent::Gpio(ev) = rx.recv().await.unwrap() {
                break ev;
            }
        };
        assert_eq!(live.gpio, 2);
        assert!(!live.level);
        assert_eq!(live.tick_us - initial.tick_us, 1_000);

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_rejects_forbidden_gpio_before_io() {
        let config = LegacyClientConfig::new("127.0.0.1").with_permitted_mask(0b1100);
        let client = LegacyClient::new(config);

        // No daemon is listening; a validation error must fire before
        // any connect attempt.
        let err = client.gpio_write(5, true).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));

        let err = client.listen(0b1111).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn test_remote_file_helpers() {
        let addr = spawn_mock_daemon().await;
        let client = client_for(addr);
        client.connect().await.unwrap();

        let text = client.read_file("/etc/hostname").await.unwrap();
        assert_eq!(text, "remote contents");

        client.write_file("/tmp/out", "payload").await.unwrap();
        assert_eq!(client.shell("true").await.unwrap(), 0);
    }
}
