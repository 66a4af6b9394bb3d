//! Current daemon client.
//!
//! Speaks the magic-prefixed protocol with authenticated sessions: every
//! socket performs a challenge/response login (the server hello carries a
//! salt and the daemon user identity; the client announces its user name
//! and proves the password with an MD5 digest of salt ‖ password ‖
//! nonce). Connect additionally opens the default GPIO chip and keeps its
//! handle for the session. Notifications are 16-byte per-line reports on
//! a dedicated socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::channel::CommandChannel;
use crate::codec::current::{self, op, Reply, Request};
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
pub const DEFAULT_PORT: u16 = 8889;

/// Default permitted mask: the user GPIOs 2..27 of a stock board.
pub const DEFAULT_PERMITTED_MASK: u32 = 0x0FFF_FFFC;

/// Largest chunk requested per remote file read.
const FILE_READ_CHUNK: i32 = 65_536;

/// Compute the login password proof: hex MD5 of salt ‖ password ‖ nonce.
pub fn login_proof(salt: &str, password: &str, nonce: &str) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// Configuration
// ============================================================================

/// Current client configuration.
#[derive(Debug, Clone)]
pub struct CurrentClientConfig {
    /// Daemon host name or address.
    pub host: String,

    /// Daemon port (notification socket uses the same port).
    pub port: u16,

    /// User name announced at login.
    pub user: String,

    /// Password used for the login proof.
    pub password: String,

    /// GPIO chip opened at connect time.
    pub chip: String,

    /// Socket connect timeout.
    pub connect_timeout: Duration,

    /// Per-command response deadline.
    pub response_timeout: Duration,

    /// Bitmask of GPIOs user code may touch.
    pub permitted_mask: u32,

    /// Event bus buffer size.
    pub event_buffer: usize,
}

impl CurrentClientConfig {
    /// Create a configuration for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: "default".to_string(),
            password: String::new(),
            chip: "gpiochip0".to_string(),
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

    /// Set the login user name.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the login password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the GPIO chip opened at connect time.
    pub fn with_chip(mut self, chip: impl Into<String>) -> Self {
        self.chip = chip.into();
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

/// Current client parameters for JSON/TOML configuration.
///
/// # Example JSON
///
/// ```json
/// {
///     "host": "192.168.1.30",
///     "port": 8889,
///     "user": "hub",
///     "password": "secret"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentParamsConfig {
    /// Daemon host name or address.
    pub host: String,

    /// Daemon port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user name.
    #[serde(default = "default_user")]
    pub user: String,

    /// Login password.
    #[serde(default)]
    pub password: String,

    /// GPIO chip name.
    #[serde(default = "default_chip")]
    pub chip: String,

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

fn default_user() -> String {
    "default".to_string()
}

fn default_chip() -> String {
    "gpiochip0".to_string()
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

impl CurrentParamsConfig {
    /// Convert to a [`CurrentClientConfig`].
    pub fn to_config(&self) -> CurrentClientConfig {
        CurrentClientConfig::new(&self.host)
            .with_port(self.port)
            .with_user(&self.user)
            .with_password(&self.password)
            .with_chip(&self.chip)
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
    handle: i32,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Session {
    chip: Option<i32>,
    notify: Option<NotifySession>,
    open_file: Option<i32>,
}

/// Client for the current daemon protocol.
pub struct CurrentClient {
    config: CurrentClientConfig,
    link: Link,
    session: Mutex<Session>,
    stats: Stats,
}

impl CurrentClient {
    /// Create a client. No I/O happens until [`DaemonClient::connect`].
    pub fn new(config: CurrentClientConfig) -> Self {
        let (event_tx, _) = tokio::sync::broadcast::channel(config.event_buffer);
        let channel = Arc::new(CommandChannel::new(
            ProtocolVariant::Current,
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
        let opcode = req.opcode;
        let frame = req.encode();
        let reply = self
            .finish(self.link.channel.roundtrip(&frame, current::decode).await)
            .await?;

        if reply.opcode != opcode {
            let e = ClientError::protocol(format!(
                "response opcode {} does not match request {}",
                reply.opcode, opcode
            ));
            self.stats.failure(&e.to_string());
            self.link.connection_lost(e.to_string()).await;
            return Err(e);
        }

        if reply.status < 0 {
            let code = reply.status;
            let message = current::error_message(code);
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

    /// Chip handle opened at connect time.
    async fn chip_handle(&self) -> Result<i32> {
        self.session
            .lock()
            .await
            .chip
            .ok_or(ClientError::NotConnected)
    }

    /// Challenge/response login over the command channel.
    async fn login_via_channel(&self) -> Result<()> {
        let hello = self.exec(Request::new(op::LOGIN_SALT)).await?;
        let (salt, nonce, daemon_user) = parse_hello(&hello)?;
        debug!(daemon_user = %daemon_user, "daemon hello received");

        self.exec(Request::new(op::LOGIN_USER).with_text(&self.config.user))
            .await?;
        let proof = login_proof(&salt, &self.config.password, &nonce);
        self.exec(Request::new(op::LOGIN_PASS).with_text(&proof))
            .await?;
        Ok(())
    }

    /// Challenge/response login over a raw socket (the notification
    /// socket authenticates independently).
    async fn login_on(&self, stream: &mut TcpStream) -> Result<()> {
        let hello = raw_roundtrip(stream, Request::new(op::LOGIN_SALT)).await?;
        let (salt, nonce, _) = parse_hello(&hello)?;

        raw_roundtrip(stream, Request::new(op::LOGIN_USER).with_text(&self.config.user)).await?;
        let proof = login_proof(&salt, &self.config.password, &nonce);
        raw_roundtrip(stream, Request::new(op::LOGIN_PASS).with_text(&proof)).await?;
        Ok(())
    }

    /// Open and authenticate the notification socket, returning the
    /// socket and the daemon's notification handle.
    async fn open_notify_socket(&self) -> Result<(TcpStream, i32)> {
        let addr = self.config.addr();
        let mut stream =
            tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| {
                    ClientError::transport(format!("notify connect to {} timed out", addr))
                })?
                .map_err(|e| {
                    ClientError::transport(format!("notify connect to {} failed: {}", addr, e))
                })?;
        stream
            .set_nodelay(true)
            .map_err(|e| ClientError::transport(e.to_string()))?;

        self.login_on(&mut stream).await?;
        let opened = raw_roundtrip(&mut stream, Request::new(op::NOTIFY_OPEN)).await?;
        if opened.status < 0 {
            return Err(ClientError::Daemon {
                code: opened.status,
                message: current::error_message(opened.status),
            });
        }
        Ok((stream, opened.status))
    }
}

fn parse_hello(reply: &Reply) -> Result<(String, String, String)> {
    let text = reply.text();
    let mut parts = text.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(salt), Some(nonce), Some(user)) => {
            Ok((salt.to_string(), nonce.to_string(), user.to_string()))
        }
        _ => Err(ClientError::protocol(format!(
            "malformed login hello: {:?}",
            text
        ))),
    }
}

/// One request/response exchange on a raw (non-channel) socket.
async fn raw_roundtrip(stream: &mut TcpStream, req: Request) -> Result<Reply> {
    let frame = req.encode();
    stream
        .write_all(&frame)
        .await
        .map_err(|e| ClientError::transport(format!("session write failed: {}", e)))?;

    let mut buf = Vec::with_capacity(256);
    let reply = loop {
        if let Some((consumed, reply)) = current::decode(&buf)? {
            buf.drain(..consumed);
            break reply;
        }
        let n = stream
            .read_buf(&mut buf)
            .await
            .map_err(|e| ClientError::transport(format!("session read failed: {}", e)))?;
        if n == 0 {
            return Err(ClientError::transport(
                "daemon closed the socket during session setup".to_string(),
            ));
        }
    };

    if reply.status < 0 {
        return Err(ClientError::Daemon {
            code: reply.status,
            message: current::error_message(reply.status),
        });
    }
    Ok(reply)
}

/// Reassemble a 64-bit nanosecond tick from a hi/lo long pair.
fn tick_from_longs(reply: &Reply) -> u64 {
    let hi = reply.long(0).unwrap_or(0) as u32 as u64;
    let lo = reply.long(1).unwrap_or(0) as u32 as u64;
    (hi << 32) | lo
}

async fn run_notify_reader(mut stream: TcpStream, link: Link, handle: i32) {
    let mut buf = Vec::with_capacity(1024);
    loop {
        while let Some((consumed, packet)) = report::decode_line(&buf) {
            buf.drain(..consumed);
            if packet.handle == handle as u32 {
                link.pipeline.ingest_line(&packet);
            }
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
impl DaemonClient for CurrentClient {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Current
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
            self.login_via_channel().await?;

            // The session works against one chip; open it now.
            let opened = self
                .exec(Request::new(op::CHIP_OPEN).with_text(&self.config.chip))
                .await?;
            self.session.lock().await.chip = Some(opened.status);
            debug!(chip = %self.config.chip, handle = opened.status, "chip opened");
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
            if let Some(notify) = session.notify.take() {
                if let Err(e) = self
                    .exec(Request::new(op::NOTIFY_CLOSE).with_long(notify.handle))
                    .await
                {
                    warn!(error = %e, "failed to release notification handle");
                    let _ = self.link.event_tx.send(ClientEvent::Warning(format!(
                        "failed to release notification handle: {}",
                        e
                    )));
                }
                notify.task.abort();
            }
            if let Some(handle) = session.open_file.take() {
                if let Err(e) = self
                    .exec(Request::new(op::FILE_CLOSE).with_long(handle))
                    .await
                {
                    warn!(error = %e, "failed to close remote file handle");
                }
            }
            if let Some(chip) = session.chip.take() {
                if let Err(e) = self.exec(Request::new(op::CHIP_CLOSE).with_long(chip)).await {
                    warn!(error = %e, "failed to close chip handle");
                }
            }
        } else {
            if let Some(notify) = session.notify.take() {
                notify.task.abort();
            }
            session.chip = None;
            session.open_file = None;
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
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let chip = self.chip_handle().await?;
        let opcode = match mode {
            GpioMode::Input => op::CLAIM_INPUT,
            GpioMode::Output => op::CLAIM_OUTPUT,
        };
        self.exec(
            Request::new(opcode)
                .with_long(chip)
                .with_long(current::PULL_NONE)
                .with_short(gpio as i16),
        )
        .await?;
        Ok(())
    }

    async fn gpio_pull(&self, gpio: u8, pull: GpioPull) -> Result<()> {
        check_permitted(gpio, self.config.permitted_mask)?;
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let chip = self.chip_handle().await?;
        let flag = match pull {
            GpioPull::Off => current::PULL_NONE,
            GpioPull::Up => current::PULL_UP,
            GpioPull::Down => current::PULL_DOWN,
        };
        self.exec(
            Request::new(op::CLAIM_INPUT)
                .with_long(chip)
                .with_long(flag)
                .with_short(gpio as i16),
        )
        .await?;
        Ok(())
    }

    async fn gpio_read(&self, gpio: u8) -> Result<bool> {
        check_permitted(gpio, self.config.permitted_mask)?;
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let chip = self.chip_handle().await?;
        let reply = self
            .exec(
                Request::new(op::GPIO_READ)
                    .with_long(chip)
                    .with_short(gpio as i16),
            )
            .await?;
        Ok(reply.status != 0)
    }

    async fn gpio_write(&self, gpio: u8, level: bool) -> Result<()> {
        check_permitted(gpio, self.config.permitted_mask)?;
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let chip = self.chip_handle().await?;
        self.exec(
            Request::new(op::GPIO_WRITE)
                .with_long(chip)
                .with_short(gpio as i16)
                .with_short(level as i16),
        )
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
        let chip = self.chip_handle().await?;

        let mut frame = Vec::with_capacity(writes.len() * (current::HEADER_LEN + 8));
        for w in writes {
            frame.extend_from_slice(
                &Request::new(op::GPIO_WRITE)
                    .with_long(chip)
                    .with_short(w.gpio as i16)
                    .with_short(w.level as i16)
                    .encode(),
            );
        }

        let replies = self
            .finish(
                self.link
                    .channel
                    .roundtrip_batch(&frame, writes.len(), current::decode)
                    .await,
            )
            .await?;
        for reply in &replies {
            if reply.status < 0 {
                let code = reply.status;
                let message = current::error_message(code);
                self.stats.failure(&message);
                return Err(ClientError::Daemon { code, message });
            }
        }
        self.stats.success();
        Ok(())
    }

    async fn read_bank(&self) -> Result<u32> {
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let chip = self.chip_handle().await?;
        let reply = self
            .exec(Request::new(op::GROUP_READ).with_long(chip))
            .await?;
        Ok(reply.long(0).unwrap_or(0) as u32)
    }

    async fn set_watchdog(&self, gpio: u8, millis: u32) -> Result<()> {
        check_permitted(gpio, self.config.permitted_mask)?;
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let chip = self.chip_handle().await?;
        self.exec(
            Request::new(op::WATCHDOG)
                .with_long(chip)
                .with_long((millis as i64 * 1_000).min(i32::MAX as i64) as i32)
                .with_short(gpio as i16),
        )
        .await?;
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
        let chip = self.chip_handle().await?;

        let mut session = self.session.lock().await;
        let handle = match &session.notify {
            Some(notify) => notify.handle,
            None => {
                let (stream, handle) = self.open_notify_socket().await?;
                let task = tokio::spawn(run_notify_reader(stream, self.link.clone(), handle));
                session.notify = Some(NotifySession { handle, task });
                handle
            }
        };

        // Prime the pipeline before claiming alerts so the synthetic
        // initial events precede anything the daemon streams.
        let levels = self
            .exec(Request::new(op::GROUP_READ).with_long(chip))
            .await?
            .long(0)
            .unwrap_or(0) as u32;
        let tick_ns = tick_from_longs(&self.exec(Request::new(op::TICK)).await?);
        self.link.pipeline.prime_current(mask, levels, tick_ns);

        for gpio in 0..32u8 {
            if mask & (1u32 << gpio) != 0 {
                self.exec(
                    Request::new(op::ALERT_CLAIM)
                        .with_long(chip)
                        .with_long(handle)
                        .with_short(gpio as i16),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let mut session = self.session.lock().await;

        let open = self
            .exec(
                Request::new(op::FILE_OPEN)
                    .with_long(current::FILE_READ_MODE)
                    .with_text(path),
            )
            .await?;
        let handle = open.status;
        session.open_file = Some(handle);

        let mut text = Vec::new();
        let result = loop {
            match self
                .exec(
                    Request::new(op::FILE_READ)
                        .with_long(handle)
                        .with_long(FILE_READ_CHUNK),
                )
                .await
            {
                Ok(reply) => {
                    if reply.tail.is_empty() {
                        break Ok(());
                    }
                    text.extend_from_slice(&reply.tail);
                }
                Err(e) => break Err(e),
            }
        };

        let close = self.exec(Request::new(op::FILE_CLOSE).with_long(handle)).await;
        session.open_file = None;
        if let Err(e) = close {
            warn!(error = %e, "failed to close remote file handle");
        }

        result?;
        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    async fn write_file(&self, path: &str, text: &str) -> Result<()> {
        if !self.connection_state().is_connected() {
            self.connect().await?;
        }
        let mut session = self.session.lock().await;

        let mode =
            current::FILE_WRITE_MODE | current::FILE_CREATE_MODE | current::FILE_TRUNC_MODE;
        let open = self
            .exec(Request::new(op::FILE_OPEN).with_long(mode).with_text(path))
            .await?;
        let handle = open.status;
        session.open_file = Some(handle);

        let result = self
            .exec(
                Request::new(op::FILE_WRITE)
                    .with_long(handle)
                    .with_buf(text.as_bytes().to_vec()),
            )
            .await
            .map(|_| ());

        let close = self.exec(Request::new(op::FILE_CLOSE).with_long(handle)).await;
        session.open_file = None;
        if let Err(e) = close {
            warn!(error = %e, "failed to close remote file handle");
        }
        result
    }

    async fn shell(&self, script: &str) -> Result<i32> {
        let reply = self.cmd(Request::new(op::SHELL).with_text(script)).await?;
        Ok(reply.status)
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
                "user": self.config.user,
                "chip": self.config.chip,
                "subscription_mask": self.link.pipeline.mask(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::report::{LEVEL_LOW, LINE_REPORT_LEN};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    const SALT: &str = "s4lt";
    const NONCE: &str = "n0nce";
    const PASSWORD: &str = "secret";

    fn hello_reply() -> Reply {
        let mut reply = Reply::status_only(op::LOGIN_SALT, 0);
        reply.tail = format!("{} {} gpiod\0", SALT, NONCE).into_bytes();
        reply
    }

    /// Serve the login exchange on a freshly accepted socket. Returns
    /// false if the password proof was rejected.
    async fn serve_login(stream: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
        for _ in 0..3 {
            let req = read_request(stream, buf).await;
            let reply = match req.opcode {
                op::LOGIN_SALT => hello_reply(),
                op::LOGIN_USER => Reply::status_only(op::LOGIN_USER, 0),
                op::LOGIN_PASS => {
                    let expected = login_proof(SALT, PASSWORD, NONCE);
                    let got = String::from_utf8_lossy(&req.tail)
                        .trim_end_matches('\0')
                        .to_string();
                    if got == expected {
                        Reply::status_only(op::LOGIN_PASS, 0)
                    } else {
                        let reply = Reply::status_only(op::LOGIN_PASS, -8);
                        stream.write_all(&reply.encode()).await.unwrap();
                        // Give the client time to read the rejection
                        // before the socket drops.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        return false;
                    }
                }
                other => panic!("unexpected opcode {} during login", other),
            };
            stream.write_all(&reply.encode()).await.unwrap();
        }
        true
    }

    async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Request {
        loop {
            match current::decode_request(buf) {
                Ok(Some((consumed, req))) => {
                    buf.drain(..consumed);
                    return req;
                }
                Ok(None) => {
                    let n = stream.read_buf(buf).await.unwrap();
                    assert_ne!(n, 0, "client closed mid-request");
                }
                Err(e) => panic!("bad request: {}", e),
            }
        }
    }

    async fn spawn_mock_daemon() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (alert_tx, alert_rx) = tokio::sync::oneshot::channel::<()>();
            let mut alert_tx = Some(alert_tx);

            // Command socket.
            let (mut cmd, _) = listener.accept().await.unwrap();
            let cmd_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if !serve_login(&mut cmd, &mut buf).await {
                    return;
                }
                let mut file_drained = false;
                loop {
                    let req = read_request(&mut cmd, &mut buf).await;
                    let reply = match req.opcode {
                        op::CHIP_OPEN => Reply::status_only(op::CHIP_OPEN, 4),
                        op::GPIO_READ => Reply::status_only(op::GPIO_READ, 1),
                        op::GROUP_READ => {
                            let mut r = Reply::status_only(op::GROUP_READ, 0);
                            r.longs = vec![0b100]; // GPIO 2 high
                            r
                        }
                        op::TICK => {
                            let mut r = Reply::status_only(op::TICK, 0);
                            r.longs = vec![0, 5_000_000]; // 5 ms in ns
                            r
                        }
                        op::ALERT_CLAIM => {
                            if let Some(tx) = alert_tx.take() {
                                let _ = tx.send(());
                            }
                            Reply::status_only(op::ALERT_CLAIM, 0)
                        }
                        op::FILE_OPEN => Reply::status_only(op::FILE_OPEN, 9),
                        op::FILE_READ => {
                            if file_drained {
                                Reply::status_only(op::FILE_READ, 0)
                            } else {
                                file_drained = true;
                                let mut r = Reply::status_only(
                                    op::FILE_READ,
                                    "remote contents".len() as i32,
                                );
                                r.tail = b"remote contents".to_vec();
                                r
                            }
                        }
                        // Simulate a rejected claim on one opcode.
                        op::TX_SERVO => Reply::status_only(op::TX_SERVO, -39),
                        other => Reply::status_only(other, 0),
                    };
                    if cmd.write_all(&reply.encode()).await.is_err() {
                        return;
                    }
                }
            });

            // Notification socket: login, NOTIFY_OPEN, then one report
            // once alerts are armed.
            if let Ok((mut ntfy, _)) = listener.accept().await {
                let mut buf = Vec::new();
                if serve_login(&mut ntfy, &mut buf).await {
                    let req = read_request(&mut ntfy, &mut buf).await;
                    assert_eq!(req.opcode, op::NOTIFY_OPEN);
                    ntfy.write_all(&Reply::status_only(op::NOTIFY_OPEN, 2).encode())
                        .await
                        .unwrap();

                    let _ = alert_rx.await;
                    let mut packet = Vec::with_capacity(LINE_REPORT_LEN);
                    packet.extend_from_slice(&9_000_000u64.to_le_bytes()); // 9 ms
                    packet.push(0); // chip
                    packet.push(2); // gpio
                    packet.push(LEVEL_LOW);
                    packet.push(0); // flags
                    packet.extend_from_slice(&2u32.to_le_bytes()); // handle
                    ntfy.write_all(&packet).await.unwrap();

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

    fn client_for(addr: SocketAddr) -> CurrentClient {
        let config = CurrentClientConfig::new(addr.ip().to_string())
            .with_port(addr.port())
            .with_user("hub")
            .with_password(PASSWORD)
            .with_permitted_mask(0xFFFF_FFFF)
            .with_response_timeout(Duration::from_secs(2));
        CurrentClient::new(config)
    }

    #[test]
    fn test_login_proof_digest() {
        // MD5 of the empty string.
        assert_eq!(login_proof("", "", ""), "d41d8cd98f00b204e9800998ecf8427e");
        // MD5 of "abc", split across the three inputs.
        assert_eq!(
            login_proof("a", "b", "c"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[tokio::test]
    async fn test_connect_logs_in_and_opens_chip() {
        let addr = spawn_mock_daemon().await;
        let client = client_for(addr);

        client.connect().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(client.session.lock().await.chip, Some(4));

        assert!(client.gpio_read(2).await.unwrap());
        assert_eq!(client.read_bank().await.unwrap(), 0b100);

        client.disconnect().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_bad_password_fails_connect() {
        let addr = spawn_mock_daemon().await;
        let config = CurrentClientConfig::new(addr.ip().to_string())
            .with_port(addr.port())
            .with_password("wrong")
            .with_response_timeout(Duration::from_secs(2));
        let client = CurrentClient::new(config);

        let err = client.connect().await.unwrap_err();
        match err {
            ClientError::Daemon { code, message } => {
                assert_eq!(code, -8);
                assert_eq!(message, "bad password proof");
            }
            other => panic!("expected daemon error, got {:?}", other),
        }
        assert_eq!(client.connection_state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_daemon_error_is_local_to_the_command() {
        let addr = spawn_mock_daemon().await;
        let client = client_for(addr);
        client.connect().await.unwrap();

        let err = client
            .exec(Request::new(op::TX_SERVO).with_long(4).with_short(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Daemon { code: -39, .. }));

        // Connection survives.
        assert!(client.gpio_read(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_listen_primes_then_streams() {
        let addr = spawn_mock_daemon().await;
        let client = client_for(addr);
        client.connect().await.unwrap();

        let mut rx = client.subscribe();
        client.listen(0b100).await.unwrap();

        let initial = loop {
            if let ClientEvent::Gpio(ev) = rx.recv().await.unwrap() {
                break ev;
            }
        };
        assert_eq!(initial.gpio, 2);
        assert!(initial.level);
        assert_eq!(initial.tick_us, 5_000);

        let live = loop {
            if let ClientEvent::Gpio(ev) = rx.recv().await.unwrap() {
                break ev;
            }
        };
        assert_eq!(live.gpio, 2);
        assert!(!live.level);
        assert_eq!(live.tick_us, 9_000);

        client.disconnect().await.unwrap();
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
