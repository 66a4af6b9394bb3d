//! Wire-level frame tracing.
//!
//! One trace handler trait covers both protocol variants; the embedding
//! application installs a single implementation and receives every raw
//! frame that crosses a socket, tagged with direction and kind. Capture is
//! off by default and enabled per frame category.
//!
//! # Example
//!
//! ```ignore
//! use remgpio::core::trace::{FrameTraceHandler, FrameRecord, TraceConfig};
//!
//! struct StderrTrace;
//!
//! #[async_trait]
//! impl FrameTraceHandler for StderrTrace {
//!     async fn on_frame(&self, record: FrameRecord) {
//!         eprintln!("{} {} {:02x?}", record.direction, record.kind, record.bytes);
//!     }
//! }
//!
//! client.set_trace(Arc::new(StderrTrace), TraceConfig::all());
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::traits::ProtocolVariant;

/// Direction of a traced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Frame sent to the daemon.
    Send,
    /// Frame received from the daemon.
    Receive,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, ">>>"),
            Self::Receive => write!(f, "<<<"),
        }
    }
}

/// What kind of frame was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// A command request or its response on the command socket.
    Command,
    /// A notification packet on the notification socket.
    Notification,
    /// Session setup traffic (login exchange, liveness query).
    Session,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Command => "cmd",
            Self::Notification => "ntfy",
            Self::Session => "sess",
        };
        write!(f, "{}", s)
    }
}

/// Trace capture configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Capture command/response frames.
    pub commands: bool,
    /// Capture notification packets.
    pub notifications: bool,
    /// Capture session setup frames.
    pub session: bool,
    /// Truncate captured bytes to this length (0 = unlimited).
    pub max_bytes: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            commands: false,
            notifications: false,
            session: false,
            max_bytes: 128,
        }
    }
}

impl TraceConfig {
    /// Capture everything.
    pub fn all() -> Self {
        Self {
            commands: true,
            notifications: true,
            session: true,
            max_bytes: 0,
        }
    }

    /// Whether a frame of this kind should be captured.
    pub fn wants(&self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Command => self.commands,
            FrameKind::Notification => self.notifications,
            FrameKind::Session => self.session,
        }
    }

    /// Apply the byte limit to a frame.
    pub fn clip<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        if self.max_bytes > 0 && bytes.len() > self.max_bytes {
            &bytes[..self.max_bytes]
        } else {
            bytes
        }
    }
}

/// One captured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Capture time (client wall clock, not the daemon tick).
    pub at: DateTime<Utc>,

    /// Send or receive.
    pub direction: Direction,

    /// Frame category.
    pub kind: FrameKind,

    /// Which protocol variant produced it.
    pub variant: ProtocolVariant,

    /// Raw frame bytes, possibly truncated per [`TraceConfig::max_bytes`].
    pub bytes: Vec<u8>,

    /// Original length before truncation.
    pub full_len: usize,
}

impl FrameRecord {
    /// Build a record from a raw frame, applying the config's byte limit.
    pub fn capture(
        config: &TraceConfig,
        direction: Direction,
        kind: FrameKind,
        variant: ProtocolVariant,
        bytes: &[u8],
    ) -> Self {
        Self {
            at: Utc::now(),
            direction,
            kind,
            variant,
            bytes: config.clip(bytes).to_vec(),
            full_len: bytes.len(),
        }
    }
}

/// Frame trace sink.
///
/// Uses `async_trait` so handlers can be stored as `Arc<dyn ...>` and do
/// async work (write to a file, forward over IPC) without blocking the
/// socket tasks.
#[async_trait]
pub trait FrameTraceHandler: Send + Sync {
    /// Called for every captured frame.
    async fn on_frame(&self, record: FrameRecord);
}
