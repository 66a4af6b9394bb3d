//! Core traits and shared types for daemon clients.
//!
//! The legacy/current protocol split is modeled as one client interface
//! with two variant implementations selected at construction time; the
//! factory hands out `Box<dyn DaemonClient>` (or `Arc`) so device drivers
//! and the embedding application never care which daemon generation they
//! are talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::event::ClientEventReceiver;

/// Daemon protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// Fixed 16-byte header protocol with a separate bitmap notification
    /// stream and 32-bit wrapping ticks.
    Legacy,

    /// Magic-prefixed variable-length protocol with authenticated
    /// sessions, per-line notifications and 64-bit nanosecond ticks.
    Current,
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Legacy => "legacy",
            Self::Current => "current",
        };
        write!(f, "{}", s)
    }
}

/// Connection state of a daemon client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected to the daemon.
    #[default]
    Disconnected,

    /// Attempting to connect (and, for the current variant, log in).
    Connecting,

    /// Connected and operational.
    Connected,

    /// Connection failed or was torn down by a fatal error.
    Error,
}

impl ConnectionState {
    /// Check if currently connected.
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a (re)connect attempt is reasonable.
    #[inline]
    pub const fn can_retry(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

/// GPIO line direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioMode {
    /// Input line (notifications, sensors, buttons).
    Input,
    /// Output line (LED chain clock/data, relays).
    Output,
}

/// Internal pull resistor selection for input lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioPull {
    /// No pull resistor.
    #[default]
    Off,
    /// Pull up to the supply rail.
    Up,
    /// Pull down to ground.
    Down,
}

/// One primitive write in a batched sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioWrite {
    /// GPIO index.
    pub gpio: u8,
    /// Level to drive (true = high).
    pub level: bool,
}

impl GpioWrite {
    /// Create a write entry.
    pub const fn new(gpio: u8, level: bool) -> Self {
        Self { gpio, level }
    }
}

/// Client diagnostics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Protocol variant name.
    pub variant: String,

    /// Connection state.
    pub connection_state: ConnectionState,

    /// Number of commands completed successfully.
    pub command_count: u64,

    /// Number of notification packets processed.
    pub notify_count: u64,

    /// Number of errors (daemon errors and connection failures).
    pub error_count: u64,

    /// Last error message.
    pub last_error: Option<String>,

    /// Variant-specific information.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Unified daemon client interface.
///
/// All methods take `&self`; each implementation serializes access to its
/// command socket internally, which is also what enforces the
/// single-in-flight command invariant.
///
/// This trait uses `async_trait` because it must be object-safe: the
/// variant is chosen at construction time and consumers hold
/// `Arc<dyn DaemonClient>`.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Which protocol generation this client speaks.
    fn variant(&self) -> ProtocolVariant;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Bitmask of GPIOs the board permits user code to touch.
    fn permitted_mask(&self) -> u32;

    /// Subscribe to the client event bus (connection changes, GPIO
    /// events, warnings). Each call returns an independent receiver.
    fn subscribe(&self) -> ClientEventReceiver;

    /// Open the command socket (and log in / confirm liveness as the
    /// variant requires). Idempotent when already connected.
    async fn connect(&self) -> Result<()>;

    /// Release remote handles best-effort, close all sockets and emit a
    /// disconnect event. Runs the cleanup path at most once per
    /// connection.
    async fn disconnect(&self) -> Result<()>;

    /// Configure a GPIO line direction.
    async fn gpio_mode(&self, gpio: u8, mode: GpioMode) -> Result<()>;

    /// Configure the pull resistor of an input line.
    async fn gpio_pull(&self, gpio: u8, pull: GpioPull) -> Result<()>;

    /// Read one GPIO level.
    async fn gpio_read(&self, gpio: u8) -> Result<bool>;

    /// Write one GPIO level.
    async fn gpio_write(&self, gpio: u8, level: bool) -> Result<()>;

    /// Write a sequence of levels as one batched wire transaction.
    ///
    /// The whole sequence is sent in a single socket write and the
    /// responses are drained afterwards; this is the latency-sensitive
    /// path used by the LED chain driver.
    async fn gpio_write_batch(&self, writes: &[GpioWrite]) -> Result<()>;

    /// Read the level of all 32 GPIOs as a bitmap.
    async fn read_bank(&self) -> Result<u32>;

    /// Arm the daemon-side watchdog for one GPIO: after `millis` without
    /// an edge the daemon re-announces the current level.
    async fn set_watchdog(&self, gpio: u8, millis: u32) -> Result<()>;

    /// Arm notification delivery for the given GPIO mask. Emits one
    /// synthetic initial-state event per subscribed GPIO before live
    /// events begin.
    async fn listen(&self, mask: u32) -> Result<()>;

    /// Read a remote file as text.
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Write text to a remote file (created/truncated).
    async fn write_file(&self, path: &str, text: &str) -> Result<()>;

    /// Run a shell command on the daemon host; returns the exit status.
    async fn shell(&self, script: &str) -> Result<i32>;

    /// Diagnostics snapshot.
    async fn diagnostics(&self) -> Result<Diagnostics>;
}

/// Validate that a GPIO is inside the permitted mask.
///
/// Raised synchronously before any I/O (caller misuse, not a daemon
/// error).
pub fn check_permitted(gpio: u8, mask: u32) -> Result<()> {
    if gpio >= 32 || mask & (1 << gpio) == 0 {
        return Err(crate::core::error::ClientError::validation(format!(
            "GPIO {} is outside the permitted mask {:#010x}",
            gpio, mask
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Disconnected.can_retry());
        assert!(ConnectionState::Error.can_retry());
        assert!(!ConnectionState::Connecting.can_retry());
    }

    #[test]
    fn test_check_permitted() {
        let mask = 0x0000_0FF0; // GPIOs 4..12
        assert!(check_permitted(4, mask).is_ok());
        assert!(check_permitted(11, mask).is_ok());
        assert!(check_permitted(3, mask).is_err());
        assert!(check_permitted(31, mask).is_err());
        assert!(check_permitted(32, mask).is_err());
    }

    #[test]
    fn test_variant_display() {
        assert_eq!(ProtocolVariant::Legacy.to_string(), "legacy");
        assert_eq!(ProtocolVariant::Current.to_string(), "current");
    }
}
