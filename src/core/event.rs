//! Client event bus.
//!
//! All collaborator-facing notifications fan out over a single broadcast
//! channel carrying [`ClientEvent`]: connection lifecycle changes, per-GPIO
//! value changes, and generic warnings. Consumers filter by event kind (and
//! by GPIO index for [`GpioEvent`]), so one multiplexed channel replaces
//! per-GPIO observable streams.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::traits::ConnectionState;

/// One GPIO value-change notification.
///
/// Ticks are normalized to microseconds at the pipeline boundary; the
/// legacy variant's 32-bit wraparound is corrected before widening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioEvent {
    /// GPIO index (0..32).
    pub gpio: u8,

    /// Level after the event (true = high).
    pub level: bool,

    /// Daemon tick in microseconds, monotonic within a session.
    pub tick_us: u64,

    /// True when the event was generated by a watchdog timeout
    /// re-announcement rather than a real transition.
    pub watchdog: bool,
}

impl GpioEvent {
    /// Microseconds elapsed since an earlier event's tick.
    pub fn micros_since(&self, earlier_tick_us: u64) -> u64 {
        self.tick_us.saturating_sub(earlier_tick_us)
    }
}

/// Events published by a daemon client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection state changed (connect, disconnect, error).
    ConnectionChanged(ConnectionState),

    /// A subscribed GPIO changed value or was re-announced by a watchdog.
    Gpio(GpioEvent),

    /// Non-fatal condition worth surfacing (best-effort cleanup failure,
    /// dropped notification, unexpected report).
    Warning(String),
}

/// Event sender type (broadcast supports multiple subscribers).
pub type ClientEventSender = broadcast::Sender<ClientEvent>;

/// Event receiver type.
pub type ClientEventReceiver = broadcast::Receiver<ClientEvent>;
