//! Button press decoding.
//!
//! A button is a digital input whose edge sequence is classified into
//! single, double and long presses. Duration thresholds are detected
//! without a local timer: the daemon-side watchdog re-announces the
//! current level at `gcd(double, long)` intervals, so an expired window
//! shows up as a watchdog event whose duration-since-last-edge crosses
//! the threshold.
//!
//! Levels follow the usual pull-up wiring: high = released, low =
//! pressed.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::error::Result;
use crate::core::event::{ClientEvent, GpioEvent};
use crate::core::traits::{check_permitted, DaemonClient, GpioMode, GpioPull};

/// Classified press events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressEvent {
    /// One press-and-release (or an immediate press when no windows are
    /// configured).
    Single,
    /// Two presses inside the double-press window.
    Double,
    /// A press held past the long-press threshold.
    Long,
}

/// Button configuration.
#[derive(Debug, Clone)]
pub struct ButtonConfig {
    /// Input GPIO.
    pub gpio: u8,

    /// Double-press window in milliseconds (0 = disabled).
    pub double_press_ms: u32,

    /// Long-press threshold in milliseconds (0 = disabled).
    pub long_press_ms: u32,

    /// Pull resistor for the input line.
    pub pull: GpioPull,
}

impl ButtonConfig {
    /// Create a configuration with both windows disabled.
    pub fn new(gpio: u8) -> Self {
        Self {
            gpio,
            double_press_ms: 0,
            long_press_ms: 0,
            pull: GpioPull::Up,
        }
    }

    /// Set the double-press window.
    pub fn with_double_press_ms(mut self, ms: u32) -> Self {
        self.double_press_ms = ms;
        self
    }

    /// Set the long-press threshold.
    pub fn with_long_press_ms(mut self, ms: u32) -> Self {
        self.long_press_ms = ms;
        self
    }

    /// Set the pull resistor.
    pub fn with_pull(mut self, pull: GpioPull) -> Self {
        self.pull = pull;
        self
    }
}

/// Greatest common divisor, used for the watchdog interval.
fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// The press-duration state machine.
///
/// Pure: fed one [`GpioEvent`] at a time, returns at most one
/// [`PressEvent`]. The first event only establishes the level baseline
/// (it is the synthetic initial-state announcement, not an edge).
#[derive(Debug)]
pub struct PressDecoder {
    double_press_ms: u32,
    long_press_ms: u32,
    wait_double: bool,
    wait_long: bool,
    double_armed: bool,
    last_level: Option<bool>,
    last_edge_us: Option<u64>,
}

impl PressDecoder {
    /// Create a decoder with the given windows (milliseconds, 0 =
    /// disabled).
    pub fn new(double_press_ms: u32, long_press_ms: u32) -> Self {
        Self {
            double_press_ms,
            long_press_ms,
            wait_double: false,
            wait_long: false,
            double_armed: false,
            last_level: None,
            last_edge_us: None,
        }
    }

    /// Watchdog period to arm on the daemon so that window expiry is
    /// observable without edges. `None` when no window is configured.
    pub fn watchdog_interval_ms(&self) -> Option<u32> {
        match (self.double_press_ms, self.long_press_ms) {
            (0, 0) => None,
            (d, 0) => Some(d),
            (0, l) => Some(l),
            (d, l) => Some(gcd(d, l)),
        }
    }

    /// Feed one event; returns a classified press if one completed.
    pub fn on_event(&mut self, ev: &GpioEvent) -> Option<PressEvent> {
        let prev_level = match self.last_level {
            Some(level) => level,
            None => {
                // Baseline from the initial-state announcement.
                self.last_level = Some(ev.level);
                self.last_edge_us = Some(ev.tick_us);
                return None;
            }
        };

        let is_edge = !ev.watchdog && ev.level != prev_level;
        let duration_ms = self
            .last_edge_us
            .map(|t| ev.tick_us.saturating_sub(t) / 1_000)
            .unwrap_or(0);

        let out = if ev.level {
            // Released.
            if self.wait_double {
                if self.double_press_ms > 0 && duration_ms >= u64::from(self.double_press_ms) {
                    // Window expired with no second press.
                    self.wait_double = false;
                    self.double_armed = false;
                    Some(PressEvent::Single)
                } else {
                    None
                }
            } else if self.wait_long {
                self.wait_long = false;
                if self.double_press_ms > 0 {
                    self.wait_double = true;
                    None
                } else {
                    Some(PressEvent::Single)
                }
            } else if is_edge && self.long_press_ms == 0 && self.double_press_ms > 0 {
                if self.double_armed {
                    // Release of the second press of a double press.
                    self.double_armed = false;
                } else {
                    self.wait_double = true;
                }
                None
            } else {
                None
            }
        } else {
            // Pressed.
            if self.wait_double {
                self.wait_double = false;
                self.double_armed = true;
                Some(PressEvent::Double)
            } else if self.wait_long {
                if self.long_press_ms > 0 && duration_ms >= u64::from(self.long_press_ms) {
                    self.wait_long = false;
                    Some(PressEvent::Long)
                } else {
                    None
                }
            } else if self.long_press_ms > 0 {
                self.wait_long = true;
                None
            } else if self.double_press_ms == 0 {
                Some(PressEvent::Single)
            } else {
                None
            }
        };

        if is_edge {
            self.last_edge_us = Some(ev.tick_us);
        }
        self.last_level = Some(ev.level);
        out
    }
}

/// A button wired to a daemon client.
///
/// Claims the input line, arms the daemon watchdog, and classifies the
/// client's GPIO events into press events on its own broadcast channel.
/// The caller is responsible for including the button's GPIO in the
/// client's `listen` mask.
pub struct Button {
    gpio: u8,
    press_tx: broadcast::Sender<PressEvent>,
    task: JoinHandle<()>,
}

impl Button {
    /// Attach a button to a client.
    pub async fn attach(client: Arc<dyn DaemonClient>, config: ButtonConfig) -> Result<Self> {
        check_permitted(config.gpio, client.permitted_mask())?;

        client.gpio_mode(config.gpio, GpioMode::Input).await?;
        client.gpio_pull(config.gpio, config.pull).await?;

        let decoder = PressDecoder::new(config.double_press_ms, config.long_press_ms);
        if let Some(interval) = decoder.watchdog_interval_ms() {
            client.set_watchdog(config.gpio, interval).await?;
        }

        let (press_tx, _) = broadcast::channel(64);
        let gpio = config.gpio;
        let tx = press_tx.clone();
        let mut rx = client.subscribe();
        let task = tokio::spawn(async move {
            let mut decoder = decoder;
            loop {
                match rx.recv().await {
                    Ok(ClientEvent::Gpio(ev)) if ev.gpio == gpio => {
                        if let Some(press) = decoder.on_event(&ev) {
                            let _ = tx.send(press);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            gpio,
            press_tx,
            task,
        })
    }

    /// The button's GPIO.
    pub fn gpio(&self) -> u8 {
        self.gpio
    }

    /// Subscribe to classified press events.
    pub fn subscribe(&self) -> broadcast::Receiver<PressEvent> {
        self.press_tx.subscribe()
    }
}

impl Drop for Button {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(level: bool, at_ms: u64) -> GpioEvent {
        GpioEvent {
            gpio: 17,
            level,
            tick_us: at_ms * 1_000,
            watchdog: false,
        }
    }

    fn watchdog(level: bool, at_ms: u64) -> GpioEvent {
        GpioEvent {
            gpio: 17,
            level,
            tick_us: at_ms * 1_000,
            watchdog: true,
        }
    }

    /// Feed a sequence and collect emitted presses.
    fn run(decoder: &mut PressDecoder, events: &[GpioEvent]) -> Vec<PressEvent> {
        events.iter().filter_map(|ev| decoder.on_event(ev)).collect()
    }

    #[test]
    fn test_double_press_within_window() {
        let mut d = PressDecoder::new(500, 0);
        // Baseline: released. Press/release/press/release, the second
        // press well inside the 500 ms window.
        let presses = run(
            &mut d,
            &[
                edge(true, 0),
                edge(false, 10),
                edge(true, 60),
                edge(false, 110),
                edge(true, 160),
            ],
        );
        assert_eq!(presses, vec![PressEvent::Double]);
    }

    #[test]
    fn test_single_press_after_window_expiry() {
        let mut d = PressDecoder::new(500, 0);
        let mut presses = run(
            &mut d,
            &[edge(true, 0), edge(false, 10), edge(true, 60)],
        );
        assert!(presses.is_empty());

        // Watchdog re-announcement 510 ms after the release: the window
        // has expired, the first press resolves as a single.
        presses = run(&mut d, &[watchdog(true, 570)]);
        assert_eq!(presses, vec![PressEvent::Single]);

        // A later press starts a fresh evaluation.
        presses = run(
            &mut d,
            &[edge(false, 610), edge(true, 660), watchdog(true, 1_170)],
        );
        assert_eq!(presses, vec![PressEvent::Single]);
    }

    #[test]
    fn test_long_press_via_watchdog() {
        let mut d = PressDecoder::new(0, 800);
        let presses = run(
            &mut d,
            &[
                edge(true, 0),
                edge(false, 100),
                watchdog(false, 500),
                watchdog(false, 950),
            ],
        );
        assert_eq!(presses, vec![PressEvent::Long]);
    }

    #[test]
    fn test_short_press_with_long_configured_is_single() {
        let mut d = PressDecoder::new(0, 800);
        let presses = run(&mut d, &[edge(true, 0), edge(false, 100), edge(true, 250)]);
        assert_eq!(presses, vec![PressEvent::Single]);
    }

    #[test]
    fn test_immediate_single_when_no_windows() {
        let mut d = PressDecoder::new(0, 0);
        let presses = run(&mut d, &[edge(true, 0), edge(false, 10), edge(true, 50)]);
        assert_eq!(presses, vec![PressEvent::Single]);
        assert_eq!(d.watchdog_interval_ms(), None);
    }

    #[test]
    fn test_long_then_double_window() {
        let mut d = PressDecoder::new(400, 800);
        // Quick press enters the double window instead of emitting.
        let presses = run(
            &mut d,
            &[
                edge(true, 0),
                edge(false, 50),
                edge(true, 150),
                edge(false, 250),
            ],
        );
        assert_eq!(presses, vec![PressEvent::Double]);
    }

    #[test]
    fn test_watchdog_interval_is_gcd() {
        assert_eq!(PressDecoder::new(400, 800).watchdog_interval_ms(), Some(400));
        assert_eq!(PressDecoder::new(300, 800).watchdog_interval_ms(), Some(100));
        assert_eq!(PressDecoder::new(500, 0).watchdog_interval_ms(), Some(500));
        assert_eq!(PressDecoder::new(0, 800).watchdog_interval_ms(), Some(800));
    }

    #[test]
    fn test_second_release_does_not_rearm_window() {
        let mut d = PressDecoder::new(500, 0);
        run(
            &mut d,
            &[
                edge(true, 0),
                edge(false, 10),
                edge(true, 60),
                edge(false, 110),
                edge(true, 160),
            ],
        );
        // After the double press completed, watchdog announcements of
        // the released level must stay silent.
        let presses = run(&mut d, &[watchdog(true, 700), watchdog(true, 1_200)]);
        assert!(presses.is_empty());
    }
}
