//! GPIO notification pipeline.
//!
//! Decodes the notification stream into per-GPIO change events, maintains
//! the last-known 32-bit level bitmap, normalizes ticks to microseconds
//! (correcting legacy 32-bit wraparound) and distinguishes real
//! transitions from watchdog-timeout re-announcements.
//!
//! The pipeline is shared between a client's notification reader task and
//! its command path (which primes it with the initial levels); state is
//! guarded by a plain mutex with short critical sections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::codec::report::{ns_to_us, tick_delta, BitmapReport, LineReport, LEVEL_HIGH};
use crate::core::event::{ClientEvent, ClientEventSender, GpioEvent};

#[derive(Debug, Default, Clone, Copy)]
struct NotifyState {
    /// Which of the 32 GPIOs are being watched.
    mask: u32,
    /// Last-known level bitmap.
    levels: u32,
    /// Last raw legacy tick, for wraparound correction.
    last_raw_tick: Option<u32>,
    /// Accumulated microsecond tick corresponding to `last_raw_tick`.
    base_us: u64,
}

/// Decodes notification packets into [`GpioEvent`]s on the client bus.
pub struct NotificationPipeline {
    event_tx: ClientEventSender,
    state: Mutex<NotifyState>,
    packets: AtomicU64,
}

impl NotificationPipeline {
    /// Create a pipeline publishing onto the given event bus.
    pub fn new(event_tx: ClientEventSender) -> Self {
        Self {
            event_tx,
            state: Mutex::new(NotifyState::default()),
            packets: AtomicU64::new(0),
        }
    }

    /// Number of notification packets processed.
    pub fn packet_count(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Current subscription mask.
    pub fn mask(&self) -> u32 {
        self.lock().mask
    }

    /// Last-known level of one GPIO.
    pub fn level(&self, gpio: u8) -> Option<bool> {
        let st = self.lock();
        if gpio < 32 && st.mask & (1u32 << gpio) != 0 {
            Some(st.levels & (1u32 << gpio) != 0)
        } else {
            None
        }
    }

    /// Arm the pipeline for a legacy session: store the subscription mask
    /// and current levels, seed the tick base, and emit one synthetic
    /// initial-state event per subscribed GPIO before live events begin.
    pub fn prime_legacy(&self, mask: u32, levels: u32, tick: u32) {
        let events = {
            let mut st = self.lock();
            st.mask = mask;
            st.levels = levels;
            st.last_raw_tick = Some(tick);
            st.base_us = u64::from(tick);
            initial_events(mask, levels, st.base_us)
        };
        self.emit_all(events);
    }

    /// Arm the pipeline for a current session (64-bit nanosecond ticks).
    pub fn prime_current(&self, mask: u32, levels: u32, tick_ns: u64) {
        let events = {
            let mut st = self.lock();
            st.mask = mask;
            st.levels = levels;
            st.last_raw_tick = None;
            st.base_us = ns_to_us(tick_ns);
            initial_events(mask, levels, st.base_us)
        };
        self.emit_all(events);
    }

    /// Reset subscription state on disconnect.
    pub fn reset(&self) {
        let mut st = self.lock();
        *st = NotifyState::default();
    }

    /// Process one legacy bitmap report.
    ///
    /// A zero-flags packet is diffed bit-by-bit against the stored bitmap
    /// over the subscribed GPIOs; a watchdog packet emits exactly one
    /// re-announcement event for the flagged GPIO without requiring a
    /// value change and without touching the stored bitmap.
    pub fn ingest_bitmap(&self, report: &BitmapReport) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        let events = {
            let mut st = self.lock();

            let tick_us = match st.last_raw_tick {
                Some(prev) => st.base_us + u64::from(tick_delta(prev, report.tick)),
                None => u64::from(report.tick),
            };
            st.last_raw_tick = Some(report.tick);
            st.base_us = tick_us;

            if report.is_watchdog() {
                let gpio = report.watchdog_gpio();
                if st.mask & (1u32 << gpio) != 0 {
                    vec![GpioEvent {
                        gpio,
                        level: report.level(gpio),
                        tick_us,
                        watchdog: true,
                    }]
                } else {
                    Vec::new()
                }
            } else {
                let old = st.levels;
                let changed = (old ^ report.levels) & st.mask;
                let mut out = Vec::new();
                for gpio in 0..32u8 {
                    if changed & (1u32 << gpio) != 0 {
                        out.push(GpioEvent {
                            gpio,
                            level: report.level(gpio),
                            tick_us,
                            watchdog: false,
                        });
                    }
                }
                st.levels = report.levels;
                out
            }
        };
        self.emit_all(events);
    }

    /// Process one current per-line report.
    ///
    /// A watchdog report (level 2) must not overwrite the stored level;
    /// the emitted event re-announces the last-known value.
    pub fn ingest_line(&self, report: &LineReport) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        if report.gpio >= 32 {
            let _ = self.event_tx.send(ClientEvent::Warning(format!(
                "notification for out-of-range GPIO {}",
                report.gpio
            )));
            return;
        }

        let event = {
            let mut st = self.lock();
            let bit = 1u32 << report.gpio;
            if st.mask & bit == 0 {
                None
            } else {
                let tick_us = ns_to_us(report.tick_ns);
                if report.is_watchdog() {
                    Some(GpioEvent {
                        gpio: report.gpio,
                        level: st.levels & bit != 0,
                        tick_us,
                        watchdog: true,
                    })
                } else {
                    let level = report.level == LEVEL_HIGH;
                    if level {
                        st.levels |= bit;
                    } else {
                        st.levels &= !bit;
                    }
                    Some(GpioEvent {
                        gpio: report.gpio,
                        level,
                        tick_us,
                        watchdog: false,
                    })
                }
            }
        };
        if let Some(ev) = event {
            self.emit_all(vec![ev]);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NotifyState> {
        // The mutex is never held across await points; poisoning can only
        // come from a panic in this module.
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit_all(&self, events: Vec<GpioEvent>) {
        for ev in events {
            let _ = self.event_tx.send(ClientEvent::Gpio(ev));
        }
    }
}

fn initial_events(mask: u32, levels: u32, tick_us: u64) -> Vec<GpioEvent> {
    let mut out = Vec::new();
    for gpio in 0..32u8 {
        if mask & (1u32 << gpio) != 0 {
            out.push(GpioEvent {
                gpio,
                level: levels & (1u32 << gpio) != 0,
                tick_us,
                watchdog: false,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::report::{FLAG_WATCHDOG, LEVEL_WATCHDOG, LEVEL_LOW};
    use tokio::sync::broadcast;

    fn pipeline() -> (NotificationPipeline, broadcast::Receiver<ClientEvent>) {
        let (tx, rx) = broadcast::channel(256);
        (NotificationPipeline::new(tx), rx)
    }

    fn drain_gpio(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<GpioEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let ClientEvent::Gpio(g) = ev {
                out.push(g);
            }
        }
        out
    }

    #[test]
    fn test_prime_emits_one_initial_event_per_subscribed_gpio() {
        let (p, mut rx) = pipeline();
        p.prime_legacy(0b1010, 0b1000, 100);

        let events = drain_gpio(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].gpio, 1);
        assert!(!events[0].level);
        assert_eq!(events[1].gpio, 3);
        assert!(events[1].level);
        assert!(events.iter().all(|e| !e.watchdog));
    }

    #[test]
    fn test_bitmap_diff_emits_iff_changed() {
        let (p, mut rx) = pipeline();
        p.prime_legacy(0b110, 0b000, 0);
        drain_gpio(&mut rx);

        // GPIO 1 rises; GPIO 2 unchanged; GPIO 0 changes but is not
        // subscribed.
        p.ingest_bitmap(&BitmapReport {
            seqno: 0,
            flags: 0,
            tick: 50,
            levels: 0b011,
        });
        let events = drain_gpio(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].gpio, 1);
        assert!(events[0].level);

        // Identical bitmap again: nothing to emit.
        p.ingest_bitmap(&BitmapReport {
            seqno: 1,
            flags: 0,
            tick: 80,
            levels: 0b011,
        });
        assert!(drain_gpio(&mut rx).is_empty());
    }

    #[test]
    fn test_bitmap_watchdog_always_emits() {
        let (p, mut rx) = pipeline();
        p.prime_legacy(1 << 17, 1 << 17, 0);
        drain_gpio(&mut rx);

        // No value change, but the watchdog flag forces one event.
        p.ingest_bitmap(&BitmapReport {
            seqno: 0,
            flags: FLAG_WATCHDOG | 17,
            tick: 1_000,
            levels: 1 << 17,
        });
        let events = drain_gpio(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(events[0].watchdog);
        assert_eq!(events[0].gpio, 17);
        assert!(events[0].level);
    }

    #[test]
    fn test_tick_wraparound_keeps_microseconds_monotonic() {
        let (p, mut rx) = pipeline();
        p.prime_legacy(0b1, 0b0, 0xFFFF_FFF0);
        let start = drain_gpio(&mut rx)[0].tick_us;

        p.ingest_bitmap(&BitmapReport {
            seqno: 0,
            flags: 0,
            tick: 0x0000_0010,
            levels: 0b1,
        });
        let events = drain_gpio(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tick_us - start, 0x20);
    }

    #[test]
    fn test_line_watchdog_does_not_overwrite_level() {
        let (p, mut rx) = pipeline();
        p.prime_current(1 << 4, 1 << 4, 0);
        drain_gpio(&mut rx);

        p.ingest_line(&LineReport {
            tick_ns: 5_000,
            chip: 0,
            gpio: 4,
            level: LEVEL_WATCHDOG,
            flags: 0,
            handle: 1,
        });
        let events = drain_gpio(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(events[0].watchdog);
        // Re-announces the stored high level.
        assert!(events[0].level);
        assert_eq!(p.level(4), Some(true));

        // A real falling edge then updates the stored level.
        p.ingest_line(&LineReport {
            tick_ns: 9_000,
            chip: 0,
            gpio: 4,
            level: LEVEL_LOW,
            flags: 0,
            handle: 1,
        });
        let events = drain_gpio(&mut rx);
        assert!(!events[0].level);
        assert!(!events[0].watchdog);
        assert_eq!(p.level(4), Some(false));
    }

    #[test]
    fn test_line_outside_mask_is_ignored() {
        let (p, mut rx) = pipeline();
        p.prime_current(1 << 4, 0, 0);
        drain_gpio(&mut rx);

        p.ingest_line(&LineReport {
            tick_ns: 1_000,
            chip: 0,
            gpio: 9,
            level: LEVEL_HIGH,
            flags: 0,
            handle: 1,
        });
        assert!(drain_gpio(&mut rx).is_empty());
    }
}
