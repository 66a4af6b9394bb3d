//! Temperature/humidity sensor decoding (DHT-family single-wire
//! protocol).
//!
//! The sensor answers a read request with 40 bits encoded as pulse
//! widths on one GPIO. Rising-edge spacing classifies each bit
//! (60–100 µs ⇒ 0, 100–160 µs ⇒ 1); an idle gap over 10 ms marks a frame
//! start, and the first two pulses after it are the sensor's presence
//! response rather than data. The fifth byte is a modular checksum over
//! the other four.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::error::Result;
use crate::core::event::{ClientEvent, GpioEvent};
use crate::core::traits::{check_permitted, DaemonClient, GpioMode, GpioPull};

/// Idle gap marking a new frame, in microseconds.
const FRAME_GAP_US: u64 = 10_000;

/// Pulse width classified as a 0 bit (inclusive lower bound).
const BIT0_MIN_US: u64 = 60;
/// Boundary between 0 and 1 pulses.
const BIT1_MIN_US: u64 = 100;
/// Pulse width upper bound for a 1 bit (exclusive).
const BIT1_MAX_US: u64 = 160;

/// One validated sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DhtReading {
    /// Temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Relative humidity in percent.
    pub humidity_pct: f64,
}

/// Sensor configuration.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Data GPIO.
    pub gpio: u8,
}

impl DhtConfig {
    /// Create a configuration.
    pub fn new(gpio: u8) -> Self {
        Self { gpio }
    }
}

/// In-progress frame state. Discarded once a frame validates or aborts.
#[derive(Debug)]
struct FrameState {
    /// Bit position: -2..0 are the presence pulses, 0..40 the data bits.
    bit_idx: i8,
    /// 40-bit accumulator, most significant bit first.
    acc: u64,
    /// Previous pulse width in microseconds.
    prev_pulse_us: u64,
}

/// The bit-timing decoder.
///
/// Pure: fed rising-edge [`GpioEvent`]s, returns a reading when a frame
/// validates.
#[derive(Debug, Default)]
pub struct BitDecoder {
    frame: Option<FrameState>,
    last_edge_us: Option<u64>,
}

impl BitDecoder {
    /// Create a decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns a validated reading when 40 bits
    /// accumulated and all checks pass.
    pub fn on_event(&mut self, ev: &GpioEvent) -> Option<DhtReading> {
        // Only rising edges carry timing; watchdog re-announcements are
        // not edges at all.
        if ev.watchdog || !ev.level {
            return None;
        }

        let duration = match self.last_edge_us {
            Some(t) => ev.tick_us.saturating_sub(t),
            None => {
                self.last_edge_us = Some(ev.tick_us);
                return None;
            }
        };
        self.last_edge_us = Some(ev.tick_us);

        if duration > FRAME_GAP_US {
            self.frame = Some(FrameState {
                bit_idx: -2,
                acc: 0,
                prev_pulse_us: duration,
            });
            return None;
        }

        let frame = self.frame.as_mut()?;

        let bit = if (BIT0_MIN_US..BIT1_MIN_US).contains(&duration) {
            0u64
        } else if (BIT1_MIN_US..BIT1_MAX_US).contains(&duration) {
            1u64
        } else {
            // Invalid signal: abort the frame.
            debug!(
                duration_us = duration,
                prev_pulse_us = frame.prev_pulse_us,
                "pulse outside bit windows"
            );
            self.frame = None;
            return None;
        };
        frame.prev_pulse_us = duration;

        if frame.bit_idx >= 0 {
            frame.acc = (frame.acc << 1) | bit;
        }
        frame.bit_idx += 1;

        if frame.bit_idx < 40 {
            return None;
        }

        let acc = frame.acc;
        self.frame = None;
        interpret(acc)
    }
}

/// Validate the checksum and try both data interpretations.
fn interpret(acc: u64) -> Option<DhtReading> {
    // Received order: humidity hi/lo, temperature hi/lo, checksum.
    let bytes = [
        ((acc >> 32) & 0xFF) as u8,
        ((acc >> 24) & 0xFF) as u8,
        ((acc >> 16) & 0xFF) as u8,
        ((acc >> 8) & 0xFF) as u8,
        (acc & 0xFF) as u8,
    ];

    let sum = bytes[0]
        .wrapping_add(bytes[1])
        .wrapping_add(bytes[2])
        .wrapping_add(bytes[3]);
    if sum != bytes[4] {
        debug!("checksum mismatch, frame discarded");
        return None;
    }

    // 16-bit tenths interpretation first.
    let humidity = f64::from(u16::from_be_bytes([bytes[0], bytes[1]])) / 10.0;
    let temperature = f64::from(i16::from_be_bytes([bytes[2], bytes[3]])) / 10.0;
    if (0.0..=100.0).contains(&humidity) && (-40.0..=125.0).contains(&temperature) {
        return Some(DhtReading {
            temperature_c: temperature,
            humidity_pct: humidity,
        });
    }

    // Raw-byte fallback used by the simpler sensor generation.
    let humidity = f64::from(bytes[0]);
    let temperature = f64::from(bytes[2]);
    if (20.0..=80.0).contains(&humidity) && (0.0..=50.0).contains(&temperature) {
        return Some(DhtReading {
            temperature_c: temperature,
            humidity_pct: humidity,
        });
    }

    debug!("frame failed both range interpretations");
    None
}

/// A sensor wired to a daemon client.
///
/// Decodes the client's GPIO events for one line into readings on its
/// own broadcast channel. The caller is responsible for including the
/// sensor's GPIO in the client's `listen` mask. Readings only arrive
/// after [`Dht::trigger`] requests one from the sensor.
pub struct Dht {
    gpio: u8,
    client: Arc<dyn DaemonClient>,
    reading_tx: broadcast::Sender<DhtReading>,
    task: JoinHandle<()>,
}

impl Dht {
    /// Attach a sensor to a client.
    pub async fn attach(client: Arc<dyn DaemonClient>, config: DhtConfig) -> Result<Self> {
        check_permitted(config.gpio, client.permitted_mask())?;

        client.gpio_mode(config.gpio, GpioMode::Input).await?;
        client.gpio_pull(config.gpio, GpioPull::Up).await?;

        let (reading_tx, _) = broadcast::channel(16);
        let gpio = config.gpio;
        let tx = reading_tx.clone();
        let mut rx = client.subscribe();
        let task = tokio::spawn(async move {
            let mut decoder = BitDecoder::new();
            loop {
                match rx.recv().await {
                    Ok(ClientEvent::Gpio(ev)) if ev.gpio == gpio => {
                        if let Some(reading) = decoder.on_event(&ev) {
                            let _ = tx.send(reading);
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
            client,
            reading_tx,
            task,
        })
    }

    /// The sensor's GPIO.
    pub fn gpio(&self) -> u8 {
        self.gpio
    }

    /// Subscribe to validated readings.
    pub fn subscribe(&self) -> broadcast::Receiver<DhtReading> {
        self.reading_tx.subscribe()
    }

    /// Request a reading: pull the line low for the start signal, then
    /// release it back to input so the sensor can answer.
    pub async fn trigger(&self) -> Result<()> {
        self.client.gpio_mode(self.gpio, GpioMode::Output).await?;
        self.client.gpio_write(self.gpio, false).await?;
        tokio::time::sleep(Duration::from_millis(18)).await;
        self.client.gpio_mode(self.gpio, GpioMode::Input).await?;
        self.client.gpio_pull(self.gpio, GpioPull::Up).await?;
        Ok(())
    }
}

impl Drop for Dht {
    fn drop(&mut self) {
        self.task.abort();
    }
}
