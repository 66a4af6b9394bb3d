//! LED chain driving over bit-banged clock/data lines.
//!
//! One 32-bit word is shifted out per LED, most significant bit first;
//! each bit costs three primitive GPIO writes (data, clock high, clock
//! low). A full frame is a leading all-zero start word, one encoded word
//! per LED, and a trailing latch whose length scales with the chain.
//!
//! This is the latency-sensitive path of the system: an 8-LED update
//! already issues on the order of a thousand primitive writes. The
//! per-word command sequence is therefore pre-built once at attach time;
//! only the data-line bit values are patched before each word, and the
//! whole word goes to the daemon as one batched wire transaction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{ClientError, Result};
use crate::core::traits::{check_permitted, DaemonClient, GpioMode, GpioWrite};

/// Bits per LED word.
const WORD_BITS: usize = 32;

/// Supported word encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordEncoding {
    /// Global-brightness layout: `111bbbbb` marker/brightness byte, then
    /// blue, green, red. Latch is an all-ones run of at least one clock
    /// edge per two LEDs.
    Apa102,

    /// Checksum-prefixed layout: flag byte `11` plus the inverted high
    /// bits of each channel, then blue, green, red. Brightness is folded
    /// into the channels; latch is one all-zero word.
    P9813,
}

/// One LED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedColor {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Brightness 0–31.
    pub brightness: u8,
}

impl LedColor {
    /// Full-brightness color.
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self {
            r,
            g,
            b,
            brightness: 31,
        }
    }

    /// Set the brightness (clamped to 0–31).
    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness.min(31);
        self
    }

    /// All channels off.
    pub fn off() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            brightness: 0,
        }
    }
}

/// Encode one LED state as its 32-bit wire word.
pub fn encode_word(color: &LedColor, encoding: WordEncoding) -> u32 {
    match encoding {
        WordEncoding::Apa102 => {
            let flag = 0xE0 | u32::from(color.brightness.min(31));
            (flag << 24)
                | (u32::from(color.b) << 16)
                | (u32::from(color.g) << 8)
                | u32::from(color.r)
        }
        WordEncoding::P9813 => {
            let scale = |c: u8| -> u8 {
                ((u16::from(c) * u16::from(color.brightness.min(31))) / 31) as u8
            };
            let (r, g, b) = (scale(color.r), scale(color.g), scale(color.b));
            let flag = 0xC0
                | (u32::from(!b >> 6) << 4)
                | (u32::from(!g >> 6) << 2)
                | u32::from(!r >> 6);
            (flag << 24) | (u32::from(b) << 16) | (u32::from(g) << 8) | u32::from(r)
        }
    }
}

/// Latch words closing a frame: value and count.
///
/// The clocked-through latch must grow with the chain (one extra clock
/// edge per two LEDs for the global-brightness devices); the
/// checksum-prefixed devices latch on a single zero word.
fn latch_words(count: usize, encoding: WordEncoding) -> (u32, usize) {
    match encoding {
        WordEncoding::Apa102 => {
            let bits = count.div_ceil(2).max(1);
            (u32::MAX, bits.div_ceil(WORD_BITS))
        }
        WordEncoding::P9813 => (0, 1),
    }
}

/// Chain geometry and encoding.
#[derive(Debug, Clone)]
pub struct LedChainConfig {
    /// Clock line GPIO.
    pub clock_gpio: u8,

    /// Data line GPIO.
    pub data_gpio: u8,

    /// Number of LEDs on the chain.
    pub count: usize,

    /// Word encoding of the device family.
    pub encoding: WordEncoding,
}

impl LedChainConfig {
    /// Create a configuration.
    pub fn new(clock_gpio: u8, data_gpio: u8, count: usize, encoding: WordEncoding) -> Self {
        Self {
            clock_gpio,
            data_gpio,
            count,
            encoding,
        }
    }
}

/// A LED chain wired to a daemon client.
///
/// Chain-level operations mutate the in-memory frame only; [`update`]
/// transmits the whole frame.
///
/// [`update`]: LedChain::update
pub struct LedChain {
    config: LedChainConfig,
    client: Arc<dyn DaemonClient>,
    frame: Vec<LedColor>,
    /// Pre-built word transmission: 3 writes per bit, with the data
    /// write of each triple patched before sending.
    template: Vec<GpioWrite>,
}

impl LedChain {
    /// Attach a chain: validates geometry, claims both lines as outputs
    /// and pre-builds the per-word write sequence.
    pub async fn attach(client: Arc<dyn DaemonClient>, config: LedChainConfig) -> Result<Self> {
        if config.count == 0 {
            return Err(ClientError::validation("LED chain length must be nonzero"));
        }
        if config.clock_gpio == config.data_gpio {
            return Err(ClientError::validation(
                "clock and data must be distinct GPIOs",
            ));
        }
        check_permitted(config.clock_gpio, client.permitted_mask())?;
        check_permitted(config.data_gpio, client.permitted_mask())?;

        client.gpio_mode(config.clock_gpio, GpioMode::Output).await?;
        client.gpio_mode(config.data_gpio, GpioMode::Output).await?;

        let mut template = Vec::with_capacity(WORD_BITS * 3);
        for _ in 0..WORD_BITS {
            template.push(GpioWrite::new(config.data_gpio, false));
            template.push(GpioWrite::new(config.clock_gpio, true));
            template.push(GpioWrite::new(config.clock_gpio, false));
        }

        let frame = vec![LedColor::off(); config.count];
        Ok(Self {
            config,
            client,
            frame,
            template,
        })
    }

    /// Number of LEDs on the chain.
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    /// Whether the chain has no LEDs (never true after `attach`).
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Current frame contents.
    pub fn frame(&self) -> &[LedColor] {
        &self.frame
    }

    /// Set every LED.
    pub fn set_all(&mut self, color: LedColor) {
        self.frame.fill(color);
    }

    /// Set one LED.
    pub fn set_one(&mut self, index: usize, color: LedColor) -> Result<()> {
        let len = self.frame.len();
        let slot = self.frame.get_mut(index).ok_or_else(|| {
            ClientError::validation(format!("LED index {} out of range 0..{}", index, len))
        })?;
        *slot = color;
        Ok(())
    }

    /// Rotate the frame by `steps` positions (positive moves each LED
    /// toward higher indices, wrapping).
    pub fn rotate(&mut self, steps: isize) {
        let len = self.frame.len();
        if len == 0 {
            return;
        }
        let by = steps.rem_euclid(len as isize) as usize;
        self.frame.rotate_right(by);
    }

    /// Shift the frame by `steps` positions toward higher indices,
    /// filling vacated slots with `fill` (negative shifts down).
    pub fn shift(&mut self, steps: isize, fill: LedColor) {
        if steps.unsigned_abs() >= self.frame.len() {
            self.frame.fill(fill);
            return;
        }
        if steps >= 0 {
            let by = steps as usize;
            self.frame.rotate_right(by);
            self.frame[..by].fill(fill);
        } else {
            let by = (-steps) as usize;
            self.frame.rotate_left(by);
            let at = self.frame.len() - by;
            self.frame[at..].fill(fill);
        }
    }

    /// Transmit the whole frame: start word, one word per LED, latch.
    pub async fn update(&mut self) -> Result<()> {
        debug!(
            leds = self.frame.len(),
            encoding = ?self.config.encoding,
            "transmitting LED frame"
        );
        self.send_word(0).await?;

        // Patching self.template in place needs the frame words first.
        let words: Vec<u32> = self
            .frame
            .iter()
            .map(|c| encode_word(c, self.config.encoding))
            .collect();
        for word in words {
            self.send_word(word).await?;
        }

        let (latch, n) = latch_words(self.frame.len(), self.config.encoding);
        for _ in 0..n {
            self.send_word(latch).await?;
        }
        Ok(())
    }

    /// Patch the data bits of the pre-built sequence and send it as one
    /// batched wire transaction.
    async fn send_word(&mut self, word: u32) -> Result<()> {
        for bit in 0..WORD_BITS {
            self.template[bit * 3].level = word & (0x8000_0000 >> bit) != 0;
        }
        self.client.gpio_write_batch(&self.template).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Result;
    use crate::core::event::ClientEventReceiver;
    use crate::core::traits::{
        ConnectionState, Diagnostics, GpioPull, ProtocolVariant,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every batched write; all other operations succeed.
    struct MockClient {
        event_tx: crate::core::event::ClientEventSender,
        batches: Mutex<Vec<Vec<GpioWrite>>>,
        modes: Mutex<Vec<(u8, GpioMode)>>,
    }

    impl MockClient {
        fn new() -> Arc<Self> {
            let (event_tx, _) = tokio::sync::broadcast::channel(64);
            Arc::new(Self {
                event_tx,
                batches: Mutex::new(Vec::new()),
                modes: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<Vec<GpioWrite>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DaemonClient for MockClient {
        fn variant(&self) -> ProtocolVariant {
            ProtocolVariant::Legacy
        }
        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
        fn permitted_mask(&self) -> u32 {
            0xFFFF_FFFF
        }
        fn subscribe(&self) -> ClientEventReceiver {
            self.event_tx.subscribe()
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn gpio_mode(&self, gpio: u8, mode: GpioMode) -> Result<()> {
            self.modes.lock().unwrap().push((gpio, mode));
            Ok(())
        }
        async fn gpio_pull(&self, _gpio: u8, _pull: GpioPull) -> Result<()> {
            Ok(())
        }
        async fn gpio_read(&self, _gpio: u8) -> Result<bool> {
            Ok(false)
        }
        async fn gpio_write(&self, _gpio: u8, _level: bool) -> Result<()> {
            Ok(())
        }
        async fn gpio_write_batch(&self, writes: &[GpioWrite]) -> Result<()> {
            self.batches.lock().unwrap().push(writes.to_vec());
            Ok(())
        }
        async fn read_bank(&self) -> Result<u32> {
            Ok(0)
        }
        async fn set_watchdog(&self, _gpio: u8, _millis: u32) -> Result<()> {
            Ok(())
        }
        async fn listen(&self, _mask: u32) -> Result<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn write_file(&self, _path: &str, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn shell(&self, _script: &str) -> Result<i32> {
            Ok(0)
        }
        async fn diagnostics(&self) -> Result<Diagnostics> {
            Ok(Diagnostics {
                variant: "mock".into(),
                connection_state: ConnectionState::Connected,
                command_count: 0,
                notify_count: 0,
                error_count: 0,
                last_error: None,
                extra: serde_json::Value::Null,
            })
        }
    }

    /// Reconstruct the 32-bit word a batch clocked out.
    fn word_of(batch: &[GpioWrite]) -> u32 {
        assert_eq!(batch.len(), WORD_BITS * 3);
        let mut word = 0u32;
        for bit in 0..WORD_BITS {
            word <<= 1;
            if batch[bit * 3].level {
                word |= 1;
            }
        }
        word
    }

    #[test]
    fn test_encode_word_apa102() {
        let red = LedColor::new(0xFF, 0, 0);
        assert_eq!(encode_word(&red, WordEncoding::Apa102), 0xFF00_00FF);

        let dim = LedColor::new(0x10, 0x20, 0x30).with_brightness(5);
        assert_eq!(encode_word(&dim, WordEncoding::Apa102), 0xE530_2010);
    }

    #[test]
    fn test_encode_word_p9813_checksum_bits() {
        let red = LedColor::new(0xFF, 0, 0);
        // Flag: 11, ~B[7:6]=11, ~G[7:6]=11, ~R[7:6]=00.
        assert_eq!(encode_word(&red, WordEncoding::P9813), 0xFC00_00FF);

        let white = LedColor::new(0xFF, 0xFF, 0xFF);
        assert_eq!(encode_word(&white, WordEncoding::P9813), 0xC0FF_FFFF);
    }

    #[test]
    fn test_p9813_brightness_scales_channels() {
        let half = LedColor::new(0xFF, 0, 0).with_brightness(15);
        let word = encode_word(&half, WordEncoding::P9813);
        let r = word & 0xFF;
        assert_eq!(r, (0xFF * 15 / 31) as u32);
    }

    #[tokio::test]
    async fn test_update_transmits_count_plus_two_words() {
        let client = MockClient::new();
        let config = LedChainConfig::new(11, 10, 8, WordEncoding::Apa102);
        let mut chain = LedChain::attach(client.clone(), config).await.unwrap();

        // Attach claimed both lines as outputs.
        assert_eq!(
            client.modes.lock().unwrap().as_slice(),
            &[(11, GpioMode::Output), (10, GpioMode::Output)]
        );

        chain.set_all(LedColor::new(0, 0xFF, 0));
        chain.update().await.unwrap();

        let batches = client.batches();
        // Start word, 8 LED words, one latch word.
        assert_eq!(batches.len(), 8 + 2);
        assert_eq!(word_of(&batches[0]), 0);
        for batch in &batches[1..9] {
            assert_eq!(
                word_of(batch),
                encode_word(&LedColor::new(0, 0xFF, 0), WordEncoding::Apa102)
            );
        }
        assert_eq!(word_of(&batches[9]), u32::MAX);
    }

    #[tokio::test]
    async fn test_word_bit_banging_layout() {
        let client = MockClient::new();
        let config = LedChainConfig::new(11, 10, 1, WordEncoding::P9813);
        let mut chain = LedChain::attach(client.clone(), config).await.unwrap();
        chain.update().await.unwrap();

        let batches = client.batches();
        for batch in &batches {
            assert_eq!(batch.len(), 96);
            for bit in 0..WORD_BITS {
                // Triple per bit: data value, clock high, clock low.
                assert_eq!(batch[bit * 3].gpio, 10);
                assert_eq!(batch[bit * 3 + 1], GpioWrite::new(11, true));
                assert_eq!(batch[bit * 3 + 2], GpioWrite::new(11, false));
            }
        }
    }

    #[tokio::test]
    async fn test_latch_scales_with_chain_length() {
        let client = MockClient::new();
        // 130 LEDs need 65 latch bits, i.e. three all-ones words.
        let config = LedChainConfig::new(11, 10, 130, WordEncoding::Apa102);
        let mut chain = LedChain::attach(client.clone(), config).await.unwrap();
        chain.update().await.unwrap();

        let batches = client.batches();
        assert_eq!(batches.len(), 1 + 130 + 3);
    }

    #[tokio::test]
    async fn test_frame_operations_do_not_transmit() {
        let client = MockClient::new();
        let config = LedChainConfig::new(11, 10, 4, WordEncoding::Apa102);
        let mut chain = LedChain::attach(client.clone(), config).await.unwrap();

        let red = LedColor::new(0xFF, 0, 0);
        let blue = LedColor::new(0, 0, 0xFF);
        chain.set_all(blue);
        chain.set_one(0, red).unwrap();
        chain.rotate(1);
        chain.shift(1, LedColor::off());
        assert!(chain.set_one(4, red).is_err());

        assert!(client.batches().is_empty());
    }

    #[tokio::test]
    async fn test_rotate_and_shift_semantics() {
        let client = MockClient::new();
        let config = LedChainConfig::new(11, 10, 3, WordEncoding::Apa102);
        let mut chain = LedChain::attach(client.clone(), config).await.unwrap();

        let a = LedColor::new(1, 0, 0);
        let b = LedColor::new(2, 0, 0);
        let c = LedColor::new(3, 0, 0);
        chain.set_one(0, a).unwrap();
        chain.set_one(1, b).unwrap();
        chain.set_one(2, c).unwrap();

        chain.rotate(1);
        assert_eq!(chain.frame(), &[c, a, b]);

        chain.shift(1, LedColor::off());
        assert_eq!(chain.frame(), &[LedColor::off(), c, a]);

        chain.shift(-2, LedColor::off());
        assert_eq!(chain.frame(), &[a, LedColor::off(), LedColor::off()]);
    }

    #[tokio::test]
    async fn test_attach_validates_geometry() {
        let client = MockClient::new();
        assert!(LedChain::attach(
            client.clone(),
            LedChainConfig::new(10, 10, 4, WordEncoding::Apa102)
        )
        .await
        .is_err());
        assert!(LedChain::attach(
            client.clone(),
            LedChainConfig::new(11, 10, 0, WordEncoding::Apa102)
        )
        .await
        .is_err());
    }
}
