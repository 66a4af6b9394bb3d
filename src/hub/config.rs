//! Hub configuration.
//!
//! Deserializable from TOML or JSON. The daemon section carries the
//! variant name plus a free-form parameter table that the factory
//! decodes against the chosen variant's params struct.
//!
//! # Example TOML
//!
//! ```toml
//! heartbeat_ms = 60000
//!
//! [daemon]
//! variant = "legacy"
//!
//! [daemon.parameters]
//! host = "192.168.1.30"
//! port = 8888
//!
//! [[buttons]]
//! name = "doorbell"
//! gpio = 17
//! double_press_ms = 500
//!
//! [[sensors]]
//! name = "attic"
//! gpio = 4
//!
//! [[led_chains]]
//! name = "shelf"
//! clock_gpio = 11
//! data_gpio = 10
//! count = 8
//! encoding = "apa102"
//! ```

use serde::Deserialize;

use crate::core::traits::ProtocolVariant;
use crate::devices::ledchain::WordEncoding;

/// Full hub configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Daemon connection settings.
    pub daemon: DaemonParams,

    /// Buttons to register.
    #[serde(default)]
    pub buttons: Vec<ButtonDef>,

    /// Temperature/humidity sensors to register.
    #[serde(default)]
    pub sensors: Vec<DhtDef>,

    /// LED chains to register.
    #[serde(default)]
    pub led_chains: Vec<LedChainDef>,

    /// Heartbeat interval in milliseconds; the embedding runtime
    /// reconnects on the next heartbeat after a disconnect.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

/// Daemon connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonParams {
    /// Protocol variant to speak.
    pub variant: ProtocolVariant,

    /// Variant-specific parameters, decoded by the factory.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// One button definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ButtonDef {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Input GPIO.
    pub gpio: u8,

    /// Double-press window in milliseconds (0 = disabled).
    #[serde(default)]
    pub double_press_ms: u32,

    /// Long-press threshold in milliseconds (0 = disabled).
    #[serde(default)]
    pub long_press_ms: u32,
}

/// One sensor definition.
#[derive(Debug, Clone, Deserialize)]
pub struct DhtDef {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Data GPIO.
    pub gpio: u8,
}

/// One LED chain definition.
#[derive(Debug, Clone, Deserialize)]
pub struct LedChainDef {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Clock line GPIO.
    pub clock_gpio: u8,

    /// Data line GPIO.
    pub data_gpio: u8,

    /// Number of LEDs.
    pub count: usize,

    /// Word encoding of the device family.
    #[serde(default = "default_encoding")]
    pub encoding: WordEncoding,
}

fn default_heartbeat_ms() -> u64 {
    60_000
}

fn default_encoding() -> WordEncoding {
    WordEncoding::Apa102
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            heartbeat_ms = 30000

            [daemon]
            variant = "legacy"

            [daemon.parameters]
            host = "10.0.0.5"
            port = 8888

            [[buttons]]
            name = "doorbell"
            gpio = 17
            double_press_ms = 500

            [[sensors]]
            gpio = 4

            [[led_chains]]
            clock_gpio = 11
            data_gpio = 10
            count = 8
            encoding = "p9813"
        "#;

        let config: HubConfig = ::toml::from_str(toml).unwrap();
        assert_eq!(config.daemon.variant, ProtocolVariant::Legacy);
        assert_eq!(config.heartbeat_ms, 30_000);
        assert_eq!(config.buttons.len(), 1);
        assert_eq!(config.buttons[0].gpio, 17);
        assert_eq!(config.buttons[0].long_press_ms, 0);
        assert_eq!(config.sensors[0].gpio, 4);
        assert_eq!(config.led_chains[0].encoding, WordEncoding::P9813);
        assert_eq!(config.daemon.parameters["host"], "10.0.0.5");
    }

    #[test]
    fn test_defaults() {
        let toml = r#"
            [daemon]
            variant = "current"

            [daemon.parameters]
            host = "localhost"
        "#;
        let config: HubConfig = ::toml::from_str(toml).unwrap();
        assert_eq!(config.heartbeat_ms, 60_000);
        assert!(config.buttons.is_empty());
        assert!(config.sensors.is_empty());
        assert!(config.led_chains.is_empty());
    }
}
