//! Self-describing driver metadata.
//!
//! Each daemon variant and device driver describes its configuration
//! parameters, enabling the CLI to list what a build supports and to
//! generate example configuration without instantiating anything.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter type for configuration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Boolean,
    Float,
    Object,
    Array,
}

/// Metadata for a single configuration parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterMetadata {
    /// Internal parameter name (used in config).
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Description of the parameter.
    pub description: &'static str,
    /// Whether this parameter is required.
    pub required: bool,
    /// Default value if not specified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Type of the parameter.
    pub param_type: ParameterType,
}

impl ParameterMetadata {
    /// Create a new required parameter.
    pub const fn required(
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        param_type: ParameterType,
    ) -> Self {
        Self {
            name,
            display_name,
            description,
            required: true,
            default_value: None,
            param_type,
        }
    }

    /// Create a new optional parameter with a default value.
    pub fn optional(
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        param_type: ParameterType,
        default_value: Value,
    ) -> Self {
        Self {
            name,
            display_name,
            description,
            required: false,
            default_value: Some(default_value),
            param_type,
        }
    }
}

/// What kind of component a metadata entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// A daemon protocol variant.
    Variant,
    /// A device driver built on the client primitives.
    Device,
}

/// Metadata for one driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverMetadata {
    /// Internal driver name (used in config).
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Description of the driver.
    pub description: &'static str,
    /// Variant or device.
    pub kind: DriverKind,
    /// Example configuration JSON.
    pub example_config: Value,
    /// Available configuration parameters.
    pub parameters: Vec<ParameterMetadata>,
}

/// Registry of everything this build supports.
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    drivers: Vec<DriverMetadata>,
}

impl DriverRegistry {
    /// All drivers.
    pub fn drivers(&self) -> &[DriverMetadata] {
        &self.drivers
    }

    /// Look up one driver by name.
    pub fn get(&self, name: &str) -> Option<&DriverMetadata> {
        self.drivers
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }
}

static REGISTRY: Lazy<DriverRegistry> = Lazy::new(build_registry);

/// The process-wide driver registry (built once, immutable).
pub fn get_driver_registry() -> &'static DriverRegistry {
    &REGISTRY
}

fn build_registry() -> DriverRegistry {
    #[allow(unused_mut)]
    let mut drivers: Vec<DriverMetadata> = Vec::new();

    #[cfg(feature = "legacy")]
    drivers.push(DriverMetadata {
        name: "legacy",
        display_name: "Legacy daemon",
        description: "Fixed 16-byte header protocol with a bitmap notification stream.",
        kind: DriverKind::Variant,
        example_config: serde_json::json!({
            "host": "192.168.1.30",
            "port": 8888,
            "response_timeout_ms": 5000
        }),
        parameters: vec![
            ParameterMetadata::required(
                "host",
                "Host",
                "Daemon host name or address",
                ParameterType::String,
            ),
            ParameterMetadata::optional(
                "port",
                "Port",
                "Daemon TCP port",
                ParameterType::Integer,
                serde_json::json!(8888),
            ),
            ParameterMetadata::optional(
                "connect_timeout_ms",
                "Connect Timeout (ms)",
                "Socket connect timeout in milliseconds",
                ParameterType::Integer,
                serde_json::json!(5000),
            ),
            ParameterMetadata::optional(
                "response_timeout_ms",
                "Response Timeout (ms)",
                "Per-command response deadline in milliseconds",
                ParameterType::Integer,
                serde_json::json!(5000),
            ),
            ParameterMetadata::optional(
                "permitted_mask",
                "Permitted Mask",
                "Bitmask of GPIOs user code may touch",
                ParameterType::Integer,
                serde_json::json!(0x0FFF_FFFCu32),
            ),
        ],
    });

    #[cfg(feature = "current")]
    drivers.push(DriverMetadata {
        name: "current",
        display_name: "Current daemon",
        description: "Magic-prefixed protocol with authenticated sessions and per-line reports.",
        kind: DriverKind::Variant,
        example_config: serde_json::json!({
            "host": "192.168.1.30",
            "port": 8889,
            "user": "hub",
            "password": "secret",
            "chip": "gpiochip0"
        }),
        parameters: vec![
            ParameterMetadata::required(
                "host",
                "Host",
                "Daemon host name or address",
                ParameterType::String,
            ),
            ParameterMetadata::optional(
                "port",
                "Port",
                "Daemon TCP port",
                ParameterType::Integer,
                serde_json::json!(8889),
            ),
            ParameterMetadata::optional(
                "user",
                "User",
                "User name announced at login",
                ParameterType::String,
                serde_json::json!("default"),
            ),
            ParameterMetadata::optional(
                "password",
                "Password",
                "Password used for the login proof",
                ParameterType::String,
                serde_json::json!(""),
            ),
            ParameterMetadata::optional(
                "chip",
                "Chip",
                "GPIO chip opened at connect time",
                ParameterType::String,
                serde_json::json!("gpiochip0"),
            ),
        ],
    });

    #[cfg(feature = "devices")]
    {
        drivers.push(DriverMetadata {
            name: "button",
            display_name: "Button",
            description: "Digital input decoded into single/double/long presses.",
            kind: DriverKind::Device,
            example_config: serde_json::json!({
                "gpio": 17,
                "double_press_ms": 500,
                "long_press_ms": 0
            }),
            parameters: vec![
                ParameterMetadata::required(
                    "gpio",
                    "GPIO",
                    "Input GPIO index",
                    ParameterType::Integer,
                ),
                ParameterMetadata::optional(
                    "double_press_ms",
                    "Double-press Window (ms)",
                    "0 disables double-press detection",
                    ParameterType::Integer,
                    serde_json::json!(0),
                ),
                ParameterMetadata::optional(
                    "long_press_ms",
                    "Long-press Threshold (ms)",
                    "0 disables long-press detection",
                    ParameterType::Integer,
                    serde_json::json!(0),
                ),
            ],
        });

        drivers.push(DriverMetadata {
            name: "dht",
            display_name: "Temperature/humidity sensor",
            description: "Single-wire pulse-width sensor with checksum validation.",
            kind: DriverKind::Device,
            example_config: serde_json::json!({ "gpio": 4 }),
            parameters: vec![ParameterMetadata::required(
                "gpio",
                "GPIO",
                "Data GPIO index",
                ParameterType::Integer,
            )],
        });

        drivers.push(DriverMetadata {
            name: "ledchain",
            display_name: "LED chain",
            description: "Bit-banged serial LED chain over clock and data lines.",
            kind: DriverKind::Device,
            example_config: serde_json::json!({
                "clock_gpio": 11,
                "data_gpio": 10,
                "count": 8,
                "encoding": "apa102"
            }),
            parameters: vec![
                ParameterMetadata::required(
                    "clock_gpio",
                    "Clock GPIO",
                    "Clock line GPIO index",
                    ParameterType::Integer,
                ),
                ParameterMetadata::required(
                    "data_gpio",
                    "Data GPIO",
                    "Data line GPIO index",
                    ParameterType::Integer,
                ),
                ParameterMetadata::required(
                    "count",
                    "LED Count",
                    "Number of LEDs on the chain",
                    ParameterType::Integer,
                ),
                ParameterMetadata::optional(
                    "encoding",
                    "Word Encoding",
                    "apa102 or p9813",
                    ParameterType::String,
                    serde_json::json!("apa102"),
                ),
            ],
        });
    }

    DriverRegistry { drivers }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = get_driver_registry();
        assert!(!registry.drivers().is_empty());

        #[cfg(feature = "legacy")]
        {
            let legacy = registry.get("legacy").unwrap();
            assert_eq!(legacy.kind, DriverKind::Variant);
            assert!(legacy.parameters.iter().any(|p| p.name == "host"));
        }

        #[cfg(feature = "devices")]
        {
            let chain = registry.get("LEDCHAIN").unwrap();
            assert_eq!(chain.kind, DriverKind::Device);
        }

        assert!(registry.get("nonexistent").is_none());
    }
}
