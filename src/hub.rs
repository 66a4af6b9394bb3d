//! Hub runtime: configuration, client factory and device registry.
//!
//! The hub is the thin assembly layer over the core: it builds one
//! client, validates and attaches the configured devices (rejecting
//! duplicate GPIO registrations before any I/O), arms one combined
//! notification mask, and hands the embedding application the attached
//! drivers. Reconnect policy stays with the embedder (observed pattern:
//! reconnect on the next scheduled heartbeat).

pub mod config;
pub mod factory;

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::error::{ClientError, Result};
use crate::core::traits::DaemonClient;
use crate::devices::button::{Button, ButtonConfig};
use crate::devices::dht::{Dht, DhtConfig};
use crate::devices::ledchain::{LedChain, LedChainConfig};

pub use config::{ButtonDef, DaemonParams, DhtDef, HubConfig, LedChainDef};
pub use factory::create_client;

/// A named attached device.
pub struct Named<T> {
    /// Display name from the configuration.
    pub name: String,
    /// The attached driver.
    pub device: T,
}

/// The assembled hub.
pub struct Hub {
    client: Arc<dyn DaemonClient>,
    buttons: Vec<Named<Button>>,
    sensors: Vec<Named<Dht>>,
    chains: Vec<Named<LedChain>>,
    mask: u32,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let button_names: Vec<&str> = self.buttons.iter().map(|d| d.name.as_str()).collect();
        let sensor_names: Vec<&str> = self.sensors.iter().map(|d| d.name.as_str()).collect();
        let chain_names: Vec<&str> = self.chains.iter().map(|d| d.name.as_str()).collect();
        f.debug_struct("Hub")
            .field("buttons", &button_names)
            .field("sensors", &sensor_names)
            .field("chains", &chain_names)
            .field("mask", &self.mask)
            .finish()
    }
}

impl Hub {
    /// Build a hub from configuration: create and connect the client,
    /// attach every device, and arm the combined notification mask.
    pub async fn from_config(config: &HubConfig) -> Result<Self> {
        let client = factory::create_client(&config.daemon)?;
        Self::assemble(client, config).await
    }

    /// Assemble a hub around an existing client (used by embedders that
    /// construct the client themselves).
    pub async fn assemble(client: Arc<dyn DaemonClient>, config: &HubConfig) -> Result<Self> {
        // Reject duplicate registrations before any I/O.
        let mut used: HashSet<u8> = HashSet::new();
        let mut claim = |gpio: u8| -> Result<()> {
            if !used.insert(gpio) {
                return Err(ClientError::validation(format!(
                    "GPIO {} registered by more than one device",
                    gpio
                )));
            }
            Ok(())
        };
        let mut mask = 0u32;
        for b in &config.buttons {
            claim(b.gpio)?;
            mask |= 1u32 << b.gpio;
        }
        for s in &config.sensors {
            claim(s.gpio)?;
            mask |= 1u32 << s.gpio;
        }
        for c in &config.led_chains {
            claim(c.clock_gpio)?;
            claim(c.data_gpio)?;
        }

        client.connect().await?;

        let mut buttons = Vec::with_capacity(config.buttons.len());
        for def in &config.buttons {
            let button_config = ButtonConfig::new(def.gpio)
                .with_double_press_ms(def.double_press_ms)
                .with_long_press_ms(def.long_press_ms);
            buttons.push(Named {
                name: name_or(&def.name, "button", def.gpio),
                device: Button::attach(Arc::clone(&client), button_config).await?,
            });
        }

        let mut sensors = Vec::with_capacity(config.sensors.len());
        for def in &config.sensors {
            sensors.push(Named {
                name: name_or(&def.name, "dht", def.gpio),
                device: Dht::attach(Arc::clone(&client), DhtConfig::new(def.gpio)).await?,
            });
        }

        let mut chains = Vec::with_capacity(config.led_chains.len());
        for def in &config.led_chains {
            let chain_config =
                LedChainConfig::new(def.clock_gpio, def.data_gpio, def.count, def.encoding);
            chains.push(Named {
                name: name_or(&def.name, "ledchain", def.data_gpio),
                device: LedChain::attach(Arc::clone(&client), chain_config).await?,
            });
        }

        if mask != 0 {
            client.listen(mask).await?;
        }

        Ok(Self {
            client,
            buttons,
            sensors,
            chains,
            mask,
        })
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<dyn DaemonClient> {
        &self.client
    }

    /// Attached buttons.
    pub fn buttons(&self) -> &[Named<Button>] {
        &self.buttons
    }

    /// Attached sensors.
    pub fn sensors(&self) -> &[Named<Dht>] {
        &self.sensors
    }

    /// Attached LED chains.
    pub fn chains(&self) -> &[Named<LedChain>] {
        &self.chains
    }

    /// Attached LED chains (mutable: chain operations mutate frames).
    pub fn chains_mut(&mut self) -> &mut [Named<LedChain>] {
        &mut self.chains
    }

    /// Combined notification mask.
    pub fn mask(&self) -> u32 {
        self.mask
    }
}

fn name_or(name: &Option<String>, kind: &str, gpio: u8) -> String {
    match name {
        Some(n) => n.clone(),
        None => format!("{}-{}", kind, gpio),
    }
}
