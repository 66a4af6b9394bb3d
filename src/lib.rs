//! # remgpio
//!
//! A client library for remote GPIO-control daemons, supporting both
//! daemon protocol generations behind one interface, plus the
//! higher-level hardware behaviors built on the primitive GPIO
//! operations: button press decoding, pulse-width sensor decoding and
//! bit-banged LED chain driving.
//!
//! ## Features
//!
//! - **One interface, two wires**: `DaemonClient` hides the legacy and
//!   current protocol variants; pick one at construction time
//! - **Event driven**: GPIO edges, watchdog re-announcements and
//!   connection changes fan out over one broadcast bus
//! - **Strict sequencing**: at most one command in flight per socket,
//!   timeouts are connection-fatal
//! - **Feature gated**: compile only the variant(s) and drivers you need
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use remgpio::prelude::*;
//! use remgpio::client::legacy::{LegacyClient, LegacyClientConfig};
//!
//! let client = LegacyClient::new(LegacyClientConfig::new("192.168.1.30"));
//! client.connect().await?;
//! client.listen(1 << 17).await?;
//!
//! let mut rx = client.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     if let ClientEvent::Gpio(ev) = event {
//!         println!("GPIO {} -> {}", ev.gpio, ev.level);
//!     }
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod codec;
pub mod core;
pub mod notify;

#[cfg(feature = "devices")]
#[cfg_attr(docsrs, doc(cfg(feature = "devices")))]
pub mod devices;

#[cfg(all(feature = "devices", any(feature = "legacy", feature = "current")))]
#[cfg_attr(
    docsrs,
    doc(cfg(all(feature = "devices", any(feature = "legacy", feature = "current"))))
)]
pub mod hub;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        error::{ClientError, Result},
        event::{ClientEvent, ClientEventReceiver, GpioEvent},
        traits::{ConnectionState, DaemonClient, GpioMode, GpioPull, ProtocolVariant},
    };
}

// Re-export core types at crate root for convenience.
pub use crate::core::error::{ClientError, Result};
pub use crate::core::event::{ClientEvent, ClientEventReceiver, ClientEventSender, GpioEvent};
pub use crate::core::traits::{
    ConnectionState, DaemonClient, Diagnostics, GpioMode, GpioPull, GpioWrite, ProtocolVariant,
};
