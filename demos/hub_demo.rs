//! Hub demo: load a TOML config, connect to the daemon, attach the
//! configured devices and print the unified event stream.
//!
//! Shows the intended embedding pattern: the library never reconnects on
//! its own; this runtime re-establishes the session on its next
//! heartbeat tick after a disconnect event.
//!
//! # Run
//!
//! ```bash
//! cargo run --example hub_demo -- config.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use remgpio::hub::{Hub, HubConfig};
use remgpio::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "hub_demo", about = "remgpio hub demo")]
struct Args {
    /// Configuration file path
    config: PathBuf,

    /// Output events as JSON Lines
    #[arg(long)]
    jsonl: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> remgpio::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "info,remgpio=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_str = std::fs::read_to_string(&args.config)
        .map_err(|e| ClientError::Config(format!("cannot read {:?}: {}", args.config, e)))?;
    let config: HubConfig =
        toml::from_str(&config_str).map_err(|e| ClientError::Config(e.to_string()))?;

    let hub = Hub::from_config(&config).await?;
    let client = Arc::clone(hub.client());
    let mask = hub.mask();

    eprintln!(
        "Connected ({} daemon), {} buttons, {} sensors, {} chains. Press Ctrl+C to stop.",
        client.variant(),
        hub.buttons().len(),
        hub.sensors().len(),
        hub.chains().len(),
    );

    // Press/reading subscribers, one task per device.
    for button in hub.buttons() {
        let name = button.name.clone();
        let mut rx = button.device.subscribe();
        let jsonl = args.jsonl;
        tokio::spawn(async move {
            while let Ok(press) = rx.recv().await {
                if jsonl {
                    println!(
                        "{}",
                        serde_json::json!({ "type": "press", "button": name, "press": format!("{:?}", press) })
                    );
                } else {
                    println!("[PRESS] {}: {:?}", name, press);
                }
            }
        });
    }
    for sensor in hub.sensors() {
        let name = sensor.name.clone();
        let mut rx = sensor.device.subscribe();
        let jsonl = args.jsonl;
        tokio::spawn(async move {
            while let Ok(reading) = rx.recv().await {
                if jsonl {
                    println!(
                        "{}",
                        serde_json::json!({
                            "type": "reading",
                            "sensor": name,
                            "temperature_c": reading.temperature_c,
                            "humidity_pct": reading.humidity_pct,
                        })
                    );
                } else {
                    println!(
                        "[READING] {}: {:.1} degC, {:.1} %RH",
                        name, reading.temperature_c, reading.humidity_pct
                    );
                }
            }
        });
    }

    // Main loop: events, plus a heartbeat that triggers sensor reads
    // while healthy and reconnects after a drop (the library itself
    // never reconnects).
    let mut events = client.subscribe();
    let mut heartbeat = tokio::time::interval(Duration::from_millis(config.heartbeat_ms));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = heartbeat.tick() => {
                if client.connection_state().is_connected() {
                    for sensor in hub.sensors() {
                        if let Err(e) = sensor.device.trigger().await {
                            warn!(sensor = %sensor.name, error = %e, "sensor trigger failed");
                        }
                    }
                } else {
                    eprintln!("Heartbeat: reconnecting...");
                    match client.connect().await {
                        Ok(()) => {
                            if mask != 0 {
                                if let Err(e) = client.listen(mask).await {
                                    warn!(error = %e, "re-arming notifications failed");
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "reconnect failed, retrying next heartbeat"),
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, args.jsonl),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("Warning: event receiver lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    eprintln!("\nShutting down...");
    client.disconnect().await?;
    eprintln!("Stopped.");
    Ok(())
}

fn print_event(event: &ClientEvent, jsonl: bool) {
    match event {
        ClientEvent::ConnectionChanged(state) => {
            if jsonl {
                println!(
                    "{}",
                    serde_json::json!({ "type": "connection", "state": state })
                );
            } else {
                println!("[CONNECTION] {}", state);
            }
        }
        ClientEvent::Gpio(ev) => {
            if jsonl {
                println!("{}", serde_json::json!({ "type": "gpio", "event": ev }));
            } else {
                let marker = if ev.watchdog { " (watchdog)" } else { "" };
                println!(
                    "[GPIO] {} -> {} at {} us{}",
                    ev.gpio, ev.level as u8, ev.tick_us, marker
                );
            }
        }
        ClientEvent::Warning(msg) => {
            eprintln!("[WARNING] {}", msg);
        }
    }
}
