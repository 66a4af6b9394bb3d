//! remgpio CLI entry point.
//!
//! Utility front-end for the library: list what this build supports,
//! dump the per-variant opcode tables, and generate example hub
//! configuration.

use clap::{Parser, Subcommand};

use remgpio::core::metadata::{get_driver_registry, DriverKind};

/// Remote GPIO daemon client toolkit.
#[derive(Parser, Debug)]
#[command(name = "remgpio", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List supported protocol variants and device drivers
    ListDrivers,

    /// Print the opcode table of a protocol variant
    Opcodes {
        /// Variant to print (legacy | current)
        variant: String,
    },

    /// Generate an example hub configuration
    Example {
        /// Protocol variant to generate for
        #[arg(default_value = "legacy")]
        variant: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::ListDrivers => list_drivers(),
        Commands::Opcodes { variant } => print_opcodes(&variant),
        Commands::Example { variant } => generate_example(&variant),
    }
}

fn list_drivers() {
    let registry = get_driver_registry();

    println!("Protocol variants:");
    for driver in registry.drivers() {
        if driver.kind == DriverKind::Variant {
            println!("  {} ({})", driver.name, driver.display_name);
            println!("    {}", driver.description);
        }
    }
    println!();
    println!("Device drivers:");
    for driver in registry.drivers() {
        if driver.kind == DriverKind::Device {
            println!("  {} ({})", driver.name, driver.display_name);
            println!("    {}", driver.description);
        }
    }
    println!();
    println!("For a complete hub demo, run:");
    println!("  cargo run --example hub_demo -- <config.toml>");
}

fn print_opcodes(variant: &str) {
    if variant.eq_ignore_ascii_case("legacy") {
        for (number, name) in remgpio::codec::legacy::opcode_table() {
            println!("{:>5}  {}", number, name);
        }
    } else if variant.eq_ignore_ascii_case("current") {
        for (number, name) in remgpio::codec::current::opcode_table() {
            println!("{:>5}  {}", number, name);
        }
    } else {
        eprintln!("Unknown variant: {}", variant);
        eprintln!("Available: legacy, current");
    }
}

fn generate_example(variant: &str) {
    let example = if variant.eq_ignore_ascii_case("legacy") {
        r#"# remgpio hub configuration - legacy daemon

heartbeat_ms = 60000

[daemon]
variant = "legacy"

[daemon.parameters]
host = "192.168.1.30"
port = 8888
response_timeout_ms = 5000

[[buttons]]
name = "doorbell"
gpio = 17
double_press_ms = 500

[[buttons]]
name = "hold-switch"
gpio = 27
long_press_ms = 1200

[[sensors]]
name = "attic"
gpio = 4

[[led_chains]]
name = "shelf"
clock_gpio = 11
data_gpio = 10
count = 8
encoding = "apa102"
"#
    } else if variant.eq_ignore_ascii_case("current") {
        r#"# remgpio hub configuration - current daemon

heartbeat_ms = 60000

[daemon]
variant = "current"

[daemon.parameters]
host = "192.168.1.30"
port = 8889
user = "hub"
password = "secret"
chip = "gpiochip0"

[[buttons]]
name = "doorbell"
gpio = 17
double_press_ms = 500

[[sensors]]
name = "attic"
gpio = 4

[[led_chains]]
name = "shelf"
clock_gpio = 11
data_gpio = 10
count = 8
encoding = "p9813"
"#
    } else {
        eprintln!("Unknown variant: {}", variant);
        eprintln!("Available: legacy, current");
        return;
    };

    println!("{}", example);
}
