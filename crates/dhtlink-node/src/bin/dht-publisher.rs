//! dht-publisher - publish DHT11 readings to the broker.

use std::path::PathBuf;

use dhtlink_client::Client;
use dhtlink_node::{
    logging, run_publisher, Config, SimulatedSensor, TelemetryPublisher, PUBLISHER_CLIENT_ID,
};
use log::{error, info};

fn parse_config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = Config::default_path();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("Error: -c requires a file path");
                    std::process::exit(1);
                }
            }
            "-h" | "--help" => {
                println!("dht-publisher - publish DHT11 telemetry over MQTT/TLS");
                println!();
                println!("Usage: dht-publisher [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     Config file path (default: $DHTLINK_CONFIG or dhtlink.toml)");
                println!("  -h, --help              Show this help message");
                println!();
                println!("Settings can be overridden with DHTLINK__ environment variables:");
                println!("  DHTLINK__BROKER__HOST=broker.example.com");
                println!("  DHTLINK__TELEMETRY__PUBLISH_INTERVAL_SECS=10");
                println!("  DHTLINK__LOG__LEVEL=debug");
                std::process::exit(0);
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }
    config_path
}

fn main() {
    let config_path = parse_config_path();
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&config.log);
    info!("Loaded configuration from {}", config_path.display());

    let client_config = config.client_config(PUBLISHER_CLIENT_ID);
    info!(
        "Publishing to {} on {} as {}",
        config.telemetry.topic,
        client_config.address(),
        client_config.client_id
    );

    // No DHT11 driver is linked in; readings come from the simulated sensor.
    let mut publisher = match TelemetryPublisher::new(SimulatedSensor::new(), &config.telemetry) {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut client = Client::new(client_config);
    if let Err(e) = client.connect() {
        error!("Failed to connect: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run_publisher(&mut client, &mut publisher) {
        error!("Publisher stopped after {} messages: {}", publisher.published(), e);
        std::process::exit(1);
    }
}
