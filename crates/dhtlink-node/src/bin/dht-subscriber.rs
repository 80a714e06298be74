//! dht-subscriber - print DHT11 telemetry received from the broker.

use std::path::PathBuf;

use dhtlink_client::Client;
use dhtlink_node::{logging, run_subscriber, Config, SUBSCRIBER_CLIENT_ID};
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
                println!("dht-subscriber - log DHT11 telemetry received over MQTT/TLS");
                println!();
                println!("Usage: dht-subscriber [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     Config file path (default: $DHTLINK_CONFIG or dhtlink.toml)");
                println!("  -h, --help              Show this help message");
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

    let client_config = config.client_config(SUBSCRIBER_CLIENT_ID);
    info!(
        "Connecting to {} as {}",
        client_config.address(),
        client_config.client_id
    );

    let mut client = Client::new(client_config);
    if let Err(e) = client.connect() {
        error!("Failed to connect: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run_subscriber(&mut client, &config.telemetry) {
        error!("Subscriber stopped: {}", e);
        std::process::exit(1);
    }
}
