//! fksd binary entry point.

use clap::Parser;
use fksd::{telemetry, Config, DnsServer};
use std::path::PathBuf;
use tracing::{error, info};

/// Authoritative DNS server with a TSIG-authenticated control channel.
#[derive(Parser, Debug)]
#[command(name = "fksd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML). Optional; defaults apply without it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (UDP and TCP), keeping the configured address.
    #[arg(short, long)]
    port: Option<u16>,

    /// Superuser identity.
    #[arg(short, long)]
    user: Option<String>,

    /// Superuser shared secret (base64).
    #[arg(short, long)]
    key: Option<String>,

    /// Log every incoming query.
    #[arg(short, long)]
    log: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut builder = config::Config::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.clone()));
    }
    let mut config: Config = builder
        .add_source(
            config::Environment::with_prefix("FKSD")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("dns.superuser", args.user.clone())?
        .set_override_option("dns.superuser_key", args.key.clone())?
        .build()?
        .try_deserialize()?;

    if let Some(port) = args.port {
        config.dns.listen_addr.set_port(port);
    }
    if args.log {
        config.dns.log_queries = true;
    }

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = ?args.config,
        listen_addr = %config.dns.listen_addr,
        superuser = %config.dns.superuser,
        log_queries = config.dns.log_queries,
        "Starting fksd"
    );

    // Run DNS server until interrupted
    let result = match DnsServer::new(config.dns) {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };

    // Shutdown telemetry
    telemetry::shutdown();

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("fksd shutdown complete");
    Ok(())
}
