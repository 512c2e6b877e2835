//! nat-upnp CLI
//!
//! Discover the local NAT gateway and manage its port mappings.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use nat_upnp::{Client, DeletePortMapping, MappingFilter, NewPortMapping, Protocol};
use regex::Regex;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

use config::Config;
use progress::{Spinner, format_lease};

/// nat-upnp - UPnP gateway port mapping
#[derive(Parser)]
#[command(name = "nat-upnp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Description URL of the gateway (skips discovery)
    #[arg(long, requires = "local_address")]
    url: Option<Url>,

    /// Local address the gateway reaches this host on
    #[arg(long)]
    local_address: Option<IpAddr>,

    /// Discovery timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the gateway and show its details
    Discover,

    /// Show the gateway's public IP address
    Ip,

    /// Open a port on the gateway
    Map {
        /// Public port
        public: u16,

        /// Private port (defaults to the public port)
        private: Option<u16>,

        /// Protocol
        #[arg(short, long, default_value = "tcp")]
        protocol: Protocol,

        /// Lease in seconds; 0 asks for no expiry
        #[arg(long)]
        ttl: Option<u32>,

        /// Description stored on the gateway
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Close a port on the gateway
    Unmap {
        /// Public port
        public: u16,

        /// Protocol
        #[arg(short, long, default_value = "tcp")]
        protocol: Protocol,
    },

    /// List port mappings
    List {
        /// Only mappings that forward to this host
        #[arg(short, long)]
        local: bool,

        /// Only mappings whose description contains this text
        #[arg(short, long, conflicts_with = "pattern")]
        description: Option<String>,

        /// Only mappings whose description matches this regular expression
        #[arg(long)]
        pattern: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Command-line flags win over the file
    if let Some(url) = &cli.url {
        config.gateway.url = Some(url.to_string());
    }
    if let Some(local_address) = cli.local_address {
        config.gateway.local_address = Some(local_address.to_string());
    }
    if let Some(timeout) = cli.timeout {
        config.gateway.timeout_ms = timeout;
    }

    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let client = Client::new(config.client_config()?)?;

    let result = match cli.command {
        Commands::Discover => discover(&client).await,
        Commands::Ip => public_ip(&client).await,
        Commands::Map {
            public,
            private,
            protocol,
            ttl,
            description,
        } => {
            let mut mapping = NewPortMapping::new(public).protocol(protocol);
            if let Some(private) = private {
                mapping = mapping.private(private);
            }
            if let Some(ttl) = ttl {
                mapping = mapping.ttl(ttl);
            }
            if let Some(description) = description {
                mapping = mapping.description(description);
            }
            map(&client, &mapping).await
        }
        Commands::Unmap { public, protocol } => {
            unmap(&client, &DeletePortMapping::new(public).protocol(protocol)).await
        }
        Commands::List {
            local,
            description,
            pattern,
        } => {
            let mut filter = MappingFilter::all();
            if local {
                filter = filter.local();
            }
            if let Some(text) = description {
                filter = filter.description_contains(text);
            }
            if let Some(pattern) = pattern {
                let regex = Regex::new(&pattern)
                    .with_context(|| format!("invalid pattern {pattern:?}"))?;
                filter = filter.description_pattern(regex);
            }
            list(&client, &filter).await
        }
    };

    client.close();
    result
}

/// Resolve the gateway and print where it is
async fn discover(client: &Client) -> anyhow::Result<()> {
    let spinner = Spinner::new("Searching for gateway");
    let gateway = client
        .resolve_gateway()
        .await
        .context("no gateway found")?;
    spinner.finish();

    println!("{}", style("Gateway").bold());
    println!("  Location:      {}", gateway.control_location());
    println!("  Local address: {}", gateway.local_address());

    match gateway.device().info().await {
        Ok(info) => {
            let unknown = || "unknown".to_string();
            println!(
                "  Name:          {}",
                info.friendly_name.clone().unwrap_or_else(unknown)
            );
            println!(
                "  Manufacturer:  {}",
                info.manufacturer.clone().unwrap_or_else(unknown)
            );
            println!(
                "  Model:         {}",
                info.model_name.clone().unwrap_or_else(unknown)
            );
        }
        Err(e) => tracing::warn!("Could not read device description: {e}"),
    }

    Ok(())
}

/// Print the public IP address
async fn public_ip(client: &Client) -> anyhow::Result<()> {
    let spinner = Spinner::new("Asking gateway for public IP");
    let ip = client.get_public_ip().await?;
    spinner.finish();

    println!("{ip}");
    Ok(())
}

/// Open a port
async fn map(client: &Client, mapping: &NewPortMapping) -> anyhow::Result<()> {
    tracing::info!("Mapping public {:?} ({:?})", mapping.public, mapping.protocol);

    let spinner = Spinner::new("Creating port mapping");
    client
        .create_mapping(mapping)
        .await
        .context("failed to create mapping")?;
    spinner.finish();

    println!("{} mapping created", style("✓").green());
    Ok(())
}

/// Close a port
async fn unmap(client: &Client, mapping: &DeletePortMapping) -> anyhow::Result<()> {
    tracing::info!("Removing public {:?} ({:?})", mapping.public, mapping.protocol);

    let spinner = Spinner::new("Removing port mapping");
    client
        .remove_mapping(mapping)
        .await
        .context("failed to remove mapping")?;
    spinner.finish();

    println!("{} mapping removed", style("✓").green());
    Ok(())
}

/// Print a table of mappings
async fn list(client: &Client, filter: &MappingFilter) -> anyhow::Result<()> {
    let spinner = Spinner::new("Reading port mappings");
    let mappings = client.get_mappings(filter).await?;
    spinner.finish();

    if mappings.is_empty() {
        println!("No port mappings");
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "{:<5} {:<22} {:<22} {:<8} {:<10} {}",
            "PROTO", "PUBLIC", "PRIVATE", "ENABLED", "LEASE", "DESCRIPTION"
        ))
        .bold()
    );
    for mapping in &mappings {
        // Pad before styling so escape codes do not skew the columns
        let private = format!("{:<22}", mapping.internal.to_string());
        let private = if mapping.is_local {
            style(private).cyan().to_string()
        } else {
            private
        };
        println!(
            "{:<5} {:<22} {} {:<8} {:<10} {}",
            mapping.protocol.to_string(),
            mapping.remote.to_string(),
            private,
            if mapping.enabled { "yes" } else { "no" },
            format_lease(mapping.lease_seconds),
            mapping.description
        );
    }
    println!("\n{} mapping(s)", mappings.len());

    Ok(())
}
