use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use pqcnet_negotiator::config::{load_config, ConfigFormat};
use pqcnet_negotiator::service::NegotiationService;
use tracing_subscriber::EnvFilter;

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!(
    "Only one of the `dev`, `test`, or `prod` features may be enabled for pqcnet-negotiator."
);

#[derive(Debug, Parser)]
#[command(
    name = "pqcnet-negotiator",
    version,
    about = "Reference daemon that negotiates algorithm suites between PQC peers"
)]
struct Cli {
    /// Path to configuration file (TOML or YAML).
    #[arg(long, default_value = "configs/pqcnet-negotiator.toml")]
    config: PathBuf,
    /// Explicit configuration format override.
    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,
    /// Number of negotiation rounds to execute before exiting.
    #[arg(long, default_value_t = 1)]
    iterations: u16,
    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let config = load_config(&cli.config, cli.config_format)?;
    let mut service = NegotiationService::new(&config)?;

    for iteration in 0..cli.iterations {
        let report = service.run_iteration()?;
        println!(
            "iteration {}: {} pairs, {} agreed, {} failed, {} mismatches, {} security events",
            iteration + 1,
            report.outcomes.len(),
            report.agreed(),
            report.failed(),
            report.downgrades(),
            report.security_events.len()
        );
    }

    let blacklisted = service.reputation().blacklisted();
    if !blacklisted.is_empty() {
        println!("blacklisted signers: {}", blacklisted.len());
    }

    Ok(())
}
