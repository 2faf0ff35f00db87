use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chainbook::config::{default_config_path, Config};
use chainbook::duration::format_duration;
use chainbook::ledger::EthereumLedger;
use chainbook::market_data::build_router;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chainbook")]
#[command(about = "USD valuation of exchange and on-chain activity")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show current configuration
    Config,

    /// Historical USD price of a currency
    Quote {
        symbol: String,

        /// RFC 3339 timestamp, e.g. 2021-04-01T00:00:00Z
        at: String,
    },

    /// Priced activity of the configured Ethereum address
    Ethereum {
        /// Override the configured address
        #[arg(long)]
        address: Option<String>,

        /// Only records strictly after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,

        /// Print the fetched transfer groups instead of valued records
        #[arg(long)]
        raw: bool,
    },
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid RFC 3339 timestamp: {value}"))?
        .with_timezone(&Utc))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    match cli.command {
        Some(Command::Config) => {
            println!("Config file: {}", config_path.display());
            println!(
                "Retry: {} attempts, {} backoff",
                config.retry.max_attempts,
                format_duration(config.retry.backoff)
            );
            println!(
                "Rate limit: {} cooldown, {} attempts",
                format_duration(config.rate_limit.cooldown),
                config.rate_limit.max_attempts
            );
            let names: Vec<String> = config
                .price_source_registry()
                .into_iter()
                .map(|s| s.name)
                .collect();
            println!("Price sources: {}", names.join(", "));
            match &config.ethereum {
                Some(eth) => println!("Ethereum address: {}", eth.address),
                None => println!("Ethereum address: (not configured)"),
            }
        }
        Some(Command::Quote { symbol, at }) => {
            let at = parse_timestamp(&at)?;
            let router = build_router(&config);
            let price = router.resolve_quote(&symbol.to_uppercase(), at).await;
            println!("{}", serde_json::json!({ "symbol": symbol.to_uppercase(), "at": at, "usd": price }));
        }
        Some(Command::Ethereum {
            address,
            since,
            raw,
        }) => {
            let mut eth = config
                .ethereum
                .clone()
                .context("No [ethereum] section in config")?;
            if let Some(address) = address {
                eth.address = address;
            }
            let since = since.as_deref().map(parse_timestamp).transpose()?;

            let router = Arc::new(build_router(&config));
            let mut ledger = EthereumLedger::from_config(&eth, router);
            if raw {
                let groups = ledger.raw_records().await?;
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else {
                let records = ledger.all_transactions(since).await?;
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
        }
        None => {
            println!("chainbook - USD valuation of crypto activity");
            println!("=============================================\n");
            println!("Config: {}\n", config_path.display());
            println!("Commands:");
            println!("  config      Show current configuration");
            println!("  quote       Historical USD price of a currency");
            println!("  ethereum    Priced activity of an Ethereum address\n");
            println!("Run 'chainbook --help' for more options.");
        }
    }

    Ok(())
}
