//! KrakenD configuration checker
//!
//! Loads a configuration file the way the gateway does and reports whether it is valid.

use anyhow::Context;
use clap::{Parser as _, ValueEnum};
use krakend_config::{Parser, ServiceConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Check (and optionally print) a KrakenD configuration file
#[derive(clap::Parser, Debug)]
#[command(name = "krakend-config")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (.json, .yml/.yaml or .toml)
    #[arg(env = "KRAKEND_CONFIG_FILE")]
    config: PathBuf,

    /// Nested key delimiter used by KRAKEND_* overrides
    #[arg(short, long, default_value = krakend_config::parser::DEFAULT_DELIMITER)]
    delimiter: String,

    /// Skip the configuration's validation step
    #[arg(long)]
    skip_init: bool,

    /// Print the normalized configuration
    #[arg(short, long)]
    print: bool,

    /// Output format for --print
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Toml,
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let layer = fmt::layer().with_writer(std::io::stderr);

    if args.log_json {
        tracing_subscriber::registry()
            .with(layer.json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .init();
    }
}

fn render(config: &ServiceConfig, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to render configuration as JSON")
        }
        OutputFormat::Toml => {
            let mut value =
                serde_json::to_value(config).context("Failed to render configuration as TOML")?;
            drop_nulls(&mut value);
            toml::to_string_pretty(&value).context("Failed to render configuration as TOML")
        }
    }
}

/// TOML has no null: table entries holding one are left out and null array
/// items are dropped.
fn drop_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        serde_json::Value::Array(items) => {
            items.retain(|v| !v.is_null());
            items.iter_mut().for_each(drop_nulls);
        }
        _ => {}
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Checking configuration"
    );

    let parser = Parser::with_delimiter(&args.delimiter);
    let loaded = if args.skip_init {
        parser.parse_without_init::<ServiceConfig>(&args.config)
    } else {
        parser.parse::<ServiceConfig>(&args.config)
    };
    let config = loaded.inspect_err(|e| error!(error = %e, "Failed to load configuration"))?;

    if args.print {
        println!("{}", render(&config, args.format)?);
    } else {
        println!("Syntax OK!");
    }

    Ok(())
}
