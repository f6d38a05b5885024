//! Load an ISR or flat-finishing configuration, validate it and print the
//! fully resolved YAML (defaults filled in).
//!
//! ```bash
//! cargo run --bin isr_config -- isr.yaml
//! cargo run --bin isr_config -- --flat flat.yaml --log-level debug
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use common::FileFormat;
use common::log_setup::{setup_logging, setup_logging_with_file};
use obs_subaru::{FlatConfig, IsrConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (.yaml, .yml or .json)
    path: PathBuf,

    /// Treat the file as a flat-finishing configuration
    #[arg(long)]
    flat: bool,

    /// Base log level; RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write daily-rolling log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match &cli.log_dir {
        Some(dir) => setup_logging_with_file(&cli.log_level, dir, "isr_config")?,
        None => setup_logging(&cli.log_level)?,
    }

    let resolved = if cli.flat {
        let config = FlatConfig::load(&cli.path)
            .with_context(|| format!("loading flat config {}", cli.path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating flat config {}", cli.path.display()))?;
        common::serialize(&config, FileFormat::Yaml)?
    } else {
        let config = IsrConfig::load(&cli.path)
            .with_context(|| format!("loading ISR config {}", cli.path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating ISR config {}", cli.path.display()))?;
        config.to_yaml()?
    };

    tracing::info!(path = %cli.path.display(), flat = cli.flat, "configuration is valid");
    print!("{resolved}");
    Ok(())
}
