//! # hwc-session
//!
//! Display-compositor session service. Loads its configuration, starts the
//! device event listener, brings up every display slot and runs until
//! terminated.

use anyhow::Result;
use clap::Parser;
use log::{error, info};

use hwc_session::{HwcService, SessionConfig};

#[derive(Parser)]
#[command(name = "hwc-session")]
#[command(about = "Session layer of a hardware display-compositor service")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/hwc-session/hwc.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Number of builtin panel slots
    #[arg(long)]
    builtin: Option<usize>,

    /// Number of pluggable output slots
    #[arg(long)]
    pluggable: Option<usize>,

    /// Apply power changes synchronously
    #[arg(long)]
    sync_power: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting hwc-session");
    info!("📄 Version: {}", env!("CARGO_PKG_VERSION"));
    info!("🔨 Built: {}", env!("BUILD_DATE"));

    // Load configuration
    let mut config = match SessionConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
            SessionConfig::default()
        }
    };

    // Override config with CLI flags
    if let Some(builtin) = cli.builtin {
        config.display.builtin = builtin;
    }
    if let Some(pluggable) = cli.pluggable {
        config.display.pluggable = pluggable;
    }
    if cli.sync_power {
        config.display.async_power_mode = false;
        info!("⚡ Asynchronous power changes disabled via CLI flag");
    }
    if cli.debug {
        config.general.debug = true;
    }
    config.validate()?;

    let service = HwcService::new(config)?;
    info!("✨ hwc-session is ready");
    service.run().await?;

    info!("👋 hwc-session shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["hwc-session"]).unwrap();
        assert!(!cli.debug);
        assert!(!cli.sync_power);
        assert!(cli.builtin.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "hwc-session",
            "--debug",
            "--builtin",
            "2",
            "--pluggable",
            "0",
            "--sync-power",
        ])
        .unwrap();
        assert!(cli.debug);
        assert!(cli.sync_power);
        assert_eq!(cli.builtin, Some(2));
        assert_eq!(cli.pluggable, Some(0));
    }
}
