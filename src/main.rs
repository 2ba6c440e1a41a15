//! Chatstore - versioned, indexed local storage for a chat client's agents and conversations

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use chatstore::cli::{self, Cli};
use chatstore::config::Config;

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize logging before the config is read so its messages are kept.
    // The filter is swapped for the configured one once it is known.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let initial = match &env_filter {
        Some(filter) => filter.to_string(),
        None => Config::default().log_filter,
    };
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(args.config.as_deref())?;
    if env_filter.is_none() {
        reload_handle.reload(config.env_filter()?)?;
    }

    tracing::info!("Starting Chatstore v{}", env!("CARGO_PKG_VERSION"));

    // Run CLI
    cli::run(args, config)?;

    Ok(())
}
