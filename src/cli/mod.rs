//! CLI module

pub mod commands;

pub use commands::Cli;

pub fn run(cli: Cli, config: crate::config::Config) -> anyhow::Result<()> {
    commands::run(cli, config)
}
