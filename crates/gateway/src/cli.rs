use clap::{Parser, Subcommand};

use invorto_domain::config::Config;

/// Invorto — realtime voice-agent gateway.
#[derive(Debug, Parser)]
#[command(name = "invorto", version, about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the config file, falling back to defaults when it is absent.
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let config: Config =
                toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "config file not found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!("reading {path}: {e}")),
    }
}
