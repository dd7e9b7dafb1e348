//! Configuration for the croupier binary.
//!
//! Game options come from an optional TOML file; CLI arguments and
//! environment variables override the file.

use std::path::{Path, PathBuf};

use clap::Parser;
use croupier::{GameOptions, HashAlgorithm};
use serde::{Deserialize, Serialize};

/// CLI arguments for croupier.
#[derive(Debug, Parser)]
#[command(name = "croupier")]
#[command(about = "Runs a provably-fair roulette session and logs its rounds")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "CROUPIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// File the session state is resumed from and saved to.
    #[arg(long, env = "CROUPIER_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Stop gracefully after this many rounds.
    #[arg(long, env = "CROUPIER_ROUNDS")]
    pub rounds: Option<u64>,

    /// Hash algorithm for new rounds.
    #[arg(long, env = "CROUPIER_HASH_ALGORITHM", value_parser = parse_algorithm)]
    pub hash_algorithm: Option<HashAlgorithm>,

    /// Number of retired rounds to keep; 0 keeps all of them.
    #[arg(long, env = "CROUPIER_MAX_HISTORY_ITEMS")]
    pub max_history_items: Option<usize>,
}

fn parse_algorithm(s: &str) -> Result<HashAlgorithm, String> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
        .map_err(|_| format!("unknown hash algorithm `{s}`"))
}

/// Configuration for croupier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File the session state is resumed from and saved to.
    pub state_file: Option<PathBuf>,

    /// Stop gracefully after this many rounds.
    pub rounds: Option<u64>,

    /// Options for the session and the rounds it makes.
    pub options: GameOptions,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Load configuration from CLI arguments, optionally overriding a config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let mut config =
            if let Some(ref path) = cli.config { Self::from_file(path)? } else { Self::default() };

        if cli.state_file.is_some() {
            config.state_file = cli.state_file;
        }

        if cli.rounds.is_some() {
            config.rounds = cli.rounds;
        }

        if let Some(algorithm) = cli.hash_algorithm {
            config.options.round_hash_algorithm = algorithm;
        }

        if let Some(max_history_items) = cli.max_history_items {
            config.options.max_history_items = max_history_items;
        }

        Ok(config)
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse configuration file.
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
}
