use anyhow::Result;
use config::Config;
use serde::Deserialize;

use crate::provider::{IsolationLevel, TxOptions};
use crate::run::{RetryPolicy, RunOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub transaction: TransactionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    /// `0` disables retries, a negative count retries without bound.
    pub serialization_retries: RetryPolicy,
}

impl TransactionConfig {
    /// ## Summary
    /// Returns the run options described by this configuration. Transaction
    /// options are left unset when neither an isolation level nor read-only
    /// mode is configured, so the backend default applies.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        let options = RunOptions::new().retry_serialization(self.serialization_retries);

        if self.isolation.is_none() && !self.read_only {
            return options;
        }

        options.tx_options(TxOptions {
            isolation: self.isolation,
            read_only: self.read_only,
        })
    }
}

impl Settings {
    /// ## Summary
    /// Loads configuration from environment variables and an optional
    /// `config.toml`. Environment variables take precedence.
    ///
    /// ## Errors
    /// Returns an error if building the configuration or deserializing it fails.
    pub fn load() -> Result<Self> {
        Ok(Self::builder()?
            .add_source(
                config::Environment::default()
                    .convert_case(config::Case::Snake)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("database.max_connections", 4)?
            .set_default("transaction.read_only", false)?
            .set_default("transaction.serialization_retries", 0)?
            // TOML file
            .add_source(config::File::with_name("config.toml").required(false)))
    }
}

/// ## Summary
/// Loads configuration from environment variables and `.env` file.
///
/// ## Errors
/// Returns an error if loading or deserializing the configuration fails.
pub fn load_config() -> Result<Settings> {
    dotenvy::dotenv().ok();

    Settings::load()
}
