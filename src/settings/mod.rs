//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An
//! example configuration file can be found in the `configs/` directory located in the repository
//! root.

use std::{fmt, path::Path, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use url::Url;
use validator::{Validate, ValidationErrors};

use crate::ledger::{Address, ProjectId, TransactionParams, Wei, WEI_PER_GWEI};
#[cfg(feature = "reqwest-client")]
use crate::store::IpfsStore;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub identity: IdentitySettings,
    #[validate]
    pub ledger: LedgerSettings,
    pub store: StoreSettings,
    #[validate]
    pub round: RoundSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("fedledger")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Gathers the settings the round controller needs.
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            address: self.identity.address,
            project_id: self.round.project_id,
            poll_interval: Duration::from_millis(self.round.poll_interval_ms),
            max_rounds: self.round.max_rounds,
            transaction: TransactionSettings {
                chain_id: self.ledger.chain_id,
                gas: self.ledger.gas,
                gas_price: Wei::from(self.ledger.gas_price_gwei) * WEI_PER_GWEI,
            },
        }
    }
}

/// The settings a round controller is built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// The account of the participant.
    pub address: Address,
    /// The project the participant trains for.
    pub project_id: ProjectId,
    /// The delay between two polls of the event log.
    pub poll_interval: Duration,
    /// The number of rounds after which the participant stops. `None` means no limit.
    pub max_rounds: Option<u64>,
    pub transaction: TransactionSettings,
}

/// The parameters every transaction of the participant is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSettings {
    pub chain_id: u64,
    pub gas: u64,
    /// Gas price in wei.
    pub gas_price: Wei,
}

impl TransactionSettings {
    /// Builds the parameters of a transaction transferring `value` wei.
    pub fn params(&self, value: Option<Wei>) -> TransactionParams {
        TransactionParams {
            chain_id: self.chain_id,
            gas: self.gas,
            gas_price: self.gas_price,
            value,
        }
    }
}

#[derive(Debug, Deserialize)]
/// Identity settings.
pub struct IdentitySettings {
    /// The address of the ledger account of the participant.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [identity]
    /// address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEDGER_IDENTITY__ADDRESS=0x70997970C51812dc3A010C7d01b50e0d17dc79C8
    /// ```
    pub address: Address,
}

#[derive(Debug, Validate, Deserialize)]
/// Ledger settings.
pub struct LedgerSettings {
    /// The chain id transactions are signed for.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [ledger]
    /// chain_id = 1337
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEDGER_LEDGER__CHAIN_ID=1337
    /// ```
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// The gas limit of every transaction.
    #[serde(default = "default_gas")]
    #[validate(range(min = 21000))]
    pub gas: u64,

    /// The gas price of every transaction, in gwei.
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: u64,
}

fn default_chain_id() -> u64 {
    1337
}

fn default_gas() -> u64 {
    2_000_000
}

fn default_gas_price_gwei() -> u64 {
    2
}

#[derive(Debug, Deserialize)]
/// Content store settings.
pub struct StoreSettings {
    /// The URL of the HTTP API of the store node.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [store]
    /// api_url = "http://127.0.0.1:5001"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEDGER_STORE__API_URL=http://127.0.0.1:5001
    /// ```
    pub api_url: Url,
}

#[cfg(feature = "reqwest-client")]
impl StoreSettings {
    /// Creates a client for the IPFS node at [`api_url`](StoreSettings::api_url).
    pub fn ipfs_store(&self) -> IpfsStore {
        IpfsStore::new(self.api_url.clone())
    }
}

#[derive(Debug, Validate, Deserialize)]
/// Round settings.
pub struct RoundSettings {
    /// The project to train for.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// project_id = 0
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEDGER_ROUND__PROJECT_ID=0
    /// ```
    pub project_id: ProjectId,

    /// The delay between two polls of the event log, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    /// The number of rounds after which the participant stops.
    #[serde(default = "default_max_rounds")]
    #[validate(range(min = 1))]
    pub max_rounds: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_rounds() -> Option<u64> {
    Some(10)
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEDGER_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/struct.EnvFilter.html
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a valid tracing filter directive: \
                 https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/\
                 struct.EnvFilter.html#directives"
            )
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
