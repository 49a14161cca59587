use std::collections::HashSet;
use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use pqcnet_negotiation::audit::{DEFAULT_REPUTATION_CAPACITY, DEFAULT_REPUTATION_RETENTION_MS};
use pqcnet_negotiation::catalog::CatalogSnapshot;
use pqcnet_negotiation::config::NegotiationConfig;
use pqcnet_negotiation::policy::SecurityRequirements;
use pqcnet_negotiation::preferences::AlgorithmPreferences;
use pqcnet_negotiation::types::{AlgorithmCategory, AlgorithmId, SecurityLevel};
use serde::Deserialize;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub negotiator: NegotiatorSection,
    #[serde(default)]
    pub negotiation: NegotiationConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NegotiatorSection {
    pub peers: Vec<PeerConfig>,
    /// Signers the reputation table tracks at once.
    #[serde(default = "default_reputation_capacity")]
    pub reputation_capacity: usize,
    /// How long unverified reports against a signer are kept.
    #[serde(default = "default_reputation_retention_secs")]
    pub reputation_retention_secs: u64,
}

/// Simulated peer. Lists left out follow the catalog's default ranking.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PeerConfig {
    pub id: String,
    /// Hex-encoded 32-byte Ed25519 seed.
    pub signing_seed: String,
    #[serde(default)]
    pub signature: Option<Vec<AlgorithmId>>,
    #[serde(default)]
    pub hash: Option<Vec<AlgorithmId>>,
    #[serde(default)]
    pub key_exchange: Option<Vec<AlgorithmId>>,
    #[serde(default)]
    pub encryption: Option<Vec<AlgorithmId>>,
    #[serde(default = "default_min_protocol_version")]
    pub min_protocol_version: u16,
    #[serde(default = "default_max_protocol_version")]
    pub max_protocol_version: u16,
    #[serde(default = "default_min_security_level")]
    pub min_security_level: SecurityLevel,
    #[serde(default)]
    pub allow_deprecated: bool,
    /// Local policy override for this peer's side of every negotiation.
    #[serde(default)]
    pub requirements: Option<SecurityRequirements>,
}

const fn default_reputation_capacity() -> usize {
    DEFAULT_REPUTATION_CAPACITY
}

const fn default_reputation_retention_secs() -> u64 {
    DEFAULT_REPUTATION_RETENTION_MS / 1_000
}

const fn default_min_protocol_version() -> u16 {
    1
}

const fn default_max_protocol_version() -> u16 {
    2
}

const fn default_min_security_level() -> SecurityLevel {
    SecurityLevel::Level128
}

impl PeerConfig {
    pub fn sample(id: &str, seed_byte: u8) -> Self {
        Self {
            id: id.into(),
            signing_seed: hex::encode([seed_byte; 32]),
            signature: None,
            hash: None,
            key_exchange: None,
            encryption: None,
            min_protocol_version: default_min_protocol_version(),
            max_protocol_version: default_max_protocol_version(),
            min_security_level: default_min_security_level(),
            allow_deprecated: false,
            requirements: None,
        }
    }

    pub fn seed(&self) -> Result<[u8; 32], ConfigError> {
        let bytes = hex::decode(&self.signing_seed).map_err(|err| {
            ConfigError::Validation(format!("peer {} signing-seed: {err}", self.id))
        })?;
        bytes.try_into().map_err(|_| {
            ConfigError::Validation(format!("peer {} signing-seed must be 32 bytes", self.id))
        })
    }

    /// Declared preferences; explicit lists replace the catalog defaults.
    pub fn preferences(&self, catalog: &CatalogSnapshot) -> AlgorithmPreferences {
        let mut prefs = AlgorithmPreferences::from_catalog(
            catalog,
            self.min_protocol_version,
            self.max_protocol_version,
        );
        prefs.min_security_level = self.min_security_level;
        prefs.allow_deprecated = self.allow_deprecated;
        for category in AlgorithmCategory::ALL {
            if let Some(list) = self.list(category) {
                *prefs.list_mut(category) = list.clone();
            }
        }
        prefs
    }

    fn list(&self, category: AlgorithmCategory) -> Option<&Vec<AlgorithmId>> {
        match category {
            AlgorithmCategory::Signature => self.signature.as_ref(),
            AlgorithmCategory::Hash => self.hash.as_ref(),
            AlgorithmCategory::KeyExchange => self.key_exchange.as_ref(),
            AlgorithmCategory::Encryption => self.encryption.as_ref(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.negotiator.peers.len() < 2 {
            return Err(ConfigError::Validation(
                "at least two peers must be defined".into(),
            ));
        }
        if self.negotiator.reputation_capacity == 0 {
            return Err(ConfigError::Validation(
                "reputation-capacity must be greater than zero".into(),
            ));
        }
        let mut ids = HashSet::new();
        for peer in &self.negotiator.peers {
            if !ids.insert(peer.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate peer id {}",
                    peer.id
                )));
            }
            peer.seed()?;
            if peer.min_protocol_version > peer.max_protocol_version {
                return Err(ConfigError::Validation(format!(
                    "peer {} has an empty protocol version range",
                    peer.id
                )));
            }
            if let Some(requirements) = &peer.requirements {
                requirements
                    .validate()
                    .map_err(|err| ConfigError::Validation(err.to_string()))?;
            }
        }
        self.negotiation
            .validate()
            .map_err(|err| ConfigError::Validation(err.to_string()))
    }

    pub fn sample() -> Self {
        Self {
            negotiator: NegotiatorSection {
                peers: vec![PeerConfig::sample("alice", 0xa1), PeerConfig::sample("bob", 0xb0)],
                reputation_capacity: default_reputation_capacity(),
                reputation_retention_secs: default_reputation_retention_secs(),
            },
            negotiation: NegotiationConfig::default(),
        }
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse {
                format: ConfigFormat::Toml,
                details: err.to_string(),
            })
        }
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}
