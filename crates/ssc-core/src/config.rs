//! Node configuration
//!
//! Loaded from a camelCase JSON file. Every key except `chainId` has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::SandboxSettings;
use crate::store::is_alphanumeric;
use crate::value::Value;

/// A contract deployed by the genesis block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedContract {
    pub name: String,
    pub owner: String,
    /// Inline source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Source file; relative paths are resolved against the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Payload handed to `createSSC`
    #[serde(default)]
    pub params: Value,
}

impl SeedContract {
    pub fn load_code(&self) -> Result<String> {
        match (&self.code, &self.path) {
            (Some(code), _) => Ok(code.clone()),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("genesis contract '{}': cannot read {}: {}", self.name, path.display(), e))
            }),
            (None, None) => Err(Error::Config(format!("genesis contract '{}' has neither code nor path", self.name))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub chain_id: String,
    #[serde(default)]
    pub genesis_source_block: u64,
    #[serde(default = "default_store_url", rename = "storeURL")]
    pub store_url: String,
    #[serde(default = "default_store_name")]
    pub store_name: String,
    #[serde(default = "default_timeout_ms")]
    pub contract_execution_timeout_ms: u64,
    #[serde(default)]
    pub source_stream_endpoints: Vec<String>,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    #[serde(default)]
    pub authorized_deployers: Vec<String>,
    #[serde(default)]
    pub genesis_contracts: Vec<SeedContract>,
}

fn default_store_url() -> String {
    "memory://".to_string()
}

fn default_store_name() -> String {
    "ssc".to_string()
}

fn default_timeout_ms() -> u64 {
    SandboxSettings::default().timeout.as_millis() as u64
}

fn default_max_call_depth() -> usize {
    SandboxSettings::default().max_call_depth
}

impl NodeConfig {
    /// In-memory configuration with defaults for everything but the chain id
    pub fn new(chain_id: impl Into<String>) -> Self {
        NodeConfig {
            chain_id: chain_id.into(),
            genesis_source_block: 0,
            store_url: default_store_url(),
            store_name: default_store_name(),
            contract_execution_timeout_ms: default_timeout_ms(),
            source_stream_endpoints: Vec::new(),
            max_call_depth: default_max_call_depth(),
            authorized_deployers: Vec::new(),
            genesis_contracts: Vec::new(),
        }
    }

    /// Load and validate a config file. Seed contract paths are made
    /// absolute relative to the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: NodeConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for seed in &mut config.genesis_contracts {
            if let Some(path) = seed.path.take() {
                seed.path = Some(if path.is_relative() { base.join(path) } else { path });
            }
        }

        config.validate().map_err(|problems| Error::Config(problems.join("; ")))?;
        Ok(config)
    }

    /// Collect every problem rather than stopping at the first
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.chain_id.trim().is_empty() {
            problems.push("chainId must not be empty".to_string());
        }
        if self.store_name.is_empty() {
            problems.push("storeName must not be empty".to_string());
        }
        if self.contract_execution_timeout_ms == 0 {
            problems.push("contractExecutionTimeoutMs must be positive".to_string());
        }
        if self.max_call_depth == 0 {
            problems.push("maxCallDepth must be at least 1".to_string());
        }
        for seed in &self.genesis_contracts {
            if !is_alphanumeric(&seed.name) {
                problems.push(format!("genesis contract name '{}' must be alphanumeric", seed.name));
            }
            if seed.owner.is_empty() {
                problems.push(format!("genesis contract '{}' needs an owner", seed.name));
            }
            if seed.code.is_some() == seed.path.is_some() {
                problems.push(format!("genesis contract '{}' needs exactly one of code or path", seed.name));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    pub fn sandbox_settings(&self) -> SandboxSettings {
        SandboxSettings {
            timeout: Duration::from_millis(self.contract_execution_timeout_ms),
            max_call_depth: self.max_call_depth,
            authorized_deployers: self.authorized_deployers.clone(),
        }
    }
}
