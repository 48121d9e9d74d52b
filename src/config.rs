use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardError};
use crate::hash::HashMethod;
use crate::hash_ring::{HashRing, RingSpec};

/// Environment variables with this prefix override file settings, e.g. `SHARD_REPLICAS=40`.
pub const ENV_PREFIX: &str = "SHARD";

/// One backend node.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// node identifier on the ring
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub password: Option<String>,
    /// seconds a blocking pop waits; 0 waits indefinitely
    #[serde(default)]
    pub block_timeout: u64,
}

impl ServerConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_secs(self.block_timeout)
    }
}

/// The `servers` / `hash` / `replicas` descriptor a router is built from.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ShardConfig {
    pub servers: Vec<ServerConfig>,
    pub hash: String,
    pub replicas: i64,
}

impl ShardConfig {
    /// Loads a descriptor file (format by extension) and applies `SHARD_*` overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ShardConfig> {
        let path = path.as_ref();
        let mut settings = Config::default();
        settings
            .merge(File::from(path))?
            .merge(Environment::with_prefix(ENV_PREFIX))?;

        let conf: ShardConfig = settings.try_into()?;
        info!("shard configuration {:?}: {:?}", path, conf);
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_json_str(json: &str) -> Result<ShardConfig> {
        let mut settings = Config::default();
        settings.merge(File::from_str(json, FileFormat::Json))?;
        let conf: ShardConfig = settings.try_into()?;
        conf.validate()?;
        Ok(conf)
    }

    /// Command-line values take precedence over the loaded ones.
    pub fn apply_overrides(&mut self, hash: Option<String>, replicas: Option<i64>) -> Result<()> {
        if let Some(hash) = hash {
            self.hash = hash;
        }
        if let Some(replicas) = replicas {
            self.replicas = replicas;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        HashMethod::lookup(&self.hash)?;
        if self.replicas <= 0 {
            return Err(ShardError::InvalidReplicaCount(self.replicas));
        }
        if self.servers.is_empty() {
            return Err(ConfigError::Message("no servers configured".to_owned()).into());
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::Message(format!("server {:?} has no name", server.host)).into());
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ShardError::DuplicateNode(server.name.clone()));
            }
        }
        Ok(())
    }

    pub fn node_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn ring_spec(&self) -> Result<RingSpec> {
        Ok(RingSpec {
            nodes: self.node_names(),
            hash_method: HashMethod::lookup(&self.hash)?,
            replicas: self.replicas,
        })
    }

    pub fn build_ring(&self) -> Result<HashRing> {
        HashRing::from_spec(&self.ring_spec()?)
    }
}
