use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

use crate::model::{CacheKey, CheckResult, Peer, DEFAULT_MAX_DEPTH};
use crate::ring::DEFAULT_VIRTUAL_NODES;
use crate::schema::Schema;
use crate::store::Tuple;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything a node needs to build its dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Address peers use to reach this node.
    #[serde(default = "default_advertise_addr")]
    pub advertise_addr: String,

    /// Static membership seed; the local node is added implicitly.
    #[serde(default)]
    pub peers: Vec<Peer>,

    #[serde(default)]
    pub ring: RingConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub schema: Schema,

    /// Initial facts, written `type:id#relation@subject`.
    #[serde(default)]
    pub tuples: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            advertise_addr: default_advertise_addr(),
            peers: Vec::new(),
            ring: RingConfig::default(),
            dispatch: DispatchConfig::default(),
            cache: CacheConfig::default(),
            schema: Schema::default(),
            tuples: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pre-seeded results. Keys without a subject hold for every subject.
    #[serde(default)]
    pub seed: Vec<SeedEntry>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            seed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub key: String,
    pub allowed: bool,
}

impl SeedEntry {
    pub fn to_entry(&self) -> ConfigResult<(CacheKey, CheckResult)> {
        let key: CacheKey = self
            .key
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("cache seed '{}': {}", self.key, e)))?;
        Ok((key, CheckResult::new(self.allowed)))
    }
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_advertise_addr() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_virtual_nodes() -> usize {
    DEFAULT_VIRTUAL_NODES
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_true() -> bool {
    true
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let file = File::open(path)?;
        let config: NodeConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(s: &str) -> ConfigResult<Self> {
        let config: NodeConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn local_peer(&self) -> Peer {
        Peer::new(self.node_id.clone(), self.advertise_addr.clone())
    }

    pub fn seed_entries(&self) -> ConfigResult<Vec<(CacheKey, CheckResult)>> {
        self.cache.seed.iter().map(SeedEntry::to_entry).collect()
    }

    pub fn parsed_tuples(&self) -> ConfigResult<Vec<Tuple>> {
        self.tuples
            .iter()
            .map(|t| {
                t.parse::<Tuple>()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.ring.virtual_nodes == 0 {
            return Err(ConfigError::Invalid(
                "ring.virtual_nodes must be at least 1".into(),
            ));
        }
        if self.dispatch.max_depth == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_depth must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if !seen.insert(peer.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate peer id '{}'", peer.id)));
            }
        }

        self.schema.validate().map_err(ConfigError::Invalid)?;
        if !self.cache.enabled && !self.cache.seed.is_empty() {
            return Err(ConfigError::Invalid(
                "cache.seed requires cache.enabled".into(),
            ));
        }
        self.seed_entries()?;
        self.parsed_tuples()?;
        Ok(())
    }
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationRule;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = NodeConfig::from_json("{}").unwrap();
        assert!(!config.node_id.is_empty());
        assert_eq!(config.ring.virtual_nodes, 128);
        assert_eq!(config.dispatch.max_depth, 50);
        assert_eq!(config.dispatch.request_timeout, Duration::from_millis(5000));
        assert!(config.cache.enabled);
        assert!(config.schema.is_empty());
    }

    #[test]
    fn test_node_config_serde() {
        let json = r#"{
            "node_id": "node-a",
            "advertise_addr": "10.0.0.1:7070",
            "peers": [{ "id": "node-b", "address": "10.0.0.2:7070" }],
            "dispatch": { "request_timeout": 250 },
            "cache": { "seed": [{ "key": "document:1#editor", "allowed": true }] },
            "schema": { "document": { "editor": "direct", "viewer": { "computed": "editor" } } },
            "tuples": ["document:2#editor@user:alice"]
        }"#;
        let config = NodeConfig::from_json(json).unwrap();

        assert_eq!(config.local_peer(), Peer::new("node-a", "10.0.0.1:7070"));
        assert_eq!(config.dispatch.request_timeout, Duration::from_millis(250));
        assert_eq!(
            config.schema.rule("document", "viewer"),
            Some(&RelationRule::computed("editor"))
        );
        let seed = config.seed_entries().unwrap();
        assert_eq!(seed[0].0.as_str(), "document:1#editor");
        assert_eq!(config.parsed_tuples().unwrap().len(), 1);

        let round_trip: NodeConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(round_trip.dispatch.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            r#"{ "node_id": "" }"#,
            r#"{ "ring": { "virtual_nodes": 0 } }"#,
            r#"{ "dispatch": { "max_depth": 0 } }"#,
            r#"{ "peers": [{ "id": "b", "address": "x" }, { "id": "b", "address": "y" }] }"#,
            r#"{ "schema": { "document": { "viewer": { "computed": "editor" } } } }"#,
            r#"{ "cache": { "seed": [{ "key": "document#editor", "allowed": true }] } }"#,
            r#"{ "tuples": ["document:1#editor"] }"#,
            r#"{ "cache": { "enabled": false, "seed": [{ "key": "document:1#editor", "allowed": true }] } }"#,
        ];
        for json in cases {
            let err = NodeConfig::from_json(json).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{}: {:?}", json, err);
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "node_id": "from-file" }}"#).unwrap();
        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, "from-file");

        let missing = NodeConfig::from_file("/nonexistent/relcheck.json").unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }

    #[test]
    fn test_demo_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/node.json");
        let config = NodeConfig::from_file(path).unwrap();
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.parsed_tuples().unwrap().len(), 3);
        assert!(config.schema.rule("document", "viewer").is_some());
    }
}
