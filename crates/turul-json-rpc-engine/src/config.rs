//! Configuration types for engines and duplex adapters

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instance name, attached to log lines and signals
    pub name: String,

    /// First correlation id handed out by this instance (must be positive)
    pub first_id: u64,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether to log every dispatched inbound message at debug level
    pub log_inbound: bool,

    /// Whether to log every outgoing message at debug level
    pub log_outbound: bool,

    /// Whether to log unobserved anomaly signals at warn level
    pub log_unobserved: bool,
}

/// How the duplex adapter exchanges chunks with its transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Raw bytes, buffered until the write side ends; batch replies are
    /// array-framed
    #[default]
    Bytes,
    /// Each chunk is one already-decoded JSON value
    Objects,
}

/// Duplex adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexConfig {
    pub framing: Framing,

    pub engine: EngineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "json-rpc".to_string(),
            first_id: 1,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_inbound: true,
            log_outbound: true,
            log_unobserved: true,
        }
    }
}

impl EngineConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Config for a child engine: same logging, derived name, fresh ids
    pub fn child_of(parent: &EngineConfig) -> Self {
        Self {
            name: format!("{}/child", parent.name),
            first_id: 1,
            logging: parent.logging.clone(),
        }
    }
}

impl DuplexConfig {
    pub fn objects() -> Self {
        Self {
            framing: Framing::Objects,
            ..Self::default()
        }
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DuplexConfig::default();
        assert_eq!(config.framing, Framing::Bytes);
        assert_eq!(config.engine.first_id, 1);
        assert!(config.engine.logging.log_unobserved);
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: DuplexConfig =
            serde_json::from_str(r#"{"framing":"objects","engine":{"name":"worker"}}"#).unwrap();
        assert_eq!(config.framing, Framing::Objects);
        assert_eq!(config.engine.name, "worker");
        assert_eq!(config.engine.first_id, 1);
    }

    #[test]
    fn test_child_config() {
        let parent = EngineConfig::named("root");
        let child = EngineConfig::child_of(&parent);
        assert_eq!(child.name, "root/child");
        assert_eq!(child.first_id, 1);
    }
}
