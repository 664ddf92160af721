//! Configuration types for qrand.
//!
//! Configuration is an optional YAML file. Every field has a default matching
//! the observed node deployment, so an empty (or missing) file drives
//! `merod`/`meroctl` for `node1` on ports 2427/2527.

use crate::extractor::ExtractionRules;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Upper bound for every timeout and retry delay, in seconds.
const MAX_WAIT_SECS: u64 = 86_400;

/// Upper bound for `extraction.min_token_len`.
const MAX_TOKEN_LEN: usize = 256;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QrandConfig {
    /// Node and control-client invocation settings.
    #[serde(default)]
    pub node: NodeConfig,

    /// Per-operation timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry policy for context and identity discovery.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Extraction rules for client listing output.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Seed payload settings.
    #[serde(default)]
    pub seed: SeedConfig,

    /// Pseudo-terminal geometry for the node process.
    #[serde(default)]
    pub pty: TerminalConfig,
}

impl QrandConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config = Self::from_yaml(&content)?;
        debug!(
            node = %config.node.name,
            node_binary = %config.node.node_binary,
            client_binary = %config.node.client_binary,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parses configuration from YAML text. Empty text yields defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validates the configuration and returns warnings.
    ///
    /// Values that would make a session impossible are errors: empty names or
    /// markers, colliding ports, no attempts, no readiness window, out-of-range
    /// waits or token lengths, and a malformed seed.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        for (field, value) in [
            ("node.name", &self.node.name),
            ("node.node_binary", &self.node.node_binary),
            ("node.client_binary", &self.node.client_binary),
            ("node.ready_marker", &self.node.ready_marker),
            ("extraction.separator", &self.extraction.separator),
            (
                "extraction.own_identity_marker",
                &self.extraction.own_identity_marker,
            ),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        }

        if self.node.server_port == self.node.swarm_port {
            return Err(ConfigError::Invalid {
                field: "node.swarm_port".to_string(),
                message: format!(
                    "server and swarm ports must differ (both are {})",
                    self.node.server_port
                ),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts".to_string(),
                message: "at least one attempt is required".to_string(),
            });
        }

        if self.timeouts.ready == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts.ready".to_string(),
                message: "readiness timeout must be positive".to_string(),
            });
        }

        for (field, secs) in [
            ("timeouts.init", self.timeouts.init),
            ("timeouts.ready", self.timeouts.ready),
            ("timeouts.discovery", self.timeouts.discovery),
            ("timeouts.command", self.timeouts.command),
            ("timeouts.reap_grace", self.timeouts.reap_grace),
            ("timeouts.terminate_grace", self.timeouts.terminate_grace),
            ("retry.delay_secs", self.retry.delay_secs),
        ] {
            if secs > MAX_WAIT_SECS {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    message: format!("{secs}s exceeds the {MAX_WAIT_SECS}s limit"),
                });
            }
        }

        if self.extraction.min_token_len > MAX_TOKEN_LEN {
            return Err(ConfigError::Invalid {
                field: "extraction.min_token_len".to_string(),
                message: format!(
                    "{} exceeds the {MAX_TOKEN_LEN} character limit",
                    self.extraction.min_token_len
                ),
            });
        }

        if self.seed.count == 0 {
            return Err(ConfigError::Invalid {
                field: "seed.count".to_string(),
                message: "seed needs at least one value".to_string(),
            });
        }

        if self.seed.source == SeedSourceKind::Fixed && self.seed.values.len() != self.seed.count {
            return Err(ConfigError::Invalid {
                field: "seed.values".to_string(),
                message: format!(
                    "expected {} values, found {}",
                    self.seed.count,
                    self.seed.values.len()
                ),
            });
        }

        if !self.node.init
            && (self.node.server_port != default_server_port()
                || self.node.swarm_port != default_swarm_port())
        {
            warnings.push(ConfigWarning::IgnoredField {
                field: "node.server_port/node.swarm_port".to_string(),
                reason: "ports are only passed to `init`, which is disabled".to_string(),
            });
        }

        if self.extraction.min_token_len < 8 {
            warnings.push(ConfigWarning::SuspiciousValue {
                field: "extraction.min_token_len".to_string(),
                message: format!(
                    "{} is short enough to match table headers",
                    self.extraction.min_token_len
                ),
            });
        }

        if self.seed.source == SeedSourceKind::Random && self.seed.values != default_seed_values() {
            warnings.push(ConfigWarning::IgnoredField {
                field: "seed.values".to_string(),
                reason: "random seed source draws fresh values".to_string(),
            });
        }

        Ok(warnings)
    }

    /// Retry policy applied to discovery steps.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.delay_secs),
        )
    }

    /// Extraction rules built from the `extraction` section.
    pub fn extraction_rules(&self) -> Result<ExtractionRules, ConfigError> {
        ExtractionRules::new(
            self.extraction.min_token_len,
            &self.extraction.separator,
            &self.extraction.own_identity_marker,
        )
        .map_err(|e| ConfigError::Invalid {
            field: "extraction".to_string(),
            message: e.to_string(),
        })
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Field is present but has no effect with the current settings.
    IgnoredField { field: String, reason: String },
    /// Field is valid but probably not what was meant.
    SuspiciousValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::IgnoredField { field, reason } => {
                write!(f, "Warning [{}]: Field ignored - {}", field, reason)
            }
            ConfigWarning::SuspiciousValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
        }
    }
}

/// Node and control-client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Value passed to `--node-name` on every invocation.
    #[serde(default = "default_node_name")]
    pub name: String,

    /// The long-running node executable.
    #[serde(default = "default_node_binary")]
    pub node_binary: String,

    /// The one-shot control client executable.
    #[serde(default = "default_client_binary")]
    pub client_binary: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_swarm_port")]
    pub swarm_port: u16,

    /// Substring the node logs once peer networking is up.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    /// Run `init` before `run`.
    #[serde(default = "default_true")]
    pub init: bool,

    /// Log node output at info level instead of debug.
    #[serde(default)]
    pub echo_output: bool,

    /// Line written to the node's terminal before it is signaled.
    #[serde(default)]
    pub shutdown_line: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_node_name() -> String {
    "node1".to_string()
}

fn default_node_binary() -> String {
    "merod".to_string()
}

fn default_client_binary() -> String {
    "meroctl".to_string()
}

fn default_server_port() -> u16 {
    2427
}

fn default_swarm_port() -> u16 {
    2527
}

fn default_ready_marker() -> String {
    "INFO libp2p_swarm: local_peer_id=".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            node_binary: default_node_binary(),
            client_binary: default_client_binary(),
            server_port: default_server_port(),
            swarm_port: default_swarm_port(),
            ready_marker: default_ready_marker(),
            init: true,
            echo_output: false,
            shutdown_line: None,
        }
    }
}

/// Per-operation timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// One-shot `init` call.
    #[serde(default = "default_init_timeout")]
    pub init: u64,

    /// Waiting for the readiness marker.
    #[serde(default = "default_ready_timeout")]
    pub ready: u64,

    /// Each `context ls` / `identity ls` call.
    #[serde(default = "default_discovery_timeout")]
    pub discovery: u64,

    /// Each `call` invocation.
    #[serde(default = "default_command_timeout")]
    pub command: u64,

    /// Wait after signaling a stale instance, for ports to be released.
    #[serde(default = "default_reap_grace")]
    pub reap_grace: u64,

    /// Wait after SIGTERM before the node is force-killed.
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace: u64,
}

fn default_init_timeout() -> u64 {
    30
}

fn default_ready_timeout() -> u64 {
    15
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    15
}

fn default_reap_grace() -> u64 {
    2
}

fn default_terminate_grace() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            init: default_init_timeout(),
            ready: default_ready_timeout(),
            discovery: default_discovery_timeout(),
            command: default_command_timeout(),
            reap_grace: default_reap_grace(),
            terminate_grace: default_terminate_grace(),
        }
    }
}

/// Discovery retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_secs() -> u64 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

/// Shape of identifier rows in `context ls` / `identity ls` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,

    /// Column separator following the identifier.
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Marker on the row of the node's own identity.
    #[serde(default = "default_own_identity_marker")]
    pub own_identity_marker: String,
}

fn default_min_token_len() -> usize {
    43
}

fn default_separator() -> String {
    "|".to_string()
}

fn default_own_identity_marker() -> String {
    "Yes".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_token_len: default_min_token_len(),
            separator: default_separator(),
            own_identity_marker: default_own_identity_marker(),
        }
    }
}

/// Where seed values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedSourceKind {
    /// Use `seed.values` verbatim.
    #[default]
    Fixed,
    /// Draw `8 * seed.count` random bits per session.
    Random,
}

/// Seed payload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub source: SeedSourceKind,

    #[serde(default = "default_seed_values")]
    pub values: Vec<u8>,

    #[serde(default = "default_seed_count")]
    pub count: usize,
}

fn default_seed_values() -> Vec<u8> {
    vec![10, 20, 30, 40]
}

fn default_seed_count() -> usize {
    4
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            source: SeedSourceKind::Fixed,
            values: default_seed_values(),
            count: default_seed_count(),
        }
    }
}

/// Pseudo-terminal geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_cols")]
    pub cols: u16,

    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_cols() -> u16 {
    120
}

fn default_rows() -> u16 {
    40
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QrandConfig::default();
        assert_eq!(config.node.name, "node1");
        assert_eq!(config.node.node_binary, "merod");
        assert_eq!(config.node.client_binary, "meroctl");
        assert_eq!(config.node.server_port, 2427);
        assert_eq!(config.node.swarm_port, 2527);
        assert!(config.node.init);
        assert_eq!(config.timeouts.ready, 15);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_secs, 2);
        assert_eq!(config.seed.values, vec![10, 20, 30, 40]);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = QrandConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.node.ready_marker, "INFO libp2p_swarm: local_peer_id=");
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
node:
  name: "node2"
  server_port: 2428
  swarm_port: 2528
  shutdown_line: "exit"
retry:
  max_attempts: 8
seed:
  source: random
  values: []
"#;
        let config = QrandConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.node.name, "node2");
        assert_eq!(config.node.node_binary, "merod");
        assert_eq!(config.node.shutdown_line.as_deref(), Some("exit"));
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.delay_secs, 2);
        assert_eq!(config.seed.source, SeedSourceKind::Random);
        assert_eq!(config.retry_policy().max_attempts(), 8);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let yaml = r#"
node:
  name: "node1"
  future_flag: true
telemetry: on
"#;
        assert!(QrandConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = QrandConfig::default();
        config.retry.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry.max_attempts"));
    }

    #[test]
    fn test_validate_rejects_equal_ports() {
        let mut config = QrandConfig::default();
        config.node.swarm_port = config.node.server_port;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "node.swarm_port"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_binary() {
        let mut config = QrandConfig::default();
        config.node.client_binary = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_identity_marker() {
        let mut config = QrandConfig::default();
        config.extraction.own_identity_marker = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "extraction.own_identity_marker"
        ));
    }

    #[test]
    fn test_validate_rejects_huge_waits() {
        let mut config = QrandConfig::default();
        config.timeouts.ready = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeouts.ready"));

        let mut config = QrandConfig::default();
        config.timeouts.terminate_grace = MAX_WAIT_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = QrandConfig::default();
        config.retry.delay_secs = MAX_WAIT_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_huge_token_len() {
        let mut config = QrandConfig::default();
        config.extraction.min_token_len = 1_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("extraction.min_token_len"));

        config.extraction.min_token_len = MAX_TOKEN_LEN;
        assert!(config.validate().is_ok());
        assert!(config.extraction_rules().is_ok());
    }

    #[test]
    fn test_unbuildable_rules_are_errors() {
        let mut config = QrandConfig::default();
        config.extraction.min_token_len = 1_000_000;
        assert!(matches!(
            config.extraction_rules(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "extraction"
        ));
    }

    #[test]
    fn test_validate_fixed_seed_length() {
        let mut config = QrandConfig::default();
        config.seed.values = vec![1, 2, 3];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("expected 4 values, found 3"));

        // Random sources ignore the values list
        config.seed.source = SeedSourceKind::Random;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().contains("seed.values"));
    }

    #[test]
    fn test_ports_without_init_warns() {
        let mut config = QrandConfig::default();
        config.node.init = false;
        config.node.server_port = 3000;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().contains("Field ignored"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrand.yml");
        std::fs::write(&path, "timeouts:\n  ready: 30\n").unwrap();
        let config = QrandConfig::from_file(&path).unwrap();
        assert_eq!(config.timeouts.ready, 30);
        assert_eq!(config.timeouts.command, 15);
    }
}
