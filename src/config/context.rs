//! Read-only execution context with layer provenance
//!
//! Built once per invocation and shared by reference with every stage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::errors::{DriverError, DriverResult};

/// Origin of a configuration layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Keys whose values are hidden when the context is displayed
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "private_key", "passphrase"];

/// Lookup of dynamic per-stage settings.
///
/// Null values count as absent.
pub trait ConfigProvider {
    fn get(&self, stage: &str, key: &str) -> Option<&Value>;

    fn get_str(&self, stage: &str, key: &str) -> Option<&str> {
        self.get(stage, key).and_then(Value::as_str)
    }

    /// Fetch a required string, failing with `MissingDynamicConfiguration("stage.key")`
    fn require_str(&self, stage: &str, key: &str) -> DriverResult<&str> {
        self.get_str(stage, key)
            .ok_or_else(|| DriverError::MissingDynamicConfiguration(format!("{}.{}", stage, key)))
    }
}

/// Merged configuration for one tool invocation
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    config: Value,
    sources: Vec<ConfigSource>,
    verbosity: Level,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            config: BuiltinDefaults::default().to_value(),
            sources: vec![ConfigSource {
                origin: ConfigOrigin::Builtin,
                path: None,
                digest: None,
            }],
            verbosity: Level::WARN,
        }
    }
}

impl ExecutionContext {
    /// Build the context from the config file (if it exists) and CLI overrides
    pub fn build(config_path: Option<&Path>, overrides: &[String]) -> Result<Self, ConfigError> {
        let mut context = Self::default();
        let mut layers = vec![context.config.take()];

        if let Some(path) = config_path {
            if path.exists() {
                let (value, digest) = load_toml_file(path)?;
                layers.push(value);
                context.sources.push(ConfigSource {
                    origin: ConfigOrigin::File,
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                });
            }
        }

        if !overrides.is_empty() {
            for raw in overrides {
                let (key_path, value) = parse_override(raw)?;
                layers.push(nest(&key_path, value));
            }
            context.sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        context.config = merge_layers(layers);
        Ok(context)
    }

    /// Build a context directly from a JSON overlay on top of the defaults
    pub fn from_value(overlay: Value) -> Self {
        let mut context = Self::default();
        context.config = merge_layers(vec![context.config.take(), overlay]);
        context.sources.push(ConfigSource {
            origin: ConfigOrigin::Cli,
            path: None,
            digest: None,
        });
        context
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".config/stagewright/config.toml")
    }

    pub fn with_verbosity(mut self, level: Level) -> Self {
        self.verbosity = level;
        self
    }

    /// Log level for this run, handed to every shell runner
    pub fn verbosity(&self) -> Level {
        self.verbosity
    }

    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// Look up `global.<key>`
    pub fn global(&self, key: &str) -> Option<&Value> {
        self.config
            .get("global")
            .and_then(|g| g.get(key))
            .filter(|v| !v.is_null())
    }

    /// Names of all stages that have a configuration table
    pub fn stage_names(&self) -> Vec<&str> {
        self.config
            .get("stages")
            .and_then(Value::as_object)
            .map(|stages| stages.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Pretty JSON of the merged config with secrets hidden
    pub fn to_redacted_json(&self) -> Result<String, serde_json::Error> {
        let mut shown = self.config.clone();
        redact(&mut shown);
        serde_json::to_string_pretty(&serde_json::json!({
            "config": shown,
            "sources": self.sources,
        }))
    }
}

impl ConfigProvider for ExecutionContext {
    fn get(&self, stage: &str, key: &str) -> Option<&Value> {
        self.config
            .get("stages")
            .and_then(|s| s.get(stage))
            .and_then(|s| s.get(key))
            .filter(|v| !v.is_null())
    }
}

/// Parse a `stage.key=value` override.
///
/// `global.<key>` targets the global table; anything else lands under
/// `stages`. The value is read as a TOML scalar when possible and kept as a
/// plain string otherwise.
pub fn parse_override(raw: &str) -> Result<(Vec<String>, Value), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(raw.to_string()))?;

    let parts: Vec<&str> = key.trim().split('.').collect();
    if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::InvalidOverride(raw.to_string()));
    }

    let mut path = Vec::with_capacity(parts.len() + 1);
    if parts[0] != "global" {
        path.push("stages".to_string());
    }
    path.extend(parts.iter().map(|p| p.to_string()));

    Ok((path, parse_scalar(value.trim())))
}

fn parse_scalar(raw: &str) -> Value {
    match toml::from_str::<toml::Table>(&format!("v = {}", raw)) {
        Ok(mut table) => match table.remove("v") {
            Some(value) => toml_to_json(value),
            None => Value::String(raw.to_string()),
        },
        Err(_) => Value::String(raw.to_string()),
    }
}

fn nest(path: &[String], value: Value) -> Value {
    path.iter().rev().fold(value, |inner, key| {
        let mut map = serde_json::Map::new();
        map.insert(key.clone(), inner);
        Value::Object(map)
    })
}

/// Load and parse a TOML file, returning the value and digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

    let table: toml::Table = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

    Ok((toml_to_json(toml::Value::Table(table)), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));
                if is_secret && !val.is_object() && !val.is_array() {
                    *val = Value::String("[REDACTED]".to_string());
                } else {
                    redact(val);
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("invalid override `{0}`, expected `stage.key=value`")]
    InvalidOverride(String),

    #[error("invalid value for `{key}`: expected {expected}, got {value}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_only() {
        let context = ExecutionContext::build(None, &[]).unwrap();

        assert_eq!(context.get_str("wdb", "device"), Some("xilinx_u50_gen3x16_xdma_201920_3"));
        assert_eq!(context.global("root_dir"), Some(&Value::String(".".into())));
        assert_eq!(context.sources().len(), 1);
        assert_eq!(context.verbosity(), Level::WARN);
    }

    #[test]
    fn test_missing_key_is_named() {
        let context = ExecutionContext::default();
        let err = context.require_str("wdb", "host").unwrap_err();
        match err {
            DriverError::MissingDynamicConfiguration(name) => assert_eq!(name, "wdb.host"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cli_overrides() {
        let overrides = vec![
            "wdb.host=src/host.cpp".to_string(),
            "wdb.ssh_port=2222".to_string(),
            "global.root_dir=/opt/tool".to_string(),
        ];
        let context = ExecutionContext::build(None, &overrides).unwrap();

        assert_eq!(context.get_str("wdb", "host"), Some("src/host.cpp"));
        assert_eq!(context.get("wdb", "ssh_port").and_then(Value::as_u64), Some(2222));
        assert_eq!(context.global("root_dir").and_then(Value::as_str), Some("/opt/tool"));
        assert_eq!(context.sources().last().unwrap().origin, ConfigOrigin::Cli);
    }

    #[test]
    fn test_invalid_override() {
        assert!(matches!(
            parse_override("nokey"),
            Err(ConfigError::InvalidOverride(_))
        ));
        assert!(matches!(
            parse_override("wdb=1"),
            Err(ConfigError::InvalidOverride(_))
        ));
    }

    #[test]
    fn test_null_is_absent() {
        let context = ExecutionContext::from_value(serde_json::json!({
            "stages": {"wdb": {"device": null}}
        }));
        assert!(context.get("wdb", "device").is_none());
    }

    #[test]
    fn test_load_toml_file_with_digest() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[stages.wdb]").unwrap();
        writeln!(temp, "ssh_host = \"fpga01\"").unwrap();

        let context = ExecutionContext::build(Some(temp.path()), &[]).unwrap();

        assert_eq!(context.get_str("wdb", "ssh_host"), Some("fpga01"));
        let file_layer = &context.sources()[1];
        assert_eq!(file_layer.origin, ConfigOrigin::File);
        assert_eq!(file_layer.digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let context = ExecutionContext::from_value(serde_json::json!({
            "stages": {"wdb": {"ssh_passphrase": "hunter2", "ssh_host": "fpga01"}}
        }));
        let shown = context.to_redacted_json().unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("fpga01"));
        // The live lookup is untouched.
        assert_eq!(context.get_str("wdb", "ssh_passphrase"), Some("hunter2"));
    }
}
