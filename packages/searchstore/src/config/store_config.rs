//! Store configuration
//!
//! One explicit object carries every tunable the store needs, including the
//! per-index mappings/settings registry. It is built once at process start
//! and handed to the router, the CRUD services and the migrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::{ConfigError, ConfigResult};
use super::validation::Validatable;

pub const CONFIG_VERSION: u32 = 1;

/// Bulk commit tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BulkConfig {
    /// Concurrent workers sending chunked sub-requests
    pub worker_count: usize,
    /// Items per physical bulk request
    pub chunk_size: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            chunk_size: 500,
        }
    }
}

impl BulkConfig {
    /// Worker count sized to the host, chunk size left at default
    pub fn for_host() -> Self {
        Self {
            worker_count: num_cpus::get().clamp(1, 64),
            ..Self::default()
        }
    }
}

impl Validatable for BulkConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(1..=64).contains(&self.worker_count) {
            return Err(ConfigError::range_with_hint(
                "bulk.worker_count",
                self.worker_count,
                1,
                64,
                "Use 4 for most deployments",
            ));
        }
        if !(1..=10_000).contains(&self.chunk_size) {
            return Err(ConfigError::range_with_hint(
                "bulk.chunk_size",
                self.chunk_size,
                1,
                10_000,
                "Use 500 for typical documents",
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "BulkConfig"
    }
}

/// Query defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QueryConfig {
    /// `size` applied to queries that don't set one
    pub default_limit: usize,
    /// Ids per `_id` terms lookup
    pub max_get_all: usize,
    /// Completion field used by entity suggestions
    pub suggest_field: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 1000,
            max_get_all: 1000,
            suggest_field: "text_suggest".to_string(),
        }
    }
}

impl Validatable for QueryConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(1..=10_000).contains(&self.default_limit) {
            return Err(ConfigError::range_with_hint(
                "query.default_limit",
                self.default_limit,
                1,
                10_000,
                "The engine rejects windows above 10000 without scrolling",
            ));
        }
        if !(1..=10_000).contains(&self.max_get_all) {
            return Err(ConfigError::range_with_hint(
                "query.max_get_all",
                self.max_get_all,
                1,
                10_000,
                "",
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "QueryConfig"
    }
}

/// Scroll scan defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScanConfig {
    pub page_size: usize,
    pub keep_alive: String,
    pub slices: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            keep_alive: "5m".to_string(),
            slices: 2,
        }
    }
}

/// Slow-operation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimingConfig {
    pub slow_query_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            slow_query_ms: 10_000,
        }
    }
}

/// Mappings and settings registered for one index name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IndexDefinition {
    pub mappings: Value,
    pub settings: Value,
    pub shards: u32,
    pub replicas: u32,
}

impl Default for IndexDefinition {
    fn default() -> Self {
        Self {
            mappings: Value::Null,
            settings: Value::Null,
            shards: 1,
            replicas: 1,
        }
    }
}

impl IndexDefinition {
    /// Create-index body: mappings plus settings with shard/replica counts
    /// merged into `settings.index`
    pub fn create_body(&self) -> Value {
        let mut settings = match &self.settings {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let mut index = match settings.remove("index") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        index.insert("number_of_shards".into(), json!(self.shards));
        index.insert("number_of_replicas".into(), json!(self.replicas));
        settings.insert("index".into(), Value::Object(index));

        let mut body = Map::new();
        if !self.mappings.is_null() {
            body.insert("mappings".into(), self.mappings.clone());
        }
        body.insert("settings".into(), Value::Object(settings));
        Value::Object(body)
    }
}

/// Root configuration object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub indices: BTreeMap<String, IndexDefinition>,
}

impl StoreConfig {
    pub fn with_bulk(mut self, worker_count: usize, chunk_size: usize) -> Self {
        self.bulk = BulkConfig {
            worker_count,
            chunk_size,
        };
        self
    }

    pub fn register_index(mut self, name: impl Into<String>, definition: IndexDefinition) -> Self {
        self.indices.insert(name.into(), definition);
        self
    }

    /// Create-index body for a registered index name
    pub fn index_config(&self, name: &str) -> ConfigResult<Value> {
        self.indices
            .get(name)
            .map(IndexDefinition::create_body)
            .ok_or_else(|| ConfigError::UnknownIndex(name.to_string()))
    }

    pub fn from_yaml(path: &str) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let mut document: serde_yaml::Mapping = serde_yaml::from_str(content)?;

        // `version` is an envelope field; the rest is the config body
        let version = document
            .remove("version")
            .ok_or(ConfigError::MissingVersion)?;
        let found: u32 = serde_yaml::from_value(version)?;
        if found != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found,
                supported: vec![CONFIG_VERSION],
            });
        }

        let config: StoreConfig = serde_yaml::from_value(serde_yaml::Value::Mapping(document))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let mut export = serde_yaml::Mapping::new();
        export.insert(
            serde_yaml::Value::String("version".to_string()),
            serde_yaml::to_value(CONFIG_VERSION)?,
        );
        if let serde_yaml::Value::Mapping(body) = serde_yaml::to_value(self)? {
            export.extend(body);
        }
        serde_yaml::to_string(&export).map_err(ConfigError::Yaml)
    }
}

impl Validatable for StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.bulk.validate()?;
        self.query.validate()?;
        if self.scan.page_size == 0 {
            return Err(ConfigError::range_with_hint(
                "scan.page_size",
                0,
                1,
                10_000,
                "",
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "StoreConfig"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.bulk.worker_count, 4);
        assert_eq!(config.bulk.chunk_size, 500);
        assert_eq!(config.query.default_limit, 1000);
        assert_eq!(config.query.suggest_field, "text_suggest");
        assert_eq!(config.scan.keep_alive, "5m");
        assert_eq!(config.timing.slow_query_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bulk_for_host_is_valid() {
        assert!(BulkConfig::for_host().validate().is_ok());
    }

    #[test]
    fn test_yaml_loading() {
        let yaml_content = r#"
version: 1
bulk:
  worker_count: 8
  chunk_size: 250
indices:
  thing:
    mappings:
      properties:
        thing_type: { type: keyword }
    shards: 3
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();
        let path = temp_file.path().to_str().unwrap();

        let config = StoreConfig::from_yaml(path).unwrap();
        assert_eq!(config.bulk.worker_count, 8);
        assert_eq!(config.bulk.chunk_size, 250);
        assert_eq!(config.query.default_limit, 1000);

        let body = config.index_config("thing").unwrap();
        assert_eq!(body["settings"]["index"]["number_of_shards"], json!(3));
        assert_eq!(body["settings"]["index"]["number_of_replicas"], json!(1));
        assert_eq!(
            body["mappings"]["properties"]["thing_type"]["type"],
            json!("keyword")
        );
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = StoreConfig::from_yaml_str("bulk:\n  worker_count: 2\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = StoreConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let result = StoreConfig::from_yaml_str("version: 1\nbulk:\n  workers: 2\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_yaml_range_validation() {
        let result = StoreConfig::from_yaml_str("version: 1\nbulk:\n  chunk_size: 0\n");
        assert!(matches!(result, Err(ConfigError::Range { .. })));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = StoreConfig::default()
            .with_bulk(2, 100)
            .register_index("thing", IndexDefinition::default());

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("chunk_size: 100"));

        let loaded = StoreConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_index_config_merges_existing_index_settings() {
        let definition = IndexDefinition {
            settings: json!({"index": {"refresh_interval": "1s"}, "analysis": {}}),
            replicas: 0,
            ..IndexDefinition::default()
        };
        let body = definition.create_body();
        assert_eq!(body["settings"]["index"]["refresh_interval"], json!("1s"));
        assert_eq!(body["settings"]["index"]["number_of_replicas"], json!(0));
        assert!(body["settings"]["analysis"].is_object());
        assert!(body.get("mappings").is_none());
    }

    #[test]
    fn test_unknown_index() {
        let config = StoreConfig::default();
        assert!(matches!(
            config.index_config("missing"),
            Err(ConfigError::UnknownIndex(name)) if name == "missing"
        ));
    }
}
