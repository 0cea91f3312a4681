//! Standalone worker configuration.
//!
//! The worker is configured through a flat string-keyed property map, the
//! same keys a standalone Kafka Connect worker reads:
//!
//! | Key | Test worker value |
//! |-----|-------------------|
//! | `bootstrap.servers` | broker `host:port` |
//! | `key.converter` / `value.converter` | `bytes` |
//! | `internal.key.converter` / `internal.value.converter` | `json` |
//! | `internal.*.converter.schemas.enable` | `true` |
//! | `offset.storage.file.filename` | temporary file |
//! | `offset.flush.interval.ms` | `1000` |
//! | `consumer.metadata.max.age.ms` | `1000` |
//! | `rest.host.name` / `rest.port` | harness host, allocated port |
//!
//! [`WorkerConfig::to_props`] renders that map and
//! [`WorkerConfig::from_props`] parses one back, so tests can start from
//! the verbatim map and tweak single keys.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::converter::ConverterKind;
use crate::constants::{
    BOOTSTRAP_SERVERS, CONSUMER_METADATA_MAX_AGE_MS, DEFAULT_METADATA_MAX_AGE,
    DEFAULT_OFFSET_FLUSH_INTERVAL, INTERNAL_KEY_CONVERTER, INTERNAL_KEY_CONVERTER_SCHEMAS_ENABLE,
    INTERNAL_VALUE_CONVERTER, INTERNAL_VALUE_CONVERTER_SCHEMAS_ENABLE, KEY_CONVERTER,
    OFFSET_FLUSH_INTERVAL_MS, OFFSET_STORAGE_FILE, REST_HOST_NAME, REST_PORT, VALUE_CONVERTER,
};
use crate::error::{Error, Result};
use crate::types::ServiceEndpoint;

/// Typed view of a standalone worker's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub bootstrap_servers: Vec<ServiceEndpoint>,
    pub key_converter: ConverterKind,
    pub value_converter: ConverterKind,
    pub internal_key_converter: ConverterKind,
    pub internal_value_converter: ConverterKind,
    pub internal_key_schemas_enable: bool,
    pub internal_value_schemas_enable: bool,
    pub offset_storage_file: PathBuf,
    pub offset_flush_interval: Duration,
    pub metadata_max_age: Duration,
    pub rest_host: String,
    pub rest_port: u16,
}

impl WorkerConfig {
    /// Test worker against a single broker: pass-through external converters,
    /// schema-enabled JSON for bookkeeping, one-second flush and refresh.
    pub fn standalone(
        bootstrap: &ServiceEndpoint,
        offset_file: impl Into<PathBuf>,
        rest_port: u16,
    ) -> Self {
        Self {
            bootstrap_servers: vec![bootstrap.clone()],
            key_converter: ConverterKind::Bytes,
            value_converter: ConverterKind::Bytes,
            internal_key_converter: ConverterKind::Json,
            internal_value_converter: ConverterKind::Json,
            internal_key_schemas_enable: true,
            internal_value_schemas_enable: true,
            offset_storage_file: offset_file.into(),
            offset_flush_interval: DEFAULT_OFFSET_FLUSH_INTERVAL,
            metadata_max_age: DEFAULT_METADATA_MAX_AGE,
            rest_host: bootstrap.host().to_string(),
            rest_port,
        }
    }

    /// Render the verbatim property map.
    pub fn to_props(&self) -> BTreeMap<String, String> {
        let bootstrap = self
            .bootstrap_servers
            .iter()
            .map(ServiceEndpoint::address)
            .collect::<Vec<_>>()
            .join(",");

        [
            (BOOTSTRAP_SERVERS, bootstrap),
            (KEY_CONVERTER, self.key_converter.to_string()),
            (VALUE_CONVERTER, self.value_converter.to_string()),
            (INTERNAL_KEY_CONVERTER, self.internal_key_converter.to_string()),
            (INTERNAL_VALUE_CONVERTER, self.internal_value_converter.to_string()),
            (
                INTERNAL_KEY_CONVERTER_SCHEMAS_ENABLE,
                self.internal_key_schemas_enable.to_string(),
            ),
            (
                INTERNAL_VALUE_CONVERTER_SCHEMAS_ENABLE,
                self.internal_value_schemas_enable.to_string(),
            ),
            (
                OFFSET_STORAGE_FILE,
                self.offset_storage_file.display().to_string(),
            ),
            (
                OFFSET_FLUSH_INTERVAL_MS,
                self.offset_flush_interval.as_millis().to_string(),
            ),
            (
                CONSUMER_METADATA_MAX_AGE_MS,
                self.metadata_max_age.as_millis().to_string(),
            ),
            (REST_HOST_NAME, self.rest_host.clone()),
            (REST_PORT, self.rest_port.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Parse and validate a property map.
    ///
    /// `bootstrap.servers`, `offset.storage.file.filename` and `rest.port`
    /// are required; the rest default to the standalone test values.
    pub fn from_props(props: &BTreeMap<String, String>) -> Result<Self> {
        let bootstrap_servers = required(props, BOOTSTRAP_SERVERS)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<ServiceEndpoint>)
            .collect::<Result<Vec<_>>>()?;
        if bootstrap_servers.is_empty() {
            return Err(Error::Config(format!("{} lists no servers", BOOTSTRAP_SERVERS)));
        }

        let offset_storage_file = PathBuf::from(required(props, OFFSET_STORAGE_FILE)?);
        let rest_port = parse::<u16>(props, REST_PORT)?
            .ok_or_else(|| Error::Config(format!("missing required property {}", REST_PORT)))?;

        let config = Self {
            key_converter: converter(props, KEY_CONVERTER)?.unwrap_or(ConverterKind::Bytes),
            value_converter: converter(props, VALUE_CONVERTER)?.unwrap_or(ConverterKind::Bytes),
            internal_key_converter: converter(props, INTERNAL_KEY_CONVERTER)?
                .unwrap_or(ConverterKind::Json),
            internal_value_converter: converter(props, INTERNAL_VALUE_CONVERTER)?
                .unwrap_or(ConverterKind::Json),
            internal_key_schemas_enable: parse(props, INTERNAL_KEY_CONVERTER_SCHEMAS_ENABLE)?
                .unwrap_or(true),
            internal_value_schemas_enable: parse(props, INTERNAL_VALUE_CONVERTER_SCHEMAS_ENABLE)?
                .unwrap_or(true),
            offset_flush_interval: parse(props, OFFSET_FLUSH_INTERVAL_MS)?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_OFFSET_FLUSH_INTERVAL),
            metadata_max_age: parse(props, CONSUMER_METADATA_MAX_AGE_MS)?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_METADATA_MAX_AGE),
            rest_host: props
                .get(REST_HOST_NAME)
                .cloned()
                .unwrap_or_else(|| bootstrap_servers[0].host().to_string()),
            bootstrap_servers,
            offset_storage_file,
            rest_port,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.offset_flush_interval.is_zero() {
            return Err(Error::Config(format!("{} must be positive", OFFSET_FLUSH_INTERVAL_MS)));
        }
        if self.metadata_max_age.is_zero() {
            return Err(Error::Config(format!(
                "{} must be positive",
                CONSUMER_METADATA_MAX_AGE_MS
            )));
        }
        if self.internal_key_converter == ConverterKind::Bytes
            || self.internal_value_converter == ConverterKind::Bytes
        {
            return Err(Error::Config(
                "internal converters must be json or string".to_string(),
            ));
        }
        Ok(())
    }
}

fn required<'a>(props: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    props
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("missing required property {}", key)))
}

fn parse<T: std::str::FromStr>(props: &BTreeMap<String, String>, key: &str) -> Result<Option<T>> {
    props
        .get(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("invalid value '{}' for {}", v, key)))
        })
        .transpose()
}

fn converter(props: &BTreeMap<String, String>, key: &str) -> Result<Option<ConverterKind>> {
    parse(props, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone() -> WorkerConfig {
        let broker = ServiceEndpoint::new("localhost", 9092).unwrap();
        WorkerConfig::standalone(&broker, "/tmp/connect.offsets", 8083)
    }

    #[test]
    fn test_standalone_props_are_verbatim() {
        let props = standalone().to_props();

        assert_eq!(props[BOOTSTRAP_SERVERS], "localhost:9092");
        assert_eq!(props[KEY_CONVERTER], "bytes");
        assert_eq!(props[VALUE_CONVERTER], "bytes");
        assert_eq!(props[INTERNAL_KEY_CONVERTER], "json");
        assert_eq!(props[INTERNAL_VALUE_CONVERTER], "json");
        assert_eq!(props[INTERNAL_KEY_CONVERTER_SCHEMAS_ENABLE], "true");
        assert_eq!(props[INTERNAL_VALUE_CONVERTER_SCHEMAS_ENABLE], "true");
        assert_eq!(props[OFFSET_STORAGE_FILE], "/tmp/connect.offsets");
        assert_eq!(props[OFFSET_FLUSH_INTERVAL_MS], "1000");
        assert_eq!(props[CONSUMER_METADATA_MAX_AGE_MS], "1000");
        assert_eq!(props[REST_PORT], "8083");
        assert_eq!(props[REST_HOST_NAME], "localhost");
    }

    #[test]
    fn test_from_props_parses_rendered_map() {
        let config = standalone();
        assert_eq!(WorkerConfig::from_props(&config.to_props()).unwrap(), config);
    }

    #[test]
    fn test_from_props_defaults_optional_keys() {
        let props: BTreeMap<String, String> = [
            (BOOTSTRAP_SERVERS, "a:1, b:2"),
            (OFFSET_STORAGE_FILE, "/tmp/offsets"),
            (REST_PORT, "8083"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = WorkerConfig::from_props(&props).unwrap();
        assert_eq!(config.bootstrap_servers.len(), 2);
        assert_eq!(config.internal_key_converter, ConverterKind::Json);
        assert_eq!(config.offset_flush_interval, Duration::from_secs(1));
        assert_eq!(config.rest_host, "a");
    }

    #[test]
    fn test_from_props_rejects_bad_values() {
        let mut props = standalone().to_props();
        props.insert(REST_PORT.to_string(), "not-a-port".to_string());
        assert!(matches!(WorkerConfig::from_props(&props), Err(Error::Config(_))));

        let mut props = standalone().to_props();
        props.remove(BOOTSTRAP_SERVERS);
        assert!(WorkerConfig::from_props(&props).is_err());

        let mut props = standalone().to_props();
        props.insert(INTERNAL_VALUE_CONVERTER.to_string(), "bytes".to_string());
        assert!(WorkerConfig::from_props(&props).is_err());

        let mut props = standalone().to_props();
        props.insert(OFFSET_FLUSH_INTERVAL_MS.to_string(), "0".to_string());
        assert!(WorkerConfig::from_props(&props).is_err());

        let mut props = standalone().to_props();
        props.insert(KEY_CONVERTER.to_string(), "avro".to_string());
        assert!(WorkerConfig::from_props(&props).is_err());
    }
}
