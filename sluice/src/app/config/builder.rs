/*
 * Copyright 2024 Thaddeus Treloar
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::{collections::HashMap, str::FromStr, time::Duration};

use tracing::{level_filters::LevelFilter, warn};

use super::{LogFormat, SluiceConfig};

pub const SINK_CONNECTION_STRING: &str = "sink.connection.string";
pub const SINK_WRITE_OPERATION: &str = "sink.write.operation";
pub const SINK_WRITE_TIMEOUT_MS: &str = "sink.write.timeout.ms";
pub const SINK_MAX_CONNECTIONS: &str = "sink.max.connections";
pub const STREAM_ID: &str = "stream.id";
pub const CONSUMER_GROUP: &str = "consumer.group";
pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
pub const BATCH_MAX_SIZE: &str = "batch.max.size";
pub const RECEIVE_TIMEOUT_MS: &str = "receive.timeout.ms";
pub const LOG_FORMAT: &str = "log.format";
pub const LOG_LEVEL: &str = "log.level";

pub const ENV_PREFIX: &str = "SLUICE_";

const REQUIRED_FIELDS: [&str; 4] = [
    SINK_CONNECTION_STRING,
    SINK_WRITE_OPERATION,
    STREAM_ID,
    CONSUMER_GROUP,
];

const DEFAULT_FIELDS: [(&str, &str); 6] = [
    (BATCH_MAX_SIZE, "100"),
    (RECEIVE_TIMEOUT_MS, "30000"),
    (SINK_WRITE_TIMEOUT_MS, "30000"),
    (SINK_MAX_CONNECTIONS, "10"),
    (LOG_FORMAT, "text"),
    (LOG_LEVEL, "info"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SluiceConfigBuilder {
    pub(crate) values: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SluiceConfigError {
    #[error("SluiceConfigError::MissingConfig: {:?}", configs)]
    MissingConfig { configs: Vec<&'static str> },
    #[error(
        "SluiceConfigError::InvalidValue: '{}' = '{}' is invalid: {}",
        key,
        value,
        reason
    )]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl SluiceConfigBuilder {
    pub fn new() -> Self {
        Self {
            ..Default::default()
        }
    }

    /// Reads every `SLUICE_*` variable from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_vars(std::env::vars())
    }

    /// `SLUICE_SINK_WRITE_OPERATION` becomes `sink.write.operation`.
    pub fn from_env_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let values = vars
            .into_iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(ENV_PREFIX)
                    .map(|key| (key.to_lowercase().replace('_', "."), value))
            })
            .collect();

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.values.insert(key.into(), value.into());

        self
    }

    fn set_missing_defaults(mut self) -> Self {
        let missing_defaults = DEFAULT_FIELDS
            .into_iter()
            .filter(|(name, _)| !self.values.contains_key(*name))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect::<Vec<_>>();

        self.values.extend(missing_defaults);

        self
    }

    fn check_missing_required(self) -> Result<Self, SluiceConfigError> {
        let missing_fields: Vec<_> = REQUIRED_FIELDS
            .into_iter()
            .filter(|field| self.get(field).map_or(true, |v| v.trim().is_empty()))
            .collect();

        if !missing_fields.is_empty() {
            return Err(SluiceConfigError::MissingConfig {
                configs: missing_fields,
            });
        }

        Ok(self)
    }

    fn required(&self, key: &'static str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }

    fn parse<T>(&self, key: &'static str) -> Result<T, SluiceConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.values.get(key).cloned().unwrap_or_default();

        value
            .trim()
            .parse()
            .map_err(|err: T::Err| SluiceConfigError::InvalidValue {
                key,
                reason: err.to_string(),
                value,
            })
    }

    fn parse_millis(&self, key: &'static str) -> Result<Duration, SluiceConfigError> {
        let millis: u64 = self.parse(key)?;

        if millis == 0 {
            return Err(SluiceConfigError::InvalidValue {
                key,
                value: millis.to_string(),
                reason: "must be greater than zero".to_owned(),
            });
        }

        Ok(Duration::from_millis(millis))
    }

    pub fn build(self) -> Result<SluiceConfig, SluiceConfigError> {
        let builder = self.set_missing_defaults().check_missing_required()?;

        let log_format = match builder.required(LOG_FORMAT).trim() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(SluiceConfigError::InvalidValue {
                    key: LOG_FORMAT,
                    value: other.to_owned(),
                    reason: "expected 'text' or 'json'".to_owned(),
                })
            }
        };

        let batch_max_size: usize = builder.parse(BATCH_MAX_SIZE)?;

        if batch_max_size == 0 {
            warn!("'{}' set to 0, every processor factory will refuse it", BATCH_MAX_SIZE);
        }

        Ok(SluiceConfig {
            sink_connection_string: builder.required(SINK_CONNECTION_STRING),
            sink_write_operation: builder.required(SINK_WRITE_OPERATION).trim().to_owned(),
            sink_write_timeout: builder.parse_millis(SINK_WRITE_TIMEOUT_MS)?,
            sink_max_connections: builder.parse(SINK_MAX_CONNECTIONS)?,
            stream_id: builder.required(STREAM_ID),
            consumer_group: builder.required(CONSUMER_GROUP),
            batch_max_size,
            receive_timeout: builder.parse_millis(RECEIVE_TIMEOUT_MS)?,
            log_format,
            log_level: builder.parse::<LevelFilter>(LOG_LEVEL)?,
            values: builder.values,
        })
    }
}

impl From<&HashMap<String, String>> for SluiceConfigBuilder {
    fn from(config_map: &HashMap<String, String>) -> Self {
        Self {
            values: config_map.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> SluiceConfigBuilder {
        let mut builder = SluiceConfigBuilder::new();

        builder
            .set(SINK_CONNECTION_STRING, "postgres://localhost/events")
            .set(SINK_WRITE_OPERATION, "insert_events")
            .set(STREAM_ID, "events")
            .set(CONSUMER_GROUP, "sql");

        builder
    }

    #[test]
    fn test_defaults_applied() {
        let config = required().build().unwrap();

        assert_eq!(config.batch_max_size(), 100);
        assert_eq!(config.receive_timeout(), Duration::from_secs(30));
        assert_eq!(config.sink_write_timeout(), Duration::from_secs(30));
        assert_eq!(config.sink_max_connections(), 10);
        assert_eq!(config.log_format(), LogFormat::Text);
        assert_eq!(config.log_level(), LevelFilter::INFO);
    }

    #[test]
    fn test_missing_required_are_listed() {
        let mut builder = SluiceConfigBuilder::new();
        builder.set(STREAM_ID, "events").set(CONSUMER_GROUP, " ");

        assert_eq!(
            builder.build().unwrap_err(),
            SluiceConfigError::MissingConfig {
                configs: vec![SINK_CONNECTION_STRING, SINK_WRITE_OPERATION, CONSUMER_GROUP]
            }
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut builder = required();
        builder.set(BATCH_MAX_SIZE, "lots");

        assert!(matches!(
            builder.build(),
            Err(SluiceConfigError::InvalidValue { key: BATCH_MAX_SIZE, .. })
        ));

        let mut builder = required();
        builder.set(RECEIVE_TIMEOUT_MS, "0");

        assert!(matches!(
            builder.build(),
            Err(SluiceConfigError::InvalidValue { key: RECEIVE_TIMEOUT_MS, .. })
        ));

        let mut builder = required();
        builder.set(LOG_FORMAT, "xml");

        assert!(matches!(
            builder.build(),
            Err(SluiceConfigError::InvalidValue { key: LOG_FORMAT, .. })
        ));
    }

    #[test]
    fn test_from_env_vars() {
        let vars = [
            ("SLUICE_SINK_CONNECTION_STRING", "postgres://db/events"),
            ("SLUICE_SINK_WRITE_OPERATION", "ingest.insert_events"),
            ("SLUICE_STREAM_ID", "telemetry"),
            ("SLUICE_CONSUMER_GROUP", "sql"),
            ("SLUICE_BATCH_MAX_SIZE", "250"),
            ("SLUICE_LOG_FORMAT", "json"),
            ("SLUICE_KAFKA_AUTO_OFFSET_RESET", "earliest"),
            ("HOME", "/root"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()));

        let config = SluiceConfigBuilder::from_env_vars(vars).build().unwrap();

        assert_eq!(config.stream_id(), "telemetry");
        assert_eq!(config.sink_write_operation(), "ingest.insert_events");
        assert_eq!(config.batch_max_size(), 250);
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.get("kafka.auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("home"), None);
        assert_eq!(
            config.prefixed("kafka."),
            vec![("auto.offset.reset".to_owned(), "earliest".to_owned())]
        );
    }
}
