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

use std::{collections::HashMap, time::Duration};

use tracing::level_filters::LevelFilter;

use self::builder::{SluiceConfigBuilder, SluiceConfigError};

pub mod builder;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Validated, immutable settings shared by every processor on a host.
#[derive(Debug, Clone)]
pub struct SluiceConfig {
    pub(super) values: HashMap<String, String>,
    pub(super) sink_connection_string: String,
    pub(super) sink_write_operation: String,
    pub(super) sink_write_timeout: Duration,
    pub(super) sink_max_connections: u32,
    pub(super) stream_id: String,
    pub(super) consumer_group: String,
    pub(super) batch_max_size: usize,
    pub(super) receive_timeout: Duration,
    pub(super) log_format: LogFormat,
    pub(super) log_level: LevelFilter,
}

impl SluiceConfig {
    pub fn sink_connection_string(&self) -> &str {
        &self.sink_connection_string
    }

    pub fn sink_write_operation(&self) -> &str {
        &self.sink_write_operation
    }

    pub fn sink_write_timeout(&self) -> Duration {
        self.sink_write_timeout
    }

    pub fn sink_max_connections(&self) -> u32 {
        self.sink_max_connections
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn batch_max_size(&self) -> usize {
        self.batch_max_size
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Every entry under `prefix`, with the prefix stripped, sorted by key.
    pub fn prefixed(&self, prefix: &str) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix)
                    .map(|stripped| (stripped.to_owned(), value.clone()))
            })
            .collect();

        entries.sort();

        entries
    }
}

impl TryFrom<&HashMap<String, String>> for SluiceConfig {
    type Error = SluiceConfigError;

    fn try_from(config_map: &HashMap<String, String>) -> Result<Self, Self::Error> {
        SluiceConfigBuilder::from(config_map).build()
    }
}
