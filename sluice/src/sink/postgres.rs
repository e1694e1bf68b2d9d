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

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};

use crate::{app::config::SluiceConfig, codec::TransportDocument};

use super::{SinkWriter, SinkWriterCreationError, WriteError};

/// Writes each batch with a single `CALL <operation>($1)`.
///
/// The procedure receives the whole JSON array as one text argument, so the
/// statement runs in one implicit transaction and the batch lands atomically.
/// Connections come from a lazily connected pool shared by every clone.
#[derive(Debug, Clone)]
pub struct PostgresSinkWriter {
    pool: PgPool,
    statement: String,
    write_timeout: Duration,
}

impl PostgresSinkWriter {
    pub fn new(
        connection_string: &str,
        operation: &str,
        max_connections: u32,
        write_timeout: Duration,
    ) -> Result<Self, SinkWriterCreationError> {
        if !is_valid_operation(operation) {
            return Err(SinkWriterCreationError::InvalidOperation(
                operation.to_owned(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(write_timeout)
            .connect_lazy(connection_string)?;

        info!(
            "Configured postgres sink writer for operation: {}, max connections: {}",
            operation, max_connections
        );

        Ok(Self {
            pool,
            statement: format!("CALL {}($1)", operation),
            write_timeout,
        })
    }

    pub fn from_config(config: &SluiceConfig) -> Result<Self, SinkWriterCreationError> {
        Self::new(
            config.sink_connection_string(),
            config.sink_write_operation(),
            config.sink_max_connections(),
            config.sink_write_timeout(),
        )
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }
}

impl SinkWriter for PostgresSinkWriter {
    async fn write(&self, document: &TransportDocument) -> Result<(), WriteError> {
        debug!(
            "Writing document of {} bytes with: {}",
            document.len(),
            self.statement
        );

        let call = sqlx::query(&self.statement)
            .bind(document.as_str())
            .execute(&self.pool);

        match tokio::time::timeout(self.write_timeout, call).await {
            Err(_) => Err(WriteError::Timeout {
                after: self.write_timeout,
            }),
            Ok(Err(err)) => Err(classify(err, self.write_timeout)),
            Ok(Ok(_)) => Ok(()),
        }
    }
}

fn classify(err: sqlx::Error, write_timeout: Duration) -> WriteError {
    match err {
        sqlx::Error::Database(db) => WriteError::WriteRejected {
            code: db.code().map(|code| code.into_owned()),
            reason: db.message().to_owned(),
        },
        sqlx::Error::PoolTimedOut => WriteError::Timeout {
            after: write_timeout,
        },
        err => WriteError::ConnectionError {
            reason: err.to_string(),
        },
    }
}

/// Accepts `name` or `schema.name` made of identifier characters only.
fn is_valid_operation(operation: &str) -> bool {
    let mut parts = 0;

    for part in operation.split('.') {
        parts += 1;

        let mut chars = part.chars();

        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
            _ => return false,
        }

        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
    }

    parts <= 2
}
