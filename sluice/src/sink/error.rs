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

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("WriteError::ConnectionError: could not reach sink, caused by: {}", reason)]
    ConnectionError { reason: String },
    #[error("WriteError::WriteRejected: sink refused the batch, code: {:?}, caused by: {}", code, reason)]
    WriteRejected {
        code: Option<String>,
        reason: String,
    },
    #[error("WriteError::Timeout: sink did not confirm the write within {:?}", after)]
    Timeout { after: Duration },
}

impl WriteError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::ConnectionError {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::WriteRejected {
            code: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkWriterCreationError {
    #[error("SinkWriterCreationError::InvalidOperation: '{0}' is not a valid procedure name")]
    InvalidOperation(String),
    #[error("SinkWriterCreationError::InvalidConnectionString: caused by: {0}")]
    InvalidConnectionString(#[from] sqlx::Error),
}
