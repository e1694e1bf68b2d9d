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

use crate::{
    checkpoint::CheckpointError, codec::EncodingError, message::BatchError,
    observe::ErrorKind, sink::WriteError,
};

use super::state::StateTransitionError;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    InvalidBatch(#[from] BatchError),
    #[error(transparent)]
    InvalidState(#[from] StateTransitionError),
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Write(WriteError::ConnectionError { .. }) => ErrorKind::Connection,
            Self::Write(WriteError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Write(WriteError::WriteRejected { .. }) => ErrorKind::WriteRejected,
            Self::Checkpoint(_) => ErrorKind::Checkpoint,
            Self::InvalidBatch(_) => ErrorKind::InvalidBatch,
            Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("ConstructionError::MissingConfig: a processor factory needs shared configuration")]
    MissingConfig,
    #[error(
        "ConstructionError::InvalidSetting: '{}' is invalid: {}",
        key,
        reason
    )]
    InvalidSetting { key: &'static str, reason: String },
}
