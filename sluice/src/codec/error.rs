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

use crate::message::SequenceNumber;

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error(
        "EncodingError::InvalidUtf8: payload for sequence {} is not valid UTF-8, caused by: {}",
        sequence,
        source
    )]
    InvalidUtf8 {
        sequence: SequenceNumber,
        source: std::str::Utf8Error,
    },
    #[error(
        "EncodingError::MalformedPayload: payload for sequence {} is not a single JSON value, caused by: {}",
        sequence,
        source
    )]
    MalformedPayload {
        sequence: SequenceNumber,
        source: serde_json::Error,
    },
}

impl EncodingError {
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            Self::InvalidUtf8 { sequence, .. } | Self::MalformedPayload { sequence, .. } => *sequence,
        }
    }
}
