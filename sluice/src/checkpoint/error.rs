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

use crate::message::{PartitionId, SequenceNumber};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error(
        "CheckpointError::LeaseNotHeld: lease for {} no longer held, checkpoint {} refused",
        partition,
        sequence
    )]
    LeaseNotHeld {
        partition: PartitionId,
        sequence: SequenceNumber,
    },
    #[error(
        "CheckpointError::Rejected: coordinator refused checkpoint {} for {}, caused by: {}",
        sequence,
        partition,
        reason
    )]
    Rejected {
        partition: PartitionId,
        sequence: SequenceNumber,
        reason: String,
    },
}
