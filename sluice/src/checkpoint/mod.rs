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

use std::fmt::Display;

use crate::message::{LeaseToken, PartitionId, SequenceNumber};

mod error;
pub mod gate;
pub mod in_memory;

pub use error::CheckpointError;
pub use gate::{CheckpointGate, CheckpointResult};
pub use in_memory::InMemoryCheckpointStore;

/// "Everything up to and including `sequence_number` is durably processed."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub partition: PartitionId,
    pub sequence_number: SequenceNumber,
    pub lease: LeaseToken,
}

impl Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checkpoint: {}:{}", self.partition, self.sequence_number)
    }
}

impl Checkpoint {
    pub fn new(partition: PartitionId, sequence_number: SequenceNumber, lease: LeaseToken) -> Self {
        Self {
            partition,
            sequence_number,
            lease,
        }
    }
}

/// The coordinator's side of a checkpoint commit.
#[trait_variant::make(Send)]
pub trait CheckpointStore {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}
