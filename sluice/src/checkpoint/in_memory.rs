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

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::message::{LeaseToken, PartitionId, SequenceNumber};

use super::{Checkpoint, CheckpointError, CheckpointStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StoredCheckpoint {
    offset: SequenceNumber,
    commits: usize,
}

impl StoredCheckpoint {
    fn set_offset_if_greater(&mut self, maybe_new_offset: SequenceNumber) {
        if maybe_new_offset > self.offset {
            self.offset = maybe_new_offset
        }
    }
}

/// Lease-aware checkpoint store held in memory.
///
/// Commits are accepted only from the current lease holder. Every accepted
/// request is appended to a history so callers can inspect ordering.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    leases: DashMap<PartitionId, LeaseToken>,
    checkpoints: DashMap<PartitionId, StoredCheckpoint>,
    refusals: DashMap<PartitionId, String>,
    history: Mutex<Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Hands the partition to `lease`, replacing any previous holder.
    pub fn grant(&self, partition: PartitionId, lease: LeaseToken) {
        self.leases.insert(partition, lease);
    }

    /// Refuses every commit for `partition` with `reason` until `accept` is called.
    pub fn refuse(&self, partition: PartitionId, reason: impl Into<String>) {
        self.refusals.insert(partition, reason.into());
    }

    pub fn accept(&self, partition: PartitionId) {
        self.refusals.remove(&partition);
    }

    pub fn committed(&self, partition: PartitionId) -> Option<SequenceNumber> {
        self.checkpoints.get(&partition).map(|stored| stored.offset)
    }

    pub fn commit_count(&self, partition: PartitionId) -> usize {
        self.checkpoints
            .get(&partition)
            .map(|stored| stored.commits)
            .unwrap_or_default()
    }

    pub fn history_for(&self, partition: PartitionId) -> Vec<SequenceNumber> {
        self.history
            .lock()
            .iter()
            .filter(|checkpoint| checkpoint.partition == partition)
            .map(|checkpoint| checkpoint.sequence_number)
            .collect()
    }

    fn check_lease(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let holds_lease = self
            .leases
            .get(&checkpoint.partition)
            .map(|holder| *holder == checkpoint.lease)
            .unwrap_or(false);

        if !holds_lease {
            return Err(CheckpointError::LeaseNotHeld {
                partition: checkpoint.partition,
                sequence: checkpoint.sequence_number,
            });
        }

        if let Some(reason) = self.refusals.get(&checkpoint.partition) {
            return Err(CheckpointError::Rejected {
                partition: checkpoint.partition,
                sequence: checkpoint.sequence_number,
                reason: reason.clone(),
            });
        }

        Ok(())
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.check_lease(checkpoint)?;

        {
            let mut stored = self
                .checkpoints
                .entry(checkpoint.partition)
                .or_insert(StoredCheckpoint {
                    offset: checkpoint.sequence_number,
                    commits: 0,
                });

            stored.set_offset_if_greater(checkpoint.sequence_number);
            stored.commits += 1;
        }

        self.history.lock().push(checkpoint.clone());

        debug!("Stored {}", checkpoint);

        Ok(())
    }
}
