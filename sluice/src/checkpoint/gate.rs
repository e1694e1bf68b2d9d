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
use tracing::{debug, warn};

use crate::message::{LeaseToken, PartitionId, SequenceNumber};

use super::{Checkpoint, CheckpointError, CheckpointStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointResult {
    Committed(SequenceNumber),
    /// The request did not move past the stored value, nothing was sent.
    Unchanged { last: SequenceNumber },
}

/// Keeps checkpoints monotonic per partition.
///
/// One gate is shared by every processor on a host. Each processor only
/// touches its own partition's entry, and calls for one partition never
/// overlap, so no entry is held across an await.
///
/// The gate does not check that the batch was written. Callers only commit
/// after the sink confirmed the write.
#[derive(Debug)]
pub struct CheckpointGate<S> {
    store: S,
    committed: DashMap<PartitionId, SequenceNumber>,
}

impl<S> CheckpointGate<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            committed: Default::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Seeds the floor for a newly opened partition. Never lowers it.
    pub fn resume(&self, partition: PartitionId, checkpoint: Option<SequenceNumber>) {
        let Some(checkpoint) = checkpoint else {
            return;
        };

        let mut entry = self.committed.entry(partition).or_insert(checkpoint);

        if checkpoint > *entry {
            *entry = checkpoint;
        }
    }

    pub fn last_committed(&self, partition: PartitionId) -> Option<SequenceNumber> {
        self.committed.get(&partition).map(|entry| *entry)
    }

    pub fn release(&self, partition: PartitionId) {
        self.committed.remove(&partition);
    }
}

impl<S> CheckpointGate<S>
where
    S: CheckpointStore + Sync,
{
    pub async fn commit(
        &self,
        partition: PartitionId,
        sequence: SequenceNumber,
        lease: &LeaseToken,
    ) -> Result<CheckpointResult, CheckpointError> {
        if let Some(last) = self.last_committed(partition) {
            if sequence <= last {
                debug!(
                    "Skipping checkpoint for partition: {}, sequence: {}, last committed: {}",
                    partition, sequence, last
                );

                return Ok(CheckpointResult::Unchanged { last });
            }
        }

        let checkpoint = Checkpoint::new(partition, sequence, lease.clone());

        self.store.commit(&checkpoint).await?;

        let mut entry = self.committed.entry(partition).or_insert(sequence);

        if sequence > *entry {
            *entry = sequence;
        }

        Ok(CheckpointResult::Committed(sequence))
    }

    /// Re-issues the last committed value for a graceful close.
    ///
    /// Exactly one store call is made when a value is known. A partition that
    /// was opened without a checkpoint and never committed has nothing to
    /// re-issue, so it makes no store call at all.
    pub async fn flush(
        &self,
        partition: PartitionId,
        lease: &LeaseToken,
    ) -> Result<Option<SequenceNumber>, CheckpointError> {
        let Some(sequence) = self.last_committed(partition) else {
            warn!(
                "No checkpoint known for partition: {}, nothing to flush",
                partition
            );

            return Ok(None);
        };

        let checkpoint = Checkpoint::new(partition, sequence, lease.clone());

        self.store.commit(&checkpoint).await?;

        Ok(Some(sequence))
    }
}
