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

use std::sync::Arc;

use dashmap::DashMap;
use rdkafka::{
    consumer::{CommitMode, Consumer},
    Offset, TopicPartitionList,
};
use sluice::{
    checkpoint::{Checkpoint, CheckpointError, CheckpointStore},
    message::{LeaseToken, PartitionId},
};
use tracing::debug;

use super::SluiceConsumer;

/// Commits checkpoints as consumer group offsets.
///
/// Kafka stores the next offset to read, so a checkpoint at `n` is committed
/// as `n + 1`. Leases are minted by the source loop on assignment and dropped
/// on revocation.
pub struct KafkaCheckpointStore {
    consumer: Arc<SluiceConsumer>,
    topic: String,
    leases: DashMap<PartitionId, LeaseToken>,
}

impl KafkaCheckpointStore {
    pub fn new(consumer: Arc<SluiceConsumer>, topic: impl Into<String>) -> Self {
        Self {
            consumer,
            topic: topic.into(),
            leases: Default::default(),
        }
    }

    pub fn grant(&self, partition: PartitionId) -> LeaseToken {
        let lease = LeaseToken::generate();

        self.leases.insert(partition, lease.clone());

        lease
    }

    pub fn release(&self, partition: PartitionId) {
        self.leases.remove(&partition);
    }

    fn holds_lease(&self, checkpoint: &Checkpoint) -> bool {
        let current = self
            .leases
            .get(&checkpoint.partition)
            .map(|lease| *lease == checkpoint.lease)
            .unwrap_or(false);

        if !current {
            return false;
        }

        match self.consumer.assignment() {
            Ok(assignment) => assignment
                .find_partition(&self.topic, checkpoint.partition.value())
                .is_some(),
            Err(_) => false,
        }
    }
}

impl CheckpointStore for KafkaCheckpointStore {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if !self.holds_lease(checkpoint) {
            return Err(CheckpointError::LeaseNotHeld {
                partition: checkpoint.partition,
                sequence: checkpoint.sequence_number,
            });
        }

        let rejected = |reason: String| CheckpointError::Rejected {
            partition: checkpoint.partition,
            sequence: checkpoint.sequence_number,
            reason,
        };

        let mut offsets = TopicPartitionList::new();

        offsets
            .add_partition_offset(
                &self.topic,
                checkpoint.partition.value(),
                Offset::Offset(checkpoint.sequence_number + 1),
            )
            .map_err(|err| rejected(err.to_string()))?;

        let consumer = self.consumer.clone();

        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|err| rejected(err.to_string()))?
            .map_err(|err| rejected(err.to_string()))?;

        debug!(
            "Committed offset: {} for {}",
            checkpoint.sequence_number + 1,
            checkpoint
        );

        Ok(())
    }
}
