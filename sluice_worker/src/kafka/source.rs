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

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rdkafka::{
    consumer::Consumer,
    message::{BorrowedMessage, Message},
    Offset, TopicPartitionList,
};
use sluice::{
    app::{HostError, ProcessorHost, SluiceConfig},
    checkpoint::CheckpointGate,
    message::{CloseReason, EventRecord, PartitionAssignment, PartitionId, SequenceNumber},
    processor::PartitionProcessorFactory,
    sink::PostgresSinkWriter,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use super::{
    context::{RebalanceEvent, RebalanceReceiver},
    KafkaCheckpointStore, KafkaSourceError, PendingBatches, SluiceConsumer,
};

pub type WorkerFactory = PartitionProcessorFactory<PostgresSinkWriter, KafkaCheckpointStore>;
pub type WorkerHost = ProcessorHost<WorkerFactory>;

const COMMITTED_OFFSETS_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_TICK: Duration = Duration::from_millis(10);

/// Pulls records from the stream and feeds them to the host in batches.
///
/// Records are buffered per partition until either the batch ceiling is
/// reached or the oldest buffered record has waited for the receive timeout.
/// Delivery waits while a partition's queue is full, which stops the loop
/// from polling until the sink catches up.
pub struct KafkaSource {
    consumer: Arc<SluiceConsumer>,
    rebalances: RebalanceReceiver,
    host: WorkerHost,
    gate: Arc<CheckpointGate<KafkaCheckpointStore>>,
    topic: String,
    consumer_group: String,
    receive_timeout: Duration,
    pending: PendingBatches,
}

impl KafkaSource {
    pub fn new(
        consumer: Arc<SluiceConsumer>,
        rebalances: RebalanceReceiver,
        host: WorkerHost,
        config: &SluiceConfig,
    ) -> Self {
        let gate = host.factory().gate();

        Self {
            consumer,
            rebalances,
            host,
            gate,
            topic: config.stream_id().to_owned(),
            consumer_group: config.consumer_group().to_owned(),
            receive_timeout: config.receive_timeout(),
            pending: PendingBatches::new(config.batch_max_size(), config.receive_timeout()),
        }
    }

    pub async fn run<F>(mut self, shutdown: F) -> Result<(), KafkaSourceError>
    where
        F: Future,
    {
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|err| KafkaSourceError::ConsumerSubscribeError {
                topic: self.topic.clone(),
                err,
            })?;

        info!("Subscribed to stream: {}", self.topic);

        let consumer = self.consumer.clone();
        let mut ticker = tokio::time::interval(tick_period(self.receive_timeout));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, draining buffered records");

                    break;
                }
                Some(rebalance) = self.rebalances.recv() => {
                    self.handle_rebalance(rebalance).await;
                }
                message = consumer.recv() => match message {
                    Ok(message) => {
                        let partition = PartitionId(message.partition());
                        let record = event_record(&message);

                        drop(message);

                        self.apply_pending_rebalances().await;

                        match record {
                            Some(record) => self.buffer(partition, record).await,
                            None => debug!("Skipping record without payload on partition: {}", partition),
                        }
                    }
                    Err(err) => error!("Failed to receive from stream: {}, caused by: {}", self.topic, err),
                },
                _ = ticker.tick() => self.flush_expired().await,
            }
        }

        self.flush_all().await;
        self.host.shutdown().await;

        info!("Source for stream: {} stopped", self.topic);

        Ok(())
    }

    async fn apply_pending_rebalances(&mut self) {
        while let Ok(rebalance) = self.rebalances.try_recv() {
            self.handle_rebalance(rebalance).await;
        }
    }

    async fn handle_rebalance(&mut self, rebalance: RebalanceEvent) {
        info!("Handling rebalance, {:?}", rebalance);

        match rebalance {
            RebalanceEvent::Assigned(partitions) => self.assign(partitions).await,
            RebalanceEvent::Revoked(partitions) => self.revoke(partitions).await,
        }
    }

    async fn assign(&mut self, partitions: Vec<PartitionId>) {
        let committed = self.committed_offsets(&partitions).await;

        for partition in partitions {
            let lease = self.gate.store().grant(partition);

            let mut assignment =
                PartitionAssignment::new(&self.topic, &self.consumer_group, partition, lease);

            if let Some(checkpoint) = committed.get(&partition) {
                assignment = assignment.with_checkpoint(*checkpoint);
            }

            self.host.assign(assignment);
        }
    }

    async fn revoke(&mut self, partitions: Vec<PartitionId>) {
        for partition in partitions {
            let dropped = self.pending.discard(partition);

            if dropped > 0 {
                debug!(
                    "Dropping {} buffered records for revoked partition: {}",
                    dropped, partition
                );
            }

            self.gate.store().release(partition);

            match self.host.revoke(partition, CloseReason::LeaseLost).await {
                Ok(()) => info!("Revoked partition: {}", partition),
                Err(HostError::PartitionNotAssigned(_)) => {
                    debug!("Partition: {} was not running", partition)
                }
                Err(err) => error!("Failed to revoke partition: {}, caused by: {}", partition, err),
            }
        }
    }

    /// Last processed sequence per partition, read from the group's committed offsets.
    async fn committed_offsets(
        &self,
        partitions: &[PartitionId],
    ) -> HashMap<PartitionId, SequenceNumber> {
        let mut tp_list = TopicPartitionList::new();

        for partition in partitions {
            tp_list.add_partition(&self.topic, partition.value());
        }

        let consumer = self.consumer.clone();

        let committed = tokio::task::spawn_blocking(move || {
            consumer.committed_offsets(tp_list, COMMITTED_OFFSETS_TIMEOUT)
        })
        .await;

        match committed {
            Ok(Ok(committed)) => committed
                .elements_for_topic(&self.topic)
                .iter()
                .filter_map(|elem| match elem.offset() {
                    Offset::Offset(next) if next > 0 => Some((PartitionId(elem.partition()), next - 1)),
                    _ => None,
                })
                .collect(),
            Ok(Err(err)) => {
                warn!("Failed to read committed offsets for stream: {}, caused by: {}", self.topic, err);

                Default::default()
            }
            Err(err) => {
                error!("Committed offset lookup panicked, caused by: {}", err);

                Default::default()
            }
        }
    }

    async fn buffer(&mut self, partition: PartitionId, record: EventRecord) {
        if let Some(records) = self.pending.push(partition, record) {
            self.deliver(partition, records).await;
        }
    }

    async fn flush_expired(&mut self) {
        for (partition, records) in self.pending.take_expired() {
            self.deliver(partition, records).await;
        }
    }

    async fn flush_all(&mut self) {
        for (partition, records) in self.pending.drain() {
            self.deliver(partition, records).await;
        }
    }

    async fn deliver(&self, partition: PartitionId, records: Vec<EventRecord>) {
        let count = records.len();

        match self.host.deliver(partition, records).await {
            Ok(()) => trace!("Delivered {} records to partition: {}", count, partition),
            Err(err) => warn!(
                "Dropping {} records for partition: {}, caused by: {}",
                count, partition, err
            ),
        }
    }
}

fn event_record(message: &BorrowedMessage<'_>) -> Option<EventRecord> {
    let payload = message.payload()?;

    let enqueued_at = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Some(EventRecord::new(payload, message.offset(), enqueued_at))
}

fn tick_period(receive_timeout: Duration) -> Duration {
    (receive_timeout / 4).max(MIN_TICK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_period_has_a_floor() {
        assert_eq!(tick_period(Duration::from_secs(30)), Duration::from_millis(7500));
        assert_eq!(tick_period(Duration::from_millis(8)), MIN_TICK);
    }
}
