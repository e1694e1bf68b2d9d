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

use std::{collections::HashMap, time::Duration};

use sluice::message::{EventRecord, PartitionId};
use tokio::time::Instant;

type Flushed = Vec<(PartitionId, Vec<EventRecord>)>;

struct PendingBatch {
    records: Vec<EventRecord>,
    opened_at: Instant,
}

/// Per-partition record buffers waiting to be handed to the host.
///
/// A buffer is flushed once it holds `batch_max_size` records, or once its
/// first record has waited for `receive_timeout`. Flushed batches are
/// returned in partition order.
pub struct PendingBatches {
    batch_max_size: usize,
    receive_timeout: Duration,
    partitions: HashMap<PartitionId, PendingBatch>,
}

impl PendingBatches {
    pub fn new(batch_max_size: usize, receive_timeout: Duration) -> Self {
        Self {
            batch_max_size: batch_max_size.max(1),
            receive_timeout,
            partitions: Default::default(),
        }
    }

    /// Buffers a record, returning the partition's batch when it is full.
    pub fn push(&mut self, partition: PartitionId, record: EventRecord) -> Option<Vec<EventRecord>> {
        let batch_max_size = self.batch_max_size;

        let pending = self
            .partitions
            .entry(partition)
            .or_insert_with(|| PendingBatch {
                records: Vec::with_capacity(batch_max_size),
                opened_at: Instant::now(),
            });

        pending.records.push(record);

        if pending.records.len() < batch_max_size {
            return None;
        }

        self.partitions
            .remove(&partition)
            .map(|pending| pending.records)
    }

    /// Removes every buffer whose first record has waited for the receive timeout.
    pub fn take_expired(&mut self) -> Flushed {
        let now = Instant::now();

        let mut expired: Vec<_> = self
            .partitions
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.opened_at) >= self.receive_timeout)
            .map(|(partition, _)| *partition)
            .collect();

        expired.sort();

        expired
            .into_iter()
            .filter_map(|partition| {
                self.partitions
                    .remove(&partition)
                    .map(|pending| (partition, pending.records))
            })
            .collect()
    }

    /// Drops a partition's buffer, returning how many records were dropped.
    pub fn discard(&mut self, partition: PartitionId) -> usize {
        self.partitions
            .remove(&partition)
            .map(|pending| pending.records.len())
            .unwrap_or(0)
    }

    /// Removes every buffer regardless of age.
    pub fn drain(&mut self) -> Flushed {
        let mut drained: Flushed = self
            .partitions
            .drain()
            .map(|(partition, pending)| (partition, pending.records))
            .collect();

        drained.sort_by_key(|(partition, _)| *partition);

        drained
    }

    #[cfg(test)]
    fn buffered(&self, partition: PartitionId) -> usize {
        self.partitions
            .get(&partition)
            .map(|pending| pending.records.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn record(sequence: i64) -> EventRecord {
        EventRecord::new(format!("{{\"seq\":{}}}", sequence), sequence, Utc::now())
    }

    fn sequences(records: &[EventRecord]) -> Vec<i64> {
        records.iter().map(EventRecord::sequence_number).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_is_returned_at_exact_ceiling() {
        let mut pending = PendingBatches::new(3, TIMEOUT);

        assert!(pending.push(PartitionId(0), record(1)).is_none());
        assert!(pending.push(PartitionId(0), record(2)).is_none());

        let batch = pending.push(PartitionId(0), record(3)).unwrap();

        assert_eq!(sequences(&batch), vec![1, 2, 3]);
        assert_eq!(pending.buffered(PartitionId(0)), 0);

        assert!(pending.push(PartitionId(0), record(4)).is_none());
        assert_eq!(pending.buffered(PartitionId(0)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_flushes_after_receive_timeout() {
        let mut pending = PendingBatches::new(10, TIMEOUT);

        pending.push(PartitionId(0), record(1));

        tokio::time::advance(Duration::from_millis(300)).await;

        pending.push(PartitionId(1), record(7));
        pending.push(PartitionId(0), record(2));

        tokio::time::advance(Duration::from_millis(199)).await;

        assert!(pending.take_expired().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;

        let flushed = pending.take_expired();

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, PartitionId(0));
        assert_eq!(sequences(&flushed[0].1), vec![1, 2]);
        assert_eq!(pending.buffered(PartitionId(1)), 1);

        tokio::time::advance(Duration::from_millis(300)).await;

        let flushed = pending.take_expired();

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, PartitionId(1));
        assert_eq!(sequences(&flushed[0].1), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_partition_never_flushes() {
        let mut pending = PendingBatches::new(2, TIMEOUT);

        pending.push(PartitionId(0), record(1));
        pending.push(PartitionId(0), record(2)).unwrap();

        tokio::time::advance(TIMEOUT * 4).await;

        assert!(pending.take_expired().is_empty());
        assert!(pending.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_returns_everything_in_partition_order() {
        let mut pending = PendingBatches::new(10, TIMEOUT);

        pending.push(PartitionId(2), record(20));
        pending.push(PartitionId(0), record(1));
        pending.push(PartitionId(2), record(21));

        let drained = pending.drain();

        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, PartitionId(0));
        assert_eq!(sequences(&drained[0].1), vec![1]);
        assert_eq!(drained[1].0, PartitionId(2));
        assert_eq!(sequences(&drained[1].1), vec![20, 21]);
        assert!(pending.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_drops_only_that_partition() {
        let mut pending = PendingBatches::new(10, TIMEOUT);

        pending.push(PartitionId(0), record(1));
        pending.push(PartitionId(0), record(2));
        pending.push(PartitionId(1), record(5));

        assert_eq!(pending.discard(PartitionId(0)), 2);
        assert_eq!(pending.discard(PartitionId(0)), 0);

        tokio::time::advance(TIMEOUT).await;

        let flushed = pending.take_expired();

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, PartitionId(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ceiling_is_clamped() {
        let mut pending = PendingBatches::new(0, TIMEOUT);

        let batch = pending.push(PartitionId(0), record(1)).unwrap();

        assert_eq!(sequences(&batch), vec![1]);
    }
}
