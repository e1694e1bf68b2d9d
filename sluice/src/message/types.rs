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

use chrono::{DateTime, Utc};

pub type SequenceNumber = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display(fmt = "p{}", _0)]
pub struct PartitionId(pub i32);

impl From<i32> for PartitionId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl PartitionId {
    pub fn value(&self) -> i32 {
        self.0
    }
}

/// Opaque ownership grant handed out by the coordinator with an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One partition handed to this process by the coordinator.
///
/// `checkpoint` is the last sequence number persisted for the partition, if any.
/// Processing resumes with the first record after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    stream_id: String,
    consumer_group: String,
    partition: PartitionId,
    lease: LeaseToken,
    checkpoint: Option<SequenceNumber>,
}

impl PartitionAssignment {
    pub fn new(
        stream_id: impl Into<String>,
        consumer_group: impl Into<String>,
        partition: impl Into<PartitionId>,
        lease: LeaseToken,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            consumer_group: consumer_group.into(),
            partition: partition.into(),
            lease,
            checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: SequenceNumber) -> Self {
        self.checkpoint = Some(checkpoint);

        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn lease(&self) -> &LeaseToken {
        &self.lease
    }

    pub fn checkpoint(&self) -> Option<SequenceNumber> {
        self.checkpoint
    }
}

impl Display for PartitionAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Assignment: {}/{}/{}",
            self.stream_id, self.consumer_group, self.partition
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    payload: Vec<u8>,
    sequence_number: SequenceNumber,
    enqueued_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        payload: impl Into<Vec<u8>>,
        sequence_number: SequenceNumber,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            payload: payload.into(),
            sequence_number,
            enqueued_at,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("BatchError::Empty: a batch must contain at least one record")]
    Empty,
    #[error(
        "BatchError::OutOfOrder: sequence {} at index {} does not follow {}",
        sequence,
        index,
        previous
    )]
    OutOfOrder {
        index: usize,
        previous: SequenceNumber,
        sequence: SequenceNumber,
    },
}

/// Records from a single partition in stream order.
///
/// Sequence numbers are strictly increasing. Gaps are allowed, the log may skip offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    records: Vec<EventRecord>,
}

impl TryFrom<Vec<EventRecord>> for EventBatch {
    type Error = BatchError;

    fn try_from(records: Vec<EventRecord>) -> Result<Self, Self::Error> {
        if records.is_empty() {
            return Err(BatchError::Empty);
        }

        for (index, pair) in records.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);

            if current.sequence_number <= previous.sequence_number {
                return Err(BatchError::OutOfOrder {
                    index: index + 1,
                    previous: previous.sequence_number,
                    sequence: current.sequence_number,
                });
            }
        }

        Ok(Self { records })
    }
}

impl EventBatch {
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_sequence(&self) -> SequenceNumber {
        self.records
            .first()
            .map(EventRecord::sequence_number)
            .unwrap_or_default()
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.records
            .last()
            .map(EventRecord::sequence_number)
            .unwrap_or_default()
    }
}

/// Why the coordinator is taking a partition away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CloseReason {
    Shutdown,
    LeaseLost,
    Failure,
}

impl CloseReason {
    /// Only a graceful shutdown still holds the authority to write a checkpoint.
    pub fn permits_final_checkpoint(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}
