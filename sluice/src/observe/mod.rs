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

//! Structured processing events.
//!
//! Processors never report failures through return values. Everything a
//! caller needs to rebuild the processing timeline of a partition goes out
//! through an [`Observer`] handed to the processor when it is built.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    message::{CloseReason, PartitionId, SequenceNumber},
    util::common_format::{partition_range, partition_range_err},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    Encoding,
    Connection,
    Timeout,
    WriteRejected,
    Checkpoint,
    InvalidBatch,
    InvalidState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub first: SequenceNumber,
    pub last: SequenceNumber,
}

impl SequenceRange {
    pub fn new(first: SequenceNumber, last: SequenceNumber) -> Self {
        Self { first, last }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorEvent {
    PartitionOpened {
        partition: PartitionId,
        stream_id: String,
        consumer_group: String,
        resume_from: Option<SequenceNumber>,
    },
    BatchWritten {
        partition: PartitionId,
        range: SequenceRange,
        records: usize,
    },
    BatchSkipped {
        partition: PartitionId,
    },
    BatchFailed {
        partition: PartitionId,
        range: Option<SequenceRange>,
        kind: ErrorKind,
        message: String,
    },
    CheckpointCommitted {
        partition: PartitionId,
        sequence: SequenceNumber,
    },
    CheckpointFailed {
        partition: PartitionId,
        sequence: SequenceNumber,
        message: String,
    },
    FinalCheckpoint {
        partition: PartitionId,
        sequence: Option<SequenceNumber>,
        outcome: Result<(), String>,
    },
    PartitionClosed {
        partition: PartitionId,
        reason: CloseReason,
    },
}

impl ProcessorEvent {
    pub fn partition(&self) -> PartitionId {
        match self {
            Self::PartitionOpened { partition, .. }
            | Self::BatchWritten { partition, .. }
            | Self::BatchSkipped { partition }
            | Self::BatchFailed { partition, .. }
            | Self::CheckpointCommitted { partition, .. }
            | Self::CheckpointFailed { partition, .. }
            | Self::FinalCheckpoint { partition, .. }
            | Self::PartitionClosed { partition, .. } => *partition,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::BatchFailed { .. }
                | Self::CheckpointFailed { .. }
                | Self::FinalCheckpoint { outcome: Err(_), .. }
        )
    }
}

pub trait Observer: Send + Sync {
    fn observe(&self, event: &ProcessorEvent);
}

impl<O> Observer for Arc<O>
where
    O: Observer + ?Sized,
{
    fn observe(&self, event: &ProcessorEvent) {
        (**self).observe(event)
    }
}

/// Renders every event as a `tracing` event with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, event: &ProcessorEvent) {
        match event {
            ProcessorEvent::PartitionOpened {
                partition,
                stream_id,
                consumer_group,
                resume_from,
            } => info!(
                partition = partition.value(),
                stream_id = stream_id.as_str(),
                consumer_group = consumer_group.as_str(),
                resume_from = ?resume_from,
                "Opened partition"
            ),
            ProcessorEvent::BatchWritten {
                partition,
                range,
                records,
            } => info!(
                partition = partition.value(),
                first_sequence = range.first,
                last_sequence = range.last,
                records = *records,
                "Wrote batch for {}",
                partition_range(*partition, range.first, range.last)
            ),
            ProcessorEvent::BatchSkipped { partition } => {
                debug!(partition = partition.value(), "Skipped empty batch")
            }
            ProcessorEvent::BatchFailed {
                partition,
                range,
                kind,
                message,
            } => match range {
                Some(range) => error!(
                    partition = partition.value(),
                    first_sequence = range.first,
                    last_sequence = range.last,
                    kind = %kind,
                    "Dropped batch for {}",
                    partition_range_err(*partition, range.first, range.last, message)
                ),
                None => error!(
                    partition = partition.value(),
                    kind = %kind,
                    "Dropped batch for partition: {}, caused by: {}",
                    partition,
                    message
                ),
            },
            ProcessorEvent::CheckpointCommitted {
                partition,
                sequence,
            } => debug!(
                partition = partition.value(),
                sequence = *sequence,
                "Committed checkpoint"
            ),
            ProcessorEvent::CheckpointFailed {
                partition,
                sequence,
                message,
            } => warn!(
                partition = partition.value(),
                sequence = *sequence,
                kind = %ErrorKind::Checkpoint,
                "Checkpoint not committed, records up to {} may be redelivered, caused by: {}",
                sequence,
                message
            ),
            ProcessorEvent::FinalCheckpoint {
                partition,
                sequence,
                outcome: Ok(()),
            } => info!(
                partition = partition.value(),
                sequence = ?sequence,
                "Flushed final checkpoint"
            ),
            ProcessorEvent::FinalCheckpoint {
                partition,
                sequence,
                outcome: Err(message),
            } => warn!(
                partition = partition.value(),
                sequence = ?sequence,
                kind = %ErrorKind::Checkpoint,
                "Final checkpoint failed, caused by: {}",
                message
            ),
            ProcessorEvent::PartitionClosed { partition, reason } => info!(
                partition = partition.value(),
                reason = %reason,
                "Closed partition"
            ),
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProcessorEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn events(&self) -> Vec<ProcessorEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, partition: PartitionId) -> Vec<ProcessorEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.partition() == partition)
            .cloned()
            .collect()
    }

    pub fn errors(&self) -> Vec<ProcessorEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.is_error())
            .cloned()
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, event: &ProcessorEvent) {
        self.events.lock().push(event.clone());
    }
}
