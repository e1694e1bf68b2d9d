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

//! The per-partition processing lifecycle.
//!
//! A [`PartitionProcessor`] owns exactly one partition assignment. For every
//! batch it encodes, writes and then checkpoints, in that order. Failures are
//! reported to the injected [`Observer`] and the processor goes back to
//! `Idle`; nothing is ever returned to the coordinator.

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use tracing::{debug, error, trace, warn, Level};

use crate::{
    checkpoint::{CheckpointError, CheckpointGate, CheckpointResult, CheckpointStore},
    codec::{self, Encoded},
    message::{
        BatchError, CloseReason, EventBatch, EventRecord, PartitionAssignment, PartitionId,
    },
    observe::{Observer, ProcessorEvent, SequenceRange},
    sink::SinkWriter,
};

mod error;
pub mod factory;
pub mod state;

pub use error::{ConstructionError, ProcessingError};
pub use factory::{
    FixedProcessorFactory, PartitionProcessorFactory, PartitionProcessorFactoryBuilder,
    ProcessorFactory, ProcessorSettings, SharedProcessor,
};
pub use state::{ProcessorState, StateTransitionError};

/// Lifecycle callbacks driven by the coordinator.
///
/// For one partition the calls never overlap. None of them can fail.
#[trait_variant::make(Send)]
pub trait EventProcessor {
    async fn on_open(&mut self, assignment: &PartitionAssignment);
    async fn on_batch(&mut self, records: Vec<EventRecord>);
    async fn on_close(&mut self, reason: CloseReason);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Skipped,
    Written {
        range: SequenceRange,
        records: usize,
        checkpoint: Result<CheckpointResult, CheckpointError>,
    },
}

pub struct PartitionProcessor<W, S> {
    assignment: PartitionAssignment,
    writer: W,
    gate: Arc<CheckpointGate<S>>,
    observer: Arc<dyn Observer>,
    state: Arc<AtomicCell<ProcessorState>>,
    max_batch_size: Option<usize>,
}

impl<W, S> PartitionProcessor<W, S> {
    pub fn new(
        assignment: PartitionAssignment,
        writer: W,
        gate: Arc<CheckpointGate<S>>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            assignment,
            writer,
            gate,
            observer,
            state: Default::default(),
            max_batch_size: None,
        }
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = Some(max_batch_size);

        self
    }

    pub fn partition(&self) -> PartitionId {
        self.assignment.partition()
    }

    pub fn assignment(&self) -> &PartitionAssignment {
        &self.assignment
    }

    pub fn state(&self) -> ProcessorState {
        self.state.load()
    }

    /// Shared view of the lifecycle state, readable while the processor is busy.
    pub fn state_handle(&self) -> Arc<AtomicCell<ProcessorState>> {
        self.state.clone()
    }

    fn transition(&self, to: ProcessorState) -> Result<(), StateTransitionError> {
        let from = self.state.load();
        let next = from.transition_state(to)?;

        self.state.store(next);

        trace!(
            "Partition: {} moved from {} to {}",
            self.partition(),
            from,
            next
        );

        Ok(())
    }

    fn report_failure(&self, range: Option<SequenceRange>, err: &ProcessingError) {
        self.observer.observe(&ProcessorEvent::BatchFailed {
            partition: self.partition(),
            range,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn report_outcome(&self, outcome: BatchOutcome) {
        let partition = self.partition();

        match outcome {
            BatchOutcome::Skipped => self
                .observer
                .observe(&ProcessorEvent::BatchSkipped { partition }),
            BatchOutcome::Written {
                range,
                records,
                checkpoint,
            } => {
                self.observer.observe(&ProcessorEvent::BatchWritten {
                    partition,
                    range,
                    records,
                });

                match checkpoint {
                    Ok(CheckpointResult::Committed(sequence)) => {
                        self.observer
                            .observe(&ProcessorEvent::CheckpointCommitted { partition, sequence })
                    }
                    Ok(CheckpointResult::Unchanged { last }) => debug!(
                        "Checkpoint for partition: {} already at {}, batch ended at {}",
                        partition, last, range.last
                    ),
                    Err(err) => self.observer.observe(&ProcessorEvent::CheckpointFailed {
                        partition,
                        sequence: range.last,
                        message: err.to_string(),
                    }),
                }
            }
        }
    }
}

impl<W, S> PartitionProcessor<W, S>
where
    W: SinkWriter + Sync,
    S: CheckpointStore + Send + Sync,
{
    /// Encode, write, checkpoint.
    ///
    /// A checkpoint failure does not fail the batch, the data is already in
    /// the sink. It is carried back in the outcome instead.
    pub async fn process_batch(
        &self,
        records: Vec<EventRecord>,
    ) -> Result<BatchOutcome, ProcessingError> {
        let batch = match EventBatch::try_from(records) {
            Err(BatchError::Empty) => return Ok(BatchOutcome::Skipped),
            batch => batch?,
        };

        if let Some(max_batch_size) = self.max_batch_size {
            if batch.len() > max_batch_size {
                warn!(
                    "Batch of {} records for partition: {} exceeds the configured ceiling of {}",
                    batch.len(),
                    self.partition(),
                    max_batch_size
                );
            }
        }

        let document = match codec::encode(batch.records())? {
            Encoded::Noop => return Ok(BatchOutcome::Skipped),
            Encoded::Document(document) => document,
        };

        self.writer.write(&document).await?;

        let range = SequenceRange::new(batch.first_sequence(), batch.last_sequence());

        let checkpoint = self
            .gate
            .commit(self.partition(), range.last, self.assignment.lease())
            .await;

        Ok(BatchOutcome::Written {
            range,
            records: batch.len(),
            checkpoint,
        })
    }
}

fn sequence_range(records: &[EventRecord]) -> Option<SequenceRange> {
    match (records.first(), records.last()) {
        (Some(first), Some(last)) => Some(SequenceRange::new(
            first.sequence_number(),
            last.sequence_number(),
        )),
        _ => None,
    }
}

impl<W, S> EventProcessor for PartitionProcessor<W, S>
where
    W: SinkWriter + Send + Sync,
    S: CheckpointStore + Send + Sync,
{
    async fn on_open(&mut self, assignment: &PartitionAssignment) {
        let span = tracing::span!(
            Level::DEBUG,
            "->PartitionProcessor::on_open",
            partition = assignment.partition().value(),
        )
        .entered();

        if assignment.partition() != self.partition() {
            error!(
                "Ignoring open for partition: {}, processor belongs to partition: {}",
                assignment.partition(),
                self.partition()
            );

            return;
        }

        match self.state() {
            ProcessorState::Created => (),
            state if state.is_open() => {
                debug!("Partition: {} already open", self.partition());

                return;
            }
            state => {
                error!(
                    "Ignoring open for partition: {} in state: {}",
                    self.partition(),
                    state
                );

                return;
            }
        }

        self.assignment = assignment.clone();

        if let Err(err) = self.transition(ProcessorState::Opened) {
            error!("Failed to open partition: {}, caused by: {}", self.partition(), err);

            return;
        }

        self.gate
            .resume(self.partition(), self.assignment.checkpoint());

        self.observer.observe(&ProcessorEvent::PartitionOpened {
            partition: self.partition(),
            stream_id: self.assignment.stream_id().to_owned(),
            consumer_group: self.assignment.consumer_group().to_owned(),
            resume_from: self.assignment.checkpoint(),
        });

        if let Err(err) = self.transition(ProcessorState::Idle) {
            error!("Failed to open partition: {}, caused by: {}", self.partition(), err);
        }

        drop(span);
    }

    async fn on_batch(&mut self, records: Vec<EventRecord>) {
        let range = sequence_range(&records);

        if let Err(err) = self.transition(ProcessorState::Processing) {
            self.report_failure(range, &ProcessingError::from(err));

            return;
        }

        match self.process_batch(records).await {
            Ok(outcome) => self.report_outcome(outcome),
            Err(err) => self.report_failure(range, &err),
        }

        if let Err(err) = self.transition(ProcessorState::Idle) {
            error!(
                "Partition: {} failed to return to idle, caused by: {}",
                self.partition(),
                err
            );
        }
    }

    async fn on_close(&mut self, reason: CloseReason) {
        let partition = self.partition();
        let from = self.state();

        if from.is_terminal() {
            debug!("Partition: {} already closed", partition);

            return;
        }

        if let Err(err) = self.transition(ProcessorState::Closing) {
            error!("Failed to close partition: {}, caused by: {}", partition, err);

            return;
        }

        if reason.permits_final_checkpoint() && from.is_open() {
            let lease = self.assignment.lease().clone();

            let (sequence, outcome) = match self.gate.flush(partition, &lease).await {
                Ok(sequence) => (sequence, Ok(())),
                Err(err) => (self.gate.last_committed(partition), Err(err.to_string())),
            };

            self.observer.observe(&ProcessorEvent::FinalCheckpoint {
                partition,
                sequence,
                outcome,
            });
        }

        self.gate.release(partition);

        if let Err(err) = self.transition(ProcessorState::Closed) {
            error!("Failed to close partition: {}, caused by: {}", partition, err);
        }

        self.observer
            .observe(&ProcessorEvent::PartitionClosed { partition, reason });
    }
}
