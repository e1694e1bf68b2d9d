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

//! Drives processors on behalf of the coordinator.
//!
//! Every assigned partition gets its own task and an ordered command queue,
//! so calls for one partition are strictly sequential while different
//! partitions run concurrently. A revoke is queued behind whatever the task
//! is doing: an in-flight batch always runs to completion.
//!
//! Queues are bounded. Once a partition has `queue_capacity` batches waiting,
//! `deliver` waits for the processor to catch up.

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use tokio::{
    sync::mpsc::{channel, Receiver, Sender},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    message::{CloseReason, EventRecord, PartitionAssignment, PartitionId},
    processor::{EventProcessor, ProcessorFactory},
};

use super::error::HostError;

pub(crate) type CommandSender = Sender<PartitionCommand>;
pub(crate) type CommandReceiver = Receiver<PartitionCommand>;

pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

#[derive(Debug)]
pub(crate) enum PartitionCommand {
    Batch(Vec<EventRecord>),
    Close(CloseReason),
}

struct PartitionHandle {
    commands: CommandSender,
    discard_pending: Arc<AtomicCell<bool>>,
    task: JoinHandle<()>,
}

pub struct ProcessorHost<F> {
    factory: Arc<F>,
    partitions: DashMap<PartitionId, PartitionHandle>,
    queue_capacity: usize,
}

impl<F> ProcessorHost<F>
where
    F: ProcessorFactory + 'static,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            partitions: Default::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Number of batches a partition may have waiting behind the one in flight.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);

        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn assigned_partitions(&self) -> Vec<PartitionId> {
        let mut partitions: Vec<_> = self.partitions.iter().map(|entry| *entry.key()).collect();

        partitions.sort();

        partitions
    }

    pub fn is_assigned(&self, partition: PartitionId) -> bool {
        self.partitions.contains_key(&partition)
    }

    /// Starts a processor for the assignment.
    ///
    /// A second assignment for a partition that is still live is ignored, the
    /// coordinator guarantees lease exclusivity.
    pub fn assign(&self, assignment: PartitionAssignment) {
        let partition = assignment.partition();

        match self.partitions.entry(partition) {
            Entry::Occupied(_) => {
                warn!("Partition: {} already assigned, ignoring {}", partition, assignment);
            }
            Entry::Vacant(entry) => {
                info!("Starting processor for {}", assignment);

                let processor = self.factory.create_processor(&assignment);
                let (commands, receiver) = channel(self.queue_capacity);
                let discard_pending = Arc::new(AtomicCell::new(false));

                let task = tokio::spawn(run_partition(
                    processor,
                    assignment,
                    receiver,
                    discard_pending.clone(),
                ));

                entry.insert(PartitionHandle {
                    commands,
                    discard_pending,
                    task,
                });
            }
        }
    }

    /// Queues a batch, waiting while the partition's queue is full.
    pub async fn deliver(
        &self,
        partition: PartitionId,
        records: Vec<EventRecord>,
    ) -> Result<(), HostError> {
        let commands = self
            .partitions
            .get(&partition)
            .map(|handle| handle.commands.clone())
            .ok_or(HostError::PartitionNotAssigned(partition))?;

        commands
            .send(PartitionCommand::Batch(records))
            .await
            .map_err(|_| HostError::PartitionTaskGone(partition))
    }

    /// Closes the partition and waits for its task to finish.
    ///
    /// On a forced revoke, batches still queued behind the in-flight one are
    /// discarded; the next owner receives them again from the last checkpoint.
    pub async fn revoke(&self, partition: PartitionId, reason: CloseReason) -> Result<(), HostError> {
        let (_, handle) = self
            .partitions
            .remove(&partition)
            .ok_or(HostError::PartitionNotAssigned(partition))?;

        let PartitionHandle {
            commands,
            discard_pending,
            task,
        } = handle;

        if !reason.permits_final_checkpoint() {
            discard_pending.store(true);
        }

        if commands.send(PartitionCommand::Close(reason)).await.is_err() {
            warn!("Task for partition: {} exited before close", partition);
        }

        drop(commands);

        task.await
            .map_err(|err| HostError::PartitionTaskFailed {
                partition,
                reason: err.to_string(),
            })
    }

    /// Gracefully closes every partition.
    pub async fn shutdown(&self) {
        let partitions = self.assigned_partitions();

        info!("Shutting down {} partition processors", partitions.len());

        let results = join_all(
            partitions
                .into_iter()
                .map(|partition| self.revoke(partition, CloseReason::Shutdown)),
        )
        .await;

        for err in results.into_iter().filter_map(Result::err) {
            error!("Failed to close partition during shutdown: {}", err);
        }
    }
}

async fn run_partition<P>(
    mut processor: P,
    assignment: PartitionAssignment,
    mut commands: CommandReceiver,
    discard_pending: Arc<AtomicCell<bool>>,
) where
    P: EventProcessor,
{
    let partition = assignment.partition();

    processor.on_open(&assignment).await;

    while let Some(command) = commands.recv().await {
        match command {
            PartitionCommand::Batch(records) => {
                if discard_pending.load() {
                    debug!(
                        "Discarding {} queued records for partition: {} after revoke",
                        records.len(),
                        partition
                    );

                    continue;
                }

                processor.on_batch(records).await;
            }
            PartitionCommand::Close(reason) => {
                processor.on_close(reason).await;

                return;
            }
        }
    }

    warn!(
        "Command queue for partition: {} closed without a close, treating as failure",
        partition
    );

    processor.on_close(CloseReason::Failure).await;
}
