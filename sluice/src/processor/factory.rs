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

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    app::config::{builder::CONSUMER_GROUP, builder::STREAM_ID, builder::BATCH_MAX_SIZE, SluiceConfig},
    checkpoint::{CheckpointGate, CheckpointStore},
    message::{CloseReason, EventRecord, PartitionAssignment},
    observe::{Observer, TracingObserver},
    sink::SinkWriter,
};

use super::{ConstructionError, EventProcessor, PartitionProcessor};

/// Builds the processor for each new partition assignment.
///
/// `create_processor` runs on the coordinator's assignment path and must not
/// fail. Anything that can be wrong with the configuration is caught when the
/// factory itself is built.
pub trait ProcessorFactory: Send + Sync {
    type Processor: EventProcessor + Send + 'static;

    fn create_processor(&self, assignment: &PartitionAssignment) -> Self::Processor;
}

/// Handle onto a single processor instance shared by every assignment.
pub struct SharedProcessor<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> Clone for SharedProcessor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> EventProcessor for SharedProcessor<P>
where
    P: EventProcessor + Send,
{
    async fn on_open(&mut self, assignment: &PartitionAssignment) {
        let mut processor = self.inner.lock().await;

        processor.on_open(assignment).await
    }

    async fn on_batch(&mut self, records: Vec<EventRecord>) {
        let mut processor = self.inner.lock().await;

        processor.on_batch(records).await
    }

    async fn on_close(&mut self, reason: CloseReason) {
        let mut processor = self.inner.lock().await;

        processor.on_close(reason).await
    }
}

/// Binds every assignment to one pre-built processor.
///
/// Only sound when the caller guarantees at most one live assignment at a time.
pub struct FixedProcessorFactory<P> {
    instance: Arc<Mutex<P>>,
}

impl<P> FixedProcessorFactory<P> {
    pub fn new(processor: P) -> Self {
        Self {
            instance: Arc::new(Mutex::new(processor)),
        }
    }

    pub fn instance(&self) -> Arc<Mutex<P>> {
        self.instance.clone()
    }
}

impl<P> ProcessorFactory for FixedProcessorFactory<P>
where
    P: EventProcessor + Send + 'static,
{
    type Processor = SharedProcessor<P>;

    fn create_processor(&self, assignment: &PartitionAssignment) -> Self::Processor {
        debug!("Reusing fixed processor for {}", assignment);

        SharedProcessor {
            inner: self.instance.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub stream_id: String,
    pub consumer_group: String,
    pub max_batch_size: usize,
}

impl TryFrom<&SluiceConfig> for ProcessorSettings {
    type Error = ConstructionError;

    fn try_from(config: &SluiceConfig) -> Result<Self, Self::Error> {
        if config.stream_id().trim().is_empty() {
            return Err(ConstructionError::InvalidSetting {
                key: STREAM_ID,
                reason: "must not be empty".to_owned(),
            });
        }

        if config.consumer_group().trim().is_empty() {
            return Err(ConstructionError::InvalidSetting {
                key: CONSUMER_GROUP,
                reason: "must not be empty".to_owned(),
            });
        }

        if config.batch_max_size() == 0 {
            return Err(ConstructionError::InvalidSetting {
                key: BATCH_MAX_SIZE,
                reason: "must be greater than zero".to_owned(),
            });
        }

        Ok(Self {
            stream_id: config.stream_id().to_owned(),
            consumer_group: config.consumer_group().to_owned(),
            max_batch_size: config.batch_max_size(),
        })
    }
}

/// Builds a fresh [`PartitionProcessor`] per assignment.
///
/// The writer is cloned into each processor, so a pooled writer shares its
/// pool. The checkpoint gate is shared, each processor uses its own entry.
pub struct PartitionProcessorFactory<W, S> {
    settings: ProcessorSettings,
    writer: W,
    gate: Arc<CheckpointGate<S>>,
    observer: Arc<dyn Observer>,
}

impl PartitionProcessorFactory<(), ()> {
    pub fn builder() -> PartitionProcessorFactoryBuilder<(), ()> {
        PartitionProcessorFactoryBuilder::new()
    }
}

impl<W, S> PartitionProcessorFactory<W, S> {
    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn gate(&self) -> Arc<CheckpointGate<S>> {
        self.gate.clone()
    }
}

impl<W, S> ProcessorFactory for PartitionProcessorFactory<W, S>
where
    W: SinkWriter + Clone + Send + Sync + 'static,
    S: CheckpointStore + Send + Sync + 'static,
{
    type Processor = PartitionProcessor<W, S>;

    fn create_processor(&self, assignment: &PartitionAssignment) -> Self::Processor {
        if assignment.stream_id() != self.settings.stream_id
            || assignment.consumer_group() != self.settings.consumer_group
        {
            warn!(
                "{} does not match configured stream: {}, consumer group: {}",
                assignment, self.settings.stream_id, self.settings.consumer_group
            );
        }

        PartitionProcessor::new(
            assignment.clone(),
            self.writer.clone(),
            self.gate.clone(),
            self.observer.clone(),
        )
        .with_max_batch_size(self.settings.max_batch_size)
    }
}

pub struct PartitionProcessorFactoryBuilder<W, S> {
    config: Option<SluiceConfig>,
    writer: W,
    store: S,
    observer: Option<Arc<dyn Observer>>,
}

impl Default for PartitionProcessorFactoryBuilder<(), ()> {
    fn default() -> Self {
        Self {
            config: None,
            writer: (),
            store: (),
            observer: None,
        }
    }
}

impl PartitionProcessorFactoryBuilder<(), ()> {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<W, S> PartitionProcessorFactoryBuilder<W, S> {
    pub fn with_config(mut self, config: SluiceConfig) -> Self {
        self.config = Some(config);

        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);

        self
    }

    pub fn with_writer<NW>(self, writer: NW) -> PartitionProcessorFactoryBuilder<NW, S>
    where
        NW: SinkWriter,
    {
        PartitionProcessorFactoryBuilder {
            config: self.config,
            writer,
            store: self.store,
            observer: self.observer,
        }
    }

    pub fn with_checkpoint_store<NS>(self, store: NS) -> PartitionProcessorFactoryBuilder<W, NS>
    where
        NS: CheckpointStore,
    {
        PartitionProcessorFactoryBuilder {
            config: self.config,
            writer: self.writer,
            store,
            observer: self.observer,
        }
    }
}

impl<W, S> PartitionProcessorFactoryBuilder<W, S>
where
    W: SinkWriter + Clone + Send + Sync + 'static,
    S: CheckpointStore + Send + Sync + 'static,
{
    pub fn build(self) -> Result<PartitionProcessorFactory<W, S>, ConstructionError> {
        let config = self.config.ok_or(ConstructionError::MissingConfig)?;
        let settings = ProcessorSettings::try_from(&config)?;

        info!(
            "Built processor factory for stream: {}, consumer group: {}, batch ceiling: {}",
            settings.stream_id, settings.consumer_group, settings.max_batch_size
        );

        Ok(PartitionProcessorFactory {
            settings,
            writer: self.writer,
            gate: Arc::new(CheckpointGate::new(self.store)),
            observer: self
                .observer
                .unwrap_or_else(|| Arc::new(TracingObserver)),
        })
    }
}
