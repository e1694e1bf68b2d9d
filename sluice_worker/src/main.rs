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

use anyhow::Context;
use sluice::{
    app::{ProcessorHost, SluiceConfigBuilder},
    init,
    processor::PartitionProcessorFactory,
    sink::PostgresSinkWriter,
};
use tracing::info;

use kafka::{KafkaCheckpointStore, KafkaSource};

mod kafka;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SluiceConfigBuilder::from_env()
        .build()
        .context("Failed to load configuration")?;

    init::init_from_config(&config)?;

    let writer = PostgresSinkWriter::from_config(&config)?;
    let (consumer, rebalances) = kafka::create_consumer(&config)?;
    let store = KafkaCheckpointStore::new(consumer.clone(), config.stream_id());

    let factory = PartitionProcessorFactory::builder()
        .with_config(config.clone())
        .with_writer(writer)
        .with_checkpoint_store(store)
        .build()?;

    let host = ProcessorHost::new(factory);

    info!(
        "Starting worker for stream: {}, consumer group: {}",
        config.stream_id(),
        config.consumer_group()
    );

    KafkaSource::new(consumer, rebalances, host, &config)
        .run(tokio::signal::ctrl_c())
        .await?;

    Ok(())
}
