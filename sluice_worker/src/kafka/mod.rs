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

use rdkafka::{consumer::StreamConsumer, error::KafkaError, ClientConfig};
use sluice::app::{config::builder::BOOTSTRAP_SERVERS, SluiceConfig};
use tracing::info;

use self::context::{RebalanceReceiver, SluiceConsumerContext};

pub mod checkpoint;
pub mod context;
pub mod pending;
pub mod source;

pub use checkpoint::KafkaCheckpointStore;
pub use pending::PendingBatches;
pub use source::KafkaSource;

pub type SluiceConsumer = StreamConsumer<SluiceConsumerContext>;

/// Keys under this prefix are handed to librdkafka with the prefix removed.
pub const CLIENT_CONFIG_PREFIX: &str = "kafka.";

#[derive(Debug, thiserror::Error)]
pub enum KafkaSourceError {
    #[error("KafkaSourceError::MissingBootstrapServers: '{}' must be set", BOOTSTRAP_SERVERS)]
    MissingBootstrapServers,
    #[error("KafkaSourceError::CreateConsumerError: Failed to create consumer caused by: {0}")]
    CreateConsumerError(KafkaError),
    #[error("KafkaSourceError::ConsumerSubscribeError: Failed to subscribe consumer to topic '{}' caused by: {}", topic, err)]
    ConsumerSubscribeError { topic: String, err: KafkaError },
}

pub fn client_config(config: &SluiceConfig) -> Result<ClientConfig, KafkaSourceError> {
    let bootstrap_servers = config
        .get(BOOTSTRAP_SERVERS)
        .ok_or(KafkaSourceError::MissingBootstrapServers)?;

    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", bootstrap_servers)
        .set("group.id", config.consumer_group())
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", "earliest");

    for (key, value) in config.prefixed(CLIENT_CONFIG_PREFIX) {
        client_config.set(key, value);
    }

    Ok(client_config)
}

pub fn create_consumer(
    config: &SluiceConfig,
) -> Result<(Arc<SluiceConsumer>, RebalanceReceiver), KafkaSourceError> {
    let (context, rebalances) = SluiceConsumerContext::new(config.stream_id());

    let consumer: SluiceConsumer = client_config(config)?
        .create_with_context(context)
        .map_err(KafkaSourceError::CreateConsumerError)?;

    info!(
        "Created consumer for stream: {}, consumer group: {}",
        config.stream_id(),
        config.consumer_group()
    );

    Ok((Arc::new(consumer), rebalances))
}
