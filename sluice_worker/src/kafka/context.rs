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

use rdkafka::{
    consumer::{ConsumerContext, Rebalance},
    topic_partition_list::TopicPartitionList,
    ClientContext,
};
use sluice::message::PartitionId;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

pub(crate) type RebalanceSender = UnboundedSender<RebalanceEvent>;
pub(crate) type RebalanceReceiver = UnboundedReceiver<RebalanceEvent>;

/// Partitions of the consumed stream changing hands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    Assigned(Vec<PartitionId>),
    Revoked(Vec<PartitionId>),
}

/// Forwards rebalance callbacks to the source loop.
///
/// Revocations are sent before librdkafka drops the partitions, assignments
/// after they are in place, so the committed offsets can be read. Partitions
/// of other topics are filtered out.
#[derive(Debug, Clone)]
pub struct SluiceConsumerContext {
    topic: String,
    rebalance_sender: RebalanceSender,
}

impl SluiceConsumerContext {
    pub fn new(topic: impl Into<String>) -> (Self, RebalanceReceiver) {
        let (rebalance_sender, receiver) = unbounded_channel();

        let context = Self {
            topic: topic.into(),
            rebalance_sender,
        };

        (context, receiver)
    }

    fn partitions(&self, tp_list: &TopicPartitionList) -> Vec<PartitionId> {
        tp_list
            .elements_for_topic(&self.topic)
            .iter()
            .map(|elem| PartitionId(elem.partition()))
            .collect()
    }

    fn forward(&self, event: RebalanceEvent) {
        if let RebalanceEvent::Assigned(partitions) | RebalanceEvent::Revoked(partitions) = &event {
            if partitions.is_empty() {
                return;
            }
        }

        if let Err(err) = self.rebalance_sender.send(event) {
            warn!("Source loop is gone, dropping rebalance: {:?}", err.0);
        }
    }
}

impl ClientContext for SluiceConsumerContext {}

impl ConsumerContext for SluiceConsumerContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'_>) {
        debug!("Context: pre rebalance, {:?}", rebalance);

        if let Rebalance::Revoke(tp_list) = rebalance {
            self.forward(RebalanceEvent::Revoked(self.partitions(tp_list)));
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'_>) {
        debug!("Context: post rebalance, {:?}", rebalance);

        match rebalance {
            Rebalance::Assign(tp_list) => {
                self.forward(RebalanceEvent::Assigned(self.partitions(tp_list)))
            }
            Rebalance::Revoke(_) => (),
            Rebalance::Error(err) => error!("Rebalance failed, caused by: {}", err),
        }
    }
}
