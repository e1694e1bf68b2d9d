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

//! Moves batches of partitioned stream events into a database sink with
//! at-least-once delivery.
//!
//! A [`processor::PartitionProcessor`] encodes each batch into a
//! [`codec::TransportDocument`], writes it through a [`sink::SinkWriter`] and
//! only then advances the partition's checkpoint through the shared
//! [`checkpoint::CheckpointGate`]. A [`app::ProcessorHost`] runs one processor
//! per assigned partition.

pub mod app;
pub mod checkpoint;
pub mod codec;
pub mod init;
pub mod message;
pub mod observe;
pub mod processor;
pub mod sink;

mod util;

pub use app::{ProcessorHost, SluiceConfig, SluiceConfigBuilder};
