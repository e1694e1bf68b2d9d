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

use crate::codec::TransportDocument;

mod error;
pub mod postgres;

pub use error::{SinkWriterCreationError, WriteError};
pub use postgres::PostgresSinkWriter;

/// One durable bulk write per batch.
///
/// Implementations either accept the whole document or none of it, and never
/// retry internally. Retry policy, if any, belongs to the caller.
#[trait_variant::make(Send)]
pub trait SinkWriter {
    async fn write(&self, document: &TransportDocument) -> Result<(), WriteError>;
}
