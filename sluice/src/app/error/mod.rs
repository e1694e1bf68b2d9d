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

use crate::message::PartitionId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    #[error("HostError::PartitionNotAssigned: {0} is not assigned to this host")]
    PartitionNotAssigned(PartitionId),
    #[error("HostError::PartitionTaskGone: the task for {0} stopped accepting work")]
    PartitionTaskGone(PartitionId),
    #[error("HostError::PartitionTaskFailed: the task for {}, failed: {}", partition, reason)]
    PartitionTaskFailed {
        partition: PartitionId,
        reason: String,
    },
}
