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

use std::fmt::Display;

/// Transitions over a processor's lifetime are:
///     Created -> Opened -> Idle <-> Processing
///     {Created, Opened, Idle} -> Closing -> Closed
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub enum ProcessorState {
    #[default]
    Created,
    Opened,
    Idle,
    Processing,
    Closing,
    Closed,
}

impl Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, thiserror::Error, derive_more::Display, PartialEq, Eq)]
pub enum StateTransitionError {
    #[display(
        fmt = "StateTransitionError::InvalidStateTransition: from {} to {}",
        from,
        to
    )]
    InvalidStateTransition {
        from: ProcessorState,
        to: ProcessorState,
    },
}

impl ProcessorState {
    pub fn transition_state(self, state: ProcessorState) -> Result<Self, StateTransitionError> {
        use ProcessorState::*;

        match (self, state) {
            (Created, Opened)
            | (Opened, Idle)
            | (Idle, Processing)
            | (Processing, Idle)
            | (Created | Opened | Idle, Closing)
            | (Closing, Closed) => Ok(state),
            (from, to) => Err(StateTransitionError::InvalidStateTransition { from, to }),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Opened | Self::Idle | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
