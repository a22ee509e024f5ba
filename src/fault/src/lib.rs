// Copyright 2024 ProtoSim Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fault injector (§4.8): a registry of `Fault` descriptors, a background
//! Bernoulli monitor task, and a synchronous `should_modify_packet` hook
//! wired into the capture/bridge packet path via `sim_core::hook::PacketHook`.

pub mod fault_type;
pub mod reorder;
pub mod registry;

pub use fault_type::FaultType;
pub use reorder::ReorderBuffer;
pub use registry::{Fault, FaultRegistry};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaultError {
    #[error("fault {0} not found")]
    NotFound(String),
    #[error("fault {0} already registered")]
    AlreadyExists(String),
}

pub type FaultResult<T> = Result<T, FaultError>;
