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

//! Packet capturer (§4.6) and recorder/replayer (§4.7): receives
//! `PacketEvent`s from every simulator, applies filters, retains a bounded
//! ring buffer with a lazily decoded view per protocol, and supports
//! recording sessions that a `Replayer` can later play back with
//! preserved inter-arrival timing.

pub mod capturer;
pub mod decode;
pub mod export;
pub mod filter;
pub mod recorder;
pub mod replay;

pub use capturer::{CaptureStats, CapturedPacket, PacketCapturer};
pub use filter::{FilterAction, FilterRule};
pub use recorder::{Recorder, RecordingSession, SessionStats};
pub use replay::{ReplayMode, ReplayProgress, Replayer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("session {0} is still recording")]
    SessionStillRecording(String),
    #[error("export failed: {0}")]
    Export(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
