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

use thiserror::Error;

/// Error taxonomy shared across the simulation core. Each protocol codec and
/// server narrows these into its own exception/response handling; this enum
/// is what crosses crate boundaries (capture, bridge, load tester, cmd).
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("malformed protocol frame: {0}")]
    ProtocolFrame(String),

    #[error("protocol semantic error: {0}")]
    ProtocolSemantic(String),

    #[error("referenced state not found: {0}")]
    StateNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transform evaluation failed: {0}")]
    Transform(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("{0}")]
    Other(String),
}

impl From<String> for CommonError {
    fn from(value: String) -> Self {
        CommonError::Other(value)
    }
}

impl From<&str> for CommonError {
    fn from(value: &str) -> Self {
        CommonError::Other(value.to_string())
    }
}

pub type CommonResult<T> = Result<T, CommonError>;
