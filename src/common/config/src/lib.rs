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

use common_base::error::{CommonError, CommonResult};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ProtoSimConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub modbus: ModbusConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub coap: CoapConfig,
    #[serde(default)]
    pub bacnet: BacnetConfig,
    #[serde(default)]
    pub opcua: OpcUaConfig,
    #[serde(default)]
    pub raw_tcp: RawTcpConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub eventbus: EventBusConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for ModbusConfig {
    fn default() -> Self {
        ModbusConfig {
            bind_address: default_bind_address(),
            port: default_modbus_port(),
            unit_id: default_unit_id(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub default_keep_alive_secs: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u16 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            bind_address: default_bind_address(),
            port: default_mqtt_port(),
            default_keep_alive_secs: default_keep_alive(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoapConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_coap_port")]
    pub port: u16,
    #[serde(default = "default_max_age")]
    pub observe_max_age_secs: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_coap_port() -> u16 {
    5683
}

fn default_max_age() -> u32 {
    60
}

impl Default for CoapConfig {
    fn default() -> Self {
        CoapConfig {
            bind_address: default_bind_address(),
            port: default_coap_port(),
            observe_max_age_secs: default_max_age(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacnetConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_bacnet_port")]
    pub port: u16,
    #[serde(default = "default_device_instance")]
    pub device_instance: u32,
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_bacnet_port() -> u16 {
    47808
}

fn default_device_instance() -> u32 {
    1001
}

fn default_vendor_id() -> u16 {
    260
}

impl Default for BacnetConfig {
    fn default() -> Self {
        BacnetConfig {
            bind_address: default_bind_address(),
            port: default_bacnet_port(),
            device_instance: default_device_instance(),
            vendor_id: default_vendor_id(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpcUaConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_opcua_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_opcua_port() -> u16 {
    4840
}

impl Default for OpcUaConfig {
    fn default() -> Self {
        OpcUaConfig {
            bind_address: default_bind_address(),
            port: default_opcua_port(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTcpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_raw_tcp_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_raw_tcp_port() -> u16 {
    8080
}

impl Default for RawTcpConfig {
    fn default() -> Self {
        RawTcpConfig {
            bind_address: default_bind_address(),
            port: default_raw_tcp_port(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

fn default_ring_capacity() -> usize {
    10_000
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            ring_capacity: default_ring_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_history_capacity() -> usize {
    1_000
}

impl Default for EventBusConfig {
    fn default() -> Self {
        EventBusConfig {
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for ProtoSimConfig {
    fn default() -> Self {
        ProtoSimConfig {
            log: LogConfig::default(),
            modbus: ModbusConfig::default(),
            mqtt: MqttConfig::default(),
            coap: CoapConfig::default(),
            bacnet: BacnetConfig::default(),
            opcua: OpcUaConfig::default(),
            raw_tcp: RawTcpConfig::default(),
            capture: CaptureConfig::default(),
            eventbus: EventBusConfig::default(),
        }
    }
}

/// Loads configuration from a TOML file. Absent keys fall back to the
/// defaults above; a missing file is not an error at this layer (the binary
/// decides whether that's acceptable), but a malformed file is always a
/// ConfigError surfaced whole -- no partial load.
pub fn load_config(path: &Path) -> CommonResult<ProtoSimConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CommonError::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&content).map_err(|e| CommonError::Config(format!("invalid config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_ports() {
        let cfg = ProtoSimConfig::default();
        assert_eq!(cfg.modbus.port, 502);
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.opcua.port, 4840);
        assert_eq!(cfg.bacnet.port, 47808);
        assert_eq!(cfg.coap.port, 5683);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: ProtoSimConfig = toml::from_str("[mqtt]\nport = 11883\n").unwrap();
        assert_eq!(cfg.mqtt.port, 11883);
        assert_eq!(cfg.modbus.port, 502);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let result: Result<ProtoSimConfig, _> = toml::from_str("not = [valid");
        assert!(result.is_err());
    }
}
