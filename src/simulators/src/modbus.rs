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

//! Modbus TCP device simulator (§3, §4.1, §4.2). Owns one or more unit-id
//! banks, accepts TCP connections, and dispatches each MBAP/PDU frame
//! against the matching unit's registers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use protocol::modbus::{
    self, ExceptionCode, FunctionRequest, FunctionResponse, MbapHeader, RequestFrame,
    ResponseFrame, MAX_COILS_PER_REQUEST, MAX_REGISTERS_PER_REQUEST,
};
use sim_core::{Direction, PacketEvent, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SequenceSource;

/// One unit id's register banks. Mutated by client writes and the data
/// simulator tick under the same mutex (§5: "protected by a per-device
/// mutex").
#[derive(Debug, Default)]
pub struct ModbusBanks {
    pub coils: HashMap<u16, bool>,
    pub discrete_inputs: HashMap<u16, bool>,
    pub holding_registers: HashMap<u16, u16>,
    pub input_registers: HashMap<u16, u16>,
}

pub struct ModbusDevice {
    pub unit_id: u8,
    pub banks: Mutex<ModbusBanks>,
}

pub struct ModbusServer {
    pub bind_addr: String,
    pub port: u16,
    devices: DashMap<u8, Arc<ModbusDevice>>,
    events: broadcast::Sender<PacketEvent>,
    seq: SequenceSource,
}

impl ModbusServer {
    pub fn new(bind_addr: impl Into<String>, port: u16, events: broadcast::Sender<PacketEvent>) -> Self {
        let devices = DashMap::new();
        ModbusServer {
            bind_addr: bind_addr.into(),
            port,
            devices,
            events,
            seq: SequenceSource::new(),
        }
    }

    /// Registers a unit id with zeroed banks if it isn't already present.
    pub fn ensure_unit(&self, unit_id: u8) -> Arc<ModbusDevice> {
        self.devices
            .entry(unit_id)
            .or_insert_with(|| {
                Arc::new(ModbusDevice {
                    unit_id,
                    banks: Mutex::new(ModbusBanks::default()),
                })
            })
            .clone()
    }

    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.bind_addr.as_str(), self.port)).await?;
        info!(addr = %self.bind_addr, port = self.port, "modbus server listening");
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("modbus server stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(%err, "modbus accept failed");
                            continue;
                        }
                    };
                    let server = self.clone();
                    let conn_stop = stop.clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_connection(socket, peer, conn_stop).await {
                            debug!(%peer, %err, "modbus connection closed with error");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        mut socket: TcpStream,
        peer: SocketAddr,
        stop: CancellationToken,
    ) -> std::io::Result<()> {
        let local = socket.local_addr()?;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                read = socket.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(()); // EOF
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
            }

            loop {
                match modbus::parse_request(&buf) {
                    Ok((frame, consumed)) => {
                        self.publish(
                            Direction::Inbound,
                            peer,
                            local,
                            &buf[..consumed],
                            format!("modbus request unit={} fc={:#04x}", frame.header.unit_id, frame.function.function_code()),
                        );
                        let response = self.dispatch(&frame).await;
                        let encoded = modbus::encode_response(&response);
                        self.publish(
                            Direction::Outbound,
                            local,
                            peer,
                            &encoded,
                            format!("modbus response unit={}", response.header.unit_id),
                        );
                        socket.write_all(&encoded).await?;
                        socket.flush().await?;
                        buf.drain(..consumed);
                    }
                    Err(modbus::ParseError::Incomplete) => break,
                    Err(_malformed) => {
                        // a malformed frame is confined to this connection;
                        // drop the buffer and keep the connection open for
                        // the next well-formed frame.
                        buf.clear();
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, frame: &RequestFrame) -> ResponseFrame {
        let header = frame.header;
        let Some(device) = self.devices.get(&header.unit_id).map(|d| d.clone()) else {
            return exception(header, frame.function.function_code(), ExceptionCode::GatewayTargetDeviceFailedToRespond);
        };

        let mut banks = device.banks.lock().await;
        let function_code = frame.function.function_code();
        let function = match &frame.function {
            FunctionRequest::ReadCoils { address, quantity } => {
                read_bits(&banks.coils, *address, *quantity, function_code)
            }
            FunctionRequest::ReadDiscreteInputs { address, quantity } => {
                read_bits(&banks.discrete_inputs, *address, *quantity, function_code)
            }
            FunctionRequest::ReadHoldingRegisters { address, quantity } => {
                read_registers(&banks.holding_registers, *address, *quantity, function_code)
            }
            FunctionRequest::ReadInputRegisters { address, quantity } => {
                read_registers(&banks.input_registers, *address, *quantity, function_code)
            }
            FunctionRequest::WriteSingleCoil { address, value } => {
                banks.coils.insert(*address, *value);
                Ok(FunctionResponse::WriteEcho {
                    function_code,
                    echo: encode_write_single(*address, if *value { 0xFF00 } else { 0x0000 }),
                })
            }
            FunctionRequest::WriteSingleRegister { address, value } => {
                banks.holding_registers.insert(*address, *value);
                Ok(FunctionResponse::WriteEcho {
                    function_code,
                    echo: encode_write_single(*address, *value),
                })
            }
            FunctionRequest::WriteMultipleCoils { address, values } => {
                if values.len() as u16 > MAX_COILS_PER_REQUEST {
                    Err(ExceptionCode::IllegalDataValue)
                } else {
                    for (i, value) in values.iter().enumerate() {
                        banks.coils.insert(address + i as u16, *value);
                    }
                    Ok(FunctionResponse::WriteMultipleEcho {
                        function_code,
                        address: *address,
                        quantity: values.len() as u16,
                    })
                }
            }
            FunctionRequest::WriteMultipleRegisters { address, values } => {
                if values.len() as u16 > MAX_REGISTERS_PER_REQUEST {
                    Err(ExceptionCode::IllegalDataValue)
                } else {
                    for (i, value) in values.iter().enumerate() {
                        banks.holding_registers.insert(address + i as u16, *value);
                    }
                    Ok(FunctionResponse::WriteMultipleEcho {
                        function_code,
                        address: *address,
                        quantity: values.len() as u16,
                    })
                }
            }
            FunctionRequest::DiagnosticsEcho { data } => {
                Ok(FunctionResponse::DiagnosticsEcho { data: data.clone() })
            }
            FunctionRequest::Unknown { .. } => Err(ExceptionCode::IllegalFunction),
        };

        match function {
            Ok(function) => ResponseFrame { header, function },
            Err(code) => exception(header, function_code, code),
        }
    }

    fn publish(&self, direction: Direction, src: SocketAddr, dst: SocketAddr, payload: &[u8], info: String) {
        let event = PacketEvent::new(
            self.seq.next(),
            direction,
            src.ip().to_string(),
            src.port(),
            dst.ip().to_string(),
            dst.port(),
            Protocol::Modbus,
            payload.to_vec(),
            info,
        );
        let _ = self.events.send(event);
    }

    /// Per-tick data simulator (§4.2): nudges every register's value.
    pub async fn tick(&self) {
        for entry in self.devices.iter() {
            let device = entry.value().clone();
            let mut banks = device.banks.lock().await;
            for value in banks.holding_registers.values_mut() {
                let evolved = crate::datasim::evolve_analog(*value as f64, 5.0, 0.0, u16::MAX as f64);
                *value = evolved.round() as u16;
            }
            for value in banks.input_registers.values_mut() {
                let evolved = crate::datasim::evolve_analog(*value as f64, 5.0, 0.0, u16::MAX as f64);
                *value = evolved.round() as u16;
            }
            for value in banks.discrete_inputs.values_mut() {
                *value = crate::datasim::evolve_boolean(*value);
            }
        }
    }
}

fn encode_write_single(address: u16, value: u16) -> [u8; 4] {
    let mut out = [0u8; 4];
    out[0..2].copy_from_slice(&address.to_be_bytes());
    out[2..4].copy_from_slice(&value.to_be_bytes());
    out
}

fn read_bits(
    bank: &HashMap<u16, bool>,
    address: u16,
    quantity: u16,
    function_code: u8,
) -> Result<FunctionResponse, ExceptionCode> {
    if quantity == 0 || quantity > MAX_COILS_PER_REQUEST {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut values = Vec::with_capacity(quantity as usize);
    for offset in 0..quantity {
        let Some(addr) = address.checked_add(offset) else {
            return Err(ExceptionCode::IllegalDataAddress);
        };
        values.push(*bank.get(&addr).unwrap_or(&false));
    }
    Ok(FunctionResponse::ReadBits {
        function_code,
        bytes: protocol::modbus::pack_bits(&values),
    })
}

fn read_registers(
    bank: &HashMap<u16, u16>,
    address: u16,
    quantity: u16,
    function_code: u8,
) -> Result<FunctionResponse, ExceptionCode> {
    if quantity == 0 || quantity > MAX_REGISTERS_PER_REQUEST {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut values = Vec::with_capacity(quantity as usize);
    for offset in 0..quantity {
        let Some(addr) = address.checked_add(offset) else {
            return Err(ExceptionCode::IllegalDataAddress);
        };
        values.push(*bank.get(&addr).unwrap_or(&0));
    }
    Ok(FunctionResponse::ReadRegisters {
        function_code,
        values,
    })
}

fn exception(header: MbapHeader, function_code: u8, code: ExceptionCode) -> ResponseFrame {
    ResponseFrame {
        header,
        function: FunctionResponse::Exception { function_code, code },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_server() -> ModbusServer {
        let (tx, _rx) = broadcast::channel(16);
        ModbusServer::new("127.0.0.1", 0, tx)
    }

    #[tokio::test]
    async fn writing_then_reading_a_holding_register_round_trips() {
        let server = new_test_server();
        let device = server.ensure_unit(1);
        {
            let mut banks = device.banks.lock().await;
            banks.holding_registers.insert(4, 1000);
        }

        let frame = RequestFrame {
            header: MbapHeader {
                transaction_id: 7,
                length: 0,
                unit_id: 1,
            },
            function: FunctionRequest::ReadHoldingRegisters {
                address: 4,
                quantity: 1,
            },
        };
        let response = server.dispatch(&frame).await;
        assert_eq!(response.header.transaction_id, 7);
        assert_eq!(
            response.function,
            FunctionResponse::ReadRegisters {
                function_code: 0x03,
                values: vec![1000]
            }
        );
    }

    #[tokio::test]
    async fn unknown_unit_id_returns_gateway_exception() {
        let server = new_test_server();
        let frame = RequestFrame {
            header: MbapHeader {
                transaction_id: 1,
                length: 0,
                unit_id: 99,
            },
            function: FunctionRequest::ReadHoldingRegisters {
                address: 0,
                quantity: 1,
            },
        };
        let response = server.dispatch(&frame).await;
        assert_eq!(
            response.function,
            FunctionResponse::Exception {
                function_code: 0x03,
                code: ExceptionCode::GatewayTargetDeviceFailedToRespond
            }
        );
    }

    #[tokio::test]
    async fn oversized_quantity_returns_illegal_data_value() {
        let server = new_test_server();
        server.ensure_unit(1);
        let frame = RequestFrame {
            header: MbapHeader {
                transaction_id: 1,
                length: 0,
                unit_id: 1,
            },
            function: FunctionRequest::ReadHoldingRegisters {
                address: 0,
                quantity: MAX_REGISTERS_PER_REQUEST + 1,
            },
        };
        let response = server.dispatch(&frame).await;
        assert_eq!(
            response.function,
            FunctionResponse::Exception {
                function_code: 0x03,
                code: ExceptionCode::IllegalDataValue
            }
        );
    }

    #[tokio::test]
    async fn unknown_function_code_returns_illegal_function_exception() {
        let server = new_test_server();
        server.ensure_unit(1);
        let frame = RequestFrame {
            header: MbapHeader {
                transaction_id: 1,
                length: 0,
                unit_id: 1,
            },
            function: FunctionRequest::Unknown { code: 0x63 },
        };
        let response = server.dispatch(&frame).await;
        assert_eq!(
            response.function,
            FunctionResponse::Exception {
                function_code: 0x63,
                code: ExceptionCode::IllegalFunction,
            }
        );
    }

    #[tokio::test]
    async fn write_single_coil_echoes_request() {
        let server = new_test_server();
        server.ensure_unit(1);
        let frame = RequestFrame {
            header: MbapHeader {
                transaction_id: 1,
                length: 0,
                unit_id: 1,
            },
            function: FunctionRequest::WriteSingleCoil {
                address: 10,
                value: true,
            },
        };
        let response = server.dispatch(&frame).await;
        assert_eq!(
            response.function,
            FunctionResponse::WriteEcho {
                function_code: 0x05,
                echo: [0x00, 0x0A, 0xFF, 0x00]
            }
        );
    }
}
