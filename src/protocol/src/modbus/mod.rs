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

//! Modbus TCP wire codec (§4.1). An MBAP header (7 bytes) precedes the PDU:
//! `transaction_id (u16 BE), protocol_id=0 (u16), length (u16), unit_id (u8)`.
//! `parse`/`encode` are pure functions over byte slices; the simulator owns
//! all stateful dispatch (register banks, unit id routing) in the
//! `simulators` crate.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const MBAP_HEADER_LEN: usize = 7;
pub const MAX_COILS_PER_REQUEST: u16 = 2000;
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("need more bytes to parse a full frame")]
    Incomplete,
    #[error("unsupported protocol id {0}")]
    BadProtocolId(u16),
    #[error("frame too short")]
    TooShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRequest {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
    DiagnosticsEcho { data: Vec<u8> },
    /// An unrecognized function code, kept distinct from `DiagnosticsEcho`
    /// so the dispatcher can answer it with exception 0x01 instead of
    /// echoing it back as a genuine FC 0x08 diagnostics reply.
    Unknown { code: u8 },
}

impl FunctionRequest {
    pub fn function_code(&self) -> u8 {
        match self {
            FunctionRequest::ReadCoils { .. } => 0x01,
            FunctionRequest::ReadDiscreteInputs { .. } => 0x02,
            FunctionRequest::ReadHoldingRegisters { .. } => 0x03,
            FunctionRequest::ReadInputRegisters { .. } => 0x04,
            FunctionRequest::WriteSingleCoil { .. } => 0x05,
            FunctionRequest::WriteSingleRegister { .. } => 0x06,
            FunctionRequest::WriteMultipleCoils { .. } => 0x0F,
            FunctionRequest::WriteMultipleRegisters { .. } => 0x10,
            FunctionRequest::DiagnosticsEcho { .. } => 0x08,
            FunctionRequest::Unknown { code } => *code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionResponse {
    ReadBits { function_code: u8, bytes: Vec<u8> },
    ReadRegisters { function_code: u8, values: Vec<u16> },
    /// Write responses echo the first five bytes of the request PDU
    /// (function code + address + value/quantity).
    WriteEcho { function_code: u8, echo: [u8; 4] },
    WriteMultipleEcho { function_code: u8, address: u16, quantity: u16 },
    DiagnosticsEcho { data: Vec<u8> },
    Exception { function_code: u8, code: ExceptionCode },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub header: MbapHeader,
    pub function: FunctionRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub header: MbapHeader,
    pub function: FunctionResponse,
}

/// Parse a complete request frame. Returns `(frame, consumed_len)`.
pub fn parse_request(buf: &[u8]) -> Result<(RequestFrame, usize), ParseError> {
    if buf.len() < MBAP_HEADER_LEN {
        return Err(ParseError::Incomplete);
    }
    let mut header_bytes = Bytes::copy_from_slice(&buf[..MBAP_HEADER_LEN]);
    let transaction_id = header_bytes.get_u16();
    let protocol_id = header_bytes.get_u16();
    if protocol_id != 0 {
        return Err(ParseError::BadProtocolId(protocol_id));
    }
    let length = header_bytes.get_u16();
    let unit_id = header_bytes.get_u8();

    // length includes the unit_id byte; a frame advertising length 0 is
    // malformed (there wouldn't even be room for the unit_id already read).
    let pdu_len = (length as usize)
        .checked_sub(1)
        .ok_or(ParseError::TooShort)?;
    let total_len = MBAP_HEADER_LEN + pdu_len;
    if buf.len() < total_len {
        return Err(ParseError::Incomplete);
    }
    let mut pdu = Bytes::copy_from_slice(&buf[MBAP_HEADER_LEN..total_len]);
    if !pdu.has_remaining() {
        return Err(ParseError::TooShort);
    }
    let function_code = pdu.get_u8();
    let function = parse_function_request(function_code, &mut pdu)?;

    Ok((
        RequestFrame {
            header: MbapHeader {
                transaction_id,
                length,
                unit_id,
            },
            function,
        },
        total_len,
    ))
}

fn parse_function_request(code: u8, pdu: &mut Bytes) -> Result<FunctionRequest, ParseError> {
    Ok(match code {
        0x01 | 0x02 | 0x03 | 0x04 => {
            if pdu.remaining() < 4 {
                return Err(ParseError::TooShort);
            }
            let address = pdu.get_u16();
            let quantity = pdu.get_u16();
            match code {
                0x01 => FunctionRequest::ReadCoils { address, quantity },
                0x02 => FunctionRequest::ReadDiscreteInputs { address, quantity },
                0x03 => FunctionRequest::ReadHoldingRegisters { address, quantity },
                _ => FunctionRequest::ReadInputRegisters { address, quantity },
            }
        }
        0x05 => {
            if pdu.remaining() < 4 {
                return Err(ParseError::TooShort);
            }
            let address = pdu.get_u16();
            let value = pdu.get_u16();
            FunctionRequest::WriteSingleCoil {
                address,
                value: value == 0xFF00,
            }
        }
        0x06 => {
            if pdu.remaining() < 4 {
                return Err(ParseError::TooShort);
            }
            let address = pdu.get_u16();
            let value = pdu.get_u16();
            FunctionRequest::WriteSingleRegister { address, value }
        }
        0x0F => {
            if pdu.remaining() < 5 {
                return Err(ParseError::TooShort);
            }
            let address = pdu.get_u16();
            let quantity = pdu.get_u16();
            let byte_count = pdu.get_u8() as usize;
            if pdu.remaining() < byte_count {
                return Err(ParseError::TooShort);
            }
            let data = pdu.copy_to_bytes(byte_count);
            let mut values = Vec::with_capacity(quantity as usize);
            for i in 0..quantity as usize {
                let byte = data[i / 8];
                values.push(byte & (1 << (i % 8)) != 0);
            }
            FunctionRequest::WriteMultipleCoils { address, values }
        }
        0x10 => {
            if pdu.remaining() < 5 {
                return Err(ParseError::TooShort);
            }
            let address = pdu.get_u16();
            let quantity = pdu.get_u16();
            let byte_count = pdu.get_u8() as usize;
            if pdu.remaining() < byte_count || byte_count < quantity as usize * 2 {
                return Err(ParseError::TooShort);
            }
            let mut values = Vec::with_capacity(quantity as usize);
            for _ in 0..quantity {
                values.push(pdu.get_u16());
            }
            FunctionRequest::WriteMultipleRegisters { address, values }
        }
        0x08 => {
            if pdu.remaining() < 2 {
                return Err(ParseError::TooShort);
            }
            let sub_function = pdu.get_u16();
            let data = pdu.copy_to_bytes(pdu.remaining()).to_vec();
            let mut full = Vec::with_capacity(2 + data.len());
            full.extend_from_slice(&sub_function.to_be_bytes());
            full.extend_from_slice(&data);
            FunctionRequest::DiagnosticsEcho { data: full }
        }
        _ => FunctionRequest::Unknown { code },
    })
}

pub fn encode_response(frame: &ResponseFrame) -> BytesMut {
    let mut pdu = BytesMut::new();
    match &frame.function {
        FunctionResponse::ReadBits { function_code, bytes } => {
            pdu.put_u8(*function_code);
            pdu.put_u8(bytes.len() as u8);
            pdu.extend_from_slice(bytes);
        }
        FunctionResponse::ReadRegisters { function_code, values } => {
            pdu.put_u8(*function_code);
            pdu.put_u8((values.len() * 2) as u8);
            for v in values {
                pdu.put_u16(*v);
            }
        }
        FunctionResponse::WriteEcho { function_code, echo } => {
            pdu.put_u8(*function_code);
            pdu.extend_from_slice(echo);
        }
        FunctionResponse::WriteMultipleEcho {
            function_code,
            address,
            quantity,
        } => {
            pdu.put_u8(*function_code);
            pdu.put_u16(*address);
            pdu.put_u16(*quantity);
        }
        FunctionResponse::DiagnosticsEcho { data } => {
            pdu.put_u8(0x08);
            pdu.extend_from_slice(data);
        }
        FunctionResponse::Exception { function_code, code } => {
            pdu.put_u8(function_code | 0x80);
            pdu.put_u8(*code as u8);
        }
    }

    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    buf.put_u16(frame.header.transaction_id);
    buf.put_u16(0); // protocol id
    buf.put_u16((pdu.len() + 1) as u16); // +1 for unit id
    buf.put_u8(frame.header.unit_id);
    buf.extend_from_slice(&pdu);
    buf
}

/// `ceil(quantity/8)` bytes; bit `i` of byte `k` carries coil
/// `start + 8k + i` (§4.1, §8).
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let byte_count = values.len().div_ceil(8);
    let mut bytes = vec![0u8; byte_count];
    for (i, &v) in values.iter().enumerate() {
        if v {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

pub fn unpack_bits(bytes: &[u8], quantity: usize) -> Vec<bool> {
    (0..quantity)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_pack_round_trip_matches_ceil_byte_count() {
        let values: Vec<bool> = (0..13).map(|i| i % 3 == 0).collect();
        let packed = pack_bits(&values);
        assert_eq!(packed.len(), 2); // ceil(13/8)
        let unpacked = unpack_bits(&packed, values.len());
        assert_eq!(unpacked, values);
    }

    #[test]
    fn parses_read_holding_registers_request() {
        let raw = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        let (frame, consumed) = parse_request(&raw).unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(frame.header.transaction_id, 1);
        assert_eq!(frame.header.unit_id, 1);
        assert_eq!(
            frame.function,
            FunctionRequest::ReadHoldingRegisters {
                address: 0,
                quantity: 2
            }
        );
    }

    #[test]
    fn incomplete_frame_is_reported_as_incomplete() {
        let raw = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03];
        assert_eq!(parse_request(&raw), Err(ParseError::Incomplete));
    }

    #[test]
    fn zero_length_mbap_header_is_rejected_not_panicking() {
        // length == 0 would underflow `length - 1` if not guarded; must be
        // reported as a parse error instead of panicking on a bad slice.
        let raw = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(parse_request(&raw), Err(ParseError::TooShort));
    }

    #[test]
    fn unknown_function_code_parses_as_unknown_variant() {
        let raw = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x63];
        let (frame, consumed) = parse_request(&raw).unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(frame.function, FunctionRequest::Unknown { code: 0x63 });
        assert_eq!(frame.function.function_code(), 0x63);
    }

    #[test]
    fn seed_scenario_read_holding_registers_response() {
        // `00 01 00 00 00 06 01 03 00 00 00 02` -> MBAP `00 01 00 00 00 07 01`
        // followed by PDU `03 04 [r0_hi r0_lo r1_hi r1_lo]`
        let frame = ResponseFrame {
            header: MbapHeader {
                transaction_id: 1,
                length: 0,
                unit_id: 1,
            },
            function: FunctionResponse::ReadRegisters {
                function_code: 0x03,
                values: vec![0x0102, 0x0304],
            },
        };
        let encoded = encode_response(&frame);
        assert_eq!(&encoded[..7], &[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01]);
        assert_eq!(&encoded[7..9], &[0x03, 0x04]);
        assert_eq!(&encoded[9..], &[0x01, 0x02, 0x03, 0x04]);
    }
}
