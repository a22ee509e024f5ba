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

//! BACnet/IP wire codec (§4.1): BVLC header, NPDU, APDU over UDP. Supports
//! Who-Is/I-Am, Who-Has/I-Have, ReadProperty/ReadPropertyACK and
//! WriteProperty/SimpleACK, with the REAL/Unsigned/Null application tag
//! encodings the device simulator needs.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed bvlc header")]
    MalformedBvlc,
    #[error("unsupported bvlc function {0}")]
    UnsupportedFunction(u8),
    #[error("malformed npdu")]
    MalformedNpdu,
    #[error("malformed apdu")]
    MalformedApdu,
    #[error("insufficient bytes")]
    InsufficientBytes,
}

pub const BVLC_TYPE: u8 = 0x81;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BvlcFunction {
    OriginalUnicastNpdu = 0x0A,
    OriginalBroadcastNpdu = 0x0B,
}

impl BvlcFunction {
    fn from_u8(v: u8) -> Result<Self, Error> {
        Ok(match v {
            0x0A => BvlcFunction::OriginalUnicastNpdu,
            0x0B => BvlcFunction::OriginalBroadcastNpdu,
            other => return Err(Error::UnsupportedFunction(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationTag {
    Null,
    Unsigned(u32),
    Real(f32),
}

impl ApplicationTag {
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            ApplicationTag::Null => out.put_u8(0x7E),
            ApplicationTag::Unsigned(v) => {
                out.put_u8(0x22);
                out.put_u32(*v);
            }
            ApplicationTag::Real(v) => {
                out.put_u8(0x44);
                out.put_f32(*v);
            }
        }
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, Error> {
        if !bytes.has_remaining() {
            return Err(Error::InsufficientBytes);
        }
        let tag = bytes.get_u8();
        Ok(match tag {
            0x7E => ApplicationTag::Null,
            0x22 => {
                if bytes.remaining() < 4 {
                    return Err(Error::InsufficientBytes);
                }
                ApplicationTag::Unsigned(bytes.get_u32())
            }
            0x44 => {
                if bytes.remaining() < 4 {
                    return Err(Error::InsufficientBytes);
                }
                ApplicationTag::Real(bytes.get_f32())
            }
            _ => return Err(Error::MalformedApdu),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Service {
    WhoIs {
        low_limit: Option<u32>,
        high_limit: Option<u32>,
    },
    IAm {
        device_instance: u32,
        vendor_id: u16,
    },
    WhoHas {
        object_name: String,
    },
    IHave {
        device_instance: u32,
        object_instance: u32,
        object_name: String,
    },
    ReadProperty {
        object_instance: u32,
        property_id: u32,
    },
    ReadPropertyAck {
        object_instance: u32,
        property_id: u32,
        value: ApplicationTag,
    },
    WriteProperty {
        object_instance: u32,
        property_id: u32,
        value: ApplicationTag,
    },
    SimpleAck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub broadcast: bool,
    pub service: Service,
}

pub fn parse(buf: &[u8]) -> Result<(Frame, usize), Error> {
    if buf.len() < 4 {
        return Err(Error::InsufficientBytes);
    }
    let mut bytes = Bytes::copy_from_slice(buf);
    let bvlc_type = bytes.get_u8();
    if bvlc_type != BVLC_TYPE {
        return Err(Error::MalformedBvlc);
    }
    let function = BvlcFunction::from_u8(bytes.get_u8())?;
    let length = bytes.get_u16() as usize;
    if buf.len() < length {
        return Err(Error::InsufficientBytes);
    }

    // NPDU: version, control octet, then optional dest/src/hop-count fields
    // per the control bits. The simulator only ever emits/consumes frames
    // with no network-layer routing, so both are absent here.
    if bytes.remaining() < 2 {
        return Err(Error::MalformedNpdu);
    }
    let _npdu_version = bytes.get_u8();
    let control = bytes.get_u8();
    if control & 0x20 != 0 {
        // destination present: net (2) + len (1) + addr(len) + hop count(1)
        if bytes.remaining() < 3 {
            return Err(Error::MalformedNpdu);
        }
        bytes.advance(2);
        let addr_len = bytes.get_u8() as usize;
        if bytes.remaining() < addr_len + 1 {
            return Err(Error::MalformedNpdu);
        }
        bytes.advance(addr_len + 1);
    }
    if control & 0x08 != 0 {
        if bytes.remaining() < 3 {
            return Err(Error::MalformedNpdu);
        }
        bytes.advance(2);
        let addr_len = bytes.get_u8() as usize;
        if bytes.remaining() < addr_len {
            return Err(Error::MalformedNpdu);
        }
        bytes.advance(addr_len);
    }

    let service = parse_apdu(&mut bytes)?;

    Ok((
        Frame {
            broadcast: matches!(function, BvlcFunction::OriginalBroadcastNpdu),
            service,
        },
        length,
    ))
}

fn parse_apdu(bytes: &mut Bytes) -> Result<Service, Error> {
    if !bytes.has_remaining() {
        return Err(Error::InsufficientBytes);
    }
    let pdu_type_byte = bytes.get_u8() >> 4;
    match pdu_type_byte {
        0x1 => {
            // unconfirmed request: service choice follows
            if !bytes.has_remaining() {
                return Err(Error::InsufficientBytes);
            }
            let service_choice = bytes.get_u8();
            match service_choice {
                0x08 => {
                    // who-is: zero or two optional unsigned limits
                    let (low, high) = if bytes.has_remaining() {
                        let low = ApplicationTag::decode(bytes)?;
                        let high = ApplicationTag::decode(bytes)?;
                        match (low, high) {
                            (ApplicationTag::Unsigned(l), ApplicationTag::Unsigned(h)) => {
                                (Some(l), Some(h))
                            }
                            _ => (None, None),
                        }
                    } else {
                        (None, None)
                    };
                    Ok(Service::WhoIs {
                        low_limit: low,
                        high_limit: high,
                    })
                }
                0x00 => {
                    let device_instance = match ApplicationTag::decode(bytes)? {
                        ApplicationTag::Unsigned(v) => v,
                        _ => return Err(Error::MalformedApdu),
                    };
                    let vendor_id = match ApplicationTag::decode(bytes)? {
                        ApplicationTag::Unsigned(v) => v as u16,
                        _ => return Err(Error::MalformedApdu),
                    };
                    Ok(Service::IAm {
                        device_instance,
                        vendor_id,
                    })
                }
                _ => Err(Error::MalformedApdu),
            }
        }
        0x0 => {
            // confirmed request: skip segmentation/invoke-id byte, then
            // service choice
            if bytes.remaining() < 2 {
                return Err(Error::InsufficientBytes);
            }
            bytes.advance(1); // max-segments/max-apdu
            let _invoke_id = bytes.get_u8();
            let service_choice = bytes.get_u8();
            match service_choice {
                0x0C => {
                    let object_instance = match ApplicationTag::decode(bytes)? {
                        ApplicationTag::Unsigned(v) => v,
                        _ => return Err(Error::MalformedApdu),
                    };
                    let property_id = match ApplicationTag::decode(bytes)? {
                        ApplicationTag::Unsigned(v) => v,
                        _ => return Err(Error::MalformedApdu),
                    };
                    Ok(Service::ReadProperty {
                        object_instance,
                        property_id,
                    })
                }
                0x0F => {
                    let object_instance = match ApplicationTag::decode(bytes)? {
                        ApplicationTag::Unsigned(v) => v,
                        _ => return Err(Error::MalformedApdu),
                    };
                    let property_id = match ApplicationTag::decode(bytes)? {
                        ApplicationTag::Unsigned(v) => v,
                        _ => return Err(Error::MalformedApdu),
                    };
                    let value = ApplicationTag::decode(bytes)?;
                    Ok(Service::WriteProperty {
                        object_instance,
                        property_id,
                        value,
                    })
                }
                _ => Err(Error::MalformedApdu),
            }
        }
        0x3 => {
            // complex-ack: service choice then contents
            if !bytes.has_remaining() {
                return Err(Error::InsufficientBytes);
            }
            let service_choice = bytes.get_u8();
            if service_choice != 0x0C {
                return Err(Error::MalformedApdu);
            }
            let object_instance = match ApplicationTag::decode(bytes)? {
                ApplicationTag::Unsigned(v) => v,
                _ => return Err(Error::MalformedApdu),
            };
            let property_id = match ApplicationTag::decode(bytes)? {
                ApplicationTag::Unsigned(v) => v,
                _ => return Err(Error::MalformedApdu),
            };
            let value = ApplicationTag::decode(bytes)?;
            Ok(Service::ReadPropertyAck {
                object_instance,
                property_id,
                value,
            })
        }
        0x2 => Ok(Service::SimpleAck),
        _ => Err(Error::MalformedApdu),
    }
}

pub fn encode(frame: &Frame) -> BytesMut {
    let mut npdu_and_apdu = BytesMut::new();
    npdu_and_apdu.put_u8(1); // npdu version
    npdu_and_apdu.put_u8(0x00); // control: no routing

    match &frame.service {
        Service::WhoIs {
            low_limit,
            high_limit,
        } => {
            npdu_and_apdu.put_u8(0x10); // PDU type 1 (unconfirmed), seg=0
            npdu_and_apdu.put_u8(0x08); // who-is
            if let (Some(l), Some(h)) = (low_limit, high_limit) {
                ApplicationTag::Unsigned(*l).encode(&mut npdu_and_apdu);
                ApplicationTag::Unsigned(*h).encode(&mut npdu_and_apdu);
            }
        }
        Service::IAm {
            device_instance,
            vendor_id,
        } => {
            npdu_and_apdu.put_u8(0x10);
            npdu_and_apdu.put_u8(0x00);
            ApplicationTag::Unsigned(*device_instance).encode(&mut npdu_and_apdu);
            ApplicationTag::Unsigned(*vendor_id as u32).encode(&mut npdu_and_apdu);
        }
        Service::WhoHas { object_name } => {
            npdu_and_apdu.put_u8(0x10);
            npdu_and_apdu.put_u8(0x07);
            npdu_and_apdu.put_u8(object_name.len() as u8);
            npdu_and_apdu.extend_from_slice(object_name.as_bytes());
        }
        Service::IHave {
            device_instance,
            object_instance,
            object_name,
        } => {
            npdu_and_apdu.put_u8(0x10);
            npdu_and_apdu.put_u8(0x01);
            ApplicationTag::Unsigned(*device_instance).encode(&mut npdu_and_apdu);
            ApplicationTag::Unsigned(*object_instance).encode(&mut npdu_and_apdu);
            npdu_and_apdu.put_u8(object_name.len() as u8);
            npdu_and_apdu.extend_from_slice(object_name.as_bytes());
        }
        Service::ReadProperty {
            object_instance,
            property_id,
        } => {
            npdu_and_apdu.put_u8(0x00); // confirmed request
            npdu_and_apdu.put_u8(0x05); // max-segments/max-apdu
            npdu_and_apdu.put_u8(0x01); // invoke id
            npdu_and_apdu.put_u8(0x0C); // read-property
            ApplicationTag::Unsigned(*object_instance).encode(&mut npdu_and_apdu);
            ApplicationTag::Unsigned(*property_id).encode(&mut npdu_and_apdu);
        }
        Service::ReadPropertyAck {
            object_instance,
            property_id,
            value,
        } => {
            npdu_and_apdu.put_u8(0x30); // complex-ack
            npdu_and_apdu.put_u8(0x0C);
            ApplicationTag::Unsigned(*object_instance).encode(&mut npdu_and_apdu);
            ApplicationTag::Unsigned(*property_id).encode(&mut npdu_and_apdu);
            value.encode(&mut npdu_and_apdu);
        }
        Service::WriteProperty {
            object_instance,
            property_id,
            value,
        } => {
            npdu_and_apdu.put_u8(0x00);
            npdu_and_apdu.put_u8(0x05);
            npdu_and_apdu.put_u8(0x01);
            npdu_and_apdu.put_u8(0x0F);
            ApplicationTag::Unsigned(*object_instance).encode(&mut npdu_and_apdu);
            ApplicationTag::Unsigned(*property_id).encode(&mut npdu_and_apdu);
            value.encode(&mut npdu_and_apdu);
        }
        Service::SimpleAck => {
            npdu_and_apdu.put_u8(0x20); // simple-ack
            npdu_and_apdu.put_u8(0x00);
        }
    }

    let mut buf = BytesMut::with_capacity(4 + npdu_and_apdu.len());
    buf.put_u8(BVLC_TYPE);
    buf.put_u8(if frame.broadcast {
        BvlcFunction::OriginalBroadcastNpdu as u8
    } else {
        BvlcFunction::OriginalUnicastNpdu as u8
    });
    buf.put_u16((4 + npdu_and_apdu.len()) as u16);
    buf.extend_from_slice(&npdu_and_apdu);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn who_is_broadcast_with_no_range_round_trips() {
        let frame = Frame {
            broadcast: true,
            service: Service::WhoIs {
                low_limit: None,
                high_limit: None,
            },
        };
        let encoded = encode(&frame);
        let (decoded, consumed) = parse(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn i_am_carries_device_instance_and_vendor_id() {
        let frame = Frame {
            broadcast: true,
            service: Service::IAm {
                device_instance: 1001,
                vendor_id: 260,
            },
        };
        let encoded = encode(&frame);
        let (decoded, _) = parse(&encoded).unwrap();
        assert_eq!(
            decoded.service,
            Service::IAm {
                device_instance: 1001,
                vendor_id: 260
            }
        );
    }

    #[test]
    fn read_property_ack_round_trips_real_value() {
        let frame = Frame {
            broadcast: false,
            service: Service::ReadPropertyAck {
                object_instance: 1,
                property_id: 85,
                value: ApplicationTag::Real(21.5),
            },
        };
        let encoded = encode(&frame);
        let (decoded, _) = parse(&encoded).unwrap();
        assert_eq!(decoded.service, frame.service);
    }

    #[test]
    fn write_property_simple_ack_round_trips() {
        let frame = Frame {
            broadcast: false,
            service: Service::SimpleAck,
        };
        let encoded = encode(&frame);
        let (decoded, _) = parse(&encoded).unwrap();
        assert_eq!(decoded.service, Service::SimpleAck);
    }

    #[test]
    fn application_tags_use_documented_byte_values() {
        let mut buf = BytesMut::new();
        ApplicationTag::Null.encode(&mut buf);
        assert_eq!(buf[0], 0x7E);
        buf.clear();
        ApplicationTag::Unsigned(1).encode(&mut buf);
        assert_eq!(buf[0], 0x22);
        buf.clear();
        ApplicationTag::Real(1.0).encode(&mut buf);
        assert_eq!(buf[0], 0x44);
    }
}
