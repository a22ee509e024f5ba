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

use super::*;

const FLAG_CLEAN_SESSION: u8 = 1 << 1;
const FLAG_WILL: u8 = 1 << 2;
const FLAG_WILL_QOS_SHIFT: u8 = 3;
const FLAG_WILL_RETAIN: u8 = 1 << 5;
const FLAG_PASSWORD: u8 = 1 << 6;
const FLAG_USERNAME: u8 = 1 << 7;

pub fn read(fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Connect, Error> {
    bytes.advance(fixed_header.fixed_header_len);

    let protocol_name = read_mqtt_string(&mut bytes)?;
    if protocol_name != PROTOCOL_NAME {
        return Err(Error::MalformedPacket);
    }
    let level = read_u8(&mut bytes)?;
    if level != PROTOCOL_LEVEL {
        return Err(Error::InvalidProtocolLevel(level));
    }
    let connect_flags = read_u8(&mut bytes)?;
    let clean_session = connect_flags & FLAG_CLEAN_SESSION != 0;
    let keep_alive = read_u16(&mut bytes)?;

    let client_id = read_mqtt_string(&mut bytes)?;

    let will = if connect_flags & FLAG_WILL != 0 {
        let topic = read_mqtt_string(&mut bytes)?;
        let message = read_mqtt_bytes(&mut bytes)?;
        let qos = (connect_flags >> FLAG_WILL_QOS_SHIFT) & 0x3;
        let retain = connect_flags & FLAG_WILL_RETAIN != 0;
        Some(LastWill {
            topic,
            message,
            qos,
            retain,
        })
    } else {
        None
    };

    let username = if connect_flags & FLAG_USERNAME != 0 {
        Some(read_mqtt_string(&mut bytes)?)
    } else {
        None
    };
    let password = if connect_flags & FLAG_PASSWORD != 0 {
        Some(read_mqtt_string(&mut bytes)?)
    } else {
        None
    };

    Ok(Connect {
        keep_alive,
        client_id,
        clean_session,
        username,
        password,
        will,
    })
}

pub fn write(connect: &Connect, buffer: &mut BytesMut) -> Result<usize, Error> {
    let mut remaining = BytesMut::new();
    write_mqtt_string(&mut remaining, PROTOCOL_NAME);
    remaining.put_u8(PROTOCOL_LEVEL);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= FLAG_CLEAN_SESSION;
    }
    if let Some(will) = &connect.will {
        flags |= FLAG_WILL;
        flags |= (will.qos & 0x3) << FLAG_WILL_QOS_SHIFT;
        if will.retain {
            flags |= FLAG_WILL_RETAIN;
        }
    }
    if connect.username.is_some() {
        flags |= FLAG_USERNAME;
    }
    if connect.password.is_some() {
        flags |= FLAG_PASSWORD;
    }
    remaining.put_u8(flags);
    remaining.put_u16(connect.keep_alive);

    write_mqtt_string(&mut remaining, &connect.client_id);
    if let Some(will) = &connect.will {
        write_mqtt_string(&mut remaining, &will.topic);
        write_mqtt_bytes(&mut remaining, &will.message);
    }
    if let Some(username) = &connect.username {
        write_mqtt_string(&mut remaining, username);
    }
    if let Some(password) = &connect.password {
        write_mqtt_string(&mut remaining, password);
    }

    buffer.put_u8(0x10);
    let remaining_len_bytes = write_remaining_length(buffer, remaining.len())?;
    buffer.extend_from_slice(&remaining);
    Ok(1 + remaining_len_bytes + remaining.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_minimal_connect() {
        let connect = Connect {
            keep_alive: 60,
            client_id: "c1".to_string(),
            clean_session: true,
            username: None,
            password: None,
            will: None,
        };
        let mut buf = BytesMut::new();
        write(&connect, &mut buf).unwrap();
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        let parsed = read(fixed_header, buf.freeze()).unwrap();
        assert_eq!(parsed, connect);
    }

    #[test]
    fn round_trips_connect_with_will_and_credentials() {
        let connect = Connect {
            keep_alive: 30,
            client_id: "device-1".to_string(),
            clean_session: false,
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
            will: Some(LastWill {
                topic: "devices/device-1/status".to_string(),
                message: Bytes::from_static(b"offline"),
                qos: 1,
                retain: true,
            }),
        };
        let mut buf = BytesMut::new();
        write(&connect, &mut buf).unwrap();
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        let parsed = read(fixed_header, buf.freeze()).unwrap();
        assert_eq!(parsed, connect);
    }

    #[test]
    fn rejects_bad_protocol_level() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x10);
        write_remaining_length(&mut buf, 10).unwrap();
        write_mqtt_string(&mut buf, PROTOCOL_NAME);
        buf.put_u8(9);
        buf.put_u8(0);
        buf.put_u16(0);
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        assert_eq!(read(fixed_header, buf.freeze()), Err(Error::InvalidProtocolLevel(9)));
    }
}
