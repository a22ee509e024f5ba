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

pub fn read(fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Publish, Error> {
    let dup = (fixed_header.byte1 & 0b1000) != 0;
    let qos = QoS::from_u8((fixed_header.byte1 & 0b0110) >> 1)?;
    let retain = (fixed_header.byte1 & 0b0001) != 0;

    bytes.advance(fixed_header.fixed_header_len);
    let topic = read_mqtt_string(&mut bytes)?;
    let pkid = if matches!(qos, QoS::AtMostOnce) {
        0
    } else {
        read_u16(&mut bytes)?
    };
    let payload = bytes.copy_to_bytes(bytes.remaining());

    Ok(Publish {
        dup,
        qos,
        retain,
        topic,
        pkid,
        payload,
    })
}

pub fn write(publish: &Publish, buffer: &mut BytesMut) -> Result<usize, Error> {
    let mut remaining = BytesMut::new();
    write_mqtt_string(&mut remaining, &publish.topic);
    if !matches!(publish.qos, QoS::AtMostOnce) {
        remaining.put_u16(publish.pkid);
    }
    remaining.extend_from_slice(&publish.payload);

    let mut byte1 = 0b0011_0000u8;
    if publish.dup {
        byte1 |= 0b1000;
    }
    byte1 |= (publish.qos as u8) << 1;
    if publish.retain {
        byte1 |= 0b0001;
    }
    buffer.put_u8(byte1);
    let remaining_len_bytes = write_remaining_length(buffer, remaining.len())?;
    buffer.extend_from_slice(&remaining);
    Ok(1 + remaining_len_bytes + remaining.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_qos0_without_packet_id() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "sensors/temp".to_string(),
            pkid: 0,
            payload: Bytes::from_static(b"21.5"),
        };
        let mut buf = BytesMut::new();
        write(&publish, &mut buf).unwrap();
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        let parsed = read(fixed_header, buf.freeze()).unwrap();
        assert_eq!(parsed, publish);
    }

    #[test]
    fn round_trips_qos1_with_packet_id() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: "sensors/temp".to_string(),
            pkid: 42,
            payload: Bytes::from_static(b"21.5"),
        };
        let mut buf = BytesMut::new();
        write(&publish, &mut buf).unwrap();
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        let parsed = read(fixed_header, buf.freeze()).unwrap();
        assert_eq!(parsed, publish);
        assert_eq!(parsed.pkid, 42);
    }
}
