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

pub fn read(fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Subscribe, Error> {
    bytes.advance(fixed_header.fixed_header_len);
    let pkid = read_u16(&mut bytes)?;
    let mut filters = Vec::new();
    while bytes.has_remaining() {
        let topic = read_mqtt_string(&mut bytes)?;
        let qos = QoS::from_u8(read_u8(&mut bytes)?)?;
        filters.push((topic, qos));
    }
    if filters.is_empty() {
        return Err(Error::MalformedPacket);
    }
    Ok(Subscribe { pkid, filters })
}

pub fn write(subscribe: &Subscribe, buffer: &mut BytesMut) -> Result<usize, Error> {
    let mut remaining = BytesMut::new();
    remaining.put_u16(subscribe.pkid);
    for (topic, qos) in &subscribe.filters {
        write_mqtt_string(&mut remaining, topic);
        remaining.put_u8(*qos as u8);
    }

    buffer.put_u8(0x82);
    let remaining_len_bytes = write_remaining_length(buffer, remaining.len())?;
    buffer.extend_from_slice(&remaining);
    Ok(1 + remaining_len_bytes + remaining.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_filters() {
        let subscribe = Subscribe {
            pkid: 10,
            filters: vec![
                ("a/b".to_string(), QoS::AtMostOnce),
                ("a/+/c".to_string(), QoS::ExactlyOnce),
            ],
        };
        let mut buf = BytesMut::new();
        write(&subscribe, &mut buf).unwrap();
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        assert_eq!(read(fixed_header, buf.freeze()).unwrap(), subscribe);
    }
}
