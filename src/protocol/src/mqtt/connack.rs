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

pub fn read(fixed_header: FixedHeader, mut bytes: Bytes) -> Result<ConnAck, Error> {
    bytes.advance(fixed_header.fixed_header_len);
    let flags = read_u8(&mut bytes)?;
    let code = ConnectReturnCode::from_u8(read_u8(&mut bytes)?)?;
    Ok(ConnAck {
        session_present: flags & 0x1 != 0,
        code,
    })
}

pub fn write(connack: &ConnAck, buffer: &mut BytesMut) -> Result<usize, Error> {
    buffer.put_u8(0x20);
    let remaining_len_bytes = write_remaining_length(buffer, 2)?;
    buffer.put_u8(connack.session_present as u8);
    buffer.put_u8(connack.code as u8);
    Ok(1 + remaining_len_bytes + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_scenario_connack_accepted_no_session_present() {
        // client sends CONNECT with client_id="c1" clean_session=1 ->
        // broker returns `20 02 00 00` (CONNACK, session-present=0, accepted)
        let connack = ConnAck {
            session_present: false,
            code: ConnectReturnCode::Accepted,
        };
        let mut buf = BytesMut::new();
        write(&connack, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x20, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn round_trips_session_present() {
        let connack = ConnAck {
            session_present: true,
            code: ConnectReturnCode::Accepted,
        };
        let mut buf = BytesMut::new();
        write(&connack, &mut buf).unwrap();
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        let parsed = read(fixed_header, buf.freeze()).unwrap();
        assert_eq!(parsed, connack);
    }
}
