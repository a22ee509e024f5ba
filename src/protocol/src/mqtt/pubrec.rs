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

pub fn read(fixed_header: FixedHeader, mut bytes: Bytes) -> Result<PubRec, Error> {
    bytes.advance(fixed_header.fixed_header_len);
    Ok(PubRec {
        pkid: read_u16(&mut bytes)?,
    })
}

pub fn write(pubrec: &PubRec, buffer: &mut BytesMut) -> Result<usize, Error> {
    buffer.put_u8(0x50);
    let remaining_len_bytes = write_remaining_length(buffer, 2)?;
    buffer.put_u16(pubrec.pkid);
    Ok(1 + remaining_len_bytes + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pkid() {
        let pubrec = PubRec { pkid: 11 };
        let mut buf = BytesMut::new();
        write(&pubrec, &mut buf).unwrap();
        let fixed_header = parse_fixed_header(buf.iter().copied()).unwrap();
        assert_eq!(read(fixed_header, buf.freeze()).unwrap(), pubrec);
    }
}
