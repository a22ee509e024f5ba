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

pub fn write(buffer: &mut BytesMut) -> Result<usize, Error> {
    buffer.extend_from_slice(&[0xC0, 0x00]);
    Ok(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_fixed_two_byte_frame() {
        let mut buf = BytesMut::new();
        write(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0xC0, 0x00]);
    }
}
