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

//! Export formats for a capture or recording session (§4.6/§6): JSON is
//! always available; PCAP is optional and wraps each payload as a raw
//! user-linktype frame (these aren't real Ethernet frames, so `DataLink::
//! USER0` is the honest choice rather than fabricating an L2 header).

use std::borrow::Cow;
use std::io::Write;
use std::time::Duration;

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;
use serde::Serialize;
use sim_core::packet::PacketEvent;

use crate::{CaptureError, CaptureResult};

#[derive(Serialize)]
struct ExportedPacket<'a> {
    seq: u64,
    timestamp_micros: u64,
    direction: &'a sim_core::packet::Direction,
    src_addr: &'a str,
    src_port: u16,
    dst_addr: &'a str,
    dst_port: u16,
    protocol: String,
    payload_hex: String,
    info: &'a str,
}

impl<'a> From<&'a PacketEvent> for ExportedPacket<'a> {
    fn from(event: &'a PacketEvent) -> Self {
        ExportedPacket {
            seq: event.seq,
            timestamp_micros: event.timestamp.as_micros(),
            direction: &event.direction,
            src_addr: &event.src_addr,
            src_port: event.src_port,
            dst_addr: &event.dst_addr,
            dst_port: event.dst_port,
            protocol: event.protocol.to_string(),
            payload_hex: event.payload_hex(),
            info: &event.info,
        }
    }
}

/// Export `events` (§6: "JSON with the session's full packet list
/// including hex payloads") as a pretty-printed JSON array.
pub fn to_json(events: &[PacketEvent]) -> CaptureResult<String> {
    let exported: Vec<ExportedPacket> = events.iter().map(ExportedPacket::from).collect();
    Ok(serde_json::to_string_pretty(&exported)?)
}

/// Export `events` as a PCAP file written to `writer`. Every captured unit
/// becomes one packet record carrying the raw protocol payload (no
/// synthetic Ethernet/IP/UDP headers), timestamped from the event's own
/// microsecond clock.
pub fn to_pcap<W: Write>(events: &[PacketEvent], writer: W) -> CaptureResult<()> {
    let header = PcapHeader {
        datalink: DataLink::USER0,
        ..Default::default()
    };
    let mut pcap_writer =
        PcapWriter::with_header(writer, header).map_err(|e| CaptureError::Export(e.to_string()))?;

    for event in events {
        let ts = Duration::from_micros(event.timestamp.as_micros());
        let packet = PcapPacket::new(ts, event.payload.len() as u32, Cow::Borrowed(event.payload.as_slice()));
        pcap_writer
            .write_packet(&packet)
            .map_err(|e| CaptureError::Export(e.to_string()))?;
    }
    Ok(())
}
