//! MAVLink framing for `tokio_util::codec`.
//!
//! The decoder tolerates noisy links: bytes before a start marker are
//! discarded, and a frame that fails to parse (bad CRC, unknown message id)
//! is skipped by stepping over its start marker and rescanning. Decoding
//! never returns an error for malformed input.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use mavlink::common::MavMessage;
use mavlink::peek_reader::PeekReader;
use mavlink::{MavHeader, MavlinkVersion};
use tracing::trace;

use crate::error::LinkError;
use crate::message::MavFrame;

const STX_V1: u8 = 0xFE;
const STX_V2: u8 = 0xFD;
const V1_HEADER_LEN: usize = 6;
const V2_HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const IFLAG_SIGNED: u8 = 0x01;

/// Largest possible frame on the wire (signed v2, 255-byte payload).
pub const MAX_FRAME_LEN: usize = V2_HEADER_LEN + 255 + CHECKSUM_LEN + SIGNATURE_LEN;

/// Decoder counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    /// Frames parsed successfully.
    pub frames_decoded: u64,
    /// Complete frames that failed to parse.
    pub frames_dropped: u64,
    /// Bytes skipped while hunting for a start marker.
    pub bytes_discarded: u64,
}

/// Stateful MAVLink codec.
///
/// Outbound frames are always MAVLink v2, stamped with our system and
/// component id and a wrapping sequence number.
#[derive(Debug)]
pub struct MavlinkCodec {
    system_id: u8,
    component_id: u8,
    sequence: u8,
    stats: CodecStats,
}

impl MavlinkCodec {
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
            sequence: 0,
            stats: CodecStats::default(),
        }
    }

    pub fn stats(&self) -> CodecStats {
        self.stats
    }

    /// Drop leading bytes up to the next start marker.
    ///
    /// Returns `false` if the buffer held no marker at all (it is now empty).
    fn resync(&mut self, src: &mut BytesMut) -> bool {
        match src.iter().position(|&b| b == STX_V1 || b == STX_V2) {
            Some(0) => true,
            Some(skip) => {
                src.advance(skip);
                self.stats.bytes_discarded += skip as u64;
                true
            }
            None => {
                self.stats.bytes_discarded += src.len() as u64;
                src.clear();
                false
            }
        }
    }
}

/// Full length of the frame starting at `buf[0]`, if enough of the header
/// is present to tell.
fn frame_len(buf: &[u8]) -> Option<usize> {
    match *buf.first()? {
        STX_V1 => {
            let payload = *buf.get(1)? as usize;
            Some(V1_HEADER_LEN + payload + CHECKSUM_LEN)
        }
        STX_V2 => {
            let payload = *buf.get(1)? as usize;
            let incompat = *buf.get(2)?;
            let signature = if incompat & IFLAG_SIGNED != 0 {
                SIGNATURE_LEN
            } else {
                0
            };
            Some(V2_HEADER_LEN + payload + CHECKSUM_LEN + signature)
        }
        _ => None,
    }
}

fn parse_frame(bytes: &[u8]) -> Option<(MavHeader, MavMessage, MavlinkVersion)> {
    let mut reader = PeekReader::new(Cursor::new(bytes));
    match bytes[0] {
        STX_V1 => mavlink::read_v1_msg::<MavMessage, _>(&mut reader)
            .ok()
            .map(|(h, m)| (h, m, MavlinkVersion::V1)),
        _ => mavlink::read_v2_msg::<MavMessage, _>(&mut reader)
            .ok()
            .map(|(h, m)| (h, m, MavlinkVersion::V2)),
    }
}

impl tokio_util::codec::Decoder for MavlinkCodec {
    type Item = MavFrame;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if !self.resync(src) {
                return Ok(None);
            }
            let Some(len) = frame_len(src) else {
                return Ok(None);
            };
            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }

            match parse_frame(&src[..len]) {
                Some((header, message, version)) => {
                    src.advance(len);
                    self.stats.frames_decoded += 1;
                    return Ok(Some(MavFrame {
                        header,
                        message,
                        version,
                    }));
                }
                None => {
                    // Step past this marker; a real frame may start inside.
                    trace!(len, "dropping unparseable frame");
                    src.advance(1);
                    self.stats.frames_dropped += 1;
                }
            }
        }
    }
}

impl tokio_util::codec::Encoder<MavMessage> for MavlinkCodec {
    type Error = LinkError;

    fn encode(&mut self, item: MavMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence,
        };
        let mut buf = Vec::with_capacity(MAX_FRAME_LEN);
        mavlink::write_v2_msg(&mut buf, header, &item)
            .map_err(|e| LinkError::Encoding(format!("{e:?}")))?;
        self.sequence = self.sequence.wrapping_add(1);
        dst.extend_from_slice(&buf);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
