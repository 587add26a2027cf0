// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! RTP validation of incoming chunks (RFC 3550) on top of webrtc-rs.

use bytes::Bytes;
use webrtc::{
    rtp::{header::Header, packet::Packet},
    util::{Marshal, Unmarshal},
};

use crate::IngestError;

/// Only RTP version 2 exists.
pub const RTP_VERSION: u8 = 2;

/// Header fields of a validated RTP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// length of the payload without padding
    pub payload_len: usize,
}

impl RtpHeader {
    /// Parse and validate an RTP packet.
    ///
    /// # Errors
    ///
    /// Fails if the chunk is empty, cannot be parsed as RTP, is not version 2
    /// or carries no payload.
    pub fn parse(chunk: &[u8]) -> Result<Self, IngestError> {
        if chunk.is_empty() {
            return Err(IngestError::Empty);
        }
        let mut buf = chunk;
        let packet = Packet::unmarshal(&mut buf)
            .map_err(|error| IngestError::Malformed(error.to_string()))?;
        let header = &packet.header;
        if header.version != RTP_VERSION {
            return Err(IngestError::Version(header.version));
        }
        if packet.payload.is_empty() {
            return Err(IngestError::EmptyPayload);
        }
        Ok(Self {
            marker: header.marker,
            payload_type: header.payload_type,
            sequence_number: header.sequence_number,
            timestamp: header.timestamp,
            ssrc: header.ssrc,
            payload_len: packet.payload.len(),
        })
    }
}

/// Build a plain RTP packet without CSRCs, extension or padding.
///
/// # Errors
///
/// Fails if the packet cannot be serialized.
pub fn packet(
    payload_type: u8,
    sequence_number: u16,
    timestamp: u32,
    ssrc: u32,
    marker: bool,
    payload: &[u8],
) -> Result<Bytes, IngestError> {
    Packet {
        header: Header {
            version: RTP_VERSION,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            ..Header::default()
        },
        payload: Bytes::copy_from_slice(payload),
    }
    .marshal()
    .map_err(|error| IngestError::Malformed(error.to_string()))
}
