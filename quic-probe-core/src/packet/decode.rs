// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection_id::{ConnectionId, LenPrefixedConnectionId},
    frame::Frame,
    packet::{PacketType, Retry, VersionNegotiation},
    varint::VarInt,
    version,
};
use alloc::vec::Vec;
use bytes::Bytes;
use core::convert::TryFrom;
use s2n_codec::{DecoderBuffer, DecoderError};

const LONG_HEADER_TAG: u8 = 0x80;
const RETRY_INTEGRITY_TAG_LEN: usize = 16;

/// Header fields readable before header protection is removed.
///
/// `pn_offset` is the byte offset of the protected packet-number field
/// from the start of the packet; `payload_len` is the value of the
/// long-header Length field (packet number plus payload), or the rest
/// of the datagram for short headers.
#[derive(Clone, Debug)]
pub struct ProtectedHeader {
    pub packet_type: PacketType,
    pub version: u32,
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    pub token: Bytes,
    pub payload_len: usize,
    pub pn_offset: usize,
}

impl ProtectedHeader {
    /// Total bytes this packet occupies inside the datagram.
    #[inline]
    pub fn packet_len(&self) -> usize {
        self.pn_offset + self.payload_len
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        !matches!(self.packet_type, PacketType::Short)
    }
}

/// Parses the unprotected fields of the packet starting at `bytes[0]`.
///
/// `short_dcid_len` is the length of the connection ID this client put
/// on the wire as its source connection ID; short headers carry it
/// without a length prefix.
pub fn parse_protected_header(
    bytes: &[u8],
    short_dcid_len: usize,
) -> Result<ProtectedHeader, DecoderError> {
    let buffer = DecoderBuffer::new(bytes);
    let (first, remaining) = buffer.decode::<u8>()?;

    if first & LONG_HEADER_TAG == 0 {
        // short header: type byte + destination connection id
        let (dcid, remaining) = remaining.decode_slice(short_dcid_len)?;
        let destination_cid = ConnectionId::try_from(dcid.as_less_safe_slice())
            .map_err(|_| DecoderError::InvariantViolation("invalid connection id length"))?;
        return Ok(ProtectedHeader {
            packet_type: PacketType::Short,
            version: version::QUIC_V1,
            destination_cid,
            source_cid: ConnectionId::EMPTY,
            token: Bytes::new(),
            payload_len: remaining.len(),
            pn_offset: 1 + short_dcid_len,
        });
    }

    let (version, remaining) = remaining.decode::<u32>()?;
    let (destination_cid, remaining) = remaining.decode::<LenPrefixedConnectionId>()?;
    let (source_cid, remaining) = remaining.decode::<LenPrefixedConnectionId>()?;

    if version == version::VERSION_NEGOTIATION {
        return Ok(ProtectedHeader {
            packet_type: PacketType::VersionNegotiation,
            version,
            destination_cid: destination_cid.0,
            source_cid: source_cid.0,
            token: Bytes::new(),
            payload_len: remaining.len(),
            pn_offset: 0,
        });
    }

    let packet_type = PacketType::from_long_type_bits((first >> 4) & 0b11);

    if packet_type == PacketType::Retry {
        return Ok(ProtectedHeader {
            packet_type,
            version,
            destination_cid: destination_cid.0,
            source_cid: source_cid.0,
            token: Bytes::new(),
            payload_len: remaining.len(),
            pn_offset: 0,
        });
    }

    let (token, remaining) = if packet_type == PacketType::Initial {
        let (token, remaining) = remaining.decode_slice_with_len_prefix::<VarInt>()?;
        (
            Bytes::copy_from_slice(token.as_less_safe_slice()),
            remaining,
        )
    } else {
        (Bytes::new(), remaining)
    };

    let (payload_len, remaining) = remaining.decode::<VarInt>()?;
    let payload_len = usize::try_from(payload_len)
        .map_err(|_| DecoderError::LengthCapacityExceeded)?;
    let pn_offset = bytes.len() - remaining.len();

    Ok(ProtectedHeader {
        packet_type,
        version,
        destination_cid: destination_cid.0,
        source_cid: source_cid.0,
        token,
        payload_len,
        pn_offset,
    })
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
//# Version Negotiation Packet {
//#   Header Form (1) = 1,
//#   Unused (7),
//#   Version (32) = 0,
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..2040),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..2040),
//#   Supported Version (32) ...,
//# }
pub fn parse_version_negotiation(bytes: &[u8]) -> Result<VersionNegotiation, DecoderError> {
    let buffer = DecoderBuffer::new(bytes);
    let (first, buffer) = buffer.decode::<u8>()?;
    let (_version, buffer) = buffer.decode::<u32>()?;
    let (destination_cid, buffer) = buffer.decode::<LenPrefixedConnectionId>()?;
    let (source_cid, buffer) = buffer.decode::<LenPrefixedConnectionId>()?;

    let mut supported_versions = Vec::new();
    let mut buffer = buffer;
    while !buffer.is_empty() {
        let (version, remaining) = buffer.decode::<u32>()?;
        supported_versions.push(version);
        buffer = remaining;
    }

    Ok(VersionNegotiation {
        unused_field: first & 0x7f,
        destination_cid: destination_cid.0,
        source_cid: source_cid.0,
        supported_versions,
    })
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5
//# Retry Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2) = 3,
//#   Unused (4),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Retry Token (..),
//#   Retry Integrity Tag (128),
//# }
pub fn parse_retry(bytes: &[u8]) -> Result<Retry, DecoderError> {
    let buffer = DecoderBuffer::new(bytes);
    let (_first, buffer) = buffer.decode::<u8>()?;
    let (_version, buffer) = buffer.decode::<u32>()?;
    let (destination_cid, buffer) = buffer.decode::<LenPrefixedConnectionId>()?;
    let (source_cid, buffer) = buffer.decode::<LenPrefixedConnectionId>()?;

    let token_len = buffer
        .len()
        .checked_sub(RETRY_INTEGRITY_TAG_LEN)
        .ok_or(DecoderError::InvariantViolation("retry packet too short"))?;
    let (token, buffer) = buffer.decode_slice(token_len)?;
    let (tag, buffer) = buffer.decode_slice(RETRY_INTEGRITY_TAG_LEN)?;
    buffer.ensure_empty()?;

    let mut integrity_tag = [0u8; RETRY_INTEGRITY_TAG_LEN];
    integrity_tag.copy_from_slice(tag.as_less_safe_slice());

    Ok(Retry {
        destination_cid: destination_cid.0,
        source_cid: source_cid.0,
        retry_token: Bytes::copy_from_slice(token.as_less_safe_slice()),
        integrity_tag,
    })
}

/// Parses frames from a decrypted payload until it is exhausted.
pub fn parse_frames(plaintext: &[u8]) -> Result<Vec<Frame>, DecoderError> {
    let mut frames = Vec::new();
    let mut buffer = DecoderBuffer::new(plaintext);
    while !buffer.is_empty() {
        let (frame, remaining) = buffer.decode::<Frame>()?;
        frames.push(frame);
        buffer = remaining;
    }
    Ok(frames)
}
