// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod decode;
pub mod encode;
pub mod number;
pub mod protection;

use crate::{
    connection_id::ConnectionId,
    crypto::EncryptionLevel,
    frame::{ConnectionClose, Frame},
    packet::number::PnSpace,
};
use alloc::{string::String, vec::Vec};
use bytes::Bytes;
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# Long Header Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2),
//#   Type-Specific Bits (4),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Type-Specific Payload (..),
//# }

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    Short,
    VersionNegotiation,
}

impl PacketType {
    #[inline]
    pub fn encryption_level(self) -> EncryptionLevel {
        match self {
            Self::Initial => EncryptionLevel::Initial,
            Self::ZeroRtt => EncryptionLevel::ZeroRtt,
            Self::Handshake => EncryptionLevel::Handshake,
            Self::Short => EncryptionLevel::OneRtt,
            Self::Retry | Self::VersionNegotiation => EncryptionLevel::None,
        }
    }

    #[inline]
    pub fn pn_space(self) -> Option<PnSpace> {
        self.encryption_level().pn_space()
    }

    #[inline]
    pub(crate) fn long_type_bits(self) -> u8 {
        match self {
            Self::Initial => 0b00,
            Self::ZeroRtt => 0b01,
            Self::Handshake => 0b10,
            Self::Retry => 0b11,
            _ => unreachable!("only long header types carry type bits"),
        }
    }

    #[inline]
    pub(crate) fn from_long_type_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Initial,
            0b01 => Self::ZeroRtt,
            0b10 => Self::Handshake,
            _ => Self::Retry,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Initial => "Initial",
            Self::ZeroRtt => "0-RTT",
            Self::Handshake => "Handshake",
            Self::Retry => "Retry",
            Self::Short => "1-RTT",
            Self::VersionNegotiation => "VersionNegotiation",
        };
        write!(f, "{name}")
    }
}

/// Header fields of a packet that carries frames. Connection IDs,
/// version and packet number are filled in by the connection encoder on
/// the send path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Header {
    pub version: u32,
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    /// Initial packets only
    pub token: Bytes,
    pub packet_number: u64,
}

/// A packet whose payload is an ordered sequence of frames.
#[derive(Clone, Debug, PartialEq)]
pub struct Framer {
    pub packet_type: PacketType,
    pub header: Header,
    pub frames: Vec<Frame>,
}

impl Framer {
    pub fn new(packet_type: PacketType) -> Self {
        debug_assert!(matches!(
            packet_type,
            PacketType::Initial | PacketType::ZeroRtt | PacketType::Handshake | PacketType::Short
        ));
        Self {
            packet_type,
            header: Header::default(),
            frames: Vec::new(),
        }
    }

    pub fn with_frames(packet_type: PacketType, frames: Vec<Frame>) -> Self {
        let mut framer = Self::new(packet_type);
        framer.frames = frames;
        framer
    }

    #[inline]
    pub fn encryption_level(&self) -> EncryptionLevel {
        self.packet_type.encryption_level()
    }

    #[inline]
    pub fn pn_space(&self) -> PnSpace {
        self.packet_type
            .pn_space()
            .expect("framers always belong to a packet number space")
    }

    /// Whether receipt of this packet obligates us to send an ACK
    pub fn should_be_acknowledged(&self) -> bool {
        self.frames.iter().any(Frame::is_ack_eliciting)
    }

    pub fn contains(&self, predicate: impl Fn(&Frame) -> bool) -> bool {
        self.frames.iter().any(predicate)
    }

    pub fn crypto_frames(&self) -> impl Iterator<Item = &crate::frame::Crypto> {
        self.frames.iter().filter_map(|frame| match frame {
            Frame::Crypto(crypto) => Some(crypto),
            _ => None,
        })
    }

    pub fn ack_frames(&self) -> impl Iterator<Item = &crate::frame::Ack> {
        self.frames.iter().filter_map(|frame| match frame {
            Frame::Ack(ack) => Some(ack),
            _ => None,
        })
    }

    pub fn stream_frames(&self) -> impl Iterator<Item = &crate::frame::Stream> {
        self.frames.iter().filter_map(|frame| match frame {
            Frame::Stream(stream) => Some(stream),
            _ => None,
        })
    }

    pub fn new_connection_id_frames(&self) -> impl Iterator<Item = &crate::frame::NewConnectionId> {
        self.frames.iter().filter_map(|frame| match frame {
            Frame::NewConnectionId(frame) => Some(frame),
            _ => None,
        })
    }

    pub fn connection_close(&self) -> Option<&ConnectionClose> {
        self.frames.iter().find_map(|frame| match frame {
            Frame::ConnectionClose(close) => Some(close),
            _ => None,
        })
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
//# A Version Negotiation packet is inherently not version specific.
//# Upon receipt by a client, it will be identified as a Version
//# Negotiation packet based on the Version field having a value of 0.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionNegotiation {
    /// The 7 low bits of the first byte; servers are expected to
    /// randomize them
    pub unused_field: u8,
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    pub supported_versions: Vec<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Retry {
    pub destination_cid: ConnectionId,
    /// Becomes the client's new destination connection ID
    pub source_cid: ConnectionId,
    pub retry_token: Bytes,
    /// Trailing 128-bit integrity tag, kept for the trace
    pub integrity_tag: [u8; 16],
}

/// A parsed or to-be-sent QUIC packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    VersionNegotiation(VersionNegotiation),
    Retry(Retry),
    Framer(Framer),
}

impl Packet {
    pub fn framer(packet_type: PacketType) -> Framer {
        Framer::new(packet_type)
    }

    #[inline]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::VersionNegotiation(_) => PacketType::VersionNegotiation,
            Self::Retry(_) => PacketType::Retry,
            Self::Framer(framer) => framer.packet_type,
        }
    }

    #[inline]
    pub fn encryption_level(&self) -> EncryptionLevel {
        self.packet_type().encryption_level()
    }

    #[inline]
    pub fn pn_space(&self) -> Option<PnSpace> {
        self.packet_type().pn_space()
    }

    #[inline]
    pub fn packet_number(&self) -> Option<u64> {
        match self {
            Self::Framer(framer) => Some(framer.header.packet_number),
            _ => None,
        }
    }

    #[inline]
    pub fn as_framer(&self) -> Option<&Framer> {
        match self {
            Self::Framer(framer) => Some(framer),
            _ => None,
        }
    }

    pub fn short_string(&self) -> String {
        match self.packet_number() {
            Some(pn) => alloc::format!("{{type={}, number={pn}}}", self.packet_type()),
            None => alloc::format!("{{type={}}}", self.packet_type()),
        }
    }
}

impl From<Framer> for Packet {
    #[inline]
    fn from(framer: Framer) -> Self {
        Self::Framer(framer)
    }
}
