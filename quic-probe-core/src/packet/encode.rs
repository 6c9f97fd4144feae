// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection_id::LenPrefixedConnectionId,
    crypto::{CryptoError, Keys},
    packet::{number, protection, Framer, PacketType},
    varint::VarInt,
};
use alloc::{vec, vec::Vec};
use core::convert::TryFrom;
use s2n_codec::{Encoder, EncoderBuffer, EncoderValue};

const LONG_FORM: u8 = 0b1100_0000;
const SHORT_FORM: u8 = 0b0100_0000;

// headroom for the first byte, version, both length-prefixed connection
// ids, token length and length field
const HEADER_HEADROOM: usize = 64;

/// Builds the wire form of a framer: header, sealed payload, header
/// protection over the packet-number bytes.
///
/// The caller assigns `framer.header.packet_number` beforehand;
/// `largest_acked` drives the packet-number truncation window.
pub fn encode_framer(
    framer: &Framer,
    keys: &Keys,
    largest_acked: Option<u64>,
) -> Result<Vec<u8>, CryptoError> {
    let packet_number = framer.header.packet_number;
    let (pn_len, truncated) = number::truncate_packet_number(packet_number, largest_acked);

    let mut payload = Vec::new();
    for frame in &framer.frames {
        payload.extend_from_slice(&frame.encode_to_vec());
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
    //# An endpoint MUST adjust the size of its packet to ensure that
    //# there are at least 4 bytes of packet number and payload combined
    //# prior to sampling.
    if pn_len + payload.len() < 4 {
        payload.resize(4 - pn_len, 0);
    }

    let tag_len = keys.packet.tag_len();
    let mut header_bytes = vec![0u8; HEADER_HEADROOM + framer.header.token.len()];
    let mut encoder = EncoderBuffer::new(&mut header_bytes);

    match framer.packet_type {
        PacketType::Short => {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
            //# 1-RTT Packet {
            //#   Header Form (1) = 0,
            //#   Fixed Bit (1) = 1,
            //#   Spin Bit (1),
            //#   Reserved Bits (2),
            //#   Key Phase (1),
            //#   Packet Number Length (2),
            //#   Destination Connection ID (0..160),
            //#   Packet Number (8..32),
            //#   Packet Payload (8..),
            //# }
            encoder.encode(&(SHORT_FORM | (pn_len as u8 - 1)));
            encoder.encode(&framer.header.destination_cid);
        }
        packet_type => {
            encoder.encode(&(LONG_FORM | (packet_type.long_type_bits() << 4) | (pn_len as u8 - 1)));
            encoder.encode(&framer.header.version);
            encoder.encode(&LenPrefixedConnectionId(framer.header.destination_cid));
            encoder.encode(&LenPrefixedConnectionId(framer.header.source_cid));

            if packet_type == PacketType::Initial {
                encoder.encode(
                    &VarInt::try_from(framer.header.token.len()).expect("token fits a varint"),
                );
                encoder.write_slice(&framer.header.token);
            }

            let length = pn_len + payload.len() + tag_len;
            encoder.encode(&VarInt::try_from(length).expect("packet length fits a varint"));
        }
    }

    let pn_offset = encoder.len();
    encoder.write_sized(pn_len, |bytes| {
        bytes.copy_from_slice(&truncated.to_be_bytes()[4 - pn_len..]);
    });

    let header_len = encoder.len();
    header_bytes.truncate(header_len);

    let ciphertext = keys
        .packet
        .seal(packet_number, &header_bytes, &payload)?;

    let mut packet = header_bytes;
    packet.extend_from_slice(&ciphertext);
    protection::apply_protection(&*keys.header, &mut packet, pn_offset, pn_len)?;

    Ok(packet)
}
