// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::crypto::{CryptoError, HeaderKey, HEADER_PROTECTION_SAMPLE_LEN};

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
//# in sampling packet ciphertext for header protection, the Packet Number
//# field is assumed to be 4 bytes long (its maximum possible encoded
//# length).
const SAMPLE_OFFSET_FROM_PN: usize = 4;

const LONG_HEADER_TAG: u8 = 0x80;
const LONG_HEADER_MASK: u8 = 0x0f;
const SHORT_HEADER_MASK: u8 = 0x1f;

#[inline]
fn first_byte_mask(first: u8) -> u8 {
    if first & LONG_HEADER_TAG == LONG_HEADER_TAG {
        LONG_HEADER_MASK
    } else {
        SHORT_HEADER_MASK
    }
}

fn sample(packet: &[u8], pn_offset: usize) -> Result<[u8; HEADER_PROTECTION_SAMPLE_LEN], CryptoError> {
    let start = pn_offset + SAMPLE_OFFSET_FROM_PN;
    let end = start + HEADER_PROTECTION_SAMPLE_LEN;
    let slice = packet
        .get(start..end)
        .ok_or(CryptoError::new("packet too short to sample"))?;
    let mut sample = [0u8; HEADER_PROTECTION_SAMPLE_LEN];
    sample.copy_from_slice(slice);
    Ok(sample)
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# mask = header_protection(hp_key, sample)
//#
//# pn_length = (packet[0] & 0x03) + 1
//# if (packet[0] & 0x80) == 0x80:
//#    # Long header: 4 bits masked
//#    packet[0] ^= mask[0] & 0x0f
//# else:
//#    # Short header: 5 bits masked
//#    packet[0] ^= mask[0] & 0x1f
//#
//# # pn_offset is the start of the Packet Number field.
//# packet[pn_offset:pn_offset+pn_length] ^= mask[1:1+pn_length]

/// Removes header protection in place; returns the revealed packet
/// number length and the truncated packet number.
pub fn remove_protection(
    header_key: &dyn HeaderKey,
    packet: &mut [u8],
    pn_offset: usize,
) -> Result<(usize, u32), CryptoError> {
    let mask = header_key.new_mask(&sample(packet, pn_offset)?)?;

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    let pn_len = (packet[0] & 0x03) as usize + 1;

    let mut truncated: u32 = 0;
    for i in 0..pn_len {
        packet[pn_offset + i] ^= mask[1 + i];
        truncated = (truncated << 8) | packet[pn_offset + i] as u32;
    }

    Ok((pn_len, truncated))
}

/// Applies header protection in place over an already-sealed packet.
pub fn apply_protection(
    header_key: &dyn HeaderKey,
    packet: &mut [u8],
    pn_offset: usize,
    pn_len: usize,
) -> Result<(), CryptoError> {
    debug_assert!((1..=4).contains(&pn_len));
    let mask = header_key.new_mask(&sample(packet, pn_offset)?)?;

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    for i in 0..pn_len {
        packet[pn_offset + i] ^= mask[1 + i];
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::initial;

    #[test]
    fn apply_remove_round_trip() {
        let (write, _) = initial::client_initial_keys(&[0x11; 8]).unwrap();

        // header: 5 bytes, pn_offset 3, pn_len 2, then 18 bytes of "ciphertext"
        let mut packet = [0u8; 23];
        packet[0] = 0xc1; // long header, pn_len bits = 0b01
        packet[3] = 0xab;
        packet[4] = 0xcd;
        for (i, byte) in packet[5..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        let original = packet;

        apply_protection(&*write.header, &mut packet, 3, 2).unwrap();
        assert_ne!(packet[..5], original[..5], "header bits are masked");
        assert_eq!(packet[5..], original[5..], "payload is untouched");

        let (pn_len, truncated) = remove_protection(&*write.header, &mut packet, 3).unwrap();
        assert_eq!(pn_len, 2);
        assert_eq!(truncated, 0xabcd);
        assert_eq!(packet, original);
    }

    #[test]
    fn short_sample_is_rejected() {
        let (write, _) = initial::client_initial_keys(&[0x22; 8]).unwrap();
        let mut packet = [0u8; 10];
        packet[0] = 0x41;
        assert!(remove_protection(&*write.header, &mut packet, 1).is_err());
    }
}
