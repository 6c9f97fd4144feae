// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{convert::TryFrom, fmt, ops::Deref};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# The QUIC variable-length integer encoding reserves the two most
//# significant bits of the first byte to encode the base 2 logarithm of
//# the integer encoding length in bytes.  The integer value is encoded
//# on the remaining bits, in network byte order.

pub const MAX_VARINT_VALUE: u64 = (1 << 62) - 1;

#[derive(Debug)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "varint range exceeded")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VarIntError {}

/// An integer in the range `0..=2^62-1`, encoded on 1, 2, 4 or 8 bytes.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(value: u64) -> Result<Self, VarIntError> {
        if value > MAX_VARINT_VALUE {
            return Err(VarIntError);
        }
        Ok(Self(value))
    }

    /// Clamps `value` into the representable range.
    #[inline]
    pub const fn saturating(value: u64) -> Self {
        if value > MAX_VARINT_VALUE {
            Self::MAX
        } else {
            Self(value)
        }
    }

    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn from_u16(value: u16) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Self::new(self.0.checked_add(rhs.0)?).ok()
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(rhs.0)?))
    }

    /// Returns the number of bytes the minimum-length encoding occupies.
    #[inline]
    pub const fn encoding_size(self) -> usize {
        match self.0 {
            0..=63 => 1,
            64..=16_383 => 2,
            16_384..=1_073_741_823 => 4,
            _ => 8,
        }
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for VarInt {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl From<u8> for VarInt {
    #[inline]
    fn from(value: u8) -> Self {
        Self(value as u64)
    }
}

impl From<u16> for VarInt {
    #[inline]
    fn from(value: u16) -> Self {
        Self(value as u64)
    }
}

impl From<u32> for VarInt {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl From<VarInt> for u64 {
    #[inline]
    fn from(value: VarInt) -> Self {
        value.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl TryFrom<VarInt> for usize {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        usize::try_from(value.0).map_err(|_| VarIntError)
    }
}

impl PartialEq<u64> for VarInt {
    #[inline]
    fn eq(&self, other: &u64) -> bool {
        self.0.eq(other)
    }
}

impl PartialOrd<u64> for VarInt {
    #[inline]
    fn partial_cmp(&self, other: &u64) -> Option<core::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

decoder_value!(
    impl<'a> VarInt {
        fn decode(buffer: Buffer) -> Result<Self> {
            let header = buffer.peek_byte(0)?;
            let len = 1usize << (header >> 6);
            let (slice, buffer) = buffer.decode_slice(len)?;
            let slice = slice.as_less_safe_slice();
            let mut value = (slice[0] & 0b0011_1111) as u64;
            for byte in &slice[1..] {
                value = (value << 8) | *byte as u64;
            }
            Ok((VarInt(value), buffer))
        }
    }
);

impl EncoderValue for VarInt {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let value = self.0;
        match self.encoding_size() {
            1 => encoder.write_sized(1, |buf| buf[0] = value as u8),
            2 => encoder.write_sized(2, |buf| {
                buf.copy_from_slice(&(value as u16 | 0x4000).to_be_bytes())
            }),
            4 => encoder.write_sized(4, |buf| {
                buf.copy_from_slice(&(value as u32 | 0x8000_0000).to_be_bytes())
            }),
            _ => encoder.write_sized(8, |buf| {
                buf.copy_from_slice(&(value | 0xc000_0000_0000_0000).to_be_bytes())
            }),
        }
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        VarInt::encoding_size(*self)
    }

    #[inline]
    fn encoding_size_for_encoder<E: Encoder>(&self, _encoder: &E) -> usize {
        VarInt::encoding_size(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;
    use s2n_codec::{DecoderBuffer, Encoder as _, EncoderBuffer};

    fn round_trip(value: VarInt) -> (usize, VarInt) {
        let mut bytes = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&value);
        let len = encoder.len();
        let (decoded, remaining) = DecoderBuffer::new(&bytes[..len])
            .decode::<VarInt>()
            .unwrap();
        assert!(remaining.is_empty());
        (len, decoded)
    }

    #[test]
    fn round_trip_boundaries() {
        for &(value, expected_len) in &[
            (0u64, 1usize),
            (63, 1),
            (64, 2),
            (16_383, 2),
            (16_384, 4),
            (1_073_741_823, 4),
            (1_073_741_824, 8),
            (MAX_VARINT_VALUE, 8),
        ] {
            let value = VarInt::new(value).unwrap();
            let (len, decoded) = round_trip(value);
            assert_eq!(len, expected_len, "minimum-length form for {value}");
            assert_eq!(decoded, value);
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.1
    //= type=test
    //# For example, the eight-byte sequence 0xc2197c5eff14e88c decodes to the
    //# decimal value 151,288,809,941,952,652
    #[test]
    fn rfc_examples() {
        for &(bytes, value) in &[
            (&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c][..], 151_288_809_941_952_652u64),
            (&[0x9d, 0x7f, 0x3e, 0x7d][..], 494_878_333),
            (&[0x7b, 0xbd][..], 15_293),
            (&[0x25][..], 37),
        ] {
            let (decoded, _) = DecoderBuffer::new(bytes).decode::<VarInt>().unwrap();
            assert_eq!(decoded.as_u64(), value);
        }
    }

    #[test]
    fn range_check() {
        assert!(VarInt::new(MAX_VARINT_VALUE).is_ok());
        assert!(VarInt::new(MAX_VARINT_VALUE + 1).is_err());
        assert_eq!(VarInt::saturating(u64::MAX), VarInt::MAX);
    }

    #[test]
    fn round_trip_check() {
        check!().with_type::<u64>().cloned().for_each(|value| {
            if let Ok(value) = VarInt::new(value) {
                let (_, decoded) = round_trip(value);
                assert_eq!(decoded, value);
            }
        });
    }
}
