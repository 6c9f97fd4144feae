// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{convert::TryFrom, fmt};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// Maximum length of a connection ID carried by this client
pub const MAX_LEN: usize = 18;

#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct ConnectionId {
    bytes: [u8; MAX_LEN],
    len: u8,
}

#[derive(Debug)]
pub struct InvalidLength;

impl fmt::Display for InvalidLength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "connection id exceeds {MAX_LEN} bytes")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidLength {}

impl ConnectionId {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_LEN],
        len: 0,
    };

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl AsRef<[u8]> for ConnectionId {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl TryFrom<&[u8]> for ConnectionId {
    type Error = InvalidLength;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        if slice.len() > MAX_LEN {
            return Err(InvalidLength);
        }
        let mut bytes = [0; MAX_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            bytes,
            len: slice.len() as u8,
        })
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl EncoderValue for ConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self.as_bytes());
    }
}

/// A connection ID prefixed with its length on one byte, as carried in
/// v1 long headers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LenPrefixedConnectionId(pub ConnectionId);

decoder_value!(
    impl<'a> LenPrefixedConnectionId {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (len, buffer) = buffer.decode::<u8>()?;
            let (bytes, buffer) = buffer.decode_slice(len as usize)?;
            let id = ConnectionId::try_from(bytes.as_less_safe_slice())
                .map_err(|_| s2n_codec::DecoderError::InvariantViolation("invalid connection id length"))?;
            Ok((Self(id), buffer))
        }
    }
);

impl EncoderValue for LenPrefixedConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&(self.0.len() as u8));
        encoder.encode(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_codec::{DecoderBuffer, Encoder as _, EncoderBuffer};

    #[test]
    fn round_trip() {
        let id = ConnectionId::try_from(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]).unwrap();
        let mut bytes = [0u8; MAX_LEN + 1];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&LenPrefixedConnectionId(id));
        let len = encoder.len();
        assert_eq!(len, 9);

        let (decoded, remaining) = DecoderBuffer::new(&bytes[..len])
            .decode::<LenPrefixedConnectionId>()
            .unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded.0, id);
    }

    #[test]
    fn length_limit() {
        assert!(ConnectionId::try_from(&[0u8; MAX_LEN][..]).is_ok());
        assert!(ConnectionId::try_from(&[0u8; MAX_LEN + 1][..]).is_err());
        assert!(ConnectionId::EMPTY.is_empty());
    }
}
