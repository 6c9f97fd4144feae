// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use bytes::Bytes;
use core::convert::TryFrom;
use s2n_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.

const TAG: u8 = 0x06;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Crypto {
    /// Byte offset in the crypto stream of the containing packet-number
    /// space
    pub offset: VarInt,
    pub data: Bytes,
}

impl Crypto {
    #[inline]
    pub const fn tag(&self) -> u8 {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> Crypto {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (offset, buffer) = buffer.decode()?;
            let (data, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let data = Bytes::copy_from_slice(data.as_less_safe_slice());
            Ok((Crypto { offset, data }, buffer))
        }
    }
);

impl EncoderValue for Crypto {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.encode(&self.offset);
        buffer.encode(&VarInt::try_from(self.data.len()).expect("crypto data fits a varint"));
        buffer.write_slice(&self.data);
    }
}
