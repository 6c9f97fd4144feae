// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use bytes::Bytes;
use core::convert::TryFrom;
use s2n_codec::{decoder_parameterized_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
//# A server sends a NEW_TOKEN frame (type=0x07) to provide the client
//# with a token to send in the header of an Initial packet for a future
//# connection.

const TAG: u8 = 0x07;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewToken {
    pub token: Bytes,
}

impl NewToken {
    #[inline]
    pub const fn tag(&self) -> u8 {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> NewToken {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (token, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
            //# A client MUST treat receipt of a NEW_TOKEN frame with an empty
            //# Token field as a connection error of type FRAME_ENCODING_ERROR.
            if token.is_empty() {
                return Err(DecoderError::InvariantViolation("empty token"));
            }

            let token = Bytes::copy_from_slice(token.as_less_safe_slice());
            Ok((NewToken { token }, buffer))
        }
    }
);

impl EncoderValue for NewToken {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.encode(&VarInt::try_from(self.token.len()).expect("token fits a varint"));
        buffer.write_slice(&self.token);
    }
}
