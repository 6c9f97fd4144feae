// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use bytes::Bytes;
use s2n_codec::{decoder_invariant, decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# An endpoint sends a NEW_CONNECTION_ID frame (type=0x18) to provide
//# its peer with alternative connection IDs that can be used to break
//# linkability when migrating connections.

const TAG: u8 = 0x18;

pub const STATELESS_RESET_TOKEN_LEN: usize = 16;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewConnectionId {
    pub sequence_number: VarInt,
    pub retire_prior_to: VarInt,
    /// Kept as raw bytes rather than a `ConnectionId` so that scenarios
    /// can observe out-of-policy lengths the peer announces.
    pub connection_id: Bytes,
    pub stateless_reset_token: [u8; STATELESS_RESET_TOKEN_LEN],
}

impl NewConnectionId {
    #[inline]
    pub const fn tag(&self) -> u8 {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> NewConnectionId {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
            let (retire_prior_to, buffer) = buffer.decode::<VarInt>()?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# Receiving a value in the Retire Prior To field that is greater
            //# than that in the Sequence Number field MUST be treated as a
            //# connection error of type FRAME_ENCODING_ERROR.
            decoder_invariant!(
                retire_prior_to <= sequence_number,
                "invalid retire prior to value"
            );

            let (connection_id_len, buffer) = buffer.decode::<u8>()?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# Values less than 1 and greater than 20 are invalid and MUST be
            //# treated as a connection error of type FRAME_ENCODING_ERROR.
            decoder_invariant!(
                (1..=20).contains(&connection_id_len),
                "invalid connection id length"
            );

            let (connection_id, buffer) = buffer.decode_slice(connection_id_len as usize)?;
            let connection_id = Bytes::copy_from_slice(connection_id.as_less_safe_slice());

            let (token, buffer) = buffer.decode_slice(STATELESS_RESET_TOKEN_LEN)?;
            let mut stateless_reset_token = [0u8; STATELESS_RESET_TOKEN_LEN];
            stateless_reset_token.copy_from_slice(token.as_less_safe_slice());

            let frame = NewConnectionId {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for NewConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.encode(&self.sequence_number);
        buffer.encode(&self.retire_prior_to);
        buffer.encode(&(self.connection_id.len() as u8));
        buffer.write_slice(&self.connection_id);
        buffer.write_slice(&self.stateless_reset_token);
    }
}
