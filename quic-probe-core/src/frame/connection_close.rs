// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, transport, varint::VarInt};
use bytes::Bytes;
use core::convert::TryFrom;
use s2n_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.  The
//# CONNECTION_CLOSE frame with a type of 0x1c is used to signal errors
//# at only the QUIC layer, or the absence of errors (with the NO_ERROR
//# code).  The CONNECTION_CLOSE frame with a type of 0x1d is used to
//# signal an error with the application that uses QUIC.

const QUIC_ERROR_TAG: u8 = 0x1c;
const APPLICATION_ERROR_TAG: u8 = 0x1d;

/// Both CONNECTION_CLOSE forms, discriminated by the presence of the
/// offending frame type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionClose {
    pub error_code: VarInt,

    /// Present on the transport-layer form (0x1c), absent on the
    /// application form (0x1d)
    pub frame_type: Option<VarInt>,

    pub reason: Bytes,
}

impl ConnectionClose {
    /// A transport-layer close carrying a QUIC error code
    pub fn quic_layer(error: transport::Error, reason: &str) -> Self {
        Self {
            error_code: error.0,
            frame_type: Some(VarInt::ZERO),
            reason: Bytes::copy_from_slice(reason.as_bytes()),
        }
    }

    /// An application-layer close
    pub fn application(error_code: VarInt, reason: &str) -> Self {
        Self {
            error_code,
            frame_type: None,
            reason: Bytes::copy_from_slice(reason.as_bytes()),
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            QUIC_ERROR_TAG
        } else {
            APPLICATION_ERROR_TAG
        }
    }
}

decoder_parameterized_value!(
    impl<'a> ConnectionClose {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (error_code, buffer) = buffer.decode()?;

            let (frame_type, buffer) = if tag == QUIC_ERROR_TAG {
                let (frame_type, buffer) = buffer.decode()?;
                (Some(frame_type), buffer)
            } else {
                (None, buffer)
            };

            let (reason, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let reason = Bytes::copy_from_slice(reason.as_less_safe_slice());

            let frame = ConnectionClose {
                error_code,
                frame_type,
                reason,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for ConnectionClose {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.error_code);
        if let Some(frame_type) = &self.frame_type {
            buffer.encode(frame_type);
        }
        buffer.encode(&VarInt::try_from(self.reason.len()).expect("reason fits a varint"));
        buffer.write_slice(&self.reason);
    }
}
