// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use bytes::Bytes;
use core::convert::TryFrom;
use s2n_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# STREAM frames implicitly create a stream and carry stream data.  The
//# Type field in the STREAM frame takes the form 0b00001XXX (or the set
//# of values from 0x08 to 0x0f).

const STREAM_TAG: u8 = 0x08;
const OFF_BIT: u8 = 0x04;
const LEN_BIT: u8 = 0x02;
const FIN_BIT: u8 = 0x01;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stream {
    pub stream_id: VarInt,
    pub offset: VarInt,
    pub is_fin: bool,
    pub data: Bytes,
}

impl Stream {
    /// The canonical encoding always carries a Length field and elides
    /// the Offset field at offset zero.
    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = STREAM_TAG | LEN_BIT;
        if self.offset.as_u64() > 0 {
            tag |= OFF_BIT;
        }
        if self.is_fin {
            tag |= FIN_BIT;
        }
        tag
    }
}

decoder_parameterized_value!(
    impl<'a> Stream {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;

            let (offset, buffer) = if tag & OFF_BIT == OFF_BIT {
                buffer.decode()?
            } else {
                (VarInt::ZERO, buffer)
            };

            let (data, buffer) = if tag & LEN_BIT == LEN_BIT {
                buffer.decode_slice_with_len_prefix::<VarInt>()?
            } else {
                let len = buffer.len();
                buffer.decode_slice(len)?
            };
            let data = Bytes::copy_from_slice(data.as_less_safe_slice());

            let frame = Stream {
                stream_id,
                offset,
                is_fin: tag & FIN_BIT == FIN_BIT,
                data,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for Stream {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);
        if self.offset.as_u64() > 0 {
            buffer.encode(&self.offset);
        }
        buffer.encode(&VarInt::try_from(self.data.len()).expect("stream data fits a varint"));
        buffer.write_slice(&self.data);
    }
}
