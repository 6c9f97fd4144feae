// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
//# Packets contain one or more frames.  This section describes the
//# format and semantics of the core QUIC frame types.

use s2n_codec::{decoder_value, DecoderError, Encoder, EncoderValue};

pub(crate) type Tag = u8;

// This implements a codec for a frame that contains simple values
// that don't vary based on the tag
macro_rules! simple_frame_codec {
    ($name:ident { $($field:ident),* }, $tag:expr) => {
        s2n_codec::decoder_parameterized_value!(
            impl<'a> $name {
                fn decode(_tag: crate::frame::Tag, buffer: Buffer) -> Result<Self> {
                    $(
                        let ($field, buffer) = buffer.decode()?;
                    )*
                    let frame = $name { $($field),* };
                    Ok((frame, buffer))
                }
            }
        );

        impl s2n_codec::EncoderValue for $name {
            #[inline]
            fn encode<E: s2n_codec::Encoder>(&self, buffer: &mut E) {
                buffer.encode(&$tag);
                $(
                    buffer.encode(&self.$field);
                )*
            }
        }
    };
}

pub mod ack;
pub mod connection_close;
pub mod crypto;
pub mod data_blocked;
pub mod handshake_done;
pub mod max_data;
pub mod max_stream_data;
pub mod max_streams;
pub mod new_connection_id;
pub mod new_token;
pub mod padding;
pub mod path_challenge;
pub mod path_response;
pub mod ping;
pub mod reset_stream;
pub mod retire_connection_id;
pub mod stop_sending;
pub mod stream;
pub mod streams_blocked;

pub use ack::{Ack, EcnCounts};
pub use connection_close::ConnectionClose;
pub use crypto::Crypto;
pub use data_blocked::{DataBlocked, StreamDataBlocked};
pub use handshake_done::HandshakeDone;
pub use max_data::MaxData;
pub use max_stream_data::MaxStreamData;
pub use max_streams::MaxStreams;
pub use new_connection_id::NewConnectionId;
pub use new_token::NewToken;
pub use padding::Padding;
pub use path_challenge::PathChallenge;
pub use path_response::PathResponse;
pub use ping::Ping;
pub use reset_stream::ResetStream;
pub use retire_connection_id::RetireConnectionId;
pub use stop_sending::StopSending;
pub use stream::Stream;
pub use streams_blocked::StreamsBlocked;

macro_rules! frames {
    ($($ty:ident),* $(,)?) => {
        /// An owned QUIC frame.
        ///
        /// Frames cross task boundaries on their way from parsers and
        /// scenarios to the packet bundler, so they own their payloads.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Frame {
            $(
                $ty($ty),
            )*
        }

        impl Frame {
            pub fn tag(&self) -> Tag {
                match self {
                    $(
                        Frame::$ty(frame) => frame.tag(),
                    )*
                }
            }
        }

        $(
            impl From<$ty> for Frame {
                #[inline]
                fn from(frame: $ty) -> Self {
                    Frame::$ty(frame)
                }
            }
        )*

        impl EncoderValue for Frame {
            #[inline]
            fn encode<E: Encoder>(&self, buffer: &mut E) {
                match self {
                    $(
                        Frame::$ty(frame) => buffer.encode(frame),
                    )*
                }
            }
        }
    };
}

frames!(
    Padding,
    Ping,
    Ack,
    ResetStream,
    StopSending,
    Crypto,
    NewToken,
    Stream,
    MaxData,
    MaxStreamData,
    MaxStreams,
    DataBlocked,
    StreamDataBlocked,
    StreamsBlocked,
    NewConnectionId,
    RetireConnectionId,
    PathChallenge,
    PathResponse,
    ConnectionClose,
    HandshakeDone,
);

impl Frame {
    /// The number of bytes the frame occupies inside a packet payload,
    /// used for MTU accounting in the packet bundler.
    #[inline]
    pub fn frame_length(&self) -> usize {
        self.encoding_size()
    }

    /// Whether loss of the containing packet requires this frame to be
    /// resent.
    #[inline]
    pub fn is_retransmittable(&self) -> bool {
        !matches!(
            self,
            Frame::Ack(_) | Frame::Padding(_) | Frame::PathResponse(_) | Frame::ConnectionClose(_)
        )
    }

    /// Whether receipt of the frame obligates the peer to send an ACK.
    #[inline]
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Ack(_) | Frame::Padding(_) | Frame::ConnectionClose(_)
        )
    }
}

decoder_value!(
    impl<'a> Frame {
        fn decode(buffer: Buffer) -> Result<Self> {
            let tag = buffer.peek_byte(0)?;
            match tag {
                0x00 => {
                    let (frame, buffer) = buffer.decode::<Padding>()?;
                    Ok((Frame::Padding(frame), buffer))
                }
                0x01 => {
                    let buffer = buffer.skip(1)?;
                    Ok((Frame::Ping(Ping), buffer))
                }
                0x02..=0x03 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<Ack>(tag)?;
                    Ok((Frame::Ack(frame), buffer))
                }
                0x04 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<ResetStream>(tag)?;
                    Ok((Frame::ResetStream(frame), buffer))
                }
                0x05 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<StopSending>(tag)?;
                    Ok((Frame::StopSending(frame), buffer))
                }
                0x06 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<Crypto>(tag)?;
                    Ok((Frame::Crypto(frame), buffer))
                }
                0x07 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<NewToken>(tag)?;
                    Ok((Frame::NewToken(frame), buffer))
                }
                0x08..=0x0f => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<Stream>(tag)?;
                    Ok((Frame::Stream(frame), buffer))
                }
                0x10 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<MaxData>(tag)?;
                    Ok((Frame::MaxData(frame), buffer))
                }
                0x11 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<MaxStreamData>(tag)?;
                    Ok((Frame::MaxStreamData(frame), buffer))
                }
                0x12..=0x13 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<MaxStreams>(tag)?;
                    Ok((Frame::MaxStreams(frame), buffer))
                }
                0x14 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<DataBlocked>(tag)?;
                    Ok((Frame::DataBlocked(frame), buffer))
                }
                0x15 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<StreamDataBlocked>(tag)?;
                    Ok((Frame::StreamDataBlocked(frame), buffer))
                }
                0x16..=0x17 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<StreamsBlocked>(tag)?;
                    Ok((Frame::StreamsBlocked(frame), buffer))
                }
                0x18 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<NewConnectionId>(tag)?;
                    Ok((Frame::NewConnectionId(frame), buffer))
                }
                0x19 => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<RetireConnectionId>(tag)?;
                    Ok((Frame::RetireConnectionId(frame), buffer))
                }
                0x1a => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<PathChallenge>(tag)?;
                    Ok((Frame::PathChallenge(frame), buffer))
                }
                0x1b => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<PathResponse>(tag)?;
                    Ok((Frame::PathResponse(frame), buffer))
                }
                0x1c..=0x1d => {
                    let buffer = buffer.skip(1)?;
                    let (frame, buffer) = buffer.decode_parameterized::<ConnectionClose>(tag)?;
                    Ok((Frame::ConnectionClose(frame), buffer))
                }
                0x1e => {
                    let buffer = buffer.skip(1)?;
                    Ok((Frame::HandshakeDone(HandshakeDone), buffer))
                }
                _ => Err(DecoderError::InvariantViolation("unknown frame type")),
            }
        }
    }
);

#[cfg(test)]
mod tests;
