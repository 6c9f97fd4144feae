// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{ack_ranges::AckRanges, stream::StreamType, varint::VarInt};
use bytes::Bytes;
use s2n_codec::{DecoderBuffer, Encoder as _, EncoderBuffer};

fn round_trip(frame: Frame) {
    let mut bytes = [0u8; 512];
    let mut encoder = EncoderBuffer::new(&mut bytes);
    encoder.encode(&frame);
    let len = encoder.len();

    assert_eq!(
        frame.frame_length(),
        len,
        "frame_length must equal the encoded length of {frame:?}"
    );

    let (decoded, remaining) = DecoderBuffer::new(&bytes[..len]).decode::<Frame>().unwrap();
    assert!(remaining.is_empty());
    assert_eq!(decoded, frame, "decode(encode(f)) == f");
}

fn sample_frames() -> Vec<Frame> {
    vec![
        Padding { length: 17 }.into(),
        Ping.into(),
        Ack::new(
            [1u64, 2, 3, 9, 12].into_iter().collect::<AckRanges>(),
            VarInt::from_u8(40),
            None,
        )
        .unwrap()
        .into(),
        Ack::new(
            [0u64].into_iter().collect::<AckRanges>(),
            VarInt::ZERO,
            Some(EcnCounts {
                ect_0: VarInt::from_u8(1),
                ect_1: VarInt::ZERO,
                ce: VarInt::from_u8(2),
            }),
        )
        .unwrap()
        .into(),
        ResetStream {
            stream_id: VarInt::from_u8(4),
            application_error_code: VarInt::from_u16(0x101),
            final_size: VarInt::from_u32(77_777),
        }
        .into(),
        StopSending {
            stream_id: VarInt::from_u8(2),
            application_error_code: VarInt::ZERO,
        }
        .into(),
        Crypto {
            offset: VarInt::from_u16(1200),
            data: Bytes::from_static(b"\x01\x00\x00\x04tls!"),
        }
        .into(),
        NewToken {
            token: Bytes::from_static(b"resume-me"),
        }
        .into(),
        Stream {
            stream_id: VarInt::ZERO,
            offset: VarInt::ZERO,
            is_fin: false,
            data: Bytes::from_static(b"GET /index.html\r\n"),
        }
        .into(),
        Stream {
            stream_id: VarInt::from_u8(4),
            offset: VarInt::from_u16(512),
            is_fin: true,
            data: Bytes::new(),
        }
        .into(),
        MaxData {
            maximum_data: VarInt::from_u32(1 << 20),
        }
        .into(),
        MaxStreamData {
            stream_id: VarInt::ZERO,
            maximum_stream_data: VarInt::from_u8(160),
        }
        .into(),
        MaxStreams {
            stream_type: StreamType::Bidirectional,
            maximum_streams: VarInt::from_u8(100),
        }
        .into(),
        MaxStreams {
            stream_type: StreamType::Unidirectional,
            maximum_streams: VarInt::from_u8(3),
        }
        .into(),
        DataBlocked {
            data_limit: VarInt::from_u8(80),
        }
        .into(),
        StreamDataBlocked {
            stream_id: VarInt::ZERO,
            stream_data_limit: VarInt::from_u8(80),
        }
        .into(),
        StreamsBlocked {
            stream_type: StreamType::Unidirectional,
            stream_limit: VarInt::from_u8(1),
        }
        .into(),
        NewConnectionId {
            sequence_number: VarInt::from_u8(1),
            retire_prior_to: VarInt::ZERO,
            connection_id: Bytes::from_static(&[0xaa, 0xbb, 0xcc, 0xdd]),
            stateless_reset_token: [0x42; 16],
        }
        .into(),
        RetireConnectionId {
            sequence_number: VarInt::from_u8(7),
        }
        .into(),
        PathChallenge {
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        }
        .into(),
        PathResponse {
            data: [8, 7, 6, 5, 4, 3, 2, 1],
        }
        .into(),
        ConnectionClose::quic_layer(crate::transport::Error::STREAM_STATE_ERROR, "bad stream")
            .into(),
        ConnectionClose::application(VarInt::from_u8(0x33), "").into(),
        HandshakeDone.into(),
    ]
}

#[test]
fn round_trip_all_variants() {
    for frame in sample_frames() {
        round_trip(frame);
    }
}

#[test]
fn retransmission_classification() {
    for frame in sample_frames() {
        let expected = !matches!(
            frame,
            Frame::Ack(_) | Frame::Padding(_) | Frame::PathResponse(_) | Frame::ConnectionClose(_)
        );
        assert_eq!(frame.is_retransmittable(), expected, "{frame:?}");
    }
}

#[test]
fn ack_eliciting_classification() {
    assert!(Frame::from(Ping).is_ack_eliciting());
    assert!(!Frame::from(Padding { length: 3 }).is_ack_eliciting());
    assert!(!Frame::from(ConnectionClose::application(VarInt::ZERO, "")).is_ack_eliciting());
    assert!(Frame::from(PathResponse { data: [0; 8] }).is_ack_eliciting());
}

#[test]
fn unknown_frame_type_is_an_error() {
    // 0x1f is not assigned
    let bytes = [0x1fu8, 0x00];
    assert!(DecoderBuffer::new(&bytes).decode::<Frame>().is_err());
    // greased 2-byte types are not supported either
    let bytes = [0x40u8, 0x20];
    assert!(DecoderBuffer::new(&bytes).decode::<Frame>().is_err());
}

#[test]
fn stream_frame_without_length_extends_to_end() {
    // tag 0x08: no OFF, no LEN, no FIN
    let bytes = [0x08u8, 0x02, b'h', b'i'];
    let (frame, remaining) = DecoderBuffer::new(&bytes).decode::<Frame>().unwrap();
    assert!(remaining.is_empty());
    match frame {
        Frame::Stream(stream) => {
            assert_eq!(stream.stream_id.as_u64(), 2);
            assert_eq!(stream.offset.as_u64(), 0);
            assert!(!stream.is_fin);
            assert_eq!(&stream.data[..], b"hi");
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[test]
fn padding_run_is_a_single_frame() {
    let bytes = [0u8; 40];
    let (frame, remaining) = DecoderBuffer::new(&bytes).decode::<Frame>().unwrap();
    assert!(remaining.is_empty());
    assert_eq!(frame, Frame::Padding(Padding { length: 40 }));
}
