// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{ack_ranges::AckRanges, frame::Tag, varint::VarInt};
use core::convert::TryFrom;
use s2n_codec::{
    decoder_parameterized_value, decoder_value, DecoderError, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.  ACK Ranges identify acknowledged packets.  If
//# the frame type is 0x03, ACK frames also contain the cumulative count
//# of QUIC packets with associated ECN marks received on the connection
//# up until this point.

const ACK_TAG: u8 = 0x02;
const ACK_W_ECN_TAG: u8 = 0x03;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ack {
    /// Acknowledgment delay, already scaled by the sender's ack-delay
    /// exponent
    pub ack_delay: VarInt,

    /// The acknowledged packet numbers, as disjoint ranges
    pub ranges: AckRanges,

    /// ECN counts, present when the frame type is 0x03
    pub ecn_counts: Option<EcnCounts>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EcnCounts {
    pub ect_0: VarInt,
    pub ect_1: VarInt,
    pub ce: VarInt,
}

impl Ack {
    /// Returns `None` when `ranges` is empty; an ACK frame must
    /// acknowledge at least one packet number.
    pub fn new(ranges: AckRanges, ack_delay: VarInt, ecn_counts: Option<EcnCounts>) -> Option<Self> {
        if ranges.is_empty() {
            return None;
        }
        Some(Self {
            ack_delay,
            ranges,
            ecn_counts,
        })
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        if self.ecn_counts.is_some() {
            ACK_W_ECN_TAG
        } else {
            ACK_TAG
        }
    }

    #[inline]
    pub fn largest_acknowledged(&self) -> u64 {
        self.ranges.largest().expect("ack frame is never empty")
    }
}

decoder_value!(
    impl<'a> EcnCounts {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (ect_0, buffer) = buffer.decode()?;
            let (ect_1, buffer) = buffer.decode()?;
            let (ce, buffer) = buffer.decode()?;
            Ok((EcnCounts { ect_0, ect_1, ce }, buffer))
        }
    }
);

impl EncoderValue for EcnCounts {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.ect_0);
        buffer.encode(&self.ect_1);
        buffer.encode(&self.ce);
    }
}

decoder_parameterized_value!(
    impl<'a> Ack {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
            let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
            let (range_count, buffer) = buffer.decode::<VarInt>()?;
            let (first_range, buffer) = buffer.decode::<VarInt>()?;

            let mut ranges = AckRanges::new();
            let mut smallest = largest_acknowledged
                .as_u64()
                .checked_sub(first_range.as_u64())
                .ok_or(DecoderError::InvariantViolation("invalid first ack range"))?;
            ranges.insert_range(smallest, largest_acknowledged.as_u64());

            let mut buffer = buffer;
            for _ in 0..range_count.as_u64() {
                let (gap, remaining) = buffer.decode::<VarInt>()?;
                let (len, remaining) = remaining.decode::<VarInt>()?;

                //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
                //# Each Gap indicates a range of packets that are not being
                //# acknowledged.  The number of packets in the gap is one
                //# higher than the encoded value of the Gap field.
                let largest = smallest
                    .checked_sub(gap.as_u64())
                    .and_then(|v| v.checked_sub(2))
                    .ok_or(DecoderError::InvariantViolation("invalid ack gap"))?;
                smallest = largest
                    .checked_sub(len.as_u64())
                    .ok_or(DecoderError::InvariantViolation("invalid ack range"))?;
                ranges.insert_range(smallest, largest);
                buffer = remaining;
            }

            let (ecn_counts, buffer) = if tag == ACK_W_ECN_TAG {
                let (ecn_counts, buffer) = buffer.decode()?;
                (Some(ecn_counts), buffer)
            } else {
                (None, buffer)
            };

            let frame = Ack {
                ack_delay,
                ranges,
                ecn_counts,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for Ack {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());

        let mut iter = self.ranges.iter_descending();
        let first = iter.next().expect("ack frame requires at least one range");
        let (smallest, largest) = (*first.start(), *first.end());

        buffer.encode(&VarInt::saturating(largest));
        buffer.encode(&self.ack_delay);
        buffer.encode(
            &VarInt::try_from(self.ranges.range_count() - 1).expect("range count fits a varint"),
        );
        buffer.encode(&VarInt::saturating(largest - smallest));

        let mut previous_smallest = smallest;
        for range in iter {
            let (lo, hi) = (*range.start(), *range.end());
            buffer.encode(&VarInt::saturating(previous_smallest - hi - 2));
            buffer.encode(&VarInt::saturating(hi - lo));
            previous_smallest = lo;
        }

        if let Some(ecn_counts) = &self.ecn_counts {
            buffer.encode(ecn_counts);
        }
    }
}
