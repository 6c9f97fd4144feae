// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.12
//# A sender SHOULD send a DATA_BLOCKED frame (type=0x14) when it wishes
//# to send data but is unable to do so due to connection-level flow
//# control.

const DATA_BLOCKED_TAG: u8 = 0x14;
const STREAM_DATA_BLOCKED_TAG: u8 = 0x15;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataBlocked {
    pub data_limit: VarInt,
}

impl DataBlocked {
    #[inline]
    pub const fn tag(&self) -> u8 {
        DATA_BLOCKED_TAG
    }
}

simple_frame_codec!(DataBlocked { data_limit }, DATA_BLOCKED_TAG);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.13
//# A sender SHOULD send a STREAM_DATA_BLOCKED frame (type=0x15) when it
//# wishes to send data but is unable to do so due to stream-level flow
//# control.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamDataBlocked {
    pub stream_id: VarInt,
    pub stream_data_limit: VarInt,
}

impl StreamDataBlocked {
    #[inline]
    pub const fn tag(&self) -> u8 {
        STREAM_DATA_BLOCKED_TAG
    }
}

simple_frame_codec!(
    StreamDataBlocked {
        stream_id,
        stream_data_limit
    },
    STREAM_DATA_BLOCKED_TAG
);
