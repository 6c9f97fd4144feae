// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
//# An endpoint uses a STOP_SENDING frame (type=0x05) to communicate that
//# incoming data is being discarded on receipt per application request.

const TAG: u8 = 0x05;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StopSending {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
}

impl StopSending {
    #[inline]
    pub const fn tag(&self) -> u8 {
        TAG
    }
}

simple_frame_codec!(
    StopSending {
        stream_id,
        application_error_code
    },
    TAG
);
