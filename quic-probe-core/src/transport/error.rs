// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes share a common
//# space of values.

/// A QUIC transport-layer error code
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Error(pub VarInt);

macro_rules! transport_errors {
    ($($name:ident = $value:expr, $desc:literal;)*) => {
        impl Error {
            $(
                pub const $name: Self = Self(VarInt::from_u16($value));
            )*

            pub fn description(&self) -> Option<&'static str> {
                match self.0.as_u64() {
                    $(
                        $value => Some($desc),
                    )*
                    0x0100..=0x01ff => Some("CRYPTO_ERROR"),
                    _ => None,
                }
            }
        }
    };
}

transport_errors! {
    NO_ERROR = 0x0, "NO_ERROR";
    INTERNAL_ERROR = 0x1, "INTERNAL_ERROR";
    CONNECTION_REFUSED = 0x2, "CONNECTION_REFUSED";
    FLOW_CONTROL_ERROR = 0x3, "FLOW_CONTROL_ERROR";
    STREAM_LIMIT_ERROR = 0x4, "STREAM_LIMIT_ERROR";
    STREAM_STATE_ERROR = 0x5, "STREAM_STATE_ERROR";
    FINAL_SIZE_ERROR = 0x6, "FINAL_SIZE_ERROR";
    FRAME_ENCODING_ERROR = 0x7, "FRAME_ENCODING_ERROR";
    TRANSPORT_PARAMETER_ERROR = 0x8, "TRANSPORT_PARAMETER_ERROR";
    CONNECTION_ID_LIMIT_ERROR = 0x9, "CONNECTION_ID_LIMIT_ERROR";
    PROTOCOL_VIOLATION = 0xa, "PROTOCOL_VIOLATION";
    INVALID_TOKEN = 0xb, "INVALID_TOKEN";
    APPLICATION_ERROR = 0xc, "APPLICATION_ERROR";
    CRYPTO_BUFFER_EXCEEDED = 0xd, "CRYPTO_BUFFER_EXCEEDED";
    KEY_UPDATE_ERROR = 0xe, "KEY_UPDATE_ERROR";
    AEAD_LIMIT_REACHED = 0xf, "AEAD_LIMIT_REACHED";
    NO_VIABLE_PATH = 0x10, "NO_VIABLE_PATH";
}

impl Error {
    #[inline]
    pub const fn code(&self) -> u64 {
        self.0.as_u64()
    }
}

impl From<VarInt> for Error {
    #[inline]
    fn from(code: VarInt) -> Self {
        Self(code)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.description() {
            Some(desc) => write!(f, "{desc}"),
            None => write!(f, "error 0x{:x}", self.code()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions() {
        assert_eq!(Error::STREAM_STATE_ERROR.code(), 0x5);
        assert_eq!(
            Error::STREAM_STATE_ERROR.description(),
            Some("STREAM_STATE_ERROR")
        );
        assert_eq!(Error(VarInt::from_u16(0x150)).description(), Some("CRYPTO_ERROR"));
        assert_eq!(Error(VarInt::from_u16(0x5000)).description(), None);
    }
}
