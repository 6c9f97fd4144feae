// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Plug-in contract for the TLS 1.3 engine.
//!
//! The engine itself lives outside this crate. The connection runtime
//! feeds it CRYPTO-stream bytes per encryption level and gets back
//! handshake flights to transmit, raw traffic secrets to derive packet
//! protection from, and a completion status.

use bytes::Bytes;
use core::fmt;
use quic_probe_core::crypto::{CipherSuite, Direction, EncryptionLevel};

#[derive(Clone, Debug)]
pub struct TlsError(pub String);

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tls: {}", self.0)
    }
}

impl std::error::Error for TlsError {}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TlsStatus {
    #[default]
    InProgress,
    Completed,
    Failed(String),
}

/// A new traffic secret emitted by the engine. The runtime derives the
/// AEAD, IV and header-protection keys from it.
#[derive(Clone)]
pub struct NewSecret {
    pub level: EncryptionLevel,
    pub direction: Direction,
    pub suite: CipherSuite,
    pub secret: Vec<u8>,
}

impl fmt::Debug for NewSecret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NewSecret")
            .field("level", &self.level)
            .field("direction", &self.direction)
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TlsOutput {
    /// Handshake bytes to transmit, per encryption level
    pub flights: Vec<(EncryptionLevel, Bytes)>,
    pub secrets: Vec<NewSecret>,
    /// The peer's raw quic_transport_parameters extension, once known
    pub peer_transport_parameters: Option<Bytes>,
    pub status: TlsStatus,
}

pub trait TlsEngine: Send {
    /// Produces the first flight. `transport_parameters` is the encoded
    /// quic_transport_parameters extension this client advertises.
    fn start(&mut self, transport_parameters: &[u8]) -> Result<TlsOutput, TlsError>;

    /// Feeds contiguous crypto-stream bytes received at `level`.
    fn feed(&mut self, level: EncryptionLevel, data: &[u8]) -> Result<TlsOutput, TlsError>;
}

pub mod stub {
    use super::*;
    use hex_literal::hex;

    /// A provider-less engine: emits a fixed, well-formed ClientHello and
    /// never completes. Good enough for scenarios that only need the
    /// client to put an Initial packet on the wire (version negotiation),
    /// and a placeholder for a real provider everywhere else.
    #[derive(Debug, Default)]
    pub struct StubEngine {
        started: bool,
    }

    impl StubEngine {
        pub fn new() -> Self {
            Self::default()
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.2
    //# The unprotected payload of this packet contains the following CRYPTO
    //# frame, plus enough PADDING frames to make an 1162 byte payload
    const CLIENT_HELLO: [u8; 241] = hex!(
        "
        010000ed0303ebf8fa56f12939b9584a3896472ec40bb863cfd3e868
        04fe3a47f06a2b69484c000004130113 02010000c000000010000e00000b6578
        616d706c652e636f6dff01000100000a 00080006001d00170018001000070005
        04616c706e0005000501000000000033 00260024001d00209370b2c9caa47fba
        baf4559fedba753de171fa71f50f1ce1 5d43e994ec74d748002b000302030400
        0d0010000e0403050306030203080408 050806002d00020101001c00024001ff
        a500320408ffffffffffffffff050480 00ffff07048000ffff08011001048000
        75300901100f088394c8f03e51570806 048000ffff
        "
    );

    impl TlsEngine for StubEngine {
        fn start(&mut self, _transport_parameters: &[u8]) -> Result<TlsOutput, TlsError> {
            self.started = true;
            Ok(TlsOutput {
                flights: vec![(
                    EncryptionLevel::Initial,
                    Bytes::from_static(&CLIENT_HELLO),
                )],
                ..Default::default()
            })
        }

        fn feed(&mut self, _level: EncryptionLevel, _data: &[u8]) -> Result<TlsOutput, TlsError> {
            Err(TlsError(
                "no TLS provider compiled in; supply a TlsEngine implementation".into(),
            ))
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// A scripted engine for agent tests: returns pre-programmed outputs
    /// and records what it was fed.
    #[derive(Default)]
    pub struct ScriptedEngine {
        pub start_output: TlsOutput,
        pub feed_outputs: VecDeque<TlsOutput>,
        pub fed: Vec<(EncryptionLevel, Vec<u8>)>,
    }

    impl TlsEngine for ScriptedEngine {
        fn start(&mut self, _transport_parameters: &[u8]) -> Result<TlsOutput, TlsError> {
            Ok(self.start_output.clone())
        }

        fn feed(&mut self, level: EncryptionLevel, data: &[u8]) -> Result<TlsOutput, TlsError> {
            self.fed.push((level, data.to_vec()));
            Ok(self.feed_outputs.pop_front().unwrap_or_default())
        }
    }
}
