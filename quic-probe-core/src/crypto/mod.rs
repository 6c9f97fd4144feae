// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod initial;
pub mod suite;

use crate::packet::number::PnSpace;
use alloc::sync::Arc;
use core::fmt;

/// Keying contexts a packet can be protected under.
///
/// `Best` and `BestAppData` are sentinels carried by queued frames that
/// defer level selection to the packet bundler: "route me to the highest
/// available level now, or wait". `BestAppData` restricts the choice to
/// the application-data levels.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EncryptionLevel {
    None,
    Initial,
    ZeroRtt,
    Handshake,
    OneRtt,
    Best,
    BestAppData,
}

impl EncryptionLevel {
    /// The four real keying levels, in handshake order
    pub const LEVELS: [Self; 4] = [Self::Initial, Self::ZeroRtt, Self::Handshake, Self::OneRtt];

    /// `Best` resolution order; first available wins
    pub const BEST_ORDER: [Self; 4] = [Self::OneRtt, Self::ZeroRtt, Self::Handshake, Self::Initial];

    /// `BestAppData` resolution order
    pub const BEST_APP_DATA_ORDER: [Self; 2] = [Self::OneRtt, Self::ZeroRtt];

    #[inline]
    pub fn is_sentinel(self) -> bool {
        matches!(self, Self::Best | Self::BestAppData)
    }

    /// Index into per-level tables; `None` for sentinels and unprotected
    /// packets
    #[inline]
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Initial => Some(0),
            Self::ZeroRtt => Some(1),
            Self::Handshake => Some(2),
            Self::OneRtt => Some(3),
            _ => None,
        }
    }

    #[inline]
    pub fn pn_space(self) -> Option<PnSpace> {
        match self {
            Self::Initial => Some(PnSpace::Initial),
            Self::Handshake => Some(PnSpace::Handshake),
            Self::ZeroRtt | Self::OneRtt => Some(PnSpace::ApplicationData),
            _ => None,
        }
    }
}

impl fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Initial => "initial",
            Self::ZeroRtt => "0-rtt",
            Self::Handshake => "handshake",
            Self::OneRtt => "1-rtt",
            Self::Best => "best",
            Self::BestAppData => "best-app-data",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

/// The negotiated AEAD + header-protection pairing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CipherSuite {
    Aes128GcmSha256,
    Aes256GcmSha384,
    Chacha20Poly1305Sha256,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CryptoError {
    pub reason: &'static str,
}

impl CryptoError {
    pub const DECRYPT_ERROR: Self = Self {
        reason: "payload failed authenticated decryption",
    };

    pub const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}

/// Seals and opens packet payloads for one direction of one level.
///
/// The nonce is the key's IV XORed with the big-endian packet number;
/// the associated data is the packet header up to and including the
/// packet-number bytes.
pub trait PacketKey: Send + Sync {
    fn seal(&self, packet_number: u64, header: &[u8], payload: &[u8])
        -> Result<alloc::vec::Vec<u8>, CryptoError>;

    fn open(
        &self,
        packet_number: u64,
        header: &[u8],
        ciphertext: &[u8],
    ) -> Result<alloc::vec::Vec<u8>, CryptoError>;

    fn tag_len(&self) -> usize;
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# The output of this algorithm is a 5 byte mask that is applied to the
//# protected header fields using exclusive OR.
pub const HEADER_PROTECTION_MASK_LEN: usize = 5;
pub type HeaderProtectionMask = [u8; HEADER_PROTECTION_MASK_LEN];

pub const HEADER_PROTECTION_SAMPLE_LEN: usize = 16;

/// Derives header-protection masks from ciphertext samples.
pub trait HeaderKey: Send + Sync {
    fn new_mask(&self, sample: &[u8]) -> Result<HeaderProtectionMask, CryptoError>;

    fn sample_len(&self) -> usize {
        HEADER_PROTECTION_SAMPLE_LEN
    }
}

/// The keys protecting one direction of one encryption level.
#[derive(Clone)]
pub struct Keys {
    pub packet: Arc<dyn PacketKey>,
    pub header: Arc<dyn HeaderKey>,
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Keys").finish_non_exhaustive()
    }
}

/// Both directions of one encryption level. Halves appear independently
/// as TLS emits the corresponding secrets and are immutable once
/// installed.
#[derive(Clone, Debug, Default)]
pub struct CryptoState {
    pub read: Option<Keys>,
    pub write: Option<Keys>,
}
