// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! `ring`-backed packet protection.
//!
//! One AEAD key plus IV per direction, and a cipher-specific header
//! protection key producing 5-byte masks from 16-byte ciphertext samples.

use crate::crypto::{
    CipherSuite, CryptoError, HeaderKey, HeaderProtectionMask, Keys, PacketKey,
};
use alloc::{sync::Arc, vec::Vec};
use ring::{aead, hkdf};

const NONCE_LEN: usize = 12;

impl CipherSuite {
    pub(crate) fn aead_algorithm(self) -> &'static aead::Algorithm {
        match self {
            Self::Aes128GcmSha256 => &aead::AES_128_GCM,
            Self::Aes256GcmSha384 => &aead::AES_256_GCM,
            Self::Chacha20Poly1305Sha256 => &aead::CHACHA20_POLY1305,
        }
    }

    pub(crate) fn header_protection_algorithm(self) -> &'static aead::quic::Algorithm {
        match self {
            Self::Aes128GcmSha256 => &aead::quic::AES_128,
            Self::Aes256GcmSha384 => &aead::quic::AES_256,
            Self::Chacha20Poly1305Sha256 => &aead::quic::CHACHA20,
        }
    }

    pub(crate) fn hkdf_algorithm(self) -> hkdf::Algorithm {
        match self {
            Self::Aes128GcmSha256 | Self::Chacha20Poly1305Sha256 => hkdf::HKDF_SHA256,
            Self::Aes256GcmSha384 => hkdf::HKDF_SHA384,
        }
    }

    pub(crate) fn key_len(self) -> usize {
        match self {
            Self::Aes128GcmSha256 => 16,
            Self::Aes256GcmSha384 | Self::Chacha20Poly1305Sha256 => 32,
        }
    }
}

struct OutLen(usize);

impl hkdf::KeyType for OutLen {
    fn len(&self) -> usize {
        self.0
    }
}

//= https://www.rfc-editor.org/rfc/rfc8446#section-7.1
//# HKDF-Expand-Label(Secret, Label, Context, Length) =
//#      HKDF-Expand(Secret, HkdfLabel, Length)
//#
//# Where HkdfLabel is specified as:
//#
//# struct {
//#     uint16 length = Length;
//#     opaque label<7..255> = "tls13 " + Label;
//#     opaque context<0..255> = Context;
//# } HkdfLabel;
pub fn hkdf_expand_label(
    prk: &hkdf::Prk,
    label: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    let mut info = Vec::with_capacity(10 + label.len());
    info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(0);

    prk.expand(&[info.as_slice()], OutLen(out.len()))
        .and_then(|okm| okm.fill(out))
        .map_err(|_| CryptoError::new("hkdf expansion failed"))
}

struct AeadPacketKey {
    key: aead::LessSafeKey,
    iv: [u8; NONCE_LEN],
}

impl AeadPacketKey {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
    //# The nonce, N, is formed by combining the packet protection IV with
    //# the packet number.
    fn nonce(&self, packet_number: u64) -> aead::Nonce {
        let mut nonce = self.iv;
        for (nonce_byte, pn_byte) in nonce[NONCE_LEN - 8..]
            .iter_mut()
            .zip(packet_number.to_be_bytes())
        {
            *nonce_byte ^= pn_byte;
        }
        aead::Nonce::assume_unique_for_key(nonce)
    }
}

impl PacketKey for AeadPacketKey {
    fn seal(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut in_out = payload.to_vec();
        self.key
            .seal_in_place_append_tag(self.nonce(packet_number), aead::Aad::from(header), &mut in_out)
            .map_err(|_| CryptoError::new("aead seal failed"))?;
        Ok(in_out)
    }

    fn open(
        &self,
        packet_number: u64,
        header: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(self.nonce(packet_number), aead::Aad::from(header), &mut in_out)
            .map_err(|_| CryptoError::DECRYPT_ERROR)?;
        Ok(plaintext.to_vec())
    }

    fn tag_len(&self) -> usize {
        self.key.algorithm().tag_len()
    }
}

struct MaskHeaderKey {
    key: aead::quic::HeaderProtectionKey,
}

impl HeaderKey for MaskHeaderKey {
    fn new_mask(&self, sample: &[u8]) -> Result<HeaderProtectionMask, CryptoError> {
        self.key
            .new_mask(sample)
            .map_err(|_| CryptoError::new("header protection mask failed"))
    }
}

/// Derives the packet-protection keys for one direction from a raw TLS
/// traffic secret.
//= https://www.rfc-editor.org/rfc/rfc9001#section-5.1
//# The keys used for packet protection are computed from the TLS secrets
//# using the KDF provided by TLS.
pub fn keys_from_secret(suite: CipherSuite, secret: &[u8]) -> Result<Keys, CryptoError> {
    let prk = hkdf::Prk::new_less_safe(suite.hkdf_algorithm(), secret);

    let mut key = [0u8; 32];
    let key = &mut key[..suite.key_len()];
    hkdf_expand_label(&prk, b"quic key", key)?;

    let mut iv = [0u8; NONCE_LEN];
    hkdf_expand_label(&prk, b"quic iv", &mut iv)?;

    let mut hp = [0u8; 32];
    let hp = &mut hp[..suite.key_len()];
    hkdf_expand_label(&prk, b"quic hp", hp)?;

    let packet = aead::LessSafeKey::new(
        aead::UnboundKey::new(suite.aead_algorithm(), key)
            .map_err(|_| CryptoError::new("invalid aead key length"))?,
    );
    let header = aead::quic::HeaderProtectionKey::new(suite.header_protection_algorithm(), hp)
        .map_err(|_| CryptoError::new("invalid header protection key length"))?;

    Ok(Keys {
        packet: Arc::new(AeadPacketKey { key: packet, iv }),
        header: Arc::new(MaskHeaderKey { key: header }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::initial;

    #[test]
    fn seal_open_round_trip() {
        let (client_secret, server_secret) =
            initial::initial_secrets(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]);
        let sealer = keys_from_secret(CipherSuite::Aes128GcmSha256, &client_secret).unwrap();
        let opener = keys_from_secret(CipherSuite::Aes128GcmSha256, &client_secret).unwrap();
        let other = keys_from_secret(CipherSuite::Aes128GcmSha256, &server_secret).unwrap();

        let header = [0xc3, 0x00, 0x00, 0x00, 0x01];
        let payload = b"frame bytes".as_slice();

        let sealed = sealer.packet.seal(2, &header, payload).unwrap();
        assert_eq!(sealed.len(), payload.len() + sealer.packet.tag_len());

        let opened = opener.packet.open(2, &header, &sealed).unwrap();
        assert_eq!(opened, payload);

        // wrong keys must fail authentication
        assert!(other.packet.open(2, &header, &sealed).is_err());
        // a different packet number breaks the nonce
        assert!(opener.packet.open(3, &header, &sealed).is_err());
    }

    #[test]
    fn chacha_mask_len() {
        let secret = [0x5a; 32];
        let keys = keys_from_secret(CipherSuite::Chacha20Poly1305Sha256, &secret).unwrap();
        let mask = keys.header.new_mask(&[0u8; 16]).unwrap();
        assert_eq!(mask.len(), 5);
    }
}
