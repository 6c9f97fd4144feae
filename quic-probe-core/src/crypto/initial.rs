// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::crypto::{suite, CipherSuite, CryptoError, Keys};
use hex_literal::hex;
use ring::hkdf;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_salt = 0x38762cf7f55934b34d179ae6a4c80cadccbb7f0a
pub const INITIAL_SALT: [u8; 20] = hex!("38762cf7f55934b34d179ae6a4c80cadccbb7f0a");

pub const SECRET_LEN: usize = 32;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_secret = HKDF-Extract(initial_salt,
//#                               client_dst_connection_id)
//#
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)
//# server_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "server in", "",
//#                                           Hash.length)
pub fn initial_secrets(
    client_destination_cid: &[u8],
) -> ([u8; SECRET_LEN], [u8; SECRET_LEN]) {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &INITIAL_SALT);
    let initial_secret = salt.extract(client_destination_cid);

    let mut client = [0u8; SECRET_LEN];
    let mut server = [0u8; SECRET_LEN];
    suite::hkdf_expand_label(&initial_secret, b"client in", &mut client)
        .expect("sha-256 output length is always expandable");
    suite::hkdf_expand_label(&initial_secret, b"server in", &mut server)
        .expect("sha-256 output length is always expandable");

    (client, server)
}

/// Initial packet protection keys for a client: `write` seals with the
/// client secret, `read` opens with the server secret. Initial packets
/// always use AES-128-GCM.
pub fn client_initial_keys(
    client_destination_cid: &[u8],
) -> Result<(Keys, Keys), CryptoError> {
    let (client_secret, server_secret) = initial_secrets(client_destination_cid);
    let write = suite::keys_from_secret(CipherSuite::Aes128GcmSha256, &client_secret)?;
    let read = suite::keys_from_secret(CipherSuite::Aes128GcmSha256, &server_secret)?;
    Ok((write, read))
}

#[cfg(test)]
mod tests {
    use super::*;

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //= type=test
    //# These packets use an 8-byte client-chosen Destination Connection ID
    //# of 0x8394c8f03e515708.
    const EXAMPLE_DCID: [u8; 8] = hex!("8394c8f03e515708");

    #[test]
    fn rfc9001_initial_secrets() {
        let (client, server) = initial_secrets(&EXAMPLE_DCID);

        assert_eq!(
            client,
            hex!("c00cf151ca5be075ed0ebfb5c80323c42d6b7db67881289af4008f1f6c357aea")
        );
        assert_eq!(
            server,
            hex!("3c199828fd139efd216c155ad844cc81fb82fa8d7446fa7d78be803acdda951b")
        );
    }

    #[test]
    fn rfc9001_client_key_schedule() {
        let (client, _) = initial_secrets(&EXAMPLE_DCID);
        let prk = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, &client);

        let mut key = [0u8; 16];
        suite::hkdf_expand_label(&prk, b"quic key", &mut key).unwrap();
        assert_eq!(key, hex!("1f369613dd76d5467730efcbe3b1a22d"));

        let mut iv = [0u8; 12];
        suite::hkdf_expand_label(&prk, b"quic iv", &mut iv).unwrap();
        assert_eq!(iv, hex!("fa044b2f42a3fd3b46fb255c"));

        let mut hp = [0u8; 16];
        suite::hkdf_expand_label(&prk, b"quic hp", &mut hp).unwrap();
        assert_eq!(hp, hex!("9f50449e04a0e810283a1e9933adedd2"));
    }
}
