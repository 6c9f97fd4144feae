// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Parsing agent: splits UDP payloads into packets, removes header
//! protection, decrypts, parses frames and publishes parsed packets.
//!
//! Payloads whose read keys are not installed yet are republished as
//! unprocessed payloads for the buffer agent. Decryption failures drop
//! the packet after logging; malformed packets abandon the rest of the
//! datagram.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::{Connection, IncomingPacket, UnprocessedPayload},
};
use bytes::Bytes;
use quic_probe_core::packet::{
    decode, number::expand_packet_number, protection, Framer, Header, Packet, PacketType,
};
use std::sync::Arc;
use std::time::Instant;

pub fn spawn(conn: &Arc<Connection>) -> Agent {
    let connection = conn.clone();
    let payloads = conn.topics.incoming_payloads.subscribe();
    Agent::spawn("parsing", conn, move |stop| {
        run(connection, payloads, stop)
    })
}

async fn run(
    conn: Arc<Connection>,
    mut payloads: tokio::sync::broadcast::Receiver<Bytes>,
    mut stop: StopSignal,
) {
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            payload = broadcast::next(&mut payloads, "incoming-payloads") => {
                let Some(payload) = payload else { return };
                handle_payload(&conn, &payload);
            }
        }
    }
}

fn handle_payload(conn: &Arc<Connection>, payload: &[u8]) {
    let mut offset = 0;
    while offset < payload.len() {
        match handle_packet(conn, &payload[offset..]) {
            Ok(consumed) => offset += consumed,
            // the rest of the datagram is abandoned
            Err(()) => return,
        }
    }
}

/// Processes the packet starting at `bytes[0]`; returns how many bytes
/// it occupied, or `Err` to abandon the rest of the datagram.
fn handle_packet(conn: &Arc<Connection>, bytes: &[u8]) -> Result<usize, ()> {
    let header = decode::parse_protected_header(bytes, conn.source_cid.len()).map_err(|error| {
        tracing::debug!(%error, "could not parse packet header");
    })?;

    match header.packet_type {
        PacketType::VersionNegotiation => {
            let packet = decode::parse_version_negotiation(bytes).map_err(|error| {
                tracing::debug!(%error, "malformed version negotiation packet");
            })?;
            publish(conn, Packet::VersionNegotiation(packet), bytes);
            return Err(()); // consumes the rest of the datagram
        }
        PacketType::Retry => {
            let packet = decode::parse_retry(bytes).map_err(|error| {
                tracing::debug!(%error, "malformed retry packet");
            })?;
            publish(conn, Packet::Retry(packet), bytes);
            return Err(());
        }
        _ => {}
    }

    let level = header.packet_type.encryption_level();
    let space = header
        .packet_type
        .pn_space()
        .expect("protected packets have a space");

    let Some(keys) = conn.read_keys(level) else {
        tracing::debug!(
            %level,
            len = bytes.len(),
            "read keys unavailable, buffering payload"
        );
        conn.topics.unprocessed_payloads.submit(UnprocessedPayload {
            level,
            payload: Bytes::copy_from_slice(bytes),
        });
        return Err(());
    };

    let mut packet_bytes = bytes.to_vec();
    let (pn_len, truncated) =
        protection::remove_protection(&*keys.header, &mut packet_bytes, header.pn_offset)
            .map_err(|error| {
                tracing::debug!(%error, "header protection removal failed");
            })?;

    let packet_number = expand_packet_number(conn.largest_received(space), truncated, pn_len);

    let header_len = header.pn_offset + pn_len;
    let packet_len = if header.is_long() {
        header.packet_len()
    } else {
        packet_bytes.len()
    };
    if packet_len > packet_bytes.len() || header_len > packet_len {
        tracing::debug!(
            packet_len,
            available = packet_bytes.len(),
            "payload length is past the received bytes, has PN decryption failed?"
        );
        return Err(());
    }

    let plaintext = keys
        .packet
        .open(
            packet_number,
            &packet_bytes[..header_len],
            &packet_bytes[header_len..packet_len],
        )
        .map_err(|error| {
            // decryption failures are dropped after logging
            tracing::debug!(%error, packet_number, %level, "could not decrypt packet");
        })?;

    let frames = decode::parse_frames(&plaintext).map_err(|error| {
        tracing::debug!(%error, packet_number, "frame parsing failed, abandoning packet");
    })?;

    let mut framer = Framer::with_frames(header.packet_type, frames);
    framer.header = Header {
        version: header.version,
        destination_cid: header.destination_cid,
        source_cid: header.source_cid,
        token: header.token.clone(),
        packet_number,
    };

    // crypto and stream bookkeeping happen before the packet is
    // published so downstream agents observe consistent state
    for crypto in framer.crypto_frames() {
        conn.crypto_stream_push(space, crypto.offset.as_u64(), crypto.data.clone());
    }
    for stream in framer.stream_frames() {
        conn.streams.on_stream_frame(stream);
    }

    conn.record_received(space, packet_number);

    tracing::debug!(
        packet = %Packet::Framer(framer.clone()).short_string(),
        len = packet_len,
        "parsed packet"
    );

    let mut cleartext = packet_bytes[..header_len].to_vec();
    cleartext.extend_from_slice(&plaintext);
    publish(conn, Packet::Framer(framer), &cleartext);

    Ok(packet_len)
}

fn publish(conn: &Arc<Connection>, packet: Packet, cleartext: &[u8]) {
    let id = conn.next_packet_id();
    conn.topics.incoming_packets.submit(IncomingPacket {
        packet: Arc::new(packet),
        id,
        received_at: Instant::now(),
    });
    conn.invoke_received_packet_handler(cleartext, id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast;
    use crate::test_support::test_connection;
    use quic_probe_core::{
        crypto::EncryptionLevel,
        frame::{Crypto, Padding, Ping},
        packet::encode,
        varint::VarInt,
    };

    /// Encrypts a packet the way the peer would: sealed with the
    /// connection's *read* keys so the parsing agent can open it.
    fn peer_packet(
        conn: &Arc<Connection>,
        packet_type: PacketType,
        frames: Vec<quic_probe_core::frame::Frame>,
        packet_number: u64,
    ) -> Vec<u8> {
        let keys = conn.read_keys(packet_type.encryption_level()).unwrap();
        let mut framer = Framer::with_frames(packet_type, frames);
        framer.header = Header {
            version: quic_probe_core::version::QUIC_V1,
            destination_cid: conn.source_cid,
            source_cid: conn.destination_cid(),
            token: Bytes::new(),
            packet_number,
        };
        encode::encode_framer(&framer, &keys, None).unwrap()
    }

    #[tokio::test]
    async fn parses_initial_packets_and_tracks_largest_received() {
        let conn = test_connection().await;
        let mut packets = conn.topics.incoming_packets.subscribe();
        let agent = spawn(&conn);

        let bytes = peer_packet(
            &conn,
            PacketType::Initial,
            vec![
                Crypto {
                    offset: VarInt::ZERO,
                    data: Bytes::from_static(b"server hello"),
                }
                .into(),
                Padding { length: 30 }.into(),
            ],
            0,
        );
        conn.topics.incoming_payloads.submit(Bytes::from(bytes));

        let incoming = broadcast::next(&mut packets, "incoming-packets")
            .await
            .unwrap();
        let framer = incoming.packet.as_framer().unwrap();
        assert_eq!(framer.packet_type, PacketType::Initial);
        assert_eq!(framer.header.packet_number, 0);
        assert_eq!(framer.crypto_frames().count(), 1);
        assert_eq!(
            conn.largest_received(quic_probe_core::packet::number::PnSpace::Initial),
            Some(0)
        );
        // the crypto bytes were appended to the crypto stream
        assert_eq!(
            conn.crypto_stream_take(quic_probe_core::packet::number::PnSpace::Initial)
                .unwrap(),
            b"server hello"
        );

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn coalesced_datagram_yields_multiple_packets() {
        let conn = test_connection().await;
        let mut packets = conn.topics.incoming_packets.subscribe();
        let agent = spawn(&conn);

        let mut datagram = peer_packet(
            &conn,
            PacketType::Initial,
            vec![Ping.into(), Padding { length: 40 }.into()],
            0,
        );
        datagram.extend_from_slice(&peer_packet(
            &conn,
            PacketType::Initial,
            vec![Ping.into(), Padding { length: 10 }.into()],
            1,
        ));
        conn.topics.incoming_payloads.submit(Bytes::from(datagram));

        let first = broadcast::next(&mut packets, "incoming-packets").await.unwrap();
        let second = broadcast::next(&mut packets, "incoming-packets").await.unwrap();
        assert_eq!(first.packet.packet_number(), Some(0));
        assert_eq!(second.packet.packet_number(), Some(1));

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn missing_keys_republish_the_payload() {
        let conn = test_connection().await;
        let mut unprocessed = conn.topics.unprocessed_payloads.subscribe();
        let agent = spawn(&conn);

        // a short-header packet before 1-RTT keys exist
        let mut bytes = vec![0x41u8];
        bytes.extend_from_slice(conn.source_cid.as_bytes());
        bytes.extend_from_slice(&[0u8; 32]);
        conn.topics.incoming_payloads.submit(Bytes::from(bytes.clone()));

        let payload = broadcast::next(&mut unprocessed, "unprocessed-payloads")
            .await
            .unwrap();
        assert_eq!(payload.level, EncryptionLevel::OneRtt);
        assert_eq!(&payload.payload[..], &bytes[..]);

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn undecryptable_packet_is_dropped() {
        let conn = test_connection().await;
        let mut packets = conn.topics.incoming_packets.subscribe();
        let agent = spawn(&conn);

        let mut bytes = peer_packet(
            &conn,
            PacketType::Initial,
            vec![Ping.into(), Padding { length: 40 }.into()],
            0,
        );
        // corrupt the AEAD tag
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        conn.topics.incoming_payloads.submit(Bytes::from(bytes));

        // nothing is published; a subsequent valid packet still flows
        let valid = peer_packet(&conn, PacketType::Initial, vec![Ping.into(), Padding { length: 4 }.into()], 1);
        conn.topics.incoming_payloads.submit(Bytes::from(valid));
        let incoming = broadcast::next(&mut packets, "incoming-packets").await.unwrap();
        assert_eq!(incoming.packet.packet_number(), Some(1));

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn version_negotiation_short_circuits() {
        let conn = test_connection().await;
        let mut packets = conn.topics.incoming_packets.subscribe();
        let agent = spawn(&conn);

        let mut bytes = vec![0x80 | 0x2a];
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.push(conn.source_cid.len() as u8);
        bytes.extend_from_slice(conn.source_cid.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&0x6b3343cfu32.to_be_bytes());
        conn.topics.incoming_payloads.submit(Bytes::from(bytes));

        let incoming = broadcast::next(&mut packets, "incoming-packets").await.unwrap();
        match incoming.packet.as_ref() {
            Packet::VersionNegotiation(vn) => {
                assert_eq!(vn.unused_field, 0x2a);
                assert_eq!(vn.supported_versions, vec![0x6b3343cf]);
            }
            other => panic!("unexpected packet {other:?}"),
        }

        agent.stop();
        agent.join().await;
    }
}
