// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises over a loopback socket pair: the test plays the
//! server with the wire-level primitives while the full agent pipeline
//! runs on the client side.

use crate::{
    agent, broadcast,
    test_support::test_connection_with_engine,
    tls::{testing::ScriptedEngine, NewSecret, TlsOutput, TlsStatus},
};
use bytes::Bytes;
use quic_probe_core::{
    crypto::{initial, suite, CipherSuite, Direction, EncryptionLevel, Keys},
    frame::{Ack, Crypto, Frame},
    packet::{
        decode, encode, number::expand_packet_number, protection, Framer, Header, PacketType,
    },
    transport::TransportParameters,
    varint::VarInt,
    version, ConnectionId,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::UdpSocket;

const SUITE: CipherSuite = CipherSuite::Aes128GcmSha256;
const HS_CLIENT_SECRET: [u8; 32] = [0xc1; 32];
const HS_SERVER_SECRET: [u8; 32] = [0x51; 32];
const APP_CLIENT_SECRET: [u8; 32] = [0xc2; 32];
const APP_SERVER_SECRET: [u8; 32] = [0x52; 32];

struct ServerPacket {
    packet_type: PacketType,
    packet_number: u64,
    frames: Vec<Frame>,
}

/// Decrypts one datagram's first packet with `keys`.
fn open_packet(datagram: &mut [u8], keys: &Keys, short_dcid_len: usize) -> ServerPacket {
    let header = decode::parse_protected_header(datagram, short_dcid_len).unwrap();
    let (pn_len, truncated) =
        protection::remove_protection(&*keys.header, datagram, header.pn_offset).unwrap();
    let packet_number = expand_packet_number(None, truncated, pn_len);
    let header_len = header.pn_offset + pn_len;
    let packet_len = if header.is_long() {
        header.packet_len()
    } else {
        datagram.len()
    };
    let plaintext = keys
        .packet
        .open(
            packet_number,
            &datagram[..header_len],
            &datagram[header_len..packet_len],
        )
        .unwrap();
    ServerPacket {
        packet_type: header.packet_type,
        packet_number,
        frames: decode::parse_frames(&plaintext).unwrap(),
    }
}

fn crypto_payload(packet: &ServerPacket) -> Vec<u8> {
    let mut payload = Vec::new();
    for frame in &packet.frames {
        if let Frame::Crypto(crypto) = frame {
            payload.extend_from_slice(&crypto.data);
        }
    }
    payload
}

async fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 2048];
    let len = tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut buf))
        .await
        .expect("expected a datagram from the client")
        .unwrap();
    buf.truncate(len);
    buf
}

#[tokio::test]
async fn handshake_completes_over_loopback() {
    let mut engine = ScriptedEngine::default();
    engine.start_output = TlsOutput {
        flights: vec![(EncryptionLevel::Initial, Bytes::from_static(b"client hello"))],
        ..Default::default()
    };
    engine.feed_outputs = VecDeque::from([TlsOutput {
        flights: vec![(
            EncryptionLevel::Handshake,
            Bytes::from_static(b"client finished"),
        )],
        secrets: vec![
            NewSecret {
                level: EncryptionLevel::Handshake,
                direction: Direction::Write,
                suite: SUITE,
                secret: HS_CLIENT_SECRET.to_vec(),
            },
            NewSecret {
                level: EncryptionLevel::Handshake,
                direction: Direction::Read,
                suite: SUITE,
                secret: HS_SERVER_SECRET.to_vec(),
            },
            NewSecret {
                level: EncryptionLevel::OneRtt,
                direction: Direction::Write,
                suite: SUITE,
                secret: APP_CLIENT_SECRET.to_vec(),
            },
            NewSecret {
                level: EncryptionLevel::OneRtt,
                direction: Direction::Read,
                suite: SUITE,
                secret: APP_SERVER_SECRET.to_vec(),
            },
        ],
        peer_transport_parameters: Some(Bytes::from(
            TransportParameters::default().encode_client(),
        )),
        status: TlsStatus::Completed,
    }]);

    let (conn, server) = test_connection_with_engine(Box::new(engine)).await;
    let mut agents = agent::default_agents(&conn);
    let mut status = conn.topics.handshake_status.subscribe();
    agents.add(agent::handshake::spawn(&conn));
    agent::handshake::initiate(&conn).unwrap();

    // --- server: receive and decrypt the client Initial ---
    let mut datagram = recv_datagram(&server).await;
    assert_eq!(datagram.len(), 1200, "client Initial datagrams are padded");

    let header = decode::parse_protected_header(&datagram, 0).unwrap();
    assert_eq!(header.packet_type, PacketType::Initial);
    let (client_initial_keys, server_initial_keys) =
        initial::client_initial_keys(header.destination_cid.as_bytes()).unwrap();

    let client_scid = header.source_cid;
    let packet = open_packet(&mut datagram, &client_initial_keys, 0);
    assert_eq!(packet.packet_number, 0);
    assert_eq!(crypto_payload(&packet), b"client hello");

    // --- server: answer with ACK + ServerHello ---
    let mut response = Framer::with_frames(
        PacketType::Initial,
        vec![
            Ack::new([0u64].into_iter().collect(), VarInt::ZERO, None)
                .unwrap()
                .into(),
            Crypto {
                offset: VarInt::ZERO,
                data: Bytes::from_static(b"server hello"),
            }
            .into(),
        ],
    );
    response.header = Header {
        version: version::QUIC_V1,
        destination_cid: client_scid,
        source_cid: ConnectionId::try_from(&[0xf0u8, 0xf1, 0xf2, 0xf3][..]).unwrap(),
        token: Bytes::new(),
        packet_number: 0,
    };
    let response_bytes = encode::encode_framer(&response, &server_initial_keys, None).unwrap();
    server.send(&response_bytes).await.unwrap();

    // --- client: TLS completes with the scripted secrets ---
    let update = tokio::time::timeout(
        Duration::from_secs(5),
        broadcast::next(&mut status, "handshake-status"),
    )
    .await
    .expect("handshake status expected")
    .unwrap();
    assert!(update.completed, "error: {:?}", update.error);

    // all four 1-RTT/handshake directions were installed
    assert!(conn.write_keys(EncryptionLevel::Handshake).is_some());
    assert!(conn.read_keys(EncryptionLevel::Handshake).is_some());
    assert!(conn.write_keys(EncryptionLevel::OneRtt).is_some());
    assert!(conn.read_keys(EncryptionLevel::OneRtt).is_some());
    assert!(conn.peer_parameters.lock().unwrap().is_some());

    // --- server: the client's Finished arrives at the handshake level ---
    let hs_read = suite::keys_from_secret(SUITE, &HS_CLIENT_SECRET).unwrap();
    let finished = loop {
        let mut datagram = recv_datagram(&server).await;
        let header = decode::parse_protected_header(&datagram, 0).unwrap();
        match header.packet_type {
            PacketType::Handshake => break open_packet(&mut datagram, &hs_read, 0),
            // ACKs of our Initial and Initial retransmissions
            PacketType::Initial => continue,
            other => panic!("unexpected packet type {other}"),
        }
    };
    assert_eq!(crypto_payload(&finished), b"client finished");

    agents.stop_all().await;
}

#[tokio::test]
async fn close_connection_reaches_the_wire() {
    let (conn, server) = test_connection_with_engine(Box::new(ScriptedEngine::default())).await;
    let mut agents = agent::default_agents(&conn);

    agents.close_connection(true, 0x05, "stream state error").await;

    // the close frame rode an Initial packet, observable by the server
    let mut datagram = recv_datagram(&server).await;
    let header = decode::parse_protected_header(&datagram, 0).unwrap();
    let (client_keys, _) = initial::client_initial_keys(header.destination_cid.as_bytes()).unwrap();
    let packet = open_packet(&mut datagram, &client_keys, 0);
    let close = packet
        .frames
        .iter()
        .find_map(|frame| match frame {
            Frame::ConnectionClose(close) => Some(close),
            _ => None,
        })
        .expect("close frame expected");
    assert_eq!(close.error_code.as_u64(), 0x05);
    assert_eq!(&close.reason[..], b"stream state error");
}
