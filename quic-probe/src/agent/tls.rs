// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! TLS agent: drives the plugged-in TLS 1.3 engine with the bytes
//! accumulating on the crypto streams, queues the engine's flights as
//! CRYPTO frames, installs the packet protection derived from each new
//! traffic secret and announces key availability.
//!
//! Keys are always installed before the corresponding availability
//! event is published.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::{Connection, DirectionalLevel, HandshakeStatus, IncomingPacket, QueuedFrame},
    tls::{TlsOutput, TlsStatus},
};
use quic_probe_core::{
    crypto::{suite, EncryptionLevel},
    frame::Crypto,
    packet::number::PnSpace,
    transport::TransportParameters,
    varint::VarInt,
};
use std::sync::Arc;

pub fn spawn(conn: &Arc<Connection>) -> Agent {
    let connection = conn.clone();
    let packets = conn.topics.incoming_packets.subscribe();
    Agent::spawn("tls", conn, move |stop| run(connection, packets, stop))
}

fn crypto_level(space: PnSpace) -> EncryptionLevel {
    match space {
        PnSpace::Initial => EncryptionLevel::Initial,
        PnSpace::Handshake => EncryptionLevel::Handshake,
        PnSpace::ApplicationData => EncryptionLevel::OneRtt,
    }
}

async fn run(
    conn: Arc<Connection>,
    mut packets: tokio::sync::broadcast::Receiver<IncomingPacket>,
    mut stop: StopSignal,
) {
    let mut completed = false;

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            incoming = broadcast::next(&mut packets, "incoming-packets") => {
                let Some(incoming) = incoming else { return };
                let Some(framer) = incoming.packet.as_framer() else { continue };

                let space = framer.pn_space();
                while let Some(bytes) = conn.crypto_stream_take(space) {
                    let level = crypto_level(space);
                    tracing::debug!(%level, len = bytes.len(), "feeding crypto bytes to TLS");

                    let result = conn.with_tls_engine(|engine| engine.feed(level, &bytes));
                    match result {
                        Ok(output) => {
                            process_output(&conn, output, &mut completed, &incoming);
                        }
                        Err(error) => {
                            tracing::debug!(%error, "TLS engine rejected handshake bytes");
                            conn.topics.handshake_status.submit(HandshakeStatus {
                                completed: false,
                                error: Some(error.0),
                                packet: Some(incoming.packet.clone()),
                            });
                        }
                    }
                }
            }
        }
    }
}

fn process_output(
    conn: &Arc<Connection>,
    output: TlsOutput,
    completed: &mut bool,
    incoming: &IncomingPacket,
) {
    for (level, bytes) in output.flights {
        let Some(space) = level.pn_space() else {
            tracing::debug!(%level, "engine emitted a flight at an unusable level");
            continue;
        };
        let offset = conn.crypto_stream_reserve(space, bytes.len() as u64);
        tracing::debug!(%level, offset, len = bytes.len(), "queueing crypto flight");
        conn.topics.frame_queue.submit(QueuedFrame {
            frame: Crypto {
                offset: VarInt::new(offset).expect("crypto offset fits a varint"),
                data: bytes,
            }
            .into(),
            level,
        });
    }

    for secret in output.secrets {
        match suite::keys_from_secret(secret.suite, &secret.secret) {
            Ok(keys) => {
                conn.install_keys(secret.level, secret.direction, keys);
                // strictly after installation
                conn.topics.encryption_levels_available.submit(DirectionalLevel {
                    level: secret.level,
                    direction: secret.direction,
                });
                tracing::debug!(
                    level = %secret.level,
                    direction = ?secret.direction,
                    "encryption level available"
                );
            }
            Err(error) => tracing::error!(%error, "key derivation from traffic secret failed"),
        }
    }

    if let Some(bytes) = output.peer_transport_parameters {
        match TransportParameters::decode(&bytes) {
            Ok(params) => {
                tracing::debug!("received peer transport parameters");
                *conn.peer_parameters.lock().unwrap() = Some(params);
            }
            Err(error) => tracing::debug!(%error, "malformed peer transport parameters"),
        }
    }

    match output.status {
        TlsStatus::Completed if !*completed => {
            *completed = true;
            conn.topics.handshake_status.submit(HandshakeStatus {
                completed: true,
                error: None,
                packet: Some(incoming.packet.clone()),
            });
        }
        TlsStatus::Failed(reason) => {
            conn.topics.handshake_status.submit(HandshakeStatus {
                completed: false,
                error: Some(reason),
                packet: Some(incoming.packet.clone()),
            });
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_connection_with_engine;
    use crate::tls::{testing::ScriptedEngine, NewSecret};
    use bytes::Bytes;
    use quic_probe_core::{
        crypto::{CipherSuite, Direction},
        frame::Frame,
        packet::{Framer, PacketType},
    };
    use std::collections::VecDeque;
    use std::time::Instant;

    fn incoming_handshake_packet(conn: &Arc<Connection>, data: &'static [u8]) -> IncomingPacket {
        conn.crypto_stream_push(PnSpace::Handshake, 0, Bytes::from_static(data));
        let framer = Framer::with_frames(
            PacketType::Handshake,
            vec![Crypto {
                offset: VarInt::ZERO,
                data: Bytes::from_static(data),
            }
            .into()],
        );
        IncomingPacket {
            packet: Arc::new(framer.into()),
            id: conn.next_packet_id(),
            received_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn flights_keys_and_status_flow_through() {
        let mut engine = ScriptedEngine::default();
        engine.feed_outputs = VecDeque::from([TlsOutput {
            flights: vec![(EncryptionLevel::Handshake, Bytes::from_static(b"finished"))],
            secrets: vec![
                NewSecret {
                    level: EncryptionLevel::OneRtt,
                    direction: Direction::Write,
                    suite: CipherSuite::Aes128GcmSha256,
                    secret: vec![0x11; 32],
                },
                NewSecret {
                    level: EncryptionLevel::OneRtt,
                    direction: Direction::Read,
                    suite: CipherSuite::Aes128GcmSha256,
                    secret: vec![0x22; 32],
                },
            ],
            peer_transport_parameters: Some(Bytes::from_static(&[
                0x01, 0x01, 0x33, // max_idle_timeout = 0x33
            ])),
            status: TlsStatus::Completed,
        }]);

        let (conn, _peer) = test_connection_with_engine(Box::new(engine)).await;
        let mut frames = conn.topics.frame_queue.subscribe();
        let mut levels = conn.topics.encryption_levels_available.subscribe();
        let mut status = conn.topics.handshake_status.subscribe();

        let agent = spawn(&conn);
        conn.topics
            .incoming_packets
            .submit(incoming_handshake_packet(&conn, b"server finished"));

        // the flight became a CRYPTO frame at the handshake level
        let queued = broadcast::next(&mut frames, "frame-queue").await.unwrap();
        assert_eq!(queued.level, EncryptionLevel::Handshake);
        match queued.frame {
            Frame::Crypto(crypto) => assert_eq!(&crypto.data[..], b"finished"),
            other => panic!("unexpected frame {other:?}"),
        }

        // keys were installed before the events were published
        let first = broadcast::next(&mut levels, "levels").await.unwrap();
        assert_eq!(first.level, EncryptionLevel::OneRtt);
        assert_eq!(first.direction, Direction::Write);
        assert!(conn.write_keys(EncryptionLevel::OneRtt).is_some());
        let second = broadcast::next(&mut levels, "levels").await.unwrap();
        assert_eq!(second.direction, Direction::Read);
        assert!(conn.read_keys(EncryptionLevel::OneRtt).is_some());

        let status = broadcast::next(&mut status, "status").await.unwrap();
        assert!(status.completed);

        assert_eq!(
            conn.peer_parameters.lock().unwrap().as_ref().unwrap().max_idle_timeout,
            VarInt::from_u8(0x33)
        );

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn engine_errors_surface_as_failed_status() {
        let (conn, _peer) = test_connection_with_engine(Box::new(
            crate::tls::stub::StubEngine::new(),
        ))
        .await;
        let mut status = conn.topics.handshake_status.subscribe();
        let agent = spawn(&conn);

        conn.topics
            .incoming_packets
            .submit(incoming_handshake_packet(&conn, b"bytes"));

        let status = broadcast::next(&mut status, "status").await.unwrap();
        assert!(!status.completed);
        assert!(status.error.is_some());

        agent.stop();
        agent.join().await;
    }
}
