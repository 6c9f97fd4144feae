// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Handshake agent: sends the first Initial packet and shepherds the
//! Initial→Handshake→1-RTT progression. Version Negotiation and Retry
//! packets are handled here; TLS completion is reported by the TLS
//! agent on the same status topic.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::{Connection, HandshakeStatus, IncomingPacket, SendError},
};
use quic_probe_core::{
    packet::{Packet, PacketType},
    version,
};
use std::sync::Arc;

pub fn spawn(conn: &Arc<Connection>) -> Agent {
    let connection = conn.clone();
    let packets = conn.topics.incoming_packets.subscribe();
    Agent::spawn("handshake", conn, move |stop| run(connection, packets, stop))
}

/// Builds and sends the client's first Initial packet. Called once the
/// agents are attached.
pub fn initiate(conn: &Arc<Connection>) -> Result<(), SendError> {
    let packet = conn.initial_packet()?;
    conn.send_packet(packet, quic_probe_core::crypto::EncryptionLevel::Initial)?;
    Ok(())
}

async fn run(
    conn: Arc<Connection>,
    mut packets: tokio::sync::broadcast::Receiver<IncomingPacket>,
    mut stop: StopSignal,
) {
    let mut saw_server_flight = false;
    let mut retried = false;

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            incoming = broadcast::next(&mut packets, "incoming-packets") => {
                let Some(incoming) = incoming else { return };
                match incoming.packet.as_ref() {
                    Packet::VersionNegotiation(vn) => {
                        if saw_server_flight {
                            // VN after real server packets is a protocol
                            // violation
                            conn.topics.handshake_status.submit(HandshakeStatus {
                                completed: false,
                                error: Some(
                                    "received incorrect packet type during handshake".into(),
                                ),
                                packet: Some(incoming.packet.clone()),
                            });
                            continue;
                        }
                        let Some(&usable) = vn
                            .supported_versions
                            .iter()
                            .find(|advertised| version::is_supported(**advertised))
                        else {
                            conn.topics.handshake_status.submit(HandshakeStatus {
                                completed: false,
                                error: Some("no appropriate version found".into()),
                                packet: Some(incoming.packet.clone()),
                            });
                            continue;
                        };
                        tracing::info!(version = usable, "version negotiation, retrying");
                        conn.set_version(usable);
                        if let Err(error) = conn.resend_initial() {
                            tracing::error!(%error, "could not resend initial after VN");
                        }
                    }
                    Packet::Retry(retry) => {
                        if retried {
                            tracing::debug!("ignoring second retry packet");
                            continue;
                        }
                        retried = true;
                        tracing::info!(
                            new_dcid = %retry.source_cid,
                            token_len = retry.retry_token.len(),
                            "retry received, rekeying initial"
                        );
                        conn.set_destination_cid(retry.source_cid);
                        conn.set_token(retry.retry_token.clone());
                        conn.install_initial_keys();
                        if let Err(error) = conn.resend_initial() {
                            tracing::error!(%error, "could not resend initial after retry");
                        }
                    }
                    Packet::Framer(framer) => {
                        match framer.packet_type {
                            PacketType::Initial | PacketType::Handshake => {
                                saw_server_flight = true;
                            }
                            PacketType::Short => {
                                tracing::trace!("1-rtt packet observed");
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }
}
