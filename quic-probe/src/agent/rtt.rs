// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! RTT agent: timestamps sent packets and turns acknowledgments of the
//! largest newly-acked packet into RTT samples for the connection's
//! estimator.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::{Connection, IncomingPacket},
};
use quic_probe_core::packet::{number::PnSpace, Packet};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn spawn(conn: &Arc<Connection>) -> Agent {
    let connection = conn.clone();
    let outgoing = conn.topics.outgoing_packets.subscribe();
    let incoming = conn.topics.incoming_packets.subscribe();
    Agent::spawn("rtt", conn, move |stop| {
        run(connection, outgoing, incoming, stop)
    })
}

async fn run(
    conn: Arc<Connection>,
    mut outgoing: tokio::sync::broadcast::Receiver<Arc<Packet>>,
    mut incoming: tokio::sync::broadcast::Receiver<IncomingPacket>,
    mut stop: StopSignal,
) {
    // this agent's private send-time record; the connection's unacked
    // sets belong to the ack and recovery agents
    let mut sent_at: HashMap<(PnSpace, u64), Instant> = HashMap::new();

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            packet = broadcast::next(&mut outgoing, "outgoing-packets") => {
                let Some(packet) = packet else { return };
                if let Some(framer) = packet.as_framer() {
                    if framer.should_be_acknowledged() {
                        sent_at.insert(
                            (framer.pn_space(), framer.header.packet_number),
                            Instant::now(),
                        );
                    }
                }
            }
            received = broadcast::next(&mut incoming, "incoming-packets") => {
                let Some(received) = received else { return };
                let Some(framer) = received.packet.as_framer() else { continue };
                let space = framer.pn_space();

                for ack in framer.ack_frames() {
                    let largest = ack.largest_acknowledged();
                    if let Some(sent) = sent_at.remove(&(space, largest)) {
                        let sample = sent.elapsed();
                        let ack_delay = decode_ack_delay(&conn, ack.ack_delay.as_u64());
                        let max_ack_delay = peer_max_ack_delay(&conn);
                        conn.rtt.lock().unwrap().update(sample, ack_delay, max_ack_delay);
                        tracing::debug!(
                            space = ?space,
                            largest,
                            sample_us = sample.as_micros() as u64,
                            "rtt sample"
                        );
                    }
                    // acknowledged packets no longer produce samples
                    sent_at.retain(|&(pn_space, pn), _| {
                        pn_space != space || !ack.ranges.contains(pn)
                    });
                }
            }
        }
    }
}

fn decode_ack_delay(conn: &Connection, raw: u64) -> Duration {
    let exponent = conn
        .peer_parameters
        .lock()
        .unwrap()
        .as_ref()
        .map(|params| params.ack_delay_exponent.as_u64())
        .unwrap_or(3);
    Duration::from_micros(raw.saturating_mul(1 << exponent.min(20)))
}

fn peer_max_ack_delay(conn: &Connection) -> Duration {
    let millis = conn
        .peer_parameters
        .lock()
        .unwrap()
        .as_ref()
        .map(|params| params.max_ack_delay.as_u64())
        .unwrap_or(25);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_connection;
    use quic_probe_core::{
        crypto::EncryptionLevel,
        frame::{Ack, Ping},
        packet::{Framer, PacketType},
        varint::VarInt,
    };

    #[tokio::test]
    async fn an_ack_produces_an_rtt_sample() {
        let conn = test_connection().await;
        let agent = spawn(&conn);

        let mut framer = Framer::new(PacketType::Initial);
        framer.frames.push(Ping.into());
        let pn = conn.send_packet(framer, EncryptionLevel::Initial).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let ack = Ack::new([pn].into_iter().collect(), VarInt::ZERO, None).unwrap();
        let mut response = Framer::new(PacketType::Initial);
        response.frames.push(ack.into());
        response.header.packet_number = 0;
        conn.topics.incoming_packets.submit(IncomingPacket {
            packet: Arc::new(response.into()),
            id: 0,
            received_at: Instant::now(),
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if conn.rtt.lock().unwrap().has_sample() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("rtt sample expected");

        let rtt = conn.rtt.lock().unwrap();
        assert!(rtt.latest_rtt() >= Duration::from_millis(25));

        agent.stop();
        agent.join().await;
    }
}
