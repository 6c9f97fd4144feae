// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ack agent: remembers which packet numbers arrived in each space and
//! queues an ACK frame whenever an ack-eliciting packet comes in. Also
//! applies the peer's ACK frames to the unacked sent-packet sets.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::{Connection, EcnCodepoint, IncomingPacket, QueuedFrame},
};
use quic_probe_core::{
    ack_ranges::AckRanges,
    crypto::EncryptionLevel,
    frame::{Ack, EcnCounts},
    packet::number::PnSpace,
    varint::VarInt,
};
use std::sync::Arc;
use std::time::Instant;

pub fn spawn(conn: &Arc<Connection>) -> Agent {
    let connection = conn.clone();
    let packets = conn.topics.incoming_packets.subscribe();
    let ecn = conn.topics.ecn_status.subscribe();
    Agent::spawn("ack", conn, move |stop| run(connection, packets, ecn, stop))
}

/// The level our ACK for a packet received in `space` goes out at.
fn ack_level(space: PnSpace) -> EncryptionLevel {
    match space {
        PnSpace::Initial => EncryptionLevel::Initial,
        PnSpace::Handshake => EncryptionLevel::Handshake,
        PnSpace::ApplicationData => EncryptionLevel::OneRtt,
    }
}

#[derive(Default)]
struct SpaceRecord {
    received: AckRanges,
    largest_received_at: Option<Instant>,
}

async fn run(
    conn: Arc<Connection>,
    mut packets: tokio::sync::broadcast::Receiver<IncomingPacket>,
    mut ecn: tokio::sync::broadcast::Receiver<EcnCodepoint>,
    mut stop: StopSignal,
) {
    let mut records: [SpaceRecord; PnSpace::COUNT] = Default::default();
    let mut ecn_counts = EcnCounts::default();
    let mut saw_ecn = false;

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            codepoint = broadcast::next(&mut ecn, "ecn-status") => {
                let Some(codepoint) = codepoint else { return };
                saw_ecn |= count_ecn(&mut ecn_counts, codepoint);
            }
            incoming = broadcast::next(&mut packets, "incoming-packets") => {
                let Some(incoming) = incoming else { return };
                let Some(framer) = incoming.packet.as_framer() else { continue };
                let space = framer.pn_space();

                for ack in framer.ack_frames() {
                    conn.on_ack_received(space, ack);
                }

                if !framer.should_be_acknowledged() {
                    continue;
                }

                let record = &mut records[space.index()];
                let pn = framer.header.packet_number;
                record.received.insert(pn);
                if record.received.largest() == Some(pn) {
                    record.largest_received_at = Some(incoming.received_at);
                }

                let ack_delay = scaled_ack_delay(&conn, record.largest_received_at);
                let counts = (saw_ecn && space == PnSpace::ApplicationData)
                    .then_some(ecn_counts);
                let Some(frame) = Ack::new(record.received.clone(), ack_delay, counts) else {
                    continue;
                };

                tracing::debug!(
                    space = ?space,
                    largest = frame.largest_acknowledged(),
                    "queueing acknowledgment"
                );
                conn.topics.frame_queue.submit(QueuedFrame {
                    frame: frame.into(),
                    level: ack_level(space),
                });
            }
        }
    }
}

fn count_ecn(counts: &mut EcnCounts, codepoint: EcnCodepoint) -> bool {
    let slot = match codepoint {
        EcnCodepoint::Ect0 => &mut counts.ect_0,
        EcnCodepoint::Ect1 => &mut counts.ect_1,
        EcnCodepoint::Ce => &mut counts.ce,
        EcnCodepoint::NotEct => return false,
    };
    *slot = slot.checked_add(VarInt::from_u8(1)).unwrap_or(*slot);
    true
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.5
//# The ACK Delay field is... decoded by multiplying the value in the
//# field by 2 to the power of the ack_delay_exponent transport parameter
//# sent by the sender of the ACK frame
fn scaled_ack_delay(conn: &Connection, largest_received_at: Option<Instant>) -> VarInt {
    let Some(received_at) = largest_received_at else {
        return VarInt::ZERO;
    };
    let exponent = conn.local_parameters.lock().unwrap().ack_delay_exponent.as_u64();
    let micros = received_at.elapsed().as_micros() as u64;
    VarInt::saturating(micros >> exponent)
}
