// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Recovery agent: a periodic loss timer. Whenever it fires, every
//! retransmittable frame from unacked packets older than the timer
//! period is queued again at the packet's original encryption level,
//! and the packet is dropped from the unacked set. Acknowledgments
//! shrink the sets through the ack agent before the timer gets to them.

use crate::{
    agent::{stopped, Agent, StopSignal},
    connection::{Connection, QueuedFrame},
};
use quic_probe_core::{frame::Frame, packet::number::PnSpace};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMER: Duration = Duration::from_millis(500);

pub fn spawn(conn: &Arc<Connection>, timer: Duration) -> Agent {
    let connection = conn.clone();
    Agent::spawn("recovery", conn, move |stop| run(connection, timer, stop))
}

async fn run(conn: Arc<Connection>, timer: Duration, mut stop: StopSignal) {
    let mut interval = tokio::time::interval(timer);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; skip it
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            _ = interval.tick() => retransmit_expired(&conn, timer),
        }
    }
}

fn retransmit_expired(conn: &Arc<Connection>, timer: Duration) {
    let cutoff = Instant::now() - timer;
    for space in PnSpace::SPACES {
        for (pn, packet) in conn.take_expired_unacked(space, cutoff) {
            let frames: Vec<Frame> = packet
                .frames
                .into_iter()
                .filter(|frame| {
                    frame.is_retransmittable()
                        // keep Initial datagrams at full size on retransmit
                        || (space == PnSpace::Initial && matches!(frame, Frame::Padding(_)))
                })
                .collect();
            if frames.is_empty() {
                continue;
            }
            tracing::debug!(
                space = ?space,
                pn,
                frames = frames.len(),
                "retransmitting frames from lost packet"
            );
            for frame in frames {
                conn.topics.frame_queue.submit(QueuedFrame {
                    frame,
                    level: packet.level,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast;
    use crate::test_support::test_connection;
    use quic_probe_core::crypto::EncryptionLevel;
    use quic_probe_core::frame::{Ack, Ping};
    use quic_probe_core::packet::{Framer, PacketType};
    use quic_probe_core::varint::VarInt;

    #[tokio::test]
    async fn unacked_frames_are_requeued_after_the_timer() {
        let conn = test_connection().await;
        let mut queue = conn.topics.frame_queue.subscribe();

        let mut framer = Framer::new(PacketType::Initial);
        framer.frames.push(Ping.into());
        // an ACK in the same packet must not be retransmitted
        framer
            .frames
            .push(Ack::new([1u64].into_iter().collect(), VarInt::ZERO, None).unwrap().into());
        conn.send_packet(framer, EncryptionLevel::Initial).unwrap();

        let agent = spawn(&conn, Duration::from_millis(20));

        // the Ping and the Initial padding come back, the ACK does not
        let first = tokio::time::timeout(
            Duration::from_secs(2),
            broadcast::next(&mut queue, "frame-queue"),
        )
        .await
        .expect("retransmission expected")
        .unwrap();
        assert!(matches!(first.frame, Frame::Ping(_)));
        assert_eq!(first.level, EncryptionLevel::Initial);

        let second = broadcast::next(&mut queue, "frame-queue").await.unwrap();
        assert!(matches!(second.frame, Frame::Padding(_)));

        // the packet left the unacked set; no second round
        assert!(conn.unacked_packets(PnSpace::Initial).is_empty());
        let extra = tokio::time::timeout(
            Duration::from_millis(100),
            broadcast::next(&mut queue, "frame-queue"),
        )
        .await;
        assert!(extra.is_err(), "no second retransmission");

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn acked_packets_are_not_retransmitted() {
        let conn = test_connection().await;
        let mut queue = conn.topics.frame_queue.subscribe();

        let mut framer = Framer::new(PacketType::Initial);
        framer.frames.push(Ping.into());
        let pn = conn.send_packet(framer, EncryptionLevel::Initial).unwrap();

        let ack = Ack::new([pn].into_iter().collect(), VarInt::ZERO, None).unwrap();
        conn.on_ack_received(PnSpace::Initial, &ack);

        let agent = spawn(&conn, Duration::from_millis(20));
        let extra = tokio::time::timeout(
            Duration::from_millis(150),
            broadcast::next(&mut queue, "frame-queue"),
        )
        .await;
        assert!(extra.is_err());

        agent.stop();
        agent.join().await;
    }
}
