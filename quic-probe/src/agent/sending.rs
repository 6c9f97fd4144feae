// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sending agent: bundles queued frames into packets per encryption
//! level. Frames wait up to 5 ms for company before the level's buffer
//! is flushed into a packet; a frame that would overflow the MTU
//! triggers an immediate flush. Frames queued at the `Best` sentinels
//! are re-homed to the best available level when their timer fires.
//! Packets built before their write keys exist wait in a pending list.
//! ACK frames bundled into the same packet are merged into one.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::{Connection, DirectionalLevel, QueuedFrame},
};
use quic_probe_core::{
    ack_ranges::AckRanges,
    crypto::{Direction, EncryptionLevel},
    frame::{Ack, EcnCounts, Frame},
    packet::{Framer, PacketType},
    varint::VarInt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The window a frame waits for more frames to share its packet.
pub const BUNDLE_DELAY: Duration = Duration::from_millis(5);

// buffer slots: the four real levels plus the two sentinels
const SLOTS: usize = 6;

fn slot(level: EncryptionLevel) -> usize {
    match level {
        EncryptionLevel::Initial => 0,
        EncryptionLevel::ZeroRtt => 1,
        EncryptionLevel::Handshake => 2,
        EncryptionLevel::OneRtt => 3,
        EncryptionLevel::Best => 4,
        EncryptionLevel::BestAppData => 5,
        EncryptionLevel::None => unreachable!("no frames are queued at level none"),
    }
}

const SLOT_LEVELS: [EncryptionLevel; SLOTS] = [
    EncryptionLevel::Initial,
    EncryptionLevel::ZeroRtt,
    EncryptionLevel::Handshake,
    EncryptionLevel::OneRtt,
    EncryptionLevel::Best,
    EncryptionLevel::BestAppData,
];

fn packet_type(level: EncryptionLevel) -> PacketType {
    match level {
        EncryptionLevel::Initial => PacketType::Initial,
        EncryptionLevel::ZeroRtt => PacketType::ZeroRtt,
        EncryptionLevel::Handshake => PacketType::Handshake,
        _ => PacketType::Short,
    }
}

pub fn spawn(conn: &Arc<Connection>, mtu: u16) -> Agent {
    let connection = conn.clone();
    let frames = conn.topics.frame_queue.subscribe();
    let levels = conn.topics.encryption_levels_available.subscribe();
    Agent::spawn("sending", conn, move |stop| {
        run(connection, frames, levels, mtu, stop)
    })
}

struct Reactor {
    conn: Arc<Connection>,
    mtu: usize,
    buffers: [Vec<Frame>; SLOTS],
    buffer_len: [usize; SLOTS],
    deadlines: [Option<Instant>; SLOTS],
    write_available: [bool; 4],
    pending_packets: [Vec<Framer>; 4],
}

impl Reactor {
    fn new(conn: Arc<Connection>, mtu: u16) -> Self {
        Self {
            conn,
            mtu: mtu as usize,
            buffers: Default::default(),
            buffer_len: [0; SLOTS],
            deadlines: [None; SLOTS],
            // Initial keys exist from connection creation
            write_available: [true, false, false, false],
            pending_packets: Default::default(),
        }
    }

    fn available(&self, level: EncryptionLevel) -> bool {
        level
            .index()
            .map(|index| self.write_available[index])
            .unwrap_or(false)
    }

    /// First available level in the sentinel's preference order; the
    /// fallback is held until its keys arrive.
    fn choose_best(&self, app_data_only: bool) -> EncryptionLevel {
        let order: &[EncryptionLevel] = if app_data_only {
            &EncryptionLevel::BEST_APP_DATA_ORDER
        } else {
            &EncryptionLevel::BEST_ORDER
        };
        for &level in order {
            if self.available(level) {
                return level;
            }
        }
        if app_data_only {
            EncryptionLevel::OneRtt
        } else {
            EncryptionLevel::Initial
        }
    }

    fn arm(&mut self, level: EncryptionLevel, delay: Duration) {
        self.deadlines[slot(level)] = Some(Instant::now() + delay);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Drains the level's buffer into `packet`, merging ACK frames.
    fn fill(&mut self, packet: &mut Framer, level: EncryptionLevel) {
        let index = slot(level);
        let mut acks = Vec::new();
        for frame in self.buffers[index].drain(..) {
            match frame {
                Frame::Ack(ack) => acks.push(ack),
                frame => packet.frames.push(frame),
            }
        }
        self.buffer_len[index] = 0;

        if acks.len() > 1 {
            tracing::debug!(count = acks.len(), "merging ACK frames into one");
            packet.frames.push(merge_acks(acks).into());
        } else if let Some(ack) = acks.pop() {
            packet.frames.push(ack.into());
        }
    }

    fn send(&mut self, packet: Framer, level: EncryptionLevel) {
        if !self.available(level) {
            tracing::debug!(%level, "write keys unavailable, holding packet");
            self.pending_packets[level.index().expect("real level")].push(packet);
            return;
        }
        if let Err(error) = self.conn.send_packet(packet, level) {
            tracing::error!(%error, %level, "failed to send bundled packet");
        }
    }

    fn on_frame(&mut self, queued: QueuedFrame) {
        let level = queued.level;
        let frame_len = queued.frame.frame_length();
        tracing::trace!(%level, frame_len, "frame queued for bundling");

        if frame_len > self.mtu {
            // a frame that can never fit a packet is refused outright
            tracing::error!(frame_len, mtu = self.mtu, "frame exceeds the MTU, dropping");
            return;
        }

        let index = slot(level);

        // sentinels only buffer; resolution happens when their timer fires
        if level.is_sentinel() {
            self.buffers[index].push(queued.frame);
            self.buffer_len[index] += frame_len;
            self.arm(level, BUNDLE_DELAY);
            return;
        }

        if self.buffer_len[index] + frame_len > self.mtu {
            // flush-now: everything buffered goes out, the newcomer
            // either rides alone or starts the next buffer
            tracing::debug!(
                %level,
                buffered = self.buffer_len[index],
                "buffer would exceed MTU, flushing"
            );
            let mut packet = Framer::new(packet_type(level));
            self.fill(&mut packet, level);

            if packet.frames.is_empty() {
                packet.frames.push(queued.frame);
            } else {
                self.buffers[index].push(queued.frame);
                self.buffer_len[index] = frame_len;
                self.arm(level, BUNDLE_DELAY);
            }
            self.send(packet, level);
        } else {
            self.buffers[index].push(queued.frame);
            self.buffer_len[index] += frame_len;
            if self.available(level) {
                self.arm(level, BUNDLE_DELAY);
            }
        }
    }

    fn on_timer(&mut self, level: EncryptionLevel) {
        let index = slot(level);

        if level.is_sentinel() {
            let target = self.choose_best(level == EncryptionLevel::BestAppData);
            tracing::debug!(sentinel = %level, %target, "resolved sentinel level");
            let frames: Vec<Frame> = self.buffers[index].drain(..).collect();
            let len = self.buffer_len[index];
            self.buffer_len[index] = 0;
            let target_index = slot(target);
            self.buffers[target_index].extend(frames);
            self.buffer_len[target_index] += len;
            self.arm(target, Duration::ZERO);
            return;
        }

        if !self.buffers[index].is_empty() && self.available(level) {
            tracing::debug!(
                %level,
                bytes = self.buffer_len[index],
                frames = self.buffers[index].len(),
                "bundle timer fired, sending"
            );
            let mut packet = Framer::new(packet_type(level));
            self.fill(&mut packet, level);
            self.send(packet, level);
        }
    }

    fn on_level_available(&mut self, event: DirectionalLevel) {
        if event.direction != Direction::Write {
            return;
        }
        let Some(index) = event.level.index() else { return };
        self.write_available[index] = true;

        let pending = std::mem::take(&mut self.pending_packets[index]);
        if !pending.is_empty() {
            tracing::debug!(
                level = %event.level,
                count = pending.len(),
                "write keys available, sending held packets"
            );
        }
        for packet in pending {
            if let Err(error) = self.conn.send_packet(packet, event.level) {
                tracing::error!(%error, "failed to send held packet");
            }
        }
        self.arm(event.level, Duration::ZERO);
    }

    /// Fires every deadline that has passed.
    fn on_tick(&mut self) {
        let now = Instant::now();
        for index in 0..SLOTS {
            if let Some(deadline) = self.deadlines[index] {
                if deadline <= now {
                    self.deadlines[index] = None;
                    self.on_timer(SLOT_LEVELS[index]);
                }
            }
        }
    }
}

/// Re-encodes any number of ACK frames as one whose acknowledged set is
/// the union of the inputs.
fn merge_acks(acks: Vec<Ack>) -> Ack {
    debug_assert!(!acks.is_empty());

    let mut ranges = AckRanges::new();
    let mut ack_delay = VarInt::ZERO;
    let mut largest = None;
    let mut ecn_counts: Option<EcnCounts> = None;

    for ack in acks {
        // the delay of the frame acknowledging the most recent packet wins
        if largest.map_or(true, |pn| ack.largest_acknowledged() > pn) {
            largest = Some(ack.largest_acknowledged());
            ack_delay = ack.ack_delay;
        }
        ranges.union(&ack.ranges);
        if let Some(counts) = ack.ecn_counts {
            let merged = ecn_counts.get_or_insert_with(EcnCounts::default);
            merged.ect_0 = merged.ect_0.max(counts.ect_0);
            merged.ect_1 = merged.ect_1.max(counts.ect_1);
            merged.ce = merged.ce.max(counts.ce);
        }
    }

    Ack::new(ranges, ack_delay, ecn_counts).expect("inputs are never empty")
}

async fn run(
    conn: Arc<Connection>,
    mut frames: tokio::sync::broadcast::Receiver<QueuedFrame>,
    mut levels: tokio::sync::broadcast::Receiver<DirectionalLevel>,
    mtu: u16,
    mut stop: StopSignal,
) {
    let mut reactor = Reactor::new(conn, mtu);

    loop {
        let next_deadline = reactor.next_deadline();
        tokio::select! {
            _ = stopped(&mut stop) => return,
            queued = broadcast::next(&mut frames, "frame-queue") => {
                let Some(queued) = queued else { return };
                reactor.on_frame(queued);
            }
            event = broadcast::next(&mut levels, "encryption-levels") => {
                let Some(event) = event else { return };
                reactor.on_level_available(event);
            }
            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                if next_deadline.is_some() =>
            {
                reactor.on_tick();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast;
    use crate::test_support::test_connection;
    use bytes::Bytes;
    use quic_probe_core::frame::{Crypto, Ping};
    use quic_probe_core::packet::Packet;

    fn crypto_frame(len: usize) -> Frame {
        Crypto {
            offset: VarInt::ZERO,
            data: Bytes::from(vec![0x61; len]),
        }
        .into()
    }

    async fn next_outgoing(
        rx: &mut tokio::sync::broadcast::Receiver<Arc<Packet>>,
    ) -> Arc<Packet> {
        tokio::time::timeout(Duration::from_secs(2), broadcast::next(rx, "outgoing"))
            .await
            .expect("expected an outgoing packet")
            .unwrap()
    }

    #[tokio::test]
    async fn frames_are_coalesced_within_the_bundle_window() {
        let conn = test_connection().await;
        let mut outgoing = conn.topics.outgoing_packets.subscribe();
        let agent = spawn(&conn, 1200);

        conn.topics.frame_queue.submit(QueuedFrame {
            frame: Ping.into(),
            level: EncryptionLevel::Initial,
        });
        conn.topics.frame_queue.submit(QueuedFrame {
            frame: crypto_frame(100),
            level: EncryptionLevel::Initial,
        });

        let packet = next_outgoing(&mut outgoing).await;
        let framer = packet.as_framer().unwrap();
        // both frames (plus Initial padding) ride in one packet
        assert!(framer.frames.iter().any(|f| matches!(f, Frame::Ping(_))));
        assert!(framer.frames.iter().any(|f| matches!(f, Frame::Crypto(_))));

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn overflow_flushes_the_buffer_immediately() {
        let conn = test_connection().await;
        let mut outgoing = conn.topics.outgoing_packets.subscribe();
        let agent = spawn(&conn, 1200);

        conn.topics.frame_queue.submit(QueuedFrame {
            frame: crypto_frame(800),
            level: EncryptionLevel::Initial,
        });
        conn.topics.frame_queue.submit(QueuedFrame {
            frame: crypto_frame(800),
            level: EncryptionLevel::Initial,
        });

        // first packet carries only the first frame, flushed before the
        // 5ms window elapsed
        let packet = next_outgoing(&mut outgoing).await;
        let framer = packet.as_framer().unwrap();
        let crypto_sizes: Vec<usize> = framer
            .crypto_frames()
            .map(|c| c.data.len())
            .collect();
        assert_eq!(crypto_sizes, vec![800]);

        // the second follows when its own timer fires
        let packet = next_outgoing(&mut outgoing).await;
        let framer = packet.as_framer().unwrap();
        assert_eq!(framer.crypto_frames().count(), 1);

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn acks_bundled_together_are_merged() {
        let conn = test_connection().await;
        let mut outgoing = conn.topics.outgoing_packets.subscribe();
        let agent = spawn(&conn, 1200);

        let first = Ack::new([1u64, 2, 3].into_iter().collect(), VarInt::from_u8(9), None).unwrap();
        let second = Ack::new([3u64, 7, 8].into_iter().collect(), VarInt::from_u8(4), None).unwrap();
        conn.topics.frame_queue.submit(QueuedFrame {
            frame: first.into(),
            level: EncryptionLevel::Initial,
        });
        conn.topics.frame_queue.submit(QueuedFrame {
            frame: second.into(),
            level: EncryptionLevel::Initial,
        });

        let packet = next_outgoing(&mut outgoing).await;
        let framer = packet.as_framer().unwrap();
        let acks: Vec<&Ack> = framer.ack_frames().collect();
        assert_eq!(acks.len(), 1, "two queued ACKs must merge into one");
        let merged = acks[0];
        for pn in [1u64, 2, 3, 7, 8] {
            assert!(merged.ranges.contains(pn), "pn {pn} lost in merge");
        }
        assert!(!merged.ranges.contains(5));
        assert_eq!(merged.largest_acknowledged(), 8);
        // delay of the ACK with the most recent largest wins
        assert_eq!(merged.ack_delay, VarInt::from_u8(4));

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn best_sentinel_falls_back_to_initial() {
        let conn = test_connection().await;
        let mut outgoing = conn.topics.outgoing_packets.subscribe();
        let agent = spawn(&conn, 1200);

        conn.topics.frame_queue.submit(QueuedFrame {
            frame: Ping.into(),
            level: EncryptionLevel::Best,
        });

        // only Initial keys exist, so Best resolves there
        let packet = next_outgoing(&mut outgoing).await;
        assert_eq!(packet.packet_type(), PacketType::Initial);

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn frames_wait_for_write_keys() {
        let conn = test_connection().await;
        let mut outgoing = conn.topics.outgoing_packets.subscribe();
        let agent = spawn(&conn, 1200);

        conn.topics.frame_queue.submit(QueuedFrame {
            frame: Ping.into(),
            level: EncryptionLevel::Handshake,
        });

        // no handshake keys yet: nothing may go out
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(outgoing.try_recv().is_err());

        // install keys and announce them
        let keys = quic_probe_core::crypto::suite::keys_from_secret(
            quic_probe_core::crypto::CipherSuite::Aes128GcmSha256,
            &[0x55; 32],
        )
        .unwrap();
        conn.install_keys(EncryptionLevel::Handshake, Direction::Write, keys);
        conn.topics
            .encryption_levels_available
            .submit(DirectionalLevel {
                level: EncryptionLevel::Handshake,
                direction: Direction::Write,
            });

        let packet = next_outgoing(&mut outgoing).await;
        assert_eq!(packet.packet_type(), PacketType::Handshake);

        agent.stop();
        agent.join().await;
    }

    #[test]
    fn merge_preserves_the_union() {
        let a = Ack::new(
            [0u64, 1, 2, 10, 11].into_iter().collect(),
            VarInt::ZERO,
            None,
        )
        .unwrap();
        let b = Ack::new([4u64, 5, 11, 12].into_iter().collect(), VarInt::ZERO, None).unwrap();
        let inputs = [a.clone(), b.clone()];

        let merged = merge_acks(vec![a, b]);
        for pn in 0..=14u64 {
            let expected = inputs.iter().any(|ack| ack.ranges.contains(pn));
            assert_eq!(merged.ranges.contains(pn), expected, "pn {pn}");
        }
    }
}
