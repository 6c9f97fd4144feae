// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The shared connection hub: identifiers, crypto states, packet-number
//! spaces, streams, broadcast topics and the packet encoder.
//!
//! Agents communicate exclusively through the topics registered here.
//! The single-writer fields follow the discipline the agents rely on:
//! crypto states are installed once (TLS agent), `largest_received` is
//! advanced by the parsing agent only, and send-side packet numbers are
//! assigned by the encoder.

use crate::{
    broadcast::Topic,
    rtt::RttEstimator,
    streams::Streams,
    tls::{TlsEngine, TlsError, TlsOutput},
};
use bytes::Bytes;
use quic_probe_core::{
    crypto::{self, CryptoState, Direction, EncryptionLevel, Keys},
    frame::{ConnectionClose, Crypto, Frame},
    packet::{encode, number::PnSpace, Framer, Packet, PacketType},
    transport::TransportParameters,
    varint::VarInt,
    version, ConnectionId,
};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub const DEFAULT_MTU: u16 = 1200;

const PACKET_TOPIC_CAPACITY: usize = 1000;
const EVENT_TOPIC_CAPACITY: usize = 64;

// sentinel for "no packet number yet" in the atomics below
const NO_PN: u64 = u64::MAX;

/// A frame queued for bundling at a given (possibly sentinel) level.
#[derive(Clone, Debug)]
pub struct QueuedFrame {
    pub frame: Frame,
    pub level: EncryptionLevel,
}

#[derive(Clone, Debug)]
pub struct UnprocessedPayload {
    pub level: EncryptionLevel,
    pub payload: Bytes,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirectionalLevel {
    pub level: EncryptionLevel,
    pub direction: Direction,
}

/// A parsed packet on its way through the pipeline.
#[derive(Clone, Debug)]
pub struct IncomingPacket {
    pub packet: Arc<Packet>,
    /// Unique per connection, for trace correlation
    pub id: u64,
    pub received_at: Instant,
}

#[derive(Clone, Debug)]
pub struct HandshakeStatus {
    pub completed: bool,
    pub error: Option<String>,
    pub packet: Option<Arc<Packet>>,
}

/// Observed ECN codepoint on an inbound datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EcnCodepoint {
    NotEct,
    Ect0,
    Ect1,
    Ce,
}

impl EcnCodepoint {
    pub fn from_tos(tos: u8) -> Self {
        match tos & 0b11 {
            0b10 => Self::Ect0,
            0b01 => Self::Ect1,
            0b11 => Self::Ce,
            _ => Self::NotEct,
        }
    }
}

pub type ReceivedPacketHandler = Box<dyn Fn(&[u8], u64) + Send + Sync>;

pub struct Topics {
    pub incoming_payloads: Topic<Bytes>,
    pub unprocessed_payloads: Topic<UnprocessedPayload>,
    pub incoming_packets: Topic<IncomingPacket>,
    pub outgoing_packets: Topic<Arc<Packet>>,
    pub frame_queue: Topic<QueuedFrame>,
    pub encryption_levels_available: Topic<DirectionalLevel>,
    pub ecn_status: Topic<EcnCodepoint>,
    pub handshake_status: Topic<HandshakeStatus>,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            incoming_payloads: Topic::new("incoming-payloads", PACKET_TOPIC_CAPACITY),
            unprocessed_payloads: Topic::new("unprocessed-payloads", PACKET_TOPIC_CAPACITY),
            incoming_packets: Topic::new("incoming-packets", PACKET_TOPIC_CAPACITY),
            outgoing_packets: Topic::new("outgoing-packets", PACKET_TOPIC_CAPACITY),
            frame_queue: Topic::new("frame-queue", PACKET_TOPIC_CAPACITY),
            encryption_levels_available: Topic::new("encryption-levels", EVENT_TOPIC_CAPACITY),
            ecn_status: Topic::new("ecn-status", PACKET_TOPIC_CAPACITY),
            handshake_status: Topic::new("handshake-status", EVENT_TOPIC_CAPACITY),
        }
    }
}

/// A sent packet awaiting acknowledgment.
#[derive(Clone, Debug)]
pub struct SentPacket {
    pub frames: Vec<Frame>,
    pub level: EncryptionLevel,
    pub sent_at: Instant,
}

/// Per packet-number-space state.
pub struct SpaceState {
    next_pn: AtomicU64,
    largest_received: AtomicU64,
    largest_acked: AtomicU64,
    unacked: Mutex<BTreeMap<u64, SentPacket>>,
}

impl Default for SpaceState {
    fn default() -> Self {
        Self {
            next_pn: AtomicU64::new(0),
            largest_received: AtomicU64::new(NO_PN),
            largest_acked: AtomicU64::new(NO_PN),
            unacked: Mutex::new(BTreeMap::new()),
        }
    }
}

#[derive(Debug, Default)]
struct CryptoStream {
    // received segments: offset -> bytes
    segments: BTreeMap<u64, Bytes>,
    read_offset: u64,
    write_offset: u64,
}

#[derive(Debug)]
pub enum SendError {
    KeysUnavailable(EncryptionLevel),
    InvalidLevel(EncryptionLevel),
    Crypto(crypto::CryptoError),
    Tls(TlsError),
    SocketGone,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::KeysUnavailable(level) => write!(f, "no write keys for level {level}"),
            Self::InvalidLevel(level) => write!(f, "cannot encode a packet at level {level}"),
            Self::Crypto(error) => write!(f, "{error}"),
            Self::Tls(error) => write!(f, "{error}"),
            Self::SocketGone => write!(f, "socket egress channel is closed"),
        }
    }
}

impl std::error::Error for SendError {}

impl From<crypto::CryptoError> for SendError {
    fn from(error: crypto::CryptoError) -> Self {
        Self::Crypto(error)
    }
}

impl From<TlsError> for SendError {
    fn from(error: TlsError) -> Self {
        Self::Tls(error)
    }
}

pub struct Connection {
    pub original_destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    destination_cid: Mutex<ConnectionId>,
    version: AtomicU32,
    token: Mutex<Bytes>,

    crypto_states: [RwLock<CryptoState>; 4],
    pub spaces: [SpaceState; PnSpace::COUNT],
    crypto_streams: [Mutex<CryptoStream>; PnSpace::COUNT],
    pub streams: Streams,

    pub local_parameters: Mutex<TransportParameters>,
    pub peer_parameters: Mutex<Option<TransportParameters>>,

    pub topics: Topics,
    pub rtt: Mutex<RttEstimator>,

    mtu: u16,
    egress: mpsc::Sender<Bytes>,
    egress_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    udp: Mutex<Option<UdpSocket>>,

    tls: Mutex<Box<dyn TlsEngine>>,
    tls_started: AtomicBool,
    initial_flight: Mutex<Bytes>,

    received_packet_handler: Mutex<Option<ReceivedPacketHandler>>,
    packet_ids: AtomicU64,
}

impl Connection {
    /// Binds a UDP socket towards `peer`, picks random connection IDs
    /// and installs the Initial keys derived from the destination
    /// connection ID.
    pub async fn connect(
        peer: SocketAddr,
        tls: Box<dyn TlsEngine>,
    ) -> std::io::Result<Arc<Self>> {
        let local: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;

        let destination_cid = random_connection_id(8);
        let source_cid = random_connection_id(8);

        Ok(Self::with_socket(socket, destination_cid, source_cid, tls))
    }

    /// Builds a connection over an already-connected socket; used by
    /// `connect` and by loopback tests.
    pub fn with_socket(
        socket: UdpSocket,
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        tls: Box<dyn TlsEngine>,
    ) -> Arc<Self> {
        let (egress, egress_rx) = mpsc::channel(PACKET_TOPIC_CAPACITY);

        let mut local_parameters = TransportParameters::default();
        local_parameters.initial_source_connection_id = Some(source_cid);

        let conn = Self {
            original_destination_cid: destination_cid,
            source_cid,
            destination_cid: Mutex::new(destination_cid),
            version: AtomicU32::new(version::QUIC_V1),
            token: Mutex::new(Bytes::new()),
            crypto_states: Default::default(),
            spaces: Default::default(),
            crypto_streams: Default::default(),
            streams: Streams::default(),
            local_parameters: Mutex::new(local_parameters),
            peer_parameters: Mutex::new(None),
            topics: Topics::default(),
            rtt: Mutex::new(RttEstimator::default()),
            mtu: DEFAULT_MTU,
            egress,
            egress_rx: Mutex::new(Some(egress_rx)),
            udp: Mutex::new(Some(socket)),
            tls: Mutex::new(tls),
            tls_started: AtomicBool::new(false),
            initial_flight: Mutex::new(Bytes::new()),
            received_packet_handler: Mutex::new(None),
            packet_ids: AtomicU64::new(0),
        };
        conn.install_initial_keys();
        Arc::new(conn)
    }

    #[inline]
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn destination_cid(&self) -> ConnectionId {
        *self.destination_cid.lock().unwrap()
    }

    pub fn set_destination_cid(&self, cid: ConnectionId) {
        *self.destination_cid.lock().unwrap() = cid;
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::Release);
    }

    pub fn token(&self) -> Bytes {
        self.token.lock().unwrap().clone()
    }

    pub fn set_token(&self, token: Bytes) {
        *self.token.lock().unwrap() = token;
    }

    pub fn set_received_packet_handler(&self, handler: ReceivedPacketHandler) {
        *self.received_packet_handler.lock().unwrap() = Some(handler);
    }

    pub(crate) fn invoke_received_packet_handler(&self, cleartext: &[u8], id: u64) {
        if let Some(handler) = self.received_packet_handler.lock().unwrap().as_ref() {
            handler(cleartext, id);
        }
    }

    pub(crate) fn next_packet_id(&self) -> u64 {
        self.packet_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn take_socket(&self) -> Option<UdpSocket> {
        self.udp.lock().unwrap().take()
    }

    pub(crate) fn take_egress(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.egress_rx.lock().unwrap().take()
    }

    #[cfg(test)]
    pub(crate) fn egress_sender(&self) -> mpsc::Sender<Bytes> {
        self.egress.clone()
    }

    // === crypto states ===

    /// (Re-)derives the Initial keys from the current destination
    /// connection ID; called at creation and again after a Retry.
    pub fn install_initial_keys(&self) {
        let dcid = self.destination_cid();
        let (write, read) = crypto::initial::client_initial_keys(dcid.as_bytes())
            .expect("initial key schedule never fails");
        let mut state = self.crypto_states[0].write().unwrap();
        state.write = Some(write);
        state.read = Some(read);
    }

    /// Installs one direction of one level. Later installs for an
    /// already-keyed direction are ignored; states are immutable once
    /// created.
    pub fn install_keys(&self, level: EncryptionLevel, direction: Direction, keys: Keys) {
        let Some(index) = level.index() else { return };
        let mut state = self.crypto_states[index].write().unwrap();
        let slot = match direction {
            Direction::Read => &mut state.read,
            Direction::Write => &mut state.write,
        };
        if slot.is_none() {
            *slot = Some(keys);
        }
    }

    pub fn read_keys(&self, level: EncryptionLevel) -> Option<Keys> {
        let index = level.index()?;
        self.crypto_states[index].read().unwrap().read.clone()
    }

    pub fn write_keys(&self, level: EncryptionLevel) -> Option<Keys> {
        let index = level.index()?;
        self.crypto_states[index].read().unwrap().write.clone()
    }

    // === packet-number spaces ===

    pub fn largest_received(&self, space: PnSpace) -> Option<u64> {
        match self.spaces[space.index()].largest_received.load(Ordering::Acquire) {
            NO_PN => None,
            pn => Some(pn),
        }
    }

    /// Parsing-agent only: raises `largest_received` if `pn` exceeds it.
    pub(crate) fn record_received(&self, space: PnSpace, pn: u64) {
        let slot = &self.spaces[space.index()].largest_received;
        let mut current = slot.load(Ordering::Acquire);
        while current == NO_PN || pn > current {
            match slot.compare_exchange(current, pn, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn largest_acked(&self, space: PnSpace) -> Option<u64> {
        match self.spaces[space.index()].largest_acked.load(Ordering::Acquire) {
            NO_PN => None,
            pn => Some(pn),
        }
    }

    /// Removes acknowledged packet numbers from the unacked set and
    /// advances `largest_acked`.
    pub(crate) fn on_ack_received(&self, space: PnSpace, ack: &quic_probe_core::frame::Ack) {
        let state = &self.spaces[space.index()];

        let slot = &state.largest_acked;
        let largest = ack.largest_acknowledged();
        let mut current = slot.load(Ordering::Acquire);
        while current == NO_PN || largest > current {
            match slot.compare_exchange(current, largest, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        let mut unacked = state.unacked.lock().unwrap();
        for range in ack.ranges.iter() {
            let acked: Vec<u64> = unacked
                .range(range.clone())
                .map(|(&pn, _)| pn)
                .collect();
            for pn in acked {
                unacked.remove(&pn);
            }
        }
    }

    pub fn unacked_packets(&self, space: PnSpace) -> Vec<(u64, SentPacket)> {
        self.spaces[space.index()]
            .unacked
            .lock()
            .unwrap()
            .iter()
            .map(|(&pn, packet)| (pn, packet.clone()))
            .collect()
    }

    /// Recovery-agent only: removes and returns unacked packets sent
    /// before `cutoff`.
    pub(crate) fn take_expired_unacked(
        &self,
        space: PnSpace,
        cutoff: Instant,
    ) -> Vec<(u64, SentPacket)> {
        let mut unacked = self.spaces[space.index()].unacked.lock().unwrap();
        let expired: Vec<u64> = unacked
            .iter()
            .filter(|(_, packet)| packet.sent_at <= cutoff)
            .map(|(&pn, _)| pn)
            .collect();
        expired
            .into_iter()
            .filter_map(|pn| unacked.remove(&pn).map(|packet| (pn, packet)))
            .collect()
    }

    // === crypto streams ===

    /// Parsing-agent only: stores CRYPTO bytes received at `space`.
    pub(crate) fn crypto_stream_push(&self, space: PnSpace, offset: u64, data: Bytes) {
        let mut stream = self.crypto_streams[space.index()].lock().unwrap();
        let end = offset + data.len() as u64;
        if end > stream.read_offset && !data.is_empty() {
            stream.segments.entry(offset).or_insert(data);
        }
    }

    /// TLS-agent only: drains the next contiguous run of crypto-stream
    /// bytes, if any.
    pub(crate) fn crypto_stream_take(&self, space: PnSpace) -> Option<Vec<u8>> {
        let mut stream = self.crypto_streams[space.index()].lock().unwrap();
        let mut out = Vec::new();
        while let Some((&offset, _)) = stream.segments.iter().next() {
            if offset > stream.read_offset {
                break;
            }
            let data = stream.segments.remove(&offset).unwrap();
            let skip = (stream.read_offset - offset) as usize;
            if skip < data.len() {
                out.extend_from_slice(&data[skip..]);
                stream.read_offset = offset + data.len() as u64;
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Reserves `len` bytes on the write side of a crypto stream and
    /// returns their offset.
    pub(crate) fn crypto_stream_reserve(&self, space: PnSpace, len: u64) -> u64 {
        let mut stream = self.crypto_streams[space.index()].lock().unwrap();
        let offset = stream.write_offset;
        stream.write_offset += len;
        offset
    }

    // === TLS engine access ===

    pub(crate) fn with_tls_engine<R>(
        &self,
        f: impl FnOnce(&mut dyn TlsEngine) -> R,
    ) -> R {
        let mut engine = self.tls.lock().unwrap();
        f(engine.as_mut())
    }

    /// Runs the engine's first flight once and caches the ClientHello
    /// for retransmission after Retry or Version Negotiation.
    fn start_tls(&self) -> Result<TlsOutput, TlsError> {
        let params = self.local_parameters.lock().unwrap().encode_client();
        let output = self.with_tls_engine(|engine| engine.start(&params))?;
        self.tls_started.store(true, Ordering::Release);
        if let Some((_, bytes)) = output
            .flights
            .iter()
            .find(|(level, _)| *level == EncryptionLevel::Initial)
        {
            *self.initial_flight.lock().unwrap() = bytes.clone();
        }
        Ok(output)
    }

    // === outbound edge ===

    /// Builds the client's first Initial packet, starting the TLS engine
    /// if needed.
    pub fn initial_packet(&self) -> Result<Framer, SendError> {
        let flight = if self.tls_started.load(Ordering::Acquire) {
            self.initial_flight.lock().unwrap().clone()
        } else {
            let output = self.start_tls()?;
            for (level, _) in &output.flights {
                debug_assert_eq!(*level, EncryptionLevel::Initial);
            }
            self.initial_flight.lock().unwrap().clone()
        };

        let offset = if self.crypto_streams[0].lock().unwrap().write_offset == 0 {
            self.crypto_stream_reserve(PnSpace::Initial, flight.len() as u64)
        } else {
            // retransmission of the same flight
            0
        };

        let mut framer = Framer::new(PacketType::Initial);
        framer.frames.push(
            Crypto {
                offset: VarInt::new(offset).unwrap_or(VarInt::ZERO),
                data: flight,
            }
            .into(),
        );
        Ok(framer)
    }

    /// Builds a STREAM frame for the next write offset of `stream_id`.
    pub fn stream_frame(&self, stream_id: u64, data: Vec<u8>, fin: bool) -> Frame {
        let offset = self.streams.write_reserve(stream_id, data.len() as u64, fin);
        quic_probe_core::frame::Stream {
            stream_id: VarInt::new(stream_id).expect("stream id fits a varint"),
            offset: VarInt::new(offset).expect("stream offset fits a varint"),
            is_fin: fin,
            data: Bytes::from(data),
        }
        .into()
    }

    /// Submits a CONNECTION_CLOSE (quic layer) or APPLICATION_CLOSE
    /// frame for bundling.
    pub fn close_connection(&self, quic_layer: bool, error_code: u64, reason: &str) {
        let error_code = VarInt::saturating(error_code);
        let frame = if quic_layer {
            ConnectionClose::quic_layer(quic_probe_core::transport::Error(error_code), reason)
        } else {
            ConnectionClose::application(error_code, reason)
        };
        self.topics.frame_queue.submit(QueuedFrame {
            frame: frame.into(),
            level: EncryptionLevel::Best,
        });
    }

    /// Encodes and transmits one framer at `level`: assigns the packet
    /// number, seals the payload, applies header protection, pads
    /// Initial datagrams to the MTU, records the packet for recovery and
    /// publishes it on the outgoing topic.
    pub fn send_packet(&self, mut framer: Framer, level: EncryptionLevel) -> Result<u64, SendError> {
        if level.is_sentinel() || level == EncryptionLevel::None {
            return Err(SendError::InvalidLevel(level));
        }
        let space = level.pn_space().expect("real levels have a space");
        let keys = self
            .write_keys(level)
            .ok_or(SendError::KeysUnavailable(level))?;

        framer.header.version = self.version();
        framer.header.destination_cid = self.destination_cid();
        framer.header.source_cid = self.source_cid;
        if framer.packet_type == PacketType::Initial {
            framer.header.token = self.token();
        }

        let pn = self.spaces[space.index()].next_pn.fetch_add(1, Ordering::AcqRel);
        framer.header.packet_number = pn;

        let largest_acked = self.largest_acked(space);
        let mut bytes = encode::encode_framer(&framer, &keys, largest_acked)?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
        //# A client MUST expand the payload of all UDP datagrams carrying
        //# Initial packets to at least the smallest allowed maximum datagram
        //# size of 1200 bytes
        if framer.packet_type == PacketType::Initial {
            let mtu = self.mtu as usize;
            let mut guard = 0;
            while bytes.len() < mtu && guard < 4 {
                let missing = mtu - bytes.len();
                match framer.frames.last_mut() {
                    Some(Frame::Padding(padding)) => padding.length += missing,
                    _ => framer
                        .frames
                        .push(quic_probe_core::frame::Padding { length: missing }.into()),
                }
                bytes = encode::encode_framer(&framer, &keys, largest_acked)?;
                guard += 1;
            }
            if bytes.len() > mtu {
                // the length-field varint grew; shrink the padding back
                if let Some(Frame::Padding(padding)) = framer.frames.last_mut() {
                    padding.length = padding.length.saturating_sub(bytes.len() - mtu);
                    bytes = encode::encode_framer(&framer, &keys, largest_acked)?;
                }
            }
        }

        if framer.frames.iter().any(Frame::is_retransmittable) {
            self.spaces[space.index()].unacked.lock().unwrap().insert(
                pn,
                SentPacket {
                    frames: framer.frames.clone(),
                    level,
                    sent_at: Instant::now(),
                },
            );
        }

        tracing::debug!(
            packet = %Packet::Framer(framer.clone()).short_string(),
            level = %level,
            len = bytes.len(),
            "sending packet"
        );

        self.egress
            .try_send(Bytes::from(bytes))
            .map_err(|_| SendError::SocketGone)?;
        self.topics
            .outgoing_packets
            .submit(Arc::new(Packet::Framer(framer)));

        Ok(pn)
    }

    /// Rebuilds and resends the first Initial flight; used after Retry
    /// and after version renegotiation.
    pub fn resend_initial(&self) -> Result<u64, SendError> {
        let flight = self.initial_flight.lock().unwrap().clone();
        let mut framer = Framer::new(PacketType::Initial);
        framer.frames.push(
            Crypto {
                offset: VarInt::ZERO,
                data: flight,
            }
            .into(),
        );
        self.send_packet(framer, EncryptionLevel::Initial)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("odcid", &self.original_destination_cid)
            .field("scid", &self.source_cid)
            .field("dcid", &self.destination_cid())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

pub fn random_connection_id(len: usize) -> ConnectionId {
    use rand::RngCore;
    let mut bytes = [0u8; quic_probe_core::connection_id::MAX_LEN];
    rand::thread_rng().fill_bytes(&mut bytes[..len]);
    ConnectionId::try_from(&bytes[..len]).expect("length is in range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_connection;

    #[tokio::test]
    async fn initial_keys_are_installed_at_creation() {
        let conn = test_connection().await;
        assert!(conn.write_keys(EncryptionLevel::Initial).is_some());
        assert!(conn.read_keys(EncryptionLevel::Initial).is_some());
        assert!(conn.write_keys(EncryptionLevel::OneRtt).is_none());
    }

    #[tokio::test]
    async fn send_packet_assigns_monotonic_packet_numbers() {
        let conn = test_connection().await;
        let mut outgoing = conn.topics.outgoing_packets.subscribe();

        for expected in 0..3u64 {
            let mut framer = Framer::new(PacketType::Initial);
            framer.frames.push(quic_probe_core::frame::Ping.into());
            let pn = conn.send_packet(framer, EncryptionLevel::Initial).unwrap();
            assert_eq!(pn, expected);

            let packet = crate::broadcast::next(&mut outgoing, "outgoing").await.unwrap();
            assert_eq!(packet.packet_number(), Some(expected));
        }
    }

    #[tokio::test]
    async fn initial_datagrams_are_padded_to_the_mtu() {
        let conn = test_connection().await;
        let mut egress = conn.take_egress().unwrap();

        let mut framer = Framer::new(PacketType::Initial);
        framer.frames.push(quic_probe_core::frame::Ping.into());
        conn.send_packet(framer, EncryptionLevel::Initial).unwrap();

        let datagram = egress.recv().await.unwrap();
        assert_eq!(datagram.len(), DEFAULT_MTU as usize);
    }

    #[tokio::test]
    async fn sending_without_keys_is_refused() {
        let conn = test_connection().await;
        let mut framer = Framer::new(PacketType::Short);
        framer.frames.push(quic_probe_core::frame::Ping.into());
        assert!(matches!(
            conn.send_packet(framer, EncryptionLevel::OneRtt),
            Err(SendError::KeysUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn retransmittable_packets_are_recorded_until_acked() {
        let conn = test_connection().await;

        let mut framer = Framer::new(PacketType::Initial);
        framer.frames.push(quic_probe_core::frame::Ping.into());
        let pn = conn.send_packet(framer, EncryptionLevel::Initial).unwrap();
        assert_eq!(conn.unacked_packets(PnSpace::Initial).len(), 1);

        let ack = quic_probe_core::frame::Ack::new(
            [pn].into_iter().collect(),
            VarInt::ZERO,
            None,
        )
        .unwrap();
        conn.on_ack_received(PnSpace::Initial, &ack);
        assert!(conn.unacked_packets(PnSpace::Initial).is_empty());
        assert_eq!(conn.largest_acked(PnSpace::Initial), Some(pn));
    }

    #[tokio::test]
    async fn crypto_stream_reassembles_out_of_order_segments() {
        let conn = test_connection().await;
        conn.crypto_stream_push(PnSpace::Initial, 5, Bytes::from_static(b"world"));
        assert!(conn.crypto_stream_take(PnSpace::Initial).is_none());

        conn.crypto_stream_push(PnSpace::Initial, 0, Bytes::from_static(b"hello"));
        assert_eq!(
            conn.crypto_stream_take(PnSpace::Initial).unwrap(),
            b"helloworld"
        );
        assert!(conn.crypto_stream_take(PnSpace::Initial).is_none());
    }
}
