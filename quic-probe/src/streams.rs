// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stream bookkeeping.
//!
//! The probe does not deliver stream payloads to an application; it
//! tracks offsets so that scenarios can observe how far the peer got.
//! `read_offset` advances only over contiguous data, and a stream is
//! read-closed once FIN is seen and everything up to the final size has
//! arrived.

use quic_probe_core::frame;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// What scenarios get to see about one stream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StreamState {
    pub read_offset: u64,
    pub read_closed: bool,
    pub write_offset: u64,
    pub write_closed: bool,
}

#[derive(Debug, Default)]
struct StreamEntry {
    // received segments not yet covered by read_offset: offset -> end
    segments: BTreeMap<u64, u64>,
    read_offset: u64,
    fin_offset: Option<u64>,
    write_offset: u64,
    write_closed: bool,
}

impl StreamEntry {
    fn advance(&mut self) {
        while let Some((&offset, &end)) = self.segments.iter().next() {
            if offset > self.read_offset {
                break;
            }
            self.segments.remove(&offset);
            self.read_offset = self.read_offset.max(end);
        }
    }

    fn read_closed(&self) -> bool {
        self.fin_offset
            .map(|fin| self.read_offset >= fin)
            .unwrap_or(false)
    }

    fn state(&self) -> StreamState {
        StreamState {
            read_offset: self.read_offset,
            read_closed: self.read_closed(),
            write_offset: self.write_offset,
            write_closed: self.write_closed,
        }
    }
}

/// Stream map of one connection. Streams come into existence on first
/// reference.
#[derive(Debug, Default)]
pub struct Streams {
    map: Mutex<HashMap<u64, StreamEntry>>,
}

impl Streams {
    pub fn get(&self, stream_id: u64) -> StreamState {
        let mut map = self.map.lock().unwrap();
        map.entry(stream_id).or_default().state()
    }

    /// Applies a received STREAM frame to the read half.
    pub(crate) fn on_stream_frame(&self, frame: &frame::Stream) {
        let mut map = self.map.lock().unwrap();
        let entry = map.entry(frame.stream_id.as_u64()).or_default();

        let offset = frame.offset.as_u64();
        let end = offset + frame.data.len() as u64;
        if frame.is_fin {
            entry.fin_offset = Some(end);
        }
        if end > entry.read_offset {
            let slot = entry.segments.entry(offset).or_insert(end);
            *slot = (*slot).max(end);
        }
        entry.advance();
    }

    /// Reserves `len` bytes on the write half and returns the offset the
    /// data starts at.
    pub(crate) fn write_reserve(&self, stream_id: u64, len: u64, fin: bool) -> u64 {
        let mut map = self.map.lock().unwrap();
        let entry = map.entry(stream_id).or_default();
        let offset = entry.write_offset;
        entry.write_offset += len;
        if fin {
            entry.write_closed = true;
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quic_probe_core::VarInt;

    fn stream_frame(id: u64, offset: u64, data: &'static [u8], fin: bool) -> frame::Stream {
        frame::Stream {
            stream_id: VarInt::new(id).unwrap(),
            offset: VarInt::new(offset).unwrap(),
            is_fin: fin,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn contiguous_delivery_advances_read_offset() {
        let streams = Streams::default();
        streams.on_stream_frame(&stream_frame(0, 0, b"hello", false));
        assert_eq!(streams.get(0).read_offset, 5);

        streams.on_stream_frame(&stream_frame(0, 5, b" world", true));
        let state = streams.get(0);
        assert_eq!(state.read_offset, 11);
        assert!(state.read_closed);
    }

    #[test]
    fn out_of_order_segments_wait_for_the_gap() {
        let streams = Streams::default();
        streams.on_stream_frame(&stream_frame(0, 5, b"world", false));
        assert_eq!(streams.get(0).read_offset, 0);

        streams.on_stream_frame(&stream_frame(0, 0, b"hello", false));
        assert_eq!(streams.get(0).read_offset, 10);
    }

    #[test]
    fn fin_first_reordering_still_closes() {
        let streams = Streams::default();
        // empty FIN at offset 5 arrives before the data
        streams.on_stream_frame(&stream_frame(0, 5, b"", true));
        assert!(!streams.get(0).read_closed);

        streams.on_stream_frame(&stream_frame(0, 0, b"GET /", false));
        let state = streams.get(0);
        assert_eq!(state.read_offset, 5);
        assert!(state.read_closed);
    }

    #[test]
    fn write_reservation_tracks_offsets() {
        let streams = Streams::default();
        assert_eq!(streams.write_reserve(4, 10, false), 0);
        assert_eq!(streams.write_reserve(4, 5, true), 10);
        let state = streams.get(4);
        assert_eq!(state.write_offset, 15);
        assert!(state.write_closed);
    }

    #[test]
    fn duplicate_and_overlapping_segments_are_idempotent() {
        let streams = Streams::default();
        streams.on_stream_frame(&stream_frame(0, 0, b"abcde", false));
        streams.on_stream_frame(&stream_frame(0, 0, b"abc", false));
        streams.on_stream_frame(&stream_frame(0, 3, b"defg", false));
        assert_eq!(streams.get(0).read_offset, 7);
    }
}
