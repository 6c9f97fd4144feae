// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP/0.9-style request helper used by scenarios that need the peer
//! to actually serve something.

use crate::connection::{Connection, QueuedFrame};
use quic_probe_core::crypto::EncryptionLevel;

impl Connection {
    /// Queues `GET <path>\r\n` with FIN on `stream_id`, at the best
    /// available application-data level.
    pub fn send_http_get(&self, path: &str, stream_id: u64) {
        let request = format!("GET {path}\r\n");
        tracing::debug!(stream_id, path, "queueing http request");
        let frame = self.stream_frame(stream_id, request.into_bytes(), true);
        self.topics.frame_queue.submit(QueuedFrame {
            frame,
            level: EncryptionLevel::BestAppData,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast;
    use crate::test_support::test_connection;
    use quic_probe_core::frame::Frame;

    #[tokio::test]
    async fn request_rides_a_fin_stream_frame() {
        let conn = test_connection().await;
        let mut queue = conn.topics.frame_queue.subscribe();

        conn.send_http_get("/index.html", 0);

        let queued = broadcast::next(&mut queue, "frame-queue").await.unwrap();
        assert_eq!(queued.level, EncryptionLevel::BestAppData);
        match queued.frame {
            Frame::Stream(stream) => {
                assert_eq!(stream.stream_id.as_u64(), 0);
                assert_eq!(&stream.data[..], b"GET /index.html\r\n");
                assert!(stream.is_fin);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(conn.streams.get(0).write_offset, 17);
        assert!(conn.streams.get(0).write_closed);
    }
}
