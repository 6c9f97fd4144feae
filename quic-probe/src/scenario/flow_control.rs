// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Opens with a tiny stream flow-control window, lets the peer fill it,
//! then raises the limits and checks the peer resumes sending.

use crate::{
    broadcast,
    connection::{Connection, QueuedFrame},
    trace::Trace,
};
use quic_probe_core::{
    crypto::EncryptionLevel,
    frame::{MaxData, MaxStreamData},
    varint::VarInt,
};
use std::sync::Arc;
use tokio::time::Instant;

pub const FC_TLS_HANDSHAKE_FAILED: u8 = 1;
pub const FC_HOST_SENT_MORE_THAN_LIMIT: u8 = 2;
pub const FC_HOST_DID_NOT_RESUME_SENDING: u8 = 3;
pub const FC_NOT_ENOUGH_DATA_AVAILABLE: u8 = 4;

const INITIAL_WINDOW: u64 = 80;

pub(super) async fn run(
    conn: Arc<Connection>,
    trace: &mut Trace,
    preferred_path: &str,
    deadline: Instant,
) {
    {
        let mut params = conn.local_parameters.lock().unwrap();
        params.initial_max_stream_data_bidi_local = VarInt::new(INITIAL_WINDOW).unwrap();
        params.initial_max_data = VarInt::new(INITIAL_WINDOW).unwrap();
    }

    let Some(mut agents) =
        super::complete_handshake(&conn, trace, FC_TLS_HANDSHAKE_FAILED, deadline).await
    else {
        return;
    };

    let mut packets = conn.topics.incoming_packets.subscribe();
    conn.send_http_get(preferred_path, 0);

    let mut window = INITIAL_WINDOW;
    let mut raised = false;

    loop {
        let received =
            tokio::time::timeout_at(deadline, broadcast::next(&mut packets, "incoming-packets"))
                .await;
        let Ok(Some(incoming)) = received else { break };

        let stream = conn.streams.get(0);
        if stream.read_offset > window {
            trace.mark_error(FC_HOST_SENT_MORE_THAN_LIMIT, "", Some(&incoming.packet));
        }
        if stream.read_closed {
            break;
        }

        if stream.read_offset == window && !raised {
            // the peer honored the window; double both limits and see
            // whether it resumes
            let (max_data, max_stream_data) = {
                let mut params = conn.local_parameters.lock().unwrap();
                let max_data = VarInt::new(params.initial_max_data.as_u64() * 2).unwrap();
                let max_stream_data =
                    VarInt::new(params.initial_max_stream_data_bidi_local.as_u64() * 2).unwrap();
                params.initial_max_data = max_data;
                params.initial_max_stream_data_bidi_local = max_stream_data;
                (max_data, max_stream_data)
            };
            conn.topics.frame_queue.submit(QueuedFrame {
                frame: MaxData {
                    maximum_data: max_data,
                }
                .into(),
                level: EncryptionLevel::OneRtt,
            });
            conn.topics.frame_queue.submit(QueuedFrame {
                frame: MaxStreamData {
                    stream_id: VarInt::ZERO,
                    maximum_stream_data: max_stream_data,
                }
                .into(),
                level: EncryptionLevel::OneRtt,
            });
            window = max_stream_data.as_u64();
            raised = true;
        }
    }

    let read_offset = conn.streams.get(0).read_offset;
    trace.set_result("final_read_offset", read_offset);
    if read_offset == window {
        trace.error_code = 0;
    } else if raised && read_offset == window / 2 {
        trace.mark_error(FC_HOST_DID_NOT_RESUME_SENDING, "", None);
    } else if read_offset < window {
        trace.mark_error(FC_NOT_ENOUGH_DATA_AVAILABLE, "", None);
    } else {
        trace.mark_error(FC_HOST_SENT_MORE_THAN_LIMIT, "", None);
    }

    agents.close_connection(false, 0, "").await;
}
