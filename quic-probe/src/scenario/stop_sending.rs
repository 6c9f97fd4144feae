// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sends STOP_SENDING on our own receive side of a unidirectional
//! request stream; the peer must close the connection with
//! STREAM_STATE_ERROR.

use crate::{
    broadcast,
    connection::{Connection, QueuedFrame},
    trace::Trace,
};
use quic_probe_core::{
    crypto::EncryptionLevel,
    frame::StopSending,
    transport,
    varint::VarInt,
};
use std::sync::Arc;
use tokio::time::Instant;

pub const SSRS_TLS_HANDSHAKE_FAILED: u8 = 1;
pub const SSRS_DID_NOT_CLOSE_THE_CONNECTION: u8 = 2;
pub const SSRS_CLOSE_THE_CONNECTION_WITH_WRONG_ERROR: u8 = 3;
pub const SSRS_MAX_STREAM_UNI_TOO_LOW: u8 = 4;

const REQUEST_STREAM: u64 = 2;

pub(super) async fn run(
    conn: Arc<Connection>,
    trace: &mut Trace,
    preferred_path: &str,
    deadline: Instant,
) {
    let Some(mut agents) =
        super::complete_handshake(&conn, trace, SSRS_TLS_HANDSHAKE_FAILED, deadline).await
    else {
        return;
    };

    let max_uni = conn
        .peer_parameters
        .lock()
        .unwrap()
        .as_ref()
        .map(|params| params.initial_max_streams_uni.as_u64())
        .unwrap_or(0);
    if max_uni == 0 {
        trace.mark_error(SSRS_MAX_STREAM_UNI_TOO_LOW, "", None);
        agents.close_connection(false, 0, "").await;
        return;
    }

    let mut packets = conn.topics.incoming_packets.subscribe();

    conn.send_http_get(preferred_path, REQUEST_STREAM);
    conn.topics.frame_queue.submit(QueuedFrame {
        frame: StopSending {
            stream_id: VarInt::new(REQUEST_STREAM).unwrap(),
            application_error_code: VarInt::ZERO,
        }
        .into(),
        level: EncryptionLevel::OneRtt,
    });

    trace.error_code = SSRS_DID_NOT_CLOSE_THE_CONNECTION;

    loop {
        let received =
            tokio::time::timeout_at(deadline, broadcast::next(&mut packets, "incoming-packets"))
                .await;
        let Ok(Some(incoming)) = received else { break };
        let Some(framer) = incoming.packet.as_framer() else { continue };
        let Some(close) = framer.connection_close() else { continue };

        if close.error_code == transport::Error::STREAM_STATE_ERROR.0 {
            trace.error_code = 0;
        } else {
            let detail = format!(
                "expected 0x{:02x}, got 0x{:02x}",
                transport::Error::STREAM_STATE_ERROR.code(),
                close.error_code.as_u64()
            );
            trace.mark_error(
                SSRS_CLOSE_THE_CONNECTION_WITH_WRONG_ERROR,
                &detail,
                Some(&incoming.packet),
            );
            trace.set_result(
                "connection_closed_error_code",
                format!("0x{:x}", close.error_code.as_u64()),
            );
        }
        break;
    }

    agents.close_connection(false, 0, "").await;
}
