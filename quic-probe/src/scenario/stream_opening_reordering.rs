// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Delivers the FIN of the request stream before its data; the peer
//! must reassemble and answer anyway.

use crate::{connection::Connection, trace::Trace};
use quic_probe_core::{
    crypto::EncryptionLevel,
    packet::{Framer, PacketType},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const SOR_TLS_HANDSHAKE_FAILED: u8 = 1;
pub const SOR_HOST_DID_NOT_RESPOND: u8 = 2;

pub(super) async fn run(
    conn: Arc<Connection>,
    trace: &mut Trace,
    preferred_path: &str,
    deadline: Instant,
) {
    let Some(mut agents) =
        super::complete_handshake(&conn, trace, SOR_TLS_HANDSHAKE_FAILED, deadline).await
    else {
        return;
    };

    // let the bundler finish the handshake tail before we bypass it
    tokio::time::sleep(Duration::from_millis(20)).await;

    let request = format!("GET {preferred_path}\r\n");

    // build in stream order, send in reverse
    let mut data_packet = Framer::new(PacketType::Short);
    data_packet
        .frames
        .push(conn.stream_frame(0, request.into_bytes(), false));

    let mut fin_packet = Framer::new(PacketType::Short);
    fin_packet.frames.push(conn.stream_frame(0, Vec::new(), true));

    for (label, packet) in [("fin", fin_packet), ("data", data_packet)] {
        if let Err(error) = conn.send_packet(packet, EncryptionLevel::OneRtt) {
            trace.mark_error(SOR_TLS_HANDSHAKE_FAILED, &error.to_string(), None);
            tracing::error!(%error, label, "could not send reordered packet");
            agents.stop_all().await;
            return;
        }
    }

    tokio::time::sleep_until(deadline).await;

    if !conn.streams.get(0).read_closed {
        trace.mark_error(SOR_HOST_DID_NOT_RESPOND, "", None);
    }
    trace.set_result("response_read_offset", conn.streams.get(0).read_offset);

    agents.close_connection(false, 0, "").await;
}
