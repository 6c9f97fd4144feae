// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Retires every connection ID the peer hands out and checks that the
//! peer keeps supplying fresh ones.

use crate::{
    broadcast,
    connection::{Connection, QueuedFrame},
    trace::Trace,
};
use quic_probe_core::{
    crypto::EncryptionLevel,
    frame::RetireConnectionId,
    packet::PacketType,
};
use std::sync::Arc;
use tokio::time::Instant;

pub const RCI_TLS_HANDSHAKE_FAILED: u8 = 1;
pub const RCI_HOST_DID_NOT_PROVIDE_CID: u8 = 2;
pub const RCI_HOST_DID_NOT_PROVIDE_NEW_CID: u8 = 3;
pub const RCI_HOST_SENT_INVALID_CID_LENGTH: u8 = 4;

const MIN_CID_LEN: usize = 4;
const MAX_CID_LEN: usize = 18;

pub(super) async fn run(conn: Arc<Connection>, trace: &mut Trace, deadline: Instant) {
    let mut packets = conn.topics.incoming_packets.subscribe();

    let Some(mut agents) =
        super::complete_handshake(&conn, trace, RCI_TLS_HANDSHAKE_FAILED, deadline).await
    else {
        return;
    };

    trace.error_code = RCI_HOST_DID_NOT_PROVIDE_CID;

    let mut alternative_cids: Vec<String> = Vec::new();
    let mut has_retired = false;

    loop {
        let received =
            tokio::time::timeout_at(deadline, broadcast::next(&mut packets, "incoming-packets"))
                .await;
        let Ok(Some(incoming)) = received else { break };
        let Some(framer) = incoming.packet.as_framer() else { continue };
        if framer.packet_type != PacketType::Short {
            continue;
        }

        let mut saw_new_cid = false;
        for frame in framer.new_connection_id_frames() {
            saw_new_cid = true;
            let len = frame.connection_id.len();
            if !(MIN_CID_LEN..=MAX_CID_LEN).contains(&len) {
                let detail = format!(
                    "connection ID length must be comprised between {MIN_CID_LEN} and {MAX_CID_LEN}, it was {len}"
                );
                trace.mark_error(
                    RCI_HOST_SENT_INVALID_CID_LENGTH,
                    &detail,
                    Some(&incoming.packet),
                );
            }

            alternative_cids.push(hex_string(&frame.connection_id));

            if !has_retired {
                conn.topics.frame_queue.submit(QueuedFrame {
                    frame: RetireConnectionId {
                        sequence_number: frame.sequence_number,
                    }
                    .into(),
                    level: EncryptionLevel::OneRtt,
                });
            } else {
                // fresh CIDs after our retirement: the peer complied
                trace.error_code = 0;
            }
        }

        if !has_retired && saw_new_cid {
            has_retired = true;
            trace.error_code = RCI_HOST_DID_NOT_PROVIDE_NEW_CID;
        }
    }

    trace.set_result("new_connection_ids", alternative_cids);
    agents.close_connection(false, 0, "").await;
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
