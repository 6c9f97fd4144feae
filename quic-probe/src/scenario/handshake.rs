// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Completes the Initial→Handshake→1-RTT progression and records the
//! negotiated version.

use crate::{agent, broadcast, connection::Connection, trace::Trace};
use std::sync::Arc;
use tokio::time::Instant;

pub const H_RECEIVED_UNEXPECTED_PACKET_TYPE: u8 = 1;
pub const H_TLS_HANDSHAKE_FAILED: u8 = 2;
pub const H_NO_COMPATIBLE_VERSION_AVAILABLE: u8 = 3;
pub const H_TIMEOUT: u8 = 4;

pub(super) async fn run(conn: Arc<Connection>, trace: &mut Trace, deadline: Instant) {
    let mut agents = agent::default_agents(&conn);
    let mut status = conn.topics.handshake_status.subscribe();
    agents.add(agent::handshake::spawn(&conn));

    if let Err(error) = agent::handshake::initiate(&conn) {
        trace.mark_error(H_TLS_HANDSHAKE_FAILED, &error.to_string(), None);
        agents.stop_all().await;
        return;
    }

    let mut completed = false;
    loop {
        let received =
            tokio::time::timeout_at(deadline, broadcast::next(&mut status, "handshake-status"))
                .await;
        match received {
            Ok(Some(update)) if update.completed => {
                completed = true;
                trace.set_result("negotiated_version", conn.version());
                // hold the connection open until the deadline, as a
                // peer misbehaving after completion is still of interest
            }
            Ok(Some(update)) => {
                let detail = update.error.unwrap_or_default();
                let code = match detail.as_str() {
                    "no appropriate version found" => H_NO_COMPATIBLE_VERSION_AVAILABLE,
                    "received incorrect packet type during handshake" => {
                        H_RECEIVED_UNEXPECTED_PACKET_TYPE
                    }
                    _ => H_TLS_HANDSHAKE_FAILED,
                };
                trace.mark_error(code, &detail, update.packet.as_deref());
            }
            Ok(None) | Err(_) => break,
        }
    }

    if completed {
        agents.close_connection(false, 0, "").await;
    } else {
        if trace.error_code == 0 {
            trace.mark_error(H_TIMEOUT, "", None);
        }
        agents.stop_all().await;
    }
}
