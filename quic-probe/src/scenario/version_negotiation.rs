// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Forces version negotiation with a reserved version and checks that
//! successive Version Negotiation packets randomize the unused field.

use crate::{agent, broadcast, connection::Connection, trace::Trace};
use quic_probe_core::{crypto::EncryptionLevel, packet::Packet};
use std::sync::Arc;
use tokio::time::Instant;

pub const VN_NOT_ANSWERING_TO_VN: u8 = 1;
pub const VN_TIMEOUT: u8 = 4;
/// See https://github.com/quicwg/base-drafts/issues/963
pub const VN_UNUSED_FIELD_IS_IDENTICAL: u8 = 5;

/// A reserved version no server accepts, guaranteeing a VN response.
pub const FORCE_VERSION_NEGOTIATION: u32 = 0x1a2a_3a4a;

const VN_THRESHOLD: u32 = 3;

pub(super) async fn run(conn: Arc<Connection>, trace: &mut Trace, deadline: Instant) {
    let mut agents = agent::default_agents(&conn);
    let mut packets = conn.topics.incoming_packets.subscribe();

    conn.set_version(FORCE_VERSION_NEGOTIATION);
    trace.error_code = VN_TIMEOUT;

    let initial = match conn.initial_packet() {
        Ok(packet) => packet,
        Err(error) => {
            trace.mark_error(VN_TIMEOUT, &error.to_string(), None);
            agents.stop_all().await;
            return;
        }
    };
    if let Err(error) = conn.send_packet(initial, EncryptionLevel::Initial) {
        trace.mark_error(VN_TIMEOUT, &error.to_string(), None);
        agents.stop_all().await;
        return;
    }

    let mut vn_count = 0u32;
    let mut unused_field = 0u8;

    loop {
        let received =
            tokio::time::timeout_at(deadline, broadcast::next(&mut packets, "incoming-packets"))
                .await;
        let Ok(Some(incoming)) = received else { break };

        match incoming.packet.as_ref() {
            Packet::VersionNegotiation(vn) => {
                vn_count += 1;
                if vn_count > 1 && unused_field != vn.unused_field {
                    trace.error_code = 0;
                    break;
                }
                if vn_count == VN_THRESHOLD {
                    trace.mark_error(
                        VN_UNUSED_FIELD_IS_IDENTICAL,
                        "unused field identical across version negotiation packets",
                        Some(&incoming.packet),
                    );
                    break;
                }
                unused_field = vn.unused_field;
                trace.set_result(
                    "supported_versions",
                    vn.supported_versions
                        .iter()
                        .map(|version| format!("{version:08x}"))
                        .collect::<Vec<_>>(),
                );
                if let Err(error) = conn.resend_initial() {
                    trace.mark_error(VN_TIMEOUT, &error.to_string(), None);
                    break;
                }
            }
            packet => {
                trace.mark_error(VN_NOT_ANSWERING_TO_VN, "", Some(packet));
                trace.set_result("received_packet_type", packet.packet_type().to_string());
            }
        }
    }

    agents.stop_all().await;
}
