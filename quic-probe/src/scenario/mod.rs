// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The bundled protocol-conformance scenarios.
//!
//! Each scenario drives one connection against the target host and
//! scores the observed behavior into the trace. Scenarios are variants
//! of one enum rather than trait objects; their bodies live in one
//! module per scenario.

mod flow_control;
mod handshake;
mod retire_connection_id;
mod stop_sending;
mod stream_opening_reordering;
mod version_negotiation;

use crate::{
    agent::{self, ConnectionAgents},
    broadcast,
    connection::{Connection, HandshakeStatus},
    trace::Trace,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock budget every scenario runs under.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scenario {
    Handshake,
    VersionNegotiation,
    FlowControl,
    RetireConnectionId,
    StopSending,
    StreamOpeningReordering,
}

impl Scenario {
    pub const ALL: [Self; 6] = [
        Self::Handshake,
        Self::VersionNegotiation,
        Self::FlowControl,
        Self::RetireConnectionId,
        Self::StopSending,
        Self::StreamOpeningReordering,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scenario| scenario.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::VersionNegotiation => "version_negotiation",
            Self::FlowControl => "flow_control",
            Self::RetireConnectionId => "retire_connection_id",
            Self::StopSending => "stop_sending_frame_on_receive_stream",
            Self::StreamOpeningReordering => "stream_opening_reordering",
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Self::Handshake => 2,
            Self::VersionNegotiation => 2,
            Self::FlowControl => 2,
            Self::RetireConnectionId => 1,
            Self::StopSending => 1,
            Self::StreamOpeningReordering => 2,
        }
    }

    pub async fn run(
        &self,
        conn: Arc<Connection>,
        trace: &mut Trace,
        preferred_path: &str,
        debug: bool,
    ) {
        let deadline = Instant::now() + SCENARIO_TIMEOUT;
        if debug {
            tracing::info!(scenario = self.name(), "running with debug output");
        }
        match self {
            Self::Handshake => handshake::run(conn, trace, deadline).await,
            Self::VersionNegotiation => version_negotiation::run(conn, trace, deadline).await,
            Self::FlowControl => {
                flow_control::run(conn, trace, preferred_path, deadline).await
            }
            Self::RetireConnectionId => {
                retire_connection_id::run(conn, trace, deadline).await
            }
            Self::StopSending => {
                stop_sending::run(conn, trace, preferred_path, deadline).await
            }
            Self::StreamOpeningReordering => {
                stream_opening_reordering::run(conn, trace, preferred_path, deadline).await
            }
        }
    }
}

/// Attaches the default agents plus the handshake agent and drives the
/// handshake to completion. On failure the trace is marked with
/// `error_code` and `None` is returned, with every agent stopped.
pub(crate) async fn complete_handshake(
    conn: &Arc<Connection>,
    trace: &mut Trace,
    error_code: u8,
    deadline: Instant,
) -> Option<ConnectionAgents> {
    let mut agents = agent::default_agents(conn);
    let mut status = conn.topics.handshake_status.subscribe();
    agents.add(agent::handshake::spawn(conn));

    if let Err(error) = agent::handshake::initiate(conn) {
        trace.mark_error(error_code, &error.to_string(), None);
        agents.stop_all().await;
        return None;
    }

    let received = tokio::time::timeout_at(
        deadline,
        broadcast::next(&mut status, "handshake-status"),
    )
    .await;
    match received {
        Ok(Some(HandshakeStatus {
            completed: true, ..
        })) => Some(agents),
        Ok(Some(status)) => {
            let detail = status.error.unwrap_or_default();
            trace.mark_error(error_code, &detail, status.packet.as_deref());
            agents.stop_all().await;
            None
        }
        Ok(None) | Err(_) => {
            trace.mark_error(error_code, "handshake timeout", None);
            agents.stop_all().await;
            None
        }
    }
}
