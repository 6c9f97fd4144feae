// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Closing agent: queues a CONNECTION_CLOSE (or APPLICATION_CLOSE)
//! frame and terminates once a packet carrying it has left the sending
//! agent. Joining this agent therefore guarantees the close made it to
//! the wire before the other agents are torn down.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::Connection,
};
use quic_probe_core::packet::Packet;
use std::sync::Arc;

pub fn spawn(conn: &Arc<Connection>, quic_layer: bool, error_code: u64, reason: &str) -> Agent {
    let connection = conn.clone();
    // subscribe before queueing the frame so the packet cannot be missed
    let outgoing = conn.topics.outgoing_packets.subscribe();
    conn.close_connection(quic_layer, error_code, reason);
    Agent::spawn("closing", conn, move |stop| run(connection, outgoing, stop))
}

async fn run(
    _conn: Arc<Connection>,
    mut outgoing: tokio::sync::broadcast::Receiver<Arc<Packet>>,
    mut stop: StopSignal,
) {
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            packet = broadcast::next(&mut outgoing, "outgoing-packets") => {
                let Some(packet) = packet else { return };
                if let Some(framer) = packet.as_framer() {
                    if framer.connection_close().is_some() {
                        tracing::debug!("close frame left the sending agent");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::sending;
    use crate::broadcast as topics;
    use crate::test_support::test_connection;
    use std::time::Duration;

    #[tokio::test]
    async fn join_returns_once_the_close_frame_is_sent() {
        let conn = test_connection().await;
        let mut outgoing = conn.topics.outgoing_packets.subscribe();

        let bundler = sending::spawn(&conn, 1200);
        let closer = spawn(&conn, true, 0, "done");

        // joining blocks until the sending agent emitted the packet
        tokio::time::timeout(Duration::from_secs(2), closer.join())
            .await
            .expect("closing agent should observe the close frame");

        let packet = topics::next(&mut outgoing, "outgoing").await.unwrap();
        let framer = packet.as_framer().unwrap();
        let close = framer.connection_close().unwrap();
        assert_eq!(close.error_code.as_u64(), 0);
        assert_eq!(&close.reason[..], b"done");

        bundler.stop();
        bundler.join().await;
    }
}
