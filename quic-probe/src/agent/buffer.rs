// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Buffer agent: holds payloads that arrived before their read keys and
//! replays them, FIFO per level, once the keys become available.

use crate::{
    agent::{stopped, Agent, StopSignal},
    broadcast,
    connection::{Connection, DirectionalLevel, UnprocessedPayload},
};
use bytes::Bytes;
use quic_probe_core::crypto::{Direction, EncryptionLevel};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub fn spawn(conn: &Arc<Connection>) -> Agent {
    let connection = conn.clone();
    let unprocessed = conn.topics.unprocessed_payloads.subscribe();
    let levels = conn.topics.encryption_levels_available.subscribe();
    Agent::spawn("buffer", conn, move |stop| {
        run(connection, unprocessed, levels, stop)
    })
}

async fn run(
    conn: Arc<Connection>,
    mut unprocessed: tokio::sync::broadcast::Receiver<UnprocessedPayload>,
    mut levels: tokio::sync::broadcast::Receiver<DirectionalLevel>,
    mut stop: StopSignal,
) {
    let mut buffered: HashMap<EncryptionLevel, VecDeque<Bytes>> = HashMap::new();

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            payload = broadcast::next(&mut unprocessed, "unprocessed-payloads") => {
                let Some(payload) = payload else { return };
                // keys may have raced ahead of the payload
                if conn.read_keys(payload.level).is_some() {
                    conn.topics.incoming_payloads.submit(payload.payload);
                } else {
                    tracing::debug!(level = %payload.level, "buffering undecryptable payload");
                    buffered.entry(payload.level).or_default().push_back(payload.payload);
                }
            }
            event = broadcast::next(&mut levels, "encryption-levels") => {
                let Some(event) = event else { return };
                if event.direction != Direction::Read {
                    continue;
                }
                if let Some(queue) = buffered.remove(&event.level) {
                    tracing::debug!(
                        level = %event.level,
                        count = queue.len(),
                        "read keys available, replaying buffered payloads"
                    );
                    for payload in queue {
                        conn.topics.incoming_payloads.submit(payload);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_connection;

    #[tokio::test]
    async fn replays_in_fifo_order_when_keys_arrive() {
        let conn = test_connection().await;
        let mut incoming = conn.topics.incoming_payloads.subscribe();
        let agent = spawn(&conn);

        for payload in [&b"first"[..], &b"second"[..]] {
            conn.topics.unprocessed_payloads.submit(UnprocessedPayload {
                level: EncryptionLevel::Handshake,
                payload: Bytes::copy_from_slice(payload),
            });
        }
        // a write-side event must not trigger a replay; only the read
        // event that follows does
        conn.topics.encryption_levels_available.submit(DirectionalLevel {
            level: EncryptionLevel::Handshake,
            direction: Direction::Write,
        });
        conn.topics.encryption_levels_available.submit(DirectionalLevel {
            level: EncryptionLevel::Handshake,
            direction: Direction::Read,
        });

        let first = crate::broadcast::next(&mut incoming, "incoming").await.unwrap();
        let second = crate::broadcast::next(&mut incoming, "incoming").await.unwrap();
        assert_eq!(&first[..], b"first");
        assert_eq!(&second[..], b"second");

        agent.stop();
        agent.join().await;
    }
}
