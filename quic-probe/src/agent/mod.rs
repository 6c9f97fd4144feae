// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Agent lifecycle.
//!
//! Each agent is an independent tokio task attached to one connection.
//! `stop()` flips a watch channel the agent's select loop observes;
//! `join()` awaits task exit. Agents log a start and a termination line
//! on every exit path.

pub mod ack;
pub mod buffer;
pub mod closing;
pub mod handshake;
pub mod parsing;
pub mod recovery;
pub mod rtt;
pub mod sending;
pub mod socket;
pub mod tls;

use crate::connection::Connection;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

pub struct Agent {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Receiver side of the stop signal, passed into every agent loop.
pub type StopSignal = watch::Receiver<bool>;

/// Resolves once `stop()` has been called.
pub async fn stopped(signal: &mut StopSignal) {
    while !*signal.borrow() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

impl Agent {
    pub(crate) fn spawn<F, Fut>(name: &'static str, conn: &Arc<Connection>, f: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        let span = tracing::info_span!(
            "agent",
            kind = name,
            odcid = %conn.original_destination_cid
        );
        let task = f(stop_rx);
        let handle = tokio::spawn(
            async move {
                tracing::debug!("agent started");
                task.await;
                tracing::debug!("agent terminated");
            }
            .instrument(span),
        );
        Self { name, stop, handle }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// The set of agents attached to one connection.
pub struct ConnectionAgents {
    conn: Arc<Connection>,
    agents: Vec<Agent>,
}

impl ConnectionAgents {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            agents: Vec::new(),
        }
    }

    pub fn conn(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn add(&mut self, agent: Agent) {
        self.agents.push(agent);
    }

    /// Stops and joins every agent in LIFO attach order.
    pub async fn stop_all(&mut self) {
        for agent in self.agents.drain(..).rev() {
            agent.stop();
            agent.join().await;
        }
    }

    /// Sends a CONNECTION_CLOSE (or APPLICATION_CLOSE), waits until it
    /// has left the sending agent, then stops everything.
    pub async fn close_connection(&mut self, quic_layer: bool, error_code: u64, reason: &str) {
        let closer = closing::spawn(&self.conn, quic_layer, error_code, reason);
        closer.join().await;
        self.stop_all().await;
    }
}

/// The agents needed for a basic connection to operate, in attach order.
pub fn default_agents(conn: &Arc<Connection>) -> ConnectionAgents {
    let mut agents = ConnectionAgents::new(conn.clone());
    agents.add(socket::spawn(conn, socket::Config::default()));
    agents.add(parsing::spawn(conn));
    agents.add(buffer::spawn(conn));
    agents.add(tls::spawn(conn));
    agents.add(ack::spawn(conn));
    agents.add(sending::spawn(conn, conn.mtu()));
    agents.add(recovery::spawn(conn, Duration::from_millis(500)));
    agents.add(rtt::spawn(conn));
    agents
}
