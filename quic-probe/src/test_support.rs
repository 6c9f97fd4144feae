// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for agent and connection tests.

use crate::{
    connection::{random_connection_id, Connection},
    tls::testing::ScriptedEngine,
    tls::TlsEngine,
};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// A connection over a loopback socket pair, with a scripted TLS engine
/// and Initial keys installed. The peer socket is returned so tests can
/// play the server side of the wire.
pub(crate) async fn test_connection_with_peer() -> (Arc<Connection>, UdpSocket) {
    test_connection_with_engine(Box::new(ScriptedEngine::default())).await
}

pub(crate) async fn test_connection_with_engine(
    engine: Box<dyn TlsEngine>,
) -> (Arc<Connection>, UdpSocket) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(peer.local_addr().unwrap()).await.unwrap();
    peer.connect(socket.local_addr().unwrap()).await.unwrap();

    let conn = Connection::with_socket(
        socket,
        random_connection_id(8),
        random_connection_id(5),
        engine,
    );
    (conn, peer)
}

pub(crate) async fn test_connection() -> Arc<Connection> {
    test_connection_with_peer().await.0
}
