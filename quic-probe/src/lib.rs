//! QUIC protocol-conformance test client.
//!
//! A connection is a hub of broadcast topics with a set of cooperating
//! agents attached: socket I/O, packet parsing and decryption, frame
//! bundling with ACK merging, loss recovery, RTT estimation and
//! handshake orchestration. Scenarios drive a connection against a
//! target server and score its behavior into a trace.

pub mod agent;
pub mod broadcast;
pub mod connection;
pub mod http;
pub mod rtt;
pub mod scenario;
pub mod streams;
pub mod tls;
pub mod trace;

#[cfg(test)]
mod loopback_tests;
#[cfg(test)]
pub(crate) mod test_support;

pub use connection::Connection;
pub use scenario::Scenario;
pub use trace::Trace;
