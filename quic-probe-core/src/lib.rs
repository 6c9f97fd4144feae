#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod ack_ranges;
pub mod connection_id;
pub mod crypto;
pub mod frame;
pub mod packet;
pub mod stream;
pub mod transport;
pub mod varint;
pub mod version;

pub use connection_id::ConnectionId;
pub use varint::VarInt;
