// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection_id::ConnectionId, varint::VarInt};
use alloc::{vec, vec::Vec};
use core::convert::TryFrom;
use s2n_codec::{DecoderBuffer, DecoderError, Encoder, EncoderBuffer};

//= https://www.rfc-editor.org/rfc/rfc9000#section-18
//# The extension_data field of the quic_transport_parameters extension
//# defined in [QUIC-TLS] contains the QUIC transport parameters.  They
//# are encoded as a sequence of transport parameters, as shown in
//# Figure 20.

const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
const MAX_IDLE_TIMEOUT: u64 = 0x01;
const STATELESS_RESET_TOKEN: u64 = 0x02;
const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const INITIAL_MAX_DATA: u64 = 0x04;
const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const ACK_DELAY_EXPONENT: u64 = 0x0a;
const MAX_ACK_DELAY: u64 = 0x0b;
const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
const PREFERRED_ADDRESS: u64 = 0x0d;
const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;

/// The negotiated limits for one connection endpoint.
///
/// The same record is used for the values this client advertises and for
/// the values the peer sent back in its handshake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportParameters {
    /// In milliseconds; zero disables the idle timer
    pub max_idle_timeout: VarInt,
    pub max_udp_payload_size: VarInt,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: VarInt,
    /// In milliseconds
    pub max_ack_delay: VarInt,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: VarInt,
    /// Server-only parameters; `None` when this record describes the client
    pub stateless_reset_token: Option<[u8; 16]>,
    pub original_destination_connection_id: Option<ConnectionId>,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            max_idle_timeout: VarInt::from_u16(10_000),
            max_udp_payload_size: VarInt::from_u16(1452),
            initial_max_data: VarInt::from_u32(1 << 20),
            initial_max_stream_data_bidi_local: VarInt::from_u32(1 << 19),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(1 << 19),
            initial_max_stream_data_uni: VarInt::from_u32(1 << 19),
            initial_max_streams_bidi: VarInt::from_u8(16),
            initial_max_streams_uni: VarInt::from_u8(16),
            ack_delay_exponent: VarInt::from_u8(3),
            max_ack_delay: VarInt::from_u8(25),
            disable_active_migration: false,
            active_connection_id_limit: VarInt::from_u8(4),
            stateless_reset_token: None,
            original_destination_connection_id: None,
            initial_source_connection_id: None,
            retry_source_connection_id: None,
        }
    }
}

fn put_varint<E: Encoder>(encoder: &mut E, id: u64, value: VarInt) {
    encoder.encode(&VarInt::new(id).expect("parameter id"));
    encoder.encode(&VarInt::new(value.encoding_size() as u64).expect("parameter length"));
    encoder.encode(&value);
}

fn put_bytes<E: Encoder>(encoder: &mut E, id: u64, value: &[u8]) {
    encoder.encode(&VarInt::new(id).expect("parameter id"));
    encoder.encode(&VarInt::try_from(value.len()).expect("parameter length"));
    encoder.write_slice(value);
}

impl TransportParameters {
    /// Encodes the parameters a client carries in its ClientHello.
    pub fn encode_client(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 256];
        let mut encoder = EncoderBuffer::new(&mut bytes);

        put_varint(&mut encoder, MAX_IDLE_TIMEOUT, self.max_idle_timeout);
        put_varint(&mut encoder, MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size);
        put_varint(&mut encoder, INITIAL_MAX_DATA, self.initial_max_data);
        put_varint(
            &mut encoder,
            INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
        );
        put_varint(
            &mut encoder,
            INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
        );
        put_varint(
            &mut encoder,
            INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
        );
        put_varint(&mut encoder, INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi);
        put_varint(&mut encoder, INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni);
        put_varint(&mut encoder, ACK_DELAY_EXPONENT, self.ack_delay_exponent);
        put_varint(&mut encoder, MAX_ACK_DELAY, self.max_ack_delay);
        if self.disable_active_migration {
            put_bytes(&mut encoder, DISABLE_ACTIVE_MIGRATION, &[]);
        }
        put_varint(
            &mut encoder,
            ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        );
        if let Some(scid) = &self.initial_source_connection_id {
            put_bytes(&mut encoder, INITIAL_SOURCE_CONNECTION_ID, scid.as_bytes());
        }

        let len = encoder.len();
        bytes.truncate(len);
        bytes
    }

    /// Decodes the parameters received from the peer. Unknown parameters
    /// are skipped.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecoderError> {
        let mut params = Self {
            // values the peer leaves implicit take their protocol defaults
            max_idle_timeout: VarInt::ZERO,
            max_udp_payload_size: VarInt::from_u32(65_527),
            initial_max_data: VarInt::ZERO,
            initial_max_stream_data_bidi_local: VarInt::ZERO,
            initial_max_stream_data_bidi_remote: VarInt::ZERO,
            initial_max_stream_data_uni: VarInt::ZERO,
            initial_max_streams_bidi: VarInt::ZERO,
            initial_max_streams_uni: VarInt::ZERO,
            ack_delay_exponent: VarInt::from_u8(3),
            max_ack_delay: VarInt::from_u8(25),
            disable_active_migration: false,
            active_connection_id_limit: VarInt::from_u8(2),
            stateless_reset_token: None,
            original_destination_connection_id: None,
            initial_source_connection_id: None,
            retry_source_connection_id: None,
        };

        let mut buffer = DecoderBuffer::new(bytes);
        while !buffer.is_empty() {
            let (id, remaining) = buffer.decode::<VarInt>()?;
            let (value, remaining) = remaining.decode_slice_with_len_prefix::<VarInt>()?;
            let value = value.as_less_safe_slice();
            buffer = remaining;

            let varint_value = || -> Result<VarInt, DecoderError> {
                let (value, tail) = DecoderBuffer::new(value).decode::<VarInt>()?;
                tail.ensure_empty()?;
                Ok(value)
            };
            let cid_value = || -> Result<ConnectionId, DecoderError> {
                ConnectionId::try_from(value)
                    .map_err(|_| DecoderError::InvariantViolation("invalid connection id length"))
            };

            match id.as_u64() {
                ORIGINAL_DESTINATION_CONNECTION_ID => {
                    params.original_destination_connection_id = Some(cid_value()?);
                }
                MAX_IDLE_TIMEOUT => params.max_idle_timeout = varint_value()?,
                STATELESS_RESET_TOKEN => {
                    let token = <[u8; 16]>::try_from(value)
                        .map_err(|_| DecoderError::InvariantViolation("invalid reset token"))?;
                    params.stateless_reset_token = Some(token);
                }
                MAX_UDP_PAYLOAD_SIZE => params.max_udp_payload_size = varint_value()?,
                INITIAL_MAX_DATA => params.initial_max_data = varint_value()?,
                INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = varint_value()?;
                }
                INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = varint_value()?;
                }
                INITIAL_MAX_STREAM_DATA_UNI => {
                    params.initial_max_stream_data_uni = varint_value()?;
                }
                INITIAL_MAX_STREAMS_BIDI => params.initial_max_streams_bidi = varint_value()?,
                INITIAL_MAX_STREAMS_UNI => params.initial_max_streams_uni = varint_value()?,
                ACK_DELAY_EXPONENT => params.ack_delay_exponent = varint_value()?,
                MAX_ACK_DELAY => params.max_ack_delay = varint_value()?,
                DISABLE_ACTIVE_MIGRATION => params.disable_active_migration = true,
                PREFERRED_ADDRESS => {}
                ACTIVE_CONNECTION_ID_LIMIT => {
                    params.active_connection_id_limit = varint_value()?;
                }
                INITIAL_SOURCE_CONNECTION_ID => {
                    params.initial_source_connection_id = Some(cid_value()?);
                }
                RETRY_SOURCE_CONNECTION_ID => {
                    params.retry_source_connection_id = Some(cid_value()?);
                }
                _ => {}
            }
        }

        Ok(params)
    }
}
