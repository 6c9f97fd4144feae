// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// QUIC version 1 (RFC 9000)
pub const QUIC_V1: u32 = 0x0000_0001;

/// Version field value reserved for Version Negotiation packets
pub const VERSION_NEGOTIATION: u32 = 0x0000_0000;

/// Versions this client is able to speak
pub const SUPPORTED: &[u32] = &[QUIC_V1];

#[inline]
pub fn is_supported(version: u32) -> bool {
    SUPPORTED.contains(&version)
}
