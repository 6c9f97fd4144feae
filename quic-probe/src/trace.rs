// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The structured outcome of one scenario run.

use quic_probe_core::packet::Packet;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
pub struct Trace {
    pub scenario: String,
    pub scenario_version: u32,
    /// 0 means the peer behaved; scenario-specific codes otherwise
    pub error_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// The packet that triggered the error, if any, in display form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_packet: Option<String>,
    pub results: Map<String, Value>,
}

impl Trace {
    pub fn new(scenario: &str, scenario_version: u32) -> Self {
        Self {
            scenario: scenario.to_string(),
            scenario_version,
            error_code: 0,
            error_detail: None,
            offending_packet: None,
            results: Map::new(),
        }
    }

    pub fn mark_error(&mut self, error_code: u8, detail: &str, packet: Option<&Packet>) {
        tracing::info!(error_code, detail, "scenario marked an error");
        self.error_code = error_code;
        self.error_detail = (!detail.is_empty()).then(|| detail.to_string());
        self.offending_packet = packet.map(Packet::short_string);
    }

    pub fn set_result(&mut self, key: &str, value: impl Into<Value>) {
        self.results.insert(key.to_string(), value.into());
    }
}
