// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::DispatchStats;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub steps: u64,
    pub cycles: u64,
    pub stats: DispatchStats,
    pub peripherals: BTreeMap<String, serde_json::Value>,
}

impl MachineSnapshot {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
