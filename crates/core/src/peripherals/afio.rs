// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, SimResult};
use std::any::Any;

pub const EVCR: u64 = 0x00;
pub const MAPR: u64 = 0x04;
pub const EXTICR1: u64 = 0x08;
pub const MAPR2: u64 = 0x1C;

/// Offset of the EXTICR register that routes `line`.
pub fn exticr_offset(line: u8) -> u64 {
    EXTICR1 + 4 * (line as u64 / 4)
}

/// Alternate function I/O (STM32F1 AFIO). Also stands in for the SYSCFG
/// EXTI routing registers on v2 parts; both keep EXTICR1..4 at 0x08..0x14.
#[derive(Debug, Default, serde::Serialize)]
pub struct Afio {
    pub evcr: u32,
    pub mapr: u32,
    pub exticr: [u32; 4], // EXTICR1, EXTICR2, EXTICR3, EXTICR4
    pub mapr2: u32,
}

impl Afio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the GPIO port index (0=A, 1=B, etc.) routed to an EXTI line (0-15)
    pub fn exti_port(&self, line: u8) -> u8 {
        if line >= 16 {
            return 0;
        }
        let reg_idx = (line / 4) as usize;
        let shift = (line % 4) * 4;
        ((self.exticr[reg_idx] >> shift) & 0xF) as u8
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            EVCR => self.evcr,
            MAPR => self.mapr,
            0x08 => self.exticr[0],
            0x0C => self.exticr[1],
            0x10 => self.exticr[2],
            0x14 => self.exticr[3],
            MAPR2 => self.mapr2,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            EVCR => self.evcr = value & 0xFF,
            MAPR => self.mapr = value,
            0x08 => self.exticr[0] = value & 0xFFFF,
            0x0C => self.exticr[1] = value & 0xFFFF,
            0x10 => self.exticr[2] = value & 0xFFFF,
            0x14 => self.exticr[3] = value & 0xFFFF,
            MAPR2 => self.mapr2 = value,
            _ => {}
        }
    }
}

impl Peripheral for Afio {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
