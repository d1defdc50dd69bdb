// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, PeripheralTickResult, SimResult};
use std::any::Any;

pub const IMR: u64 = 0x00;
pub const EMR: u64 = 0x04;
pub const RTSR: u64 = 0x08;
pub const FTSR: u64 = 0x0C;
pub const SWIER: u64 = 0x10;
pub const PR: u64 = 0x14;

const LINE_MASK: u32 = 0x7FFFF;

/// Device interrupt number serving an EXTI line.
pub fn line_irq(line: u8) -> Option<u32> {
    match line {
        0..=4 => Some(6 + line as u32), // EXTI0..4 -> IRQ 6..10
        5..=9 => Some(23),              // EXTI9_5
        10..=15 => Some(40),            // EXTI15_10
        _ => None,
    }
}

/// STM32F1 External Interrupt/Event Controller (EXTI)
///
/// A pending bit stays set until software writes 1 to it, so the shared
/// IRQ line is level-sensitive with respect to PR & IMR.
#[derive(Debug, Default, serde::Serialize)]
pub struct Exti {
    pub imr: u32,   // 0x00 - Interrupt mask register
    pub emr: u32,   // 0x04 - Event mask register
    pub rtsr: u32,  // 0x08 - Rising trigger selection register
    pub ftsr: u32,  // 0x0C - Falling trigger selection register
    pub swier: u32, // 0x10 - Software interrupt event register
    pub pr: u32,    // 0x14 - Pending register
}

impl Exti {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a pin transition on `line`. Returns true when it set a pending bit.
    pub fn on_edge(&mut self, line: u8, rising: bool) -> bool {
        if line >= 19 {
            return false;
        }
        let bit = 1 << line;
        let selected = if rising { self.rtsr } else { self.ftsr };
        if selected & bit == 0 {
            return false;
        }
        self.pr |= bit;
        tracing::debug!(
            "EXTI: line {} {} edge pending",
            line,
            if rising { "rising" } else { "falling" }
        );
        true
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            IMR => self.imr,
            EMR => self.emr,
            RTSR => self.rtsr,
            FTSR => self.ftsr,
            SWIER => self.swier,
            PR => self.pr,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            IMR => self.imr = value & LINE_MASK,
            EMR => self.emr = value & LINE_MASK,
            RTSR => self.rtsr = value & LINE_MASK,
            FTSR => self.ftsr = value & LINE_MASK,
            SWIER => {
                // A 0 -> 1 transition of an unmasked line sets its pending bit.
                let rising = (self.swier ^ value) & value & self.imr;
                self.swier = value & LINE_MASK;
                self.pr |= rising & LINE_MASK;
            }
            PR => {
                // rc_w1; clearing PR also clears the matching SWIER bit
                let clear = value & LINE_MASK;
                self.pr &= !clear;
                self.swier &= !clear;
            }
            _ => {}
        }
    }
}

impl Peripheral for Exti {
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

    fn tick(&mut self, _cycles: u32) -> PeripheralTickResult {
        let active = self.pr & self.imr;
        let mut explicit_irqs = Vec::new();
        for line in 0..16u8 {
            if active & (1 << line) == 0 {
                continue;
            }
            if let Some(irq) = line_irq(line) {
                if !explicit_irqs.contains(&irq) {
                    explicit_irqs.push(irq);
                }
            }
        }

        PeripheralTickResult {
            explicit_irqs,
            ..Default::default()
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_respects_trigger_selection() {
        let mut exti = Exti::new();
        exti.write(RTSR, 1 << 0).unwrap();
        assert!(!exti.on_edge(0, false));
        assert!(exti.on_edge(0, true));
        assert_eq!(exti.read(PR).unwrap(), 1);
    }

    #[test]
    fn test_masked_line_raises_no_irq() {
        let mut exti = Exti::new();
        exti.write(FTSR, 1 << 3).unwrap();
        exti.on_edge(3, false);
        assert!(exti.tick(1).explicit_irqs.is_empty());
        exti.write(IMR, 1 << 3).unwrap();
        assert_eq!(exti.tick(1).explicit_irqs, vec![9]);
    }

    #[test]
    fn test_grouped_lines_share_one_irq() {
        let mut exti = Exti::new();
        exti.write(IMR, 0xFFFF).unwrap();
        exti.write(SWIER, (1 << 5) | (1 << 7) | (1 << 12)).unwrap();
        assert_eq!(exti.tick(1).explicit_irqs, vec![23, 40]);
    }

    #[test]
    fn test_pr_write_one_clears() {
        let mut exti = Exti::new();
        exti.write(IMR, 0x3).unwrap();
        exti.write(SWIER, 0x3).unwrap();
        exti.write(PR, 0x1).unwrap();
        assert_eq!(exti.read(PR).unwrap(), 0x2);
        exti.write(PR, 0x0).unwrap();
        assert_eq!(exti.read(PR).unwrap(), 0x2);
    }
}
