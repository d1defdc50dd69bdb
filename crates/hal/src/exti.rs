// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! External interrupt lines: edge selection, masking and port routing.

use crate::{Bus, HalError, HalResult};
use regbench_core::peripherals::afio::exticr_offset;
use regbench_core::peripherals::exti::{line_irq, FTSR, IMR, PR, RTSR, SWIER};

/// Lines 0..=15 are pin lines.
pub const PIN_LINES: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Rising,
    Falling,
    Both,
}

impl Trigger {
    fn rising(self) -> bool {
        matches!(self, Trigger::Rising | Trigger::Both)
    }

    fn falling(self) -> bool {
        matches!(self, Trigger::Falling | Trigger::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exti {
    base: u64,
}

impl Exti {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    fn bit(line: u8) -> HalResult<u32> {
        if line >= PIN_LINES {
            return Err(HalError::InvalidPinMask {
                mask: 1u32.checked_shl(line as u32).unwrap_or(0),
            });
        }
        Ok(1 << line)
    }

    /// Route `line` to GPIO port `port` (0 = A) through the AFIO/SYSCFG EXTICR registers.
    /// The routing block must be clocked.
    pub fn route(&self, bus: &mut dyn Bus, routing_base: u64, line: u8, port: u8) -> HalResult<()> {
        Self::bit(line)?;
        let shift = (line as u32 % 4) * 4;
        bus.modify_u32(
            routing_base + exticr_offset(line),
            0xF << shift,
            ((port & 0xF) as u32) << shift,
        )?;
        Ok(())
    }

    /// Select which edges set the pending bit of `line`.
    pub fn configure(&self, bus: &mut dyn Bus, line: u8, trigger: Trigger) -> HalResult<()> {
        let bit = Self::bit(line)?;
        let (clear, set) = if trigger.rising() { (0, bit) } else { (bit, 0) };
        bus.modify_u32(self.base + RTSR, clear, set)?;
        let (clear, set) = if trigger.falling() { (0, bit) } else { (bit, 0) };
        bus.modify_u32(self.base + FTSR, clear, set)?;
        Ok(())
    }

    /// Unmask the interrupt request of `line`.
    pub fn enable_request(&self, bus: &mut dyn Bus, line: u8) -> HalResult<()> {
        let bit = Self::bit(line)?;
        bus.modify_u32(self.base + IMR, 0, bit)?;
        Ok(())
    }

    pub fn disable_request(&self, bus: &mut dyn Bus, line: u8) -> HalResult<()> {
        let bit = Self::bit(line)?;
        bus.modify_u32(self.base + IMR, bit, 0)?;
        Ok(())
    }

    pub fn pending(&self, bus: &mut dyn Bus, line: u8) -> HalResult<bool> {
        let bit = Self::bit(line)?;
        Ok(bus.read_u32(self.base + PR)? & bit != 0)
    }

    /// Clear the pending bit of `line`. PR is write-one-to-clear, so other
    /// lines are untouched.
    pub fn reset_request(&self, bus: &mut dyn Bus, line: u8) -> HalResult<()> {
        let bit = Self::bit(line)?;
        bus.write_u32(self.base + PR, bit)?;
        Ok(())
    }

    /// Raise `line` from software.
    pub fn trigger(&self, bus: &mut dyn Bus, line: u8) -> HalResult<()> {
        let bit = Self::bit(line)?;
        bus.modify_u32(self.base + SWIER, 0, bit)?;
        Ok(())
    }

    /// Device interrupt number serving `line`. Lines 5..=9 and 10..=15 share one each.
    pub fn irq(line: u8) -> Option<u32> {
        line_irq(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{self, gates};
    use crate::map;
    use regbench_config::BoardManifest;
    use regbench_core::Machine;

    fn machine() -> Machine {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        gate::enable(&mut machine, gates::AFIO).unwrap();
        gate::enable(&mut machine, gates::GPIOA).unwrap();
        gate::enable(&mut machine, gates::GPIOB).unwrap();
        machine
    }

    #[test]
    fn test_trigger_selection() {
        let mut machine = machine();
        let exti = Exti::new(map::EXTI);
        exti.configure(&mut machine, 0, Trigger::Both).unwrap();
        exti.configure(&mut machine, 0, Trigger::Falling).unwrap();
        assert_eq!(machine.read_u32(map::EXTI + RTSR).unwrap() & 1, 0);
        assert_eq!(machine.read_u32(map::EXTI + FTSR).unwrap() & 1, 1);
        assert!(exti.configure(&mut machine, 16, Trigger::Rising).is_err());
    }

    #[test]
    fn test_routed_edge_sets_pending() {
        let mut machine = machine();
        let exti = Exti::new(map::EXTI);
        exti.route(&mut machine, map::AFIO, 1, 1).unwrap();
        exti.configure(&mut machine, 1, Trigger::Rising).unwrap();
        exti.enable_request(&mut machine, 1).unwrap();

        // Port A is not routed to line 1 any more.
        machine.drive_pin("gpioa", 1, true).unwrap();
        assert!(!exti.pending(&mut machine, 1).unwrap());

        machine.drive_pin("gpiob", 1, true).unwrap();
        assert!(exti.pending(&mut machine, 1).unwrap());
        exti.reset_request(&mut machine, 1).unwrap();
        assert!(!exti.pending(&mut machine, 1).unwrap());
    }

    #[test]
    fn test_shared_irq_numbers() {
        assert_eq!(Exti::irq(0), Some(6));
        assert_eq!(Exti::irq(7), Some(23));
        assert_eq!(Exti::irq(13), Some(40));
        assert_eq!(Exti::irq(16), None);
    }
}
