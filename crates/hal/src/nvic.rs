// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Bus, HalResult};
use regbench_core::peripherals::nvic::{irq_word, ICER, ICPR, IPR, ISER, ISPR};

/// Interrupt controller access by device interrupt number (vector - 16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nvic {
    base: u64,
}

impl Default for Nvic {
    fn default() -> Self {
        Self::new(crate::map::NVIC)
    }
}

impl Nvic {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    /// Vector number of a device interrupt.
    pub const fn vector(irq: u32) -> u32 {
        irq + 16
    }

    pub fn enable_irq(&self, bus: &mut dyn Bus, irq: u32) -> HalResult<()> {
        let (offset, bit) = irq_word(irq);
        bus.write_u32(self.base + ISER + offset, bit)?;
        tracing::debug!("NVIC: IRQ {} enabled", irq);
        Ok(())
    }

    pub fn disable_irq(&self, bus: &mut dyn Bus, irq: u32) -> HalResult<()> {
        let (offset, bit) = irq_word(irq);
        bus.write_u32(self.base + ICER + offset, bit)?;
        Ok(())
    }

    pub fn is_enabled(&self, bus: &mut dyn Bus, irq: u32) -> HalResult<bool> {
        let (offset, bit) = irq_word(irq);
        Ok(bus.read_u32(self.base + ISER + offset)? & bit != 0)
    }

    pub fn is_pending(&self, bus: &mut dyn Bus, irq: u32) -> HalResult<bool> {
        let (offset, bit) = irq_word(irq);
        Ok(bus.read_u32(self.base + ISPR + offset)? & bit != 0)
    }

    pub fn set_pending(&self, bus: &mut dyn Bus, irq: u32) -> HalResult<()> {
        let (offset, bit) = irq_word(irq);
        bus.write_u32(self.base + ISPR + offset, bit)?;
        Ok(())
    }

    pub fn clear_pending(&self, bus: &mut dyn Bus, irq: u32) -> HalResult<()> {
        let (offset, bit) = irq_word(irq);
        bus.write_u32(self.base + ICPR + offset, bit)?;
        Ok(())
    }

    /// Set the priority byte of `irq`. Only the upper four bits are implemented.
    pub fn set_priority(&self, bus: &mut dyn Bus, irq: u32, priority: u8) -> HalResult<()> {
        let word = self.base + IPR + (irq as u64 & !0x3);
        let shift = (irq % 4) * 8;
        bus.modify_u32(word, 0xFF << shift, (priority as u32) << shift)?;
        Ok(())
    }

    pub fn priority(&self, bus: &mut dyn Bus, irq: u32) -> HalResult<u8> {
        let word = self.base + IPR + (irq as u64 & !0x3);
        Ok((bus.read_u32(word)? >> ((irq % 4) * 8)) as u8)
    }
}
