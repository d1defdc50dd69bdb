// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::clock::ClockTree;
use crate::{map, Bus, HalError, HalResult};
use regbench_core::peripherals::systick::{
    CSR, CSR_CLKSOURCE, CSR_COUNTFLAG, CSR_ENABLE, CSR_TICKINT, CVR, RELOAD_MAX, RVR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysTick {
    base: u64,
}

impl Default for SysTick {
    fn default() -> Self {
        Self::new()
    }
}

impl SysTick {
    pub const fn new() -> Self {
        Self { base: map::SYSTICK }
    }

    /// Reload value for a 1 kHz tick from the AHB clock.
    pub fn for_millis(tree: &ClockTree) -> HalResult<u32> {
        let reload = (tree.hclk / 1000).saturating_sub(1);
        if reload == 0 || reload > RELOAD_MAX {
            return Err(HalError::InvalidFrequency { hz: 1000 });
        }
        Ok(reload)
    }

    /// Start counting from `reload` on the processor clock; TICKINT goes last.
    pub fn configure(&self, bus: &mut dyn Bus, reload: u32, interrupt: bool) -> HalResult<()> {
        if reload > RELOAD_MAX {
            return Err(HalError::InvalidReload { reload });
        }
        bus.write_u32(self.base + CSR, 0)?;
        bus.write_u32(self.base + RVR, reload)?;
        bus.write_u32(self.base + CVR, 0)?;
        bus.write_u32(self.base + CSR, CSR_CLKSOURCE)?;
        bus.write_u32(self.base + CSR, CSR_CLKSOURCE | CSR_ENABLE)?;
        if interrupt {
            bus.write_u32(self.base + CSR, CSR_CLKSOURCE | CSR_ENABLE | CSR_TICKINT)?;
        }
        Ok(())
    }

    pub fn stop(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.write_u32(self.base + CSR, CSR_CLKSOURCE)?;
        Ok(())
    }

    /// COUNTFLAG: the counter reached zero since the last read. Reading clears it.
    pub fn has_wrapped(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(bus.read_u32(self.base + CSR)? & CSR_COUNTFLAG != 0)
    }
}
