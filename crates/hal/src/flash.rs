// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Flash program/erase controller: unlock, page erase, half-word programming.

use crate::wait::{wait_clear, WaitPolicy};
use crate::{Bus, HalError, HalResult};
use regbench_core::peripherals::flash::{
    AR, CR, CR_LOCK, CR_PER, CR_PG, CR_STRT, KEY1, KEY2, KEYR, SR, SR_BSY, SR_EOP, SR_PGERR,
    SR_WRPRTERR,
};

const ERRORS: u32 = SR_PGERR | SR_WRPRTERR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flash {
    base: u64,
    policy: WaitPolicy,
}

impl Flash {
    pub const fn new(base: u64) -> Self {
        Self {
            base,
            policy: WaitPolicy::Forever,
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_locked(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(bus.read_u32(self.base + CR)? & CR_LOCK != 0)
    }

    /// Write the two-key sequence. A wrong key earlier since reset keeps the
    /// controller locked, which is reported here.
    pub fn unlock(&self, bus: &mut dyn Bus) -> HalResult<()> {
        if !self.is_locked(bus)? {
            return Ok(());
        }
        bus.write_u32(self.base + KEYR, KEY1)?;
        bus.write_u32(self.base + KEYR, KEY2)?;
        if self.is_locked(bus)? {
            return Err(HalError::Flash {
                addr: self.base + KEYR,
                reason: "unlock sequence rejected",
            });
        }
        tracing::debug!("Flash {:#x}: unlocked", self.base);
        Ok(())
    }

    pub fn lock(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.modify_u32(self.base + CR, 0, CR_LOCK)?;
        Ok(())
    }

    fn wait_ready(&self, bus: &mut dyn Bus) -> HalResult<()> {
        wait_clear(bus, self.policy, "flash busy", self.base + SR, SR_BSY)
    }

    /// Clear EOP and report (then clear) any error flag against `addr`.
    fn check(&self, bus: &mut dyn Bus, addr: u64) -> HalResult<()> {
        let sr = bus.read_u32(self.base + SR)?;
        bus.write_u32(self.base + SR, sr & (ERRORS | SR_EOP))?;
        if sr & SR_PGERR != 0 {
            return Err(HalError::Flash {
                addr,
                reason: "target was not erased",
            });
        }
        if sr & SR_WRPRTERR != 0 {
            return Err(HalError::Flash {
                addr,
                reason: "address is write protected or outside the array",
            });
        }
        Ok(())
    }

    fn require_unlocked(&self, bus: &mut dyn Bus, addr: u64) -> HalResult<()> {
        if self.is_locked(bus)? {
            return Err(HalError::Flash {
                addr,
                reason: "controller is locked",
            });
        }
        Ok(())
    }

    /// Erase the page holding `addr` to 0xFF.
    pub fn erase_page(&self, bus: &mut dyn Bus, addr: u64) -> HalResult<()> {
        self.require_unlocked(bus, addr)?;
        self.wait_ready(bus)?;
        bus.modify_u32(self.base + CR, 0, CR_PER)?;
        bus.write_u32(self.base + AR, addr as u32)?;
        bus.modify_u32(self.base + CR, 0, CR_STRT)?;
        let waited = self.wait_ready(bus);
        bus.modify_u32(self.base + CR, CR_PER, 0)?;
        waited?;
        self.check(bus, addr)?;
        tracing::debug!("Flash {:#x}: page at {:#x} erased", self.base, addr);
        Ok(())
    }

    /// Program `data` at `addr` one half-word at a time and verify each one.
    /// Both must be half-word aligned.
    pub fn program(&self, bus: &mut dyn Bus, addr: u64, data: &[u8]) -> HalResult<()> {
        if addr % 2 != 0 || data.len() % 2 != 0 {
            return Err(HalError::Flash {
                addr,
                reason: "programming needs half-word alignment",
            });
        }
        self.require_unlocked(bus, addr)?;
        self.wait_ready(bus)?;
        bus.modify_u32(self.base + CR, 0, CR_PG)?;
        let result = self.program_half_words(bus, addr, data);
        bus.modify_u32(self.base + CR, CR_PG, 0)?;
        result
    }

    fn program_half_words(&self, bus: &mut dyn Bus, addr: u64, data: &[u8]) -> HalResult<()> {
        for (i, pair) in data.chunks_exact(2).enumerate() {
            let target = addr + 2 * i as u64;
            let value = u16::from_le_bytes([pair[0], pair[1]]);
            bus.write_u16(target, value)?;
            self.wait_ready(bus)?;
            self.check(bus, target)?;
            if bus.read_u16(target)? != value {
                return Err(HalError::Flash {
                    addr: target,
                    reason: "verify failed",
                });
            }
        }
        tracing::debug!("Flash {:#x}: {} bytes at {:#x}", self.base, data.len(), addr);
        Ok(())
    }

    /// Copy flash contents at `addr` into `buf`.
    pub fn read(&self, bus: &mut dyn Bus, addr: u64, buf: &mut [u8]) -> HalResult<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = bus.read_u8(addr + i as u64)?;
        }
        Ok(())
    }
}
