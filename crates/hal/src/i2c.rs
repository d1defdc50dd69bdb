// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! I2C master, 7-bit addressing, standard mode (100 kHz).

use crate::wait::{wait_until, WaitPolicy};
use crate::{Bus, HalError, HalResult};
use regbench_core::peripherals::i2c::{
    CCR, CR1, CR1_ACK, CR1_PE, CR1_START, CR1_STOP, CR1_SWRST, CR2, CR2_FREQ_MASK, DR, SR1,
    SR1_ADDR, SR1_AF, SR1_BTF, SR1_RXNE, SR1_SB, SR1_TXE, SR2, TRISE,
};

const STANDARD_MODE_HZ: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2c {
    base: u64,
    policy: WaitPolicy,
}

impl I2c {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            policy: WaitPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reset the block and program 100 kHz timing from the APB1 clock. PE goes last.
    pub fn configure(&self, bus: &mut dyn Bus, pclk1_hz: u32) -> HalResult<()> {
        let freq_mhz = pclk1_hz / 1_000_000;
        if !(2..=36).contains(&freq_mhz) {
            return Err(HalError::InvalidFrequency { hz: pclk1_hz });
        }
        bus.write_u32(self.base + CR1, CR1_SWRST)?;
        bus.write_u32(self.base + CR1, 0)?;
        bus.modify_u32(self.base + CR2, CR2_FREQ_MASK, freq_mhz)?;
        bus.write_u32(self.base + CCR, (pclk1_hz / (2 * STANDARD_MODE_HZ)).max(4))?;
        bus.write_u32(self.base + TRISE, freq_mhz + 1)?;
        bus.write_u32(self.base + CR1, CR1_PE)?;
        Ok(())
    }

    fn sr1(&self, bus: &mut dyn Bus) -> HalResult<u32> {
        Ok(bus.read_u32(self.base + SR1)?)
    }

    /// Wait for any of `flags` in SR1, failing with a NACK if AF shows up instead.
    fn wait_sr1(
        &self,
        bus: &mut dyn Bus,
        addr: u8,
        flags: u32,
        what: &'static str,
    ) -> HalResult<()> {
        let mut nacked = false;
        wait_until(bus, self.policy, what, |bus| {
            let sr1 = self.sr1(bus)?;
            nacked = sr1 & SR1_AF != 0;
            Ok(nacked || sr1 & flags != 0)
        })?;
        if nacked {
            self.abort(bus)?;
            return Err(HalError::Nack { addr });
        }
        Ok(())
    }

    /// Clear AF and release the bus.
    fn abort(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.write_u32(self.base + SR1, !SR1_AF)?;
        self.stop(bus)
    }

    fn stop(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.modify_u32(self.base + CR1, 0, CR1_STOP)?;
        Ok(())
    }

    /// (Repeated) START plus address byte; on return ADDR has been cleared.
    fn begin(&self, bus: &mut dyn Bus, addr: u8, read: bool) -> HalResult<()> {
        bus.modify_u32(self.base + CR1, 0, CR1_START | CR1_ACK)?;
        wait_until(bus, self.policy, "I2C start", |bus| {
            Ok(self.sr1(bus)? & SR1_SB != 0)
        })?;
        bus.write_u32(self.base + DR, ((addr as u32) << 1) | read as u32)?;
        self.wait_sr1(bus, addr, SR1_ADDR, "I2C address")?;
        // Reading SR1 then SR2 clears ADDR.
        bus.read_u32(self.base + SR2)?;
        Ok(())
    }

    fn send(&self, bus: &mut dyn Bus, addr: u8, bytes: &[u8]) -> HalResult<()> {
        for &byte in bytes {
            self.wait_sr1(bus, addr, SR1_TXE, "I2C TXE")?;
            bus.write_u32(self.base + DR, byte as u32)?;
        }
        self.wait_sr1(bus, addr, SR1_BTF, "I2C byte transfer")
    }

    fn receive(&self, bus: &mut dyn Bus, buf: &mut [u8]) -> HalResult<()> {
        let last = buf.len().saturating_sub(1);
        for (i, slot) in buf.iter_mut().enumerate() {
            if i == last {
                // NACK the final byte so the slave stops driving the bus.
                bus.modify_u32(self.base + CR1, CR1_ACK, 0)?;
            }
            wait_until(bus, self.policy, "I2C RXNE", |bus| {
                Ok(self.sr1(bus)? & SR1_RXNE != 0)
            })?;
            *slot = bus.read_u32(self.base + DR)? as u8;
        }
        Ok(())
    }

    pub fn write(&self, bus: &mut dyn Bus, addr: u8, bytes: &[u8]) -> HalResult<()> {
        self.begin(bus, addr, false)?;
        self.send(bus, addr, bytes)?;
        self.stop(bus)
    }

    pub fn read(&self, bus: &mut dyn Bus, addr: u8, buf: &mut [u8]) -> HalResult<()> {
        self.begin(bus, addr, true)?;
        self.receive(bus, buf)?;
        self.stop(bus)
    }

    /// Write `bytes`, then read `buf` after a repeated START.
    pub fn write_read(
        &self,
        bus: &mut dyn Bus,
        addr: u8,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> HalResult<()> {
        self.begin(bus, addr, false)?;
        self.send(bus, addr, bytes)?;
        self.begin(bus, addr, true)?;
        self.receive(bus, buf)?;
        self.stop(bus)
    }
}
