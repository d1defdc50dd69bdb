// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;

pub const CSR: u64 = 0x00;
pub const RVR: u64 = 0x04;
pub const CVR: u64 = 0x08;
pub const CALIB: u64 = 0x0C;

pub const CSR_ENABLE: u32 = 1 << 0;
pub const CSR_TICKINT: u32 = 1 << 1;
pub const CSR_CLKSOURCE: u32 = 1 << 2;
pub const CSR_COUNTFLAG: u32 = 1 << 16;

pub const RELOAD_MAX: u32 = 0x00FF_FFFF;

/// SysTick timer, standard address 0xE000_E010.
///
/// The counter takes RVR+1 cycles per period: the exception request and
/// COUNTFLAG fire on the 1 -> 0 transition, the reload happens on the
/// following cycle.
#[derive(Debug, Default, serde::Serialize)]
pub struct Systick {
    csr: u32,
    rvr: u32,
    cvr: u32,
    calib: u32,
    wraps: u64,
}

impl Systick {
    pub fn new() -> Self {
        Self {
            csr: CSR_CLKSOURCE,
            rvr: 0,
            cvr: 0,
            calib: 0x4000_0000, // No reference clock, no skew
            wraps: 0,
        }
    }

    /// Number of 1 -> 0 transitions since reset.
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            CSR => self.csr,
            RVR => self.rvr,
            CVR => self.cvr,
            CALIB => self.calib,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            CSR => {
                self.csr = (self.csr & CSR_COUNTFLAG) | (value & 0x7);
            }
            RVR => {
                self.rvr = value & RELOAD_MAX;
            }
            CVR => {
                // Any write clears the counter and COUNTFLAG
                self.cvr = 0;
                self.csr &= !CSR_COUNTFLAG;
            }
            _ => {}
        }
    }

    /// Advance the counter, returning how many times it reached zero.
    fn count(&mut self, cycles: u32) -> u64 {
        let mut remaining = cycles as u64;
        let rvr = self.rvr as u64;
        let mut cvr = self.cvr as u64;
        let mut fired = 0;

        if rvr == 0 {
            if cvr > 0 && remaining >= cvr {
                fired = 1;
            }
            self.cvr = cvr.saturating_sub(remaining) as u32;
            return fired;
        }

        if cvr == 0 {
            if remaining == 0 {
                return 0;
            }
            remaining -= 1;
            cvr = rvr;
        }

        if remaining >= cvr {
            remaining -= cvr;
            fired += 1;
            let period = rvr + 1;
            fired += remaining / period;
            let rem = remaining % period;
            cvr = if rem == 0 { 0 } else { rvr - (rem - 1) };
        } else {
            cvr -= remaining;
        }

        self.cvr = cvr as u32;
        fired
    }
}

impl crate::Peripheral for Systick {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        let value = self.read_reg(offset);
        if offset == CSR {
            // COUNTFLAG clears on read
            self.csr &= !CSR_COUNTFLAG;
        }
        Ok(value)
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn tick(&mut self, cycles: u32) -> crate::PeripheralTickResult {
        if self.csr & CSR_ENABLE == 0 {
            return crate::PeripheralTickResult::default();
        }

        let fired = self.count(cycles);
        if fired > 0 {
            self.wraps += fired;
            self.csr |= CSR_COUNTFLAG;
        }
        crate::PeripheralTickResult {
            irq: fired > 0 && self.csr & CSR_TICKINT != 0,
            cycles,
            ..Default::default()
        }
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
