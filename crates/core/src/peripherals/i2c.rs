// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::devices::I2cDevice;
use crate::{Peripheral, PeripheralTickResult, SimResult};
use std::any::Any;

pub const CR1: u64 = 0x00;
pub const CR2: u64 = 0x04;
pub const OAR1: u64 = 0x08;
pub const OAR2: u64 = 0x0C;
pub const DR: u64 = 0x10;
pub const SR1: u64 = 0x14;
pub const SR2: u64 = 0x18;
pub const CCR: u64 = 0x1C;
pub const TRISE: u64 = 0x20;

pub const CR1_PE: u32 = 1 << 0;
pub const CR1_START: u32 = 1 << 8;
pub const CR1_STOP: u32 = 1 << 9;
pub const CR1_ACK: u32 = 1 << 10;
pub const CR1_SWRST: u32 = 1 << 15;

pub const CR2_FREQ_MASK: u32 = 0x3F;
pub const CR2_ITERREN: u32 = 1 << 8;
pub const CR2_ITEVTEN: u32 = 1 << 9;
pub const CR2_ITBUFEN: u32 = 1 << 10;

pub const SR1_SB: u32 = 1 << 0;
pub const SR1_ADDR: u32 = 1 << 1;
pub const SR1_BTF: u32 = 1 << 2;
pub const SR1_STOPF: u32 = 1 << 4;
pub const SR1_RXNE: u32 = 1 << 6;
pub const SR1_TXE: u32 = 1 << 7;
pub const SR1_BERR: u32 = 1 << 8;
pub const SR1_ARLO: u32 = 1 << 9;
pub const SR1_AF: u32 = 1 << 10;
pub const SR1_OVR: u32 = 1 << 11;

pub const SR2_MSL: u32 = 1 << 0;
pub const SR2_BUSY: u32 = 1 << 1;
pub const SR2_TRA: u32 = 1 << 2;

/// Error flags in SR1 are rc_w0; everything else there is read-only.
const SR1_ERRORS: u32 = SR1_BERR | SR1_ARLO | SR1_AF | SR1_OVR;
const SR1_EVENTS: u32 = SR1_SB | SR1_ADDR | SR1_BTF | SR1_STOPF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
enum Phase {
    #[default]
    Idle,
    /// START sent, waiting for the address byte.
    Start,
    Transmit,
    Receive,
    /// Address was not acknowledged; bus stays claimed until STOP.
    Nacked,
}

/// STM32F1 style I2C controller, master mode, 7-bit addressing.
///
/// Bytes move immediately: SB follows START, ADDR follows the address byte
/// when a slave answers, AF when none does. In receive mode the controller
/// fetches the first byte when ADDR is cleared (SR2 read) and every next one
/// when DR is read with ACK still set.
#[derive(Debug, Default, serde::Serialize)]
pub struct I2c {
    cr1: u32,
    cr2: u32,
    oar1: u32,
    oar2: u32,
    dr: u8,
    sr1: u32,
    sr2: u32,
    ccr: u32,
    trise: u32,
    phase: Phase,
    #[serde(skip)]
    selected: Option<usize>,
    #[serde(skip)]
    devices: Vec<Box<dyn I2cDevice>>,
    nacks: u64,
}

impl I2c {
    pub fn new() -> Self {
        Self {
            trise: 0x02,
            ..Default::default()
        }
    }

    /// Hang a slave device on this bus.
    pub fn attach(&mut self, device: Box<dyn I2cDevice>) {
        tracing::debug!("I2C slave attached at {:#04x}", device.address());
        self.devices.push(device);
    }

    pub fn device(&self, address: u8) -> Option<&dyn I2cDevice> {
        self.devices
            .iter()
            .find(|d| d.address() == address)
            .map(|d| d.as_ref())
    }

    /// Addresses that went unacknowledged.
    pub fn nacks(&self) -> u64 {
        self.nacks
    }

    fn reset(&mut self) {
        let devices = std::mem::take(&mut self.devices);
        *self = Self::new();
        self.devices = devices;
    }

    fn release_bus(&mut self) {
        if let Some(idx) = self.selected.take() {
            self.devices[idx].stop();
        }
        self.phase = Phase::Idle;
        self.sr2 &= !(SR2_MSL | SR2_BUSY | SR2_TRA);
        self.sr1 &= !(SR1_TXE | SR1_BTF | SR1_SB | SR1_ADDR);
    }

    fn write_cr1(&mut self, value: u32) {
        if value & CR1_SWRST != 0 {
            self.reset();
            self.cr1 = CR1_SWRST;
            return;
        }
        // START and STOP are cleared by hardware once generated.
        self.cr1 = value & !(CR1_START | CR1_STOP);
        if value & CR1_PE == 0 {
            self.release_bus();
            return;
        }

        if value & CR1_START != 0 {
            if let Some(idx) = self.selected.take() {
                // Repeated START: the slave sees a new transaction.
                self.devices[idx].stop();
            }
            self.phase = Phase::Start;
            self.sr1 &= !(SR1_TXE | SR1_BTF | SR1_ADDR);
            self.sr1 |= SR1_SB;
            self.sr2 |= SR2_MSL | SR2_BUSY;
        } else if value & CR1_STOP != 0 {
            self.release_bus();
        }
    }

    fn address_phase(&mut self, byte: u8) {
        let address = byte >> 1;
        let read = byte & 1 != 0;
        self.sr1 &= !SR1_SB;

        match self.devices.iter().position(|d| d.address() == address) {
            Some(idx) => {
                self.devices[idx].start(read);
                self.selected = Some(idx);
                self.sr1 |= SR1_ADDR;
                if read {
                    self.sr2 &= !SR2_TRA;
                    self.phase = Phase::Receive;
                } else {
                    self.sr2 |= SR2_TRA;
                    self.phase = Phase::Transmit;
                }
            }
            None => {
                tracing::debug!("I2C address {:#04x} not acknowledged", address);
                self.nacks += 1;
                self.sr1 |= SR1_AF;
                self.phase = Phase::Nacked;
            }
        }
    }

    fn write_dr(&mut self, byte: u8) {
        self.dr = byte;
        match self.phase {
            Phase::Start => self.address_phase(byte),
            Phase::Transmit if self.sr1 & SR1_ADDR == 0 => {
                let Some(idx) = self.selected else { return };
                if self.devices[idx].write(byte) {
                    self.sr1 |= SR1_TXE | SR1_BTF;
                } else {
                    self.sr1 &= !(SR1_TXE | SR1_BTF);
                    self.sr1 |= SR1_AF;
                }
            }
            _ => {}
        }
    }

    fn fetch(&mut self) {
        if let Some(idx) = self.selected {
            self.dr = self.devices[idx].read();
            self.sr1 |= SR1_RXNE;
        }
    }

    fn clear_addr(&mut self) {
        if self.sr1 & SR1_ADDR == 0 {
            return;
        }
        self.sr1 &= !SR1_ADDR;
        match self.phase {
            Phase::Transmit => self.sr1 |= SR1_TXE,
            Phase::Receive => self.fetch(),
            _ => {}
        }
    }

    fn read_dr(&mut self) -> u32 {
        let value = self.dr as u32;
        if self.sr1 & SR1_RXNE != 0 {
            self.sr1 &= !(SR1_RXNE | SR1_BTF);
            if self.phase == Phase::Receive && self.cr1 & CR1_ACK != 0 {
                self.fetch();
            }
        }
        value
    }

    fn irq_level(&self) -> bool {
        let events = self.cr2 & CR2_ITEVTEN != 0 && self.sr1 & SR1_EVENTS != 0;
        let buffer = self.cr2 & CR2_ITEVTEN != 0
            && self.cr2 & CR2_ITBUFEN != 0
            && self.sr1 & (SR1_TXE | SR1_RXNE) != 0;
        let errors = self.cr2 & CR2_ITERREN != 0 && self.sr1 & SR1_ERRORS != 0;
        events || buffer || errors
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            CR1 => self.cr1,
            CR2 => self.cr2,
            OAR1 => self.oar1,
            OAR2 => self.oar2,
            DR => self.dr as u32,
            SR1 => self.sr1,
            SR2 => self.sr2,
            CCR => self.ccr,
            TRISE => self.trise,
            _ => 0,
        }
    }
}

impl Peripheral for I2c {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        Ok(match offset {
            DR => self.read_dr(),
            SR2 => {
                let value = self.sr2;
                self.clear_addr();
                value
            }
            _ => self.read_reg(offset),
        })
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        match offset {
            CR1 => self.write_cr1(value & 0xFFFF),
            CR2 => self.cr2 = value & 0x1F3F,
            OAR1 => self.oar1 = value & 0xFFFF,
            OAR2 => self.oar2 = value & 0xFF,
            DR => self.write_dr(value as u8),
            SR1 => self.sr1 &= value | !SR1_ERRORS,
            CCR => self.ccr = value & 0xCFFF,
            TRISE => self.trise = value & 0x3F,
            _ => {}
        }
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn tick(&mut self, _cycles: u32) -> PeripheralTickResult {
        PeripheralTickResult {
            irq: self.irq_level(),
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
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            let devices: Vec<_> = self.devices.iter().map(|d| d.snapshot()).collect();
            obj.insert("devices".to_string(), serde_json::Value::Array(devices));
        }
        value
    }
}
