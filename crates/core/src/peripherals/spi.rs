// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::devices::{SpiDevice, SpiLoopback};
use crate::{Peripheral, PeripheralTickResult, SimResult};
use std::any::Any;

pub const CR1: u64 = 0x00;
pub const CR2: u64 = 0x04;
pub const SR: u64 = 0x08;
pub const DR: u64 = 0x0C;
pub const CRCPR: u64 = 0x10;

pub const CR1_CPHA: u32 = 1 << 0;
pub const CR1_CPOL: u32 = 1 << 1;
pub const CR1_MSTR: u32 = 1 << 2;
pub const CR1_BR_SHIFT: u32 = 3;
pub const CR1_BR_MASK: u32 = 0x7 << CR1_BR_SHIFT;
pub const CR1_SPE: u32 = 1 << 6;
pub const CR1_LSBFIRST: u32 = 1 << 7;
pub const CR1_SSI: u32 = 1 << 8;
pub const CR1_SSM: u32 = 1 << 9;

pub const CR2_RXDMAEN: u32 = 1 << 0;
pub const CR2_TXDMAEN: u32 = 1 << 1;
pub const CR2_SSOE: u32 = 1 << 2;
pub const CR2_ERRIE: u32 = 1 << 5;
pub const CR2_RXNEIE: u32 = 1 << 6;
pub const CR2_TXEIE: u32 = 1 << 7;

pub const SR_RXNE: u32 = 1 << 0;
pub const SR_TXE: u32 = 1 << 1;
pub const SR_MODF: u32 = 1 << 5;
pub const SR_OVR: u32 = 1 << 6;
pub const SR_BSY: u32 = 1 << 7;

/// SPI master with a one-byte transmit buffer and shift register.
///
/// A byte written to DR moves to the shifter on the next tick and comes back
/// from the attached device after `8 * 2^(BR+1)` cycles. Without a device the
/// bus loops MOSI back to MISO.
#[derive(Debug, serde::Serialize)]
pub struct Spi {
    cr1: u32,
    cr2: u32,
    sr: u32,
    crcpr: u32,
    rx: u8,
    tx_buffer: Option<u8>,
    shifter: Option<u8>,
    remaining: u32,
    #[serde(skip)]
    ovr_read_armed: bool,
    #[serde(skip)]
    device: Box<dyn SpiDevice>,
    transfers: u64,
}

impl Default for Spi {
    fn default() -> Self {
        Self::new()
    }
}

impl Spi {
    pub fn new() -> Self {
        Self {
            cr1: 0,
            cr2: 0,
            sr: SR_TXE,
            crcpr: 0x0007,
            rx: 0,
            tx_buffer: None,
            shifter: None,
            remaining: 0,
            ovr_read_armed: false,
            device: Box::new(SpiLoopback),
            transfers: 0,
        }
    }

    pub fn attach(&mut self, device: Box<dyn SpiDevice>) {
        self.device = device;
    }

    /// Bytes fully shifted out.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Cycles one byte occupies on the wire at the current baud prescaler.
    pub fn byte_cycles(&self) -> u32 {
        let br = (self.cr1 & CR1_BR_MASK) >> CR1_BR_SHIFT;
        8 * (2 << br)
    }

    fn enabled(&self) -> bool {
        self.cr1 & (CR1_SPE | CR1_MSTR) == (CR1_SPE | CR1_MSTR)
    }

    fn write_cr1(&mut self, value: u32) {
        let was_enabled = self.cr1 & CR1_SPE != 0;
        self.cr1 = value & 0xFFFF;
        if was_enabled && self.cr1 & CR1_SPE == 0 {
            // Disabling aborts the frame in flight.
            self.tx_buffer = None;
            self.shifter = None;
            self.sr = (self.sr & !SR_BSY) | SR_TXE;
        }
    }

    fn write_dr(&mut self, value: u32) {
        if !self.enabled() {
            return;
        }
        if self.tx_buffer.is_some() {
            tracing::warn!("SPI DR written while TXE clear, byte dropped");
            return;
        }
        self.tx_buffer = Some(value as u8);
        self.sr &= !SR_TXE;
        self.sr |= SR_BSY;
    }

    fn read_dr(&mut self) -> u32 {
        self.sr &= !SR_RXNE;
        self.ovr_read_armed = self.sr & SR_OVR != 0;
        self.rx as u32
    }

    fn read_sr(&mut self) -> u32 {
        let value = self.sr;
        if self.ovr_read_armed {
            // OVR clears on a DR read followed by an SR read.
            self.sr &= !SR_OVR;
            self.ovr_read_armed = false;
        }
        value
    }

    fn load_shifter(&mut self) {
        if self.shifter.is_none() {
            if let Some(byte) = self.tx_buffer.take() {
                self.shifter = Some(byte);
                self.remaining = self.byte_cycles();
                self.sr |= SR_TXE | SR_BSY;
            }
        }
    }

    fn complete_byte(&mut self, mosi: u8) {
        let miso = self.device.transfer(mosi);
        self.transfers += 1;
        if self.sr & SR_RXNE != 0 {
            self.sr |= SR_OVR;
        } else {
            self.rx = miso;
            self.sr |= SR_RXNE;
        }
    }

    fn irq_level(&self) -> bool {
        (self.cr2 & CR2_RXNEIE != 0 && self.sr & SR_RXNE != 0)
            || (self.cr2 & CR2_TXEIE != 0 && self.sr & SR_TXE != 0)
            || (self.cr2 & CR2_ERRIE != 0 && self.sr & (SR_OVR | SR_MODF) != 0)
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            CR1 => self.cr1,
            CR2 => self.cr2,
            SR => self.sr,
            DR => self.rx as u32,
            CRCPR => self.crcpr,
            _ => 0,
        }
    }
}

impl Peripheral for Spi {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        Ok(match offset {
            SR => self.read_sr(),
            DR => self.read_dr(),
            _ => self.read_reg(offset),
        })
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        match offset {
            CR1 => self.write_cr1(value),
            CR2 => self.cr2 = value & 0xF7,
            DR => self.write_dr(value),
            CRCPR => self.crcpr = value & 0xFFFF,
            _ => {}
        }
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn tick(&mut self, cycles: u32) -> PeripheralTickResult {
        let mut budget = cycles;
        loop {
            self.load_shifter();
            let Some(mosi) = self.shifter else { break };
            if budget < self.remaining {
                self.remaining -= budget;
                break;
            }
            budget -= self.remaining;
            self.remaining = 0;
            self.shifter = None;
            self.complete_byte(mosi);
            if self.tx_buffer.is_none() {
                self.sr &= !SR_BSY;
                break;
            }
        }

        PeripheralTickResult {
            irq: self.irq_level(),
            ..Default::default()
        }
    }

    fn dma_request_offsets(&self) -> Vec<u64> {
        let rx = self.cr2 & CR2_RXDMAEN != 0 && self.sr & SR_RXNE != 0;
        let tx = self.cr2 & CR2_TXDMAEN != 0 && self.sr & SR_TXE != 0 && self.enabled();
        if rx || tx {
            vec![DR]
        } else {
            Vec::new()
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
