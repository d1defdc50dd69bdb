// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::wait::{wait_until, WaitPolicy};
use crate::{Bus, HalResult};
use regbench_core::peripherals::spi::{
    CR1, CR1_BR_MASK, CR1_BR_SHIFT, CR1_CPHA, CR1_CPOL, CR1_LSBFIRST, CR1_MSTR, CR1_SPE,
    CR1_SSI, CR1_SSM, CR2, DR, SR, SR_OVR, SR_RXNE, SR_TXE,
};

/// Clock polarity and phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl SpiMode {
    fn cr1_bits(self) -> u32 {
        match self {
            SpiMode::Mode0 => 0,
            SpiMode::Mode1 => CR1_CPHA,
            SpiMode::Mode2 => CR1_CPOL,
            SpiMode::Mode3 => CR1_CPOL | CR1_CPHA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpiConfig {
    pub mode: SpiMode,
    /// BR field: SCK = pclk / 2^(prescaler + 1), 0..=7.
    pub prescaler: u8,
    pub lsb_first: bool,
}

/// SPI master with software slave management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spi {
    base: u64,
}

impl Spi {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn configure(&self, bus: &mut dyn Bus, config: SpiConfig) -> HalResult<()> {
        bus.write_u32(self.base + CR1, 0)?;
        bus.write_u32(self.base + CR2, 0)?;
        let mut cr1 = CR1_MSTR
            | CR1_SSM
            | CR1_SSI
            | config.mode.cr1_bits()
            | (((config.prescaler as u32) << CR1_BR_SHIFT) & CR1_BR_MASK);
        if config.lsb_first {
            cr1 |= CR1_LSBFIRST;
        }
        bus.write_u32(self.base + CR1, cr1)?;
        bus.write_u32(self.base + CR1, cr1 | CR1_SPE)?;
        Ok(())
    }

    pub fn disable(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.modify_u32(self.base + CR1, CR1_SPE, 0)?;
        Ok(())
    }

    /// Exchange one byte.
    pub fn transfer(&self, bus: &mut dyn Bus, byte: u8, policy: WaitPolicy) -> HalResult<u8> {
        let sr = self.base + SR;
        wait_until(bus, policy, "SPI TXE", |bus| Ok(bus.read_u32(sr)? & SR_TXE != 0))?;
        bus.write_u32(self.base + DR, byte as u32)?;
        wait_until(bus, policy, "SPI RXNE", |bus| Ok(bus.read_u32(sr)? & SR_RXNE != 0))?;
        Ok(bus.read_u32(self.base + DR)? as u8)
    }

    /// Exchange every byte of `buf`, replacing each with what came back.
    pub fn transfer_in_place(
        &self,
        bus: &mut dyn Bus,
        buf: &mut [u8],
        policy: WaitPolicy,
    ) -> HalResult<()> {
        for byte in buf.iter_mut() {
            *byte = self.transfer(bus, *byte, policy)?;
        }
        Ok(())
    }

    pub fn overrun(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(bus.read_u32(self.base + SR)? & SR_OVR != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{self, gates};
    use crate::map;
    use regbench_config::BoardManifest;
    use regbench_core::Machine;

    #[test]
    fn test_loopback_transfer() {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        gate::enable(&mut machine, gates::SPI1).unwrap();
        let spi = Spi::new(map::SPI1);
        spi.configure(
            &mut machine,
            SpiConfig {
                mode: SpiMode::Mode3,
                prescaler: 1,
                lsb_first: false,
            },
        )
        .unwrap();
        let cr1 = machine.read_u32(map::SPI1 + CR1).unwrap();
        assert_eq!(cr1 & (CR1_CPOL | CR1_CPHA | CR1_SPE), CR1_CPOL | CR1_CPHA | CR1_SPE);

        let mut buf = *b"loop";
        spi.transfer_in_place(&mut machine, &mut buf, WaitPolicy::Bounded(200))
            .unwrap();
        assert_eq!(&buf, b"loop");
        assert!(!spi.overrun(&mut machine).unwrap());
    }
}
