// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! 8-N-1 USART driver for both register families.

use crate::wait::{wait_until, WaitPolicy};
use crate::{Bus, HalError, HalResult};
use regbench_core::peripherals::usart::{
    f1, v2, UsartStatus, CR1_RE, CR1_RXNEIE, CR1_TE, CR3_DMAR, CR3_DMAT,
};
use regbench_core::peripherals::RegisterLayout;
use std::ops::RangeInclusive;

pub const BAUD_RANGE: RangeInclusive<u32> = 9_600..=921_600;

const BRR_MIN: u64 = 16;
const BRR_MAX: u64 = 0xFFFF;

/// Register offsets of one USART family.
#[derive(Debug)]
pub struct UsartRegisters {
    pub status: u64,
    pub rx: u64,
    pub tx: u64,
    pub brr: u64,
    pub cr1: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub ue: u32,
}

static F1_REGISTERS: UsartRegisters = UsartRegisters {
    status: f1::SR,
    rx: f1::DR,
    tx: f1::DR,
    brr: f1::BRR,
    cr1: f1::CR1,
    cr2: f1::CR2,
    cr3: f1::CR3,
    ue: f1::CR1_UE,
};

static V2_REGISTERS: UsartRegisters = UsartRegisters {
    status: v2::ISR,
    rx: v2::RDR,
    tx: v2::TDR,
    brr: v2::BRR,
    cr1: v2::CR1,
    cr2: v2::CR2,
    cr3: v2::CR3,
    ue: v2::CR1_UE,
};

/// BRR for `baud` from the peripheral clock, rounded to nearest.
///
/// Fails when the divider falls outside 16..=0xFFFF.
pub fn brr_for(pclk_hz: u32, baud: u32) -> HalResult<u32> {
    if !BAUD_RANGE.contains(&baud) {
        return Err(HalError::InvalidBaud { baud });
    }
    let brr = (u64::from(pclk_hz) + u64::from(baud / 2)) / u64::from(baud);
    if !(BRR_MIN..=BRR_MAX).contains(&brr) {
        return Err(HalError::InvalidBaud { baud });
    }
    Ok(brr as u32)
}

pub trait Usart {
    fn base(&self) -> u64;
    fn registers(&self) -> &'static UsartRegisters;

    /// Drop a pending overrun. Returns whether one was flagged.
    fn clear_overrun(&self, bus: &mut dyn Bus) -> HalResult<bool>;

    /// 8 data bits, no parity, 1 stop bit, no flow control. UE goes last.
    fn configure(&self, bus: &mut dyn Bus, pclk_hz: u32, baud: u32) -> HalResult<()> {
        let regs = self.registers();
        let brr = brr_for(pclk_hz, baud)?;
        bus.write_u32(self.base() + regs.cr1, 0)?;
        bus.write_u32(self.base() + regs.brr, brr)?;
        bus.write_u32(self.base() + regs.cr2, 0)?;
        bus.write_u32(self.base() + regs.cr3, 0)?;
        bus.write_u32(self.base() + regs.cr1, CR1_TE | CR1_RE)?;
        bus.modify_u32(self.base() + regs.cr1, 0, regs.ue)?;
        tracing::debug!("USART {:#x}: {} baud, BRR {}", self.base(), baud, brr);
        Ok(())
    }

    fn status(&self, bus: &mut dyn Bus) -> HalResult<UsartStatus> {
        let raw = bus.read_u32(self.base() + self.registers().status)?;
        Ok(UsartStatus::from_bits_truncate(raw))
    }

    fn send_blocking(&self, bus: &mut dyn Bus, byte: u8, policy: WaitPolicy) -> HalResult<()> {
        wait_until(bus, policy, "USART TXE", |bus| {
            Ok(self.status(bus)?.contains(UsartStatus::TXE))
        })?;
        bus.write_u32(self.base() + self.registers().tx, byte as u32)?;
        Ok(())
    }

    fn write_all(&self, bus: &mut dyn Bus, bytes: &[u8], policy: WaitPolicy) -> HalResult<()> {
        for &byte in bytes {
            self.send_blocking(bus, byte, policy)?;
        }
        Ok(())
    }

    /// Wait until the last frame has left the shifter.
    fn flush(&self, bus: &mut dyn Bus, policy: WaitPolicy) -> HalResult<()> {
        wait_until(bus, policy, "USART TC", |bus| {
            Ok(self.status(bus)?.contains(UsartStatus::TC))
        })
    }

    fn recv_blocking(&self, bus: &mut dyn Bus, policy: WaitPolicy) -> HalResult<u8> {
        wait_until(bus, policy, "USART RXNE", |bus| {
            Ok(self.status(bus)?.contains(UsartStatus::RXNE))
        })?;
        Ok(bus.read_u32(self.base() + self.registers().rx)? as u8)
    }

    fn try_recv(&self, bus: &mut dyn Bus) -> HalResult<Option<u8>> {
        if !self.status(bus)?.contains(UsartStatus::RXNE) {
            return Ok(None);
        }
        Ok(Some(bus.read_u32(self.base() + self.registers().rx)? as u8))
    }

    fn enable_rx_interrupt(&self, bus: &mut dyn Bus, on: bool) -> HalResult<()> {
        let cr1 = self.base() + self.registers().cr1;
        if on {
            bus.modify_u32(cr1, 0, CR1_RXNEIE)?;
        } else {
            bus.modify_u32(cr1, CR1_RXNEIE, 0)?;
        }
        Ok(())
    }

    fn enable_rx_dma(&self, bus: &mut dyn Bus, on: bool) -> HalResult<()> {
        set_cr3(bus, self.base() + self.registers().cr3, CR3_DMAR, on)
    }

    fn enable_tx_dma(&self, bus: &mut dyn Bus, on: bool) -> HalResult<()> {
        set_cr3(bus, self.base() + self.registers().cr3, CR3_DMAT, on)
    }

    /// Address DMA reads received bytes from.
    fn rx_data_address(&self) -> u64 {
        self.base() + self.registers().rx
    }

    fn tx_data_address(&self) -> u64 {
        self.base() + self.registers().tx
    }
}

fn set_cr3(bus: &mut dyn Bus, addr: u64, bit: u32, on: bool) -> HalResult<()> {
    let (clear, set) = if on { (0, bit) } else { (bit, 0) };
    bus.modify_u32(addr, clear, set)?;
    Ok(())
}

/// STM32F1 USART: shared SR/DR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct F1Usart {
    base: u64,
}

impl F1Usart {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }
}

impl Usart for F1Usart {
    fn base(&self) -> u64 {
        self.base
    }

    fn registers(&self) -> &'static UsartRegisters {
        &F1_REGISTERS
    }

    /// ORE clears on an SR read followed by a DR read; the DR byte is discarded.
    fn clear_overrun(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        if !self.status(bus)?.contains(UsartStatus::ORE) {
            return Ok(false);
        }
        bus.read_u32(self.base + f1::DR)?;
        Ok(true)
    }
}

/// USART with ISR/ICR and separate RDR/TDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2Usart {
    base: u64,
}

impl V2Usart {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }
}

impl Usart for V2Usart {
    fn base(&self) -> u64 {
        self.base
    }

    fn registers(&self) -> &'static UsartRegisters {
        &V2_REGISTERS
    }

    fn clear_overrun(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        if !self.status(bus)?.contains(UsartStatus::ORE) {
            return Ok(false);
        }
        bus.write_u32(self.base + v2::ICR, v2::ICR_ORECF)?;
        Ok(true)
    }
}

/// A USART of either family, picked from the chip's register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyUsart {
    F1(F1Usart),
    V2(V2Usart),
}

impl AnyUsart {
    pub fn new(base: u64, layout: RegisterLayout) -> Self {
        match layout {
            RegisterLayout::Stm32F1 => AnyUsart::F1(F1Usart::new(base)),
            RegisterLayout::Stm32V2 => AnyUsart::V2(V2Usart::new(base)),
        }
    }
}

impl Usart for AnyUsart {
    fn base(&self) -> u64 {
        match self {
            AnyUsart::F1(u) => u.base(),
            AnyUsart::V2(u) => u.base(),
        }
    }

    fn registers(&self) -> &'static UsartRegisters {
        match self {
            AnyUsart::F1(u) => u.registers(),
            AnyUsart::V2(u) => u.registers(),
        }
    }

    fn clear_overrun(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        match self {
            AnyUsart::F1(u) => u.clear_overrun(bus),
            AnyUsart::V2(u) => u.clear_overrun(bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{self, gates};
    use crate::map;
    use regbench_config::BoardManifest;
    use regbench_core::Machine;

    fn bluepill_usart1() -> Machine {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        gate::enable(&mut machine, gates::USART1).unwrap();
        machine
    }

    #[test]
    fn test_baud_validation_and_rounding() {
        assert_eq!(brr_for(72_000_000, 115_200).unwrap(), 625);
        assert_eq!(brr_for(8_000_000, 115_200).unwrap(), 69);
        assert_eq!(brr_for(36_000_000, 9_600).unwrap(), 3750);
        assert!(matches!(
            brr_for(8_000_000, 4_800),
            Err(HalError::InvalidBaud { baud: 4_800 })
        ));
        assert!(brr_for(8_000_000, 1_000_000).is_err());
    }

    #[test]
    fn test_unreachable_divider_is_rejected() {
        // 8 MHz / 921600 needs BRR 9, below the oversampling floor.
        assert!(matches!(
            brr_for(8_000_000, 921_600),
            Err(HalError::InvalidBaud { baud: 921_600 })
        ));
        assert!(matches!(
            brr_for(0, 9_600),
            Err(HalError::InvalidBaud { baud: 9_600 })
        ));
        assert!(brr_for(1_000_000_000, 9_600).is_err());
        assert_eq!(brr_for(8_000_000, 460_800).unwrap(), 17);
        assert_eq!(brr_for(u32::MAX, 921_600).unwrap(), 4660);

        let mut machine = bluepill_usart1();
        let usart = F1Usart::new(map::USART1);
        assert!(usart.configure(&mut machine, 8_000_000, 921_600).is_err());
    }

    #[test]
    fn test_send_reaches_the_wire() {
        let mut machine = bluepill_usart1();
        let usart = F1Usart::new(map::USART1);
        usart.configure(&mut machine, 8_000_000, 460_800).unwrap();
        usart
            .write_all(&mut machine, b"hi\r\n", WaitPolicy::default())
            .unwrap();
        usart.flush(&mut machine, WaitPolicy::default()).unwrap();
        assert_eq!(machine.usart_tx("usart1"), b"hi\r\n");
    }

    #[test]
    fn test_receive_and_overrun() {
        let mut machine = bluepill_usart1();
        let usart = F1Usart::new(map::USART1);
        usart.configure(&mut machine, 8_000_000, 460_800).unwrap();
        assert_eq!(usart.try_recv(&mut machine).unwrap(), None);

        machine.inject_usart_rx("usart1", b"ab").unwrap();
        let first = usart
            .recv_blocking(&mut machine, WaitPolicy::Bounded(1_000))
            .unwrap();
        assert_eq!(first, b'a');

        // Let 'b' and 'c' land without reading: 'c' overruns.
        machine.inject_usart_rx("usart1", b"c").unwrap();
        machine.run(1_000).unwrap();
        assert!(usart.status(&mut machine).unwrap().contains(UsartStatus::ORE));
        assert!(usart.clear_overrun(&mut machine).unwrap());
        assert!(!usart.clear_overrun(&mut machine).unwrap());
        assert_eq!(usart.try_recv(&mut machine).unwrap(), None);
    }

    #[test]
    fn test_any_usart_picks_register_family() {
        let v2 = AnyUsart::new(0x4001_3800, RegisterLayout::Stm32V2);
        assert_eq!(v2.rx_data_address(), 0x4001_3800 + v2::RDR);
        assert_eq!(v2.tx_data_address(), 0x4001_3800 + v2::TDR);
        let f1 = AnyUsart::new(0x4001_3800, RegisterLayout::Stm32F1);
        assert_eq!(f1.rx_data_address(), 0x4001_3800 + f1::DR);
    }
}
