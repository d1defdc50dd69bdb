// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{map, Bus, HalResult};
use regbench_config::{ClockGateConfig, PeripheralBus};
use regbench_core::peripherals::rcc;

/// One peripheral clock-enable bit in RCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockGate {
    pub bus: PeripheralBus,
    pub bit: u8,
}

impl ClockGate {
    pub const fn new(bus: PeripheralBus, bit: u8) -> Self {
        Self { bus, bit }
    }

    fn register(&self) -> u64 {
        map::RCC
            + match self.bus {
                PeripheralBus::Ahb => rcc::AHBENR,
                PeripheralBus::Apb1 => rcc::APB1ENR,
                PeripheralBus::Apb2 => rcc::APB2ENR,
            }
    }

    fn mask(&self) -> u32 {
        1 << self.bit
    }
}

impl From<ClockGateConfig> for ClockGate {
    fn from(config: ClockGateConfig) -> Self {
        Self::new(config.bus, config.bit)
    }
}

/// Turn a peripheral clock on. Enabling an enabled clock changes nothing.
pub fn enable(bus: &mut dyn Bus, gate: ClockGate) -> HalResult<()> {
    bus.modify_u32(gate.register(), 0, gate.mask())?;
    Ok(())
}

pub fn disable(bus: &mut dyn Bus, gate: ClockGate) -> HalResult<()> {
    bus.modify_u32(gate.register(), gate.mask(), 0)?;
    Ok(())
}

pub fn is_enabled(bus: &mut dyn Bus, gate: ClockGate) -> HalResult<bool> {
    Ok(bus.read_u32(gate.register())? & gate.mask() != 0)
}

/// Clock gates of the STM32F1 blocks.
pub mod gates {
    use super::ClockGate;
    use regbench_config::PeripheralBus::{Ahb, Apb1, Apb2};

    pub const DMA1: ClockGate = ClockGate::new(Ahb, 0);
    pub const AFIO: ClockGate = ClockGate::new(Apb2, 0);
    pub const GPIOA: ClockGate = ClockGate::new(Apb2, 2);
    pub const GPIOB: ClockGate = ClockGate::new(Apb2, 3);
    pub const GPIOC: ClockGate = ClockGate::new(Apb2, 4);
    pub const ADC1: ClockGate = ClockGate::new(Apb2, 9);
    pub const SPI1: ClockGate = ClockGate::new(Apb2, 12);
    pub const USART1: ClockGate = ClockGate::new(Apb2, 14);
    pub const TIM2: ClockGate = ClockGate::new(Apb1, 0);
    pub const TIM3: ClockGate = ClockGate::new(Apb1, 1);
    pub const USART2: ClockGate = ClockGate::new(Apb1, 17);
    pub const I2C1: ClockGate = ClockGate::new(Apb1, 21);
    pub const DAC: ClockGate = ClockGate::new(Apb1, 29);

    /// STM32F3 parts keep the GPIO ports on AHB.
    pub mod v2 {
        use super::{Ahb, Apb2, ClockGate};

        pub const GPIOA: ClockGate = ClockGate::new(Ahb, 17);
        pub const GPIOB: ClockGate = ClockGate::new(Ahb, 18);
        pub const GPIOE: ClockGate = ClockGate::new(Ahb, 21);
        pub const SYSCFG: ClockGate = ClockGate::new(Apb2, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regbench_config::BoardManifest;
    use regbench_core::Machine;

    #[test]
    fn test_gates_match_chip_descriptor() {
        let chip = BoardManifest::builtin("bluepill")
            .unwrap()
            .load_chip()
            .unwrap();
        for (id, gate) in [
            ("dma1", gates::DMA1),
            ("gpioc", gates::GPIOC),
            ("usart1", gates::USART1),
            ("tim2", gates::TIM2),
            ("i2c1", gates::I2C1),
            ("dac", gates::DAC),
        ] {
            let config = chip.peripheral(id).and_then(|p| p.clock).unwrap();
            assert_eq!(ClockGate::from(config), gate, "{}", id);
        }
    }

    #[test]
    fn test_enable_is_idempotent_and_preserves_other_bits() {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        enable(&mut machine, gates::GPIOA).unwrap();
        enable(&mut machine, gates::USART1).unwrap();
        enable(&mut machine, gates::USART1).unwrap();
        let apb2 = machine.read_u32(map::RCC + rcc::APB2ENR).unwrap();
        assert_eq!(apb2, (1 << 2) | (1 << 14));

        disable(&mut machine, gates::GPIOA).unwrap();
        assert!(!is_enabled(&mut machine, gates::GPIOA).unwrap());
        assert!(is_enabled(&mut machine, gates::USART1).unwrap());
    }
}
