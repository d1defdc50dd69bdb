// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Register-level drivers for the regbench machine.
//!
//! Every driver is a `Copy` handle holding a block's base address and talks
//! to the hardware only through [`regbench_core::Bus`], so the same code runs
//! in application context (against a [`regbench_core::Machine`]) and inside
//! interrupt handlers (against the `&mut dyn Bus` a handler receives).

pub mod adc;
pub mod button;
pub mod clock;
pub mod dac;
pub mod dma;
pub mod exti;
pub mod flash;
pub mod gate;
pub mod gpio;
pub mod i2c;
pub mod nvic;
pub mod shared;
pub mod spi;
pub mod systick;
pub mod systime;
pub mod timer;
pub mod usart;
pub mod wait;

pub use regbench_core::{Bus, SimulationError};
pub use wait::WaitPolicy;

#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Timed out waiting for {what}")]
    Timeout { what: &'static str },
    #[error("I2C address {addr:#04x} not acknowledged")]
    Nack { addr: u8 },
    #[error("Pin mask {mask:#x} is empty or outside the 16 port pins")]
    InvalidPinMask { mask: u32 },
    #[error("Baud rate {baud} outside 9600..=921600")]
    InvalidBaud { baud: u32 },
    #[error("Invalid DMA descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Cannot derive {hz} Hz from the current clock tree")]
    InvalidFrequency { hz: u32 },
    #[error("SysTick reload {reload:#x} does not fit in 24 bits")]
    InvalidReload { reload: u32 },
    #[error("Invalid ADC sequence: {0}")]
    InvalidSequence(String),
    #[error("Flash operation at {addr:#x} failed: {reason}")]
    Flash { addr: u64, reason: &'static str },
    #[error(transparent)]
    Bus(#[from] SimulationError),
}

pub type HalResult<T> = Result<T, HalError>;

/// Base addresses of the STM32F1 blocks modeled by the bundled chip descriptors.
pub mod map {
    pub const RCC: u64 = 0x4002_1000;
    pub const FLASH: u64 = 0x4002_2000;
    /// Main flash array.
    pub const FLASH_MEMORY: u64 = 0x0800_0000;
    pub const AFIO: u64 = 0x4001_0000;
    pub const EXTI: u64 = 0x4001_0400;
    pub const GPIOA: u64 = 0x4001_0800;
    pub const GPIOB: u64 = 0x4001_0C00;
    pub const GPIOC: u64 = 0x4001_1000;
    pub const ADC1: u64 = 0x4001_2400;
    pub const SPI1: u64 = 0x4001_3000;
    pub const USART1: u64 = 0x4001_3800;
    pub const TIM2: u64 = 0x4000_0000;
    pub const TIM3: u64 = 0x4000_0400;
    pub const USART2: u64 = 0x4000_4400;
    pub const I2C1: u64 = 0x4000_5400;
    pub const DAC: u64 = 0x4000_7400;
    pub const DMA1: u64 = 0x4002_0000;
    pub const SYSTICK: u64 = 0xE000_E010;
    pub const NVIC: u64 = 0xE000_E100;

    /// Device interrupt numbers.
    pub mod irq {
        pub const EXTI0: u32 = 6;
        pub const DMA1_CHANNEL1: u32 = 11;
        pub const ADC1_2: u32 = 18;
        pub const TIM2: u32 = 28;
        pub const TIM3: u32 = 29;
        pub const I2C1_EV: u32 = 31;
        pub const SPI1: u32 = 35;
        pub const USART1: u32 = 37;
        pub const USART2: u32 = 38;
    }
}
