// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Demonstration programs. Each one configures the simulated board through
//! the driver crate, runs it, and checks what the board did.

mod analog;
mod blink;
mod buses;
mod input;
mod serial;
mod storage;

use crate::target::Target;
use anyhow::Result;
use serde::Serialize;

/// What a demo observed and whether it matched expectations.
#[derive(Debug, Clone, Serialize)]
pub struct DemoOutcome {
    pub passed: bool,
    pub detail: String,
}

impl DemoOutcome {
    pub fn check(passed: bool, detail: impl Into<String>) -> Self {
        Self {
            passed,
            detail: detail.into(),
        }
    }
}

pub struct Demo {
    pub name: &'static str,
    pub summary: &'static str,
    /// Board IO bindings and chip peripherals that must exist.
    pub board_io: &'static [&'static str],
    pub peripherals: &'static [&'static str],
    pub cycles_per_step: u32,
    pub run: fn(&mut Target) -> Result<DemoOutcome>,
}

impl Demo {
    /// Name the first missing board binding or chip peripheral.
    pub fn missing_requirement(&self, target: &Target) -> Option<String> {
        if let Some(io) = self.board_io.iter().find(|io| target.board.io(io).is_none()) {
            return Some(format!("board '{}' has no '{}'", target.board.name, io));
        }
        self.peripherals
            .iter()
            .find(|id| target.chip.peripheral(id).is_none())
            .map(|id| format!("chip '{}' has no peripheral '{}'", target.chip.name, id))
    }
}

pub const DEMOS: &[Demo] = &[
    Demo {
        name: "miniblink",
        summary: "busy-wait LED blink",
        board_io: &["led"],
        peripherals: &[],
        cycles_per_step: 1,
        run: blink::miniblink,
    },
    Demo {
        name: "systick-blink",
        summary: "LED blink paced by the SysTick millisecond clock",
        board_io: &["led"],
        peripherals: &["systick"],
        cycles_per_step: 1000,
        run: blink::systick_blink,
    },
    Demo {
        name: "timer-irq",
        summary: "TIM2 update interrupt toggles the LED at 10 Hz",
        board_io: &["led"],
        peripherals: &["tim2"],
        cycles_per_step: 1000,
        run: blink::timer_irq,
    },
    Demo {
        name: "pwm",
        summary: "four TIM2 PWM channels at 1 kHz, duty measured on the outputs",
        board_io: &[],
        peripherals: &["tim2"],
        cycles_per_step: 100,
        run: blink::pwm,
    },
    Demo {
        name: "button",
        summary: "polled, debounced button toggles the LED",
        board_io: &["led", "button"],
        peripherals: &[],
        cycles_per_step: 1,
        run: input::button,
    },
    Demo {
        name: "exti",
        summary: "edge interrupt mirrors the button on the LED",
        board_io: &["led", "button"],
        peripherals: &["exti"],
        cycles_per_step: 1,
        run: input::exti,
    },
    Demo {
        name: "usart-echo",
        summary: "RXNE interrupt fills a ring buffer, main loop echoes it",
        board_io: &[],
        peripherals: &["usart1"],
        cycles_per_step: 100,
        run: serial::usart_echo,
    },
    Demo {
        name: "dma-rx",
        summary: "USART receive into RAM by DMA, completion interrupt hands it back",
        board_io: &[],
        peripherals: &["usart1", "dma1"],
        cycles_per_step: 100,
        run: serial::dma_rx,
    },
    Demo {
        name: "adc",
        summary: "calibrated polling conversions printed over USART",
        board_io: &[],
        peripherals: &["adc1", "usart1"],
        cycles_per_step: 10,
        run: analog::adc,
    },
    Demo {
        name: "adc-timer",
        summary: "TIM3 trigger output starts a scan sequence, EOC interrupt collects it",
        board_io: &[],
        peripherals: &["adc1", "tim3"],
        cycles_per_step: 10,
        run: analog::adc_timer,
    },
    Demo {
        name: "dac",
        summary: "12-bit ramp on DAC channel 1",
        board_io: &[],
        peripherals: &["dac"],
        cycles_per_step: 1,
        run: analog::dac,
    },
    Demo {
        name: "i2c-eeprom",
        summary: "write an EEPROM page over I2C and read it back",
        board_io: &[],
        peripherals: &["i2c1"],
        cycles_per_step: 1,
        run: buses::i2c_eeprom,
    },
    Demo {
        name: "spi-loopback",
        summary: "SPI master exchange against a loopback slave",
        board_io: &[],
        peripherals: &["spi1"],
        cycles_per_step: 1,
        run: buses::spi_loopback,
    },
    Demo {
        name: "flash",
        summary: "erase a flash page, program a record and read it back",
        board_io: &[],
        peripherals: &["flash"],
        cycles_per_step: 10,
        run: storage::flash,
    },
];

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|d| d.name == name)
}
