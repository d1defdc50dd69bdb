// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::peripherals::RegisterLayout;
use crate::SimResult;

pub mod f1 {
    pub const CRL: u64 = 0x00;
    pub const CRH: u64 = 0x04;
    pub const IDR: u64 = 0x08;
    pub const ODR: u64 = 0x0C;
    pub const BSRR: u64 = 0x10;
    pub const BRR: u64 = 0x14;
    pub const LCKR: u64 = 0x18;
}

pub mod v2 {
    pub const MODER: u64 = 0x00;
    pub const OTYPER: u64 = 0x04;
    pub const OSPEEDR: u64 = 0x08;
    pub const PUPDR: u64 = 0x0C;
    pub const IDR: u64 = 0x10;
    pub const ODR: u64 = 0x14;
    pub const BSRR: u64 = 0x18;
    pub const LCKR: u64 = 0x1C;
    pub const AFRL: u64 = 0x20;
    pub const AFRH: u64 = 0x24;
    pub const BRR: u64 = 0x28;
}

/// Electrical view of one pin derived from the mode registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinFunction {
    Input { pull: Option<bool> },
    Output,
    Analog,
}

/// STM32 GPIO port with selectable register layout (STM32F1 or STM32v2).
///
/// Input pins read the level driven from outside the chip (see
/// [`GpioPort::drive_input`]); an undriven input follows its pull resistor.
#[derive(Debug, Default, serde::Serialize)]
pub struct GpioPort {
    layout: RegisterLayout,
    crl: u32,     // 0x00: configuration register low
    crh: u32,     // 0x04: configuration register high
    moder: u32,   // 0x00: mode register (STM32v2)
    otyper: u32,  // 0x04: output type register (STM32v2)
    ospeedr: u32, // 0x08: output speed register (STM32v2)
    pupdr: u32,   // 0x0C: pull-up/pull-down register (STM32v2)
    odr: u32,
    lckr: u32,
    afrl: u32, // 0x20: alternate function low register (STM32v2)
    afrh: u32, // 0x24: alternate function high register (STM32v2)
    driven_mask: u32,
    driven_level: u32,
    last_idr: u32,
}

impl GpioPort {
    pub fn new() -> Self {
        Self::new_with_layout(RegisterLayout::Stm32F1)
    }

    pub fn new_with_layout(layout: RegisterLayout) -> Self {
        let mut port = Self {
            layout,
            ..Default::default()
        };
        if matches!(layout, RegisterLayout::Stm32F1) {
            // Reset value: floating input
            port.crl = 0x4444_4444;
            port.crh = 0x4444_4444;
        }
        port
    }

    pub fn layout(&self) -> RegisterLayout {
        self.layout
    }

    pub fn odr(&self) -> u32 {
        self.odr
    }

    fn pin_function(&self, pin: u32) -> PinFunction {
        match self.layout {
            RegisterLayout::Stm32F1 => {
                let cfg = if pin < 8 {
                    self.crl >> (pin * 4)
                } else {
                    self.crh >> ((pin - 8) * 4)
                } & 0xF;
                let mode = cfg & 0x3;
                let cnf = cfg >> 2;
                if mode != 0 {
                    PinFunction::Output
                } else {
                    match cnf {
                        0 => PinFunction::Analog,
                        1 => PinFunction::Input { pull: None },
                        // Pull direction is selected by the ODR bit.
                        _ => PinFunction::Input {
                            pull: Some(self.odr & (1 << pin) != 0),
                        },
                    }
                }
            }
            RegisterLayout::Stm32V2 => match (self.moder >> (pin * 2)) & 0x3 {
                0 => PinFunction::Input {
                    pull: match (self.pupdr >> (pin * 2)) & 0x3 {
                        1 => Some(true),
                        2 => Some(false),
                        _ => None,
                    },
                },
                3 => PinFunction::Analog,
                _ => PinFunction::Output,
            },
        }
    }

    /// Current input data register value.
    pub fn idr(&self) -> u32 {
        let mut idr = 0;
        for pin in 0..16 {
            let bit = 1 << pin;
            let high = if self.driven_mask & bit != 0 {
                self.driven_level & bit != 0
            } else {
                match self.pin_function(pin) {
                    PinFunction::Output => self.odr & bit != 0,
                    PinFunction::Input { pull: Some(up) } => up,
                    // A floating input keeps whatever it last read.
                    PinFunction::Input { pull: None } => self.last_idr & bit != 0,
                    PinFunction::Analog => false,
                }
            };
            if high {
                idr |= bit;
            }
        }
        idr
    }

    /// Drive a pin from outside. Returns the (before, after) input level.
    pub fn drive_input(&mut self, pin: u8, high: bool) -> (bool, bool) {
        let bit = 1u32 << (pin & 0xF);
        let before = self.idr() & bit != 0;
        self.driven_mask |= bit;
        if high {
            self.driven_level |= bit;
        } else {
            self.driven_level &= !bit;
        }
        self.last_idr = self.idr();
        (before, self.last_idr & bit != 0)
    }

    /// Stop driving a pin; it falls back to its pull resistor.
    pub fn release_input(&mut self, pin: u8) {
        let bit = 1u32 << (pin & 0xF);
        self.driven_mask &= !bit;
        self.last_idr = self.idr();
    }

    fn apply_bsrr(&mut self, value: u32) {
        let set = value & 0xFFFF;
        let reset = (value >> 16) & 0xFFFF;
        // Set wins over reset for the same pin.
        self.odr &= !reset;
        self.odr |= set;
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match self.layout {
            RegisterLayout::Stm32F1 => match offset {
                f1::CRL => self.crl,
                f1::CRH => self.crh,
                f1::IDR => self.idr(),
                f1::ODR => self.odr,
                f1::LCKR => self.lckr,
                _ => 0,
            },
            RegisterLayout::Stm32V2 => match offset {
                v2::MODER => self.moder,
                v2::OTYPER => self.otyper,
                v2::OSPEEDR => self.ospeedr,
                v2::PUPDR => self.pupdr,
                v2::IDR => self.idr(),
                v2::ODR => self.odr,
                v2::LCKR => self.lckr,
                v2::AFRL => self.afrl,
                v2::AFRH => self.afrh,
                _ => 0,
            },
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match self.layout {
            RegisterLayout::Stm32F1 => match offset {
                f1::CRL => self.crl = value,
                f1::CRH => self.crh = value,
                f1::ODR => self.odr = value & 0xFFFF,
                f1::BSRR => self.apply_bsrr(value),
                f1::BRR => self.odr &= !(value & 0xFFFF),
                f1::LCKR => self.lckr = value,
                _ => {}
            },
            RegisterLayout::Stm32V2 => match offset {
                v2::MODER => self.moder = value,
                v2::OTYPER => self.otyper = value & 0xFFFF,
                v2::OSPEEDR => self.ospeedr = value,
                v2::PUPDR => self.pupdr = value,
                v2::ODR => self.odr = value & 0xFFFF,
                v2::BSRR => self.apply_bsrr(value),
                v2::LCKR => self.lckr = value,
                v2::AFRL => self.afrl = value,
                v2::AFRH => self.afrh = value,
                v2::BRR => self.odr &= !(value & 0xFFFF),
                _ => {}
            },
        }
        self.last_idr = self.idr();
    }
}

impl crate::Peripheral for GpioPort {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.insert("idr".into(), self.idr().into());
        }
        value
    }
}
