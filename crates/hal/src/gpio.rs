// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! GPIO configuration for both register families.
//!
//! `configure` only touches the fields of the pins in the mask: every other
//! bit of every register is written back exactly as it was read.

use crate::{Bus, HalError, HalResult};
use regbench_core::peripherals::gpio::{f1, v2};
use regbench_core::peripherals::RegisterLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioMode {
    OutputPushPull,
    OutputOpenDrain,
    InputFloating,
    InputPullUp,
    InputPullDown,
    Analog,
    /// Alternate function `af`. F1 parts route functions through AFIO and ignore the number.
    Alternate { af: u8, open_drain: bool },
}

impl GpioMode {
    fn open_drain(self) -> bool {
        matches!(
            self,
            GpioMode::OutputOpenDrain | GpioMode::Alternate { open_drain: true, .. }
        )
    }

    fn drives_pin(self) -> bool {
        matches!(
            self,
            GpioMode::OutputPushPull | GpioMode::OutputOpenDrain | GpioMode::Alternate { .. }
        )
    }
}

/// Register access for one GPIO port. `mask` selects pins (bit n = pin n).
pub trait GpioPort {
    fn configure(&self, bus: &mut dyn Bus, mask: u16, mode: GpioMode) -> HalResult<()>;
    fn set(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()>;
    fn clear(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()>;
    fn toggle(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()>;
    /// Drive the masked pins to the matching bits of `value` in one write.
    fn write(&self, bus: &mut dyn Bus, mask: u16, value: u16) -> HalResult<()>;
    fn read_input(&self, bus: &mut dyn Bus) -> HalResult<u16>;
    fn read_output(&self, bus: &mut dyn Bus) -> HalResult<u16>;
}

fn bsrr_value(set: u16, reset: u16) -> u32 {
    set as u32 | ((reset as u32) << 16)
}

/// Replace the `width`-bit field of every pin in `pins` (pin index offset by
/// `first`) with `field`.
fn replace_fields(reg: u32, pins: u16, first: u32, width: u32, field: u32) -> u32 {
    let field_mask = (1u32 << width) - 1;
    let per_reg = 32 / width;
    let mut value = reg;
    for slot in 0..per_reg {
        if pins & (1 << (first + slot)) != 0 {
            let shift = slot * width;
            value = (value & !(field_mask << shift)) | ((field & field_mask) << shift);
        }
    }
    value
}

macro_rules! bsrr_ops {
    ($bsrr:expr, $idr:expr, $odr:expr) => {
        fn set(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()> {
            bus.write_u32(self.base + $bsrr, bsrr_value(mask, 0))?;
            Ok(())
        }

        fn clear(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()> {
            bus.write_u32(self.base + $bsrr, bsrr_value(0, mask))?;
            Ok(())
        }

        fn toggle(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()> {
            let odr = bus.read_u32(self.base + $odr)? as u16;
            bus.write_u32(self.base + $bsrr, bsrr_value(!odr & mask, odr & mask))?;
            Ok(())
        }

        fn write(&self, bus: &mut dyn Bus, mask: u16, value: u16) -> HalResult<()> {
            bus.write_u32(self.base + $bsrr, bsrr_value(value & mask, !value & mask))?;
            Ok(())
        }

        fn read_input(&self, bus: &mut dyn Bus) -> HalResult<u16> {
            Ok(bus.read_u32(self.base + $idr)? as u16)
        }

        fn read_output(&self, bus: &mut dyn Bus) -> HalResult<u16> {
            Ok(bus.read_u32(self.base + $odr)? as u16)
        }
    };
}

/// STM32F1 port: 4-bit CNF/MODE fields in CRL (pins 0-7) and CRH (pins 8-15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct F1Gpio {
    base: u64,
}

impl F1Gpio {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// CNF[1:0] MODE[1:0] for a mode. Outputs run at 50 MHz.
    fn field(mode: GpioMode) -> u32 {
        match mode {
            GpioMode::Analog => 0b0000,
            GpioMode::InputFloating => 0b0100,
            GpioMode::InputPullUp | GpioMode::InputPullDown => 0b1000,
            GpioMode::OutputPushPull => 0b0011,
            GpioMode::OutputOpenDrain => 0b0111,
            GpioMode::Alternate { open_drain: false, .. } => 0b1011,
            GpioMode::Alternate { open_drain: true, .. } => 0b1111,
        }
    }
}

impl GpioPort for F1Gpio {
    fn configure(&self, bus: &mut dyn Bus, mask: u16, mode: GpioMode) -> HalResult<()> {
        // Pull direction lives in ODR; set it before the pins become pulled inputs.
        match mode {
            GpioMode::InputPullUp => self.set(bus, mask)?,
            GpioMode::InputPullDown => self.clear(bus, mask)?,
            _ => {}
        }
        let field = Self::field(mode);
        for (reg, first) in [(f1::CRL, 0), (f1::CRH, 8)] {
            if mask & (0xFF << first) == 0 {
                continue;
            }
            let addr = self.base + reg;
            let old = bus.read_u32(addr)?;
            bus.write_u32(addr, replace_fields(old, mask, first, 4, field))?;
        }
        Ok(())
    }

    bsrr_ops!(f1::BSRR, f1::IDR, f1::ODR);
}

/// STM32F3-style port with MODER/OTYPER/OSPEEDR/PUPDR/AFR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2Gpio {
    base: u64,
}

impl V2Gpio {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    fn modify(&self, bus: &mut dyn Bus, reg: u64, f: impl FnOnce(u32) -> u32) -> HalResult<()> {
        let addr = self.base + reg;
        let old = bus.read_u32(addr)?;
        bus.write_u32(addr, f(old))?;
        Ok(())
    }
}

impl GpioPort for V2Gpio {
    fn configure(&self, bus: &mut dyn Bus, mask: u16, mode: GpioMode) -> HalResult<()> {
        let moder = match mode {
            GpioMode::InputFloating | GpioMode::InputPullUp | GpioMode::InputPullDown => 0b00,
            GpioMode::OutputPushPull | GpioMode::OutputOpenDrain => 0b01,
            GpioMode::Alternate { .. } => 0b10,
            GpioMode::Analog => 0b11,
        };
        let pull = match mode {
            GpioMode::InputPullUp => 0b01,
            GpioMode::InputPullDown => 0b10,
            _ => 0b00,
        };

        // Driver configuration first, MODER last.
        let open_drain = mode.open_drain();
        self.modify(bus, v2::OTYPER, |otyper| {
            if open_drain {
                otyper | mask as u32
            } else {
                otyper & !(mask as u32)
            }
        })?;
        if mode.drives_pin() {
            self.modify(bus, v2::OSPEEDR, |r| replace_fields(r, mask, 0, 2, 0b11))?;
        }
        self.modify(bus, v2::PUPDR, |r| replace_fields(r, mask, 0, 2, pull))?;
        if let GpioMode::Alternate { af, .. } = mode {
            for (reg, first) in [(v2::AFRL, 0), (v2::AFRH, 8)] {
                if mask & (0xFF << first) != 0 {
                    self.modify(bus, reg, |r| replace_fields(r, mask, first, 4, af as u32))?;
                }
            }
        }
        self.modify(bus, v2::MODER, |r| replace_fields(r, mask, 0, 2, moder))
    }

    bsrr_ops!(v2::BSRR, v2::IDR, v2::ODR);
}

/// A port of either family, picked from the chip's register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyGpio {
    F1(F1Gpio),
    V2(V2Gpio),
}

impl AnyGpio {
    pub fn new(base: u64, layout: RegisterLayout) -> Self {
        match layout {
            RegisterLayout::Stm32F1 => AnyGpio::F1(F1Gpio::new(base)),
            RegisterLayout::Stm32V2 => AnyGpio::V2(V2Gpio::new(base)),
        }
    }

    fn port(&self) -> &dyn GpioPort {
        match self {
            AnyGpio::F1(p) => p,
            AnyGpio::V2(p) => p,
        }
    }
}

impl GpioPort for AnyGpio {
    fn configure(&self, bus: &mut dyn Bus, mask: u16, mode: GpioMode) -> HalResult<()> {
        self.port().configure(bus, mask, mode)
    }
    fn set(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()> {
        self.port().set(bus, mask)
    }
    fn clear(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()> {
        self.port().clear(bus, mask)
    }
    fn toggle(&self, bus: &mut dyn Bus, mask: u16) -> HalResult<()> {
        self.port().toggle(bus, mask)
    }
    fn write(&self, bus: &mut dyn Bus, mask: u16, value: u16) -> HalResult<()> {
        self.port().write(bus, mask, value)
    }
    fn read_input(&self, bus: &mut dyn Bus) -> HalResult<u16> {
        self.port().read_input(bus)
    }
    fn read_output(&self, bus: &mut dyn Bus) -> HalResult<u16> {
        self.port().read_output(bus)
    }
}

/// A set of pins on one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pins<P> {
    pub port: P,
    mask: u16,
}

impl<P: GpioPort> Pins<P> {
    pub fn new(port: P, mask: u32) -> HalResult<Self> {
        if mask == 0 || mask > 0xFFFF {
            return Err(HalError::InvalidPinMask { mask });
        }
        Ok(Self {
            port,
            mask: mask as u16,
        })
    }

    /// A single pin, 0..=15.
    pub fn pin(port: P, pin: u8) -> HalResult<Self> {
        Self::new(port, 1u32.checked_shl(pin as u32).unwrap_or(0))
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn configure(&self, bus: &mut dyn Bus, mode: GpioMode) -> HalResult<()> {
        self.port.configure(bus, self.mask, mode)
    }

    pub fn set(&self, bus: &mut dyn Bus) -> HalResult<()> {
        self.port.set(bus, self.mask)
    }

    pub fn clear(&self, bus: &mut dyn Bus) -> HalResult<()> {
        self.port.clear(bus, self.mask)
    }

    pub fn toggle(&self, bus: &mut dyn Bus) -> HalResult<()> {
        self.port.toggle(bus, self.mask)
    }

    pub fn write(&self, bus: &mut dyn Bus, value: u16) -> HalResult<()> {
        self.port.write(bus, self.mask, value)
    }

    /// True when any selected pin reads high.
    pub fn is_high(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(self.port.read_input(bus)? & self.mask != 0)
    }

    pub fn is_set_low(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(self.port.read_output(bus)? & self.mask == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{self, gates};
    use crate::map;
    use regbench_config::BoardManifest;
    use regbench_core::Machine;

    fn bluepill() -> Machine {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        gate::enable(&mut machine, gates::GPIOC).unwrap();
        machine
    }

    #[test]
    fn test_pin_mask_validation() {
        let port = F1Gpio::new(map::GPIOC);
        assert!(matches!(
            Pins::new(port, 0),
            Err(HalError::InvalidPinMask { mask: 0 })
        ));
        assert!(Pins::new(port, 0x1_0000).is_err());
        assert!(Pins::pin(port, 16).is_err());
        assert_eq!(Pins::pin(port, 13).unwrap().mask(), 1 << 13);
    }

    #[test]
    fn test_f1_configure_touches_only_masked_fields() {
        let mut machine = bluepill();
        let port = F1Gpio::new(map::GPIOC);
        Pins::pin(port, 13)
            .unwrap()
            .configure(&mut machine, GpioMode::OutputPushPull)
            .unwrap();
        assert_eq!(machine.read_u32(map::GPIOC + f1::CRH).unwrap(), 0x4434_4444);
        assert_eq!(machine.read_u32(map::GPIOC + f1::CRL).unwrap(), 0x4444_4444);
    }

    #[test]
    fn test_f1_pull_up_uses_odr() {
        let mut machine = bluepill();
        let pins = Pins::new(F1Gpio::new(map::GPIOC), 0b11).unwrap();
        pins.configure(&mut machine, GpioMode::InputPullUp).unwrap();
        assert_eq!(machine.read_u32(map::GPIOC + f1::CRL).unwrap(), 0x4444_4488);
        assert_eq!(machine.read_u32(map::GPIOC + f1::ODR).unwrap(), 0b11);
        assert!(pins.is_high(&mut machine).unwrap());
    }

    #[test]
    fn test_set_clear_toggle() {
        let mut machine = bluepill();
        let port = F1Gpio::new(map::GPIOC);
        let led = Pins::new(port, (1 << 13) | (1 << 14)).unwrap();
        led.configure(&mut machine, GpioMode::OutputPushPull).unwrap();

        led.set(&mut machine).unwrap();
        assert_eq!(port.read_output(&mut machine).unwrap(), 0x6000);
        port.toggle(&mut machine, 1 << 13).unwrap();
        assert_eq!(port.read_output(&mut machine).unwrap(), 0x4000);
        port.toggle(&mut machine, 0x6000).unwrap();
        assert_eq!(port.read_output(&mut machine).unwrap(), 0x2000);
        led.write(&mut machine, 0x4000).unwrap();
        assert_eq!(port.read_output(&mut machine).unwrap(), 0x4000);
        led.clear(&mut machine).unwrap();
        assert!(led.is_set_low(&mut machine).unwrap());
    }

    #[test]
    fn test_v2_alternate_function_programs_afr_before_moder() {
        let board = BoardManifest::builtin("f3discovery").unwrap();
        let chip = board.load_chip().unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        machine.bus.enable_access_log();
        gate::enable(&mut machine, gates::v2::GPIOA).unwrap();
        let base = chip.peripheral("gpioa").unwrap().base_address;
        let port = V2Gpio::new(base);

        let pins = Pins::new(port, (1 << 9) | (1 << 10)).unwrap();
        pins.configure(
            &mut machine,
            GpioMode::Alternate {
                af: 7,
                open_drain: false,
            },
        )
        .unwrap();

        assert_eq!(machine.read_u32(base + v2::AFRH).unwrap(), 0x0000_0770);
        assert_eq!(machine.read_u32(base + v2::AFRL).unwrap(), 0);
        let moder = machine.read_u32(base + v2::MODER).unwrap();
        assert_eq!((moder >> 18) & 0xF, 0b1010);

        let writes: Vec<u64> = machine
            .bus
            .access_log()
            .iter()
            .filter(|a| a.write && a.peripheral == "gpioa")
            .map(|a| a.offset)
            .collect();
        assert_eq!(writes.last(), Some(&v2::MODER));
        assert!(writes.contains(&v2::AFRH));
        assert!(!writes.contains(&v2::AFRL));
    }
}
