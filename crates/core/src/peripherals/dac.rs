// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, PeripheralTickResult, SimResult};
use std::any::Any;

pub const CR: u64 = 0x00;
pub const SWTRIGR: u64 = 0x04;
pub const DHR12R1: u64 = 0x08;
pub const DHR12L1: u64 = 0x0C;
pub const DHR8R1: u64 = 0x10;
pub const DHR12R2: u64 = 0x14;
pub const DHR12L2: u64 = 0x18;
pub const DHR8R2: u64 = 0x1C;
pub const DOR1: u64 = 0x2C;
pub const DOR2: u64 = 0x30;

pub const CR_EN1: u32 = 1 << 0;
pub const CR_BOFF1: u32 = 1 << 1;
pub const CR_TEN1: u32 = 1 << 2;
pub const CR_TSEL1_SHIFT: u32 = 3;
pub const TSEL_SOFTWARE: u32 = 0b111;
/// Channel 2 control bits sit 16 bits above channel 1.
pub const CR_CH2_SHIFT: u32 = 16;

#[derive(Debug, Default, serde::Serialize)]
struct Channel {
    dhr: u16,
    dor: u16,
    load_pending: bool,
    sw_trigger: bool,
    updates: u64,
}

/// Two-channel 12-bit DAC.
///
/// With the trigger disabled a holding-register write reaches DOR on the
/// next tick. With TEN set and TSEL = software, a SWTRIGR bit does it.
#[derive(Debug, Default, serde::Serialize)]
pub struct Dac {
    cr: u32,
    channels: [Channel; 2],
}

impl Dac {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output register of channel 0 or 1.
    pub fn output(&self, channel: usize) -> u16 {
        self.channels.get(channel).map(|c| c.dor).unwrap_or(0)
    }

    /// Output voltage for a reference voltage, zero when the channel is off.
    pub fn output_volts(&self, channel: usize, vref: f32) -> f32 {
        if self.channel_cr(channel) & CR_EN1 == 0 {
            return 0.0;
        }
        self.output(channel) as f32 * vref / 4095.0
    }

    pub fn updates(&self, channel: usize) -> u64 {
        self.channels.get(channel).map(|c| c.updates).unwrap_or(0)
    }

    fn channel_cr(&self, channel: usize) -> u32 {
        (self.cr >> (CR_CH2_SHIFT * channel as u32)) & 0xFFFF
    }

    fn hold(&mut self, channel: usize, value: u16) {
        let triggered = self.channel_cr(channel) & CR_TEN1 != 0;
        let ch = &mut self.channels[channel];
        ch.dhr = value & 0x0FFF;
        if !triggered {
            ch.load_pending = true;
        }
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            CR => self.cr,
            DHR12R1 => self.channels[0].dhr as u32,
            DHR12L1 => (self.channels[0].dhr as u32) << 4,
            DHR8R1 => (self.channels[0].dhr >> 4) as u32,
            DHR12R2 => self.channels[1].dhr as u32,
            DHR12L2 => (self.channels[1].dhr as u32) << 4,
            DHR8R2 => (self.channels[1].dhr >> 4) as u32,
            DOR1 => self.channels[0].dor as u32,
            DOR2 => self.channels[1].dor as u32,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            CR => self.cr = value & 0x1FFF_1FFF,
            SWTRIGR => {
                for channel in 0..2 {
                    let cr = self.channel_cr(channel);
                    let software = (cr >> CR_TSEL1_SHIFT) & 0x7 == TSEL_SOFTWARE;
                    if value & (1 << channel) != 0 && cr & CR_TEN1 != 0 && software {
                        self.channels[channel].sw_trigger = true;
                    }
                }
            }
            DHR12R1 => self.hold(0, value as u16),
            DHR12L1 => self.hold(0, (value >> 4) as u16),
            DHR8R1 => self.hold(0, ((value & 0xFF) << 4) as u16),
            DHR12R2 => self.hold(1, value as u16),
            DHR12L2 => self.hold(1, (value >> 4) as u16),
            DHR8R2 => self.hold(1, ((value & 0xFF) << 4) as u16),
            _ => {}
        }
    }
}

impl Peripheral for Dac {
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

    fn tick(&mut self, _cycles: u32) -> PeripheralTickResult {
        for channel in 0..2 {
            let enabled = self.channel_cr(channel) & CR_EN1 != 0;
            let ch = &mut self.channels[channel];
            if ch.load_pending || ch.sw_trigger {
                ch.load_pending = false;
                ch.sw_trigger = false;
                if enabled {
                    ch.dor = ch.dhr;
                    ch.updates += 1;
                }
            }
        }
        PeripheralTickResult::default()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_latches_on_next_tick() {
        let mut dac = Dac::new();
        dac.write(CR, CR_EN1).unwrap();
        dac.write(DHR12R1, 0x0800).unwrap();
        assert_eq!(dac.read(DOR1).unwrap(), 0);
        dac.tick(1);
        assert_eq!(dac.read(DOR1).unwrap(), 0x0800);
        assert!((dac.output_volts(0, 3.3) - 1.6504).abs() < 0.01);
    }

    #[test]
    fn test_value_truncated_to_twelve_bits() {
        let mut dac = Dac::new();
        dac.write(CR, CR_EN1).unwrap();
        dac.write(DHR12R1, 0xFFFF).unwrap();
        dac.tick(1);
        assert_eq!(dac.output(0), 0x0FFF);
    }

    #[test]
    fn test_software_trigger() {
        let mut dac = Dac::new();
        dac.write(CR, CR_EN1 | CR_TEN1 | (TSEL_SOFTWARE << CR_TSEL1_SHIFT))
            .unwrap();
        dac.write(DHR12R1, 100).unwrap();
        dac.tick(1);
        assert_eq!(dac.output(0), 0);
        dac.write(SWTRIGR, 1).unwrap();
        dac.tick(1);
        assert_eq!(dac.output(0), 100);
    }

    #[test]
    fn test_disabled_channel_holds_output() {
        let mut dac = Dac::new();
        dac.write(DHR12R2, 55).unwrap();
        dac.tick(1);
        assert_eq!(dac.output(1), 0);
        assert_eq!(dac.updates(1), 0);
    }
}
