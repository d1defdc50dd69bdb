// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Bus, HalResult};
use regbench_core::peripherals::dac::{CR, CR_CH2_SHIFT, CR_EN1, DHR12R1, DHR12R2, DOR1, DOR2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DacChannel {
    One,
    Two,
}

impl DacChannel {
    fn cr_shift(self) -> u32 {
        match self {
            DacChannel::One => 0,
            DacChannel::Two => CR_CH2_SHIFT,
        }
    }
}

/// Two-channel DAC, untriggered: a new value reaches the output on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dac {
    base: u64,
}

impl Dac {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn enable(&self, bus: &mut dyn Bus, channel: DacChannel) -> HalResult<()> {
        bus.modify_u32(self.base + CR, 0, CR_EN1 << channel.cr_shift())?;
        Ok(())
    }

    pub fn disable(&self, bus: &mut dyn Bus, channel: DacChannel) -> HalResult<()> {
        bus.modify_u32(self.base + CR, CR_EN1 << channel.cr_shift(), 0)?;
        Ok(())
    }

    /// Load a 12-bit right-aligned value. Upper bits are dropped.
    pub fn write(&self, bus: &mut dyn Bus, channel: DacChannel, value: u16) -> HalResult<()> {
        let dhr = match channel {
            DacChannel::One => DHR12R1,
            DacChannel::Two => DHR12R2,
        };
        bus.write_u32(self.base + dhr, (value & 0x0FFF) as u32)?;
        Ok(())
    }

    pub fn output(&self, bus: &mut dyn Bus, channel: DacChannel) -> HalResult<u16> {
        let dor = match channel {
            DacChannel::One => DOR1,
            DacChannel::Two => DOR2,
        };
        Ok(bus.read_u32(self.base + dor)? as u16)
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
    fn test_value_latches_after_one_step() {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        gate::enable(&mut machine, gates::DAC).unwrap();
        let dac = Dac::new(map::DAC);

        dac.enable(&mut machine, DacChannel::Two).unwrap();
        dac.write(&mut machine, DacChannel::Two, 0x1234).unwrap();
        assert_eq!(dac.output(&mut machine, DacChannel::Two).unwrap(), 0);
        machine.step().unwrap();
        assert_eq!(dac.output(&mut machine, DacChannel::Two).unwrap(), 0x234);
        assert_eq!(dac.output(&mut machine, DacChannel::One).unwrap(), 0);
    }
}
