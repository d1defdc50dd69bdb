// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::wait::{delay_steps, wait_clear, wait_set, WaitPolicy};
use crate::{Bus, HalResult};
use crate::HalError;
use regbench_core::peripherals::adc::{
    sequence_slot, CHANNELS, CR1, CR1_EOCIE, CR1_SCAN, CR2, CR2_ADON, CR2_CAL, CR2_CONT,
    CR2_EXTSEL_MASK, CR2_EXTSEL_SHIFT, CR2_EXTSEL_SWSTART, CR2_EXTTRIG, CR2_RSTCAL, CR2_SWSTART,
    DR, MAX_SEQUENCE, SMPR1, SMPR2, SQR1, SQR1_L_SHIFT, SR, SR_EOC,
};

/// Steps allowed for the analog block to settle after ADON (t_STAB).
const STABILIZATION_STEPS: u32 = 32;

/// Regular-group sample time selection, SMPx field value 0..=7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTime(pub u8);

impl SampleTime {
    pub const CYCLES_1_5: SampleTime = SampleTime(0);
    pub const CYCLES_28_5: SampleTime = SampleTime(3);
    pub const CYCLES_239_5: SampleTime = SampleTime(7);
}

/// Regular group trigger sources (CR2.EXTSEL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegularTrigger {
    Tim1Cc1 = 0,
    Tim1Cc2 = 1,
    Tim1Cc3 = 2,
    Tim2Cc2 = 3,
    Tim3Trgo = 4,
    Tim4Cc4 = 5,
    Exti11 = 6,
    Software = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adc {
    base: u64,
}

impl Adc {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    /// Set ADON and let the converter stabilize. A powered converter is left alone:
    /// rewriting ADON would start a conversion.
    pub fn power_on(&self, bus: &mut dyn Bus) -> HalResult<()> {
        if bus.read_u32(self.base + CR2)? & CR2_ADON != 0 {
            return Ok(());
        }
        bus.modify_u32(self.base + CR2, 0, CR2_ADON)?;
        delay_steps(bus, STABILIZATION_STEPS)
    }

    pub fn power_off(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.modify_u32(self.base + CR2, CR2_ADON, 0)?;
        Ok(())
    }

    /// Reset the calibration registers, then run a calibration.
    pub fn calibrate(&self, bus: &mut dyn Bus, policy: WaitPolicy) -> HalResult<()> {
        let cr2 = self.base + CR2;
        bus.modify_u32(cr2, 0, CR2_RSTCAL)?;
        wait_clear(bus, policy, "ADC calibration reset", cr2, CR2_RSTCAL)?;
        bus.modify_u32(cr2, 0, CR2_CAL)?;
        wait_clear(bus, policy, "ADC calibration", cr2, CR2_CAL)?;
        tracing::debug!("ADC {:#x}: calibrated", self.base);
        Ok(())
    }

    fn set_sample_time(
        &self,
        bus: &mut dyn Bus,
        channel: u8,
        sample_time: SampleTime,
    ) -> HalResult<()> {
        let (smpr, slot) = if channel < 10 {
            (SMPR2, channel as u32)
        } else {
            (SMPR1, channel as u32 - 10)
        };
        let shift = slot * 3;
        bus.modify_u32(
            self.base + smpr,
            0x7 << shift,
            ((sample_time.0 & 0x7) as u32) << shift,
        )?;
        Ok(())
    }

    /// Program the regular sequence: `channels[0]` converts first. More than one
    /// channel turns on scan mode, so a single start converts the whole list.
    pub fn set_sequence(
        &self,
        bus: &mut dyn Bus,
        channels: &[u8],
        sample_time: SampleTime,
    ) -> HalResult<()> {
        if channels.is_empty() || channels.len() > MAX_SEQUENCE {
            return Err(HalError::InvalidSequence(format!(
                "{} channels, expected 1..={}",
                channels.len(),
                MAX_SEQUENCE
            )));
        }
        if let Some(bad) = channels.iter().find(|&&c| c as usize >= CHANNELS) {
            return Err(HalError::InvalidSequence(format!(
                "channel {} does not exist",
                bad
            )));
        }

        for &channel in channels {
            self.set_sample_time(bus, channel, sample_time)?;
        }
        let mut sqr = [0u32; 3];
        for (n, &channel) in channels.iter().enumerate() {
            let (reg, shift) = sequence_slot(n);
            sqr[((reg - SQR1) / 4) as usize] |= (channel as u32) << shift;
        }
        sqr[0] |= (channels.len() as u32 - 1) << SQR1_L_SHIFT;
        for (i, value) in sqr.into_iter().enumerate() {
            bus.write_u32(self.base + SQR1 + 4 * i as u64, value)?;
        }

        let (clear, set) = if channels.len() > 1 {
            (0, CR1_SCAN)
        } else {
            (CR1_SCAN, 0)
        };
        bus.modify_u32(self.base + CR1, clear, set)?;
        tracing::debug!("ADC {:#x}: sequence {:?}", self.base, channels);
        Ok(())
    }

    /// Convert `channel` as the only member of the regular sequence.
    pub fn select_channel(
        &self,
        bus: &mut dyn Bus,
        channel: u8,
        sample_time: SampleTime,
    ) -> HalResult<()> {
        self.set_sequence(bus, &[channel], sample_time)
    }

    /// Conversions per start, as programmed in SQR1.L and CR1.SCAN.
    pub fn sequence_length(&self, bus: &mut dyn Bus) -> HalResult<usize> {
        if bus.read_u32(self.base + CR1)? & CR1_SCAN == 0 {
            return Ok(1);
        }
        Ok(((bus.read_u32(self.base + SQR1)? >> SQR1_L_SHIFT) & 0xF) as usize + 1)
    }

    /// Start conversions from `trigger`. Anything but [`RegularTrigger::Software`]
    /// leaves the start to the selected source.
    pub fn set_trigger(&self, bus: &mut dyn Bus, trigger: RegularTrigger) -> HalResult<()> {
        bus.modify_u32(
            self.base + CR2,
            CR2_EXTSEL_MASK,
            ((trigger as u32) << CR2_EXTSEL_SHIFT) | CR2_EXTTRIG,
        )?;
        Ok(())
    }

    pub fn set_continuous(&self, bus: &mut dyn Bus, on: bool) -> HalResult<()> {
        let (clear, set) = if on { (0, CR2_CONT) } else { (CR2_CONT, 0) };
        bus.modify_u32(self.base + CR2, clear, set)?;
        Ok(())
    }

    pub fn enable_eoc_interrupt(&self, bus: &mut dyn Bus, on: bool) -> HalResult<()> {
        let (clear, set) = if on { (0, CR1_EOCIE) } else { (CR1_EOCIE, 0) };
        bus.modify_u32(self.base + CR1, clear, set)?;
        Ok(())
    }

    /// Software-trigger a regular conversion.
    pub fn start(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.modify_u32(
            self.base + CR2,
            0,
            CR2_EXTSEL_SWSTART | CR2_EXTTRIG | CR2_SWSTART,
        )?;
        Ok(())
    }

    pub fn end_of_conversion(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(bus.read_u32(self.base + SR)? & SR_EOC != 0)
    }

    /// Read the last result. Clears EOC.
    pub fn value(&self, bus: &mut dyn Bus) -> HalResult<u16> {
        Ok(bus.read_u32(self.base + DR)? as u16)
    }

    /// Start one conversion and poll EOC for the result.
    pub fn read_blocking(&self, bus: &mut dyn Bus, policy: WaitPolicy) -> HalResult<u16> {
        self.start(bus)?;
        wait_set(bus, policy, "ADC end of conversion", self.base + SR, SR_EOC)?;
        self.value(bus)
    }

    /// Convert the programmed sequence once, one result per slot into `out`.
    pub fn read_sequence(
        &self,
        bus: &mut dyn Bus,
        out: &mut [u16],
        policy: WaitPolicy,
    ) -> HalResult<()> {
        let length = self.sequence_length(bus)?;
        if out.len() != length {
            return Err(HalError::InvalidSequence(format!(
                "{} result slots for a {}-channel sequence",
                out.len(),
                length
            )));
        }
        self.start(bus)?;
        for slot in out.iter_mut() {
            wait_set(bus, policy, "ADC end of conversion", self.base + SR, SR_EOC)?;
            *slot = self.value(bus)?;
        }
        Ok(())
    }
}
