// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, PeripheralTickResult, SimResult};
use std::any::Any;

pub const SR: u64 = 0x00;
pub const CR1: u64 = 0x04;
pub const CR2: u64 = 0x08;
pub const SMPR1: u64 = 0x0C;
pub const SMPR2: u64 = 0x10;
pub const SQR1: u64 = 0x2C;
pub const SQR2: u64 = 0x30;
pub const SQR3: u64 = 0x34;
pub const DR: u64 = 0x4C;

pub const SR_EOC: u32 = 1 << 1;
pub const SR_STRT: u32 = 1 << 4;
pub const CR1_EOCIE: u32 = 1 << 5;
pub const CR1_SCAN: u32 = 1 << 8;
pub const CR2_ADON: u32 = 1 << 0;
pub const CR2_CONT: u32 = 1 << 1;
pub const CR2_CAL: u32 = 1 << 2;
pub const CR2_RSTCAL: u32 = 1 << 3;
pub const CR2_DMA: u32 = 1 << 8;
pub const CR2_ALIGN: u32 = 1 << 11;
pub const CR2_EXTSEL_SHIFT: u32 = 17;
pub const CR2_EXTSEL_MASK: u32 = 0b111 << CR2_EXTSEL_SHIFT;
pub const CR2_EXTSEL_SWSTART: u32 = 0b111 << CR2_EXTSEL_SHIFT;
pub const CR2_EXTTRIG: u32 = 1 << 20;
pub const CR2_SWSTART: u32 = 1 << 22;

pub const CHANNELS: usize = 18;
/// Longest regular sequence (SQR1.L + 1).
pub const MAX_SEQUENCE: usize = 16;
pub const SQR1_L_SHIFT: u32 = 20;
/// Internal temperature sensor and VREFINT channels.
pub const TEMP_CHANNEL: u8 = 16;
pub const VREFINT_CHANNEL: u8 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
enum Phase {
    Off,
    Stabilizing(u32),
    Idle,
    Calibrating(u32),
    ResettingCalibration(u32),
    Converting(u32),
}

/// Register and 5-bit field position of regular sequence slot `n` (0-based).
pub fn sequence_slot(n: usize) -> (u64, u32) {
    match n {
        0..=5 => (SQR3, n as u32 * 5),
        6..=11 => (SQR2, (n as u32 - 6) * 5),
        _ => (SQR1, (n as u32 - 12) * 5),
    }
}

/// STM32F1 ADC regular group.
///
/// With CR1.SCAN set a start converts SQ1..SQ(L+1) in order, one channel per
/// conversion time, setting EOC (and the DMA request) after each one. Without
/// SCAN only SQ1 is converted. EXTSEL codes listed in the trigger table start
/// the group when the named peripheral pulses its trigger output.
///
/// Sample values are supplied per channel with [`Adc::set_channel_value`].
/// EOC is cleared by reading DR.
#[derive(Debug, serde::Serialize)]
pub struct Adc {
    sr: u32,
    cr1: u32,
    cr2: u32,
    smpr1: u32,
    smpr2: u32,
    sqr1: u32,
    sqr2: u32,
    sqr3: u32,
    dr: u32,

    phase: Phase,
    /// Sequence slot the running conversion belongs to.
    slot: usize,
    samples: [u16; CHANNELS],
    #[serde(skip)]
    triggers: Vec<(u32, String)>,
    conversions: u64,
    calibrated: bool,

    powerup_cycles: u32,
    calibration_cycles: u32,
    conversion_cycles: u32,
}

impl Adc {
    pub fn new() -> Self {
        let mut samples = [0; CHANNELS];
        samples[TEMP_CHANNEL as usize] = 1750;
        samples[VREFINT_CHANNEL as usize] = 1490;
        Self {
            sr: 0,
            cr1: 0,
            cr2: 0,
            smpr1: 0,
            smpr2: 0,
            sqr1: 0,
            sqr2: 0,
            sqr3: 0,
            dr: 0,
            phase: Phase::Off,
            slot: 0,
            samples,
            triggers: Vec::new(),
            conversions: 0,
            calibrated: false,
            powerup_cycles: 20,
            calibration_cycles: 83,
            conversion_cycles: 14,
        }
    }

    /// Map EXTSEL codes to the peripherals whose trigger output starts a conversion.
    pub fn with_triggers(mut self, triggers: Vec<(u32, String)>) -> Self {
        self.triggers = triggers;
        self
    }

    /// Value the next conversion of `channel` returns (12-bit).
    pub fn set_channel_value(&mut self, channel: u8, value: u16) {
        if let Some(slot) = self.samples.get_mut(channel as usize) {
            *slot = value & 0x0FFF;
        }
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    fn scanning(&self) -> bool {
        self.cr1 & CR1_SCAN != 0
    }

    /// Conversions in one pass of the regular group.
    pub fn sequence_length(&self) -> usize {
        if self.scanning() {
            ((self.sqr1 >> SQR1_L_SHIFT) & 0xF) as usize + 1
        } else {
            1
        }
    }

    fn sequence_channel(&self, n: usize) -> u8 {
        let (reg, shift) = sequence_slot(n);
        let value = match reg {
            SQR3 => self.sqr3,
            SQR2 => self.sqr2,
            _ => self.sqr1,
        };
        ((value >> shift) & 0x1F) as u8
    }

    fn start_conversion(&mut self) {
        self.slot = 0;
        self.phase = Phase::Converting(self.conversion_cycles);
        self.sr |= SR_STRT;
        // Clear EOC bit on start
        self.sr &= !SR_EOC;
    }

    fn write_cr2(&mut self, value: u32) {
        let old = self.cr2;
        let was_on = old & CR2_ADON != 0;
        // SWSTART, CAL and RSTCAL read back as set only while the action runs.
        self.cr2 = (value & !(CR2_SWSTART | CR2_CAL | CR2_RSTCAL)) | (old & (CR2_CAL | CR2_RSTCAL));

        if value & CR2_ADON == 0 {
            self.cr2 &= !(CR2_CAL | CR2_RSTCAL);
            self.phase = Phase::Off;
            return;
        }
        if !was_on {
            self.phase = Phase::Stabilizing(self.powerup_cycles);
            return;
        }
        if self.phase != Phase::Idle {
            return;
        }

        if value & CR2_RSTCAL != 0 {
            self.cr2 |= CR2_RSTCAL;
            self.phase = Phase::ResettingCalibration(self.calibration_cycles / 8);
        } else if value & CR2_CAL != 0 {
            self.cr2 |= CR2_CAL;
            self.phase = Phase::Calibrating(self.calibration_cycles);
        } else if value & CR2_SWSTART != 0 && value & CR2_EXTTRIG != 0 {
            self.start_conversion();
        } else if (value ^ old) & !(CR2_ADON | CR2_CAL | CR2_RSTCAL | CR2_SWSTART) == 0 {
            // Rewriting ADON with no other change starts a conversion.
            self.start_conversion();
        }
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            SR => self.sr,
            CR1 => self.cr1,
            CR2 => self.cr2,
            SMPR1 => self.smpr1,
            SMPR2 => self.smpr2,
            SQR1 => self.sqr1,
            SQR2 => self.sqr2,
            SQR3 => self.sqr3,
            DR => self.dr,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            // rc_w0
            SR => self.sr &= value | !0x1F,
            CR1 => self.cr1 = value & 0x00CF_FFFF,
            CR2 => self.write_cr2(value & 0x00FE_F90F),
            SMPR1 => self.smpr1 = value & 0x00FF_FFFF,
            SMPR2 => self.smpr2 = value & 0x3FFF_FFFF,
            SQR1 => self.sqr1 = value & 0x00FF_FFFF,
            SQR2 => self.sqr2 = value & 0x3FFF_FFFF,
            SQR3 => self.sqr3 = value & 0x3FFF_FFFF,
            _ => {}
        }
    }

    fn finish_conversion(&mut self) {
        let channel = self.sequence_channel(self.slot);
        let raw = self.samples[channel as usize % CHANNELS] as u32;
        self.dr = if self.cr2 & CR2_ALIGN != 0 { raw << 4 } else { raw };
        self.sr |= SR_EOC;
        self.conversions += 1;

        self.slot += 1;
        if self.slot < self.sequence_length() {
            self.phase = Phase::Converting(self.conversion_cycles);
            return;
        }
        self.slot = 0;
        if self.cr2 & CR2_CONT != 0 {
            self.phase = Phase::Converting(self.conversion_cycles);
        } else {
            self.phase = Phase::Idle;
        }
    }
}

impl Default for Adc {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for Adc {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        if offset == DR {
            self.sr &= !SR_EOC;
        }
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn tick(&mut self, cycles: u32) -> PeripheralTickResult {
        let mut budget = cycles;
        while budget > 0 {
            let (remaining, next) = match self.phase {
                Phase::Stabilizing(n) => (n, Phase::Idle),
                Phase::ResettingCalibration(n) => (n, Phase::Idle),
                Phase::Calibrating(n) => (n, Phase::Idle),
                Phase::Converting(n) => (n, Phase::Idle),
                Phase::Off | Phase::Idle => break,
            };
            if budget < remaining {
                let left = remaining - budget;
                self.phase = match self.phase {
                    Phase::Stabilizing(_) => Phase::Stabilizing(left),
                    Phase::ResettingCalibration(_) => Phase::ResettingCalibration(left),
                    Phase::Calibrating(_) => Phase::Calibrating(left),
                    _ => Phase::Converting(left),
                };
                break;
            }
            budget -= remaining;
            match self.phase {
                Phase::ResettingCalibration(_) => {
                    self.cr2 &= !CR2_RSTCAL;
                    self.calibrated = false;
                    self.phase = next;
                }
                Phase::Calibrating(_) => {
                    self.cr2 &= !CR2_CAL;
                    self.calibrated = true;
                    tracing::debug!("ADC: calibration done");
                    self.phase = next;
                }
                Phase::Converting(_) => {
                    self.finish_conversion();
                    // Continuous single-channel mode chains conversions within one
                    // tick. A scan leaves each result in DR for at least one tick.
                    if budget == 0 || self.cr2 & CR2_CONT == 0 || self.scanning() {
                        break;
                    }
                }
                _ => self.phase = next,
            }
        }

        PeripheralTickResult {
            irq: self.sr & SR_EOC != 0 && self.cr1 & CR1_EOCIE != 0,
            cycles: if matches!(self.phase, Phase::Off) { 0 } else { cycles },
            ..Default::default()
        }
    }

    fn on_trigger(&mut self, source: &str) {
        if self.phase != Phase::Idle || self.cr2 & CR2_EXTTRIG == 0 {
            return;
        }
        let extsel = (self.cr2 & CR2_EXTSEL_MASK) >> CR2_EXTSEL_SHIFT;
        if self
            .triggers
            .iter()
            .any(|(code, name)| *code == extsel && name == source)
        {
            tracing::trace!("ADC: conversion triggered by {}", source);
            self.start_conversion();
        }
    }

    fn dma_request_offsets(&self) -> Vec<u64> {
        if self.cr2 & CR2_DMA != 0 && self.sr & SR_EOC != 0 {
            vec![DR]
        } else {
            Vec::new()
        }
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

    fn powered() -> Adc {
        let mut adc = Adc::new();
        adc.write(CR2, CR2_ADON).unwrap();
        adc.tick(100);
        adc
    }

    #[test]
    fn test_calibration_sequence() {
        let mut adc = powered();
        adc.write(CR2, CR2_ADON | CR2_RSTCAL).unwrap();
        assert_ne!(adc.read(CR2).unwrap() & CR2_RSTCAL, 0);
        adc.tick(100);
        assert_eq!(adc.read(CR2).unwrap() & CR2_RSTCAL, 0);

        adc.write(CR2, CR2_ADON | CR2_CAL).unwrap();
        assert_ne!(adc.read(CR2).unwrap() & CR2_CAL, 0);
        adc.tick(10);
        assert_ne!(adc.read(CR2).unwrap() & CR2_CAL, 0);
        adc.tick(100);
        assert_eq!(adc.read(CR2).unwrap() & CR2_CAL, 0);
        assert!(adc.is_calibrated());
    }

    #[test]
    fn test_software_start_single_conversion() {
        let mut adc = powered();
        adc.set_channel_value(3, 0x0ABC);
        adc.write(SQR3, 3).unwrap();
        let start = CR2_ADON | CR2_EXTTRIG | CR2_EXTSEL_SWSTART;
        adc.write(CR2, start | CR2_SWSTART).unwrap();
        assert_eq!(adc.read(CR2).unwrap() & CR2_SWSTART, 0);
        adc.tick(13);
        assert_eq!(adc.read(SR).unwrap() & SR_EOC, 0);
        adc.tick(1);
        assert_ne!(adc.read(SR).unwrap() & SR_EOC, 0);
        assert_eq!(adc.read(DR).unwrap(), 0x0ABC);
        assert_eq!(adc.read(SR).unwrap() & SR_EOC, 0);
        // Single mode: no further conversions
        adc.tick(100);
        assert_eq!(adc.conversions(), 1);
    }

    #[test]
    fn test_continuous_mode_with_interrupt() {
        let mut adc = powered();
        adc.write(CR1, CR1_EOCIE).unwrap();
        adc.write(SQR3, TEMP_CHANNEL as u32).unwrap();
        adc.write(CR2, CR2_ADON | CR2_CONT).unwrap();
        adc.write(CR2, CR2_ADON | CR2_CONT).unwrap();
        assert!(adc.tick(140).irq);
        assert_eq!(adc.conversions(), 10);
        assert_eq!(adc.read(DR).unwrap(), 1750);
    }

    #[test]
    fn test_scan_converts_each_slot_in_order() {
        let mut adc = powered();
        adc.set_channel_value(1, 0x111);
        adc.set_channel_value(2, 0x222);
        adc.set_channel_value(9, 0x999);
        adc.write(CR1, CR1_SCAN).unwrap();
        adc.write(SQR1, 2 << SQR1_L_SHIFT).unwrap();
        adc.write(SQR3, 1 | (2 << 5) | (9 << 10)).unwrap();
        assert_eq!(adc.sequence_length(), 3);

        let start = CR2_ADON | CR2_EXTTRIG | CR2_EXTSEL_SWSTART;
        adc.write(CR2, start | CR2_SWSTART).unwrap();
        let mut results = Vec::new();
        for _ in 0..10 {
            adc.tick(14);
            if adc.read(SR).unwrap() & SR_EOC != 0 {
                results.push(adc.read(DR).unwrap());
            }
        }
        assert_eq!(results, vec![0x111, 0x222, 0x999]);
        assert_eq!(adc.conversions(), 3);
    }

    #[test]
    fn test_sequence_slot_positions() {
        assert_eq!(sequence_slot(0), (SQR3, 0));
        assert_eq!(sequence_slot(5), (SQR3, 25));
        assert_eq!(sequence_slot(6), (SQR2, 0));
        assert_eq!(sequence_slot(12), (SQR1, 0));
        assert_eq!(sequence_slot(15), (SQR1, 15));
    }

    #[test]
    fn test_scan_from_sqr1_slots() {
        let mut adc = powered();
        adc.set_channel_value(5, 0x555);
        adc.write(CR1, CR1_SCAN).unwrap();
        adc.write(SQR1, (12 << SQR1_L_SHIFT) | 5).unwrap();
        let start = CR2_ADON | CR2_EXTTRIG | CR2_EXTSEL_SWSTART;
        adc.write(CR2, start | CR2_SWSTART).unwrap();
        let mut last = 0;
        for _ in 0..13 {
            adc.tick(14);
            last = adc.read(DR).unwrap();
        }
        // SQ13 is the low field of SQR1.
        assert_eq!(last, 0x555);
        assert_eq!(adc.conversions(), 13);
    }

    #[test]
    fn test_external_trigger_starts_group() {
        let mut adc = powered().with_triggers(vec![(0b100, "tim3".to_string())]);
        adc.set_channel_value(0, 0x321);
        adc.write(CR2, CR2_ADON | CR2_EXTTRIG | (0b100 << CR2_EXTSEL_SHIFT))
            .unwrap();
        adc.on_trigger("tim2");
        adc.tick(100);
        assert_eq!(adc.conversions(), 0);

        adc.on_trigger("tim3");
        adc.tick(14);
        assert_eq!(adc.conversions(), 1);
        assert_eq!(adc.read(DR).unwrap(), 0x321);
    }

    #[test]
    fn test_trigger_ignored_without_exttrig() {
        let mut adc = powered().with_triggers(vec![(0b100, "tim3".to_string())]);
        adc.write(CR2, CR2_ADON | (0b100 << CR2_EXTSEL_SHIFT)).unwrap();
        adc.on_trigger("tim3");
        adc.tick(100);
        assert_eq!(adc.conversions(), 0);
    }

    #[test]
    fn test_first_adon_only_powers_up() {
        let mut adc = Adc::new();
        adc.write(CR2, CR2_ADON).unwrap();
        adc.tick(1000);
        assert_eq!(adc.conversions(), 0);
    }

    #[test]
    fn test_dma_request_while_eoc() {
        let mut adc = powered();
        adc.write(CR2, CR2_ADON | CR2_DMA).unwrap();
        assert!(adc.dma_request_offsets().is_empty());
        adc.write(CR2, CR2_ADON | CR2_DMA).unwrap();
        adc.tick(14);
        assert_eq!(adc.dma_request_offsets(), vec![DR]);
    }
}
