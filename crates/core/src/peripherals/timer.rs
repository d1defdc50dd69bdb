// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;

pub const CR1: u64 = 0x00;
pub const CR2: u64 = 0x04;
pub const DIER: u64 = 0x0C;
pub const SR: u64 = 0x10;
pub const EGR: u64 = 0x14;
pub const CCMR1: u64 = 0x18;
pub const CCMR2: u64 = 0x1C;
pub const CCER: u64 = 0x20;
pub const CNT: u64 = 0x24;
pub const PSC: u64 = 0x28;
pub const ARR: u64 = 0x2C;
pub const CCR1: u64 = 0x34;

pub const CR1_CEN: u32 = 1 << 0;
pub const CR1_URS: u32 = 1 << 2;
pub const CR1_ARPE: u32 = 1 << 7;
pub const CR2_MMS_MASK: u32 = 0b111 << 4;
/// TRGO on EGR.UG only.
pub const CR2_MMS_RESET: u32 = 0b000 << 4;
/// TRGO on every update event.
pub const CR2_MMS_UPDATE: u32 = 0b010 << 4;
pub const DIER_UIE: u32 = 1 << 0;
pub const SR_UIF: u32 = 1 << 0;
pub const EGR_UG: u32 = 1 << 0;

/// Output compare modes (OCxM).
pub const OCM_FROZEN: u32 = 0b000;
pub const OCM_FORCE_INACTIVE: u32 = 0b100;
pub const OCM_FORCE_ACTIVE: u32 = 0b101;
pub const OCM_PWM1: u32 = 0b110;
pub const OCM_PWM2: u32 = 0b111;
pub const CHANNELS: usize = 4;

/// CCR register of compare channel `channel` (1..=4).
pub const fn ccr(channel: usize) -> u64 {
    CCR1 + 4 * (channel as u64 - 1)
}

/// CCMRx register and bit shift of the 8-bit field for `channel` (1..=4).
pub const fn ccmr_field(channel: usize) -> (u64, u32) {
    let reg = if channel <= 2 { CCMR1 } else { CCMR2 };
    (reg, ((channel as u32 - 1) % 2) * 8)
}

/// CCxE bit; CCxP is the next bit up.
pub const fn ccer_enable(channel: usize) -> u32 {
    1 << (4 * (channel as u32 - 1))
}

pub const fn ccer_polarity(channel: usize) -> u32 {
    ccer_enable(channel) << 1
}

/// CCxIF in SR, CCxIE in DIER.
pub const fn compare_flag(channel: usize) -> u32 {
    1 << channel as u32
}

/// Count of `k` in `[0, n)` with `k % period < threshold`.
fn below_threshold(n: u64, period: u64, threshold: u64) -> u64 {
    let t = threshold.min(period);
    (n / period) * t + (n % period).min(t)
}

/// Count of `k` in `[0, n)` with `k % period == value`.
fn hits(n: u64, period: u64, value: u64) -> u64 {
    if value >= period {
        return 0;
    }
    n / period + u64::from(n % period > value)
}

/// STM32 general purpose timer (TIM2-TIM5 compatible), up-counting only.
///
/// PSC is buffered: a written value takes effect at the next update event
/// (overflow or EGR.UG). The four compare channels support the frozen, forced
/// and PWM output modes; CCRx writes take effect immediately. Output levels are
/// integrated per counter step, so [`Timer::duty`] is exact even when one tick
/// spans several periods. CR2.MMS selects when the trigger output pulses.
#[derive(Debug, Default, serde::Serialize)]
pub struct Timer {
    cr1: u32,
    cr2: u32,
    dier: u32,
    sr: u32,
    ccmr1: u32,
    ccmr2: u32,
    ccer: u32,
    cnt: u32,
    psc: u32,
    arr: u32,
    ccr: [u32; CHANNELS],

    // Internal state
    psc_active: u32,
    psc_cnt: u32,
    updates: u64,
    trgo_pending: bool,
    /// Counter steps elapsed while enabled, and how many of them had each output high.
    counted: u64,
    high_counts: [u64; CHANNELS],
}

impl Timer {
    pub fn new() -> Self {
        Self {
            arr: 0xFFFF, // Default reset value
            ..Default::default()
        }
    }

    /// Update events generated by counter overflow since reset.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    fn output_mode(&self, channel: usize) -> u32 {
        let (reg, shift) = ccmr_field(channel);
        let ccmr = if reg == CCMR1 { self.ccmr1 } else { self.ccmr2 };
        (ccmr >> (shift + 4)) & 0b111
    }

    /// Current level of output `channel` (1..=4) after polarity; low while disabled.
    pub fn output_high(&self, channel: usize) -> bool {
        if !(1..=CHANNELS).contains(&channel) || self.ccer & ccer_enable(channel) == 0 {
            return false;
        }
        let ccr = self.ccr[channel - 1];
        let active = match self.output_mode(channel) {
            OCM_PWM1 => self.cnt < ccr,
            OCM_PWM2 => self.cnt >= ccr,
            OCM_FORCE_ACTIVE => true,
            _ => false,
        };
        active != (self.ccer & ccer_polarity(channel) != 0)
    }

    /// Fraction of counter steps output `channel` spent high since the counter
    /// was last enabled. `None` before the first step.
    pub fn duty(&self, channel: usize) -> Option<f64> {
        if self.counted == 0 || !(1..=CHANNELS).contains(&channel) {
            return None;
        }
        Some(self.high_counts[channel - 1] as f64 / self.counted as f64)
    }

    fn update_event(&mut self, software: bool) {
        self.cnt = 0;
        self.psc_cnt = 0;
        self.psc_active = self.psc;
        if !(software && self.cr1 & CR1_URS != 0) {
            self.sr |= SR_UIF;
        }
        let mms = self.cr2 & CR2_MMS_MASK;
        if software && (mms == CR2_MMS_RESET || mms == CR2_MMS_UPDATE) {
            self.trgo_pending = true;
        }
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            CR1 => self.cr1,
            CR2 => self.cr2,
            DIER => self.dier,
            SR => self.sr,
            CCMR1 => self.ccmr1,
            CCMR2 => self.ccmr2,
            CCER => self.ccer,
            CNT => self.cnt,
            PSC => self.psc,
            ARR => self.arr,
            o if (CCR1..=ccr(CHANNELS)).contains(&o) && o % 4 == 0 => {
                self.ccr[((o - CCR1) / 4) as usize]
            }
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            CR1 => {
                if value & CR1_CEN != 0 && self.cr1 & CR1_CEN == 0 {
                    self.counted = 0;
                    self.high_counts = [0; CHANNELS];
                }
                self.cr1 = value & 0x3FF;
            }
            CR2 => self.cr2 = value & 0xF8,
            DIER => self.dier = value & 0x5F5F,
            // TIMx_SR is rc_w0 for status flags: writing 0 clears, writing 1 keeps current.
            SR => self.sr &= value & 0x1FFF,
            EGR => {
                if value & EGR_UG != 0 {
                    self.update_event(true);
                }
            }
            CCMR1 => self.ccmr1 = value & 0xFFFF,
            CCMR2 => self.ccmr2 = value & 0xFFFF,
            CCER => self.ccer = value & 0x3333,
            CNT => self.cnt = value & 0xFFFF,
            PSC => self.psc = value & 0xFFFF,
            ARR => self.arr = value & 0xFFFF,
            o if (CCR1..=ccr(CHANNELS)).contains(&o) && o % 4 == 0 => {
                self.ccr[((o - CCR1) / 4) as usize] = value & 0xFFFF;
            }
            _ => {}
        }
    }

    /// Integrate output levels over counter values `[start, start + steps)`
    /// and flag compare matches in `(start, start + steps]`.
    fn account_outputs(&mut self, start: u64, steps: u64, period: u64) {
        self.counted += steps;
        for channel in 1..=CHANNELS {
            let ccr = self.ccr[channel - 1] as u64;
            if hits(start + steps + 1, period, ccr) > hits(start + 1, period, ccr) {
                self.sr |= compare_flag(channel);
            }
            if self.ccer & ccer_enable(channel) == 0 {
                continue;
            }
            let below = below_threshold(start + steps, period, ccr)
                - below_threshold(start, period, ccr);
            let active = match self.output_mode(channel) {
                OCM_PWM1 => below,
                OCM_PWM2 => steps - below,
                OCM_FORCE_ACTIVE => steps,
                _ => 0,
            };
            let inverted = self.ccer & ccer_polarity(channel) != 0;
            self.high_counts[channel - 1] += if inverted { steps - active } else { active };
        }
    }

    fn irq_level(&self) -> bool {
        let compare = (1..=CHANNELS)
            .map(compare_flag)
            .fold(SR_UIF, |acc, flag| acc | flag);
        self.sr & self.dier & compare != 0
    }
}

impl crate::Peripheral for Timer {
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

    fn tick(&mut self, cycles: u32) -> crate::PeripheralTickResult {
        let mut trigger_out = std::mem::take(&mut self.trgo_pending);

        // Counter Enable; a zero auto-reload blocks the counter.
        if self.cr1 & CR1_CEN == 0 || self.arr == 0 {
            return crate::PeripheralTickResult {
                irq: self.irq_level(),
                trigger_out,
                ..Default::default()
            };
        }

        let prescale = self.psc_active as u64 + 1;
        let total = self.psc_cnt as u64 + cycles as u64;
        let increments = total / prescale;
        self.psc_cnt = (total % prescale) as u32;

        let period = self.arr as u64 + 1;
        self.account_outputs(self.cnt as u64, increments, period);
        let next = self.cnt as u64 + increments;
        if next >= period {
            let wraps = next / period;
            self.updates += wraps;
            self.psc_active = self.psc;
            self.cnt = (next % period) as u32;
            // Set UIF (Update Interrupt Flag)
            self.sr |= SR_UIF;
            if self.cr2 & CR2_MMS_MASK == CR2_MMS_UPDATE {
                trigger_out = true;
            }
        } else {
            self.cnt = next as u32;
        }

        crate::PeripheralTickResult {
            irq: self.irq_level(),
            cycles,
            trigger_out,
            ..Default::default()
        }
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
