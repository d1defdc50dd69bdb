// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::clock::ClockTree;
use crate::{Bus, HalError, HalResult};
use regbench_core::peripherals::timer::{
    ccer_enable, ccer_polarity, ccmr_field, ccr, ARR, CCER, CNT, CR1, CR1_CEN, CR2,
    CR2_MMS_MASK, CR2_MMS_RESET, CR2_MMS_UPDATE, DIER, DIER_UIE, EGR, EGR_UG, OCM_PWM1, PSC, SR,
    SR_UIF,
};

/// OCxPE: CCRx preload enable.
const OC_PRELOAD: u32 = 1 << 3;

/// Output compare channel of a general purpose timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmChannel {
    Ch1 = 1,
    Ch2 = 2,
    Ch3 = 3,
    Ch4 = 4,
}

impl PwmChannel {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// What the trigger output (TRGO) reports to slave blocks such as the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterMode {
    /// TRGO pulses on EGR.UG only.
    Reset,
    /// TRGO pulses on every update event.
    Update,
}

/// General purpose timer: periodic update source, PWM generator and trigger master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    base: u64,
}

impl Timer {
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Count `period + 1` ticks of `timer_clock / (prescaler + 1)` between updates.
    pub fn configure_periodic(
        &self,
        bus: &mut dyn Bus,
        prescaler: u16,
        period: u16,
        interrupt: bool,
    ) -> HalResult<()> {
        bus.modify_u32(self.base + CR1, CR1_CEN, 0)?;
        bus.write_u32(self.base + PSC, prescaler as u32)?;
        bus.write_u32(self.base + ARR, period as u32)?;
        // UG loads the prescaler now instead of at the first overflow, and flags it.
        bus.write_u32(self.base + EGR, EGR_UG)?;
        self.clear_update(bus)?;
        let dier = if interrupt { DIER_UIE } else { 0 };
        bus.modify_u32(self.base + DIER, DIER_UIE, dier)?;
        bus.modify_u32(self.base + CR1, 0, CR1_CEN)?;
        tracing::debug!(
            "Timer {:#x}: PSC {} ARR {} (irq: {})",
            self.base,
            prescaler,
            period,
            interrupt
        );
        Ok(())
    }

    pub fn stop(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.modify_u32(self.base + CR1, CR1_CEN, 0)?;
        Ok(())
    }

    pub fn update_pending(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(bus.read_u32(self.base + SR)? & SR_UIF != 0)
    }

    /// SR is rc_w0: writing 0 to UIF clears it and 1s leave other flags alone.
    pub fn clear_update(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.write_u32(self.base + SR, !SR_UIF)?;
        Ok(())
    }

    pub fn counter(&self, bus: &mut dyn Bus) -> HalResult<u16> {
        Ok(bus.read_u32(self.base + CNT)? as u16)
    }

    pub fn set_master_mode(&self, bus: &mut dyn Bus, mode: MasterMode) -> HalResult<()> {
        let mms = match mode {
            MasterMode::Reset => CR2_MMS_RESET,
            MasterMode::Update => CR2_MMS_UPDATE,
        };
        bus.modify_u32(self.base + CR2, CR2_MMS_MASK, mms)?;
        Ok(())
    }

    /// Drive `channel` in PWM mode 1: the output is high while CNT < `duty`.
    ///
    /// `duty` counts timer ticks out of `period + 1` set by
    /// [`Timer::configure_periodic`]; `duty > period` holds the output high.
    pub fn configure_pwm(
        &self,
        bus: &mut dyn Bus,
        channel: PwmChannel,
        duty: u16,
    ) -> HalResult<()> {
        let ch = channel.index();
        let enable = ccer_enable(ch);
        bus.modify_u32(self.base + CCER, enable, 0)?;
        let (ccmr, shift) = ccmr_field(ch);
        // CCxS = 00 (output), OCxM = PWM1 with preload.
        bus.modify_u32(
            self.base + ccmr,
            0xFF << shift,
            ((OCM_PWM1 << 4) | OC_PRELOAD) << shift,
        )?;
        bus.write_u32(self.base + ccr(ch), duty as u32)?;
        bus.modify_u32(self.base + CCER, ccer_polarity(ch), enable)?;
        tracing::debug!("Timer {:#x}: {:?} PWM duty {}", self.base, channel, duty);
        Ok(())
    }

    pub fn set_duty(&self, bus: &mut dyn Bus, channel: PwmChannel, duty: u16) -> HalResult<()> {
        bus.write_u32(self.base + ccr(channel.index()), duty as u32)?;
        Ok(())
    }

    pub fn duty(&self, bus: &mut dyn Bus, channel: PwmChannel) -> HalResult<u16> {
        Ok(bus.read_u32(self.base + ccr(channel.index()))? as u16)
    }

    pub fn disable_output(&self, bus: &mut dyn Bus, channel: PwmChannel) -> HalResult<()> {
        bus.modify_u32(self.base + CCER, ccer_enable(channel.index()), 0)?;
        Ok(())
    }
}

/// Prescaler and period for `hz` updates per second on an APB1 timer (TIM2, TIM3).
pub fn periodic_from_hz(tree: &ClockTree, hz: u32) -> HalResult<(u16, u16)> {
    periodic_from_clock(tree.timer_clock_apb1(), hz)
}

/// Prescaler and period giving `hz` updates per second from `timer_clock_hz`.
///
/// Picks the smallest prescaler whose period fits in 16 bits.
pub fn periodic_from_clock(timer_clock_hz: u32, hz: u32) -> HalResult<(u16, u16)> {
    if hz == 0 || hz > timer_clock_hz {
        return Err(HalError::InvalidFrequency { hz });
    }
    let ticks = timer_clock_hz / hz;
    let prescaler = (ticks - 1) / 0x1_0000;
    if prescaler > 0xFFFF {
        return Err(HalError::InvalidFrequency { hz });
    }
    let period = ticks / (prescaler + 1) - 1;
    Ok((prescaler as u16, period as u16))
}
