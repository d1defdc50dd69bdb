// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Millisecond time base driven by the SysTick exception.

use crate::clock::ClockTree;
use crate::shared::SharedCounter;
use crate::systick::SysTick;
use crate::wait::{wait_until, WaitPolicy};
use crate::{Bus, HalResult};
use regbench_core::interrupt::SYSTICK_VECTOR;
use regbench_core::Machine;
use std::sync::Arc;

/// Wrapping millisecond counter. The SysTick handler is the only writer.
#[derive(Debug, Default)]
pub struct MillisClock {
    ticks: SharedCounter,
}

impl MillisClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Body of the SysTick handler.
    pub fn on_tick(&self) {
        self.ticks.increment();
    }

    pub fn now(&self) -> u32 {
        self.ticks.load()
    }

    /// Register the tick handler on the SysTick vector. Returns true when it
    /// replaced another handler.
    pub fn install(self: &Arc<Self>, machine: &mut Machine) -> bool {
        let clock = Arc::clone(self);
        machine.register_handler(SYSTICK_VECTOR, move |_bus| clock.on_tick())
    }

    /// Install the handler and start SysTick at 1 kHz from `tree`.
    pub fn start(self: &Arc<Self>, machine: &mut Machine, tree: &ClockTree) -> HalResult<()> {
        let reload = SysTick::for_millis(tree)?;
        self.install(machine);
        SysTick::new().configure(machine, reload, true)?;
        tracing::info!("Millisecond clock running (reload {})", reload);
        Ok(())
    }

    /// Block until at least `ms` ticks have elapsed. Wraparound safe.
    pub fn msleep(&self, bus: &mut dyn Bus, ms: u32, policy: WaitPolicy) -> HalResult<()> {
        let start = self.now();
        wait_until(bus, policy, "msleep", |_| {
            Ok(self.now().wrapping_sub(start) >= ms)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regbench_config::BoardManifest;

    #[test]
    fn test_counts_systick_exceptions() {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        let clock = MillisClock::new();
        assert!(!clock.install(&mut machine));
        SysTick::new().configure(&mut machine, 99, true).unwrap();

        machine.run(1_000).unwrap();
        assert_eq!(clock.now(), 10);
        assert_eq!(machine.systick_count(), 10);
    }

    #[test]
    fn test_msleep_across_wrap() {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        let clock = MillisClock::new();
        clock.ticks.store(u32::MAX - 2);
        clock.install(&mut machine);
        SysTick::new().configure(&mut machine, 9, true).unwrap();

        clock
            .msleep(&mut machine, 5, WaitPolicy::Bounded(1_000))
            .unwrap();
        assert_eq!(clock.now(), 2);
    }

    #[test]
    fn test_msleep_without_tick_times_out() {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let mut machine = Machine::from_board(&board).unwrap();
        let clock = MillisClock::new();
        let err = clock
            .msleep(&mut machine, 1, WaitPolicy::Bounded(50))
            .unwrap_err();
        assert!(matches!(err, crate::HalError::Timeout { what: "msleep" }));
    }
}
