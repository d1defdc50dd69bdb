// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Bus, HalError, HalResult};

/// How long a driver busy-waits on a hardware flag.
///
/// Each poll that finds the condition false advances simulated time by one
/// machine step before polling again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Spin until the condition holds, like bare-metal code does.
    Forever,
    /// Give up with [`HalError::Timeout`] after this many polls.
    Bounded(u64),
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Bounded(100_000)
    }
}

/// Poll `done` until it reports true, advancing the bus between polls.
pub fn wait_until<F>(
    bus: &mut dyn Bus,
    policy: WaitPolicy,
    what: &'static str,
    mut done: F,
) -> HalResult<()>
where
    F: FnMut(&mut dyn Bus) -> HalResult<bool>,
{
    let mut polls: u64 = 0;
    loop {
        if done(bus)? {
            return Ok(());
        }
        if let WaitPolicy::Bounded(limit) = policy {
            if polls >= limit {
                tracing::debug!("Gave up waiting for {} after {} polls", what, polls);
                return Err(HalError::Timeout { what });
            }
        }
        bus.advance()?;
        polls += 1;
    }
}

/// Wait until every bit of `mask` at `addr` reads as set.
pub fn wait_set(
    bus: &mut dyn Bus,
    policy: WaitPolicy,
    what: &'static str,
    addr: u64,
    mask: u32,
) -> HalResult<()> {
    wait_until(bus, policy, what, |bus| Ok(bus.read_u32(addr)? & mask == mask))
}

/// Wait until every bit of `mask` at `addr` reads as clear.
pub fn wait_clear(
    bus: &mut dyn Bus,
    policy: WaitPolicy,
    what: &'static str,
    addr: u64,
    mask: u32,
) -> HalResult<()> {
    wait_until(bus, policy, what, |bus| Ok(bus.read_u32(addr)? & mask == 0))
}

/// Let `steps` machine steps pass.
pub fn delay_steps(bus: &mut dyn Bus, steps: u32) -> HalResult<()> {
    for _ in 0..steps {
        bus.advance()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regbench_core::SimResult;

    /// Counter register at 0 that increments once per step.
    #[derive(Default)]
    struct Ticker {
        steps: u32,
    }

    impl Bus for Ticker {
        fn read_u32(&mut self, _addr: u64) -> SimResult<u32> {
            Ok(self.steps)
        }
        fn write_u32(&mut self, _addr: u64, _value: u32) -> SimResult<()> {
            Ok(())
        }
        fn read_u8(&mut self, _addr: u64) -> SimResult<u8> {
            Ok(0)
        }
        fn write_u8(&mut self, _addr: u64, _value: u8) -> SimResult<()> {
            Ok(())
        }
        fn advance(&mut self) -> SimResult<()> {
            self.steps += 1;
            Ok(())
        }
    }

    #[test]
    fn test_wait_returns_as_soon_as_condition_holds() {
        let mut bus = Ticker::default();
        wait_set(&mut bus, WaitPolicy::Forever, "bit 2", 0, 0b100).unwrap();
        assert_eq!(bus.steps, 4);
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let mut bus = Ticker::default();
        let err = wait_until(&mut bus, WaitPolicy::Bounded(10), "never", |_| Ok(false));
        assert!(matches!(err, Err(HalError::Timeout { what: "never" })));
        assert_eq!(bus.steps, 10);
    }

    #[test]
    fn test_condition_already_true_does_not_advance() {
        let mut bus = Ticker::default();
        wait_clear(&mut bus, WaitPolicy::Bounded(0), "zero", 0, 1).unwrap();
        assert_eq!(bus.steps, 0);
    }
}
