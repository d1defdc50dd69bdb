// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::DemoOutcome;
use crate::target::Target;
use anyhow::{anyhow, Result};
use regbench_hal::gpio::GpioMode;
use regbench_hal::nvic::Nvic;
use regbench_hal::shared::SharedCounter;
use regbench_hal::systime::MillisClock;
use regbench_core::peripherals::timer::Timer as TimerModel;
use regbench_hal::timer::{periodic_from_hz, PwmChannel, Timer};
use regbench_hal::wait::delay_steps;
use std::sync::Arc;

const BLINKS: u32 = 8;

pub fn miniblink(target: &mut Target) -> Result<DemoOutcome> {
    let (led, binding) = target.io_pin("led")?;
    let machine = &mut target.machine;
    led.configure(machine, GpioMode::OutputPushPull)?;

    let mut level = led.is_set_low(machine)?;
    let mut toggles = 0;
    for _ in 0..BLINKS {
        led.toggle(machine)?;
        delay_steps(machine, 800)?;
        let now = led.is_set_low(machine)?;
        if now != level {
            toggles += 1;
        }
        level = now;
    }

    Ok(DemoOutcome::check(
        toggles == BLINKS,
        format!(
            "{} pin {} toggled {} of {} times",
            binding.peripheral, binding.pin, toggles, BLINKS
        ),
    ))
}

pub fn systick_blink(target: &mut Target) -> Result<DemoOutcome> {
    let tree = target.configure_clocks()?;
    let (led, _) = target.io_pin("led")?;
    let policy = target.policy;
    let machine = &mut target.machine;
    led.configure(machine, GpioMode::OutputPushPull)?;

    let clock = MillisClock::new();
    clock.start(machine, &tree)?;
    for _ in 0..5 {
        led.toggle(machine)?;
        clock.msleep(machine, 100, policy)?;
    }

    let now = clock.now();
    let dispatched = machine.systick_count();
    Ok(DemoOutcome::check(
        (500..=505).contains(&now) && dispatched == now as u64,
        format!(
            "5 x msleep(100) at {} MHz ended at {} ms ({} SysTick interrupts)",
            tree.hclk / 1_000_000,
            now,
            dispatched
        ),
    ))
}

pub fn timer_irq(target: &mut Target) -> Result<DemoOutcome> {
    const UPDATES: u32 = 5;

    let tree = target.configure_clocks()?;
    let (led, _) = target.io_pin("led")?;
    target.enable_clock("tim2")?;
    let timer = Timer::new(target.base("tim2")?);
    let irq = target.irq("tim2")?;
    let budget = target.step_budget();
    let machine = &mut target.machine;
    led.configure(machine, GpioMode::OutputPushPull)?;
    let initial = led.is_set_low(machine)?;

    let updates = Arc::new(SharedCounter::default());
    let seen = updates.clone();
    machine.register_handler(Nvic::vector(irq), move |bus| {
        if let Err(e) = timer.clear_update(bus).and_then(|_| led.toggle(bus)) {
            tracing::warn!("TIM2 handler: {}", e);
        }
        seen.increment();
    });
    Nvic::default().enable_irq(machine, irq)?;

    let (prescaler, period) = periodic_from_hz(&tree, 10)?;
    timer.configure_periodic(machine, prescaler, period, true)?;
    let start = machine.total_cycles();
    machine.run_until(budget, |_| updates.load() >= UPDATES)?;
    timer.stop(machine)?;

    let elapsed_ms = (machine.total_cycles() - start) * 1000 / tree.hclk as u64;
    let count = updates.load();
    // An odd number of toggles leaves the LED inverted.
    let inverted = led.is_set_low(machine)? != initial;
    Ok(DemoOutcome::check(
        count == UPDATES && inverted,
        format!(
            "{} updates (PSC {}, ARR {}) in {} ms of simulated time",
            count, prescaler, period, elapsed_ms
        ),
    ))
}

pub fn pwm(target: &mut Target) -> Result<DemoOutcome> {
    const PWM_HZ: u32 = 1000;
    const PERIODS: u64 = 5;
    /// Duty cycle per channel, in percent.
    const DUTY: [(PwmChannel, u32); 4] = [
        (PwmChannel::Ch1, 10),
        (PwmChannel::Ch2, 35),
        (PwmChannel::Ch3, 60),
        (PwmChannel::Ch4, 85),
    ];

    let tree = target.configure_clocks()?;
    target.enable_clock("tim2")?;
    let timer = Timer::new(target.base("tim2")?);
    let machine = &mut target.machine;

    let (prescaler, period) = periodic_from_hz(&tree, PWM_HZ)?;
    timer.configure_periodic(machine, prescaler, period, false)?;
    let ticks = period as u32 + 1;
    for (channel, percent) in DUTY {
        timer.configure_pwm(machine, channel, (ticks * percent / 100) as u16)?;
    }
    let cycles = PERIODS * (tree.hclk / PWM_HZ) as u64;
    machine.run(cycles / machine.cycles_per_step() as u64)?;
    timer.stop(machine)?;

    let model = machine
        .bus
        .peripheral::<TimerModel>("tim2")
        .ok_or_else(|| anyhow!("'tim2' is not a timer"))?;
    let mut report = Vec::new();
    let mut matched = 0;
    for (channel, percent) in DUTY {
        let measured = model.duty(channel.index()).unwrap_or(0.0) * 100.0;
        if (measured - percent as f64).abs() < 0.1 {
            matched += 1;
        }
        report.push(format!("{:?} {:.1}%", channel, measured));
    }
    Ok(DemoOutcome::check(
        matched == DUTY.len(),
        format!(
            "{} Hz PWM (PSC {}, ARR {}): {}",
            PWM_HZ,
            prescaler,
            period,
            report.join(", ")
        ),
    ))
}
