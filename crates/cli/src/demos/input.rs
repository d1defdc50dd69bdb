// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::DemoOutcome;
use crate::target::{port_index, Target};
use anyhow::{Context, Result};
use regbench_hal::button::{ButtonState, Debouncer, Edge};
use regbench_hal::exti::{Exti, Trigger};
use regbench_hal::gpio::GpioMode;
use regbench_hal::nvic::Nvic;
use regbench_hal::shared::SharedCounter;
use std::sync::Arc;

/// Scripted button activity: (step, pressed). Presses and releases bounce.
const PRESS_SCRIPT: &[(u64, bool)] = &[
    (100, true),
    (101, false),
    (102, true),
    (104, false),
    (105, true),
    (300, false),
    (301, true),
    (303, false),
    (800, true),
    (802, false),
    (803, true),
    (1000, false),
    (1002, true),
    (1003, false),
];
const SCRIPT_STEPS: u64 = 1_500;
const SETTLE_POLLS: u32 = 400;

/// Level on the pin for a pressed/released button.
fn pin_level(pressed: bool, active_high: bool) -> bool {
    pressed == active_high
}

pub fn button(target: &mut Target) -> Result<DemoOutcome> {
    let (led, _) = target.io_pin("led")?;
    let (button, binding) = target.io_pin("button")?;
    let machine = &mut target.machine;
    led.configure(machine, GpioMode::OutputPushPull)?;
    let pull = if binding.active_high {
        GpioMode::InputPullDown
    } else {
        GpioMode::InputPullUp
    };
    button.configure(machine, pull)?;
    let initial = led.is_set_low(machine)?;

    let edge = if binding.active_high {
        Edge::Rising
    } else {
        Edge::Falling
    };
    let mut debouncer = Debouncer::new(SETTLE_POLLS).with_edge(edge);
    let mut script = PRESS_SCRIPT.iter().peekable();
    let mut presses = 0;
    for step in 0..SCRIPT_STEPS {
        while let Some(&&(at, pressed)) = script.peek() {
            if at != step {
                break;
            }
            let level = pin_level(pressed, binding.active_high);
            machine.drive_pin(&binding.peripheral, binding.pin, level)?;
            script.next();
        }
        if debouncer.poll(button.is_high(machine)?) == ButtonState::Active {
            led.toggle(machine)?;
            presses += 1;
            debouncer.acknowledge();
        }
        machine.step()?;
    }

    Ok(DemoOutcome::check(
        // Two toggles leave the LED where it started.
        presses == 2 && led.is_set_low(machine)? == initial,
        format!("2 bouncy presses registered as {}", presses),
    ))
}

pub fn exti(target: &mut Target) -> Result<DemoOutcome> {
    const PRESSES: u32 = 3;

    let (led, _) = target.io_pin("led")?;
    let (button, binding) = target.io_pin("button")?;
    let routing = target.peripheral_of_type("afio")?.id.clone();
    target.enable_clock(&routing)?;
    let routing_base = target.base(&routing)?;
    let exti = Exti::new(target.base("exti")?);
    let line = binding.pin;
    let irq = Exti::irq(line).context("button pin has no EXTI interrupt")?;
    let budget = target.step_budget().min(10_000);
    let machine = &mut target.machine;

    led.configure(machine, GpioMode::OutputPushPull)?;
    button.configure(machine, GpioMode::InputFloating)?;
    exti.route(machine, routing_base, line, port_index(&binding.peripheral))?;
    exti.configure(machine, line, Trigger::Both)?;

    let edges = Arc::new(SharedCounter::default());
    let seen = edges.clone();
    machine.register_handler(Nvic::vector(irq), move |bus| {
        let mirror = exti
            .reset_request(bus, line)
            .and_then(|_| button.is_high(bus))
            .and_then(|high| led.write(bus, if high { 0xFFFF } else { 0 }));
        if let Err(e) = mirror {
            tracing::warn!("EXTI{} handler: {}", line, e);
        }
        seen.increment();
    });
    exti.enable_request(machine, line)?;
    Nvic::default().enable_irq(machine, irq)?;

    let mut mirrored = true;
    for i in 0..PRESSES * 2 {
        let high = i % 2 == 0;
        machine.drive_pin(&binding.peripheral, binding.pin, high)?;
        let expected = i + 1;
        machine.run_until(budget, |_| edges.load() >= expected)?;
        mirrored &= led.is_set_low(machine)? != high;
    }

    let count = edges.load();
    Ok(DemoOutcome::check(
        count == PRESSES * 2 && mirrored,
        format!(
            "{} edges on EXTI{}, LED {} the button",
            count,
            line,
            if mirrored { "mirrored" } else { "did not mirror" }
        ),
    ))
}
