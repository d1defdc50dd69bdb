// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::DemoOutcome;
use crate::target::Target;
use anyhow::{anyhow, Result};
use regbench_core::peripherals::adc::Adc as AdcModel;
use regbench_hal::adc::{Adc, RegularTrigger, SampleTime};
use regbench_hal::dac::{Dac, DacChannel};
use regbench_hal::nvic::Nvic;
use regbench_hal::shared::Guarded;
use regbench_hal::timer::{periodic_from_hz, MasterMode, Timer};
use regbench_hal::usart::Usart;
use std::fmt::Write as _;
use std::sync::Arc;

const VREF_MV: u32 = 3300;
/// Analog inputs presented to the converter: (channel, raw 12-bit level).
const INPUTS: &[(u8, u16)] = &[(0, 0), (1, 1241), (4, 2048), (7, 4095)];

fn millivolts(raw: u16) -> u32 {
    raw as u32 * VREF_MV / 4095
}

pub fn adc(target: &mut Target) -> Result<DemoOutcome> {
    target.configure_clocks()?;
    target.enable_clock("adc1")?;
    let adc = Adc::new(target.base("adc1")?);
    let usart = target.usart("usart1")?;
    let pclk = target.pclk("usart1")?;
    let policy = target.policy;
    let machine = &mut target.machine;
    usart.configure(machine, pclk, 115_200)?;

    let model = machine
        .bus
        .peripheral_mut::<AdcModel>("adc1")
        .ok_or_else(|| anyhow!("'adc1' is not an ADC"))?;
    for &(channel, raw) in INPUTS {
        model.set_channel_value(channel, raw);
    }

    adc.power_on(machine)?;
    adc.calibrate(machine, policy)?;
    let mut report = String::new();
    let mut matched = 0;
    for &(channel, raw) in INPUTS {
        adc.select_channel(machine, channel, SampleTime::CYCLES_28_5)?;
        let value = adc.read_blocking(machine, policy)?;
        if value == raw {
            matched += 1;
        }
        writeln!(report, "ADC ch{} = {} mV\r", channel, millivolts(value))?;
    }
    usart.write_all(machine, report.as_bytes(), policy)?;
    usart.flush(machine, policy)?;

    let printed = machine.usart_tx("usart1") == report.as_bytes();
    Ok(DemoOutcome::check(
        matched == INPUTS.len() && printed,
        format!("{} of {} channels converted as driven", matched, INPUTS.len()),
    ))
}

pub fn adc_timer(target: &mut Target) -> Result<DemoOutcome> {
    const SAMPLE_HZ: u32 = 1000;
    const TRIGGERS: usize = 4;
    /// Scan sequence: (channel, raw level).
    const SEQUENCE: [(u8, u16); 3] = [(2, 1000), (5, 3000), (TEMP_SENSOR, 1750)];
    const TEMP_SENSOR: u8 = 16;

    let tree = target.configure_clocks()?;
    target.enable_clock("adc1")?;
    target.enable_clock("tim3")?;
    let adc = Adc::new(target.base("adc1")?);
    let timer = Timer::new(target.base("tim3")?);
    let irq = target.irq("adc1")?;
    let policy = target.policy;
    let budget = target.step_budget();
    let machine = &mut target.machine;

    let model = machine
        .bus
        .peripheral_mut::<AdcModel>("adc1")
        .ok_or_else(|| anyhow!("'adc1' is not an ADC"))?;
    for (channel, raw) in SEQUENCE {
        model.set_channel_value(channel, raw);
    }

    adc.power_on(machine)?;
    adc.calibrate(machine, policy)?;
    let channels: Vec<u8> = SEQUENCE.iter().map(|&(channel, _)| channel).collect();
    adc.set_sequence(machine, &channels, SampleTime::CYCLES_1_5)?;
    adc.set_trigger(machine, RegularTrigger::Tim3Trgo)?;
    adc.enable_eoc_interrupt(machine, true)?;

    let samples = Arc::new(Guarded::new(Vec::new()));
    let sink = samples.clone();
    machine.register_handler(Nvic::vector(irq), move |bus| match adc.value(bus) {
        Ok(value) => sink.update(|s| s.push(value)),
        Err(e) => tracing::warn!("ADC handler: {}", e),
    });
    Nvic::default().enable_irq(machine, irq)?;

    let (prescaler, period) = periodic_from_hz(&tree, SAMPLE_HZ)?;
    timer.set_master_mode(machine, MasterMode::Update)?;
    timer.configure_periodic(machine, prescaler, period, false)?;
    let wanted = TRIGGERS * SEQUENCE.len();
    machine.run_until(budget, |_| samples.update(|s| s.len()) >= wanted)?;
    timer.stop(machine)?;

    let got = samples.load();
    let expected: Vec<u16> = SEQUENCE
        .iter()
        .map(|&(_, raw)| raw)
        .cycle()
        .take(wanted)
        .collect();
    Ok(DemoOutcome::check(
        got == expected,
        format!(
            "{} TIM3 triggers at {} Hz converted {:?} into {} samples",
            TRIGGERS,
            SAMPLE_HZ,
            channels,
            got.len()
        ),
    ))
}

pub fn dac(target: &mut Target) -> Result<DemoOutcome> {
    target.enable_clock("dac")?;
    let dac = Dac::new(target.base("dac")?);
    let machine = &mut target.machine;
    dac.enable(machine, DacChannel::One)?;

    let ramp: Vec<u16> = (0..4096).step_by(256).chain([4095]).collect();
    let mut tracked = 0;
    for &value in &ramp {
        dac.write(machine, DacChannel::One, value)?;
        machine.step()?;
        if dac.output(machine, DacChannel::One)? == value {
            tracked += 1;
        }
    }

    Ok(DemoOutcome::check(
        tracked == ramp.len(),
        format!("channel 1 followed {} of {} ramp steps", tracked, ramp.len()),
    ))
}
