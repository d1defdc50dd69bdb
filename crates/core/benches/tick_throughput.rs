// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use regbench_config::BoardManifest;
use regbench_core::peripherals::{rcc, systick};
use regbench_core::{Bus, Machine};

fn bluepill_with_clocks_on() -> Machine {
    let board = BoardManifest::builtin("bluepill").expect("builtin board");
    let mut machine = Machine::from_board(&board).expect("machine");
    for reg in [rcc::AHBENR, rcc::APB1ENR, rcc::APB2ENR] {
        machine
            .write_u32(0x4002_1000 + reg, u32::MAX)
            .expect("clock enable");
    }
    machine
}

fn bench_idle_steps(c: &mut Criterion) {
    let mut machine = bluepill_with_clocks_on();
    c.bench_function("bluepill_idle_1000_steps", |b| {
        b.iter(|| machine.run(black_box(1000)).expect("run"))
    });
}

fn bench_systick_dispatch(c: &mut Criterion) {
    let mut machine = bluepill_with_clocks_on();
    machine.register_handler(15, |_bus: &mut dyn Bus| {});
    machine
        .write_u32(0xE000_E010 + systick::RVR, 99)
        .expect("reload");
    machine
        .write_u32(
            0xE000_E010 + systick::CSR,
            systick::CSR_ENABLE | systick::CSR_TICKINT | systick::CSR_CLKSOURCE,
        )
        .expect("enable");
    c.bench_function("systick_every_100_steps", |b| {
        b.iter(|| machine.run(black_box(1000)).expect("run"))
    });
}

criterion_group!(benches, bench_idle_steps, bench_systick_dispatch);
criterion_main!(benches);
