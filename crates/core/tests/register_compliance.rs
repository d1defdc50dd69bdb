// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use regbench_config::{BoardManifest, ChipDescriptor, PeripheralBus};
use regbench_core::bus::SystemBus;
use regbench_core::peripherals::gpio::{f1, v2};
use regbench_core::peripherals::rcc;
use std::fs;
use std::path::PathBuf;

const RCC: u64 = 0x4002_1000;

#[test]
fn test_register_compliance_all_boards() -> anyhow::Result<()> {
    // Locate the bundled `crates/config/boards` directory
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let boards_dir = manifest_dir
        .parent()
        .map(|crates| crates.join("config/boards"))
        .ok_or_else(|| anyhow::anyhow!("crate has no parent directory"))?;

    let mut checked = 0;
    for entry in fs::read_dir(boards_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("yaml") {
            validate_board(&BoardManifest::from_file(&path)?)?;
            checked += 1;
        }
    }
    assert!(checked >= 2);
    Ok(())
}

fn validate_board(board: &BoardManifest) -> anyhow::Result<()> {
    let chip = board.load_chip()?;
    let mut bus = SystemBus::from_config(&chip, board)?;
    assert_eq!(bus.peripherals.len(), chip.peripherals.len());

    // Open every clock gate, then every window must answer at offset 0.
    for reg in [rcc::AHBENR, rcc::APB1ENR, rcc::APB2ENR] {
        bus.write_u32(RCC + reg, u32::MAX)?;
    }
    for p in &chip.peripherals {
        bus.read_u32(p.base_address)?;
        if let Some(gate) = p.clock {
            assert!(bus.clocks.is_enabled(gate.bus, gate.bit), "{}", p.id);
        }
    }
    assert_eq!(bus.gate_violations(), 0);

    for io in &board.board_io {
        let p = chip
            .peripheral(&io.peripheral)
            .ok_or_else(|| anyhow::anyhow!("board io '{}' names unknown port", io.id))?;
        assert_eq!(p.r#type, "gpio");
    }
    for dev in &board.i2c_devices {
        assert!(chip.peripheral(&dev.bus).is_some());
    }
    Ok(())
}

#[test]
fn test_gpio_layouts_follow_chip() -> anyhow::Result<()> {
    let f103 = BoardManifest::builtin("bluepill")?;
    let mut bus = SystemBus::from_config(&f103.load_chip()?, &f103)?;
    bus.write_u32(RCC + rcc::APB2ENR, 1 << 4)?;
    // GPIOC CRH reset value: all pins floating inputs.
    assert_eq!(bus.read_u32(0x4001_1000 + f1::CRH)?, 0x4444_4444);

    let f303 = BoardManifest::builtin("f3discovery")?;
    let chip = ChipDescriptor::builtin("stm32f303")?;
    let mut bus = SystemBus::from_config(&chip, &f303)?;
    let gpioe = chip.peripheral("gpioe").map(|p| p.base_address).unwrap_or(0);
    let gate = chip.peripheral("gpioe").and_then(|p| p.clock);
    assert_eq!(gate.map(|g| g.bus), Some(PeripheralBus::Ahb));
    bus.write_u32(RCC + rcc::AHBENR, 1 << 21)?;
    bus.write_u32(gpioe + v2::MODER, 0x5555_0000)?;
    assert_eq!(bus.read_u32(gpioe + v2::MODER)?, 0x5555_0000);
    Ok(())
}
