// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::DemoOutcome;
use crate::target::Target;
use anyhow::{anyhow, Result};
use regbench_config::I2cDeviceKind;
use regbench_hal::i2c::I2c;
use regbench_hal::spi::{Spi, SpiConfig, SpiMode};

const EEPROM_OFFSET: u16 = 0x10;

pub fn i2c_eeprom(target: &mut Target) -> Result<DemoOutcome> {
    let rom = target
        .board
        .i2c_devices
        .iter()
        .find(|d| d.kind == I2cDeviceKind::Eeprom24)
        .cloned()
        .ok_or_else(|| anyhow!("board '{}' has no I2C EEPROM", target.board.name))?;
    let tree = target.configure_clocks()?;
    target.enable_clock(&rom.bus)?;
    let i2c = I2c::new(target.base(&rom.bus)?).with_policy(target.policy);
    let machine = &mut target.machine;
    i2c.configure(machine, tree.pclk1)?;

    // Parts above 2 Kbit take a two-byte memory address.
    let address: Vec<u8> = if rom.size.unwrap_or(256) > 256 {
        EEPROM_OFFSET.to_be_bytes().to_vec()
    } else {
        vec![EEPROM_OFFSET as u8]
    };
    let page = b"regbench";
    let mut frame = address.clone();
    frame.extend_from_slice(page);
    i2c.write(machine, rom.address, &frame)?;

    let mut readback = [0u8; 8];
    i2c.write_read(machine, rom.address, &address, &mut readback)?;

    Ok(DemoOutcome::check(
        &readback == page,
        format!(
            "wrote {:?} at {:#x} of the EEPROM at {:#04x}, read back {:?}",
            String::from_utf8_lossy(page),
            EEPROM_OFFSET,
            rom.address,
            String::from_utf8_lossy(&readback)
        ),
    ))
}

pub fn spi_loopback(target: &mut Target) -> Result<DemoOutcome> {
    target.enable_clock("spi1")?;
    let spi = Spi::new(target.base("spi1")?);
    let policy = target.policy;
    let machine = &mut target.machine;
    spi.configure(
        machine,
        SpiConfig {
            mode: SpiMode::Mode0,
            prescaler: 3,
            lsb_first: false,
        },
    )?;

    let sent = *b"loopback";
    let mut buf = sent;
    spi.transfer_in_place(machine, &mut buf, policy)?;
    let overrun = spi.overrun(machine)?;

    Ok(DemoOutcome::check(
        buf == sent && !overrun,
        format!(
            "sent {:?}, received {:?}{}",
            String::from_utf8_lossy(&sent),
            String::from_utf8_lossy(&buf),
            if overrun { ", overrun" } else { "" }
        ),
    ))
}
