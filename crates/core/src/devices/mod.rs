// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Off-chip parts attached to the serial buses.

pub mod eeprom24;
pub mod tmp102;

pub use eeprom24::Eeprom24;
pub use tmp102::Tmp102;

/// A slave on an I2C bus, driven byte by byte by the controller model.
pub trait I2cDevice: std::fmt::Debug + Send {
    /// 7-bit bus address.
    fn address(&self) -> u8;

    /// START (or repeated START) addressed to this device.
    fn start(&mut self, _read: bool) {}

    /// Master wrote a byte. Returns true to ACK.
    fn write(&mut self, byte: u8) -> bool;

    /// Master clocks a byte out of the device.
    fn read(&mut self) -> u8;

    fn stop(&mut self) {}

    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// A slave on an SPI bus: one byte exchanged per eight clocks.
pub trait SpiDevice: std::fmt::Debug + Send {
    fn transfer(&mut self, mosi: u8) -> u8;
}

/// MISO tied to MOSI.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpiLoopback;

impl SpiDevice for SpiLoopback {
    fn transfer(&mut self, mosi: u8) -> u8 {
        mosi
    }
}

/// Build a device from a board manifest entry.
pub fn i2c_device_from_config(cfg: &regbench_config::I2cDeviceConfig) -> Box<dyn I2cDevice> {
    match cfg.kind {
        regbench_config::I2cDeviceKind::Eeprom24 => {
            Box::new(Eeprom24::new(cfg.address, cfg.size.unwrap_or(256)))
        }
        regbench_config::I2cDeviceKind::Tmp102 => Box::new(Tmp102::new(cfg.address)),
    }
}
