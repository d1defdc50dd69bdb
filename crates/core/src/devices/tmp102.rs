// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::I2cDevice;

pub const REG_TEMP: u8 = 0x00;
pub const REG_CONFIG: u8 = 0x01;
pub const REG_T_LOW: u8 = 0x02;
pub const REG_T_HIGH: u8 = 0x03;

/// TMP102 I2C temperature sensor.
///
/// The first byte of a write selects the pointer register; two more bytes
/// (MSB first) load it. Reads return the selected register MSB first.
#[derive(Debug, serde::Serialize)]
pub struct Tmp102 {
    address: u8,
    pub temp: i16,   // 0x00 - Temperature (12-bit, left aligned)
    pub config: u16, // 0x01 - Configuration
    pub t_low: i16,  // 0x02 - T_LOW
    pub t_high: i16, // 0x03 - T_HIGH
    pointer: u8,
    #[serde(skip)]
    byte_index: usize,
    #[serde(skip)]
    latch: u16,
}

impl Tmp102 {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            temp: 0x190 << 4, // 25.0°C
            config: 0x60A0,
            t_low: 0x4B0 << 4,  // 75°C
            t_high: 0x500 << 4, // 80°C
            pointer: REG_TEMP,
            byte_index: 0,
            latch: 0,
        }
    }

    /// Set the measured temperature (0.0625 °C resolution).
    pub fn set_celsius(&mut self, celsius: f32) {
        let counts = (celsius / 0.0625).round() as i16;
        self.temp = counts << 4;
    }

    /// Convert a raw temperature register value to °C.
    pub fn raw_to_celsius(raw: u16) -> f32 {
        ((raw as i16) >> 4) as f32 * 0.0625
    }

    fn register(&self, pointer: u8) -> u16 {
        match pointer & 0x3 {
            REG_TEMP => self.temp as u16,
            REG_CONFIG => self.config,
            REG_T_LOW => self.t_low as u16,
            _ => self.t_high as u16,
        }
    }

    fn store(&mut self, pointer: u8, value: u16) {
        match pointer & 0x3 {
            REG_CONFIG => self.config = value,
            REG_T_LOW => self.t_low = value as i16,
            REG_T_HIGH => self.t_high = value as i16,
            // Temperature is read-only
            _ => {}
        }
    }
}

impl I2cDevice for Tmp102 {
    fn address(&self) -> u8 {
        self.address
    }

    fn start(&mut self, read: bool) {
        self.byte_index = 0;
        if read {
            self.latch = self.register(self.pointer);
        }
    }

    fn write(&mut self, byte: u8) -> bool {
        match self.byte_index {
            0 => self.pointer = byte & 0x3,
            1 => self.latch = (byte as u16) << 8,
            2 => {
                self.latch |= byte as u16;
                self.store(self.pointer, self.latch);
            }
            _ => return false,
        }
        self.byte_index += 1;
        true
    }

    fn read(&mut self) -> u8 {
        let byte = if self.byte_index % 2 == 0 {
            (self.latch >> 8) as u8
        } else {
            self.latch as u8
        };
        self.byte_index += 1;
        byte
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_default_temperature() {
        let mut sensor = Tmp102::new(0x48);
        sensor.start(false);
        sensor.write(REG_TEMP);
        sensor.start(true);
        let raw = ((sensor.read() as u16) << 8) | sensor.read() as u16;
        assert_eq!(Tmp102::raw_to_celsius(raw), 25.0);
    }

    #[test]
    fn test_negative_temperature() {
        let mut sensor = Tmp102::new(0x48);
        sensor.set_celsius(-10.5);
        sensor.start(true);
        let raw = ((sensor.read() as u16) << 8) | sensor.read() as u16;
        assert_eq!(Tmp102::raw_to_celsius(raw), -10.5);
    }

    #[test]
    fn test_write_threshold_register() {
        let mut sensor = Tmp102::new(0x48);
        sensor.start(false);
        assert!(sensor.write(REG_T_HIGH));
        assert!(sensor.write(0x32));
        assert!(sensor.write(0x00));
        assert!(!sensor.write(0x00));
        assert_eq!(sensor.t_high, 0x3200);
    }
}
