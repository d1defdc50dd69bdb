// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::I2cDevice;

/// 24xx-series serial EEPROM.
///
/// The first one (up to 2 Kbit parts) or two (larger parts) bytes of a write
/// set the address pointer; following bytes are stored and wrap inside the
/// current page. Reads stream from the pointer and wrap at the end of memory.
#[derive(Debug, serde::Serialize)]
pub struct Eeprom24 {
    address: u8,
    #[serde(skip)]
    memory: Vec<u8>,
    page_size: usize,
    pointer: usize,
    address_bytes: usize,
    // Address bytes still expected in the current write transaction.
    pending_address: usize,
    writes: u64,
}

impl Eeprom24 {
    pub fn new(address: u8, size: usize) -> Self {
        let size = size.max(1);
        Self {
            address,
            memory: vec![0xFF; size],
            page_size: if size <= 256 { 8 } else if size <= 2048 { 16 } else { 32 },
            pointer: 0,
            address_bytes: if size <= 256 { 1 } else { 2 },
            pending_address: 0,
            writes: 0,
        }
    }

    pub fn contents(&self) -> &[u8] {
        &self.memory
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn load(&mut self, offset: usize, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let idx = (offset + i) % self.memory.len();
            self.memory[idx] = *byte;
        }
    }
}

impl I2cDevice for Eeprom24 {
    fn address(&self) -> u8 {
        self.address
    }

    fn start(&mut self, read: bool) {
        self.pending_address = if read { 0 } else { self.address_bytes };
    }

    fn write(&mut self, byte: u8) -> bool {
        if self.pending_address > 0 {
            self.pointer = if self.pending_address == self.address_bytes {
                byte as usize
            } else {
                (self.pointer << 8) | byte as usize
            };
            self.pointer %= self.memory.len();
            self.pending_address -= 1;
            return true;
        }

        let page_start = self.pointer - self.pointer % self.page_size;
        self.memory[self.pointer] = byte;
        self.writes += 1;
        self.pointer = page_start + (self.pointer + 1 - page_start) % self.page_size;
        self.pointer %= self.memory.len();
        true
    }

    fn read(&mut self) -> u8 {
        let value = self.memory[self.pointer];
        self.pointer = (self.pointer + 1) % self.memory.len();
        value
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_random_read() {
        let mut rom = Eeprom24::new(0x50, 256);
        rom.start(false);
        for byte in [0x10, b'h', b'i'] {
            assert!(rom.write(byte));
        }
        rom.stop();

        rom.start(false);
        rom.write(0x10);
        rom.start(true);
        assert_eq!(rom.read(), b'h');
        assert_eq!(rom.read(), b'i');
        assert_eq!(rom.read(), 0xFF);
    }

    #[test]
    fn test_page_write_wraps_within_page() {
        let mut rom = Eeprom24::new(0x50, 256);
        rom.start(false);
        rom.write(0x06);
        for byte in 1..=4u8 {
            rom.write(byte);
        }
        assert_eq!(&rom.contents()[0..8], &[3, 4, 0xFF, 0xFF, 0xFF, 0xFF, 1, 2]);
    }

    #[test]
    fn test_two_byte_addressing_for_large_parts() {
        let mut rom = Eeprom24::new(0x50, 4096);
        rom.start(false);
        rom.write(0x01);
        rom.write(0x20);
        rom.write(0xAB);
        assert_eq!(rom.contents()[0x120], 0xAB);
    }
}
