// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// A simple flat memory storage
pub struct LinearMemory {
    pub data: Vec<u8>,
    pub base_addr: u64,
}

impl LinearMemory {
    pub fn new(size: usize, base_addr: u64) -> Self {
        Self {
            data: vec![0; size],
            base_addr,
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_addr && addr < self.base_addr + self.data.len() as u64
    }

    pub fn read_u8(&self, addr: u64) -> Option<u8> {
        if self.contains(addr) {
            Some(self.data[(addr - self.base_addr) as usize])
        } else {
            None
        }
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> bool {
        if self.contains(addr) {
            self.data[(addr - self.base_addr) as usize] = value;
            true
        } else {
            false
        }
    }

    /// Copy `data` in at `addr`. Returns false when it does not fit.
    pub fn load(&mut self, addr: u64, data: &[u8]) -> bool {
        let end_addr = addr + data.len() as u64;
        let mem_end = self.base_addr + self.data.len() as u64;

        if addr >= self.base_addr && end_addr <= mem_end {
            let offset = (addr - self.base_addr) as usize;
            self.data[offset..offset + data.len()].copy_from_slice(data);
            return true;
        }
        false
    }

    /// Borrow `len` bytes starting at `addr`, if they are all inside this memory.
    pub fn slice(&self, addr: u64, len: usize) -> Option<&[u8]> {
        if !self.contains(addr) {
            return None;
        }
        let offset = (addr - self.base_addr) as usize;
        self.data.get(offset..offset + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut mem = LinearMemory::new(16, 0x2000_0000);
        assert!(mem.write_u8(0x2000_000F, 7));
        assert!(!mem.write_u8(0x2000_0010, 7));
        assert_eq!(mem.read_u8(0x2000_000F), Some(7));
        assert_eq!(mem.read_u8(0x1FFF_FFFF), None);
    }

    #[test]
    fn test_load_and_slice() {
        let mut mem = LinearMemory::new(8, 0x100);
        assert!(mem.load(0x104, &[1, 2, 3, 4]));
        assert!(!mem.load(0x106, &[1, 2, 3]));
        assert_eq!(mem.slice(0x104, 4), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(mem.slice(0x106, 4), None);
    }
}
