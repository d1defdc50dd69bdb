// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, SimResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const ISER: u64 = 0x000;
pub const ICER: u64 = 0x080;
pub const ISPR: u64 = 0x100;
pub const ICPR: u64 = 0x180;
pub const IPR: u64 = 0x300;

/// Register offset and bit for a device interrupt number.
pub fn irq_word(irq: u32) -> (u64, u32) {
    (4 * (irq / 32) as u64, 1 << (irq % 32))
}

/// Shared state for NVIC registers.
///
/// The bus pends lines here and the machine scans enabled & pending bits;
/// both sides index by device interrupt number (vector - 16).
#[derive(Debug, Default)]
pub struct NvicState {
    pub iser: [AtomicU32; 8],
    pub ispr: [AtomicU32; 8],
}

impl NvicState {
    fn locate(irq: u32) -> Option<(usize, u32)> {
        let idx = (irq / 32) as usize;
        (idx < 8).then(|| (idx, 1 << (irq % 32)))
    }

    pub fn set_pending(&self, irq: u32) {
        if let Some((idx, bit)) = Self::locate(irq) {
            self.ispr[idx].fetch_or(bit, Ordering::SeqCst);
        }
    }

    pub fn clear_pending(&self, irq: u32) {
        if let Some((idx, bit)) = Self::locate(irq) {
            self.ispr[idx].fetch_and(!bit, Ordering::SeqCst);
        }
    }

    pub fn is_pending(&self, irq: u32) -> bool {
        Self::locate(irq)
            .map(|(idx, bit)| self.ispr[idx].load(Ordering::SeqCst) & bit != 0)
            .unwrap_or(false)
    }

    pub fn is_enabled(&self, irq: u32) -> bool {
        Self::locate(irq)
            .map(|(idx, bit)| self.iser[idx].load(Ordering::SeqCst) & bit != 0)
            .unwrap_or(false)
    }

    /// Enabled and pending interrupt numbers, lowest first.
    pub fn active_irqs(&self) -> Vec<u32> {
        let mut irqs = Vec::new();
        for idx in 0..8 {
            let mask =
                self.iser[idx].load(Ordering::SeqCst) & self.ispr[idx].load(Ordering::SeqCst);
            if mask == 0 {
                continue;
            }
            for bit in 0..32 {
                if mask & (1 << bit) != 0 {
                    irqs.push(idx as u32 * 32 + bit);
                }
            }
        }
        irqs
    }
}

/// Nested Vectored Interrupt Controller (NVIC) register block.
#[derive(Debug)]
pub struct Nvic {
    pub state: Arc<NvicState>,
    ipr: [u8; 240],
}

impl Nvic {
    pub fn new(state: Arc<NvicState>) -> Self {
        Self {
            state,
            ipr: [0; 240],
        }
    }

    fn read_reg(&self, offset: u64) -> u32 {
        let idx = ((offset & 0x7F) / 4) as usize;
        match offset {
            0x000..=0x01F | 0x080..=0x09F => self.state.iser[idx].load(Ordering::SeqCst),
            0x100..=0x11F | 0x180..=0x19F => self.state.ispr[idx].load(Ordering::SeqCst),
            0x300..=0x3EC => {
                let base = (offset - IPR) as usize;
                u32::from_le_bytes([
                    self.ipr[base],
                    self.ipr[base + 1],
                    self.ipr[base + 2],
                    self.ipr[base + 3],
                ])
            }
            _ => 0,
        }
    }
}

impl Peripheral for Nvic {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        let idx = ((offset & 0x7F) / 4) as usize;
        match offset {
            // ISER: Writing 1 sets the enable bit
            0x000..=0x01F => {
                self.state.iser[idx].fetch_or(value, Ordering::SeqCst);
            }
            // ICER: Writing 1 clears the enable bit
            0x080..=0x09F => {
                self.state.iser[idx].fetch_and(!value, Ordering::SeqCst);
            }
            // ISPR: Writing 1 sets the pending bit
            0x100..=0x11F => {
                self.state.ispr[idx].fetch_or(value, Ordering::SeqCst);
            }
            // ICPR: Writing 1 clears the pending bit
            0x180..=0x19F => {
                self.state.ispr[idx].fetch_and(!value, Ordering::SeqCst);
            }
            0x300..=0x3EC => {
                let base = (offset - IPR) as usize;
                // Only the top four priority bits are implemented.
                for (i, byte) in value.to_le_bytes().iter().enumerate() {
                    self.ipr[base + i] = byte & 0xF0;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn snapshot(&self) -> serde_json::Value {
        let iser: Vec<u32> = self
            .state
            .iser
            .iter()
            .map(|a| a.load(Ordering::Relaxed))
            .collect();
        let ispr: Vec<u32> = self
            .state
            .ispr
            .iter()
            .map(|a| a.load(Ordering::Relaxed))
            .collect();
        serde_json::json!({
            "iser": iser,
            "ispr": ispr,
        })
    }
}
