// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{DmaRequest, Peripheral, PeripheralTickResult, SimResult, TransferWidth};
use std::any::Any;

pub const ISR: u64 = 0x00;
pub const IFCR: u64 = 0x04;
pub const CHANNELS: usize = 7;

pub const CCR_EN: u32 = 1 << 0;
pub const CCR_TCIE: u32 = 1 << 1;
pub const CCR_HTIE: u32 = 1 << 2;
pub const CCR_TEIE: u32 = 1 << 3;
pub const CCR_DIR: u32 = 1 << 4;
pub const CCR_CIRC: u32 = 1 << 5;
pub const CCR_PINC: u32 = 1 << 6;
pub const CCR_MINC: u32 = 1 << 7;
pub const CCR_PSIZE_SHIFT: u32 = 8;
pub const CCR_MSIZE_SHIFT: u32 = 10;
pub const CCR_PL_SHIFT: u32 = 12;
pub const CCR_MEM2MEM: u32 = 1 << 14;

pub const FLAG_GIF: u32 = 1 << 0;
pub const FLAG_TCIF: u32 = 1 << 1;
pub const FLAG_HTIF: u32 = 1 << 2;
pub const FLAG_TEIF: u32 = 1 << 3;

/// Offset of CCR for zero-based channel `ch`; CNDTR, CPAR, CMAR follow at +4, +8, +12.
pub fn ccr_offset(ch: usize) -> u64 {
    0x08 + 20 * ch as u64
}

pub fn cndtr_offset(ch: usize) -> u64 {
    ccr_offset(ch) + 0x04
}

pub fn cpar_offset(ch: usize) -> u64 {
    ccr_offset(ch) + 0x08
}

pub fn cmar_offset(ch: usize) -> u64 {
    ccr_offset(ch) + 0x0C
}

/// ISR/IFCR bits of `flags` for zero-based channel `ch`.
pub fn channel_flags(ch: usize, flags: u32) -> u32 {
    (flags & 0xF) << (4 * ch)
}

#[derive(Debug, Default, serde::Serialize)]
struct Channel {
    ccr: u32,
    cndtr: u32,
    cpar: u32,
    cmar: u32,
    // Values latched when the channel is enabled.
    reload: u32,
    transferred: u32,
    moved: u64,
}

impl Channel {
    fn enabled(&self) -> bool {
        self.ccr & CCR_EN != 0
    }

    fn psize(&self) -> TransferWidth {
        TransferWidth::from_bits(self.ccr >> CCR_PSIZE_SHIFT)
    }

    fn msize(&self) -> TransferWidth {
        TransferWidth::from_bits(self.ccr >> CCR_MSIZE_SHIFT)
    }

    fn next_request(&self, ch: usize) -> DmaRequest {
        let index = self.transferred as u64;
        let periph = self.cpar as u64
            + if self.ccr & CCR_PINC != 0 {
                index * self.psize().bytes()
            } else {
                0
            };
        let mem = self.cmar as u64
            + if self.ccr & CCR_MINC != 0 {
                index * self.msize().bytes()
            } else {
                0
            };
        // DIR=1: read from memory, write to peripheral. MEM2MEM uses the same
        // convention with CPAR as the second memory address.
        if self.ccr & CCR_DIR != 0 {
            DmaRequest {
                src: mem,
                dst: periph,
                src_width: self.msize(),
                dst_width: self.psize(),
                channel: ch,
            }
        } else {
            DmaRequest {
                src: periph,
                dst: mem,
                src_width: self.psize(),
                dst_width: self.msize(),
                channel: ch,
            }
        }
    }
}

/// STM32F1 DMA1 controller (7 channels).
///
/// Memory-to-memory channels move one element per cycle. Peripheral channels
/// move one element per step while the peripheral's request line (its data
/// register address, see [`Peripheral::on_dma_lines`]) is asserted.
#[derive(Debug, Default, serde::Serialize)]
pub struct Dma1 {
    isr: u32,
    channels: [Channel; CHANNELS],
    first_irq: Option<u32>,
    #[serde(skip)]
    lines: Vec<u64>,
}

impl Dma1 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel n raises device interrupt `first_irq + n`.
    pub fn with_first_irq(mut self, irq: u32) -> Self {
        self.first_irq = Some(irq);
        self
    }

    /// Elements moved by a channel since it was last enabled.
    pub fn moved(&self, ch: usize) -> u64 {
        self.channels.get(ch).map(|c| c.moved).unwrap_or(0)
    }

    fn locate(offset: u64) -> Option<(usize, u64)> {
        if offset < 0x08 {
            return None;
        }
        let ch = ((offset - 0x08) / 20) as usize;
        (ch < CHANNELS).then(|| (ch, (offset - 0x08) % 20))
    }

    fn read_reg(&self, offset: u64) -> u32 {
        if offset == ISR {
            return self.isr;
        }
        match Self::locate(offset) {
            Some((ch, 0x00)) => self.channels[ch].ccr,
            Some((ch, 0x04)) => self.channels[ch].cndtr,
            Some((ch, 0x08)) => self.channels[ch].cpar,
            Some((ch, 0x0C)) => self.channels[ch].cmar,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        if offset == IFCR {
            // IFCR: Write 1 to clear corresponding ISR bits; CGIF clears the whole nibble
            let mut clear = value & 0x0FFF_FFFF;
            for ch in 0..CHANNELS {
                if clear & channel_flags(ch, FLAG_GIF) != 0 {
                    clear |= channel_flags(ch, 0xF);
                }
            }
            self.isr &= !clear;
            return;
        }
        let Some((ch, reg)) = Self::locate(offset) else {
            return;
        };
        let chan = &mut self.channels[ch];
        match reg {
            0x00 => {
                let was_enabled = chan.enabled();
                chan.ccr = value & 0x7FFF;
                if !was_enabled && chan.enabled() {
                    chan.reload = chan.cndtr;
                    chan.transferred = 0;
                    chan.moved = 0;
                    tracing::debug!(
                        "DMA1 channel {} enabled: {} elements {:#x} <-> {:#x}",
                        ch + 1,
                        chan.cndtr,
                        chan.cpar,
                        chan.cmar
                    );
                }
            }
            // Registers below are read-only while the channel runs.
            0x04 if !chan.enabled() => chan.cndtr = value & 0xFFFF,
            0x08 if !chan.enabled() => chan.cpar = value,
            0x0C if !chan.enabled() => chan.cmar = value,
            _ => {}
        }
    }

    fn set_flags(&mut self, ch: usize, flags: u32) {
        self.isr |= channel_flags(ch, flags | FLAG_GIF);
    }

    /// Account one element on `ch` and raise HT/TC as the count passes.
    fn complete_element(&mut self, ch: usize) {
        let chan = &mut self.channels[ch];
        chan.cndtr -= 1;
        chan.transferred += 1;
        chan.moved += 1;

        let half = chan.reload / 2;
        let remaining = chan.cndtr;
        let circular = chan.ccr & CCR_CIRC != 0;
        let mem2mem = chan.ccr & CCR_MEM2MEM != 0;

        if half > 0 && remaining == chan.reload - half {
            self.set_flags(ch, FLAG_HTIF);
        }
        if remaining == 0 {
            self.set_flags(ch, FLAG_TCIF);
            tracing::debug!("DMA1 channel {} transfer complete", ch + 1);
            let chan = &mut self.channels[ch];
            if circular && !mem2mem {
                chan.cndtr = chan.reload;
                chan.transferred = 0;
            }
        }
    }

    fn irq_lines(&self) -> Vec<u32> {
        let Some(first) = self.first_irq else {
            return Vec::new();
        };
        let mut irqs = Vec::new();
        for (ch, chan) in self.channels.iter().enumerate() {
            let flags = (self.isr >> (4 * ch)) & 0xF;
            let enabled = ((chan.ccr >> 1) & 0x7) << 1;
            if flags & enabled != 0 {
                irqs.push(first + ch as u32);
            }
        }
        irqs
    }
}

impl Peripheral for Dma1 {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn on_dma_lines(&mut self, active: &[u64]) {
        self.lines.clear();
        self.lines.extend_from_slice(active);
    }

    fn tick(&mut self, cycles: u32) -> PeripheralTickResult {
        let mut dma_requests = Vec::new();

        for ch in 0..CHANNELS {
            let chan = &self.channels[ch];
            if !chan.enabled() || chan.cndtr == 0 {
                continue;
            }
            let budget = if chan.ccr & CCR_MEM2MEM != 0 {
                cycles.min(chan.cndtr)
            } else if self.lines.contains(&(chan.cpar as u64)) {
                1
            } else {
                0
            };
            for _ in 0..budget {
                dma_requests.push(self.channels[ch].next_request(ch));
                self.complete_element(ch);
                if self.channels[ch].cndtr == 0 {
                    break;
                }
            }
        }

        PeripheralTickResult {
            irq: false,
            cycles: dma_requests.len() as u32,
            dma_requests,
            explicit_irqs: self.irq_lines(),
            ..Default::default()
        }
    }

    fn on_dma_error(&mut self, channel: usize) {
        if channel >= CHANNELS {
            return;
        }
        tracing::warn!("DMA1 channel {} transfer error; channel disabled", channel + 1);
        self.channels[channel].ccr &= !CCR_EN;
        self.set_flags(channel, FLAG_TEIF);
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem2mem(dma: &mut Dma1, ch: usize, count: u32, extra: u32) {
        dma.write(cpar_offset(ch), 0x2000_0000).unwrap();
        dma.write(cmar_offset(ch), 0x2000_1000).unwrap();
        dma.write(cndtr_offset(ch), count).unwrap();
        dma.write(ccr_offset(ch), CCR_MEM2MEM | CCR_PINC | extra | CCR_EN).unwrap();
    }

    #[test]
    fn test_mem2mem_moves_count_elements() {
        let mut dma = Dma1::new().with_first_irq(11);
        mem2mem(&mut dma, 0, 10, CCR_TCIE);

        let res = dma.tick(4);
        assert_eq!(res.dma_requests.len(), 4);
        assert_eq!(res.dma_requests[1].src, 0x2000_0001);
        assert_eq!(res.dma_requests[1].dst, 0x2000_1000);
        assert!(res.explicit_irqs.is_empty());

        let res = dma.tick(100);
        assert_eq!(res.dma_requests.len(), 6);
        assert_eq!(res.explicit_irqs, vec![11]);
        assert_eq!(dma.read(cndtr_offset(0)).unwrap(), 0);
        assert_eq!(dma.moved(0), 10);
        assert_ne!(dma.read(ISR).unwrap() & FLAG_TCIF, 0);
    }

    #[test]
    fn test_half_transfer_and_ifcr() {
        let mut dma = Dma1::new();
        mem2mem(&mut dma, 2, 8, 0);
        dma.tick(4);
        let isr = dma.read(ISR).unwrap();
        assert_eq!(isr, channel_flags(2, FLAG_GIF | FLAG_HTIF));
        dma.write(IFCR, channel_flags(2, FLAG_GIF)).unwrap();
        assert_eq!(dma.read(ISR).unwrap(), 0);
    }

    #[test]
    fn test_peripheral_channel_waits_for_request() {
        let mut dma = Dma1::new();
        dma.write(cpar_offset(4), 0x4001_3804).unwrap();
        dma.write(cmar_offset(4), 0x2000_0000).unwrap();
        dma.write(cndtr_offset(4), 2).unwrap();
        dma.write(ccr_offset(4), CCR_MINC | CCR_CIRC | CCR_EN).unwrap();

        assert!(dma.tick(10).dma_requests.is_empty());
        dma.on_dma_lines(&[0x4001_3804]);
        let req = dma.tick(10).dma_requests;
        assert_eq!(req.len(), 1);
        assert_eq!(req[0].src, 0x4001_3804);
        dma.tick(10);
        // Circular: count reloads after completion
        assert_eq!(dma.read(cndtr_offset(4)).unwrap(), 2);
        let req = dma.tick(10).dma_requests;
        assert_eq!(req[0].dst, 0x2000_0000);
    }

    #[test]
    fn test_registers_locked_while_enabled() {
        let mut dma = Dma1::new();
        mem2mem(&mut dma, 0, 5, 0);
        dma.write(cndtr_offset(0), 99).unwrap();
        assert_eq!(dma.read(cndtr_offset(0)).unwrap(), 5);
    }

    #[test]
    fn test_bus_error_disables_channel() {
        let mut dma = Dma1::new().with_first_irq(11);
        mem2mem(&mut dma, 1, 5, CCR_TEIE);
        dma.on_dma_error(1);
        assert_eq!(dma.read(ccr_offset(1)).unwrap() & CCR_EN, 0);
        assert_eq!(dma.tick(1).explicit_irqs, vec![12]);
    }
}
