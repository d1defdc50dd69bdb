// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Bus, HalError, HalResult};
use regbench_core::peripherals::dma::{
    ccr_offset, channel_flags, cmar_offset, cndtr_offset, cpar_offset, CCR_CIRC, CCR_DIR,
    CCR_EN, CCR_HTIE, CCR_MEM2MEM, CCR_MINC, CCR_MSIZE_SHIFT, CCR_PINC, CCR_PSIZE_SHIFT,
    CCR_TCIE, CHANNELS, FLAG_GIF, FLAG_HTIF, FLAG_TCIF, IFCR, ISR,
};
use regbench_core::TransferWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    PeripheralToMemory,
    MemoryToPeripheral,
    MemoryToMemory,
}

/// One DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaDescriptor {
    pub src: u64,
    pub dst: u64,
    pub count: u32,
    pub width: TransferWidth,
    pub src_increment: bool,
    pub dst_increment: bool,
    pub direction: DmaDirection,
    pub circular: bool,
    pub complete_interrupt: bool,
    pub half_interrupt: bool,
}

impl DmaDescriptor {
    /// Peripheral register to a memory buffer, the usual receive setup.
    pub fn peripheral_to_memory(src: u64, dst: u64, count: u32) -> Self {
        Self {
            src,
            dst,
            count,
            width: TransferWidth::Byte,
            src_increment: false,
            dst_increment: true,
            direction: DmaDirection::PeripheralToMemory,
            circular: false,
            complete_interrupt: false,
            half_interrupt: false,
        }
    }

    pub fn memory_to_peripheral(src: u64, dst: u64, count: u32) -> Self {
        Self {
            src_increment: true,
            dst_increment: false,
            direction: DmaDirection::MemoryToPeripheral,
            ..Self::peripheral_to_memory(src, dst, count)
        }
    }

    pub fn memory_to_memory(src: u64, dst: u64, count: u32) -> Self {
        Self {
            src_increment: true,
            dst_increment: true,
            direction: DmaDirection::MemoryToMemory,
            ..Self::peripheral_to_memory(src, dst, count)
        }
    }

    pub fn validate(&self) -> HalResult<()> {
        if !(1..=0xFFFF).contains(&self.count) {
            return Err(HalError::InvalidDescriptor(format!(
                "element count {} outside 1..=65535",
                self.count
            )));
        }
        if self.circular && self.direction == DmaDirection::MemoryToMemory {
            return Err(HalError::InvalidDescriptor(
                "memory-to-memory transfers cannot be circular".to_string(),
            ));
        }
        let align = self.width.bytes();
        if self.src % align != 0 || self.dst % align != 0 {
            return Err(HalError::InvalidDescriptor(format!(
                "addresses {:#x} -> {:#x} not aligned to {} bytes",
                self.src, self.dst, align
            )));
        }
        let span = u64::from(self.count) * align;
        for (addr, increment) in [(self.src, self.src_increment), (self.dst, self.dst_increment)] {
            let last = if increment { addr.saturating_add(span - align) } else { addr };
            if last > u64::from(u32::MAX) {
                return Err(HalError::InvalidDescriptor(format!(
                    "address {:#x} outside the 32-bit bus",
                    addr
                )));
            }
        }
        Ok(())
    }

    /// CPAR, CMAR and CCR (without EN) for this transfer.
    fn registers(&self) -> (u32, u32, u32) {
        let size = self.width.bits();
        let mut ccr = (size << CCR_PSIZE_SHIFT) | (size << CCR_MSIZE_SHIFT);
        if self.circular {
            ccr |= CCR_CIRC;
        }
        if self.complete_interrupt {
            ccr |= CCR_TCIE;
        }
        if self.half_interrupt {
            ccr |= CCR_HTIE;
        }
        // The controller reads CMAR and writes CPAR when DIR is set.
        let (cpar, cmar, pinc, minc) = match self.direction {
            DmaDirection::PeripheralToMemory => {
                (self.src, self.dst, self.src_increment, self.dst_increment)
            }
            DmaDirection::MemoryToPeripheral => {
                ccr |= CCR_DIR;
                (self.dst, self.src, self.dst_increment, self.src_increment)
            }
            DmaDirection::MemoryToMemory => {
                ccr |= CCR_DIR | CCR_MEM2MEM;
                (self.dst, self.src, self.dst_increment, self.src_increment)
            }
        };
        if pinc {
            ccr |= CCR_PINC;
        }
        if minc {
            ccr |= CCR_MINC;
        }
        (cpar as u32, cmar as u32, ccr)
    }
}

/// One channel of a DMA controller. Channels are numbered 1..=7 as in the reference manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannel {
    base: u64,
    index: usize,
}

impl DmaChannel {
    pub fn new(base: u64, channel: u8) -> HalResult<Self> {
        let index = (channel as usize).wrapping_sub(1);
        if index >= CHANNELS {
            return Err(HalError::InvalidDescriptor(format!(
                "DMA channel {} outside 1..={}",
                channel, CHANNELS
            )));
        }
        Ok(Self { base, index })
    }

    pub fn number(&self) -> u8 {
        self.index as u8 + 1
    }

    /// Device interrupt of this channel given the controller's first line.
    pub fn irq(&self, first_irq: u32) -> u32 {
        first_irq + self.index as u32
    }

    fn flags(&self, bus: &mut dyn Bus) -> HalResult<u32> {
        Ok((bus.read_u32(self.base + ISR)? >> (4 * self.index)) & 0xF)
    }

    /// Program and start a transfer. The channel is stopped and its flags cleared first.
    pub fn configure(&self, bus: &mut dyn Bus, desc: &DmaDescriptor) -> HalResult<()> {
        desc.validate()?;
        self.disable(bus)?;
        bus.write_u32(self.base + IFCR, channel_flags(self.index, FLAG_GIF))?;

        let (cpar, cmar, ccr) = desc.registers();
        bus.write_u32(self.base + cpar_offset(self.index), cpar)?;
        bus.write_u32(self.base + cmar_offset(self.index), cmar)?;
        bus.write_u32(self.base + cndtr_offset(self.index), desc.count)?;
        bus.write_u32(self.base + ccr_offset(self.index), ccr)?;
        bus.write_u32(self.base + ccr_offset(self.index), ccr | CCR_EN)?;
        tracing::debug!(
            "DMA channel {}: {} x {:?} {:#x} -> {:#x}",
            self.number(),
            desc.count,
            desc.width,
            desc.src,
            desc.dst
        );
        Ok(())
    }

    pub fn disable(&self, bus: &mut dyn Bus) -> HalResult<()> {
        bus.modify_u32(self.base + ccr_offset(self.index), CCR_EN, 0)?;
        Ok(())
    }

    pub fn is_enabled(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(bus.read_u32(self.base + ccr_offset(self.index))? & CCR_EN != 0)
    }

    pub fn transfer_complete(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(self.flags(bus)? & FLAG_TCIF != 0)
    }

    pub fn half_transfer(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        Ok(self.flags(bus)? & FLAG_HTIF != 0)
    }

    /// Clear the completion flag. Returns whether it was set, so a completion
    /// is only ever acted on once.
    pub fn clear_complete(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        if !self.transfer_complete(bus)? {
            return Ok(false);
        }
        bus.write_u32(
            self.base + IFCR,
            channel_flags(self.index, FLAG_TCIF | FLAG_GIF),
        )?;
        Ok(true)
    }

    pub fn clear_half(&self, bus: &mut dyn Bus) -> HalResult<bool> {
        if !self.half_transfer(bus)? {
            return Ok(false);
        }
        bus.write_u32(self.base + IFCR, channel_flags(self.index, FLAG_HTIF))?;
        Ok(true)
    }

    /// Elements left to move (CNDTR).
    pub fn remaining(&self, bus: &mut dyn Bus) -> HalResult<u32> {
        Ok(bus.read_u32(self.base + cndtr_offset(self.index))? & 0xFFFF)
    }
}
