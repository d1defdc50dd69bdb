// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::peripherals::RegisterLayout;
use crate::SimResult;
use bitflags::bitflags;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub mod f1 {
    pub const SR: u64 = 0x00;
    pub const DR: u64 = 0x04;
    pub const BRR: u64 = 0x08;
    pub const CR1: u64 = 0x0C;
    pub const CR2: u64 = 0x10;
    pub const CR3: u64 = 0x14;
    pub const CR1_UE: u32 = 1 << 13;
}

pub mod v2 {
    pub const CR1: u64 = 0x00;
    pub const CR2: u64 = 0x04;
    pub const CR3: u64 = 0x08;
    pub const BRR: u64 = 0x0C;
    pub const ISR: u64 = 0x1C;
    pub const ICR: u64 = 0x20;
    pub const RDR: u64 = 0x24;
    pub const TDR: u64 = 0x28;
    pub const CR1_UE: u32 = 1 << 0;
    pub const ICR_ORECF: u32 = 1 << 3;
    pub const ICR_TCCF: u32 = 1 << 6;
}

bitflags! {
    /// SR (F1) / ISR (v2) flags; both layouts share these positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UsartStatus: u32 {
        const ORE = 1 << 3;
        const IDLE = 1 << 4;
        const RXNE = 1 << 5;
        const TC = 1 << 6;
        const TXE = 1 << 7;
    }
}

pub const CR1_RE: u32 = 1 << 2;
pub const CR1_TE: u32 = 1 << 3;
pub const CR1_RXNEIE: u32 = 1 << 5;
pub const CR1_TCIE: u32 = 1 << 6;
pub const CR1_TXEIE: u32 = 1 << 7;
pub const CR3_DMAR: u32 = 1 << 6;
pub const CR3_DMAT: u32 = 1 << 7;

/// Bits per 8-N-1 frame.
const FRAME_BITS: u32 = 10;

/// USART with selectable register layout, 8-N-1 framing.
///
/// BRR is taken as peripheral cycles per bit, so a frame occupies the wire
/// for `BRR * 10` cycles. Bytes queued with [`Usart::inject_rx`] arrive one
/// frame apart; a byte that lands while RXNE is still set is dropped and
/// raises ORE.
#[derive(Debug, Default, serde::Serialize)]
pub struct Usart {
    layout: RegisterLayout,
    cr1: u32,
    cr2: u32,
    cr3: u32,
    brr: u32,
    status: u32,
    rdr: u8,
    tdr: Option<u8>,
    shifter: Option<u8>,
    tx_timer: u32,
    rx_timer: u32,
    #[serde(skip)]
    rx_wire: VecDeque<u8>,
    tx_log: Vec<u8>,
    overruns: u64,
    // F1: ORE/IDLE clear by SR read followed by DR read.
    sr_read: bool,
    #[serde(skip)]
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    echo_stdout: bool,
}

impl Usart {
    pub fn new() -> Self {
        Self::new_with_layout(RegisterLayout::Stm32F1)
    }

    pub fn new_with_layout(layout: RegisterLayout) -> Self {
        Self {
            layout,
            status: (UsartStatus::TXE | UsartStatus::TC).bits(),
            ..Default::default()
        }
    }

    pub fn layout(&self) -> RegisterLayout {
        self.layout
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo_stdout: bool) {
        self.sink = sink;
        self.echo_stdout = echo_stdout;
    }

    /// Queue bytes on the receive line.
    pub fn inject_rx(&mut self, bytes: &[u8]) {
        if self.rx_wire.is_empty() {
            self.rx_timer = self.frame_cycles();
        }
        self.rx_wire.extend(bytes.iter().copied());
    }

    pub fn rx_backlog(&self) -> usize {
        self.rx_wire.len()
    }

    /// Everything shifted out so far.
    pub fn transmitted(&self) -> Vec<u8> {
        self.tx_log.clone()
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    fn flags(&self) -> UsartStatus {
        UsartStatus::from_bits_truncate(self.status)
    }

    fn set_flag(&mut self, flag: UsartStatus, on: bool) {
        let mut flags = self.flags();
        flags.set(flag, on);
        self.status = flags.bits();
    }

    fn enabled(&self) -> bool {
        let ue = match self.layout {
            RegisterLayout::Stm32F1 => f1::CR1_UE,
            RegisterLayout::Stm32V2 => v2::CR1_UE,
        };
        self.cr1 & ue != 0
    }

    fn frame_cycles(&self) -> u32 {
        self.brr.max(16) * FRAME_BITS
    }

    fn rx_offset(&self) -> u64 {
        match self.layout {
            RegisterLayout::Stm32F1 => f1::DR,
            RegisterLayout::Stm32V2 => v2::RDR,
        }
    }

    fn tx_offset(&self) -> u64 {
        match self.layout {
            RegisterLayout::Stm32F1 => f1::DR,
            RegisterLayout::Stm32V2 => v2::TDR,
        }
    }

    fn push_tx(&mut self, value: u8) {
        self.tx_log.push(value);
        if let Some(sink) = &self.sink {
            if let Ok(mut guard) = sink.lock() {
                guard.push(value);
            }
        }

        if self.echo_stdout {
            #[allow(unused_must_use)]
            {
                print!("{}", value as char);
                io::stdout().flush();
            }
        }
    }

    fn read_data(&mut self) -> u32 {
        self.set_flag(UsartStatus::RXNE, false);
        if self.sr_read {
            self.set_flag(UsartStatus::ORE, false);
            self.set_flag(UsartStatus::IDLE, false);
            self.sr_read = false;
        }
        self.rdr as u32
    }

    fn write_data(&mut self, value: u32) {
        if !self.enabled() || self.cr1 & CR1_TE == 0 {
            tracing::warn!("USART: data written with transmitter disabled; dropped");
            return;
        }
        if !self.flags().contains(UsartStatus::TXE) {
            tracing::warn!("USART: data written while TXE clear; byte overwritten");
        }
        self.tdr = Some(value as u8);
        self.set_flag(UsartStatus::TXE, false);
        self.set_flag(UsartStatus::TC, false);
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match self.layout {
            RegisterLayout::Stm32F1 => match offset {
                f1::SR => self.status,
                f1::DR => self.rdr as u32,
                f1::BRR => self.brr,
                f1::CR1 => self.cr1,
                f1::CR2 => self.cr2,
                f1::CR3 => self.cr3,
                _ => 0,
            },
            RegisterLayout::Stm32V2 => match offset {
                v2::CR1 => self.cr1,
                v2::CR2 => self.cr2,
                v2::CR3 => self.cr3,
                v2::BRR => self.brr,
                v2::ISR => self.status,
                v2::RDR => self.rdr as u32,
                _ => 0,
            },
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match self.layout {
            RegisterLayout::Stm32F1 => match offset {
                // rc_w0: only RXNE and TC can be cleared by software
                f1::SR => {
                    let clearable = (UsartStatus::RXNE | UsartStatus::TC).bits();
                    self.status &= value | !clearable;
                }
                f1::DR => self.write_data(value),
                f1::BRR => self.brr = value & 0xFFFF,
                f1::CR1 => self.cr1 = value & 0x3FFF,
                f1::CR2 => self.cr2 = value & 0x7F7F,
                f1::CR3 => self.cr3 = value & 0x7FF,
                _ => {}
            },
            RegisterLayout::Stm32V2 => match offset {
                v2::CR1 => self.cr1 = value,
                v2::CR2 => self.cr2 = value,
                v2::CR3 => self.cr3 = value,
                v2::BRR => self.brr = value & 0xFFFF,
                v2::ICR => {
                    if value & v2::ICR_ORECF != 0 {
                        self.set_flag(UsartStatus::ORE, false);
                    }
                    if value & v2::ICR_TCCF != 0 {
                        self.set_flag(UsartStatus::TC, false);
                    }
                }
                v2::TDR => self.write_data(value),
                _ => {}
            },
        }
    }

    fn irq_level(&self) -> bool {
        let flags = self.flags();
        (flags.intersects(UsartStatus::RXNE | UsartStatus::ORE) && self.cr1 & CR1_RXNEIE != 0)
            || (flags.contains(UsartStatus::TXE) && self.cr1 & CR1_TXEIE != 0)
            || (flags.contains(UsartStatus::TC) && self.cr1 & CR1_TCIE != 0)
    }

    fn tick_tx(&mut self, cycles: u32) {
        let mut budget = cycles;
        loop {
            if self.shifter.is_none() {
                let Some(byte) = self.tdr.take() else {
                    break;
                };
                self.shifter = Some(byte);
                self.tx_timer = self.frame_cycles();
                self.set_flag(UsartStatus::TXE, true);
            }
            if budget < self.tx_timer {
                self.tx_timer -= budget;
                break;
            }
            budget -= self.tx_timer;
            self.tx_timer = 0;
            if let Some(byte) = self.shifter.take() {
                self.push_tx(byte);
            }
            if self.tdr.is_none() {
                self.set_flag(UsartStatus::TC, true);
                break;
            }
        }
    }

    fn tick_rx(&mut self, cycles: u32) {
        if self.cr1 & CR1_RE == 0 {
            return;
        }
        let mut budget = cycles;
        while !self.rx_wire.is_empty() {
            if budget < self.rx_timer {
                self.rx_timer -= budget;
                break;
            }
            budget -= self.rx_timer;
            self.rx_timer = self.frame_cycles();
            let Some(byte) = self.rx_wire.pop_front() else {
                break;
            };
            if self.flags().contains(UsartStatus::RXNE) {
                self.overruns += 1;
                self.set_flag(UsartStatus::ORE, true);
                tracing::debug!("USART: overrun, dropped {:#04x}", byte);
            } else {
                self.rdr = byte;
                self.set_flag(UsartStatus::RXNE, true);
            }
        }
    }
}

impl crate::Peripheral for Usart {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        let rx = self.rx_offset();
        match self.layout {
            RegisterLayout::Stm32F1 if offset == f1::SR => {
                self.sr_read = true;
                Ok(self.status)
            }
            _ if offset == rx => Ok(self.read_data()),
            _ => Ok(self.read_reg(offset)),
        }
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn peek(&self, offset: u64) -> u32 {
        self.read_reg(offset)
    }

    fn tick(&mut self, cycles: u32) -> crate::PeripheralTickResult {
        if !self.enabled() {
            return crate::PeripheralTickResult::default();
        }
        self.tick_tx(cycles);
        self.tick_rx(cycles);
        crate::PeripheralTickResult {
            irq: self.irq_level(),
            cycles,
            ..Default::default()
        }
    }

    fn dma_request_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::new();
        if !self.enabled() {
            return offsets;
        }
        let flags = self.flags();
        if self.cr3 & CR3_DMAR != 0 && flags.contains(UsartStatus::RXNE) {
            offsets.push(self.rx_offset());
        }
        if self.cr3 & CR3_DMAT != 0 && flags.contains(UsartStatus::TXE) && self.cr1 & CR1_TE != 0 {
            offsets.push(self.tx_offset());
        }
        offsets
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
