// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::peripherals::rcc::ClockDomain;
use crate::{PeripheralTickResult, SimResult, SimulationError};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

pub const ACR: u64 = 0x00;
pub const KEYR: u64 = 0x04;
pub const SR: u64 = 0x0C;
pub const CR: u64 = 0x10;
pub const AR: u64 = 0x14;

pub const ACR_LATENCY_MASK: u32 = 0x7;
pub const ACR_HLFCYA: u32 = 1 << 3;
pub const ACR_PRFTBE: u32 = 1 << 4;
pub const ACR_PRFTBS: u32 = 1 << 5;

pub const KEY1: u32 = 0x4567_0123;
pub const KEY2: u32 = 0xCDEF_89AB;

pub const SR_BSY: u32 = 1 << 0;
pub const SR_PGERR: u32 = 1 << 2;
pub const SR_WRPRTERR: u32 = 1 << 4;
pub const SR_EOP: u32 = 1 << 5;

pub const CR_PG: u32 = 1 << 0;
pub const CR_PER: u32 = 1 << 1;
pub const CR_MER: u32 = 1 << 2;
pub const CR_STRT: u32 = 1 << 6;
pub const CR_LOCK: u32 = 1 << 7;
pub const CR_ERRIE: u32 = 1 << 10;
pub const CR_EOPIE: u32 = 1 << 12;

/// Busy times in core cycles, shortened from the datasheet figures.
pub const PROGRAM_CYCLES: u32 = 64;
pub const PAGE_ERASE_CYCLES: u32 = 2_000;
pub const MASS_ERASE_CYCLES: u32 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
enum Operation {
    Program,
    ErasePage(u64),
    EraseAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
enum KeyState {
    Locked,
    FirstKeySeen,
    Unlocked,
    /// A wrong key was written; locked until reset.
    Faulted,
}

/// Main flash array plus the program/erase controller state.
///
/// Shared between the register interface and the memory window so a
/// half-word store into the array can see CR.PG.
pub struct FlashBank {
    base: u64,
    page_size: u64,
    memory: Vec<u8>,
    sr: u32,
    cr: u32,
    ar: u32,
    keys: KeyState,
    busy: Option<(u32, Operation)>,
    programs: u64,
    erases: u64,
}

impl std::fmt::Debug for FlashBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashBank")
            .field("base", &self.base)
            .field("size", &self.memory.len())
            .field("page_size", &self.page_size)
            .field("sr", &self.sr)
            .field("cr", &self.cr)
            .finish()
    }
}

impl FlashBank {
    /// An erased array of `size` bytes at `base`.
    pub fn new(base: u64, size: usize, page_size: u64) -> Self {
        Self {
            base,
            page_size,
            memory: vec![0xFF; size],
            sr: 0,
            cr: CR_LOCK,
            ar: 0,
            keys: KeyState::Locked,
            busy: None,
            programs: 0,
            erases: 0,
        }
    }

    pub fn shared(base: u64, size: usize, page_size: u64) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(base, size, page_size)))
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.memory.len() as u64
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn is_locked(&self) -> bool {
        self.cr & CR_LOCK != 0
    }

    /// Half-words programmed and erase operations completed since reset.
    pub fn counts(&self) -> (u64, u64) {
        (self.programs, self.erases)
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.memory.get(offset..offset.checked_add(len)?)
    }

    /// Preload the array, as a programmer would before reset.
    pub fn load(&mut self, offset: usize, data: &[u8]) -> bool {
        match offset
            .checked_add(data.len())
            .and_then(|end| self.memory.get_mut(offset..end))
        {
            Some(slot) => {
                slot.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn word(&self, offset: u64) -> u32 {
        let i = offset as usize;
        match self.memory.get(i..i + 4) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    fn write_keyr(&mut self, value: u32) {
        self.keys = match (self.keys, value) {
            (KeyState::Locked, KEY1) => KeyState::FirstKeySeen,
            (KeyState::FirstKeySeen, KEY2) => {
                self.cr &= !CR_LOCK;
                tracing::debug!("FLASH: controller unlocked");
                KeyState::Unlocked
            }
            (KeyState::Unlocked, _) => KeyState::Unlocked,
            (KeyState::Faulted, _) => KeyState::Faulted,
            (_, other) => {
                tracing::warn!("FLASH: wrong key {:#010x}; locked until reset", other);
                KeyState::Faulted
            }
        };
    }

    fn write_cr(&mut self, value: u32) {
        if self.is_locked() {
            tracing::debug!("FLASH: CR write {:#x} ignored while locked", value);
            return;
        }
        if self.busy.is_some() {
            return;
        }
        let mask = CR_PG | CR_PER | CR_MER | CR_LOCK | CR_ERRIE | CR_EOPIE;
        self.cr = value & mask;
        if self.cr & CR_LOCK != 0 {
            self.keys = match self.keys {
                KeyState::Faulted => KeyState::Faulted,
                _ => KeyState::Locked,
            };
            return;
        }
        if value & CR_STRT == 0 {
            return;
        }
        let op = if self.cr & CR_MER != 0 {
            Some((MASS_ERASE_CYCLES, Operation::EraseAll))
        } else if self.cr & CR_PER != 0 {
            Some((PAGE_ERASE_CYCLES, Operation::ErasePage(self.ar as u64)))
        } else {
            None
        };
        if let Some(op) = op {
            self.cr |= CR_STRT;
            self.sr |= SR_BSY;
            self.busy = Some(op);
        }
    }

    /// Store into the array at `offset` (word aligned). Only half-words that
    /// change are programmed.
    fn program(&mut self, offset: u64, value: u32) -> SimResult<()> {
        if self.cr & CR_PG == 0 || self.is_locked() {
            return Err(SimulationError::Peripheral {
                name: "flash".to_string(),
                reason: format!(
                    "store to {:#x} outside programming mode",
                    self.base + offset
                ),
            });
        }
        if self.busy.is_some() {
            return Ok(());
        }
        let current = self.word(offset);
        let mut programmed = false;
        for half in 0..2u64 {
            let shift = 16 * half;
            let new = (value >> shift) as u16;
            let old = (current >> shift) as u16;
            if new == old {
                continue;
            }
            // Only erased cells, or a store of all zeros, can be programmed.
            if old != 0xFFFF && new != 0 {
                tracing::debug!(
                    "FLASH: {:#x} holds {:#06x}, not erased",
                    self.base + offset + 2 * half,
                    old
                );
                self.sr |= SR_PGERR;
                continue;
            }
            let i = (offset + 2 * half) as usize;
            if let Some(slot) = self.memory.get_mut(i..i + 2) {
                slot.copy_from_slice(&new.to_le_bytes());
                self.programs += 1;
                programmed = true;
            }
        }
        if programmed {
            self.sr |= SR_BSY;
            self.busy = Some((PROGRAM_CYCLES, Operation::Program));
        }
        Ok(())
    }

    fn finish(&mut self, op: Operation) {
        match op {
            Operation::Program => {}
            Operation::ErasePage(addr) => {
                let Some(offset) = addr.checked_sub(self.base).filter(|o| *o < self.size()) else {
                    tracing::debug!("FLASH: erase of {:#x} is outside the array", addr);
                    self.sr |= SR_WRPRTERR;
                    self.finish_status();
                    return;
                };
                let start = (offset - offset % self.page_size) as usize;
                let end = (start + self.page_size as usize).min(self.memory.len());
                self.memory[start..end].fill(0xFF);
                self.erases += 1;
                tracing::debug!("FLASH: page at {:#x} erased", self.base + start as u64);
            }
            Operation::EraseAll => {
                self.memory.fill(0xFF);
                self.erases += 1;
                tracing::debug!("FLASH: mass erase done");
            }
        }
        self.sr |= SR_EOP;
        self.finish_status();
    }

    fn finish_status(&mut self) {
        self.sr &= !SR_BSY;
        self.cr &= !CR_STRT;
    }

    fn tick(&mut self, cycles: u32) -> bool {
        let Some((remaining, op)) = self.busy else {
            return false;
        };
        if cycles < remaining {
            self.busy = Some((remaining - cycles, op));
        } else {
            self.busy = None;
            self.finish(op);
        }
        true
    }

    fn irq_level(&self) -> bool {
        (self.sr & SR_EOP != 0 && self.cr & CR_EOPIE != 0)
            || (self.sr & (SR_PGERR | SR_WRPRTERR) != 0 && self.cr & CR_ERRIE != 0)
    }
}

// Poisoning is ignored.
fn lock(bank: &Mutex<FlashBank>) -> MutexGuard<'_, FlashBank> {
    bank.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Flash interface registers: access control (wait states) and, when a flash
/// array is attached, the unlock/program/erase controller.
///
/// Lowering LATENCY below what the running SYSCLK needs is a timing
/// violation just like switching to a faster clock without raising it.
#[derive(Debug, serde::Serialize)]
pub struct FlashInterface {
    acr: u32,
    #[serde(skip)]
    domain: Arc<ClockDomain>,
    #[serde(skip)]
    bank: Option<Arc<Mutex<FlashBank>>>,
}

impl FlashInterface {
    pub fn new(domain: Arc<ClockDomain>) -> Self {
        Self {
            acr: ACR_PRFTBE | ACR_PRFTBS,
            domain,
            bank: None,
        }
    }

    pub fn with_bank(mut self, bank: Arc<Mutex<FlashBank>>) -> Self {
        self.bank = Some(bank);
        self
    }

    pub fn latency(&self) -> u32 {
        self.acr & ACR_LATENCY_MASK
    }

    fn read_reg(&self, offset: u64) -> u32 {
        if offset == ACR {
            return self.acr;
        }
        let Some(bank) = &self.bank else {
            return 0;
        };
        let bank = lock(bank);
        match offset {
            SR => bank.sr,
            CR => bank.cr,
            AR => bank.ar,
            _ => 0,
        }
    }

    fn write_acr(&mut self, value: u32) {
        let latency = (value & ACR_LATENCY_MASK).min(2);
        let mut acr = latency | (value & (ACR_HLFCYA | ACR_PRFTBE));
        // PRFTBS mirrors PRFTBE.
        if acr & ACR_PRFTBE != 0 {
            acr |= ACR_PRFTBS;
        }
        let previous = self.latency();
        self.acr = acr;
        self.domain.flash_latency.store(latency, Ordering::SeqCst);
        if latency != previous {
            tracing::debug!("FLASH: latency {} -> {} wait states", previous, latency);
            if latency < previous {
                self.domain.check_flash_timing();
            }
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        if offset == ACR {
            self.write_acr(value);
            return;
        }
        let Some(bank) = &self.bank else {
            return;
        };
        let mut bank = lock(bank);
        match offset {
            KEYR => bank.write_keyr(value),
            // rc_w1
            SR => bank.sr &= !(value & (SR_EOP | SR_PGERR | SR_WRPRTERR)),
            CR => bank.write_cr(value),
            AR => {
                if bank.busy.is_none() {
                    bank.ar = value;
                }
            }
            _ => {}
        }
    }
}

impl crate::Peripheral for FlashInterface {
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

    fn tick(&mut self, cycles: u32) -> PeripheralTickResult {
        let Some(bank) = &self.bank else {
            return PeripheralTickResult::default();
        };
        let mut bank = lock(bank);
        let busy = bank.tick(cycles);
        PeripheralTickResult {
            irq: bank.irq_level(),
            cycles: if busy { cycles } else { 0 },
            ..Default::default()
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let mut snap = serde_json::json!({
            "acr": self.acr,
            "violations": self.domain.flash_violations(),
        });
        if let Some(bank) = &self.bank {
            let bank = lock(bank);
            snap["sr"] = bank.sr.into();
            snap["cr"] = bank.cr.into();
            snap["keys"] = serde_json::to_value(bank.keys).unwrap_or_default();
        }
        snap
    }
}

/// The flash array as a read-mostly memory window. Stores are half-word
/// programs and need CR.PG set on the interface.
#[derive(Debug)]
pub struct FlashArray {
    bank: Arc<Mutex<FlashBank>>,
}

impl FlashArray {
    pub fn new(bank: Arc<Mutex<FlashBank>>) -> Self {
        Self { bank }
    }

    /// Copy of `len` bytes at array `offset`.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        lock(&self.bank).bytes(offset, len).map(<[u8]>::to_vec)
    }

    pub fn load(&self, offset: usize, data: &[u8]) -> bool {
        lock(&self.bank).load(offset, data)
    }

    /// Half-words programmed and erase operations completed since reset.
    pub fn counts(&self) -> (u64, u64) {
        lock(&self.bank).counts()
    }
}

impl crate::Peripheral for FlashArray {
    fn read(&mut self, offset: u64) -> SimResult<u32> {
        Ok(self.peek(offset))
    }

    fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
        lock(&self.bank).program(offset, value)
    }

    fn peek(&self, offset: u64) -> u32 {
        lock(&self.bank).word(offset)
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        let bank = lock(&self.bank);
        serde_json::json!({
            "base": bank.base,
            "size": bank.size(),
            "page_size": bank.page_size,
            "programs": bank.programs,
            "erases": bank.erases,
        })
    }
}
