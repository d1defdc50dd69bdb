// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;
use bitflags::bitflags;
use regbench_config::PeripheralBus;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub const CR: u64 = 0x00;
pub const CFGR: u64 = 0x04;
pub const CIR: u64 = 0x08;
pub const AHBENR: u64 = 0x14;
pub const APB2ENR: u64 = 0x18;
pub const APB1ENR: u64 = 0x1C;

pub const HSI_HZ: u32 = 8_000_000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RccCr: u32 {
        const HSION = 1 << 0;
        const HSIRDY = 1 << 1;
        const HSEON = 1 << 16;
        const HSERDY = 1 << 17;
        const HSEBYP = 1 << 18;
        const CSSON = 1 << 19;
        const PLLON = 1 << 24;
        const PLLRDY = 1 << 25;
    }
}

pub const CFGR_SW_SHIFT: u32 = 0;
pub const CFGR_SWS_SHIFT: u32 = 2;
pub const CFGR_HPRE_SHIFT: u32 = 4;
pub const CFGR_PPRE1_SHIFT: u32 = 8;
pub const CFGR_PPRE2_SHIFT: u32 = 11;
pub const CFGR_PLLSRC: u32 = 1 << 16;
pub const CFGR_PLLXTPRE: u32 = 1 << 17;
pub const CFGR_PLLMUL_SHIFT: u32 = 18;

/// Bits of CFGR that are frozen while the PLL runs.
const CFGR_PLL_MASK: u32 = CFGR_PLLSRC | CFGR_PLLXTPRE | (0xF << CFGR_PLLMUL_SHIFT);

/// SW/SWS encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SysclkSource {
    Hsi,
    Hse,
    Pll,
}

impl SysclkSource {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits & 0x3 {
            0 => Some(Self::Hsi),
            1 => Some(Self::Hse),
            2 => Some(Self::Pll),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Hsi => 0,
            Self::Hse => 1,
            Self::Pll => 2,
        }
    }
}

/// PLLMUL field for a multiplier in 2..=16.
pub fn pllmul_bits(multiplier: u32) -> u32 {
    multiplier.clamp(2, 16) - 2
}

pub fn pllmul_from_bits(bits: u32) -> u32 {
    ((bits & 0xF) + 2).min(16)
}

/// HPRE field for an AHB divider.
pub fn hpre_bits(div: u32) -> u32 {
    match div {
        2 => 0b1000,
        4 => 0b1001,
        8 => 0b1010,
        16 => 0b1011,
        64 => 0b1100,
        128 => 0b1101,
        256 => 0b1110,
        512 => 0b1111,
        _ => 0,
    }
}

pub fn hpre_div(bits: u32) -> u32 {
    match bits & 0xF {
        0b1000 => 2,
        0b1001 => 4,
        0b1010 => 8,
        0b1011 => 16,
        0b1100 => 64,
        0b1101 => 128,
        0b1110 => 256,
        0b1111 => 512,
        _ => 1,
    }
}

/// PPRE1/PPRE2 field for an APB divider.
pub fn ppre_bits(div: u32) -> u32 {
    match div {
        2 => 0b100,
        4 => 0b101,
        8 => 0b110,
        16 => 0b111,
        _ => 0,
    }
}

pub fn ppre_div(bits: u32) -> u32 {
    match bits & 0x7 {
        0b100 => 2,
        0b101 => 4,
        0b110 => 8,
        0b111 => 16,
        _ => 1,
    }
}

/// Flash wait states needed for a system clock frequency.
pub fn required_flash_latency(sysclk_hz: u32) -> u32 {
    match sysclk_hz {
        0..=24_000_000 => 0,
        24_000_001..=48_000_000 => 1,
        _ => 2,
    }
}

/// Clock state shared between RCC, the flash interface and the system bus.
///
/// The bus reads the enable registers to decide whether a gated peripheral
/// accepts writes, so they live here rather than inside the RCC model.
#[derive(Debug)]
pub struct ClockDomain {
    pub ahbenr: AtomicU32,
    pub apb2enr: AtomicU32,
    pub apb1enr: AtomicU32,
    pub sysclk_hz: AtomicU32,
    pub hclk_hz: AtomicU32,
    pub pclk1_hz: AtomicU32,
    pub pclk2_hz: AtomicU32,
    pub flash_latency: AtomicU32,
    pub flash_violations: AtomicU64,
}

impl Default for ClockDomain {
    fn default() -> Self {
        Self {
            // SRAM and FLITF clocks are on out of reset.
            ahbenr: AtomicU32::new(0x0000_0014),
            apb2enr: AtomicU32::new(0),
            apb1enr: AtomicU32::new(0),
            sysclk_hz: AtomicU32::new(HSI_HZ),
            hclk_hz: AtomicU32::new(HSI_HZ),
            pclk1_hz: AtomicU32::new(HSI_HZ),
            pclk2_hz: AtomicU32::new(HSI_HZ),
            flash_latency: AtomicU32::new(0),
            flash_violations: AtomicU64::new(0),
        }
    }
}

impl ClockDomain {
    fn enable_register(&self, bus: PeripheralBus) -> &AtomicU32 {
        match bus {
            PeripheralBus::Ahb => &self.ahbenr,
            PeripheralBus::Apb1 => &self.apb1enr,
            PeripheralBus::Apb2 => &self.apb2enr,
        }
    }

    pub fn is_enabled(&self, bus: PeripheralBus, bit: u8) -> bool {
        self.enable_register(bus).load(Ordering::SeqCst) & (1 << bit) != 0
    }

    pub fn sysclk_hz(&self) -> u32 {
        self.sysclk_hz.load(Ordering::SeqCst)
    }

    pub fn flash_violations(&self) -> u64 {
        self.flash_violations.load(Ordering::SeqCst)
    }

    /// Record a violation when the flash latency is too low for the system clock.
    pub fn check_flash_timing(&self) -> bool {
        let sysclk = self.sysclk_hz();
        let latency = self.flash_latency.load(Ordering::SeqCst);
        let required = required_flash_latency(sysclk);
        if latency < required {
            self.flash_violations.fetch_add(1, Ordering::SeqCst);
            tracing::error!(
                "Flash timing violation: SYSCLK {} Hz needs {} wait states, ACR has {}",
                sysclk,
                required,
                latency
            );
            return false;
        }
        true
    }
}

/// Reset and clock control (STM32F1 register map).
///
/// Oscillators and the PLL become ready some cycles after being switched on.
/// The HSE only starts when the board has a crystal (or HSEBYP is set), so a
/// driver that waits for HSERDY without a timeout hangs on a bare board.
#[derive(Debug, serde::Serialize)]
pub struct Rcc {
    cr: u32,
    cfgr: u32,
    cir: u32,
    hse_hz: u32,
    crystal_present: bool,
    hse_startup_cycles: u32,
    pll_lock_cycles: u32,
    hse_timer: u32,
    pll_timer: u32,
    #[serde(skip)]
    domain: Arc<ClockDomain>,
}

impl Rcc {
    pub fn new(domain: Arc<ClockDomain>) -> Self {
        Self {
            cr: 0x0000_0080 | (RccCr::HSION | RccCr::HSIRDY).bits(),
            cfgr: 0,
            cir: 0,
            hse_hz: 8_000_000,
            crystal_present: true,
            hse_startup_cycles: 512,
            pll_lock_cycles: 200,
            hse_timer: 0,
            pll_timer: 0,
            domain,
        }
    }

    pub fn with_hse(mut self, hse_hz: u32, crystal_present: bool) -> Self {
        self.hse_hz = hse_hz;
        self.crystal_present = crystal_present;
        self
    }

    pub fn domain(&self) -> &Arc<ClockDomain> {
        &self.domain
    }

    fn cr_flags(&self) -> RccCr {
        RccCr::from_bits_truncate(self.cr)
    }

    fn source_ready(&self, source: SysclkSource) -> bool {
        let cr = self.cr_flags();
        match source {
            SysclkSource::Hsi => cr.contains(RccCr::HSIRDY),
            SysclkSource::Hse => cr.contains(RccCr::HSERDY),
            SysclkSource::Pll => cr.contains(RccCr::PLLRDY),
        }
    }

    pub fn pll_output_hz(&self) -> u32 {
        let input = if self.cfgr & CFGR_PLLSRC != 0 {
            if self.cfgr & CFGR_PLLXTPRE != 0 {
                self.hse_hz / 2
            } else {
                self.hse_hz
            }
        } else {
            HSI_HZ / 2
        };
        input.saturating_mul(pllmul_from_bits(self.cfgr >> CFGR_PLLMUL_SHIFT))
    }

    fn source_hz(&self, source: SysclkSource) -> u32 {
        match source {
            SysclkSource::Hsi => HSI_HZ,
            SysclkSource::Hse => self.hse_hz,
            SysclkSource::Pll => self.pll_output_hz(),
        }
    }

    fn active_source(&self) -> SysclkSource {
        SysclkSource::from_bits(self.cfgr >> CFGR_SWS_SHIFT).unwrap_or(SysclkSource::Hsi)
    }

    fn update_bus_clocks(&self) {
        let sysclk = self.source_hz(self.active_source());
        let hclk = sysclk / hpre_div(self.cfgr >> CFGR_HPRE_SHIFT);
        let pclk1 = hclk / ppre_div(self.cfgr >> CFGR_PPRE1_SHIFT);
        let pclk2 = hclk / ppre_div(self.cfgr >> CFGR_PPRE2_SHIFT);
        self.domain.sysclk_hz.store(sysclk, Ordering::SeqCst);
        self.domain.hclk_hz.store(hclk, Ordering::SeqCst);
        self.domain.pclk1_hz.store(pclk1, Ordering::SeqCst);
        self.domain.pclk2_hz.store(pclk2, Ordering::SeqCst);
    }

    fn write_cr(&mut self, value: u32) {
        let old = self.cr_flags();
        let requested = RccCr::from_bits_truncate(value);
        let active = self.active_source();
        let mut cr = old;

        // Ready flags are read-only; the oscillator feeding SYSCLK cannot be stopped.
        for (on, rdy, source) in [
            (RccCr::HSION, RccCr::HSIRDY, SysclkSource::Hsi),
            (RccCr::HSEON, RccCr::HSERDY, SysclkSource::Hse),
            (RccCr::PLLON, RccCr::PLLRDY, SysclkSource::Pll),
        ] {
            if requested.contains(on) {
                cr.insert(on);
            } else if active != source {
                cr.remove(on | rdy);
            }
        }
        // HSEBYP is only writable while the HSE is off.
        if !old.contains(RccCr::HSEON) {
            cr.set(RccCr::HSEBYP, requested.contains(RccCr::HSEBYP));
        }
        cr.set(RccCr::CSSON, requested.contains(RccCr::CSSON));

        if cr.contains(RccCr::HSION) && !old.contains(RccCr::HSION) {
            cr.insert(RccCr::HSIRDY);
        }
        if cr.contains(RccCr::HSEON) && !old.contains(RccCr::HSEON) {
            self.hse_timer = self.hse_startup_cycles;
            tracing::debug!("RCC: HSE on (crystal present: {})", self.crystal_present);
        }
        if cr.contains(RccCr::PLLON) && !old.contains(RccCr::PLLON) {
            self.pll_timer = self.pll_lock_cycles;
            tracing::debug!("RCC: PLL on, target {} Hz", self.pll_output_hz());
        }

        self.cr = (self.cr & !RccCr::all().bits()) | cr.bits();
    }

    fn write_cfgr(&mut self, value: u32) {
        let mut next = value & !(0x3 << CFGR_SWS_SHIFT);
        next |= self.cfgr & (0x3 << CFGR_SWS_SHIFT);
        if self.cr_flags().contains(RccCr::PLLON) && (next ^ self.cfgr) & CFGR_PLL_MASK != 0 {
            tracing::warn!("RCC: PLL configuration written while PLL is on; ignored");
            next = (next & !CFGR_PLL_MASK) | (self.cfgr & CFGR_PLL_MASK);
        }
        self.cfgr = next;
        self.update_bus_clocks();
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            CR => self.cr,
            CFGR => self.cfgr,
            CIR => self.cir,
            AHBENR => self.domain.ahbenr.load(Ordering::SeqCst),
            APB2ENR => self.domain.apb2enr.load(Ordering::SeqCst),
            APB1ENR => self.domain.apb1enr.load(Ordering::SeqCst),
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            CR => self.write_cr(value),
            CFGR => self.write_cfgr(value),
            CIR => self.cir = value & 0x0000_1F00,
            AHBENR => self.domain.ahbenr.store(value, Ordering::SeqCst),
            APB2ENR => self.domain.apb2enr.store(value, Ordering::SeqCst),
            APB1ENR => self.domain.apb1enr.store(value, Ordering::SeqCst),
            _ => {}
        }
    }
}

impl crate::Peripheral for Rcc {
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

    fn tick(&mut self, cycles: u32) -> crate::PeripheralTickResult {
        let mut cr = self.cr_flags();

        if cr.contains(RccCr::HSEON) && !cr.contains(RccCr::HSERDY) {
            if self.crystal_present || cr.contains(RccCr::HSEBYP) {
                self.hse_timer = self.hse_timer.saturating_sub(cycles);
                if self.hse_timer == 0 {
                    cr.insert(RccCr::HSERDY);
                    tracing::debug!("RCC: HSE ready");
                }
            }
        }

        if cr.contains(RccCr::PLLON) && !cr.contains(RccCr::PLLRDY) {
            let input_ready = if self.cfgr & CFGR_PLLSRC != 0 {
                cr.contains(RccCr::HSERDY)
            } else {
                cr.contains(RccCr::HSIRDY)
            };
            if input_ready {
                self.pll_timer = self.pll_timer.saturating_sub(cycles);
                if self.pll_timer == 0 {
                    cr.insert(RccCr::PLLRDY);
                    tracing::debug!("RCC: PLL locked at {} Hz", self.pll_output_hz());
                }
            }
        }
        self.cr = (self.cr & !RccCr::all().bits()) | cr.bits();

        let requested = SysclkSource::from_bits(self.cfgr >> CFGR_SW_SHIFT);
        if let Some(requested) = requested {
            if requested != self.active_source() && self.source_ready(requested) {
                self.cfgr = (self.cfgr & !(0x3 << CFGR_SWS_SHIFT))
                    | (requested.bits() << CFGR_SWS_SHIFT);
                self.update_bus_clocks();
                tracing::debug!(
                    "RCC: SYSCLK switched to {:?} ({} Hz)",
                    requested,
                    self.domain.sysclk_hz()
                );
                self.domain.check_flash_timing();
            }
        }

        crate::PeripheralTickResult::default()
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.insert("ahbenr".into(), self.read_reg(AHBENR).into());
            map.insert("apb2enr".into(), self.read_reg(APB2ENR).into());
            map.insert("apb1enr".into(), self.read_reg(APB1ENR).into());
            map.insert("sysclk_hz".into(), self.domain.sysclk_hz().into());
        }
        value
    }
}
