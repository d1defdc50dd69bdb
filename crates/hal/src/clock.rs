// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! System clock tree setup: oscillator, PLL, bus prescalers and flash wait states.

use crate::wait::{wait_set, wait_until, WaitPolicy};
use crate::{map, Bus, HalResult};
use regbench_config::{ClockPresetConfig, OscillatorSource, PllConfig};
use regbench_core::peripherals::flash;
use regbench_core::peripherals::rcc::{self, RccCr, SysclkSource, HSI_HZ};
use serde::Serialize;

const CFGR_SW_MASK: u32 = 0x3 << rcc::CFGR_SW_SHIFT;
const CFGR_PLL_FIELDS: u32 =
    rcc::CFGR_PLLSRC | rcc::CFGR_PLLXTPRE | (0xF << rcc::CFGR_PLLMUL_SHIFT);

/// Frequencies of the clock tree after configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockTree {
    pub sysclk: u32,
    pub hclk: u32,
    pub pclk1: u32,
    pub pclk2: u32,
}

impl ClockTree {
    /// Clock tree out of reset: everything on the 8 MHz HSI.
    pub const RESET: ClockTree = ClockTree {
        sysclk: HSI_HZ,
        hclk: HSI_HZ,
        pclk1: HSI_HZ,
        pclk2: HSI_HZ,
    };

    /// Kernel clock of timers on APB1, doubled when APB1 is prescaled.
    pub fn timer_clock_apb1(&self) -> u32 {
        if self.pclk1 < self.hclk {
            self.pclk1.saturating_mul(2)
        } else {
            self.pclk1
        }
    }

    pub fn timer_clock_apb2(&self) -> u32 {
        if self.pclk2 < self.hclk {
            self.pclk2.saturating_mul(2)
        } else {
            self.pclk2
        }
    }
}

impl Default for ClockTree {
    fn default() -> Self {
        Self::RESET
    }
}

/// A complete clock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockPreset {
    pub name: String,
    pub source: OscillatorSource,
    /// Crystal frequency, only used when `source` is HSE.
    pub hse_hz: u32,
    pub pll: Option<PllConfig>,
    pub ahb_div: u32,
    pub apb1_div: u32,
    pub apb2_div: u32,
    pub flash_latency: u32,
}

impl ClockPreset {
    pub const BUILTIN: [&'static str; 5] = [
        "hsi_8mhz",
        "hsi_pll_64mhz",
        "hse_8mhz_to_24mhz",
        "hse_8mhz_to_48mhz",
        "hse_8mhz_to_72mhz",
    ];

    fn new(name: &str, source: OscillatorSource, pll: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            source,
            hse_hz: 8_000_000,
            pll: pll.map(|multiplier| PllConfig {
                multiplier,
                hse_prediv: 1,
            }),
            ahb_div: 1,
            apb1_div: 1,
            apb2_div: 1,
            flash_latency: 0,
        }
    }

    pub fn hsi_8mhz() -> Self {
        Self::new("hsi_8mhz", OscillatorSource::Hsi, None)
    }

    /// HSI/2 x16. APB1 is limited to 36 MHz.
    pub fn hsi_pll_64mhz() -> Self {
        Self {
            apb1_div: 2,
            flash_latency: 2,
            ..Self::new("hsi_pll_64mhz", OscillatorSource::Hsi, Some(16))
        }
    }

    pub fn hse_8mhz_to_24mhz() -> Self {
        Self::new("hse_8mhz_to_24mhz", OscillatorSource::Hse, Some(3))
    }

    pub fn hse_8mhz_to_48mhz() -> Self {
        Self {
            apb1_div: 2,
            flash_latency: 1,
            ..Self::new("hse_8mhz_to_48mhz", OscillatorSource::Hse, Some(6))
        }
    }

    pub fn hse_8mhz_to_72mhz() -> Self {
        Self {
            apb1_div: 2,
            flash_latency: 2,
            ..Self::new("hse_8mhz_to_72mhz", OscillatorSource::Hse, Some(9))
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "hsi_8mhz" => Some(Self::hsi_8mhz()),
            "hsi_pll_64mhz" => Some(Self::hsi_pll_64mhz()),
            "hse_8mhz_to_24mhz" => Some(Self::hse_8mhz_to_24mhz()),
            "hse_8mhz_to_48mhz" => Some(Self::hse_8mhz_to_48mhz()),
            "hse_8mhz_to_72mhz" => Some(Self::hse_8mhz_to_72mhz()),
            _ => None,
        }
    }

    /// Preset declared in a board manifest, with the board's crystal frequency.
    pub fn from_config(config: &ClockPresetConfig, hse_hz: u32) -> Self {
        Self {
            name: config.name.clone(),
            source: config.source,
            hse_hz,
            pll: config.pll,
            ahb_div: config.ahb_div,
            apb1_div: config.apb1_div,
            apb2_div: config.apb2_div,
            flash_latency: config.flash_latency,
        }
    }

    fn oscillator_hz(&self) -> u32 {
        match self.source {
            OscillatorSource::Hsi => HSI_HZ,
            OscillatorSource::Hse => self.hse_hz,
        }
    }

    pub fn sysclk_hz(&self) -> u32 {
        match &self.pll {
            None => self.oscillator_hz(),
            Some(pll) => {
                let input = match self.source {
                    OscillatorSource::Hsi => HSI_HZ / 2,
                    OscillatorSource::Hse => self.hse_hz / pll.hse_prediv.max(1),
                };
                input.saturating_mul(pll.multiplier)
            }
        }
    }

    pub fn tree(&self) -> ClockTree {
        let sysclk = self.sysclk_hz();
        let hclk = sysclk / self.ahb_div.max(1);
        ClockTree {
            sysclk,
            hclk,
            pclk1: hclk / self.apb1_div.max(1),
            pclk2: hclk / self.apb2_div.max(1),
        }
    }

    /// Wait states used for this preset, never fewer than the frequency needs.
    pub fn wait_states(&self) -> u32 {
        self.flash_latency
            .max(rcc::required_flash_latency(self.sysclk_hz()))
    }

    fn target_source(&self) -> SysclkSource {
        match (self.pll.is_some(), self.source) {
            (true, _) => SysclkSource::Pll,
            (false, OscillatorSource::Hsi) => SysclkSource::Hsi,
            (false, OscillatorSource::Hse) => SysclkSource::Hse,
        }
    }

    fn cfgr_bits(&self) -> u32 {
        let mut cfgr = (rcc::hpre_bits(self.ahb_div) << rcc::CFGR_HPRE_SHIFT)
            | (rcc::ppre_bits(self.apb1_div) << rcc::CFGR_PPRE1_SHIFT)
            | (rcc::ppre_bits(self.apb2_div) << rcc::CFGR_PPRE2_SHIFT);
        if let Some(pll) = &self.pll {
            if self.source == OscillatorSource::Hse {
                cfgr |= rcc::CFGR_PLLSRC;
                if pll.hse_prediv == 2 {
                    cfgr |= rcc::CFGR_PLLXTPRE;
                }
            }
            cfgr |= rcc::pllmul_bits(pll.multiplier) << rcc::CFGR_PLLMUL_SHIFT;
        }
        cfgr
    }
}

/// Drives RCC and the flash interface through a clock change.
#[derive(Debug, Clone, Copy)]
pub struct ClockConfigurator {
    rcc: u64,
    flash: u64,
    policy: WaitPolicy,
}

impl Default for ClockConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockConfigurator {
    pub fn new() -> Self {
        Self {
            rcc: map::RCC,
            flash: map::FLASH,
            policy: WaitPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Switch the system clock to `preset`.
    ///
    /// Wait states go up before a faster clock is selected and come down only
    /// after a slower one is running.
    pub fn apply(&self, bus: &mut dyn Bus, preset: &ClockPreset) -> HalResult<ClockTree> {
        let cr = self.rcc + rcc::CR;
        let cfgr = self.rcc + rcc::CFGR;
        let target = preset.tree();
        let before = self.read_tree(bus, preset.hse_hz)?;
        tracing::debug!(
            "Clock: {} Hz -> {} Hz ({})",
            before.sysclk,
            target.sysclk,
            preset.name
        );

        match preset.source {
            OscillatorSource::Hsi => {
                bus.modify_u32(cr, 0, RccCr::HSION.bits())?;
                wait_set(bus, self.policy, "HSI ready", cr, RccCr::HSIRDY.bits())?;
            }
            OscillatorSource::Hse => {
                bus.modify_u32(cr, 0, RccCr::HSEON.bits())?;
                wait_set(bus, self.policy, "HSE ready", cr, RccCr::HSERDY.bits())?;
            }
        }

        if target.sysclk > before.sysclk {
            self.set_wait_states(bus, preset.wait_states())?;
        }

        if preset.pll.is_some() {
            self.stop_pll(bus)?;
        }

        let keep = if preset.pll.is_some() {
            CFGR_SW_MASK
        } else {
            CFGR_SW_MASK | CFGR_PLL_FIELDS
        };
        let value = (bus.read_u32(cfgr)? & keep) | preset.cfgr_bits();
        bus.write_u32(cfgr, value)?;

        if preset.pll.is_some() {
            bus.modify_u32(cr, 0, RccCr::PLLON.bits())?;
            wait_set(bus, self.policy, "PLL lock", cr, RccCr::PLLRDY.bits())?;
        }

        self.switch_to(bus, preset.target_source())?;

        if target.sysclk < before.sysclk {
            self.set_wait_states(bus, preset.wait_states())?;
        }
        tracing::info!("Clock: running at {} Hz", target.sysclk);
        Ok(target)
    }

    /// Clock tree as currently programmed, for a board crystal of `hse_hz`.
    pub fn read_tree(&self, bus: &mut dyn Bus, hse_hz: u32) -> HalResult<ClockTree> {
        let cfgr = bus.read_u32(self.rcc + rcc::CFGR)?;
        let sysclk = match SysclkSource::from_bits(cfgr >> rcc::CFGR_SWS_SHIFT) {
            Some(SysclkSource::Hse) => hse_hz,
            Some(SysclkSource::Pll) => {
                let input = if cfgr & rcc::CFGR_PLLSRC == 0 {
                    HSI_HZ / 2
                } else if cfgr & rcc::CFGR_PLLXTPRE != 0 {
                    hse_hz / 2
                } else {
                    hse_hz
                };
                input.saturating_mul(rcc::pllmul_from_bits(cfgr >> rcc::CFGR_PLLMUL_SHIFT))
            }
            _ => HSI_HZ,
        };
        let hclk = sysclk / rcc::hpre_div(cfgr >> rcc::CFGR_HPRE_SHIFT);
        Ok(ClockTree {
            sysclk,
            hclk,
            pclk1: hclk / rcc::ppre_div(cfgr >> rcc::CFGR_PPRE1_SHIFT),
            pclk2: hclk / rcc::ppre_div(cfgr >> rcc::CFGR_PPRE2_SHIFT),
        })
    }

    fn set_wait_states(&self, bus: &mut dyn Bus, latency: u32) -> HalResult<()> {
        bus.modify_u32(
            self.flash + flash::ACR,
            flash::ACR_LATENCY_MASK,
            latency | flash::ACR_PRFTBE,
        )?;
        Ok(())
    }

    fn active_source(&self, bus: &mut dyn Bus) -> HalResult<Option<SysclkSource>> {
        let cfgr = bus.read_u32(self.rcc + rcc::CFGR)?;
        Ok(SysclkSource::from_bits(cfgr >> rcc::CFGR_SWS_SHIFT))
    }

    fn switch_to(&self, bus: &mut dyn Bus, source: SysclkSource) -> HalResult<()> {
        let cfgr = self.rcc + rcc::CFGR;
        bus.modify_u32(cfgr, CFGR_SW_MASK, source.bits() << rcc::CFGR_SW_SHIFT)?;
        wait_until(bus, self.policy, "system clock switch", |bus| {
            let value = bus.read_u32(cfgr)?;
            Ok(SysclkSource::from_bits(value >> rcc::CFGR_SWS_SHIFT) == Some(source))
        })
    }

    /// The PLL can only be reprogrammed while it is off, which means leaving it first.
    fn stop_pll(&self, bus: &mut dyn Bus) -> HalResult<()> {
        let cr = self.rcc + rcc::CR;
        if bus.read_u32(cr)? & RccCr::PLLON.bits() == 0 {
            return Ok(());
        }
        if self.active_source(bus)? == Some(SysclkSource::Pll) {
            bus.modify_u32(cr, 0, RccCr::HSION.bits())?;
            wait_set(bus, self.policy, "HSI ready", cr, RccCr::HSIRDY.bits())?;
            self.switch_to(bus, SysclkSource::Hsi)?;
        }
        bus.modify_u32(cr, RccCr::PLLON.bits(), 0)?;
        crate::wait::wait_clear(bus, self.policy, "PLL stop", cr, RccCr::PLLRDY.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HalError;
    use regbench_config::BoardManifest;
    use regbench_core::Machine;

    fn bluepill() -> Machine {
        let board = BoardManifest::builtin("bluepill").unwrap();
        Machine::from_board(&board).unwrap()
    }

    fn latency(machine: &mut Machine) -> u32 {
        machine.read_u32(map::FLASH + flash::ACR).unwrap() & flash::ACR_LATENCY_MASK
    }

    #[test]
    fn test_builtin_preset_frequencies() {
        let expected = [
            ("hsi_8mhz", 8_000_000),
            ("hsi_pll_64mhz", 64_000_000),
            ("hse_8mhz_to_24mhz", 24_000_000),
            ("hse_8mhz_to_48mhz", 48_000_000),
            ("hse_8mhz_to_72mhz", 72_000_000),
        ];
        for (name, hz) in expected {
            let preset = ClockPreset::builtin(name).unwrap();
            assert_eq!(preset.sysclk_hz(), hz, "{}", name);
            assert!(preset.tree().pclk1 <= 36_000_000, "{}", name);
        }
        assert!(ClockPreset::builtin("hse_25mhz").is_none());

        let tree = ClockPreset::hse_8mhz_to_72mhz().tree();
        assert_eq!(tree.pclk1, 36_000_000);
        assert_eq!(tree.pclk2, 72_000_000);
        assert_eq!(tree.timer_clock_apb1(), 72_000_000);
    }

    #[test]
    fn test_preset_from_board_manifest() {
        let board = BoardManifest::builtin("bluepill").unwrap();
        let config = board.clock_preset("hse_8mhz_to_72mhz").unwrap();
        let preset = ClockPreset::from_config(config, board.hse_hz.unwrap_or(8_000_000));
        assert_eq!(preset, ClockPreset::hse_8mhz_to_72mhz());
    }

    #[test]
    fn test_apply_72mhz_raises_wait_states_first() {
        let mut machine = bluepill();
        let tree = ClockConfigurator::new()
            .apply(&mut machine, &ClockPreset::hse_8mhz_to_72mhz())
            .unwrap();
        assert_eq!(tree.sysclk, 72_000_000);
        assert_eq!(machine.bus.clocks.sysclk_hz(), 72_000_000);
        assert_eq!(latency(&mut machine), 2);
        assert_eq!(machine.bus.clocks.flash_violations(), 0);
    }

    #[test]
    fn test_slowing_down_lowers_wait_states_after_switch() {
        let mut machine = bluepill();
        let clocks = ClockConfigurator::new();
        clocks
            .apply(&mut machine, &ClockPreset::hse_8mhz_to_72mhz())
            .unwrap();
        let tree = clocks
            .apply(&mut machine, &ClockPreset::hse_8mhz_to_48mhz())
            .unwrap();
        assert_eq!(tree.sysclk, 48_000_000);
        assert_eq!(machine.bus.clocks.sysclk_hz(), 48_000_000);
        assert_eq!(latency(&mut machine), 1);

        clocks.apply(&mut machine, &ClockPreset::hsi_8mhz()).unwrap();
        assert_eq!(machine.bus.clocks.sysclk_hz(), 8_000_000);
        assert_eq!(latency(&mut machine), 0);
        assert_eq!(machine.bus.clocks.flash_violations(), 0);
    }

    #[test]
    fn test_read_tree_tracks_hardware() {
        let mut machine = bluepill();
        let clocks = ClockConfigurator::new();
        assert_eq!(clocks.read_tree(&mut machine, 8_000_000).unwrap(), ClockTree::RESET);
        clocks
            .apply(&mut machine, &ClockPreset::hsi_pll_64mhz())
            .unwrap();
        let tree = clocks.read_tree(&mut machine, 8_000_000).unwrap();
        assert_eq!(tree, ClockPreset::hsi_pll_64mhz().tree());
    }

    #[test]
    fn test_missing_crystal_times_out() {
        let mut board = BoardManifest::builtin("bluepill").unwrap();
        board.crystal_present = false;
        let mut machine = Machine::from_board(&board).unwrap();
        let err = ClockConfigurator::new()
            .with_policy(WaitPolicy::Bounded(2_000))
            .apply(&mut machine, &ClockPreset::hse_8mhz_to_72mhz())
            .unwrap_err();
        assert!(matches!(err, HalError::Timeout { what: "HSE ready" }));
        assert_eq!(machine.bus.clocks.sysclk_hz(), 8_000_000);
    }
}
