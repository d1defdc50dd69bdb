// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{anyhow, Context, Result};
use regbench_config::{
    BoardIoBinding, BoardManifest, ChipDescriptor, PeripheralBus, PeripheralConfig,
};
use regbench_core::bus::SystemBus;
use regbench_core::peripherals::RegisterLayout;
use regbench_core::Machine;
use regbench_hal::clock::{ClockConfigurator, ClockPreset, ClockTree};
use regbench_hal::gate::{self, ClockGate};
use regbench_hal::gpio::{AnyGpio, Pins};
use regbench_hal::usart::AnyUsart;
use regbench_hal::WaitPolicy;
use std::path::Path;

const DEFAULT_HSE_HZ: u32 = 8_000_000;

/// A board, its chip and the machine built from them.
pub struct Target {
    pub board: BoardManifest,
    pub chip: ChipDescriptor,
    pub machine: Machine,
    pub policy: WaitPolicy,
    tree: ClockTree,
}

impl Target {
    /// Load a board (builtin name, `builtin:<name>` or YAML path) and optionally
    /// override its chip descriptor.
    pub fn load(board_ref: &str, chip_path: Option<&Path>, cycles_per_step: u32) -> Result<Self> {
        let board = if Path::new(board_ref).exists() {
            BoardManifest::from_file(board_ref)?
        } else {
            BoardManifest::builtin(board_ref).or_else(|_| BoardManifest::resolve(board_ref))?
        };
        let chip = match chip_path {
            Some(path) => ChipDescriptor::from_file(path)?,
            None => board.load_chip()?,
        };
        let bus = SystemBus::from_config(&chip, &board)
            .with_context(|| format!("Failed to build chip '{}'", chip.name))?;
        let machine = Machine::new(bus).with_cycles_per_step(cycles_per_step);
        tracing::info!(
            "Target: board '{}', chip '{}', {} cycles per step",
            board.name,
            chip.name,
            cycles_per_step
        );
        Ok(Self {
            board,
            chip,
            machine,
            policy: WaitPolicy::default(),
            tree: ClockTree::RESET,
        })
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Steps a demo may run before giving up.
    pub fn step_budget(&self) -> u64 {
        match self.policy {
            WaitPolicy::Bounded(limit) => limit,
            WaitPolicy::Forever => u64::MAX,
        }
    }

    pub fn peripheral(&self, id: &str) -> Result<&PeripheralConfig> {
        self.chip
            .peripheral(id)
            .ok_or_else(|| anyhow!("chip '{}' has no peripheral '{}'", self.chip.name, id))
    }

    /// First peripheral of a model type, e.g. the AFIO/SYSCFG routing block.
    pub fn peripheral_of_type(&self, kind: &str) -> Result<&PeripheralConfig> {
        self.chip
            .peripherals
            .iter()
            .find(|p| p.r#type == kind)
            .ok_or_else(|| anyhow!("chip '{}' has no '{}' block", self.chip.name, kind))
    }

    pub fn base(&self, id: &str) -> Result<u64> {
        Ok(self.peripheral(id)?.base_address)
    }

    pub fn irq(&self, id: &str) -> Result<u32> {
        self.peripheral(id)?
            .irq
            .ok_or_else(|| anyhow!("peripheral '{}' declares no interrupt", id))
    }

    pub fn layout(&self, id: &str) -> Result<RegisterLayout> {
        let p = self.peripheral(id)?;
        p.layout(&self.chip.layout)
            .parse()
            .map_err(|e: String| anyhow!("peripheral '{}': {}", id, e))
    }

    /// Open the clock gate of `id`, if it has one.
    pub fn enable_clock(&mut self, id: &str) -> Result<()> {
        if let Some(clock) = self.peripheral(id)?.clock {
            gate::enable(&mut self.machine, ClockGate::from(clock))?;
        }
        Ok(())
    }

    /// Program the board's first clock preset, or stay on the 8 MHz HSI.
    pub fn configure_clocks(&mut self) -> Result<ClockTree> {
        let hse_hz = self.board.hse_hz.unwrap_or(DEFAULT_HSE_HZ);
        let preset = self
            .board
            .clock_presets
            .first()
            .map(|cfg| ClockPreset::from_config(cfg, hse_hz))
            .unwrap_or_else(ClockPreset::hsi_8mhz);
        let tree = ClockConfigurator::new()
            .with_policy(self.policy)
            .apply(&mut self.machine, &preset)
            .with_context(|| format!("Failed to apply clock preset '{}'", preset.name))?;
        self.tree = tree;
        Ok(tree)
    }

    pub fn clock_tree(&self) -> ClockTree {
        self.tree
    }

    /// Bus clock feeding `id`.
    pub fn pclk(&self, id: &str) -> Result<u32> {
        Ok(match self.peripheral(id)?.clock.map(|c| c.bus) {
            Some(PeripheralBus::Apb1) => self.tree.pclk1,
            Some(PeripheralBus::Apb2) => self.tree.pclk2,
            Some(PeripheralBus::Ahb) | None => self.tree.hclk,
        })
    }

    pub fn gpio(&mut self, id: &str) -> Result<AnyGpio> {
        self.enable_clock(id)?;
        Ok(AnyGpio::new(self.base(id)?, self.layout(id)?))
    }

    pub fn usart(&mut self, id: &str) -> Result<AnyUsart> {
        self.enable_clock(id)?;
        Ok(AnyUsart::new(self.base(id)?, self.layout(id)?))
    }

    pub fn io(&self, id: &str) -> Result<BoardIoBinding> {
        self.board
            .io(id)
            .cloned()
            .ok_or_else(|| anyhow!("board '{}' has no '{}'", self.board.name, id))
    }

    /// The pin behind a board IO binding, with its port clock on.
    pub fn io_pin(&mut self, id: &str) -> Result<(Pins<AnyGpio>, BoardIoBinding)> {
        let binding = self.io(id)?;
        let port = self.gpio(&binding.peripheral)?;
        Ok((Pins::pin(port, binding.pin)?, binding))
    }

    /// Bytes transmitted by every USART, keyed by peripheral id.
    pub fn serial_output(&self) -> Vec<(String, Vec<u8>)> {
        self.chip
            .peripherals
            .iter()
            .filter(|p| p.r#type == "usart")
            .map(|p| (p.id.clone(), self.machine.usart_tx(&p.id)))
            .filter(|(_, tx)| !tx.is_empty())
            .collect()
    }
}

/// Port index (A = 0) of a GPIO peripheral id such as `gpioc`.
pub fn port_index(id: &str) -> u8 {
    id.chars()
        .last()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| (c.to_ascii_lowercase() as u8).saturating_sub(b'a'))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_board_by_bare_name() {
        let target = Target::load("bluepill", None, 1).unwrap();
        assert_eq!(target.chip.name, "stm32f103");
        assert_eq!(target.base("usart1").unwrap(), 0x4001_3800);
        assert_eq!(target.irq("usart1").unwrap(), 37);
        assert!(target.peripheral("adc9").is_err());
    }

    #[test]
    fn test_layout_follows_chip() {
        let target = Target::load("builtin:f3discovery", None, 1).unwrap();
        assert_eq!(target.layout("gpioe").unwrap(), RegisterLayout::Stm32V2);
        assert_eq!(target.peripheral_of_type("afio").unwrap().id, "syscfg");
    }

    #[test]
    fn test_port_index() {
        assert_eq!(port_index("gpioa"), 0);
        assert_eq!(port_index("gpioc"), 2);
        assert_eq!(port_index("gpioe"), 4);
    }

    #[test]
    fn test_clock_tree_from_board_preset() {
        let mut target = Target::load("bluepill", None, 1000).unwrap();
        let tree = target.configure_clocks().unwrap();
        assert_eq!(tree.sysclk, 72_000_000);
        assert_eq!(target.pclk("usart2").unwrap(), 36_000_000);
        assert_eq!(target.pclk("usart1").unwrap(), 72_000_000);
    }
}
