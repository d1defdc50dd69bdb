// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Bundled chip descriptors, addressable as `builtin:<name>`.
pub const STM32F103_YAML: &str = include_str!("../chips/stm32f103.yaml");
pub const STM32F303_YAML: &str = include_str!("../chips/stm32f303.yaml");

/// Bundled board manifests.
pub const BLUEPILL_YAML: &str = include_str!("../boards/bluepill.yaml");
pub const F3DISCOVERY_YAML: &str = include_str!("../boards/f3discovery.yaml");

const BUILTIN_PREFIX: &str = "builtin:";

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_layout() -> String {
    "stm32f1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_div() -> u32 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "unknown builtin descriptor '{0}'; available: stm32f103, stm32f303, bluepill, f3discovery"
    )]
    UnknownBuiltin(String),
    #[error("unsupported schema_version '{0}'; supported: '1.0'")]
    SchemaVersion(String),
    #[error("clock preset '{name}': {reason}")]
    ClockPreset { name: String, reason: String },
    #[error("peripheral '{id}': {reason}")]
    Peripheral { id: String, reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "20KB"
}

fn default_page_size() -> String {
    "0x400".to_string()
}

/// Main flash array: erased in pages, programmed in half-words.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FlashMemoryConfig {
    pub base: u64,
    pub size: String,
    #[serde(default = "default_page_size")]
    pub page_size: String,
}

/// Bus a peripheral clock-enable bit lives on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PeripheralBus {
    Ahb,
    Apb1,
    Apb2,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ClockGateConfig {
    pub bus: PeripheralBus,
    pub bit: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: String, // "usart", "timer", "gpio", etc.
    pub base_address: u64,
    #[serde(default)]
    pub size: Option<String>,
    /// Device interrupt number (IRQn); the vector is `irq + 16`.
    #[serde(default)]
    pub irq: Option<u32>,
    #[serde(default)]
    pub clock: Option<ClockGateConfig>,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

impl PeripheralConfig {
    /// Register layout for this peripheral: `config.layout` overrides the chip default.
    pub fn layout<'a>(&'a self, chip_default: &'a str) -> &'a str {
        self.config
            .get("layout")
            .and_then(|v| v.as_str())
            .unwrap_or(chip_default)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default = "default_layout")]
    pub layout: String,
    pub ram: MemoryRange,
    #[serde(default)]
    pub flash: Option<FlashMemoryConfig>,
    pub peripherals: Vec<PeripheralConfig>,
}

impl ChipDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chip descriptor at {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let chip: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Chip Descriptor YAML")?;
        chip.validate()?;
        tracing::debug!(
            "Chip '{}': {} peripherals, {} layout",
            chip.name,
            chip.peripherals.len(),
            chip.layout
        );
        Ok(chip)
    }

    pub fn builtin(name: &str) -> Result<Self> {
        match name {
            "stm32f103" => Self::from_yaml(STM32F103_YAML),
            "stm32f303" => Self::from_yaml(STM32F303_YAML),
            other => Err(ConfigError::UnknownBuiltin(other.to_string()).into()),
        }
    }

    /// Resolve `builtin:<name>` references or load a YAML file.
    pub fn resolve(reference: &str) -> Result<Self> {
        match reference.strip_prefix(BUILTIN_PREFIX) {
            Some(name) => Self::builtin(name),
            None => Self::from_file(reference),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            return Err(ConfigError::SchemaVersion(self.schema_version.clone()).into());
        }
        if let Some(flash) = &self.flash {
            let size = parse_size(&flash.size)?;
            let page = parse_size(&flash.page_size)?;
            if page == 0 || page % 2 != 0 || size % page != 0 {
                anyhow::bail!(
                    "flash of {} bytes cannot be split into {}-byte pages",
                    size,
                    page
                );
            }
        }
        for p in &self.peripherals {
            if let Some(gate) = &p.clock {
                if gate.bit > 31 {
                    return Err(ConfigError::Peripheral {
                        id: p.id.clone(),
                        reason: format!("clock gate bit {} is out of range", gate.bit),
                    }
                    .into());
                }
            }
            if p.irq.is_some_and(|irq| irq >= 240) {
                return Err(ConfigError::Peripheral {
                    id: p.id.clone(),
                    reason: "irq must be below 240".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn peripheral(&self, id: &str) -> Option<&PeripheralConfig> {
        self.peripherals.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OscillatorSource {
    Hsi,
    Hse,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    /// PLL multiplier, 2..=16.
    pub multiplier: u32,
    /// HSE pre-divider ahead of the PLL (1 or 2). Ignored for HSI, which always enters as HSI/2.
    #[serde(default = "default_div")]
    pub hse_prediv: u32,
}

/// Named clock tree preset declared in a board manifest.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClockPresetConfig {
    pub name: String,
    pub source: OscillatorSource,
    #[serde(default)]
    pub pll: Option<PllConfig>,
    #[serde(default = "default_div")]
    pub ahb_div: u32,
    #[serde(default = "default_div")]
    pub apb1_div: u32,
    #[serde(default = "default_div")]
    pub apb2_div: u32,
    #[serde(default)]
    pub flash_latency: u32,
}

impl ClockPresetConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| -> Result<()> {
            Err(ConfigError::ClockPreset {
                name: self.name.clone(),
                reason,
            }
            .into())
        };

        if let Some(pll) = &self.pll {
            if !(2..=16).contains(&pll.multiplier) {
                return fail(format!("pll multiplier {} outside 2..=16", pll.multiplier));
            }
            if pll.hse_prediv != 1 && pll.hse_prediv != 2 {
                return fail(format!("hse_prediv {} must be 1 or 2", pll.hse_prediv));
            }
        }
        if ![1, 2, 4, 8, 16, 64, 128, 256, 512].contains(&self.ahb_div) {
            return fail(format!("ahb_div {} is not a valid prescaler", self.ahb_div));
        }
        for (name, div) in [("apb1_div", self.apb1_div), ("apb2_div", self.apb2_div)] {
            if ![1, 2, 4, 8, 16].contains(&div) {
                return fail(format!("{} {} is not a valid prescaler", name, div));
            }
        }
        if self.flash_latency > 2 {
            return fail(format!("flash_latency {} exceeds 2", self.flash_latency));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum I2cDeviceKind {
    Eeprom24,
    Tmp102,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct I2cDeviceConfig {
    /// Peripheral id of the I2C controller the device hangs off.
    pub bus: String,
    /// 7-bit address.
    pub address: u8,
    pub kind: I2cDeviceKind,
    /// EEPROM capacity in bytes.
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoardIoKind {
    Led,
    Button,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoardIoSignal {
    #[default]
    Output,
    Input,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardIoBinding {
    pub id: String,
    pub kind: BoardIoKind,
    pub peripheral: String,
    pub pin: u8,
    #[serde(default)]
    pub signal: BoardIoSignal,
    #[serde(default = "default_true")]
    pub active_high: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub chip: String, // "builtin:<name>" or a chip descriptor path
    /// External crystal frequency.
    #[serde(default)]
    pub hse_hz: Option<u32>,
    /// When false the HSE oscillator never reports ready.
    #[serde(default = "default_true")]
    pub crystal_present: bool,
    #[serde(default)]
    pub clock_presets: Vec<ClockPresetConfig>,
    #[serde(default)]
    pub i2c_devices: Vec<I2cDeviceConfig>,
    #[serde(default)]
    pub board_io: Vec<BoardIoBinding>,
}

impl BoardManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path)
            .with_context(|| format!("Failed to open board manifest at {:?}", path))?;
        let board: Self =
            serde_yaml::from_reader(f).context("Failed to parse Board Manifest")?;
        board.validate()?;
        Ok(board)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let board: Self = serde_yaml::from_str(yaml).context("Failed to parse Board Manifest")?;
        board.validate()?;
        Ok(board)
    }

    pub fn builtin(name: &str) -> Result<Self> {
        match name {
            "bluepill" => Self::from_yaml(BLUEPILL_YAML),
            "f3discovery" => Self::from_yaml(F3DISCOVERY_YAML),
            other => Err(ConfigError::UnknownBuiltin(other.to_string()).into()),
        }
    }

    pub fn resolve(reference: &str) -> Result<Self> {
        match reference.strip_prefix(BUILTIN_PREFIX) {
            Some(name) => Self::builtin(name),
            None => Self::from_file(reference),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            return Err(ConfigError::SchemaVersion(self.schema_version.clone()).into());
        }
        for preset in &self.clock_presets {
            preset.validate()?;
        }
        for dev in &self.i2c_devices {
            if dev.address > 0x7F {
                anyhow::bail!(
                    "I2C device on '{}' uses address {:#x}, which is not a 7-bit address",
                    dev.bus,
                    dev.address
                );
            }
        }
        for io in &self.board_io {
            if io.pin > 15 {
                anyhow::bail!("Board IO '{}' uses pin {}, ports have 16 pins", io.id, io.pin);
            }
        }
        Ok(())
    }

    /// Load the chip descriptor this board refers to.
    pub fn load_chip(&self) -> Result<ChipDescriptor> {
        tracing::debug!("Board '{}' uses chip '{}'", self.name, self.chip);
        ChipDescriptor::resolve(&self.chip).with_context(|| {
            format!("Failed to load chip '{}' for board '{}'", self.chip, self.name)
        })
    }

    pub fn io(&self, id: &str) -> Option<&BoardIoBinding> {
        self.board_io.iter().find(|io| io.id == id)
    }

    pub fn clock_preset(&self, name: &str) -> Option<&ClockPresetConfig> {
        self.clock_presets.iter().find(|p| p.name == name)
    }
}

/// Parse a size such as "20KB", "0x10" or "1024".
pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};

    let trimmed = size_str.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid size format '{}': {}", size_str, e));
    }
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(n);
    }

    let s: Size = trimmed
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
