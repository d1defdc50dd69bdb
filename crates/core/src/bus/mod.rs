// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::devices::i2c_device_from_config;
use crate::interrupt::SYSTICK_VECTOR;
use crate::memory::LinearMemory;
use crate::peripherals::afio::Afio;
use crate::peripherals::exti::Exti;
use crate::peripherals::flash::{FlashArray, FlashBank, FlashInterface};
use crate::peripherals::gpio::GpioPort;
use crate::peripherals::i2c::I2c;
use crate::peripherals::nvic::NvicState;
use crate::peripherals::rcc::ClockDomain;
use crate::peripherals::usart::Usart;
use crate::peripherals::{self, RegisterLayout};
use crate::{DmaRequest, Peripheral, SimResult, SimulationError, TransferWidth};
use anyhow::Context;
use regbench_config::{
    parse_size, BoardManifest, ChipDescriptor, ClockGateConfig, PeripheralConfig,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("peripheral '{a}' overlaps '{b}'")]
    Overlap { a: String, b: String },
    #[error("peripheral '{id}' has unsupported type '{kind}'")]
    UnknownType { id: String, kind: String },
    #[error("I2C device {address:#04x} refers to unknown bus '{bus}'")]
    UnknownI2cBus { bus: String, address: u8 },
    #[error("peripheral '{id}': {reason}")]
    Layout { id: String, reason: String },
}

pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    /// Exception number this block raises: IRQn + 16, or a core exception below 16.
    pub vector: Option<u32>,
    /// Clock-enable bit that must be set before the block responds.
    pub gate: Option<ClockGateConfig>,
    pub dev: Box<dyn Peripheral>,
}

impl PeripheralEntry {
    pub fn new(name: &str, base: u64, size: u64, dev: Box<dyn Peripheral>) -> Self {
        Self {
            name: name.to_string(),
            base,
            size,
            vector: None,
            gate: None,
            dev,
        }
    }

    pub fn with_irq(mut self, irq: u32) -> Self {
        self.vector = Some(irq + 16);
        self
    }

    pub fn with_vector(mut self, vector: u32) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_gate(mut self, gate: ClockGateConfig) -> Self {
        self.gate = Some(gate);
        self
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// Bus name of the flash array window.
pub const FLASH_MEMORY: &str = "flash_memory";

/// `config.triggers` of an ADC entry: EXTSEL code -> id of the peripheral
/// whose trigger output it selects.
fn adc_triggers(p_cfg: &PeripheralConfig) -> Result<Vec<(u32, String)>, BusError> {
    let Some(value) = p_cfg.config.get("triggers") else {
        return Ok(Vec::new());
    };
    let invalid = |reason: &str| BusError::Layout {
        id: p_cfg.id.clone(),
        reason: format!("triggers: {}", reason),
    };
    let map = value
        .as_mapping()
        .ok_or_else(|| invalid("expected a map of EXTSEL code to peripheral id"))?;
    let mut triggers = Vec::with_capacity(map.len());
    for (code, source) in map {
        let code = code
            .as_u64()
            .filter(|c| *c < 7)
            .ok_or_else(|| invalid("EXTSEL code must be 0..=6"))?;
        let source = source
            .as_str()
            .ok_or_else(|| invalid("source must be a peripheral id"))?;
        triggers.push((code as u32, source.to_string()));
    }
    Ok(triggers)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralTickCost {
    pub index: usize,
    pub cycles: u32,
}

/// What a bus tick produced besides NVIC pending bits.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub costs: Vec<PeripheralTickCost>,
    /// Core exceptions (vector < 16) raised this tick.
    pub exceptions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BusAccess {
    pub peripheral: String,
    pub offset: u64,
    pub write: bool,
    pub value: u32,
    /// The block's clock gate was closed; a write was dropped, a read returned 0.
    pub gated_off: bool,
}

/// Memory map: RAM plus memory-mapped peripheral windows.
///
/// Peripheral registers are 32 bits wide and word aligned. Byte and
/// half-word accesses reach the containing register (reads shift, writes
/// read-modify-write through [`Peripheral::peek`]).
pub struct SystemBus {
    pub ram: LinearMemory,
    pub peripherals: Vec<PeripheralEntry>,
    pub nvic: Option<Arc<NvicState>>,
    pub clocks: Arc<ClockDomain>,
    gate_violations: AtomicU64,
    access_log: Option<Vec<BusAccess>>,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    /// An empty bus with 64 KiB of RAM at 0x2000_0000.
    pub fn new() -> Self {
        Self {
            ram: LinearMemory::new(64 * 1024, 0x2000_0000),
            peripherals: Vec::new(),
            nvic: None,
            clocks: Arc::new(ClockDomain::default()),
            gate_violations: AtomicU64::new(0),
            access_log: None,
        }
    }

    pub fn add_peripheral(&mut self, entry: PeripheralEntry) -> Result<(), BusError> {
        let end = entry.base + entry.size;
        if let Some(other) = self
            .peripherals
            .iter()
            .find(|p| entry.base < p.base + p.size && p.base < end)
        {
            return Err(BusError::Overlap {
                a: entry.name.clone(),
                b: other.name.clone(),
            });
        }
        self.peripherals.push(entry);
        Ok(())
    }

    pub fn from_config(chip: &ChipDescriptor, board: &BoardManifest) -> anyhow::Result<Self> {
        let ram_size = parse_size(&chip.ram.size)
            .with_context(|| format!("Invalid RAM size for chip '{}'", chip.name))?;

        let mut bus = Self {
            ram: LinearMemory::new(ram_size as usize, chip.ram.base),
            ..Self::new()
        };
        let clocks = bus.clocks.clone();

        let flash_bank = match &chip.flash {
            Some(cfg) => {
                let size = parse_size(&cfg.size)
                    .with_context(|| format!("Invalid flash size for chip '{}'", chip.name))?;
                let page = parse_size(&cfg.page_size)
                    .with_context(|| format!("Invalid flash page size for chip '{}'", chip.name))?;
                Some((FlashBank::shared(cfg.base, size as usize, page), size))
            }
            None => None,
        };

        for p_cfg in &chip.peripherals {
            let layout: RegisterLayout =
                p_cfg
                    .layout(&chip.layout)
                    .parse()
                    .map_err(|reason| BusError::Layout {
                        id: p_cfg.id.clone(),
                        reason,
                    })?;

            let dev: Box<dyn Peripheral> = match p_cfg.r#type.as_str() {
                "rcc" => {
                    let hse_hz = board.hse_hz.unwrap_or(8_000_000);
                    Box::new(
                        peripherals::rcc::Rcc::new(clocks.clone())
                            .with_hse(hse_hz, board.crystal_present),
                    )
                }
                "flash" => {
                    let iface = FlashInterface::new(clocks.clone());
                    Box::new(match &flash_bank {
                        Some((bank, _)) => iface.with_bank(bank.clone()),
                        None => iface,
                    })
                }
                "afio" => Box::new(Afio::new()),
                "exti" => Box::new(Exti::new()),
                "gpio" => Box::new(GpioPort::new_with_layout(layout)),
                "timer" => Box::new(peripherals::timer::Timer::new()),
                "systick" => Box::new(peripherals::systick::Systick::new()),
                "usart" => Box::new(Usart::new_with_layout(layout)),
                "adc" => Box::new(
                    peripherals::adc::Adc::new().with_triggers(adc_triggers(p_cfg)?),
                ),
                "dac" => Box::new(peripherals::dac::Dac::new()),
                "i2c" => Box::new(I2c::new()),
                "spi" => Box::new(peripherals::spi::Spi::new()),
                "dma" => {
                    let dma = peripherals::dma::Dma1::new();
                    // DMA1 channel 1..7 interrupts are consecutive from the declared irq.
                    Box::new(match p_cfg.irq {
                        Some(irq) => dma.with_first_irq(irq),
                        None => dma,
                    })
                }
                "nvic" => {
                    let state = Arc::new(NvicState::default());
                    bus.nvic = Some(state.clone());
                    Box::new(peripherals::nvic::Nvic::new(state))
                }
                other => {
                    return Err(BusError::UnknownType {
                        id: p_cfg.id.clone(),
                        kind: other.to_string(),
                    }
                    .into())
                }
            };

            let size = match &p_cfg.size {
                Some(size) => parse_size(size)
                    .with_context(|| format!("Invalid window size for '{}'", p_cfg.id))?,
                None => 0x400,
            };

            let mut entry = PeripheralEntry::new(&p_cfg.id, p_cfg.base_address, size, dev);
            match (p_cfg.r#type.as_str(), p_cfg.irq) {
                ("systick", _) => entry = entry.with_vector(SYSTICK_VECTOR),
                // The DMA controller raises its per-channel lines explicitly.
                ("dma", _) | (_, None) => {}
                (_, Some(irq)) => entry = entry.with_irq(irq),
            }
            if let Some(gate) = p_cfg.clock {
                entry = entry.with_gate(gate);
            }
            bus.add_peripheral(entry)?;
        }

        if let (Some((bank, size)), Some(cfg)) = (flash_bank, &chip.flash) {
            bus.add_peripheral(PeripheralEntry::new(
                FLASH_MEMORY,
                cfg.base,
                size,
                Box::new(FlashArray::new(bank)),
            ))?;
        }

        for dev_cfg in &board.i2c_devices {
            let i2c = bus
                .peripheral_mut::<I2c>(&dev_cfg.bus)
                .ok_or_else(|| BusError::UnknownI2cBus {
                    bus: dev_cfg.bus.clone(),
                    address: dev_cfg.address,
                })?;
            i2c.attach(i2c_device_from_config(dev_cfg));
        }

        tracing::info!(
            "Bus for '{}' on '{}': {} peripherals, {} bytes RAM",
            board.name,
            chip.name,
            bus.peripherals.len(),
            ram_size
        );
        Ok(bus)
    }

    /// Attach a TX capture sink to every USART on this bus.
    ///
    /// When `echo_stdout` is false, transmitted bytes are no longer printed to stdout.
    pub fn attach_usart_tx_sink(&mut self, sink: Arc<Mutex<Vec<u8>>>, echo_stdout: bool) {
        for p in &mut self.peripherals {
            let Some(any) = p.dev.as_any_mut() else {
                continue;
            };
            let Some(usart) = any.downcast_mut::<Usart>() else {
                continue;
            };
            usart.set_sink(Some(sink.clone()), echo_stdout);
        }
    }

    /// Start recording every peripheral register access.
    pub fn enable_access_log(&mut self) {
        self.access_log.get_or_insert_with(Vec::new);
    }

    pub fn access_log(&self) -> &[BusAccess] {
        self.access_log.as_deref().unwrap_or(&[])
    }

    /// Writes dropped because the target block's clock was off.
    pub fn gate_violations(&self) -> u64 {
        self.gate_violations.load(Ordering::Relaxed)
    }

    pub fn peripheral<T: 'static>(&self, name: &str) -> Option<&T> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.dev.as_any())
            .and_then(|any| any.downcast_ref::<T>())
    }

    pub fn peripheral_mut<T: 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.peripherals
            .iter_mut()
            .find(|p| p.name == name)
            .and_then(|p| p.dev.as_any_mut())
            .and_then(|any| any.downcast_mut::<T>())
    }

    fn first_of_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.peripherals
            .iter_mut()
            .find_map(|p| p.dev.as_any_mut().and_then(|any| any.downcast_mut::<T>()))
    }

    fn first_of<T: 'static>(&self) -> Option<&T> {
        self.peripherals
            .iter()
            .find_map(|p| p.dev.as_any().and_then(|any| any.downcast_ref::<T>()))
    }

    /// Peripheral name and register offset for a bus address.
    pub fn describe(&self, addr: u64) -> Option<(&str, u64)> {
        self.peripherals
            .iter()
            .find(|p| p.contains(addr))
            .map(|p| (p.name.as_str(), addr - p.base))
    }

    fn clock_on(&self, entry: &PeripheralEntry) -> bool {
        match entry.gate {
            Some(gate) => self.clocks.is_enabled(gate.bus, gate.bit),
            None => true,
        }
    }

    fn find_index(&self, addr: u64) -> Option<usize> {
        self.peripherals.iter().position(|p| p.contains(addr))
    }

    fn log(&mut self, index: usize, offset: u64, write: bool, value: u32, gated_off: bool) {
        if let Some(log) = &mut self.access_log {
            log.push(BusAccess {
                peripheral: self.peripherals[index].name.clone(),
                offset,
                write,
                value,
                gated_off,
            });
        }
    }

    fn check_alignment(addr: u64, width: TransferWidth) -> SimResult<()> {
        if addr % width.bytes() != 0 {
            return Err(SimulationError::MisalignedAccess {
                addr,
                width: width.bytes() as u8,
            });
        }
        Ok(())
    }

    /// Read `width` bytes at `addr`, zero-extended.
    pub fn read_sized(&mut self, addr: u64, width: TransferWidth) -> SimResult<u32> {
        let len = width.bytes();
        if self.ram.contains(addr) {
            let mut value = 0u32;
            for i in 0..len {
                let byte = self
                    .ram
                    .read_u8(addr + i)
                    .ok_or(SimulationError::UnmappedAddress(addr + i))?;
                value |= (byte as u32) << (8 * i);
            }
            return Ok(value);
        }

        let index = self
            .find_index(addr)
            .ok_or(SimulationError::UnmappedAddress(addr))?;
        Self::check_alignment(addr, width)?;

        let offset = addr - self.peripherals[index].base;
        let reg_offset = offset & !3;
        let shift = (offset & 3) * 8;
        let gated_off = !self.clock_on(&self.peripherals[index]);
        let reg = if gated_off {
            0
        } else {
            self.peripherals[index].dev.read(reg_offset)?
        };
        self.log(index, reg_offset, false, reg, gated_off);

        let mask = if len == 4 { u32::MAX } else { (1u32 << (8 * len)) - 1 };
        Ok((reg >> shift) & mask)
    }

    /// Write the low `width` bytes of `value` at `addr`.
    pub fn write_sized(&mut self, addr: u64, width: TransferWidth, value: u32) -> SimResult<()> {
        let len = width.bytes();
        if self.ram.contains(addr) {
            for i in 0..len {
                if !self.ram.write_u8(addr + i, (value >> (8 * i)) as u8) {
                    return Err(SimulationError::UnmappedAddress(addr + i));
                }
            }
            return Ok(());
        }

        let index = self
            .find_index(addr)
            .ok_or(SimulationError::UnmappedAddress(addr))?;
        Self::check_alignment(addr, width)?;

        let offset = addr - self.peripherals[index].base;
        let reg_offset = offset & !3;
        let reg_value = if len == 4 {
            value
        } else {
            let shift = (offset & 3) * 8;
            let mask = ((1u32 << (8 * len)) - 1) << shift;
            let current = self.peripherals[index].dev.peek(reg_offset);
            (current & !mask) | ((value << shift) & mask)
        };

        if !self.clock_on(&self.peripherals[index]) {
            self.gate_violations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Write {:#x} to '{}' +{:#x} dropped: peripheral clock is off",
                reg_value,
                self.peripherals[index].name,
                reg_offset
            );
            self.log(index, reg_offset, true, reg_value, true);
            return Ok(());
        }

        self.log(index, reg_offset, true, reg_value, false);
        self.peripherals[index].dev.write(reg_offset, reg_value)
    }

    pub fn read_u32(&mut self, addr: u64) -> SimResult<u32> {
        self.read_sized(addr, TransferWidth::Word)
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        self.write_sized(addr, TransferWidth::Word, value)
    }

    pub fn read_u16(&mut self, addr: u64) -> SimResult<u16> {
        Ok(self.read_sized(addr, TransferWidth::HalfWord)? as u16)
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> SimResult<()> {
        self.write_sized(addr, TransferWidth::HalfWord, value as u32)
    }

    pub fn read_u8(&mut self, addr: u64) -> SimResult<u8> {
        Ok(self.read_sized(addr, TransferWidth::Byte)? as u8)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()> {
        self.write_sized(addr, TransferWidth::Byte, value as u32)
    }

    /// Raise an interrupt line: device IRQs pend in the NVIC, core exceptions are returned.
    fn raise(&self, vector: u32, exceptions: &mut Vec<u32>) {
        if vector < 16 {
            if !exceptions.contains(&vector) {
                exceptions.push(vector);
            }
        } else if let Some(nvic) = &self.nvic {
            nvic.set_pending(vector - 16);
        }
    }

    /// Advance every clocked peripheral by `cycles`, then run the DMA
    /// elements they issued.
    pub fn tick_peripherals(&mut self, cycles: u32) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        // 1. Sample DMA request lines from the state left by the previous tick.
        let mut lines = Vec::new();
        for p in &self.peripherals {
            if self.clock_on(p) {
                lines.extend(p.dev.dma_request_offsets().into_iter().map(|o| p.base + o));
            }
        }

        // 2. Tick and collect interrupt lines and DMA elements.
        let mut dma_requests: Vec<(usize, DmaRequest)> = Vec::new();
        let mut raised = Vec::new();
        let mut triggers = Vec::new();
        for index in 0..self.peripherals.len() {
            if !self.clock_on(&self.peripherals[index]) {
                continue;
            }
            let p = &mut self.peripherals[index];
            p.dev.on_dma_lines(&lines);
            let res = p.dev.tick(cycles);
            if res.cycles > 0 {
                outcome.costs.push(PeripheralTickCost {
                    index,
                    cycles: res.cycles,
                });
            }
            if res.irq {
                if let Some(vector) = p.vector {
                    raised.push(vector);
                }
            }
            raised.extend(res.explicit_irqs.into_iter().map(|irq| irq + 16));
            dma_requests.extend(res.dma_requests.into_iter().map(|req| (index, req)));
            if res.trigger_out {
                triggers.push(p.name.clone());
            }
        }
        for vector in raised {
            self.raise(vector, &mut outcome.exceptions);
        }

        // Trigger pulses reach their consumers after every block has ticked.
        for source in &triggers {
            for index in 0..self.peripherals.len() {
                if self.clock_on(&self.peripherals[index]) {
                    self.peripherals[index].dev.on_trigger(source);
                }
            }
        }

        // 3. Execute DMA elements: read source, write destination.
        for (index, req) in dma_requests {
            let moved = self
                .read_sized(req.src, req.src_width)
                .and_then(|value| self.write_sized(req.dst, req.dst_width, value));
            if let Err(e) = moved {
                tracing::warn!(
                    "DMA channel {} transfer error ({:#x} -> {:#x}): {}",
                    req.channel + 1,
                    req.src,
                    req.dst,
                    e
                );
                self.peripherals[index].dev.on_dma_error(req.channel);
            }
        }

        outcome
    }

    /// Drive a GPIO input from outside and deliver the edge to EXTI when
    /// AFIO routes that port to the line.
    pub fn drive_pin(&mut self, port: &str, pin: u8, high: bool) -> SimResult<()> {
        let not_gpio = || SimulationError::Peripheral {
            name: port.to_string(),
            reason: "not a GPIO port".to_string(),
        };
        let gpio = self.peripheral_mut::<GpioPort>(port).ok_or_else(not_gpio)?;
        let (before, after) = gpio.drive_input(pin, high);
        if before == after {
            return Ok(());
        }

        // gpioa -> 0, gpiob -> 1, ...
        let port_index = port
            .chars()
            .last()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| (c.to_ascii_lowercase() as u8).saturating_sub(b'a'))
            .unwrap_or(0);
        let routed = self
            .first_of::<Afio>()
            .map(|afio| afio.exti_port(pin) == port_index)
            .unwrap_or(port_index == 0);
        if !routed {
            return Ok(());
        }

        if let Some(exti) = self.first_of_mut::<Exti>() {
            if exti.on_edge(pin, after) {
                let edge = if after { "rising" } else { "falling" };
                tracing::debug!("EXTI line {} pending ({} edge on {})", pin, edge, port);
            }
        }
        Ok(())
    }
}
