// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod devices;
pub mod interrupt;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod snapshot;

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use interrupt::{VectorTable, SYSTICK_VECTOR};

mod tests;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Unmapped access at {0:#x}")]
    UnmappedAddress(u64),
    #[error("Misaligned {width}-byte access at {addr:#x}")]
    MisalignedAccess { addr: u64, width: u8 },
    #[error("Peripheral '{name}': {reason}")]
    Peripheral { name: String, reason: String },
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Element size of a DMA transfer or a narrow bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferWidth {
    #[default]
    Byte,
    HalfWord,
    Word,
}

impl TransferWidth {
    pub fn bytes(self) -> u64 {
        match self {
            TransferWidth::Byte => 1,
            TransferWidth::HalfWord => 2,
            TransferWidth::Word => 4,
        }
    }

    /// Decode a 2-bit PSIZE/MSIZE field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => TransferWidth::Byte,
            1 => TransferWidth::HalfWord,
            _ => TransferWidth::Word,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            TransferWidth::Byte => 0,
            TransferWidth::HalfWord => 1,
            TransferWidth::Word => 2,
        }
    }
}

/// One element moved by a DMA controller: read `src`, write `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRequest {
    pub src: u64,
    pub dst: u64,
    pub src_width: TransferWidth,
    pub dst_width: TransferWidth,
    pub channel: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PeripheralTickResult {
    pub irq: bool,
    pub cycles: u32,
    pub dma_requests: Vec<DmaRequest>,
    /// Device interrupt numbers raised in addition to the entry's own line.
    pub explicit_irqs: Vec<u32>,
    /// The trigger output (timer TRGO) pulsed during this tick.
    pub trigger_out: bool,
}

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_step_end(&self, _step: u64) {}
    fn on_peripheral_tick(&self, _name: &str, _cycles: u32) {}
    fn on_register_write(&self, _name: &str, _offset: u64, _value: u32) {}
    fn on_interrupt(&self, _vector: u32) {}
}

/// Trait representing a memory-mapped peripheral with 32-bit registers.
pub trait Peripheral: std::fmt::Debug + Send {
    /// Register read. Takes `&mut self` because reads may clear status flags.
    fn read(&mut self, offset: u64) -> SimResult<u32>;
    fn write(&mut self, offset: u64, value: u32) -> SimResult<()>;

    /// Side-effect free read used by logs and snapshots.
    fn peek(&self, _offset: u64) -> u32 {
        0
    }

    /// Advance the peripheral by `cycles` clock cycles.
    fn tick(&mut self, _cycles: u32) -> PeripheralTickResult {
        PeripheralTickResult::default()
    }

    /// Register offsets whose DMA request line is currently asserted.
    fn dma_request_offsets(&self) -> Vec<u64> {
        Vec::new()
    }

    /// Bus addresses whose DMA request line is asserted this tick.
    fn on_dma_lines(&mut self, _active: &[u64]) {}

    /// Called when a DMA element issued by this peripheral failed on the bus.
    fn on_dma_error(&mut self, _channel: usize) {}

    /// Peripheral `source` pulsed its trigger output this tick.
    fn on_trigger(&mut self, _source: &str) {}

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Register-level view of the system as seen by driver code.
pub trait Bus {
    fn read_u32(&mut self, addr: u64) -> SimResult<u32>;
    fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()>;
    fn read_u8(&mut self, addr: u64) -> SimResult<u8>;
    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()>;

    /// Let simulated time pass. Busy-wait loops call this between polls.
    fn advance(&mut self) -> SimResult<()>;

    fn read_u16(&mut self, addr: u64) -> SimResult<u16> {
        let b0 = self.read_u8(addr)? as u16;
        let b1 = self.read_u8(addr + 1)? as u16;
        // Little Endian
        Ok(b0 | (b1 << 8))
    }

    fn write_u16(&mut self, addr: u64, value: u16) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, ((value >> 8) & 0xFF) as u8)?;
        Ok(())
    }

    /// Read-modify-write: clear `clear`, then set `set`.
    fn modify_u32(&mut self, addr: u64, clear: u32, set: u32) -> SimResult<()> {
        let value = self.read_u32(addr)?;
        self.write_u32(addr, (value & !clear) | set)
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatchStats {
    /// Handler invocations per vector.
    pub dispatched: std::collections::BTreeMap<u32, u64>,
    /// Vectors that fired with no registered handler.
    pub unhandled: BTreeSet<u32>,
    /// Times a handler let simulated time pass (blocking inside an ISR).
    pub blocking_in_handler: u64,
}

/// A simulated microcontroller: system bus, interrupt dispatch and observers.
///
/// `Machine` implements [`Bus`], so driver code runs against it directly. Each
/// [`Machine::step`] advances every clocked peripheral by `cycles_per_step`
/// cycles, latches interrupt lines into the NVIC and then runs the registered
/// handlers of enabled, pending vectors in ascending order.
pub struct Machine {
    pub bus: bus::SystemBus,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
    vectors: VectorTable,
    pending_exceptions: BTreeSet<u32>,
    active_vector: Option<u32>,
    cycles_per_step: u32,
    steps: u64,
    stats: DispatchStats,
}

impl Machine {
    pub fn new(bus: bus::SystemBus) -> Self {
        Self {
            bus,
            observers: Vec::new(),
            vectors: VectorTable::new(),
            pending_exceptions: BTreeSet::new(),
            active_vector: None,
            cycles_per_step: 1,
            steps: 0,
            stats: DispatchStats::default(),
        }
    }

    /// Build a machine for a board manifest and the chip it references.
    pub fn from_board(board: &regbench_config::BoardManifest) -> anyhow::Result<Self> {
        let chip = board.load_chip()?;
        let bus = bus::SystemBus::from_config(&chip, board)?;
        Ok(Self::new(bus))
    }

    pub fn with_cycles_per_step(mut self, cycles: u32) -> Self {
        self.cycles_per_step = cycles.max(1);
        self
    }

    pub fn cycles_per_step(&self) -> u32 {
        self.cycles_per_step
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn total_cycles(&self) -> u64 {
        self.steps * self.cycles_per_step as u64
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SimulationObserver>) {
        observer.on_simulation_start();
        self.observers.push(observer);
    }

    /// Install `handler` for `vector`. Returns true when a previous handler was replaced.
    pub fn register_handler<F>(&mut self, vector: u32, handler: F) -> bool
    where
        F: FnMut(&mut dyn Bus) + Send + 'static,
    {
        self.vectors.register(vector, Box::new(handler))
    }

    pub fn unregister_handler(&mut self, vector: u32) -> bool {
        self.vectors.unregister(vector)
    }

    /// Software-pend a vector, as NVIC_ISPR or ICSR.PENDSTSET would.
    pub fn pend(&mut self, vector: u32) {
        if vector < 16 {
            self.pending_exceptions.insert(vector);
        } else if let Some(nvic) = &self.bus.nvic {
            nvic.set_pending(vector - 16);
        }
    }

    pub fn is_in_handler(&self) -> bool {
        self.active_vector.is_some()
    }

    /// Advance one step and dispatch any pending interrupts.
    pub fn step(&mut self) -> SimResult<()> {
        self.tick_only()?;
        if self.active_vector.is_none() {
            self.dispatch_pending();
        }
        Ok(())
    }

    pub fn run(&mut self, steps: u64) -> SimResult<()> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    /// Step until `done` returns true or `max_steps` elapse. Returns whether `done` fired.
    pub fn run_until<F>(&mut self, max_steps: u64, mut done: F) -> SimResult<bool>
    where
        F: FnMut(&mut Machine) -> bool,
    {
        for _ in 0..max_steps {
            if done(self) {
                return Ok(true);
            }
            self.step()?;
        }
        Ok(done(self))
    }

    fn tick_only(&mut self) -> SimResult<()> {
        self.steps += 1;
        let outcome = self.bus.tick_peripherals(self.cycles_per_step);

        for cost in &outcome.costs {
            if let Some(p) = self.bus.peripherals.get(cost.index) {
                for observer in &self.observers {
                    observer.on_peripheral_tick(&p.name, cost.cycles);
                }
            }
        }
        for exception in outcome.exceptions {
            tracing::trace!("Exception {} pend", exception);
            self.pending_exceptions.insert(exception);
        }
        for observer in &self.observers {
            observer.on_step_end(self.steps);
        }
        Ok(())
    }

    fn active_vectors(&self) -> Vec<u32> {
        let mut vectors: Vec<u32> = self.pending_exceptions.iter().copied().collect();
        if let Some(nvic) = &self.bus.nvic {
            vectors.extend(nvic.active_irqs().into_iter().map(|irq| irq + 16));
        }
        vectors
    }

    fn dispatch_pending(&mut self) {
        for vector in self.active_vectors() {
            // Clear pending before entry so a level source that is still asserted re-pends.
            if vector < 16 {
                self.pending_exceptions.remove(&vector);
            } else if let Some(nvic) = &self.bus.nvic {
                nvic.clear_pending(vector - 16);
            }

            let Some(mut handler) = self.vectors.take(vector) else {
                if self.stats.unhandled.insert(vector) {
                    tracing::warn!("Vector {} fired with no registered handler", vector);
                }
                continue;
            };

            for observer in &self.observers {
                observer.on_interrupt(vector);
            }
            *self.stats.dispatched.entry(vector).or_insert(0) += 1;

            self.active_vector = Some(vector);
            let bus: &mut dyn Bus = &mut *self;
            handler(bus);
            self.active_vector = None;
            self.vectors.restore(vector, handler);
        }
    }

    /// Number of times the handler for `vector` has run.
    pub fn dispatch_count(&self, vector: u32) -> u64 {
        self.stats.dispatched.get(&vector).copied().unwrap_or(0)
    }

    pub fn systick_count(&self) -> u64 {
        self.dispatch_count(SYSTICK_VECTOR)
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            steps: self.steps,
            cycles: self.total_cycles(),
            stats: self.stats.clone(),
            peripherals: self
                .bus
                .peripherals
                .iter()
                .map(|p| (p.name.clone(), p.dev.snapshot()))
                .collect(),
        }
    }

    pub fn peek_peripheral(&self, name: &str) -> Option<serde_json::Value> {
        self.bus
            .peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.dev.snapshot())
    }

    /// Drive an input pin from outside the chip and feed the edge to EXTI.
    pub fn drive_pin(&mut self, port: &str, pin: u8, high: bool) -> SimResult<()> {
        self.bus.drive_pin(port, pin, high)
    }

    /// Queue bytes on the receive wire of a USART.
    pub fn inject_usart_rx(&mut self, name: &str, bytes: &[u8]) -> SimResult<()> {
        let usart = self
            .bus
            .peripheral_mut::<peripherals::usart::Usart>(name)
            .ok_or_else(|| SimulationError::Peripheral {
                name: name.to_string(),
                reason: "not a USART".to_string(),
            })?;
        usart.inject_rx(bytes);
        Ok(())
    }

    /// Bytes transmitted so far by a USART.
    pub fn usart_tx(&self, name: &str) -> Vec<u8> {
        self.bus
            .peripheral::<peripherals::usart::Usart>(name)
            .map(|u| u.transmitted())
            .unwrap_or_default()
    }
}

impl Machine {
    /// Report a register write to observers. RAM writes are not reported.
    fn notify_write(&self, addr: u64, value: u32) {
        if self.observers.is_empty() {
            return;
        }
        if let Some((name, offset)) = self.bus.describe(addr) {
            for observer in &self.observers {
                observer.on_register_write(name, offset, value);
            }
        }
    }
}

impl Bus for Machine {
    fn read_u32(&mut self, addr: u64) -> SimResult<u32> {
        self.bus.read_u32(addr)
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        self.bus.write_u32(addr, value)?;
        self.notify_write(addr, value);
        Ok(())
    }

    fn read_u8(&mut self, addr: u64) -> SimResult<u8> {
        self.bus.read_u8(addr)
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()> {
        self.bus.write_u8(addr, value)?;
        self.notify_write(addr, value as u32);
        Ok(())
    }

    fn read_u16(&mut self, addr: u64) -> SimResult<u16> {
        self.bus.read_u16(addr)
    }

    fn write_u16(&mut self, addr: u64, value: u16) -> SimResult<()> {
        self.bus.write_u16(addr, value)?;
        self.notify_write(addr, value as u32);
        Ok(())
    }

    fn advance(&mut self) -> SimResult<()> {
        if let Some(vector) = self.active_vector {
            self.stats.blocking_in_handler += 1;
            if self.stats.blocking_in_handler == 1 {
                tracing::warn!(
                    "Handler for vector {} is busy-waiting; nested dispatch is held off",
                    vector
                );
            }
            return self.tick_only();
        }
        self.step()
    }
}
