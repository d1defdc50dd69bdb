// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimulationObserver;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
pub struct PerformanceMetrics {
    step_count: AtomicU64,
    register_writes: AtomicU64,
    peripheral_cycle_count: AtomicU64,
    peripheral_cycles_by_name: Mutex<HashMap<String, u64>>,
    dispatches: Mutex<BTreeMap<u32, u64>>,
    start_time: Instant,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            step_count: AtomicU64::new(0),
            register_writes: AtomicU64::new(0),
            peripheral_cycle_count: AtomicU64::new(0),
            peripheral_cycles_by_name: Mutex::new(HashMap::new()),
            dispatches: Mutex::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&self) {
        self.step_count.store(0, Ordering::SeqCst);
        self.register_writes.store(0, Ordering::SeqCst);
        self.peripheral_cycle_count.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.peripheral_cycles_by_name.lock() {
            m.clear();
        }
        if let Ok(mut m) = self.dispatches.lock() {
            m.clear();
        }
    }

    pub fn get_steps(&self) -> u64 {
        self.step_count.load(Ordering::SeqCst)
    }

    pub fn get_register_writes(&self) -> u64 {
        self.register_writes.load(Ordering::SeqCst)
    }

    pub fn get_peripheral_cycles_total(&self) -> u64 {
        self.peripheral_cycle_count.load(Ordering::SeqCst)
    }

    pub fn get_peripheral_cycles(&self, name: &str) -> u64 {
        self.peripheral_cycles_by_name
            .lock()
            .ok()
            .and_then(|m| m.get(name).copied())
            .unwrap_or(0)
    }

    /// Handler invocations per vector.
    pub fn get_dispatches(&self) -> BTreeMap<u32, u64> {
        self.dispatches
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Simulated steps per wall-clock second.
    pub fn get_steps_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_steps() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl SimulationObserver for PerformanceMetrics {
    fn on_step_end(&self, _step: u64) {
        self.step_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_peripheral_tick(&self, name: &str, cycles: u32) {
        if cycles == 0 {
            return;
        }
        self.peripheral_cycle_count
            .fetch_add(cycles as u64, Ordering::SeqCst);
        if let Ok(mut m) = self.peripheral_cycles_by_name.lock() {
            *m.entry(name.to_string()).or_insert(0) += cycles as u64;
        }
    }

    fn on_register_write(&self, _name: &str, _offset: u64, _value: u32) {
        self.register_writes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_interrupt(&self, vector: u32) {
        if let Ok(mut m) = self.dispatches.lock() {
            *m.entry(vector).or_insert(0) += 1;
        }
    }
}
