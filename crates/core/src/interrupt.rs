// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::Bus;
use std::collections::BTreeMap;
use std::fmt;

/// Core exception numbers.
pub const HARD_FAULT_VECTOR: u32 = 3;
pub const PENDSV_VECTOR: u32 = 14;
pub const SYSTICK_VECTOR: u32 = 15;

/// Exception number of device interrupt `irq`.
pub const fn irq_vector(irq: u32) -> u32 {
    irq + 16
}

/// An interrupt service routine. It gets the machine as a plain [`Bus`].
pub type Handler = Box<dyn FnMut(&mut dyn Bus) + Send>;

/// Exception number -> handler.
///
/// The machine takes a handler out while it runs so the handler can borrow
/// the machine mutably, then puts it back.
#[derive(Default)]
pub struct VectorTable {
    handlers: BTreeMap<u32, Handler>,
}

impl fmt::Debug for VectorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorTable")
            .field("vectors", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler. Returns true when one was replaced.
    pub fn register(&mut self, vector: u32, handler: Handler) -> bool {
        let replaced = self.handlers.insert(vector, handler).is_some();
        if replaced {
            tracing::debug!("Handler for vector {} replaced", vector);
        }
        replaced
    }

    pub fn unregister(&mut self, vector: u32) -> bool {
        self.handlers.remove(&vector).is_some()
    }

    pub fn is_registered(&self, vector: u32) -> bool {
        self.handlers.contains_key(&vector)
    }

    pub fn vectors(&self) -> impl Iterator<Item = u32> + '_ {
        self.handlers.keys().copied()
    }

    pub(crate) fn take(&mut self, vector: u32) -> Option<Handler> {
        self.handlers.remove(&vector)
    }

    /// Put a handler back after it ran, unless it was re-registered meanwhile.
    pub(crate) fn restore(&mut self, vector: u32, handler: Handler) {
        self.handlers.entry(vector).or_insert(handler);
    }
}
