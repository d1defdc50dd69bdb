// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Push-button debouncing.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonState {
    Idle,
    /// An edge was seen and not yet acted on.
    Active,
    /// Acted on; further edges are ignored until the contacts settle.
    Debouncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Edge {
    #[default]
    Rising,
    Falling,
}

/// Edge-triggered debouncer polled with the raw pin level.
///
/// `Idle -> Active` on the selected edge, `Active -> Debouncing` on
/// [`Debouncer::acknowledge`], `Debouncing -> Idle` after `settle_polls`
/// further polls.
#[derive(Debug, Clone)]
pub struct Debouncer {
    edge: Edge,
    settle_polls: u32,
    state: ButtonState,
    last_level: bool,
    remaining: u32,
}

impl Debouncer {
    pub fn new(settle_polls: u32) -> Self {
        Self {
            edge: Edge::default(),
            settle_polls,
            state: ButtonState::Idle,
            last_level: false,
            remaining: 0,
        }
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = edge;
        // An active-low button rests high.
        self.last_level = edge == Edge::Falling;
        self
    }

    /// Feed the current pin level. Returns the state after this poll.
    pub fn poll(&mut self, level: bool) -> ButtonState {
        let edge = match self.edge {
            Edge::Rising => level && !self.last_level,
            Edge::Falling => !level && self.last_level,
        };
        self.last_level = level;

        match self.state {
            ButtonState::Idle if edge => {
                tracing::debug!("Button edge detected");
                self.state = ButtonState::Active;
            }
            ButtonState::Debouncing => {
                self.remaining = self.remaining.saturating_sub(1);
                if self.remaining == 0 {
                    self.state = ButtonState::Idle;
                }
            }
            _ => {}
        }
        self.state
    }

    /// Mark the press as handled. Only meaningful while `Active`.
    pub fn acknowledge(&mut self) {
        if self.state == ButtonState::Active {
            self.state = if self.settle_polls == 0 {
                ButtonState::Idle
            } else {
                ButtonState::Debouncing
            };
            self.remaining = self.settle_polls;
        }
    }

    pub fn state(&self) -> ButtonState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ButtonState::Active
    }
}

/// Shift-register debouncer for tight polling loops.
///
/// A press is reported on the first high sample. A release is reported only
/// after 32 consecutive low samples; any high sample in between restarts that
/// count without reporting a second press.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftDebouncer {
    history: u32,
}

impl ShiftDebouncer {
    /// Shift in one sample. Returns `Some(pressed)` when the debounced level flips.
    pub fn sample(&mut self, level: bool) -> Option<bool> {
        let old = self.history;
        self.history = (old << 1) | level as u32;
        match (old, self.history) {
            (0, new) if new != 0 => Some(true),
            (old, 0) if old != 0 => Some(false),
            _ => None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.history != 0
    }
}
