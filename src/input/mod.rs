//! Input binding: keyboard, touch and the optional global hotkey all
//! become `Start` / `Stop` for the orchestrator.

pub mod hotkey;

use std::sync::Arc;

use crate::orchestrator::{PhaseCell, TurnCommand};

/// A raw press or release from any input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Key event forwarded by the front-end, `key` as the browser reports it.
    Key { key: String, pressed: bool },
    Touch { pressed: bool },
    /// System-wide push-to-talk key.
    Hotkey { pressed: bool },
}

/// Maps input events to turn commands. Holds no state of its own; when
/// given the orchestrator's phase cell, presses are dropped while a turn
/// is being processed.
pub struct InputBinding {
    ptt_keys: Vec<String>,
    phase: Option<Arc<PhaseCell>>,
}

impl InputBinding {
    pub fn new(ptt_keys: Vec<String>) -> Self {
        Self {
            ptt_keys,
            phase: None,
        }
    }

    pub fn with_phase(mut self, phase: Arc<PhaseCell>) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn is_ptt_key(&self, key: &str) -> bool {
        self.ptt_keys.iter().any(|k| k == key)
    }

    pub fn translate(&self, event: &InputEvent) -> Option<TurnCommand> {
        let pressed = match event {
            InputEvent::Key { key, pressed } => {
                if !self.is_ptt_key(key) {
                    return None;
                }
                *pressed
            }
            InputEvent::Touch { pressed } | InputEvent::Hotkey { pressed } => *pressed,
        };

        if !pressed {
            return Some(TurnCommand::Stop);
        }
        let busy = self.phase.as_ref().is_some_and(|p| p.current().is_busy());
        (!busy).then_some(TurnCommand::Start)
    }
}
