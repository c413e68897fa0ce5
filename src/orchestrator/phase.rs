//! Atomic turn phase.
//!
//! Written only by the orchestrator, read by anything that renders state.
//! Shared via `Arc` so a presenter can sample it without touching the
//! orchestrator itself.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Phases of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TurnPhase {
    /// Waiting for "press to talk". The microphone may be pre-armed.
    Idle = 0,
    Recording = 1,
    /// Released; the device stop is scheduled but still cancellable.
    StopPending = 2,
    Stopping = 3,
    Uploading = 4,
    Polling = 5,
    Playing = 6,
    Removing = 7,
    /// The turn hit an unrecoverable error; cleanup follows.
    Aborted = 8,
}

impl TurnPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Recording,
            2 => Self::StopPending,
            3 => Self::Stopping,
            4 => Self::Uploading,
            5 => Self::Polling,
            6 => Self::Playing,
            7 => Self::Removing,
            8 => Self::Aborted,
            _ => Self::Idle,
        }
    }

    /// The non-preemptible part of a turn; input is ignored here.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Stopping
                | Self::Uploading
                | Self::Polling
                | Self::Playing
                | Self::Removing
                | Self::Aborted
        )
    }

    /// Coarse state for rendering: idle, talking or processing.
    pub fn ui_state(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording | Self::StopPending => "talking",
            _ => "processing",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::StopPending => "stop_pending",
            Self::Stopping => "stopping",
            Self::Uploading => "uploading",
            Self::Polling => "polling",
            Self::Playing => "playing",
            Self::Removing => "removing",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Thread-safe phase cell, shareable via `Arc`.
#[derive(Debug)]
pub struct PhaseCell {
    phase: AtomicU8,
}

impl PhaseCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> TurnPhase {
        TurnPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Store `next`, returning the previous phase.
    pub(crate) fn set(&self, next: TurnPhase) -> TurnPhase {
        TurnPhase::from_u8(self.phase.swap(next as u8, Ordering::AcqRel))
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self {
            phase: AtomicU8::new(TurnPhase::Idle as u8),
        }
    }
}
