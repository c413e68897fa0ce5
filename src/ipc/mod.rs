//! IPC protocol types for communication with the front-end.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> UI).
//! Commands use `{"command": "<name>", ...}` format (UI -> core).

pub mod bridge;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::input::InputEvent;
use crate::model::PersonaProfile;
use crate::orchestrator::TurnPhase;
use crate::presenter::{LogLabel, Presenter};
use bridge::emit_event;

// ---------------------------------------------------------------------------
// Events: core -> UI (stdout)
// ---------------------------------------------------------------------------

/// All events emitted via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum TalkEvent {
    Starting {},
    Loading {
        step: String,
    },
    /// Insecure origin; the session cannot continue.
    Blocked {
        reason: String,
    },
    PermissionDenied {
        message: String,
    },
    StageError {
        message: String,
    },
    Personas {
        personas: Vec<PersonaProfile>,
        selected: Option<String>,
    },
    PersonaSelected {
        persona: Option<PersonaProfile>,
    },
    AwaitingStart {},
    Ready {
        sid: String,
        persona: PersonaProfile,
    },
    Phase {
        phase: TurnPhase,
        ui: String,
    },
    Info {
        label: LogLabel,
        message: String,
        time: String,
    },
    Verbose {
        message: String,
        time: String,
    },
    Error {
        message: String,
    },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: UI -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum TalkCommand {
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
    TouchStart {},
    TouchEnd {},
    /// An empty id clears the selection.
    SelectPersona {
        #[serde(default)]
        id: String,
    },
    ListPersonas {},
    StartStage {},
    Ping {},
    Stop {},
}

impl TalkCommand {
    /// The push-to-talk input carried by this command, if any.
    pub fn input_event(&self) -> Option<InputEvent> {
        match self {
            Self::KeyDown { key } => Some(InputEvent::Key {
                key: key.clone(),
                pressed: true,
            }),
            Self::KeyUp { key } => Some(InputEvent::Key {
                key: key.clone(),
                pressed: false,
            }),
            Self::TouchStart {} => Some(InputEvent::Touch { pressed: true }),
            Self::TouchEnd {} => Some(InputEvent::Touch { pressed: false }),
            _ => None,
        }
    }
}

/// Presenter that writes the event log to stdout as IPC events.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpcPresenter;

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl Presenter for IpcPresenter {
    fn info(&self, label: LogLabel, message: &str) {
        emit_event(&TalkEvent::Info {
            label,
            message: message.to_string(),
            time: timestamp(),
        });
    }

    fn verbose(&self, message: &str) {
        emit_event(&TalkEvent::Verbose {
            message: message.to_string(),
            time: timestamp(),
        });
    }

    fn phase_changed(&self, phase: TurnPhase) {
        emit_event(&TalkEvent::Phase {
            phase,
            ui: phase.ui_state().to_string(),
        });
    }
}
