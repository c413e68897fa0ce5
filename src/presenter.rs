//! Presentation collaborator.
//!
//! The core reports two log streams: short labeled `info` lines meant for
//! the user, and `verbose` lines for debugging. Rendering is not our concern.

use std::fmt;

use serde::Serialize;

use crate::orchestrator::phase::TurnPhase;

/// Who an info line is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLabel {
    Sys,
    User,
    Bot,
}

impl fmt::Display for LogLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sys => write!(f, "sys"),
            Self::User => write!(f, "user"),
            Self::Bot => write!(f, "bot"),
        }
    }
}

pub trait Presenter {
    fn info(&self, label: LogLabel, message: &str);

    fn verbose(&self, message: &str);

    /// A user-visible warning. Never swallowed silently.
    fn warn(&self, message: &str) {
        self.info(LogLabel::Sys, message);
    }

    fn phase_changed(&self, _phase: TurnPhase) {}
}
