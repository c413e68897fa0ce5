//! Session bootstrap: security check, microphone probe, stage creation,
//! persona selection and the welcome clip.
//!
//! Phases only move forward. Failures park the machine in a terminal phase
//! (`Blocked`, `PermissionDenied`, `StageUnavailable`); nothing is retried
//! automatically, the user restarts the client instead.

use std::fmt;
use std::net::IpAddr;

use reqwest::Url;
use serde::Serialize;
use tracing::{info, warn};

use crate::audio::{Microphone, Player};
use crate::capabilities::Capabilities;
use crate::config::{BootPolicy, PersonaStore};
use crate::error::{TalkError, TalkResult};
use crate::model::{PersonaProfile, StageSession};
use crate::presenter::{LogLabel, Presenter};
use crate::service::TurnService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootPhase {
    Booting,
    CheckingSecurity,
    /// Terminal: the origin is not a secure context.
    Blocked,
    ProbingMicrophone,
    /// Terminal: the device refused or delivered nothing.
    PermissionDenied,
    StageLoading,
    /// Terminal: stage creation failed.
    StageUnavailable,
    PersonaSelection,
    AwaitingStart,
    PlayingWelcome,
    Ready,
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Booting => "booting",
            Self::CheckingSecurity => "checking_security",
            Self::Blocked => "blocked",
            Self::ProbingMicrophone => "probing_microphone",
            Self::PermissionDenied => "permission_denied",
            Self::StageLoading => "stage_loading",
            Self::StageUnavailable => "stage_unavailable",
            Self::PersonaSelection => "persona_selection",
            Self::AwaitingStart => "awaiting_start",
            Self::PlayingWelcome => "playing_welcome",
            Self::Ready => "ready",
        };
        write!(f, "{s}")
    }
}

/// Loopback hosts and https count as a secure context.
pub fn is_secure_origin(url: &Url) -> bool {
    if url.scheme() == "https" {
        return true;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// What the orchestrator needs once bootstrap reaches `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySession {
    pub stage: StageSession,
    pub persona: PersonaProfile,
}

pub struct SessionBootstrap<'a, M, S, P, R, K> {
    caps: &'a Capabilities<M, S, P, R>,
    store: K,
    policy: BootPolicy,
    phase: BootPhase,
    stage: Option<StageSession>,
    personas: Vec<PersonaProfile>,
    preview: Option<PersonaProfile>,
}

impl<'a, M, S, P, R, K> SessionBootstrap<'a, M, S, P, R, K>
where
    M: Microphone,
    S: TurnService,
    P: Player,
    R: Presenter,
    K: PersonaStore,
{
    pub fn new(caps: &'a Capabilities<M, S, P, R>, store: K, policy: BootPolicy) -> Self {
        Self {
            caps,
            store,
            policy,
            phase: BootPhase::Booting,
            stage: None,
            personas: Vec::new(),
            preview: None,
        }
    }

    pub fn phase(&self) -> BootPhase {
        self.phase
    }

    pub fn stage(&self) -> Option<&StageSession> {
        self.stage.as_ref()
    }

    pub fn personas(&self) -> &[PersonaProfile] {
        &self.personas
    }

    /// The persona currently previewed, if any.
    pub fn preview(&self) -> Option<&PersonaProfile> {
        self.preview.as_ref()
    }

    fn require(&self, operation: &'static str, allowed: &[BootPhase]) -> TalkResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(TalkError::InvalidPhase {
                operation,
                phase: self.phase.to_string(),
            })
        }
    }

    /// Security check, microphone probe and stage creation in one go.
    /// Stops at the first failure, leaving the phase terminal. `on_step`
    /// is told about each step before it runs.
    pub async fn prepare(
        &mut self,
        origin: &Url,
        mut on_step: impl FnMut(BootPhase),
    ) -> TalkResult<()> {
        on_step(BootPhase::CheckingSecurity);
        self.check_security(origin)?;
        on_step(BootPhase::ProbingMicrophone);
        self.probe_microphone().await?;
        on_step(BootPhase::StageLoading);
        self.load_stage().await
    }

    pub fn check_security(&mut self, origin: &Url) -> TalkResult<()> {
        self.require("check_security", &[BootPhase::Booting])?;
        self.phase = BootPhase::CheckingSecurity;

        if !is_secure_origin(origin) {
            self.phase = BootPhase::Blocked;
            let err = TalkError::SecurityContext {
                origin: origin.origin().ascii_serialization(),
            };
            warn!(%origin, "Insecure origin, session blocked");
            self.caps.presenter.warn(&err.to_string());
            return Err(err);
        }
        self.caps.presenter.verbose(&format!("Origin ok: {origin}"));
        Ok(())
    }

    /// Record a throwaway clip to force the permission prompt now rather
    /// than on the first press. Any data at all means access was granted.
    pub async fn probe_microphone(&mut self) -> TalkResult<()> {
        self.require("probe_microphone", &[BootPhase::CheckingSecurity])?;
        self.phase = BootPhase::ProbingMicrophone;
        self.caps.presenter.verbose("Probing microphone");

        let caps = self.caps;
        let microphone = &caps.microphone;
        let record_for = self.policy.probe_record;
        let probe = async move {
            let stream = microphone.open().await?;
            let recorder = microphone.record(stream)?;
            tokio::time::sleep(record_for).await;
            microphone.stop(recorder).await
        };

        let utterance = match probe.await {
            Ok(utterance) if utterance.has_data() => utterance,
            Ok(_) => {
                let err = TalkError::Device("microphone delivered no data".into());
                return Err(self.deny(err));
            }
            Err(e) => return Err(self.deny(e)),
        };
        info!(chunks = utterance.chunks, "Microphone permission granted");
        self.caps.presenter.verbose("Microphone permission granted");

        // Let the device close fully before the real flow reopens it.
        tokio::time::sleep(self.policy.probe_settle).await;
        Ok(())
    }

    fn deny(&mut self, err: TalkError) -> TalkError {
        self.phase = BootPhase::PermissionDenied;
        warn!(error = %err, "Microphone probe failed");
        self.caps
            .presenter
            .warn(&format!("Microphone permission denied: {err}"));
        err
    }

    /// Create the stage and restore the remembered persona if the
    /// catalogue still offers it.
    pub async fn load_stage(&mut self) -> TalkResult<()> {
        self.require("load_stage", &[BootPhase::ProbingMicrophone])?;
        self.phase = BootPhase::StageLoading;

        let catalogue = match self.caps.service.create_stage().await {
            Ok(catalogue) => catalogue,
            Err(e) => {
                self.phase = BootPhase::StageUnavailable;
                warn!(error = %e, "Stage creation failed");
                self.caps.presenter.warn(&format!("Failed to create stage: {e}"));
                return Err(e);
            }
        };
        self.caps.presenter.verbose(&format!(
            "Stage {} created, {} personas",
            catalogue.stage.stage_id,
            catalogue.personas.len()
        ));

        self.preview = self.store.load().and_then(|saved| {
            catalogue
                .personas
                .iter()
                .find(|p| p.id == saved.id)
                .cloned()
        });
        if let Some(persona) = &self.preview {
            info!(persona = %persona.id, "Restored persona");
            self.caps
                .presenter
                .info(LogLabel::Sys, &format!("Use persona {}", persona.display_name));
        }

        self.stage = Some(catalogue.stage);
        self.personas = catalogue.personas;
        self.phase = if self.preview.is_some() {
            BootPhase::AwaitingStart
        } else {
            BootPhase::PersonaSelection
        };
        Ok(())
    }

    /// Preview a persona and remember it. An empty id clears the preview
    /// without touching the store.
    pub fn select_persona(&mut self, id: &str) -> TalkResult<Option<&PersonaProfile>> {
        self.require(
            "select_persona",
            &[BootPhase::PersonaSelection, BootPhase::AwaitingStart],
        )?;

        if id.is_empty() {
            self.preview = None;
            self.phase = BootPhase::PersonaSelection;
            return Ok(None);
        }

        let persona = self
            .personas
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| TalkError::UnknownPersona(id.to_string()))?;

        if let Err(e) = self.store.save(&persona) {
            warn!(error = %e, "Failed to persist persona");
            self.caps.presenter.verbose(&format!("Persona not saved: {e}"));
        }
        info!(persona = %persona.id, "Persona selected");
        self.caps
            .presenter
            .info(LogLabel::Sys, &format!("Change persona to {}", persona.display_name));

        self.preview = Some(persona);
        self.phase = BootPhase::AwaitingStart;
        Ok(self.preview.as_ref())
    }

    /// Play the welcome clip and hand back the ready session once it has
    /// ended. A failed clip is reported but does not block the session.
    pub async fn start_stage(&mut self) -> TalkResult<ReadySession> {
        self.require("start_stage", &[BootPhase::AwaitingStart])?;
        let (Some(stage), Some(persona)) = (self.stage.clone(), self.preview.clone()) else {
            return Err(TalkError::InvalidPhase {
                operation: "start_stage",
                phase: self.phase.to_string(),
            });
        };

        self.phase = BootPhase::PlayingWelcome;
        let url = self
            .caps
            .service
            .welcome_audio_url(&stage.stage_id, &persona);
        self.caps.presenter.verbose(&format!("Welcome audio: {url}"));
        if let Err(e) = self.caps.player.play_until_ended(&url).await {
            warn!(error = %e, "Welcome audio failed");
            self.caps.presenter.warn(&format!("Welcome audio failed: {e}"));
        }

        self.phase = BootPhase::Ready;
        info!(stage_id = %stage.stage_id, persona = %persona.id, "Session ready");
        self.caps
            .presenter
            .info(LogLabel::Sys, "Conversation started, AI is ready");
        Ok(ReadySession { stage, persona })
    }
}
