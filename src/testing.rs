//! Scripted fakes for the capability traits, sharing one call journal so
//! tests can assert on cross-capability ordering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::{Microphone, Player, Utterance};
use crate::capabilities::Capabilities;
use crate::config::PersonaStore;
use crate::error::{TalkError, TalkResult};
use crate::model::{
    PersonaProfile, PollOutcome, SpeechHint, StageCatalogue, StageSession, UploadReceipt,
};
use crate::orchestrator::TurnPhase;
use crate::presenter::{LogLabel, Presenter};
use crate::service::TurnService;
use crate::session::ReadySession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Record,
    Stop,
    CreateStage,
    Mark,
    Upload {
        persona: String,
        speech_ms: u64,
        may_have_spoken: bool,
    },
    Poll,
    PlayStart(String),
    PlayEnd(String),
    Delete(String),
}

impl Call {
    fn is_microphone(&self) -> bool {
        matches!(self, Self::Open | Self::Record | Self::Stop)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Calls made to the service and player, without microphone traffic.
    pub fn turn_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| !c.is_microphone()).collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| pred(c)).count()
    }
}

pub fn persona(id: &str) -> PersonaProfile {
    PersonaProfile {
        id: id.to_string(),
        display_name: format!("Persona {id}"),
        welcome_audio_ref: format!("hello-{id}.aac"),
    }
}

pub fn ready_session() -> ReadySession {
    ReadySession {
        stage: StageSession::new("stage-1"),
        persona: persona("p1"),
    }
}

/// URL the fake service hands out for a segment.
pub fn segment_url(segment_id: &str) -> String {
    format!("tts://stage-1/{segment_id}")
}

pub fn ready(segment_id: &str, text: &str) -> PollOutcome {
    PollOutcome::Ready {
        segment_id: segment_id.to_string(),
        transcript_text: text.to_string(),
    }
}

// ── Microphone ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FakeMicrophone {
    journal: Journal,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
    silent: Arc<AtomicBool>,
    stop_delay: Arc<Mutex<Duration>>,
}

pub struct FakeStream;

pub struct FakeRecorder;

impl FakeMicrophone {
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Deliver no audio data at all on stop.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Time the device takes to flush and release on `stop`.
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = delay;
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

impl Microphone for FakeMicrophone {
    type Stream = FakeStream;
    type Recorder = FakeRecorder;

    async fn open(&self) -> TalkResult<FakeStream> {
        self.journal.push(Call::Open);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TalkError::Device("permission denied".into()));
        }
        Ok(FakeStream)
    }

    fn record(&self, _stream: FakeStream) -> TalkResult<FakeRecorder> {
        self.journal.push(Call::Record);
        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);
        Ok(FakeRecorder)
    }

    async fn stop(&self, _recorder: FakeRecorder) -> TalkResult<Utterance> {
        self.journal.push(Call::Stop);
        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        if self.silent.load(Ordering::SeqCst) {
            return Ok(Utterance::default());
        }
        Ok(Utterance {
            audio: vec![0; 64],
            chunks: 4,
            samples: 1600,
        })
    }
}

// ── Service ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FakeService {
    journal: Journal,
    personas: Arc<Mutex<Vec<PersonaProfile>>>,
    polls: Arc<Mutex<VecDeque<PollOutcome>>>,
    uploads: Arc<AtomicUsize>,
    fail_stage: Arc<AtomicBool>,
    failing_uploads: Arc<AtomicUsize>,
    failing_polls: Arc<AtomicUsize>,
    fail_deletes: Arc<AtomicBool>,
    fail_marks: Arc<AtomicBool>,
}

impl FakeService {
    fn new(journal: Journal) -> Self {
        Self {
            journal,
            personas: Arc::new(Mutex::new(vec![persona("p1"), persona("p2")])),
            polls: Arc::default(),
            uploads: Arc::default(),
            fail_stage: Arc::default(),
            failing_uploads: Arc::default(),
            failing_polls: Arc::default(),
            fail_deletes: Arc::default(),
            fail_marks: Arc::default(),
        }
    }

    /// Queue poll responses. Once the script runs dry every poll is `Complete`.
    pub fn script_polls(&self, outcomes: impl IntoIterator<Item = PollOutcome>) {
        self.polls.lock().unwrap().extend(outcomes);
    }

    pub fn set_fail_stage(&self, fail: bool) {
        self.fail_stage.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.failing_uploads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_polls(&self, n: usize) {
        self.failing_polls.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl TurnService for FakeService {
    async fn create_stage(&self) -> TalkResult<StageCatalogue> {
        self.journal.push(Call::CreateStage);
        if self.fail_stage.load(Ordering::SeqCst) {
            return Err(TalkError::ServiceUnavailable("connection refused".into()));
        }
        Ok(StageCatalogue {
            stage: StageSession::new("stage-1"),
            personas: self.personas.lock().unwrap().clone(),
        })
    }

    async fn upload_utterance(
        &self,
        _stage_id: &str,
        persona_id: &str,
        _audio: Vec<u8>,
        hint: SpeechHint,
    ) -> TalkResult<UploadReceipt> {
        self.journal.push(Call::Upload {
            persona: persona_id.to_string(),
            speech_ms: hint.estimated_ms,
            may_have_spoken: hint.may_have_spoken,
        });
        if Self::take_failure(&self.failing_uploads) {
            return Err(TalkError::ServiceUnavailable("connection reset".into()));
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadReceipt {
            request_id: format!("rid-{n}"),
            transcript_text: "hello".into(),
        })
    }

    async fn poll_next_segment(
        &self,
        _stage_id: &str,
        _request_id: &str,
    ) -> TalkResult<PollOutcome> {
        self.journal.push(Call::Poll);
        if Self::take_failure(&self.failing_polls) {
            return Err(TalkError::ServiceUnavailable("gateway timeout".into()));
        }
        Ok(self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollOutcome::Complete))
    }

    fn segment_playback_url(&self, _stage_id: &str, _request_id: &str, segment_id: &str) -> String {
        segment_url(segment_id)
    }

    async fn delete_segment(
        &self,
        _stage_id: &str,
        _request_id: &str,
        segment_id: &str,
    ) -> TalkResult<()> {
        self.journal.push(Call::Delete(segment_id.to_string()));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(TalkError::ServiceUnavailable("remove failed".into()));
        }
        Ok(())
    }

    async fn mark_conversation(
        &self,
        _stage_id: &str,
        _persona_id: &str,
        _hint: SpeechHint,
    ) -> TalkResult<()> {
        self.journal.push(Call::Mark);
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(TalkError::ServiceUnavailable("marker rejected".into()));
        }
        Ok(())
    }

    fn welcome_audio_url(&self, _stage_id: &str, persona: &PersonaProfile) -> String {
        format!("welcome://{}", persona.welcome_audio_ref)
    }
}

// ── Player ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FakePlayer {
    journal: Journal,
    clip: Arc<Mutex<Duration>>,
    fail: Arc<AtomicBool>,
}

impl FakePlayer {
    /// Every clip "plays" for this long on the tokio clock.
    pub fn set_clip(&self, clip: Duration) {
        *self.clip.lock().unwrap() = clip;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Player for FakePlayer {
    async fn play_until_ended(&self, url: &str) -> TalkResult<()> {
        self.journal.push(Call::PlayStart(url.to_string()));
        let clip = *self.clip.lock().unwrap();
        tokio::time::sleep(clip).await;
        self.journal.push(Call::PlayEnd(url.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(TalkError::Playback("stalled".into()));
        }
        Ok(())
    }
}

// ── Presenter ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    lines: Arc<Mutex<Vec<(LogLabel, String)>>>,
    phases: Arc<Mutex<Vec<TurnPhase>>>,
}

impl RecordingPresenter {
    pub fn lines(&self) -> Vec<(LogLabel, String)> {
        self.lines.lock().unwrap().clone()
    }

    /// Sys-labeled lines containing `needle`.
    pub fn sys_lines_with(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|(label, msg)| *label == LogLabel::Sys && msg.contains(needle))
            .count()
    }

    pub fn phases(&self) -> Vec<TurnPhase> {
        self.phases.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn info(&self, label: LogLabel, message: &str) {
        self.lines.lock().unwrap().push((label, message.to_string()));
    }

    fn verbose(&self, _message: &str) {}

    fn phase_changed(&self, phase: TurnPhase) {
        self.phases.lock().unwrap().push(phase);
    }
}

// ── Persona store ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryPersonaStore {
    value: Arc<Mutex<Option<PersonaProfile>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryPersonaStore {
    pub fn with_saved(persona: PersonaProfile) -> Self {
        let store = Self::default();
        *store.value.lock().unwrap() = Some(persona);
        store
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl PersonaStore for MemoryPersonaStore {
    fn load(&self) -> Option<PersonaProfile> {
        self.value.lock().unwrap().clone()
    }

    fn save(&self, persona: &PersonaProfile) -> TalkResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.value.lock().unwrap() = Some(persona.clone());
        Ok(())
    }
}

// ── Rig ─────────────────────────────────────────────────────────────

pub type FakeCapabilities = Capabilities<FakeMicrophone, FakeService, FakePlayer, RecordingPresenter>;

/// One set of fakes sharing a journal. Handles are clones, so tests keep
/// the rig after moving its capabilities into the code under test.
pub struct Rig {
    pub journal: Journal,
    pub microphone: FakeMicrophone,
    pub service: FakeService,
    pub player: FakePlayer,
    pub presenter: RecordingPresenter,
}

impl Rig {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            microphone: FakeMicrophone {
                journal: journal.clone(),
                ..Default::default()
            },
            service: FakeService::new(journal.clone()),
            player: FakePlayer {
                journal: journal.clone(),
                clip: Arc::new(Mutex::new(Duration::from_millis(200))),
                fail: Arc::default(),
            },
            presenter: RecordingPresenter::default(),
            journal,
        }
    }

    pub fn capabilities(&self) -> FakeCapabilities {
        Capabilities {
            microphone: self.microphone.clone(),
            service: self.service.clone(),
            player: self.player.clone(),
            presenter: self.presenter.clone(),
        }
    }
}
