//! Configuration reading and data directory paths.

pub mod paths;
pub mod persona;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

pub use persona::{FilePersonaStore, PersonaStore};

const DEFAULT_SERVER_URL: &str = "http://localhost:3001/api/ai-talk/";

/// Which path the poll request goes to. Older servers only know `/question/`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollEndpoint {
    #[default]
    Query,
    Question,
}

impl PollEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Query => "query/",
            Self::Question => "question/",
        }
    }
}

/// talk_config.json shape (written by the front-end settings panel).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalkConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub poll_endpoint: Option<PollEndpoint>,
    #[serde(default)]
    pub ptt_keys: Option<Vec<String>>,
    #[serde(default)]
    pub global_hotkey: Option<String>,
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(default)]
    pub stop_grace_ms: Option<u64>,
    #[serde(default)]
    pub min_speech_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub upload_silent_turns: Option<bool>,
    #[serde(default)]
    pub probe_record_ms: Option<u64>,
    #[serde(default)]
    pub probe_settle_ms: Option<u64>,
    #[serde(default)]
    pub max_utterance_secs: Option<u64>,
}

impl TalkConfig {
    pub fn server_url(&self) -> &str {
        self.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }

    pub fn poll_endpoint(&self) -> PollEndpoint {
        self.poll_endpoint.unwrap_or_default()
    }

    /// Keys that act as push-to-talk when the front-end forwards key events.
    pub fn ptt_keys(&self) -> Vec<String> {
        self.ptt_keys
            .clone()
            .unwrap_or_else(|| vec!["r".to_string(), "\\".to_string()])
    }

    pub fn volume(&self) -> f32 {
        self.volume.unwrap_or(1.0).clamp(0.0, 2.0)
    }

    pub fn max_utterance_secs(&self) -> u64 {
        self.max_utterance_secs.unwrap_or(120).max(1)
    }

    pub fn turn_policy(&self) -> TurnPolicy {
        let defaults = TurnPolicy::default();
        TurnPolicy {
            stop_grace: self
                .stop_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_grace),
            min_speech: self
                .min_speech_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_speech),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            upload_silent_turns: self
                .upload_silent_turns
                .unwrap_or(defaults.upload_silent_turns),
        }
    }

    pub fn boot_policy(&self) -> BootPolicy {
        let defaults = BootPolicy::default();
        BootPolicy {
            probe_record: self
                .probe_record_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_record),
            probe_settle: self
                .probe_settle_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_settle),
        }
    }
}

/// Timing policy for one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnPolicy {
    /// Delay between the user's release and the actual device stop.
    pub stop_grace: Duration,
    /// Speech estimates below this are treated as accidental taps.
    pub min_speech: Duration,
    /// Sleep between polls while the server is still processing.
    pub poll_interval: Duration,
    /// Upload short turns flagged as silent instead of skipping them.
    pub upload_silent_turns: bool,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_millis(700),
            min_speech: Duration::from_millis(600),
            poll_interval: Duration::from_millis(300),
            upload_silent_turns: false,
        }
    }
}

/// Timing policy for the microphone permission probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootPolicy {
    pub probe_record: Duration,
    /// Wait after the probe so the device is fully closed before the real flow.
    pub probe_settle: Duration,
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self {
            probe_record: Duration::from_millis(50),
            probe_settle: Duration::from_millis(1300),
        }
    }
}

/// Read talk_config.json from the data directory.
pub fn read_talk_config() -> TalkConfig {
    read_json_file(&get_config_path()).unwrap_or_default()
}

/// Path to talk_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("talk_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
