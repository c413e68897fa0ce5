//! Wire format of the turn service.
//!
//! Every JSON response is wrapped as `{"code": 0, "data": {...}}`; a
//! non-zero code is a failure even on HTTP 200.

use serde::Deserialize;

use crate::error::{TalkError, TalkResult};
use crate::model::{PersonaProfile, PollOutcome, UploadReceipt};

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload of an operation that must return data.
    pub fn into_data(self, operation: &str) -> TalkResult<T> {
        self.check(operation)?;
        self.data
            .ok_or_else(|| TalkError::ServiceUnavailable(format!("{operation}: empty response")))
    }

    /// Validate an acknowledgement whose payload is irrelevant.
    pub fn check(&self, operation: &str) -> TalkResult<()> {
        if self.code != 0 {
            return Err(TalkError::ServiceUnavailable(format!(
                "{operation}: server code {}",
                self.code
            )));
        }
        Ok(())
    }
}

/// `/start/` payload.
#[derive(Debug, Deserialize)]
pub struct StartData {
    pub sid: String,
    #[serde(default)]
    pub robots: Vec<PersonaProfile>,
}

/// `/upload/` payload.
#[derive(Debug, Deserialize)]
pub struct UploadData {
    pub rid: String,
    #[serde(default)]
    pub asr: String,
}

impl From<UploadData> for UploadReceipt {
    fn from(d: UploadData) -> Self {
        Self {
            request_id: d.rid,
            transcript_text: d.asr,
        }
    }
}

/// `/query/` payload.
#[derive(Debug, Default, Deserialize)]
pub struct QueryData {
    #[serde(default)]
    pub asid: Option<String>,
    #[serde(default)]
    pub tts: Option<String>,
    #[serde(default)]
    pub processing: bool,
}

impl QueryData {
    /// `processing` wins over a present `asid`: the server reports its
    /// placeholder segment that way while the first real one is synthesized.
    pub fn into_outcome(self) -> PollOutcome {
        if self.processing {
            return PollOutcome::Processing;
        }
        match self.asid.filter(|id| !id.is_empty()) {
            Some(segment_id) => PollOutcome::Ready {
                segment_id,
                transcript_text: self.tts.unwrap_or_default(),
            },
            None => PollOutcome::Complete,
        }
    }
}
