//! reqwest implementation of the turn service.

use reqwest::{multipart, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::protocol::{Envelope, QueryData, StartData, UploadData};
use super::TurnService;
use crate::config::PollEndpoint;
use crate::error::{TalkError, TalkResult};
use crate::model::{
    PersonaProfile, PollOutcome, SpeechHint, StageCatalogue, StageSession, UploadReceipt,
};

/// HTTP client for the `/api/ai-talk/` surface.
pub struct HttpTurnService {
    client: reqwest::Client,
    base: Url,
    poll_endpoint: PollEndpoint,
}

impl HttpTurnService {
    pub fn new(client: reqwest::Client, base_url: &str, poll_endpoint: PollEndpoint) -> TalkResult<Self> {
        Ok(Self {
            client,
            base: parse_base_url(base_url)?,
            poll_endpoint,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base.join(path).unwrap_or_else(|_| self.base.clone());
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
    ) -> TalkResult<Envelope<T>> {
        debug!(operation, %url, "POST");
        let resp = self.client.post(url).send().await?.error_for_status()?;
        Ok(resp.json::<Envelope<T>>().await?)
    }
}

/// Parse the configured base URL, making sure relative joins stay under it.
pub fn parse_base_url(base_url: &str) -> TalkResult<Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized)
        .map_err(|e| TalkError::ServiceUnavailable(format!("invalid server url {base_url}: {e}")))
}

impl TurnService for HttpTurnService {
    async fn create_stage(&self) -> TalkResult<StageCatalogue> {
        let data: StartData = self
            .post_json("start", self.endpoint("start/", &[]))
            .await?
            .into_data("start")?;
        info!(stage_id = %data.sid, personas = data.robots.len(), "Stage created");
        Ok(StageCatalogue {
            stage: StageSession::new(data.sid),
            personas: data.robots,
        })
    }

    async fn upload_utterance(
        &self,
        stage_id: &str,
        persona_id: &str,
        audio: Vec<u8>,
        hint: SpeechHint,
    ) -> TalkResult<UploadReceipt> {
        let umi = hint.estimated_ms.to_string();
        let url = self.endpoint(
            "upload/",
            &[("sid", stage_id), ("robot", persona_id), ("umi", &umi)],
        );
        let bytes = audio.len();
        let part = multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new().part("file", part);

        debug!(%url, bytes, may_have_spoken = hint.may_have_spoken, "Uploading utterance");
        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let data: UploadData = resp.json::<Envelope<UploadData>>().await?.into_data("upload")?;
        Ok(data.into())
    }

    async fn poll_next_segment(
        &self,
        stage_id: &str,
        request_id: &str,
    ) -> TalkResult<PollOutcome> {
        let url = self.endpoint(
            self.poll_endpoint.path(),
            &[("sid", stage_id), ("rid", request_id)],
        );
        let data: QueryData = self.post_json("query", url).await?.into_data("query")?;
        Ok(data.into_outcome())
    }

    fn segment_playback_url(&self, stage_id: &str, request_id: &str, segment_id: &str) -> String {
        self.endpoint(
            "tts/",
            &[("sid", stage_id), ("rid", request_id), ("asid", segment_id)],
        )
        .to_string()
    }

    async fn delete_segment(
        &self,
        stage_id: &str,
        request_id: &str,
        segment_id: &str,
    ) -> TalkResult<()> {
        let url = self.endpoint(
            "remove/",
            &[("sid", stage_id), ("rid", request_id), ("asid", segment_id)],
        );
        self.post_json::<serde_json::Value>("remove", url)
            .await?
            .check("remove")
    }

    async fn mark_conversation(
        &self,
        stage_id: &str,
        persona_id: &str,
        hint: SpeechHint,
    ) -> TalkResult<()> {
        let umi = hint.estimated_ms.to_string();
        let url = self.endpoint(
            "conversation/",
            &[("sid", stage_id), ("robot", persona_id), ("umi", &umi)],
        );
        self.post_json::<serde_json::Value>("conversation", url)
            .await?
            .check("conversation")
    }

    fn welcome_audio_url(&self, stage_id: &str, persona: &PersonaProfile) -> String {
        let mut url = self.endpoint("examples/", &[]);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&persona.welcome_audio_ref);
        }
        url.query_pairs_mut().append_pair("sid", stage_id);
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    fn service(base: &str) -> HttpTurnService {
        HttpTurnService::new(reqwest::Client::new(), base, PollEndpoint::Query).unwrap()
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let svc = service("http://localhost:3001/api/ai-talk");
        assert_eq!(svc.base_url().as_str(), "http://localhost:3001/api/ai-talk/");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpTurnService::new(reqwest::Client::new(), "not a url", PollEndpoint::Query).is_err());
    }

    #[test]
    fn segment_url_carries_all_ids() {
        let svc = service("http://localhost:3001/api/ai-talk/");
        assert_eq!(
            svc.segment_playback_url("s1", "r1", "a1"),
            "http://localhost:3001/api/ai-talk/tts/?sid=s1&rid=r1&asid=a1"
        );
    }

    #[test]
    fn query_values_are_encoded() {
        let svc = service("https://talk.example.com/api/ai-talk/");
        let url = svc.segment_playback_url("s 1", "r&1", "a1");
        assert!(url.contains("sid=s+1"));
        assert!(url.contains("rid=r%261"));
    }

    #[test]
    fn welcome_url_points_at_examples() {
        let svc = service("http://127.0.0.1:3001/api/ai-talk/");
        let persona = PersonaProfile {
            id: "u1".into(),
            display_name: "Tutor".into(),
            welcome_audio_ref: "hello-english.aac".into(),
        };
        assert_eq!(
            svc.welcome_audio_url("s1", &persona),
            "http://127.0.0.1:3001/api/ai-talk/examples/hello-english.aac?sid=s1"
        );
    }

    #[test]
    fn legacy_poll_endpoint_path() {
        let svc = HttpTurnService::new(
            reqwest::Client::new(),
            "http://localhost/api/ai-talk/",
            PollEndpoint::Question,
        )
        .unwrap();
        let url = svc.endpoint(svc.poll_endpoint.path(), &[("sid", "s"), ("rid", "r")]);
        assert_eq!(url.as_str(), "http://localhost/api/ai-talk/question/?sid=s&rid=r");
    }

    // ── Loopback exchanges ──────────────────────────────────────────

    /// Answer exactly one request with `status` and a JSON `body`. The task
    /// yields the raw request as received.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (HttpTurnService, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api/ai-talk/", listener.local_addr().unwrap());
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let svc = HttpTurnService::new(client, &base, PollEndpoint::Query).unwrap();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the request head");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < head_end + length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&buf).into_owned()
        });
        (svc, task)
    }

    fn hint(ms: u64) -> SpeechHint {
        SpeechHint {
            estimated_ms: ms,
            may_have_spoken: true,
        }
    }

    #[tokio::test]
    async fn upload_posts_wav_part_with_ids() {
        let (svc, server) =
            serve_once("200 OK", r#"{"code":0,"data":{"rid":"r9","asr":"hello"}}"#).await;

        let receipt = svc
            .upload_utterance("s1", "p1", b"RIFFdata".to_vec(), hint(900))
            .await
            .unwrap();
        assert_eq!(receipt.request_id, "r9");
        assert_eq!(receipt.transcript_text, "hello");

        let request = server.await.unwrap();
        assert!(
            request.starts_with("POST /api/ai-talk/upload/?sid=s1&robot=p1&umi=900 HTTP/1.1\r\n"),
            "{request}"
        );
        assert!(request.contains(r#"name="file"; filename="audio.wav""#));
        assert!(request.contains("RIFFdata"));
    }

    #[tokio::test]
    async fn upload_with_server_code_is_service_error() {
        let (svc, server) = serve_once("200 OK", r#"{"code":100}"#).await;

        let err = svc
            .upload_utterance("s1", "p1", b"RIFF".to_vec(), hint(900))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, TalkError::ServiceUnavailable(msg) if msg == "upload: server code 100"),
            "{err}"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn poll_http_failure_is_service_error() {
        let (svc, server) = serve_once("500 Internal Server Error", "{}").await;

        let err = svc.poll_next_segment("s1", "r1").await.unwrap_err();
        assert!(matches!(err, TalkError::ServiceUnavailable(_)), "{err}");

        let request = server.await.unwrap();
        assert!(
            request.starts_with("POST /api/ai-talk/query/?sid=s1&rid=r1 HTTP/1.1\r\n"),
            "{request}"
        );
    }

    #[tokio::test]
    async fn poll_returns_ready_segment() {
        let (svc, server) = serve_once(
            "200 OK",
            r#"{"code":0,"data":{"asid":"a1","tts":"hi","processing":false}}"#,
        )
        .await;

        let outcome = svc.poll_next_segment("s1", "r1").await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Ready {
                segment_id: "a1".into(),
                transcript_text: "hi".into()
            }
        );
        server.await.unwrap();
    }
}
