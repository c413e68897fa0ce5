//! Segment playback via rodio.
//!
//! Each clip is downloaded, decoded and played on a blocking thread that
//! owns its own output stream; the returned future resolves when the sink
//! has drained, which is the "ended" signal the orchestrator waits for.

use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait};
use futures_util::StreamExt;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, info, warn};

use super::decode::{decode_to_mono, extension_hint, DecodedAudio};
use super::Player;
use crate::error::{TalkError, TalkResult};

/// Upper bound for a single downloaded clip.
const MAX_CLIP_BYTES: usize = 16 * 1024 * 1024;

/// Extra time past the decoded duration before playback counts as stalled.
const STALL_SLACK: Duration = Duration::from_secs(5);

/// rodio-backed `Player`.
pub struct RodioPlayer {
    client: reqwest::Client,
    output_device: Option<String>,
    volume: f32,
}

impl RodioPlayer {
    pub fn new(client: reqwest::Client, output_device: Option<String>, volume: f32) -> Self {
        Self {
            client,
            output_device,
            volume,
        }
    }

    async fn download(&self, url: &str) -> TalkResult<(Vec<u8>, Option<String>)> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TalkError::Playback(format!("audio request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(TalkError::Playback(format!(
                "audio request returned {}",
                resp.status()
            )));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TalkError::Playback(format!("audio download: {}", e)))?;
            if body.len() + chunk.len() > MAX_CLIP_BYTES {
                return Err(TalkError::Playback(format!(
                    "audio clip exceeds {} bytes",
                    MAX_CLIP_BYTES
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, content_type))
    }
}

impl Player for RodioPlayer {
    async fn play_until_ended(&self, url: &str) -> TalkResult<()> {
        let (bytes, content_type) = self.download(url).await?;
        let ext = extension_hint(content_type.as_deref(), url);
        debug!(url, bytes = bytes.len(), ?ext, "Audio downloaded");

        let volume = self.volume;
        let output_device = self.output_device.clone();

        tokio::task::spawn_blocking(move || {
            let audio = decode_to_mono(bytes, ext)?;
            info!(
                samples = audio.samples.len(),
                sample_rate = audio.sample_rate,
                duration_secs = format!("{:.2}", audio.duration_secs()),
                "Playing clip"
            );
            play_samples_rodio(audio, volume, output_device.as_deref())
        })
        .await
        .map_err(|e| TalkError::Playback(format!("playback task failed: {}", e)))?
    }
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> TalkResult<(OutputStream, OutputStreamHandle)> {
    if let Some(name) = output_device_name {
        let device = cpal::default_host()
            .output_devices()
            .map_err(|e| TalkError::Playback(format!("Failed to enumerate output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        if let Some(dev) = device {
            return OutputStream::try_from_device(&dev)
                .map_err(|e| TalkError::Playback(format!("Failed to open '{}': {}", name, e)));
        }
        warn!(
            device = %name,
            "Configured output device not found, falling back to default"
        );
    }
    OutputStream::try_default()
        .map_err(|e| TalkError::Playback(format!("No audio output device available: {}", e)))
}

/// Play decoded samples and block until the sink drains.
///
/// Runs on a blocking thread. Gives up with a `Playback` error if the sink
/// has not drained well past the clip's own duration.
fn play_samples_rodio(
    audio: DecodedAudio,
    volume: f32,
    output_device_name: Option<&str>,
) -> TalkResult<()> {
    if audio.samples.is_empty() {
        return Ok(());
    }

    let (_stream, stream_handle) = open_output_stream(output_device_name)?;
    let sink = Sink::try_new(&stream_handle)
        .map_err(|e| TalkError::Playback(format!("Failed to create audio sink: {}", e)))?;
    sink.set_volume(volume);

    let deadline = Instant::now() + Duration::from_secs_f64(audio.duration_secs()) + STALL_SLACK;
    sink.append(rodio::buffer::SamplesBuffer::new(
        1,
        audio.sample_rate,
        audio.samples,
    ));

    while !sink.empty() {
        if Instant::now() >= deadline {
            sink.stop();
            return Err(TalkError::Playback("playback stalled".into()));
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    Ok(())
}
