//! Compressed segment audio (AAC/ADTS, MP3) to f32 PCM via Symphonia.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{TalkError, TalkResult};

/// Mono PCM plus the rate it was decoded at.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Guess a container hint from a content type or URL path.
pub fn extension_hint(content_type: Option<&str>, url: &str) -> Option<&'static str> {
    let ct = content_type.unwrap_or_default().to_ascii_lowercase();
    if ct.contains("aac") {
        return Some("aac");
    }
    if ct.contains("mpeg") || ct.contains("mp3") {
        return Some("mp3");
    }
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".aac") {
        Some("aac")
    } else if path.ends_with(".mp3") {
        Some("mp3")
    } else {
        None
    }
}

/// Decode a whole clip, down-mixing to mono.
pub fn decode_to_mono(bytes: Vec<u8>, extension: Option<&str>) -> TalkResult<DecodedAudio> {
    let mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TalkError::Playback(format!("probe failed: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| TalkError::Playback("no audio track".into()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| TalkError::Playback(format!("decoder init failed: {}", e)))?;

    let mut all_samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(TalkError::Playback(format!("demux error: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Packet decode error (skipping): {}", e);
                continue;
            }
        };
        let spec = *decoded.spec();
        // ADTS streams only reveal the real layout once the first frame decodes.
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame in samples.chunks(channels) {
                all_samples.push(frame.iter().sum::<f32>() / channels as f32);
            }
        }
    }

    if sample_rate == 0 {
        return Err(TalkError::Playback("unknown sample rate".into()));
    }

    Ok(DecodedAudio {
        samples: all_samples,
        sample_rate,
    })
}
