//! Microphone capture via cpal.
//!
//! `open` resolves the input device and builds a paused input stream, so a
//! pre-armed stream costs nothing until recording starts. The callback
//! down-mixes and resamples to 16 kHz mono and pushes into a ring buffer;
//! `stop` drops the stream (releasing the device) before draining it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{debug, error, info, warn};

use super::ring_buffer::{capture_ring_buffer, CaptureConsumer, CaptureProducer};
use super::wav::encode_wav;
use super::{Microphone, Utterance, CAPTURE_SAMPLE_RATE};
use crate::error::{TalkError, TalkResult};

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Flags shared between the cpal callback thread and the stream owner.
#[derive(Debug, Default)]
struct CaptureFlags {
    capturing: AtomicBool,
    chunks: AtomicUsize,
    overflowed: AtomicBool,
}

/// Callback side of a capture: down-mix, resample, buffer.
struct CaptureSink {
    producer: CaptureProducer,
    flags: Arc<CaptureFlags>,
    channels: u16,
    native_rate: u32,
}

impl CaptureSink {
    fn accept(&mut self, data: &[f32]) {
        if !self.flags.capturing.load(Ordering::Acquire) {
            return;
        }
        let mono = to_mono(data, self.channels);
        let resampled = resample_linear(&mono, self.native_rate, CAPTURE_SAMPLE_RATE);
        if self.producer.push_slice(&resampled) < resampled.len() {
            self.flags.overflowed.store(true, Ordering::Release);
        }
        self.flags.chunks.fetch_add(1, Ordering::AcqRel);
    }
}

/// Close the capture and take everything buffered. Must run after the
/// stream is gone, otherwise a trailing callback is lost.
fn finish_capture(flags: &CaptureFlags, consumer: &mut CaptureConsumer) -> (Vec<f32>, usize) {
    flags.capturing.store(false, Ordering::Release);
    let samples = consumer.drain_all();
    (samples, flags.chunks.load(Ordering::Acquire))
}

/// An opened input stream, paused until `record`.
pub struct MicStream {
    stream: cpal::Stream,
    consumer: CaptureConsumer,
    flags: Arc<CaptureFlags>,
    device_name: String,
}

/// A live recording.
pub struct CpalRecorder {
    inner: MicStream,
}

/// cpal-backed `Microphone`.
pub struct CpalMicrophone {
    device_name: Option<String>,
    max_utterance_secs: u64,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>, max_utterance_secs: u64) -> Self {
        Self {
            device_name,
            max_utterance_secs,
        }
    }

    fn resolve_device(&self) -> TalkResult<(cpal::Device, StreamConfig)> {
        let host = cpal::default_host();

        let device = if let Some(name) = self.device_name.as_deref() {
            host.input_devices()
                .map_err(|e| TalkError::Device(format!("Failed to enumerate input devices: {e}")))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| TalkError::Device(format!("Input device not found: {name}")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| TalkError::Device("No default input device available".into()))?
        };

        let default_config = device
            .default_input_config()
            .map_err(|e| TalkError::Device(format!("Failed to get default input config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok((device, stream_config))
    }
}

impl Microphone for CpalMicrophone {
    type Stream = MicStream;
    type Recorder = CpalRecorder;

    async fn open(&self) -> TalkResult<MicStream> {
        let (device, stream_config) = self.resolve_device()?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        let native_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;

        let (producer, consumer) = capture_ring_buffer(self.max_utterance_secs);
        let flags = Arc::new(CaptureFlags::default());
        let mut sink = CaptureSink {
            producer,
            flags: Arc::clone(&flags),
            channels,
            native_rate,
        };

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| sink.accept(data),
                move |err| {
                    error!("Audio input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| TalkError::Device(format!("Failed to build input stream: {e}")))?;

        // Some backends start streams on build; keep it idle until `record`.
        if let Err(e) = stream.pause() {
            debug!("Input stream pause after build not supported: {}", e);
        }

        info!(device = %device_name, native_rate, channels, "Microphone opened");

        Ok(MicStream {
            stream,
            consumer,
            flags,
            device_name,
        })
    }

    fn record(&self, mut stream: MicStream) -> TalkResult<CpalRecorder> {
        stream.consumer.clear();
        stream.flags.chunks.store(0, Ordering::Release);
        stream.flags.capturing.store(true, Ordering::Release);
        stream
            .stream
            .play()
            .map_err(|e| TalkError::Device(format!("Failed to start input stream: {e}")))?;
        debug!(device = %stream.device_name, "Recording requested");
        Ok(CpalRecorder { inner: stream })
    }

    async fn stop(&self, recorder: CpalRecorder) -> TalkResult<Utterance> {
        let MicStream {
            stream,
            mut consumer,
            flags,
            device_name,
        } = recorder.inner;

        if let Err(e) = stream.pause() {
            debug!("Input stream pause failed: {}", e);
        }
        // Dropping the stream joins the callback thread and releases the device.
        drop(stream);

        let (samples, chunks) = finish_capture(&flags, &mut consumer);
        if flags.overflowed.load(Ordering::Acquire) {
            warn!(
                device = %device_name,
                "Capture buffer overflowed, utterance tail was dropped"
            );
        }

        info!(
            device = %device_name,
            chunks,
            samples = samples.len(),
            "Microphone released"
        );

        Ok(Utterance {
            audio: encode_wav(&samples, CAPTURE_SAMPLE_RATE),
            chunks,
            samples: samples.len(),
        })
    }
}

/// Simple linear resampler from `from_rate` to `to_rate`.
/// Operates on mono f32 samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_48k_to_16k_keeps_a_third() {
        let input: Vec<f32> = (0..48).map(|i| i as f32).collect();
        let output = resample_linear(&input, 48_000, 16_000);
        assert_eq!(output.len(), 16);
        assert_eq!(output[1], 3.0);
    }

    #[test]
    fn stereo_is_averaged() {
        assert_eq!(to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&[0.25], 1), vec![0.25]);
    }

    fn sink(flags: &Arc<CaptureFlags>) -> (CaptureSink, CaptureConsumer) {
        let (producer, consumer) = capture_ring_buffer(1);
        let sink = CaptureSink {
            producer,
            flags: Arc::clone(flags),
            channels: 2,
            native_rate: CAPTURE_SAMPLE_RATE,
        };
        (sink, consumer)
    }

    #[test]
    fn trailing_callback_is_kept_until_finish() {
        let flags = Arc::new(CaptureFlags::default());
        let (mut sink, mut consumer) = sink(&flags);
        flags.capturing.store(true, Ordering::Release);

        sink.accept(&[0.5, 0.5, 0.25, 0.25]);
        // Final flush delivered while the stream is being torn down.
        sink.accept(&[1.0, 0.0]);

        let (samples, chunks) = finish_capture(&flags, &mut consumer);
        assert_eq!(samples, vec![0.5, 0.25, 0.5]);
        assert_eq!(chunks, 2);
    }

    #[test]
    fn callbacks_outside_a_recording_are_dropped() {
        let flags = Arc::new(CaptureFlags::default());
        let (mut sink, mut consumer) = sink(&flags);

        sink.accept(&[0.5, 0.5]);
        flags.capturing.store(true, Ordering::Release);
        sink.accept(&[0.25, 0.25]);
        assert_eq!(finish_capture(&flags, &mut consumer), (vec![0.25], 1));

        sink.accept(&[1.0, 1.0]);
        assert_eq!(consumer.available(), 0);
    }

    #[test]
    fn list_devices_does_not_panic() {
        // CI machines may have no audio hardware at all.
        let _ = list_devices();
    }
}
