use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;

/// Capture finalization errors
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Recording produced zero samples
    #[error("no audio captured")]
    Empty,

    /// Underlying stream failure
    #[error(transparent)]
    Stream(#[from] anyhow::Error),
}

/// Recording control seam owned by the session state machine.
///
/// The session is the only caller; abstracting the hardware behind this
/// trait keeps the state machine testable without a microphone.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureControl {
    /// Begin streaming samples into the buffer
    ///
    /// # Errors
    /// Returns error if the input stream cannot be resumed.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming and return the accumulated snapshot
    ///
    /// # Errors
    /// Returns [`CaptureError::Empty`] if nothing was captured.
    fn finalize(&mut self) -> Result<Vec<f32>, CaptureError>;
}

/// Trait for controlling audio stream lifecycle
trait StreamControl {
    /// Resume audio stream (activate microphone)
    fn play(&self) -> Result<()>;
    /// Pause audio stream (deactivate microphone)
    fn pause(&self) -> Result<()>;
}

/// CPAL stream wrapper implementing `StreamControl`
struct CpalStreamControl {
    stream: cpal::Stream,
}

impl StreamControl for CpalStreamControl {
    fn play(&self) -> Result<()> {
        self.stream.play().context("failed to resume audio stream")
    }

    fn pause(&self) -> Result<()> {
        self.stream.pause().context("failed to pause audio stream")
    }
}

/// Microphone capture.
///
/// The cpal stream is created once and kept paused between recordings. The
/// real-time callback only pushes sample slices into a lock-free ring
/// buffer; draining, downmixing and resampling all happen on the caller's
/// thread at finalize time.
pub struct AudioCapture {
    /// Stream controller (kept alive to prevent stream drop)
    stream_control: Option<Box<dyn StreamControl>>,
    /// Ring buffer consumer for reading captured samples
    ring_buffer_consumer: HeapCons<f32>,
    /// Recording state flag shared with the audio callback
    is_recording: Arc<AtomicBool>,
    /// Device sample rate in Hz
    device_sample_rate: u32,
    /// Number of audio channels
    device_channels: u16,
    /// Sample rate handed to the speech engine
    target_sample_rate: u32,
}

impl AudioCapture {
    /// Creates a new audio capture instance
    ///
    /// # Errors
    /// Returns error if default audio device is unavailable or stream creation fails
    pub fn new(config: &AudioConfig) -> Result<Self> {
        info!("initializing audio capture");

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("no input device available")?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_owned());
        info!("using input device: {}", device_name);

        // Use device default config, resample to the target rate at finalize
        let supported_config = device
            .default_input_config()
            .context("failed to get default input config")?;

        let device_sample_rate = supported_config.sample_rate();
        let device_channels = supported_config.channels();

        info!(
            "device config: {} Hz, {} channels",
            device_sample_rate, device_channels
        );

        // Size the ring buffer for the longest allowed recording so the
        // callback never has to drop samples
        let ring_buffer_capacity =
            (device_sample_rate as usize) * (device_channels as usize) * config.max_seconds;
        info!(
            "ring buffer capacity: {} samples ({} seconds at {} Hz)",
            ring_buffer_capacity, config.max_seconds, device_sample_rate
        );
        let ring_buffer = HeapRb::<f32>::new(ring_buffer_capacity);
        let (ring_buffer_producer, ring_buffer_consumer) = ring_buffer.split();

        let is_recording = Arc::new(AtomicBool::new(false));

        let is_recording_clone = Arc::clone(&is_recording);
        let mut producer = ring_buffer_producer;

        let stream_config = supported_config.into();
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Real-time context: push and nothing else
                    if is_recording_clone.load(Ordering::Relaxed) {
                        let pushed = producer.push_slice(data);
                        if pushed < data.len() {
                            warn!("ring buffer full, dropped {} samples", data.len() - pushed);
                        }
                    }
                },
                move |err| {
                    warn!("audio stream error: {}", err);
                },
                None,
            )
            .context("failed to build input stream")?;

        let stream_control = CpalStreamControl { stream };

        // Start the stream and immediately pause it (mic inactive until activation)
        stream_control.play()?;
        stream_control.pause()?;
        info!("audio stream initialized (paused)");

        Ok(Self {
            stream_control: Some(Box::new(stream_control)),
            ring_buffer_consumer,
            is_recording,
            device_sample_rate,
            device_channels,
            target_sample_rate: config.sample_rate,
        })
    }

    fn convert_to_target_rate(&self, samples: &[f32]) -> Vec<f32> {
        let _span = tracing::debug_span!("convert_to_target_rate").entered();

        // Downmix to mono if needed
        let mono_samples = if self.device_channels == 1 {
            samples.to_vec()
        } else {
            let channels_f64 = f64::from(self.device_channels);
            samples
                .chunks(self.device_channels as usize)
                .map(|frame| {
                    let sum_f64: f64 = frame.iter().map(|&s| f64::from(s)).sum();
                    // f64 → f32: audio samples are stored as f32, precision sufficient
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        (sum_f64 / channels_f64) as f32
                    }
                })
                .collect()
        };

        if self.device_sample_rate == self.target_sample_rate {
            return mono_samples;
        }

        // Linear interpolation resampling; fractional index math needs
        // f64 ↔ usize conversions
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let resampled = {
            let ratio = f64::from(self.device_sample_rate) / f64::from(self.target_sample_rate);

            let output_len_f64 = (mono_samples.len() as f64) / ratio;
            let output_len = if output_len_f64.is_finite() && output_len_f64 >= 0.0 {
                output_len_f64.ceil() as usize
            } else {
                mono_samples.len()
            };

            let mut resampled = Vec::with_capacity(output_len);
            for i in 0..output_len {
                let src_idx_f64 = (i as f64) * ratio;

                let src_idx_floor = if src_idx_f64 >= 0.0 && src_idx_f64 < (usize::MAX as f64) {
                    src_idx_f64.floor() as usize
                } else {
                    0
                };

                let src_idx_ceil = (src_idx_floor + 1).min(mono_samples.len().saturating_sub(1));
                let fract = src_idx_f64 - src_idx_f64.floor();

                let sample = if src_idx_floor < mono_samples.len() {
                    let s1 = f64::from(mono_samples[src_idx_floor]);
                    let s2 = f64::from(mono_samples[src_idx_ceil]);
                    let interpolated = s1.mul_add(1.0 - fract, s2 * fract);
                    interpolated as f32
                } else {
                    0.0_f32
                };

                resampled.push(sample);
            }

            debug!(
                device_rate = self.device_sample_rate,
                target_rate = self.target_sample_rate,
                input_samples = mono_samples.len(),
                output_samples = resampled.len(),
                "resampling completed"
            );

            resampled
        };

        resampled
    }
}

impl CaptureControl for AudioCapture {
    fn start(&mut self) -> Result<()> {
        let _span = tracing::debug_span!("capture_start").entered();
        debug!("starting recording");

        // Discard leftovers from any previous session
        self.ring_buffer_consumer.clear();

        // Set recording flag BEFORE resuming stream to avoid race condition
        self.is_recording.store(true, Ordering::Relaxed);

        if let Some(stream_control) = &self.stream_control {
            stream_control.play()?;
        }

        info!("recording started");
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<f32>, CaptureError> {
        let _span = tracing::debug_span!("capture_finalize").entered();
        debug!("stopping recording");

        self.is_recording.store(false, Ordering::Relaxed);

        if let Some(stream_control) = &self.stream_control {
            stream_control.pause().map_err(CaptureError::Stream)?;
        }

        // Drain ring buffer into the snapshot; this also clears the buffer
        // for the next session
        let mut samples = Vec::new();
        while let Some(sample) = self.ring_buffer_consumer.try_pop() {
            samples.push(sample);
        }

        info!(samples = samples.len(), "ring buffer drained");

        if samples.is_empty() {
            return Err(CaptureError::Empty);
        }

        Ok(self.convert_to_target_rate(&samples))
    }
}
