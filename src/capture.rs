//! Microphone capture gate.
//!
//! A dedicated thread owns the cpal input stream; the stream callback
//! assembles fixed-size blocks, encodes them, and hands frames to the
//! session through a callback. The gate is lossy on purpose: muted blocks
//! and blocks with nowhere to go are dropped, never buffered, because live
//! speech is worthless late.
//!
//! The only state shared with the rest of the system is the mute flag and
//! whatever the frame callback captures, so the real-time audio path never
//! waits on a lock.

use crate::pcm::{AudioFrame, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Microphone unavailable: {0}")]
    AccessDenied(String),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Capture configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device name (None = default device).
    pub device_id: Option<String>,
    /// Samples per emitted frame.
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            device_id: None,
            // ~43ms at the link rate, comfortably under one network turn.
            block_size: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u32,
}

/// Receives each encoded frame on the audio thread. Must not block.
pub type FrameCallback = Box<dyn Fn(AudioFrame) + Send + 'static>;

/// Live microphone tap with a mute switch.
pub struct CaptureGate {
    muted: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    capture_thread: Option<thread::JoinHandle<()>>,
}

impl CaptureGate {
    /// Opens the input device and starts capturing. Resolves once the
    /// device is live, with `AccessDenied` when the microphone cannot be
    /// opened (refused permission and missing hardware look the same from
    /// here).
    pub async fn start(
        config: CaptureConfig,
        on_frame: FrameCallback,
    ) -> Result<Self, CaptureError> {
        let muted = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();

        let thread_muted = Arc::clone(&muted);
        let capture_thread = thread::spawn(move || {
            let stream = match build_capture_stream(&config, thread_muted, on_frame) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // The cpal stream must live and die on this thread; park here
            // until the gate is stopped or dropped.
            let _ = shutdown_rx.recv();
            drop(stream);
            log::debug!("Capture: device thread exiting");
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                log::info!("🎤 Microphone capture started");
                Ok(CaptureGate {
                    muted,
                    shutdown: Some(shutdown_tx),
                    capture_thread: Some(capture_thread),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::AccessDenied(
                "input device thread died during startup".to_string(),
            )),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
        if muted {
            log::info!("🔇 Microphone muted");
        } else {
            log::info!("🎤 Microphone unmuted");
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Stops capture and releases the device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.shutdown.take().is_some() {
            log::info!("🎤 Microphone capture stopped");
        }
        if let Some(thread) = self.capture_thread.take() {
            if thread.join().is_err() {
                log::error!("Capture: failed to join device thread");
            }
        }
    }

    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, CaptureError> {
        let host = cpal::default_host();
        let default_name = host
            .default_input_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_default();
        let mut result = Vec::new();
        for device in host
            .input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?
        {
            let Ok(name) = device.name() else { continue };
            let channel_count = device
                .default_input_config()
                .map(|c| u32::from(c.channels()))
                .unwrap_or(0);
            result.push(AudioDeviceInfo {
                is_default: name == default_name,
                name,
                channel_count,
            });
        }
        Ok(result)
    }
}

impl Drop for CaptureGate {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_capture_stream(
    config: &CaptureConfig,
    muted: Arc<AtomicBool>,
    on_frame: FrameCallback,
) -> Result<CpalStream, CaptureError> {
    let host = cpal::default_host();
    let device = match &config.device_id {
        Some(id) => host
            .input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == *id).unwrap_or(false))
            .ok_or_else(|| CaptureError::Device(format!("Input device not found: {id}")))?,
        None => host.default_input_device().ok_or_else(|| {
            CaptureError::AccessDenied("no default input device found".to_string())
        })?,
    };

    // Prefer a config that does the link rate natively; otherwise request
    // it against the default config and let the backend resample.
    let supported = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Config(e.to_string()))?
        .find(|c| c.min_sample_rate().0 <= SAMPLE_RATE && c.max_sample_rate().0 >= SAMPLE_RATE)
        .map(|c| c.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)));
    let supported = match supported {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| CaptureError::Config(e.to_string()))?,
    };

    let stream_config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };
    log::info!(
        "Capture: {:?}, {} channel(s) @ {}Hz ({:?})",
        device.name(),
        stream_config.channels,
        SAMPLE_RATE,
        supported.sample_format()
    );

    let block_size = config.block_size;
    let stream = match supported.sample_format() {
        SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, block_size, muted, on_frame)
        }
        SampleFormat::U16 => {
            build_stream::<u16>(&device, &stream_config, block_size, muted, on_frame)
        }
        SampleFormat::F32 => {
            build_stream::<f32>(&device, &stream_config, block_size, muted, on_frame)
        }
        other => {
            return Err(CaptureError::Config(format!(
                "Unsupported sample format: {other:?}"
            )))
        }
    }?;
    Ok(stream)
}

fn build_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    block_size: usize,
    muted: Arc<AtomicBool>,
    on_frame: FrameCallback,
) -> Result<CpalStream, CaptureError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut block: Vec<f32> = Vec::with_capacity(block_size);
    let mut seq: u64 = 0;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only; the link is mono.
                for frame in data.chunks(channels) {
                    let Some(sample) = frame.first() else { continue };
                    block.push(f32::from_sample(*sample));
                    if block.len() >= block_size {
                        if muted.load(Ordering::Acquire) {
                            block.clear();
                            continue;
                        }
                        on_frame(AudioFrame::from_samples(seq, &block));
                        seq += 1;
                        block.clear();
                    }
                }
            },
            |e| log::error!("Capture: stream error: {e}"),
            None,
        )
        .map_err(|e| CaptureError::AccessDenied(e.to_string()))
}
