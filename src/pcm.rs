//! PCM frame codec for the agent audio link.
//!
//! Both directions of the link carry 24 kHz mono 16-bit little-endian PCM,
//! base64-encoded when it rides inside a JSON message. Capture encodes
//! float blocks into frames; playback decodes received frames back into
//! float samples for the output device.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::time::Duration;
use thiserror::Error;

/// Sample rate of the agent audio link, both directions.
pub const SAMPLE_RATE: u32 = 24_000;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid base64 audio chunk: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Audio chunk has odd byte length {0}, expected 16-bit samples")]
    OddLength(usize),
}

/// One block of mono PCM with a monotonic sequence marker.
///
/// `seq` is assigned by whichever side produced the frame (the capture gate
/// for outbound audio, the session reader for inbound audio) and only exists
/// for ordering diagnostics; it never goes over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    seq: u64,
    data: Vec<u8>,
}

impl AudioFrame {
    pub fn new(seq: u64, data: Vec<u8>) -> Self {
        AudioFrame { seq, data }
    }

    /// Decodes a base64 chunk as received from the agent.
    ///
    /// An empty chunk is valid and yields a zero-duration frame; an odd
    /// byte count means a torn 16-bit sample and is rejected.
    pub fn from_chunk(seq: u64, chunk: &str) -> std::result::Result<Self, FrameError> {
        let data = B64.decode(chunk)?;
        if data.len() % 2 != 0 {
            return Err(FrameError::OddLength(data.len()));
        }
        Ok(AudioFrame { seq, data })
    }

    /// Encodes a block of float samples in [-1.0, 1.0] into a frame.
    ///
    /// Out-of-range input is clamped. Negative values scale by 32768 and
    /// positive by 32767 so that -1.0 and 1.0 both land exactly on the
    /// i16 limits.
    pub fn from_samples(seq: u64, samples: &[f32]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let value = if clamped < 0.0 {
                (clamped * 32768.0) as i16
            } else {
                (clamped * 32767.0) as i16
            };
            data.extend_from_slice(&value.to_le_bytes());
        }
        AudioFrame { seq, data }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback duration of this frame at the link sample rate.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_count() as f64 / SAMPLE_RATE as f64)
    }

    /// Base64 chunk form for transport inside a JSON message.
    pub fn to_chunk(&self) -> String {
        B64.encode(&self.data)
    }

    /// Decodes the payload into float samples in [-1.0, 1.0).
    ///
    /// Divides uniformly by 32768 so the decode is a single multiply; the
    /// encode side's asymmetric scaling keeps the round trip within one
    /// quantization step.
    pub fn to_samples(&self) -> Vec<f32> {
        self.data
            .chunks_exact(2)
            .map(|chunk| {
                let value = i16::from_le_bytes([chunk[0], chunk[1]]);
                value as f32 / 32768.0
            })
            .collect()
    }
}
