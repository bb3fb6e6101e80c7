//! Gap-free playback of the agent's synthesized speech.
//!
//! The scheduler owns all timing: each frame is scheduled to start exactly
//! where the previous one ends, so buffers chain back-to-back no matter how
//! irregularly they arrive off the network. The sink underneath only has to
//! keep a contiguous sample queue flowing into the output device.

use crate::pcm::{AudioFrame, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hound::{SampleFormat as WavSampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Audio output device error: {0}")]
    Device(String),
    #[error("Playback buffer rejected: {0}")]
    Buffer(String),
    #[error("WAV recording error: {0}")]
    Recording(#[from] hound::Error),
}

/// Audio output seam. `play_at` must make `samples` audible from `start`,
/// contiguous with any buffer whose end time equals `start`.
pub trait PlaybackSink: Send {
    fn play_at(&self, start: Instant, samples: Vec<f32>) -> Result<(), PlaybackError>;

    /// Silences everything scheduled or playing, immediately.
    fn stop_all(&self) -> Result<(), PlaybackError>;
}

/// Chains frame start times so playback is gap-free and order-preserving.
///
/// One instance per session, driven only from the event loop. A buffer the
/// sink rejects is skipped without advancing the chain, so the stream heals
/// around it instead of leaving dead air.
pub struct PlaybackScheduler<S: PlaybackSink> {
    sink: S,
    next_start: Instant,
    recorder: Option<WavWriter<BufWriter<File>>>,
}

impl<S: PlaybackSink> PlaybackScheduler<S> {
    pub fn new(sink: S) -> Self {
        PlaybackScheduler {
            sink,
            next_start: Instant::now(),
            recorder: None,
        }
    }

    /// Copies every scheduled frame into a WAV file from here on. Frames
    /// the sink rejects never play, so they are not tapped either.
    pub fn record_to(&mut self, path: &Path) -> Result<(), PlaybackError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: WavSampleFormat::Int,
        };
        self.recorder = Some(WavWriter::create(path, spec)?);
        log::info!("🎙️ Recording agent audio to {}", path.display());
        Ok(())
    }

    pub fn enqueue(&mut self, frame: &AudioFrame) {
        self.enqueue_at(frame, Instant::now());
    }

    /// Schedules one frame. If the chain has fallen behind the clock
    /// (underrun), it restarts at `now` instead of scheduling in the past.
    pub(crate) fn enqueue_at(&mut self, frame: &AudioFrame, now: Instant) {
        if frame.is_empty() {
            return;
        }
        if self.next_start < now {
            self.next_start = now;
        }
        let start = self.next_start;
        match self.sink.play_at(start, frame.to_samples()) {
            Ok(()) => {
                self.next_start = start + frame.duration();
                self.record(frame);
            }
            Err(e) => log::warn!("Playback: skipping buffer {}: {e}", frame.seq()),
        }
    }

    pub fn flush(&mut self) {
        self.flush_at(Instant::now());
    }

    /// Stops everything and restarts the chain at `now`. Used when the
    /// customer interrupts the agent and on session teardown.
    pub(crate) fn flush_at(&mut self, now: Instant) {
        if let Err(e) = self.sink.stop_all() {
            log::warn!("Playback: flush failed: {e}");
        }
        self.next_start = now;
    }

    pub fn next_start(&self) -> Instant {
        self.next_start
    }

    /// Finalizes the WAV recording, if one is running.
    pub fn finish_recording(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finalize() {
                log::warn!("Playback: failed to finalize recording: {e}");
            }
        }
    }

    fn record(&mut self, frame: &AudioFrame) {
        if let Some(recorder) = &mut self.recorder {
            for chunk in frame.as_bytes().chunks_exact(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                if let Err(e) = recorder.write_sample(sample) {
                    log::warn!("Playback: recording write failed, stopping tap: {e}");
                    self.recorder = None;
                    return;
                }
            }
        }
    }
}

enum DeviceCommand {
    Clear,
    Shutdown,
}

/// Output device sink. A dedicated thread owns the cpal stream; the stream
/// callback pulls from a shared sample queue, interpolating from the link
/// rate to whatever rate the device wants. An empty queue plays silence,
/// which is exactly the underrun case the scheduler resets around.
pub struct CpalPlayback {
    queue: Arc<Mutex<Vec<f32>>>,
    commands: Sender<DeviceCommand>,
    device_thread: Option<thread::JoinHandle<()>>,
}

impl CpalPlayback {
    pub fn start() -> Result<Self, PlaybackError> {
        let queue = Arc::new(Mutex::new(Vec::new()));
        let (command_tx, command_rx) = channel::<DeviceCommand>();
        let (ready_tx, ready_rx) = channel::<Result<(), PlaybackError>>();

        let callback_queue = Arc::clone(&queue);
        let thread_queue = Arc::clone(&queue);
        let device_thread = thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(PlaybackError::Device(
                        "no output device found".to_string(),
                    )));
                    return;
                }
            };
            let supported = match device.default_output_config() {
                Ok(supported) => supported,
                Err(e) => {
                    let _ = ready_tx.send(Err(PlaybackError::Device(e.to_string())));
                    return;
                }
            };
            log::debug!(
                "Playback: output device {:?} at {} Hz",
                device.name(),
                supported.sample_rate().0
            );

            let device_rate = supported.sample_rate().0;
            let device_channels = supported.channels() as usize;
            let step = SAMPLE_RATE as f32 / device_rate as f32;

            let stream = match device.build_output_stream(
                &supported.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = callback_queue.lock().unwrap();
                    let mut position: f32 = 0.0;
                    for frame in data.chunks_mut(device_channels) {
                        let sample = interpolate(&queue, position);
                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }
                        position += step;
                    }
                    let consumed = (position.ceil() as usize).min(queue.len());
                    queue.drain(0..consumed);
                },
                |e| log::error!("Playback: stream error: {e}"),
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(PlaybackError::Device(e.to_string())));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(PlaybackError::Device(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // The stream must stay on this thread; park here until teardown.
            while let Ok(command) = command_rx.recv() {
                match command {
                    DeviceCommand::Clear => thread_queue.lock().unwrap().clear(),
                    DeviceCommand::Shutdown => break,
                }
            }
            log::debug!("Playback: device thread exiting");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(CpalPlayback {
                queue,
                commands: command_tx,
                device_thread: Some(device_thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::Device(
                "output device thread died during startup".to_string(),
            )),
        }
    }
}

fn interpolate(queue: &[f32], position: f32) -> f32 {
    if queue.is_empty() {
        return 0.0;
    }
    let floor = position.floor() as usize;
    let fract = position.fract();
    let a = queue.get(floor).copied().unwrap_or(0.0);
    let b = queue.get(floor + 1).copied().unwrap_or(0.0);
    a * (1.0 - fract) + b * fract
}

impl PlaybackSink for CpalPlayback {
    fn play_at(&self, start: Instant, samples: Vec<f32>) -> Result<(), PlaybackError> {
        let lag = Instant::now().saturating_duration_since(start);
        if lag.as_millis() > 50 {
            log::debug!("Playback: buffer scheduled {}ms late", lag.as_millis());
        }
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| PlaybackError::Buffer("sample queue poisoned".to_string()))?;
        queue.extend(samples);
        Ok(())
    }

    fn stop_all(&self) -> Result<(), PlaybackError> {
        self.commands
            .send(DeviceCommand::Clear)
            .map_err(|_| PlaybackError::Device("device thread gone".to_string()))?;
        // Also clear directly so no already-queued sample survives the
        // channel round trip.
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.commands.send(DeviceCommand::Shutdown);
        if let Some(thread) = self.device_thread.take() {
            if thread.join().is_err() {
                log::error!("Playback: failed to join device thread");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeSink {
        plays: Arc<Mutex<Vec<(Instant, usize)>>>,
        stopped: Arc<Mutex<usize>>,
        fail_next: Arc<AtomicBool>,
    }

    impl PlaybackSink for FakeSink {
        fn play_at(&self, start: Instant, samples: Vec<f32>) -> Result<(), PlaybackError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(PlaybackError::Buffer("injected".to_string()));
            }
            self.plays.lock().unwrap().push((start, samples.len()));
            Ok(())
        }

        fn stop_all(&self) -> Result<(), PlaybackError> {
            *self.stopped.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn frame(seq: u64, samples: usize) -> AudioFrame {
        AudioFrame::from_samples(seq, &vec![0.5; samples])
    }

    #[test]
    fn test_buffers_chain_back_to_back() {
        let sink = FakeSink::default();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        let now = Instant::now();

        // 2400 samples = 100ms at the link rate.
        scheduler.enqueue_at(&frame(0, 2400), now);
        scheduler.enqueue_at(&frame(1, 2400), now);
        scheduler.enqueue_at(&frame(2, 1200), now);

        let plays = sink.plays.lock().unwrap();
        assert_eq!(plays.len(), 3);
        assert_eq!(plays[1].0 - plays[0].0, Duration::from_millis(100));
        assert_eq!(plays[2].0 - plays[1].0, Duration::from_millis(100));
        assert_eq!(
            scheduler.next_start() - plays[2].0,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_underrun_resets_the_chain_to_now() {
        let sink = FakeSink::default();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        let start = Instant::now();

        scheduler.enqueue_at(&frame(0, 2400), start);
        // The next frame arrives well after the first finished playing.
        let late = start + Duration::from_millis(500);
        scheduler.enqueue_at(&frame(1, 2400), late);

        let plays = sink.plays.lock().unwrap();
        assert_eq!(plays[1].0, late);
    }

    #[test]
    fn test_rejected_buffer_is_skipped_without_a_gap() {
        let sink = FakeSink::default();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        let now = Instant::now();

        scheduler.enqueue_at(&frame(0, 2400), now);
        sink.fail_next.store(true, Ordering::SeqCst);
        scheduler.enqueue_at(&frame(1, 2400), now);
        scheduler.enqueue_at(&frame(2, 2400), now);

        let plays = sink.plays.lock().unwrap();
        assert_eq!(plays.len(), 2);
        // Frame 2 takes the slot frame 1 failed to fill.
        assert_eq!(plays[1].0 - plays[0].0, Duration::from_millis(100));
    }

    #[test]
    fn test_flush_stops_everything_and_restarts_at_now() {
        let sink = FakeSink::default();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        let start = Instant::now();

        scheduler.enqueue_at(&frame(0, 24_000), start);
        scheduler.enqueue_at(&frame(1, 24_000), start);
        scheduler.enqueue_at(&frame(2, 24_000), start);

        let flush_time = start + Duration::from_millis(200);
        scheduler.flush_at(flush_time);
        assert_eq!(*sink.stopped.lock().unwrap(), 1);
        assert_eq!(scheduler.next_start(), flush_time);

        scheduler.enqueue_at(&frame(3, 2400), flush_time);
        let plays = sink.plays.lock().unwrap();
        assert_eq!(plays[3].0, flush_time);
    }

    #[test]
    fn test_empty_frame_changes_nothing() {
        let sink = FakeSink::default();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        let before = scheduler.next_start();
        scheduler.enqueue_at(&AudioFrame::new(0, vec![]), Instant::now());
        assert!(sink.plays.lock().unwrap().is_empty());
        assert_eq!(scheduler.next_start(), before);
    }

    #[test]
    fn test_recorder_taps_the_exact_wire_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.wav");
        let sink = FakeSink::default();
        let mut scheduler = PlaybackScheduler::new(sink);
        scheduler.record_to(&path).unwrap();

        let frame = AudioFrame::from_samples(0, &[0.5, -0.5, 0.25]);
        scheduler.enqueue(&frame);
        scheduler.finish_recording();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let recorded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        let expected: Vec<i16> = frame
            .as_bytes()
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(recorded, expected);
    }

    #[test]
    fn test_recorder_skips_rejected_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.wav");
        let sink = FakeSink::default();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        scheduler.record_to(&path).unwrap();

        scheduler.enqueue(&AudioFrame::from_samples(0, &[0.5; 4]));
        sink.fail_next.store(true, Ordering::SeqCst);
        scheduler.enqueue(&AudioFrame::from_samples(1, &[-0.5; 4]));
        scheduler.enqueue(&AudioFrame::from_samples(2, &[0.25; 4]));
        scheduler.finish_recording();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let recorded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(recorded.len(), 8, "only the scheduled frames are tapped");
        assert!(
            recorded.iter().all(|s| *s >= 0),
            "the rejected buffer must not reach the tap"
        );
    }

    #[test]
    fn test_interpolate_midpoint() {
        let queue = vec![0.0, 1.0];
        assert_eq!(interpolate(&queue, 0.5), 0.5);
        assert_eq!(interpolate(&queue, 0.0), 0.0);
        assert_eq!(interpolate(&[], 0.0), 0.0);
    }

    #[test]
    fn test_device_sink_when_hardware_is_present() {
        match CpalPlayback::start() {
            Ok(sink) => {
                let samples = vec![0.0f32; 2400];
                sink.play_at(Instant::now(), samples).unwrap();
                sink.stop_all().unwrap();
                assert!(sink.queue.lock().unwrap().is_empty());
            }
            Err(e) => {
                log::warn!("Audio device not available in test environment - this is expected: {e}");
            }
        }
    }
}
