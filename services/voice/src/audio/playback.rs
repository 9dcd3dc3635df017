//! Gapless playback scheduling.
//!
//! Inbound audio arrives as a stream of short buffers that must play
//! back-to-back. Scheduling maths live in the pure [`Timeline`], driven by
//! a monotonic clock derived from the number of samples the output stream
//! has consumed. The cpal output stream itself runs on a dedicated thread
//! and reads from a shared sample queue; interrupting clears the queue so
//! the next callback goes silent immediately.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::audio::PLAYBACK_SAMPLE_RATE;
use crate::audio::pcm::PlaybackBuffer;
use crate::error::DeviceError;

/// Input chunk size fed through the playback resampler.
const RESAMPLE_CHUNK: usize = 512;

/// A scheduled playback span in device-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

/// Pure scheduling state: a write cursor and the set of spans still
/// playing. Time is supplied by the caller so the maths are testable
/// without a device.
#[derive(Debug, Default)]
pub struct Timeline {
    next_start: f64,
    active: Vec<Interval>,
}

impl Timeline {
    /// Places a buffer of `duration` seconds at the cursor, or at `now`
    /// when the cursor has fallen behind the clock. Consecutive calls
    /// while audio is still queued produce adjacent spans with no gap.
    pub fn schedule(&mut self, now: f64, duration: f64) -> Interval {
        self.active.retain(|interval| interval.end > now);
        let start = self.next_start.max(now);
        let interval = Interval {
            start,
            end: start + duration,
        };
        self.active.push(interval);
        self.next_start = interval.end;
        interval
    }

    /// Drops everything scheduled and resets the cursor to `now`.
    pub fn interrupt(&mut self, now: f64) {
        self.active.clear();
        self.next_start = now;
    }

    /// Number of spans that have not finished playing at `now`.
    pub fn active_len(&mut self, now: f64) -> usize {
        self.active.retain(|interval| interval.end > now);
        self.active.len()
    }
}

/// State shared with the output callback.
struct Shared {
    queue: Mutex<VecDeque<f32>>,
    /// Samples the output stream has consumed, including silence. This is
    /// the device clock: it advances even when the queue is empty.
    played: AtomicU64,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.queue.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Schedules decoded buffers for gapless output on the default device.
pub struct PlaybackScheduler {
    shared: Arc<Shared>,
    device_rate: u32,
    resampler: Option<FastFixedIn<f32>>,
    /// Samples waiting for a full resampler chunk.
    pending: Vec<f32>,
    timeline: Timeline,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackScheduler {
    /// Opens the default output device and starts the silent stream.
    pub async fn open() -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            played: AtomicU64::new(0),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_shared = shared.clone();
        let thread_stop = stop.clone();
        let worker = std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || output_thread(thread_shared, thread_stop, ready_tx))
            .map_err(|err| DeviceError::Unknown(err.to_string()))?;

        let device_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(DeviceError::Unknown(
                    "playback thread exited before reporting readiness".to_string(),
                ));
            }
        };

        let resampler = if device_rate == PLAYBACK_SAMPLE_RATE {
            None
        } else {
            let ratio = device_rate as f64 / PLAYBACK_SAMPLE_RATE as f64;
            Some(
                FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
                    .map_err(|err| DeviceError::Unknown(err.to_string()))?,
            )
        };

        info!(device_rate, "playback started");
        Ok(Self {
            shared,
            device_rate,
            resampler,
            pending: Vec::new(),
            timeline: Timeline::default(),
            stop,
            worker: Some(worker),
        })
    }

    /// Current device-clock time in seconds.
    fn device_time(&self) -> f64 {
        self.shared.played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    /// Queues a buffer to play immediately after everything already
    /// scheduled.
    pub fn schedule(&mut self, buffer: &PlaybackBuffer) {
        let now = self.device_time();
        let interval = self.timeline.schedule(now, buffer.duration());
        debug!(
            start = interval.start,
            end = interval.end,
            "scheduled playback buffer"
        );

        let mono = downmix(buffer.samples(), buffer.channels());
        match self.resampler.as_mut() {
            None => {
                self.shared.lock_queue().extend(mono);
            }
            Some(resampler) => {
                self.pending.extend(mono);
                let mut queue = self.shared.lock_queue();
                while self.pending.len() >= RESAMPLE_CHUNK {
                    let chunk: Vec<f32> = self.pending.drain(..RESAMPLE_CHUNK).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(output) => queue.extend(output[0].iter().copied()),
                        Err(err) => {
                            warn!(error = %err, "playback resampler failed, dropping chunk");
                        }
                    }
                }
            }
        }
    }

    /// Discards all queued audio and resets the timeline. Playback falls
    /// silent on the next output callback.
    pub fn interrupt(&mut self) {
        let now = self.device_time();
        self.timeline.interrupt(now);
        self.pending.clear();
        self.shared.lock_queue().clear();
        debug!(now, "playback interrupted");
    }

    /// Stops the stream and joins the worker. Safe to call more than once.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("playback thread panicked");
            }
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

fn output_thread(
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<Result<u32, DeviceError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(DeviceError::NotFound));
        return;
    };
    let device_rate = match device.default_output_config() {
        Ok(config) => config.sample_rate().0,
        Err(err) => {
            let _ = ready_tx.send(Err(DeviceError::Unknown(err.to_string())));
            return;
        }
    };
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let callback_shared = shared.clone();
    let stream = match device.build_output_stream(
        &config,
        move |data: &mut [f32], _| {
            let mut queue = callback_shared.lock_queue();
            for slot in data.iter_mut() {
                *slot = queue.pop_front().unwrap_or(0.0);
            }
            // The clock advances through silence too, so scheduling stays
            // monotonic across gaps between responses.
            callback_shared
                .played
                .fetch_add(data.len() as u64, Ordering::AcqRel);
        },
        |err| warn!(error = %err, "output stream error"),
        None,
    ) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(map_output_build_error(err)));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(DeviceError::Unknown(err.to_string())));
        return;
    }
    if ready_tx.send(Ok(device_rate)).is_err() {
        return;
    }

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(20));
    }
    debug!("playback stopped");
}

fn map_output_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::NotFound,
        other => DeviceError::Unknown(other.to_string()),
    }
}

/// Averages interleaved channels down to mono. Mono input passes through.
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
