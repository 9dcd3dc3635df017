//! Microphone capture line.
//!
//! The cpal input stream is owned by a dedicated worker thread because the
//! stream handle cannot cross threads. The audio callback only pushes raw
//! samples into a lock-free ring; the worker drains the ring, resamples to
//! the capture rate when the device runs at a different one, slices fixed
//! frames, and hands them off base64-encoded to the session task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::audio::{CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE, pcm};
use crate::error::DeviceError;

/// Ring between the device callback and the worker, sized for several
/// seconds of audio at common device rates.
const RING_CAPACITY: usize = 96_000;
/// Input chunk size fed through the resampler.
const RESAMPLE_CHUNK: usize = 512;

/// A running microphone capture pipeline.
///
/// Frames arrive on the channel passed to [`AudioCaptureLine::open`] as
/// base64 PCM16 at the capture rate, in order, until [`close`] is called
/// or the receiver is dropped.
///
/// [`close`]: AudioCaptureLine::close
pub struct AudioCaptureLine {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioCaptureLine {
    /// Opens the default input device and starts streaming frames.
    ///
    /// Resolves once the device is producing audio, or with the failure
    /// that prevented it from opening.
    pub async fn open(frame_tx: mpsc::UnboundedSender<String>) -> Result<Self, DeviceError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_stop = stop.clone();
        let worker = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(thread_stop, ready_tx, frame_tx))
            .map_err(|err| DeviceError::Unknown(err.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                stop,
                worker: Some(worker),
            }),
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                let _ = worker.join();
                Err(DeviceError::Unknown(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }

    /// Stops the stream and joins the worker. Safe to call more than once.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }
}

impl Drop for AudioCaptureLine {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_thread(
    stop: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<Result<(), DeviceError>>,
    frame_tx: mpsc::UnboundedSender<String>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(DeviceError::NotFound));
        return;
    };

    let device_rate = match device.default_input_config() {
        Ok(config) => config.sample_rate().0,
        Err(err) => {
            let _ = ready_tx.send(Err(classify_device_error(&err.to_string())));
            return;
        }
    };
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let ring = HeapRb::<f32>::new(RING_CAPACITY);
    let (mut producer, mut consumer) = ring.split();

    let stream = match device.build_input_stream(
        &config,
        move |data: &[f32], _| {
            // Callback context: no locks, no allocation. Overflow drops
            // the tail of the burst.
            producer.push_slice(data);
        },
        |err| warn!(error = %err, "input stream error"),
        None,
    ) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(map_build_error(err)));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(DeviceError::Unknown(err.to_string())));
        return;
    }

    let mut resampler = match build_resampler(device_rate) {
        Ok(resampler) => resampler,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    if ready_tx.send(Ok(())).is_err() {
        return;
    }
    info!(device_rate, "microphone capture started");

    let mut scratch = vec![0.0f32; RESAMPLE_CHUNK];
    let mut staged: Vec<f32> = Vec::new();
    let mut frame: Vec<f32> = Vec::with_capacity(CAPTURE_FRAME_SAMPLES * 2);

    while !stop.load(Ordering::Acquire) {
        let popped = consumer.pop_slice(&mut scratch);
        if popped == 0 {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        staged.extend_from_slice(&scratch[..popped]);

        match resampler.as_mut() {
            None => {
                frame.append(&mut staged);
            }
            Some(resampler) => {
                while staged.len() >= RESAMPLE_CHUNK {
                    let chunk: Vec<f32> = staged.drain(..RESAMPLE_CHUNK).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(mut output) => frame.append(&mut output[0]),
                        Err(err) => {
                            warn!(error = %err, "resampler failed, dropping chunk");
                        }
                    }
                }
            }
        }

        if !emit_full_frames(&mut frame, &frame_tx) {
            debug!("frame receiver dropped, stopping capture");
            break;
        }
    }
    debug!("microphone capture stopped");
}

/// Builds the device-rate to capture-rate resampler, or `None` when the
/// device already runs at the capture rate.
fn build_resampler(device_rate: u32) -> Result<Option<FastFixedIn<f32>>, DeviceError> {
    if device_rate == CAPTURE_SAMPLE_RATE {
        return Ok(None);
    }
    let ratio = CAPTURE_SAMPLE_RATE as f64 / device_rate as f64;
    FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
        .map(Some)
        .map_err(|err| DeviceError::Unknown(err.to_string()))
}

/// Slices every complete frame out of `frame` and sends it encoded, in
/// order. Returns false once the receiver is gone.
fn emit_full_frames(frame: &mut Vec<f32>, frame_tx: &mpsc::UnboundedSender<String>) -> bool {
    while frame.len() >= CAPTURE_FRAME_SAMPLES {
        let samples: Vec<f32> = frame.drain(..CAPTURE_FRAME_SAMPLES).collect();
        if frame_tx.send(pcm::encode(&samples)).is_err() {
            return false;
        }
    }
    true
}

fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::NotFound,
        other => classify_device_error(&other.to_string()),
    }
}

/// Maps a backend error message onto the guidance the host can act on.
fn classify_device_error(message: &str) -> DeviceError {
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("access") || lowered.contains("denied") {
        DeviceError::PermissionDenied
    } else {
        DeviceError::Unknown(message.to_string())
    }
}
