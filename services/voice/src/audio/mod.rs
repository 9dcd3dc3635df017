//! Native audio path: PCM transport codec, microphone capture, and gapless
//! playback scheduling.

pub mod capture;
pub mod pcm;
pub mod playback;

pub use capture::AudioCaptureLine;
pub use pcm::PlaybackBuffer;
pub use playback::PlaybackScheduler;

/// Capture sample rate expected by the remote session (PCM16 mono).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of inbound response audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Samples per outbound frame at the capture rate (256 ms per frame).
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;
