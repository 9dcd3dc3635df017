//! Rideline Voice Service Library
//!
//! This library contains the real-time voice session manager for the ride
//! booking assistant: microphone capture, the PCM transport codec, gapless
//! playback scheduling, the live websocket session state machine, and the
//! resilient call wrapper shared by every outbound request. The `main.rs`
//! binary is a thin terminal host around it.

pub mod audio;
pub mod config;
pub mod error;
pub mod live;
pub mod retry;
