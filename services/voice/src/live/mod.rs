//! Live websocket session: wire protocol, server-event engine, and the
//! session state machine that owns the audio path.

pub mod engine;
pub mod protocol;
pub mod session;

pub use engine::SessionEvent;
pub use session::{SessionConfig, Status, VoiceSession};
