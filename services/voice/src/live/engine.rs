//! Server-event engine.
//!
//! Everything the remote side sends funnels through [`SessionEngine::handle`],
//! which updates the transcript, drives the playback sink, dispatches tool
//! calls, and tells the session loop whether to keep running. The engine
//! holds no IO of its own, so its behavior is exercised directly in tests.

use rideline_core::tools::{ToolCallDispatcher, ToolInvocation};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::pcm::{self, PlaybackBuffer};
use crate::audio::{PLAYBACK_SAMPLE_RATE, PlaybackScheduler};
use crate::live::protocol::{ClientMessage, ServerContent, ServerMessage};
use crate::live::session::Status;

/// Destination for decoded response audio.
///
/// The session hands the engine a real [`PlaybackScheduler`]; tests use a
/// recording stand-in.
pub trait PlaybackSink: Send {
    fn schedule(&mut self, buffer: PlaybackBuffer);
    fn interrupt(&mut self);
}

impl PlaybackSink for PlaybackScheduler {
    fn schedule(&mut self, buffer: PlaybackBuffer) {
        PlaybackScheduler::schedule(self, &buffer);
    }

    fn interrupt(&mut self) {
        PlaybackScheduler::interrupt(self);
    }
}

/// Notifications surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StatusChanged(Status),
    /// Latest partial of what the caller said. Replaces the previous one.
    UserTranscript(String),
    /// Latest partial of what the assistant said. Replaces the previous one.
    AssistantTranscript(String),
    Error(String),
}

/// Current partial transcript of each side of the conversation.
#[derive(Debug, Default)]
pub struct Transcript {
    pub user_partial: String,
    pub assistant_partial: String,
}

/// What the session loop should do after handling one server message.
#[derive(Debug, PartialEq, Eq)]
pub enum EngineFlow {
    Continue,
    Closed,
    Failed(String),
}

pub struct SessionEngine {
    transcript: Transcript,
    dispatcher: ToolCallDispatcher,
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

impl SessionEngine {
    pub fn new(
        dispatcher: ToolCallDispatcher,
        events: mpsc::UnboundedSender<SessionEvent>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> Self {
        Self {
            transcript: Transcript::default(),
            dispatcher,
            events,
            outbound,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Applies one server message and reports whether the session should
    /// keep running.
    pub fn handle(&mut self, message: ServerMessage, sink: &mut dyn PlaybackSink) -> EngineFlow {
        if let Some(err) = message.error {
            return EngineFlow::Failed(err.message);
        }
        if message.setup_complete.is_some() {
            // Setup acks after the handshake carry no state.
            debug!("ignoring late setup acknowledgement");
        }
        if let Some(tool_call) = message.tool_call {
            for call in tool_call.function_calls {
                let invocation = ToolInvocation {
                    id: call.id,
                    name: call.name,
                    args: call.args.unwrap_or_default(),
                };
                let result = self.dispatcher.dispatch(&invocation);
                let _ = self.outbound.send(ClientMessage::tool_response(result));
            }
        }
        if let Some(content) = message.server_content {
            self.handle_content(content, sink);
        }
        if message.go_away.is_some() {
            return EngineFlow::Closed;
        }
        EngineFlow::Continue
    }

    fn handle_content(&mut self, content: ServerContent, sink: &mut dyn PlaybackSink) {
        if let Some(transcription) = content.input_transcription {
            self.transcript.user_partial = transcription.text.clone();
            let _ = self
                .events
                .send(SessionEvent::UserTranscript(transcription.text));
        }
        if let Some(transcription) = content.output_transcription {
            self.transcript.assistant_partial = transcription.text.clone();
            let _ = self
                .events
                .send(SessionEvent::AssistantTranscript(transcription.text));
        }
        if content.interrupted == Some(true) {
            // The caller spoke over the response: cut playback and drop
            // the half-spoken assistant line.
            sink.interrupt();
            self.transcript.assistant_partial.clear();
            let _ = self
                .events
                .send(SessionEvent::AssistantTranscript(String::new()));
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    match pcm::decode_playback(&blob.data, PLAYBACK_SAMPLE_RATE, 1) {
                        Ok(buffer) => sink.schedule(buffer),
                        Err(err) => warn!(error = %err, "dropping malformed audio frame"),
                    }
                }
            }
        }
        if content.turn_complete == Some(true) {
            self.transcript.user_partial.clear();
            self.transcript.assistant_partial.clear();
            let _ = self.events.send(SessionEvent::UserTranscript(String::new()));
            let _ = self
                .events
                .send(SessionEvent::AssistantTranscript(String::new()));
        }
    }
}
