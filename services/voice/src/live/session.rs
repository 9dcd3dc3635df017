//! Live session lifecycle.
//!
//! [`VoiceSession`] owns the whole voice path for one conversation: it
//! opens the microphone and playback devices, dials the websocket through
//! the resilient caller, performs the setup handshake, and then runs a
//! single select loop that shuttles capture frames out and server events
//! into the [`SessionEngine`]. The session moves through
//! `Idle -> Connecting -> Listening` and ends in `Closed` or `Failed`;
//! terminal states are reported exactly once.

use std::sync::{Arc, Mutex};

use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, warn};

use rideline_core::tools::ToolCallDispatcher;

use crate::audio::{AudioCaptureLine, PlaybackScheduler};
use crate::error::VoiceError;
use crate::live::engine::{EngineFlow, SessionEngine, SessionEvent};
use crate::live::protocol::{
    ClientMessage, Content, GenerationConfig, Part, ResponseModality, ServerMessage, Setup,
    ToolDeclaration, TranscriptionConfig,
};
use crate::retry::{self, RetryPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle states of a [`VoiceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Connecting,
    Listening,
    Closed,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Everything needed to dial and set up one live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Full websocket URL including authentication.
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
    /// Function declarations advertised during setup.
    pub tool_declarations: Vec<Value>,
    pub retry: RetryPolicy,
}

/// One live voice conversation.
pub struct VoiceSession {
    config: SessionConfig,
    dispatcher: Option<ToolCallDispatcher>,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: Arc<Mutex<Status>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl VoiceSession {
    /// Creates an idle session and the event stream the host observes.
    pub fn new(
        config: SessionConfig,
        dispatcher: ToolCallDispatcher,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            dispatcher: Some(dispatcher),
            events,
            status: Arc::new(Mutex::new(Status::Idle)),
            stop_tx: None,
            task: None,
        };
        (session, event_rx)
    }

    pub fn status(&self) -> Status {
        *lock(&self.status)
    }

    /// Opens the audio devices, dials the remote, and starts listening.
    ///
    /// Only valid from `Idle`. On failure the session ends in `Failed`
    /// and the error is also returned to the caller.
    pub async fn start(&mut self) -> Result<(), VoiceError> {
        if self.status() != Status::Idle {
            return Err(VoiceError::FatalRemote(
                "session already started".to_string(),
            ));
        }
        self.set_status(Status::Connecting);

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let mut capture = match AudioCaptureLine::open(frame_tx).await {
            Ok(capture) => capture,
            Err(err) => {
                self.fail(err.to_string());
                return Err(err.into());
            }
        };
        let mut playback = match PlaybackScheduler::open().await {
            Ok(playback) => playback,
            Err(err) => {
                capture.close();
                self.fail(err.to_string());
                return Err(err.into());
            }
        };

        let config = &self.config;
        let ws = match retry::call(&config.retry, || connect_and_setup(config)).await {
            Ok(ws) => ws,
            Err(err) => {
                capture.close();
                playback.close();
                self.fail(err.to_string());
                return Err(err);
            }
        };
        self.set_status(Status::Listening);
        info!(model = %self.config.model, "live session established");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let dispatcher = self.dispatcher.take().unwrap_or_default();
        let engine = SessionEngine::new(dispatcher, self.events.clone(), outbound_tx);

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(run_loop(
            ws,
            capture,
            playback,
            engine,
            frame_rx,
            outbound_rx,
            stop_rx,
            self.status.clone(),
            self.events.clone(),
        )));
        Ok(())
    }

    /// Requests shutdown. Safe to call more than once and from any state;
    /// the terminal status is still reported exactly once.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            return;
        }
        if self.task.is_none() && !self.status().is_terminal() {
            // Never started: there is no loop to wind down.
            self.set_status(Status::Closed);
        }
    }

    fn set_status(&self, next: Status) {
        let mut status = lock(&self.status);
        if *status == next {
            return;
        }
        *status = next;
        let _ = self.events.send(SessionEvent::StatusChanged(next));
    }

    fn fail(&self, message: String) {
        let _ = self.events.send(SessionEvent::Error(message));
        self.set_status(Status::Failed);
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(status: &Mutex<Status>) -> std::sync::MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(|err| err.into_inner())
}

/// Dials the endpoint and completes the setup handshake. Run under the
/// resilient caller, so transient failures are classified rather than
/// retried here.
async fn connect_and_setup(config: &SessionConfig) -> Result<WsStream, VoiceError> {
    let (mut ws, _) = connect_async(&config.endpoint)
        .await
        .map_err(map_connect_error)?;

    let setup = ClientMessage::Setup(Setup {
        model: config.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec![ResponseModality::Audio],
        },
        system_instruction: Content {
            role: "system".to_string(),
            parts: vec![Part {
                text: config.system_prompt.clone(),
            }],
        },
        tools: vec![ToolDeclaration {
            function_declarations: config.tool_declarations.clone(),
        }],
        input_audio_transcription: TranscriptionConfig {},
        output_audio_transcription: TranscriptionConfig {},
    });
    let payload = serde_json::to_string(&setup).map_err(|err| VoiceError::FatalRemote(
        format!("setup message could not be encoded: {err}"),
    ))?;
    ws.send(WsMessage::Text(payload.into()))
        .await
        .map_err(map_connect_error)?;

    // The first meaningful reply must be the setup acknowledgement.
    while let Some(message) = ws.next().await {
        match message.map_err(map_connect_error)? {
            WsMessage::Text(text) => {
                let parsed: ServerMessage = serde_json::from_str(text.as_str())
                    .map_err(|err| VoiceError::FatalRemote(err.to_string()))?;
                if let Some(err) = parsed.error {
                    return Err(VoiceError::from_remote(err.message));
                }
                if parsed.setup_complete.is_some() {
                    return Ok(ws);
                }
                debug!("ignoring pre-setup message");
            }
            WsMessage::Binary(bytes) => {
                let parsed: ServerMessage = serde_json::from_slice(&bytes)
                    .map_err(|err| VoiceError::FatalRemote(err.to_string()))?;
                if let Some(err) = parsed.error {
                    return Err(VoiceError::from_remote(err.message));
                }
                if parsed.setup_complete.is_some() {
                    return Ok(ws);
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    Err(VoiceError::TransientRemote(
        "connection closed during setup".to_string(),
    ))
}

fn map_connect_error(err: tungstenite::Error) -> VoiceError {
    match err {
        tungstenite::Error::Io(io) => VoiceError::TransientRemote(io.to_string()),
        other => VoiceError::from_remote(other.to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    ws: WsStream,
    mut capture: AudioCaptureLine,
    mut playback: PlaybackScheduler,
    mut engine: SessionEngine,
    mut frame_rx: mpsc::UnboundedReceiver<String>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    mut stop_rx: oneshot::Receiver<()>,
    status: Arc<Mutex<Status>>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut final_status = Status::Closed;

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!("stop requested");
                break;
            }
            frame = frame_rx.recv() => {
                let Some(data) = frame else { continue };
                if let Err(err) = send_client_message(&mut ws_tx, ClientMessage::audio_frame(data)).await {
                    let _ = events.send(SessionEvent::Error(err.to_string()));
                    final_status = Status::Failed;
                    break;
                }
            }
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else { continue };
                if let Err(err) = send_client_message(&mut ws_tx, message).await {
                    let _ = events.send(SessionEvent::Error(err.to_string()));
                    final_status = Status::Failed;
                    break;
                }
            }
            inbound = ws_rx.next() => {
                let parsed = match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        serde_json::from_str::<ServerMessage>(text.as_str())
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        serde_json::from_slice::<ServerMessage>(&bytes)
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("remote closed the session");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        let _ = events.send(SessionEvent::Error(err.to_string()));
                        final_status = Status::Failed;
                        break;
                    }
                };
                let message = match parsed {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(error = %err, "dropping unparseable server message");
                        continue;
                    }
                };
                match engine.handle(message, &mut playback) {
                    EngineFlow::Continue => {}
                    EngineFlow::Closed => break,
                    EngineFlow::Failed(message) => {
                        let _ = events.send(SessionEvent::Error(message));
                        final_status = Status::Failed;
                        break;
                    }
                }
            }
        }
    }

    capture.close();
    playback.close();
    let _ = ws_tx.close().await;

    let mut status = status.lock().unwrap_or_else(|err| err.into_inner());
    if !status.is_terminal() {
        *status = final_status;
        let _ = events.send(SessionEvent::StatusChanged(final_status));
    }
}

async fn send_client_message<S>(ws_tx: &mut S, message: ClientMessage) -> Result<(), VoiceError>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let payload = serde_json::to_string(&message)
        .map_err(|err| VoiceError::FatalRemote(format!("message could not be encoded: {err}")))?;
    ws_tx
        .send(WsMessage::Text(payload.into()))
        .await
        .map_err(map_connect_error)
}
