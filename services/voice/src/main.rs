//! Main Entrypoint for the Rideline Voice Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Wiring the ride controls into the tool dispatcher.
//! 4. Starting the live voice session.
//! 5. Relaying session events to the terminal and handling graceful shutdown.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use rideline_core::ride::{RideControls, RideDraft, Vehicle};
use rideline_core::tools::{ToolCallDispatcher, control_ride_declaration, register_control_ride};
use rideline_voice::config::Config;
use rideline_voice::live::{SessionConfig, SessionEvent, VoiceSession};
use rideline_voice::retry::RetryPolicy;

const RIDE_ASSISTANT_PROMPT: &str = "You are a voice assistant for booking rides. \
    Speak briefly and naturally. When the rider states or changes a pickup point, \
    a destination, or a vehicle preference (BIKE, AUTO or CAR), call the \
    controlRide tool with the fields that changed. Confirm what you updated \
    and ask for whatever is still missing before the booking can proceed.";

#[derive(Parser)]
#[command(name = "rideline-voice", version, about = "Voice ride-booking assistant")]
struct Cli {
    /// Override the live model configured in the environment.
    #[arg(long)]
    model: Option<String>,
}

/// Ride controls backed by the terminal: every update is printed, and the
/// booking summary stands in for a booking screen.
struct TerminalHost {
    draft: RideDraft,
}

impl RideControls for TerminalHost {
    fn set_pickup(&mut self, pickup: &str) {
        self.draft.set_pickup(pickup);
        info!(pickup, "pickup updated");
    }

    fn set_destination(&mut self, destination: &str) {
        self.draft.set_destination(destination);
        info!(destination, "destination updated");
    }

    fn set_vehicle(&mut self, vehicle: Vehicle) {
        self.draft.set_vehicle(vehicle);
        info!(vehicle = vehicle.wire_name(), "vehicle updated");
    }

    fn show_booking(&mut self) {
        println!(
            "--- booking ---\n  pickup:      {}\n  destination: {}\n  vehicle:     {}",
            self.draft.pickup.as_deref().unwrap_or("(not set)"),
            self.draft.destination.as_deref().unwrap_or("(not set)"),
            self.draft
                .vehicle
                .map(|v| v.wire_name())
                .unwrap_or("(not set)"),
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(model) = cli.model {
        config.model = model;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing session...");

    // --- 3. Wire Ride Controls ---
    let host: Arc<Mutex<dyn RideControls>> = Arc::new(Mutex::new(TerminalHost {
        draft: RideDraft::default(),
    }));
    let mut dispatcher = ToolCallDispatcher::new();
    register_control_ride(&mut dispatcher, host);

    // --- 4. Start the Live Session ---
    let session_config = SessionConfig {
        endpoint: config.session_url(),
        model: config.model.clone(),
        system_prompt: RIDE_ASSISTANT_PROMPT.to_string(),
        tool_declarations: vec![control_ride_declaration()],
        retry: RetryPolicy::default(),
    };
    let (mut session, mut events) = VoiceSession::new(session_config, dispatcher);
    session
        .start()
        .await
        .context("Failed to start the voice session")?;
    info!(model = %config.model, "Listening. Speak to book a ride; Ctrl+C to stop.");

    // --- 5. Relay Events Until Shutdown ---
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Shutting down gracefully...");
                session.stop();
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::StatusChanged(status) => {
                        info!(?status, "session status changed");
                        if status.is_terminal() {
                            break;
                        }
                    }
                    SessionEvent::UserTranscript(text) if !text.is_empty() => {
                        println!("you: {text}");
                    }
                    SessionEvent::AssistantTranscript(text) if !text.is_empty() => {
                        println!("assistant: {text}");
                    }
                    SessionEvent::UserTranscript(_) | SessionEvent::AssistantTranscript(_) => {}
                    SessionEvent::Error(message) => {
                        eprintln!("error: {message}");
                    }
                }
            }
        }
    }

    info!("Session has shut down.");
    Ok(())
}
