//! Live call against a running backend.
//!
//! Demonstrates:
//! - Building a session and connecting as agent or prospect
//! - Receiving server events through callbacks
//! - Streaming a synthetic 440 Hz tone as 20ms audio frames
//! - Sending an agent note and requesting a report
//! - Graceful disconnect on Ctrl+C
//!
//! Usage:
//!   cargo run --example live_call -- <base-url> <session-id> <token>
//!   cargo run --example live_call -- http://localhost:8000 call-1 dev-token --prospect
//!   cargo run --example live_call -- ... --debug

// ============================================================================
// Imports
// ============================================================================

use std::f32::consts::TAU;
use std::time::Duration;

use anyhow::{Context, bail};
use outlet_realtime::{
    CallSession, ClientMessage, ConnectionState, Role, SessionCallbacks, StreamType,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const SAMPLE_RATE: u32 = 16_000;
const FRAME_MS: u64 = 20;
const TONE_HZ: f32 = 440.0;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    base_url: String,
    session_id: String,
    token: String,
    role: Role,
    debug: bool,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

        let [base_url, session_id, token] = positional.as_slice() else {
            bail!("usage: live_call <base-url> <session-id> <token> [--prospect] [--debug]");
        };

        Ok(Self {
            base_url: base_url.to_string(),
            session_id: session_id.to_string(),
            token: token.to_string(),
            role: if args.iter().any(|a| a == "--prospect") {
                Role::Prospect
            } else {
                Role::Agent
            },
            debug: args.iter().any(|a| a == "--debug"),
        })
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;
    init_logging(args.debug);

    let (session, events) = CallSession::builder()
        .base_url(&args.base_url)
        .build()
        .context("invalid session settings")?;

    let callbacks = SessionCallbacks::new()
        .on_connected(|| println!("[Session] Connected"))
        .on_disconnected(|| println!("[Session] Disconnected"))
        .on_reconnecting(|attempt, _| println!("[Session] Reconnecting (attempt {attempt})"))
        .on_transcript(|t| println!("[Transcript] {}: {}", t.speaker, t.text))
        .on_blocker(|b| println!("[Blocker] {:?} {}: {}", b.severity, b.blocker_type, b.description))
        .on_suggestion(|s| println!("[Suggestion] {:?} {}", s.priority, s.title))
        .on_phase_change(|p| println!("[Phase] {}", p.current_phase))
        .on_qualification_update(|q| println!("[Qualification] {q:?}"))
        .on_error(|e| println!("[Error] {}: {}", e.code, e.message));
    let dispatcher = callbacks.spawn(events);

    session.connect(args.session_id.as_str(), args.role, args.token.as_str());
    session.send(ClientMessage::agent_note("Demo call started"));

    println!("Streaming tone, press Ctrl+C to stop...");
    tokio::select! {
        () = stream_tone(&session) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    if session.state() == ConnectionState::Connected {
        session.send(ClientMessage::generate_report("pdf"));
    }
    session.disconnect();
    drop(session);

    dispatcher.await.context("event dispatcher panicked")?;
    println!("Done");
    Ok(())
}

// ============================================================================
// Functions
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug {
        "outlet_realtime=debug"
    } else {
        "outlet_realtime=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Sends one frame every 20ms. Frames sent while offline are dropped by
/// the session.
async fn stream_tone(session: &CallSession) {
    let samples_per_frame = (SAMPLE_RATE as u64 * FRAME_MS / 1_000) as usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS));
    let mut phase = 0.0_f32;
    let step = TAU * TONE_HZ / SAMPLE_RATE as f32;

    loop {
        ticker.tick().await;

        let frame: Vec<i16> = (0..samples_per_frame)
            .map(|_| {
                let sample = phase.sin() * f32::from(i16::MAX) * 0.2;
                phase = (phase + step) % TAU;
                sample as i16
            })
            .collect();

        session.send_audio_frame(StreamType::Agent, &frame);
    }
}
