//! Titan-Net voice command-line host.

mod config;
mod loopback;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use titan_voice_capture::enumerate_input_devices;
use titan_voice_engine::{create_engine, EngineIo, ReceiveHandle};
use titan_voice_ipc::{command_channel, event_channel, VoiceCommand, VoiceEvent, VoiceMetrics};

use crate::config::load_config;
use crate::loopback::LoopbackTransport;

const LOOPBACK_ROOM: &str = "loopback";

/// How long to wait for the engine to confirm shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "titan-voice", version, about = "Titan-Net voice pipeline tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List audio input devices.
    Devices,

    /// Hear your own microphone through the full voice pipeline.
    Loopback {
        /// How long to run.
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// JSON configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Gate the microphone with voice activity detection.
        #[arg(long)]
        vad: bool,
    },
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "titan_voice=debug,titan_voice_engine=debug,titan_voice_capture=debug,titan_voice_playback=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Devices => list_devices(),
        Command::Loopback {
            seconds,
            config,
            vad,
        } => run_loopback(Duration::from_secs(seconds), config, vad),
    }
}

fn list_devices() -> anyhow::Result<()> {
    let devices = enumerate_input_devices().context("Failed to enumerate input devices")?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        println!(
            "{:>2}{} {} ({} ch, {} Hz)",
            device.index,
            if device.is_default { "*" } else { " " },
            device.name,
            device.channels,
            device.default_sample_rate
        );
    }
    Ok(())
}

fn run_loopback(duration: Duration, config_path: Option<PathBuf>, vad: bool) -> anyhow::Result<()> {
    let mut config = load_config(config_path.as_deref())?;
    if vad {
        config.capture.use_vad = true;
        config.validate().context("Invalid configuration")?;
    }

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let receive = ReceiveHandle::new();
    let io = EngineIo {
        receive: receive.clone(),
        ..EngineIo::system(Arc::new(LoopbackTransport::new(receive)))
    };
    let engine_thread = thread::Builder::new()
        .name("titan-voice-engine".into())
        .spawn(move || {
            info!("Engine thread starting");
            let mut engine = create_engine(command_rx, event_tx, io);
            engine.run();
            info!("Engine thread stopped");
        })
        .context("Failed to spawn engine thread")?;

    command_tx
        .send(VoiceCommand::JoinRoom {
            room_id: LOOPBACK_ROOM.into(),
            config,
        })
        .context("Engine stopped before join")?;
    command_tx
        .send(VoiceCommand::SetMicEnabled(true))
        .context("Engine stopped before mic start")?;

    println!("Speak into the microphone; looping back for {} s", duration.as_secs());

    let mut last_metrics = None;
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        match event_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => report_event(event, &mut last_metrics),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Engine exited early");
                break;
            }
        }
    }

    let _ = command_tx.send(VoiceCommand::Shutdown);
    drain_until_shutdown(&event_rx, &mut last_metrics);
    if engine_thread.join().is_err() {
        warn!("Engine thread panicked");
    }

    if let Some(metrics) = last_metrics {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    }
    Ok(())
}

fn drain_until_shutdown(event_rx: &Receiver<VoiceEvent>, last_metrics: &mut Option<VoiceMetrics>) {
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match event_rx.recv_timeout(remaining) {
            Ok(VoiceEvent::Shutdown) => return,
            Ok(event) => report_event(event, last_metrics),
            Err(_) => return,
        }
    }
}

fn report_event(event: VoiceEvent, last_metrics: &mut Option<VoiceMetrics>) {
    match event {
        VoiceEvent::StateChanged { current, .. } => info!(state = current.name(), "Voice state"),
        VoiceEvent::Metrics(metrics) => *last_metrics = Some(metrics),
        VoiceEvent::LocalSpeechStarted => println!("[speaking]"),
        VoiceEvent::LocalSpeechStopped => println!("[silent]"),
        VoiceEvent::CaptureError { message } => eprintln!("Microphone error: {}", message),
        other => info!(event = ?other, "Voice event"),
    }
}
