use anyhow::Result;
use clap::Parser;
use std::sync::mpsc::channel;
use std::sync::Arc;

use whisper_dictate::audio::AudioCapture;
use whisper_dictate::config::Config;
use whisper_dictate::input::{listener, HotkeySpec};
use whisper_dictate::output::{
    CommandFocus, CommandSink, FocusService, OutputDispatcher, OutputMode,
};
use whisper_dictate::session::{RecordingSession, RecordingState, SessionEvent};
use whisper_dictate::telemetry;
use whisper_dictate::transcription::{worker, LazyEngine};

#[derive(Parser, Debug)]
#[command(
    name = "whisper-dictate",
    about = "Voice-to-text dictation with a global hotkey chord"
)]
struct Cli {
    /// Output mode: type (into active window), clipboard, or both
    #[arg(short, long, value_enum)]
    mode: Option<OutputMode>,

    /// Whisper model name (tiny, base, small, medium, large)
    #[arg(long)]
    model: Option<String>,

    /// Language code (e.g. en, nl, de)
    #[arg(short, long)]
    language: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.output.mode = mode;
        }
        if let Some(model) = self.model {
            config.model.path = format!("~/.whisper-dictate/models/ggml-{model}.bin");
            config.model.name = model;
        }
        if let Some(language) = self.language {
            config.model.language = Some(language);
        }
    }
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => {
            let label = match state {
                RecordingState::Idle => "Ready",
                RecordingState::Recording => "🔴 Recording... press the chord to stop",
                RecordingState::Processing => "⏳ Transcribing...",
            };
            println!("[whisper-dictate] {label}");
        }
        SessionEvent::EmptyRecording => println!("[whisper-dictate] No audio recorded"),
        SessionEvent::NoSpeechDetected => println!("[whisper-dictate] No speech detected"),
        SessionEvent::Transcribed { text } => println!("[whisper-dictate] ✓ {text}"),
        SessionEvent::Failed { reason } => println!("[whisper-dictate] ✗ {reason}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load()?;
    cli.apply(&mut config);
    println!("✓ Config loaded from ~/.whisper-dictate.toml");

    // Initialize logging
    telemetry::init(config.telemetry.enabled, &config.telemetry.log_path)?;
    tracing::info!("whisper-dictate starting");

    // A broken chord spec is fatal; never run with a hotkey that cannot fire
    let spec = HotkeySpec::parse(&config.hotkey.chord)
        .map_err(|e| anyhow::anyhow!("invalid hotkey config: {e}"))?;
    println!(
        "✓ Hotkey chord: {} ({:?} activation)",
        config.hotkey.chord, config.hotkey.activation
    );

    // Speech engine (lazy unless preload is configured)
    let engine = Arc::new(LazyEngine::from_config(config.model.clone()));
    if config.model.preload {
        engine
            .get_or_load()
            .map_err(|e| anyhow::anyhow!("model preload failed: {e}"))?;
        println!("✓ Model preloaded: {}", config.model.name);
    }

    // Output plumbing
    let focus: Arc<dyn FocusService> = Arc::new(CommandFocus);
    let dispatcher = OutputDispatcher::new(
        Box::new(CommandSink::new(config.output.type_delay_ms)),
        Arc::clone(&focus),
        config.output.mode,
    );

    // Channels between the input, session, worker, and this loop
    let (job_tx, job_rx) = channel();
    let (outcome_tx, outcome_rx) = channel();
    let (event_tx, event_rx) = channel();
    let (command_tx, command_rx) = channel();

    let _worker = worker::spawn(
        worker::WorkerContext {
            engine,
            dispatcher,
            rules: worker::config_rules_loader(),
            recordings: config.recordings.clone(),
            sample_rate: config.audio.sample_rate,
        },
        job_rx,
        outcome_tx,
    );
    println!("✓ Transcription worker running");

    let capture = AudioCapture::new(&config.audio)?;
    println!("✓ Audio capture ready");

    let session = RecordingSession::new(
        capture,
        job_tx,
        event_tx,
        focus,
        config.model.name.clone(),
        config.model.language.clone(),
    );

    let _listener = listener::spawn(spec, config.hotkey.activation, command_tx);
    println!("✓ Key listener running");

    println!("\nWhisper Dictate is running. Press the chord to dictate.");
    println!("Press Ctrl+C to exit.\n");

    // Main event loop: all session transitions and status output happen here
    loop {
        for command in command_rx.try_iter() {
            session.handle(command);
        }
        for outcome in outcome_rx.try_iter() {
            session.complete(outcome);
        }
        for event in event_rx.try_iter() {
            report(&event);
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                println!("\nShutting down...");
                break;
            }
            () = tokio::time::sleep(tokio::time::Duration::from_millis(10)) => {
                // Poll interval (10ms to avoid busy-waiting)
            }
        }
    }

    Ok(())
}
