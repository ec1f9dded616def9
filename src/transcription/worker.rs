use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use crate::config::{Config, RecordingConfig, ReplacementRule};
use crate::output::{FocusToken, OutputDispatcher};
use crate::recordings;
use crate::replace;
use crate::transcription::engine::LazyEngine;

/// One unit of work: the frozen snapshot plus everything needed to finish
/// the dictation. Created once per stop, consumed exactly once.
#[derive(Debug)]
pub struct TranscriptionJob {
    /// Finalized mono samples at the configured rate
    pub samples: Vec<f32>,
    /// Model name (for logging; the worker owns the engine handle)
    pub model: String,
    /// Language code, or None for auto-detect
    pub language: Option<String>,
    /// Window to restore before text injection
    pub focus: Option<FocusToken>,
}

/// Terminal result of a job, reported back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Final post-processed text was dispatched
    Transcribed { text: String },
    /// Engine produced empty or whitespace-only text
    NoSpeech,
    /// Any stage failed; the session aborts to Idle
    Failed { reason: String },
}

/// Per-job reload of the replacement rules
pub type RulesLoader = Box<dyn Fn() -> Vec<ReplacementRule> + Send>;

/// Everything the worker thread owns.
pub struct WorkerContext {
    pub engine: Arc<LazyEngine>,
    pub dispatcher: OutputDispatcher,
    pub rules: RulesLoader,
    pub recordings: RecordingConfig,
    /// Snapshot sample rate, for debug WAV headers
    pub sample_rate: u32,
}

/// Rules loader backed by the config file.
///
/// Reload happens once per transcription, so rule edits take effect on the
/// next dictation. A load failure must not discard the transcription, so it
/// degrades to an empty rule set.
#[must_use]
pub fn config_rules_loader() -> RulesLoader {
    Box::new(|| match Config::load_replacements() {
        Ok(rules) => rules,
        Err(e) => {
            warn!("failed to reload replacement rules: {}", e);
            Vec::new()
        }
    })
}

/// Start the worker thread.
///
/// Jobs are consumed until the sender side hangs up; every job reduces to a
/// [`JobOutcome`] on the outcome channel — no panic crosses this boundary.
pub fn spawn(
    ctx: WorkerContext,
    jobs: Receiver<TranscriptionJob>,
    outcomes: Sender<JobOutcome>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!("transcription worker started");
        for job in jobs {
            let outcome = run_job(&ctx, job);
            if outcomes.send(outcome).is_err() {
                warn!("outcome receiver dropped, stopping worker");
                break;
            }
        }
        info!("transcription worker stopped");
    })
}

/// Run one job through the pipeline: load → transcribe → replace → dispatch.
pub fn run_job(ctx: &WorkerContext, job: TranscriptionJob) -> JobOutcome {
    let _span =
        tracing::info_span!("transcription_job", model = %job.model, samples = job.samples.len())
            .entered();

    // Lazy, guarded load; a failure here is retried on the next session
    let engine = match ctx.engine.get_or_load() {
        Ok(engine) => engine,
        Err(e) => {
            warn!("model load failed: {}", e);
            return JobOutcome::Failed {
                reason: format!("model load failed: {e}"),
            };
        }
    };

    let raw = match engine.transcribe(&job.samples, job.language.clone()) {
        Ok(text) => text,
        Err(e) => {
            warn!("transcription failed: {}", e);
            return JobOutcome::Failed {
                reason: format!("transcription failed: {e}"),
            };
        }
    };

    if raw.trim().is_empty() {
        info!("no speech detected");
        return JobOutcome::NoSpeech;
    }

    let rules = (ctx.rules)();
    let text = replace::apply_replacements(&raw, &rules);
    info!(
        raw_len = raw.len(),
        final_len = text.len(),
        rules = rules.len(),
        "replacement rules applied"
    );

    if ctx.recordings.enabled {
        match recordings::save_snapshot(&job.samples, ctx.sample_rate) {
            Ok(_) => {
                if let Err(e) = recordings::cleanup_old_recordings(&ctx.recordings) {
                    warn!("recording cleanup failed: {}", e);
                }
            }
            Err(e) => warn!("failed to save recording: {}", e),
        }
    }

    ctx.dispatcher.dispatch(&text, job.focus);

    JobOutcome::Transcribed { text }
}
