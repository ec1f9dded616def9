use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::{CaptureControl, CaptureError};
use crate::output::{FocusService, FocusToken};
use crate::transcription::worker::{JobOutcome, TranscriptionJob};

/// Commands produced by the input layer (chord matcher or UI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    Toggle,
}

/// Recording lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingState {
    Idle,
    Recording,
    Processing,
}

/// Session state machine errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` while not Idle
    #[error("recording already in progress")]
    AlreadyRecording,

    /// `stop()` while not Recording (includes Processing; commands arriving
    /// mid-transcription are rejected, never queued)
    #[error("no recording in progress")]
    NotRecording,

    /// Recording produced zero samples
    #[error("recording captured no audio")]
    EmptyRecording,

    /// Audio capture failed to start or finalize
    #[error("audio capture failed: {0}")]
    Capture(anyhow::Error),

    /// Transcription worker is gone
    #[error("transcription queue closed")]
    WorkerGone,
}

/// Status signals for the UI layer.
///
/// The session never exposes its lock; listeners observe transitions by
/// draining this channel on their own thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(RecordingState),
    EmptyRecording,
    NoSpeechDetected,
    Transcribed { text: String },
    Failed { reason: String },
}

struct SessionInner<C> {
    state: RecordingState,
    capture: C,
    focus_token: Option<FocusToken>,
}

enum StopAction {
    Dispatch(TranscriptionJob),
    Empty,
    Failed(anyhow::Error),
}

/// Owns the Idle/Recording/Processing lifecycle.
///
/// The only component allowed to start or stop audio capture. All mutable
/// session state lives behind one mutex, so `start()`/`stop()` racing from
/// different threads serialize: exactly one caller wins any transition.
pub struct RecordingSession<C> {
    inner: Mutex<SessionInner<C>>,
    jobs: Sender<TranscriptionJob>,
    events: Sender<SessionEvent>,
    focus: Arc<dyn FocusService>,
    model: String,
    language: Option<String>,
}

impl<C: CaptureControl> RecordingSession<C> {
    pub fn new(
        capture: C,
        jobs: Sender<TranscriptionJob>,
        events: Sender<SessionEvent>,
        focus: Arc<dyn FocusService>,
        model: String,
        language: Option<String>,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: RecordingState::Idle,
                capture,
                focus_token: None,
            }),
            jobs,
            events,
            focus,
            model,
            language,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, SessionInner<C>> {
        // A panic while holding the lock leaves plain data; recover it
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("session event receiver dropped");
        }
    }

    /// Current state (for status display; may be stale by the time it is read)
    pub fn state(&self) -> RecordingState {
        self.lock_inner().state
    }

    /// Begin a recording session.
    ///
    /// Captures the focus token before anything user-visible changes, then
    /// starts audio capture.
    ///
    /// # Errors
    /// `AlreadyRecording` unless the session is Idle; `Capture` if the
    /// stream fails to start (state stays Idle).
    pub fn start(&self) -> Result<(), SessionError> {
        // Focus is read before taking the lock: it must predate any UI
        // mutation triggered by the state change
        let focus_token = self.focus.focused_window();

        {
            let mut inner = self.lock_inner();
            if inner.state != RecordingState::Idle {
                return Err(SessionError::AlreadyRecording);
            }

            inner.capture.start().map_err(SessionError::Capture)?;
            inner.state = RecordingState::Recording;
            inner.focus_token = focus_token;
        }

        info!("recording started");
        self.emit(SessionEvent::StateChanged(RecordingState::Recording));
        Ok(())
    }

    /// End the recording session and hand the snapshot to the worker.
    ///
    /// # Errors
    /// `NotRecording` unless the session is Recording — a `stop()` arriving
    /// while Processing is rejected, not queued. `EmptyRecording` if no
    /// audio was captured (session returns to Idle).
    pub fn stop(&self) -> Result<(), SessionError> {
        let action = {
            let mut inner = self.lock_inner();
            if inner.state != RecordingState::Recording {
                return Err(SessionError::NotRecording);
            }

            inner.state = RecordingState::Processing;
            match inner.capture.finalize() {
                Ok(samples) => StopAction::Dispatch(TranscriptionJob {
                    samples,
                    model: self.model.clone(),
                    language: self.language.clone(),
                    focus: inner.focus_token.take(),
                }),
                Err(CaptureError::Empty) => {
                    inner.state = RecordingState::Idle;
                    inner.focus_token = None;
                    StopAction::Empty
                }
                Err(CaptureError::Stream(e)) => {
                    inner.state = RecordingState::Idle;
                    inner.focus_token = None;
                    StopAction::Failed(e)
                }
            }
        };

        match action {
            StopAction::Dispatch(job) => {
                info!(samples = job.samples.len(), "snapshot handed to worker");
                self.emit(SessionEvent::StateChanged(RecordingState::Processing));
                if self.jobs.send(job).is_err() {
                    warn!("transcription worker is gone, aborting session");
                    self.lock_inner().state = RecordingState::Idle;
                    self.emit(SessionEvent::Failed {
                        reason: "transcription worker unavailable".to_owned(),
                    });
                    self.emit(SessionEvent::StateChanged(RecordingState::Idle));
                    return Err(SessionError::WorkerGone);
                }
                Ok(())
            }
            StopAction::Empty => {
                info!("recording stopped with no audio");
                self.emit(SessionEvent::EmptyRecording);
                self.emit(SessionEvent::StateChanged(RecordingState::Idle));
                Err(SessionError::EmptyRecording)
            }
            StopAction::Failed(e) => {
                warn!("capture finalize failed: {}", e);
                self.emit(SessionEvent::Failed {
                    reason: e.to_string(),
                });
                self.emit(SessionEvent::StateChanged(RecordingState::Idle));
                Err(SessionError::Capture(e))
            }
        }
    }

    /// Flip between Idle and Recording (toggle activation mode).
    ///
    /// # Errors
    /// `NotRecording` while Processing: activations during an in-flight
    /// transcription are rejected, not queued.
    pub fn toggle(&self) -> Result<(), SessionError> {
        match self.state() {
            RecordingState::Idle => self.start(),
            RecordingState::Recording => self.stop(),
            RecordingState::Processing => {
                debug!("toggle ignored while transcription in flight");
                Err(SessionError::NotRecording)
            }
        }
    }

    /// Apply a command from the input layer, logging rejections.
    pub fn handle(&self, command: SessionCommand) {
        let result = match command {
            SessionCommand::Start => self.start(),
            SessionCommand::Stop => self.stop(),
            SessionCommand::Toggle => self.toggle(),
        };
        if let Err(e) = result {
            debug!(?command, "command rejected: {}", e);
        }
    }

    /// Record the worker's outcome for the in-flight job: Processing → Idle.
    pub fn complete(&self, outcome: JobOutcome) {
        {
            let mut inner = self.lock_inner();
            if inner.state != RecordingState::Processing {
                warn!(state = ?inner.state, "job outcome arrived outside Processing");
                return;
            }
            inner.state = RecordingState::Idle;
        }

        let event = match outcome {
            JobOutcome::Transcribed { text } => SessionEvent::Transcribed { text },
            JobOutcome::NoSpeech => SessionEvent::NoSpeechDetected,
            JobOutcome::Failed { reason } => SessionEvent::Failed { reason },
        };
        self.emit(event);
        self.emit(SessionEvent::StateChanged(RecordingState::Idle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::MockCaptureControl;
    use crate::output::MockFocusService;
    use std::sync::mpsc::{channel, Receiver};

    struct Harness {
        session: RecordingSession<MockCaptureControl>,
        jobs: Receiver<TranscriptionJob>,
        events: Receiver<SessionEvent>,
    }

    fn harness(capture: MockCaptureControl, focus: MockFocusService) -> Harness {
        let (job_tx, job_rx) = channel();
        let (event_tx, event_rx) = channel();
        let session = RecordingSession::new(
            capture,
            job_tx,
            event_tx,
            Arc::new(focus),
            "base".to_owned(),
            Some("en".to_owned()),
        );
        Harness {
            session,
            jobs: job_rx,
            events: event_rx,
        }
    }

    fn focus_with_token(token: &'static str) -> MockFocusService {
        let mut focus = MockFocusService::new();
        focus
            .expect_focused_window()
            .returning(move || Some(FocusToken::new(token)));
        focus
    }

    fn recording_capture(samples: Vec<f32>) -> MockCaptureControl {
        let mut capture = MockCaptureControl::new();
        capture.expect_start().returning(|| Ok(()));
        capture
            .expect_finalize()
            .returning(move || Ok(samples.clone()));
        capture
    }

    #[test]
    fn test_start_transitions_to_recording() {
        let h = harness(recording_capture(vec![0.1; 16]), focus_with_token("42"));

        h.session.start().unwrap();
        assert_eq!(h.session.state(), RecordingState::Recording);
        assert_eq!(
            h.events.try_recv().unwrap(),
            SessionEvent::StateChanged(RecordingState::Recording)
        );
    }

    #[test]
    fn test_second_start_rejected() {
        let h = harness(recording_capture(vec![0.1; 16]), focus_with_token("42"));

        h.session.start().unwrap();
        assert!(matches!(
            h.session.start(),
            Err(SessionError::AlreadyRecording)
        ));
        assert_eq!(h.session.state(), RecordingState::Recording);
    }

    #[test]
    fn test_stop_without_start_rejected() {
        let capture = MockCaptureControl::new();
        let h = harness(capture, MockFocusService::new());

        assert!(matches!(h.session.stop(), Err(SessionError::NotRecording)));
        assert_eq!(h.session.state(), RecordingState::Idle);
    }

    #[test]
    fn test_stop_dispatches_job_with_focus_token() {
        let h = harness(recording_capture(vec![0.25; 32]), focus_with_token("99"));

        h.session.start().unwrap();
        h.session.stop().unwrap();

        assert_eq!(h.session.state(), RecordingState::Processing);
        let job = h.jobs.try_recv().unwrap();
        assert_eq!(job.samples.len(), 32);
        assert_eq!(job.model, "base");
        assert_eq!(job.language.as_deref(), Some("en"));
        assert_eq!(job.focus, Some(FocusToken::new("99")));
    }

    #[test]
    fn test_stop_while_processing_rejected() {
        let h = harness(recording_capture(vec![0.25; 32]), focus_with_token("99"));

        h.session.start().unwrap();
        h.session.stop().unwrap();

        // In-flight job: further stops are rejected, not queued
        assert!(matches!(h.session.stop(), Err(SessionError::NotRecording)));
        assert!(matches!(
            h.session.start(),
            Err(SessionError::AlreadyRecording)
        ));
        assert_eq!(h.jobs.try_iter().count(), 0);
    }

    #[test]
    fn test_empty_recording_aborts_to_idle() {
        let mut capture = MockCaptureControl::new();
        capture.expect_start().returning(|| Ok(()));
        capture
            .expect_finalize()
            .returning(|| Err(CaptureError::Empty));
        let h = harness(capture, focus_with_token("42"));

        h.session.start().unwrap();
        let _ = h.events.try_recv();

        assert!(matches!(
            h.session.stop(),
            Err(SessionError::EmptyRecording)
        ));
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert_eq!(h.events.try_recv().unwrap(), SessionEvent::EmptyRecording);
        assert_eq!(
            h.events.try_recv().unwrap(),
            SessionEvent::StateChanged(RecordingState::Idle)
        );
        assert_eq!(h.jobs.try_iter().count(), 0);
    }

    #[test]
    fn test_capture_start_failure_stays_idle() {
        let mut capture = MockCaptureControl::new();
        capture
            .expect_start()
            .returning(|| Err(anyhow::anyhow!("device gone")));
        let h = harness(capture, focus_with_token("42"));

        assert!(matches!(h.session.start(), Err(SessionError::Capture(_))));
        assert_eq!(h.session.state(), RecordingState::Idle);
    }

    #[test]
    fn test_complete_returns_to_idle() {
        let h = harness(recording_capture(vec![0.25; 32]), focus_with_token("99"));

        h.session.start().unwrap();
        h.session.stop().unwrap();
        h.events.try_iter().count();

        h.session.complete(JobOutcome::Transcribed {
            text: "hello".to_owned(),
        });
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert_eq!(
            h.events.try_recv().unwrap(),
            SessionEvent::Transcribed {
                text: "hello".to_owned()
            }
        );
        assert_eq!(
            h.events.try_recv().unwrap(),
            SessionEvent::StateChanged(RecordingState::Idle)
        );

        // A fresh session can start again
        h.session.start().unwrap();
        assert_eq!(h.session.state(), RecordingState::Recording);
    }

    #[test]
    fn test_complete_outside_processing_is_ignored() {
        let capture = MockCaptureControl::new();
        let h = harness(capture, MockFocusService::new());

        h.session.complete(JobOutcome::NoSpeech);
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert_eq!(h.events.try_iter().count(), 0);
    }

    #[test]
    fn test_toggle_cycles_states() {
        let h = harness(recording_capture(vec![0.25; 32]), focus_with_token("99"));

        h.session.toggle().unwrap();
        assert_eq!(h.session.state(), RecordingState::Recording);

        h.session.toggle().unwrap();
        assert_eq!(h.session.state(), RecordingState::Processing);

        // Toggle during Processing is debounced
        assert!(matches!(
            h.session.toggle(),
            Err(SessionError::NotRecording)
        ));

        h.session.complete(JobOutcome::NoSpeech);
        h.session.toggle().unwrap();
        assert_eq!(h.session.state(), RecordingState::Recording);
    }

    #[test]
    fn test_no_speech_outcome_event() {
        let h = harness(recording_capture(vec![0.25; 32]), focus_with_token("99"));

        h.session.start().unwrap();
        h.session.stop().unwrap();
        h.events.try_iter().count();

        h.session.complete(JobOutcome::NoSpeech);
        assert_eq!(h.events.try_recv().unwrap(), SessionEvent::NoSpeechDetected);
    }

    // Hand-rolled capture for cross-thread tests (mock objects are not
    // meant to be shared between threads mid-expectation)
    struct FakeCapture;

    impl CaptureControl for FakeCapture {
        fn start(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn finalize(&mut self) -> Result<Vec<f32>, CaptureError> {
            Ok(vec![0.5; 16])
        }
    }

    #[test]
    fn test_concurrent_stops_exactly_one_wins() {
        let (job_tx, job_rx) = channel();
        let (event_tx, _event_rx) = channel();
        let mut focus = MockFocusService::new();
        focus.expect_focused_window().returning(|| None);

        let session = Arc::new(RecordingSession::new(
            FakeCapture,
            job_tx,
            event_tx,
            Arc::new(focus),
            "base".to_owned(),
            None,
        ));
        session.start().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || session.stop().is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(job_rx.try_iter().count(), 1);
        assert_eq!(session.state(), RecordingState::Processing);
    }

    #[test]
    fn test_concurrent_starts_exactly_one_wins() {
        let (job_tx, _job_rx) = channel();
        let (event_tx, _event_rx) = channel();
        let mut focus = MockFocusService::new();
        focus.expect_focused_window().returning(|| None);

        let session = Arc::new(RecordingSession::new(
            FakeCapture,
            job_tx,
            event_tx,
            Arc::new(focus),
            "base".to_owned(),
            None,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || session.start().is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(session.state(), RecordingState::Recording);
    }
}
