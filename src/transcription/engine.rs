use anyhow::Context;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::{Config, ModelConfig};
use crate::transcription::download::ensure_model_downloaded;

/// Errors that can occur during transcription
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Failed to load the speech model
    #[error("failed to load model {name}: {source}")]
    ModelLoad {
        /// Configured model name
        name: String,
        /// Underlying error
        source: anyhow::Error,
    },

    /// Failed to create Whisper inference state
    #[error("failed to create whisper state")]
    StateCreation,

    /// Transcription inference failed
    #[error("failed to transcribe audio")]
    Transcription(#[from] anyhow::Error),
}

/// Speech-to-text engine (external collaborator, consumed as a black box).
///
/// Abstracting the engine behind this trait lets the worker pipeline run
/// against a mock in tests; production uses [`WhisperEngine`].
#[cfg_attr(test, mockall::automock)]
pub trait SpeechEngine: Send + Sync {
    /// Transcribe mono float samples to text
    ///
    /// # Errors
    /// Returns error if inference fails.
    fn transcribe(
        &self,
        samples: &[f32],
        language: Option<String>,
    ) -> Result<String, TranscriptionError>;
}

/// Whisper-backed speech engine
pub struct WhisperEngine {
    /// Whisper context (thread-safe behind the mutex)
    ctx: Arc<Mutex<WhisperContext>>,
    /// Number of CPU threads for inference
    threads: i32,
    /// Beam search width
    beam_size: i32,
}

impl WhisperEngine {
    /// Determines sampling strategy based on beam size (pure, testable)
    const fn get_sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }

    /// Creates a new engine by loading the model from the given path
    ///
    /// # Errors
    /// Returns error if the model file is missing or invalid, or if
    /// `threads`/`beam_size` are zero or exceed `i32::MAX`
    pub fn new(
        model_name: &str,
        model_path: &Path,
        threads: usize,
        beam_size: usize,
    ) -> Result<Self, TranscriptionError> {
        let load_error = |source: anyhow::Error| TranscriptionError::ModelLoad {
            name: model_name.to_owned(),
            source,
        };

        if threads == 0 {
            return Err(load_error(anyhow::anyhow!("threads must be > 0")));
        }
        if beam_size == 0 {
            return Err(load_error(anyhow::anyhow!("beam_size must be > 0")));
        }

        // whisper-rs wants i32; reject out-of-range config up front
        let threads_i32 = i32::try_from(threads)
            .map_err(|_| load_error(anyhow::anyhow!("threads value too large (max: {})", i32::MAX)))?;
        let beam_size_i32 = i32::try_from(beam_size).map_err(|_| {
            load_error(anyhow::anyhow!("beam_size value too large (max: {})", i32::MAX))
        })?;

        tracing::info!(
            model = model_name,
            path = %model_path.display(),
            threads = threads,
            beam_size = beam_size,
            "loading whisper model"
        );

        let path_str = model_path
            .to_str()
            .ok_or_else(|| load_error(anyhow::anyhow!("model path contains invalid UTF-8")))?;

        let params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(path_str, params)
            .map_err(|e| load_error(anyhow::anyhow!("{e:?}")))?;

        tracing::info!("whisper model loaded successfully");

        Ok(Self {
            ctx: Arc::new(Mutex::new(ctx)),
            threads: threads_i32,
            beam_size: beam_size_i32,
        })
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(
        &self,
        samples: &[f32],
        language: Option<String>,
    ) -> Result<String, TranscriptionError> {
        let _span = tracing::debug_span!("transcription", samples = samples.len()).entered();
        tracing::debug!("starting transcription");

        let mut state = self
            .ctx
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {e}"))?
            .create_state()
            .map_err(|_| TranscriptionError::StateCreation)?;

        let strategy = Self::get_sampling_strategy(self.beam_size);
        let mut params = FullParams::new(strategy);
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(language.as_deref()); // configured language or auto-detect
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, samples)
            .context("whisper inference failed")?;
        let inference_duration = start.elapsed();

        let mut result = String::new();
        for segment in state.as_iter() {
            result.push_str(&segment.to_string());
        }

        let result = result.trim().to_owned();

        tracing::info!(
            segments = state.full_n_segments(),
            text_len = result.len(),
            inference_ms = inference_duration.as_millis(),
            "transcription completed"
        );

        Ok(result)
    }
}

// SAFETY: WhisperEngine is thread-safe because:
// 1. WhisperContext is wrapped in Arc<Mutex<>>, ensuring exclusive access
// 2. All methods require acquiring the mutex lock before accessing the context
// 3. No shared mutable state exists outside the mutex
#[allow(unsafe_code)]
unsafe impl Send for WhisperEngine {}
#[allow(unsafe_code)]
unsafe impl Sync for WhisperEngine {}

/// Shared handle to a loaded engine
pub type SharedEngine = Arc<dyn SpeechEngine>;

/// Loader invoked on first use
pub type EngineLoader =
    Box<dyn Fn() -> Result<SharedEngine, TranscriptionError> + Send + Sync>;

/// Lazy, load-once engine holder.
///
/// The slot mutex is held for the whole load: of two concurrent
/// first-callers exactly one performs the load while the other blocks and
/// then receives the same engine. A failed load leaves the slot empty so
/// the next recording session retries.
pub struct LazyEngine {
    slot: Mutex<Option<SharedEngine>>,
    loader: EngineLoader,
}

impl LazyEngine {
    /// Engine loader for the configured whisper model, downloading the
    /// model file first when it is missing.
    #[must_use]
    pub fn from_config(model: ModelConfig) -> Self {
        let loader: EngineLoader = Box::new(move || {
            let path =
                Config::expand_path(&model.path).map_err(|source| TranscriptionError::ModelLoad {
                    name: model.name.clone(),
                    source,
                })?;

            ensure_model_downloaded(&model.name, &path).map_err(|source| {
                TranscriptionError::ModelLoad {
                    name: model.name.clone(),
                    source,
                }
            })?;

            let engine = WhisperEngine::new(&model.name, &path, model.threads, model.beam_size)?;
            Ok(Arc::new(engine) as SharedEngine)
        });
        Self::with_loader(loader)
    }

    /// Build from an arbitrary loader (used by tests)
    #[must_use]
    pub fn with_loader(loader: EngineLoader) -> Self {
        Self {
            slot: Mutex::new(None),
            loader,
        }
    }

    /// Return the loaded engine, loading it on first call.
    ///
    /// # Errors
    /// Returns the loader's error; the slot stays empty and a later call
    /// retries the load.
    pub fn get_or_load(&self) -> Result<SharedEngine, TranscriptionError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| anyhow::anyhow!("engine slot lock poisoned: {e}"))?;

        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }

        let engine = (self.loader)()?;
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Whether the engine has been loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_model_load_nonexistent_path() {
        let nonexistent_path = Path::new("/tmp/nonexistent_model.bin");
        let result = WhisperEngine::new("tiny", nonexistent_path, 4, 5);

        assert!(matches!(
            result,
            Err(TranscriptionError::ModelLoad { .. })
        ));
    }

    #[test]
    fn test_new_with_zero_threads() {
        let path = Path::new("/tmp/dummy.bin");
        let result = WhisperEngine::new("tiny", path, 0, 5);
        if let Err(TranscriptionError::ModelLoad { source, .. }) = result {
            assert!(source.to_string().contains("threads must be > 0"));
        } else {
            panic!("expected ModelLoad error");
        }
    }

    #[test]
    fn test_new_with_zero_beam_size() {
        let path = Path::new("/tmp/dummy.bin");
        let result = WhisperEngine::new("tiny", path, 4, 0);
        if let Err(TranscriptionError::ModelLoad { source, .. }) = result {
            assert!(source.to_string().contains("beam_size must be > 0"));
        } else {
            panic!("expected ModelLoad error");
        }
    }

    #[test]
    fn test_get_sampling_strategy_greedy() {
        let strategy = WhisperEngine::get_sampling_strategy(1);
        assert!(matches!(strategy, SamplingStrategy::Greedy { best_of: 1 }));
    }

    #[test]
    fn test_get_sampling_strategy_beam_search() {
        let strategy = WhisperEngine::get_sampling_strategy(5);
        assert!(matches!(
            strategy,
            SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: -1.0
            }
        ));
    }

    #[test]
    fn test_get_sampling_strategy_boundary() {
        assert!(matches!(
            WhisperEngine::get_sampling_strategy(1),
            SamplingStrategy::Greedy { .. }
        ));
        assert!(matches!(
            WhisperEngine::get_sampling_strategy(2),
            SamplingStrategy::BeamSearch { .. }
        ));
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<WhisperEngine>();
        assert_sync::<WhisperEngine>();
        assert_send::<LazyEngine>();
        assert_sync::<LazyEngine>();
    }

    fn counting_loader(counter: Arc<AtomicUsize>) -> EngineLoader {
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut mock = MockSpeechEngine::new();
            mock.expect_transcribe()
                .returning(|_, _| Ok("hello".to_owned()));
            Ok(Arc::new(mock) as SharedEngine)
        })
    }

    #[test]
    fn test_lazy_engine_loads_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let lazy = LazyEngine::with_loader(counting_loader(Arc::clone(&counter)));

        assert!(!lazy.is_loaded());
        let first = lazy.get_or_load().unwrap();
        let second = lazy.get_or_load().unwrap();

        assert!(lazy.is_loaded());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_lazy_engine_concurrent_first_callers_share_one_load() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let lazy = Arc::new(LazyEngine::with_loader(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            // Slow load so both threads race into get_or_load
            std::thread::sleep(Duration::from_millis(100));
            let mut mock = MockSpeechEngine::new();
            mock.expect_transcribe()
                .returning(|_, _| Ok("hello".to_owned()));
            Ok(Arc::new(mock) as SharedEngine)
        })));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lazy = Arc::clone(&lazy);
                std::thread::spawn(move || lazy.get_or_load().map(|e| Arc::as_ptr(&e).cast::<()>() as usize))
            })
            .collect();

        let pointers: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        // Exactly one load ran; every caller got the same engine
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_lazy_engine_failed_load_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let lazy = LazyEngine::with_loader(Box::new(move || {
            if counter_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TranscriptionError::ModelLoad {
                    name: "tiny".to_owned(),
                    source: anyhow::anyhow!("disk on fire"),
                })
            } else {
                let mut mock = MockSpeechEngine::new();
                mock.expect_transcribe()
                    .returning(|_, _| Ok("hello".to_owned()));
                Ok(Arc::new(mock) as SharedEngine)
            }
        }));

        assert!(lazy.get_or_load().is_err());
        assert!(!lazy.is_loaded());

        assert!(lazy.get_or_load().is_ok());
        assert!(lazy.is_loaded());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[ignore = "requires actual model file"]
    fn test_transcribe_silence() {
        let home = std::env::var("HOME").unwrap();
        let model_path = std::path::PathBuf::from(home)
            .join(".whisper-dictate")
            .join("models")
            .join("ggml-tiny.bin");
        if !model_path.exists() {
            return;
        }

        let engine = WhisperEngine::new("tiny", &model_path, 4, 5).unwrap();

        // 1 second of silence (16kHz)
        let silence: Vec<f32> = vec![0.0; 16000];

        let result = engine.transcribe(&silence, Some("en".to_owned())).unwrap();
        assert!(result.is_empty() || result.len() < 50);
    }
}
