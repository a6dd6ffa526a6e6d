//! # Analysis Coordinator
//!
//! Drives the fast and deep passes for each track and notifies subscribers.
//!
//! A fast pass runs as soon as it is submitted and returns its result to the
//! caller. Its deep follow-up is queued on a single background task, so deep
//! passes run one at a time in submission order. For any track, `FAST_DONE`
//! is always delivered before `DEEP_DONE`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dj_analyzer::audio::FileBufferLoader;
//! use dj_analyzer::coordinator::{AnalysisCoordinator, CoordinatorConfig, FastOutcome};
//! use dj_analyzer::rules::{ConfigStore, GenreRuleSet};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let coordinator = AnalysisCoordinator::new(
//!     Arc::new(FileBufferLoader::new()),
//!     Arc::new(ConfigStore::in_memory()),
//!     Arc::new(GenreRuleSet::builtin()?),
//!     CoordinatorConfig::default(),
//! );
//!
//! coordinator.subscribe("song.wav", |event| println!("{}", event.to_json()));
//! if let FastOutcome::Completed(result) = coordinator.submit_fast("song.wav", Some("House")).await? {
//!     println!("{:?} BPM", result.bpm);
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    analysis::{DeepScanAnalyzer, FastResult, FastScanAnalyzer},
    audio::{BufferLoader, SampleBuffer},
    error::{AnalysisError, AnalyzerError, AudioError, Result},
    rules::{AnalyzerSettings, ConfigStore, GenreRuleSet, GenreRules, SettingsOverride},
};

pub use events::{AnalysisEvent, EventHandler, SubscriptionId};
use events::Subscribers;

/// Timing knobs of the coordinator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorConfig {
    /// Upper bound on decoding a track
    pub load_timeout: Duration,
    /// Pause between two deep tasks
    pub deep_task_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(20),
            deep_task_delay: Duration::from_millis(100),
        }
    }
}

/// A request to analyze one track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisRequest {
    pub track_id: String,
    pub genre: Option<String>,
    /// Release year, used to pick era overrides
    pub year: Option<i32>,
    /// Settings applied on top of the resolved configuration
    pub overrides: SettingsOverride,
}

impl AnalysisRequest {
    pub fn new<S: Into<String>>(track_id: S) -> Self {
        Self {
            track_id: track_id.into(),
            ..Default::default()
        }
    }

    pub fn with_genre<S: Into<String>>(mut self, genre: S) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_overrides(mut self, overrides: SettingsOverride) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Outcome of a fast-pass submission
#[derive(Debug, Clone, PartialEq)]
pub enum FastOutcome {
    Completed(FastResult),
    /// A fast pass for this track is still in flight
    AlreadyRunning,
}

struct DeepTask {
    request: AnalysisRequest,
    fast: FastResult,
    buffer: Option<Arc<SampleBuffer>>,
}

/// State shared with the deep worker
struct Shared {
    loader: Arc<dyn BufferLoader>,
    store: Arc<ConfigStore>,
    rules: Arc<GenreRuleSet>,
    subscribers: Subscribers,
    pending: Mutex<HashSet<String>>,
    load_timeout: Duration,
}

impl Shared {
    fn resolve(&self, request: &AnalysisRequest) -> Result<(AnalyzerSettings, GenreRules)> {
        let settings = self
            .store
            .get_config_for_genre(request.genre.as_deref(), request.year)
            .with_override(&request.overrides)?;
        let rules = self.rules.rules_for_genre(request.genre.as_deref());
        Ok((settings, rules))
    }

    /// Decode a track on the blocking pool, bounded by the load timeout
    async fn load_buffer(&self, track_id: &str) -> Result<Arc<SampleBuffer>> {
        // Let already-queued work run before occupying a blocking thread
        tokio::task::yield_now().await;

        let loader = Arc::clone(&self.loader);
        let id = track_id.to_string();
        let handle = tokio::task::spawn_blocking(move || loader.load(&id));

        match tokio::time::timeout(self.load_timeout, handle).await {
            Ok(Ok(loaded)) => Ok(Arc::new(loaded?)),
            Ok(Err(join_error)) => Err(AudioError::LoadFailed {
                track_id: track_id.to_string(),
                reason: join_error.to_string(),
            }
            .into()),
            Err(_) => Err(AudioError::LoadTimeout {
                track_id: track_id.to_string(),
                seconds: self.load_timeout.as_secs(),
            }
            .into()),
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a track from the in-flight set when the fast pass ends
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    track_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, track_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(track_id.to_string());
        inserted.then(|| Self {
            set,
            track_id: track_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.track_id);
    }
}

/// Runs fast passes on demand and deep passes from a FIFO queue
///
/// Must be created inside a tokio runtime. Dropping the coordinator closes
/// the queue; the worker finishes what is already queued and exits.
pub struct AnalysisCoordinator {
    shared: Arc<Shared>,
    in_flight: Mutex<HashSet<String>>,
    deep_tx: mpsc::UnboundedSender<DeepTask>,
    _worker: JoinHandle<()>,
}

impl AnalysisCoordinator {
    pub fn new(
        loader: Arc<dyn BufferLoader>,
        store: Arc<ConfigStore>,
        rules: Arc<GenreRuleSet>,
        config: CoordinatorConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            loader,
            store,
            rules,
            subscribers: Subscribers::default(),
            pending: Mutex::new(HashSet::new()),
            load_timeout: config.load_timeout,
        });

        let (deep_tx, deep_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deep_worker(Arc::clone(&shared), deep_rx, config.deep_task_delay));

        Self {
            shared,
            in_flight: Mutex::new(HashSet::new()),
            deep_tx,
            _worker: worker,
        }
    }

    /// Register a handler for the events of one track
    pub fn subscribe<F>(&self, track_id: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&AnalysisEvent) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(track_id, handler)
    }

    pub fn unsubscribe(&self, track_id: &str, id: SubscriptionId) -> bool {
        self.shared.subscribers.unsubscribe(track_id, id)
    }

    /// Run the fast pass for a track with its genre's settings
    pub async fn submit_fast(&self, track_id: &str, genre: Option<&str>) -> Result<FastOutcome> {
        let mut request = AnalysisRequest::new(track_id);
        request.genre = genre.map(str::to_string);
        self.submit(request).await
    }

    /// Run the fast pass, notify `FAST_DONE` and queue the deep pass
    ///
    /// Returns `AlreadyRunning` without doing anything if a fast pass for the
    /// same track has not finished yet. A load failure notifies `ERROR` and
    /// is returned.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<FastOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &request.track_id) else {
            info!(track_id = %request.track_id, "Fast pass already running");
            return Ok(FastOutcome::AlreadyRunning);
        };

        match self.run_fast(&request).await {
            Ok((result, buffer)) => {
                self.shared.subscribers.notify(&AnalysisEvent::FastDone {
                    track_id: request.track_id.clone(),
                    result: Box::new(result.clone()),
                });
                self.enqueue_deep(request, result.clone(), Some(buffer));
                Ok(FastOutcome::Completed(result))
            }
            Err(e) => {
                warn!(track_id = %request.track_id, error = %e, "Fast pass failed");
                self.shared.subscribers.notify(&AnalysisEvent::Error {
                    track_id: request.track_id.clone(),
                    message: e.user_message(),
                });
                Err(e)
            }
        }
    }

    async fn run_fast(&self, request: &AnalysisRequest) -> Result<(FastResult, Arc<SampleBuffer>)> {
        let started = Instant::now();
        let (settings, rules) = self.shared.resolve(request)?;
        info!(track_id = %request.track_id, genre = ?request.genre, "Fast pass started");

        let buffer = self.shared.load_buffer(&request.track_id).await?;
        let pass_buffer = Arc::clone(&buffer);
        let result = tokio::task::spawn_blocking(move || FastScanAnalyzer::analyze(&pass_buffer, &settings, &rules))
            .await
            .map_err(|e| AnalysisError::TaskFailed { reason: e.to_string() })?;

        info!(
            track_id = %request.track_id,
            bpm = ?result.bpm,
            key = %result.key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fast pass finished"
        );
        Ok((result, buffer))
    }

    /// Queue a deep pass unless one is already pending for the track
    ///
    /// Without a buffer the worker reloads the track when the task runs.
    pub fn enqueue_deep(
        &self,
        request: AnalysisRequest,
        fast: FastResult,
        buffer: Option<Arc<SampleBuffer>>,
    ) -> bool {
        let track_id = request.track_id.clone();
        if !self.shared.lock_pending().insert(track_id.clone()) {
            debug!(track_id = %track_id, "Deep pass already pending");
            return false;
        }

        let task = DeepTask { request, fast, buffer };
        if self.deep_tx.send(task).is_err() {
            error!(track_id = %track_id, "Deep worker has stopped, task dropped");
            self.shared.lock_pending().remove(&track_id);
            return false;
        }
        debug!(track_id = %track_id, "Deep pass queued");
        true
    }

    /// Number of deep tasks queued and not yet started
    pub fn pending_deep(&self) -> usize {
        self.shared.lock_pending().len()
    }

    pub fn is_deep_pending(&self, track_id: &str) -> bool {
        self.shared.lock_pending().contains(track_id)
    }

    /// Whether a fast pass for the track is in flight
    pub fn is_running(&self, track_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(track_id)
    }
}

async fn deep_worker(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<DeepTask>, delay: Duration) {
    debug!("Deep worker started");
    while let Some(task) = queue.recv().await {
        let track_id = task.request.track_id.clone();
        shared.lock_pending().remove(&track_id);

        if let Err(e) = run_deep(&shared, task).await {
            error!(track_id = %track_id, error = %e, "Deep pass dropped");
            shared.subscribers.notify(&AnalysisEvent::Error {
                track_id,
                message: e.user_message(),
            });
        }
        tokio::time::sleep(delay).await;
    }
    debug!("Deep worker stopped");
}

async fn run_deep(shared: &Shared, task: DeepTask) -> Result<()> {
    let DeepTask { request, fast, buffer } = task;
    let started = Instant::now();
    info!(track_id = %request.track_id, "Deep pass started");

    let buffer = match buffer {
        Some(buffer) => buffer,
        None => shared.load_buffer(&request.track_id).await.map_err(|e| {
            warn!(track_id = %request.track_id, error = %e, "Could not reload buffer, skipping deep pass");
            e
        })?,
    };

    let (settings, rules) = shared.resolve(&request)?;
    let result = tokio::task::spawn_blocking(move || DeepScanAnalyzer::analyze(&buffer, &fast, &settings, &rules))
        .await
        .map_err(|e| AnalyzerError::from(AnalysisError::TaskFailed { reason: e.to_string() }))?;

    info!(
        track_id = %request.track_id,
        phrases = result.phrases.len(),
        transition = ?result.transition_difficulty,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Deep pass finished"
    );
    shared.subscribers.notify(&AnalysisEvent::DeepDone {
        track_id: request.track_id,
        result: Box::new(result),
    });
    Ok(())
}
