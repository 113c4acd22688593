//! Concurrent, time-boxed fetching of all requested charts.
//!
//! Each requested `(source, chart type)` pair becomes one task on a bounded
//! rayon pool. A task runs the provider call on its own thread and waits for
//! whichever comes first: the provider's answer, run cancellation, or its
//! time budget. Every task ends in exactly one [`SourceFetchResult`]; nothing
//! here returns an error.
//!
//! A provider thread holds one of `max_concurrency` slots until it returns,
//! so a fetch abandoned on timeout still counts against the bound.

use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver, Sender};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::{FetchOptions, SourceConfig};
use crate::error::ProviderError;
use crate::models::{FetchStatus, PerSourceTracks, RawTrack, SourceFetchResult};
use crate::progress::{create_progress_bar, log_progress};
use crate::provider::{FetchContext, FetchRequest, ProviderRegistry};

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation flag.
///
/// [`CancelToken::signal`] returns a receiver that disconnects the moment the
/// token is cancelled, so it can sit in a `select!` next to other channels.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Cancel; idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Never yields a message; becomes ready (disconnected) once cancelled.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Fetch Slots
// ============================================================================

/// Counting semaphore over a bounded channel: a unit in the channel is a
/// slot in use.
#[derive(Clone)]
struct FetchSlots {
    acquire: Sender<()>,
    release: Receiver<()>,
}

/// Frees its slot on drop, including when the provider panics.
struct SlotPermit(Receiver<()>);

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let _ = self.0.try_recv();
    }
}

impl FetchSlots {
    fn new(capacity: usize) -> Self {
        let (acquire, release) = bounded(capacity.max(1));
        Self { acquire, release }
    }

    /// Block until a slot frees up, the run is cancelled, or `deadline`
    /// passes. `None` means the wait was cut short.
    fn acquire(&self, cancel: &CancelToken, deadline: Option<Instant>) -> Option<SlotPermit> {
        let timer = match deadline {
            Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
            None => never(),
        };
        select! {
            send(self.acquire, ()) -> sent => sent.ok().map(|_| SlotPermit(self.release.clone())),
            recv(cancel.signal()) -> _ => None,
            recv(timer) -> _ => None,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Tracks and diagnostics from one fetch stage.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Tracks of successful fetches, charts of one source merged in request order
    pub tracks: PerSourceTracks,
    /// One entry per requested chart, in request order
    pub results: Vec<SourceFetchResult>,
}

/// Percentage of requested sources with at least one successful chart
/// (0 when nothing was requested).
pub fn success_rate(results: &[SourceFetchResult]) -> f64 {
    let mut requested = BTreeSet::new();
    let mut succeeded = BTreeSet::new();
    for result in results {
        requested.insert(result.source.as_str());
        if result.is_success() {
            succeeded.insert(result.source.as_str());
        }
    }
    if requested.is_empty() {
        return 0.0;
    }
    100.0 * succeeded.len() as f64 / requested.len() as f64
}

enum TaskEnd {
    Done(Vec<RawTrack>),
    Error(ProviderError),
    Panicked,
    TimedOut,
    Cancelled,
}

pub struct FetchOrchestrator {
    registry: ProviderRegistry,
    options: FetchOptions,
    slots: FetchSlots,
    show_progress: bool,
}

impl FetchOrchestrator {
    pub fn new(registry: ProviderRegistry, options: FetchOptions) -> Self {
        let slots = FetchSlots::new(options.max_concurrency);
        Self {
            registry,
            options,
            slots,
            show_progress: false,
        }
    }

    /// Draw an indicatif bar (or log lines in log-only mode) while fetching.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch every requested chart, at most `max_concurrency` at a time.
    ///
    /// Returns once every task is terminal. Provider threads abandoned on
    /// timeout or cancellation are told to stop through their task token and
    /// keep their slot until they do, also across calls on this orchestrator.
    pub fn fetch_all(&self, sources: &[SourceConfig], cancel: &CancelToken) -> FetchOutcome {
        let started = Instant::now();
        let run_deadline = self.options.run_timeout.map(|t| started + t);
        let total = sources.len() as u64;

        let pb = self
            .show_progress
            .then(|| create_progress_bar(total, "Fetching sources"));

        let (tx, rx) = unbounded::<(usize, SourceFetchResult, Vec<RawTrack>)>();

        let run_one = |index: usize, config: &SourceConfig, tx: &Sender<_>| {
            let (result, tracks) = self.run_task(config, cancel, run_deadline);
            let _ = tx.send((index, result, tracks));
            if let Some(pb) = &pb {
                pb.inc(1);
                log_progress("FETCH", pb.position(), total);
            }
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_concurrency.max(1))
            .thread_name(|i| format!("fetch-worker-{}", i))
            .build();

        match pool {
            Ok(pool) => pool.scope(|s| {
                for (index, config) in sources.iter().enumerate() {
                    let tx = tx.clone();
                    let run_one = &run_one;
                    s.spawn(move |_| run_one(index, config, &tx));
                }
            }),
            Err(e) => {
                tracing::warn!("Failed to build fetch pool ({}), fetching sequentially", e);
                for (index, config) in sources.iter().enumerate() {
                    run_one(index, config, &tx);
                }
            }
        }
        drop(tx);

        if let Some(pb) = &pb {
            pb.finish_with_message("Sources fetched");
        }

        let mut finished: Vec<_> = rx.iter().collect();
        finished.sort_by_key(|(index, _, _)| *index);

        let mut outcome = FetchOutcome::default();
        for (_, result, tracks) in finished {
            if result.is_success() {
                outcome
                    .tracks
                    .entry(result.source.clone())
                    .or_default()
                    .extend(tracks);
            }
            outcome.results.push(result);
        }

        tracing::info!(
            "Fetched {}/{} charts from {} sources in {:.2}s",
            outcome.results.iter().filter(|r| r.is_success()).count(),
            sources.len(),
            outcome.tracks.len(),
            started.elapsed().as_secs_f64()
        );
        outcome
    }

    fn run_task(
        &self,
        config: &SourceConfig,
        run_cancel: &CancelToken,
        run_deadline: Option<Instant>,
    ) -> (SourceFetchResult, Vec<RawTrack>) {
        let queued = Instant::now();
        let finish = |status: FetchStatus, track_count: usize, error: Option<String>| SourceFetchResult {
            source: config.source.clone(),
            chart_type: config.chart_type.clone(),
            status,
            track_count,
            error,
            elapsed_ms: queued.elapsed().as_millis() as u64,
        };
        let cancelled = || (finish(FetchStatus::Cancelled, 0, Some("run cancelled".into())), Vec::new());

        if run_cancel.is_cancelled() || run_deadline.is_some_and(|d| d <= queued) {
            tracing::debug!("{}/{}: cancelled before start", config.source, config.chart_type);
            return cancelled();
        }

        let Some(provider) = self.registry.get(&config.source) else {
            let err = ProviderError::Unavailable(format!("no provider registered for '{}'", config.source));
            tracing::warn!("{}: {}", config.source, err);
            return (finish(FetchStatus::Failed, 0, Some(err.to_string())), Vec::new());
        };

        let Some(permit) = self.slots.acquire(run_cancel, run_deadline) else {
            tracing::debug!("{}/{}: cancelled waiting for a fetch slot", config.source, config.chart_type);
            return cancelled();
        };
        if run_cancel.is_cancelled() {
            return cancelled();
        }

        // Budget: per-source timeout, shortened by whatever is left of the run
        let started = Instant::now();
        let mut wait = self.options.per_source_timeout;
        let mut run_bound = false;
        if let Some(deadline) = run_deadline {
            let remaining = deadline.saturating_duration_since(started);
            if remaining < wait {
                wait = remaining;
                run_bound = true;
            }
        }
        if run_bound && wait.is_zero() {
            return cancelled();
        }

        let request = FetchRequest::from_config(config);
        let task_cancel = CancelToken::new();
        let ctx = FetchContext::new(task_cancel.clone(), started + wait);
        let (done_tx, done_rx) = bounded(1);

        let spawned = std::thread::Builder::new()
            .name(format!("fetch-{}-{}", config.source, config.chart_type))
            .spawn(move || {
                let _permit = permit;
                let _ = done_tx.send(provider.fetch(&request, &ctx));
            });
        if let Err(e) = spawned {
            let msg = format!("failed to start fetch thread: {}", e);
            tracing::warn!("{}: {}", config.source, msg);
            return (finish(FetchStatus::Failed, 0, Some(msg)), Vec::new());
        }

        let end = select! {
            recv(done_rx) -> msg => match msg {
                Ok(Ok(tracks)) => TaskEnd::Done(tracks),
                Ok(Err(e)) => TaskEnd::Error(e),
                Err(_) => TaskEnd::Panicked,
            },
            recv(run_cancel.signal()) -> _ => TaskEnd::Cancelled,
            recv(after(wait)) -> _ => {
                if run_bound { TaskEnd::Cancelled } else { TaskEnd::TimedOut }
            },
        };

        match end {
            TaskEnd::Done(mut tracks) => {
                tracks.truncate(config.fetch_limit());
                tracing::info!("{}/{}: {} tracks", config.source, config.chart_type, tracks.len());
                (finish(FetchStatus::Success, tracks.len(), None), tracks)
            }
            TaskEnd::Error(ProviderError::Timeout) => {
                tracing::warn!("{}/{}: provider reported timeout", config.source, config.chart_type);
                (finish(FetchStatus::TimedOut, 0, Some(ProviderError::Timeout.to_string())), Vec::new())
            }
            TaskEnd::Error(e) => {
                tracing::warn!("{}/{}: {}", config.source, config.chart_type, e);
                (finish(FetchStatus::Failed, 0, Some(e.to_string())), Vec::new())
            }
            TaskEnd::Panicked => {
                tracing::warn!("{}/{}: provider panicked", config.source, config.chart_type);
                (finish(FetchStatus::Failed, 0, Some("provider panicked".into())), Vec::new())
            }
            TaskEnd::TimedOut => {
                task_cancel.cancel();
                tracing::warn!("{}/{}: timed out after {:?}", config.source, config.chart_type, wait);
                let msg = format!("no response within {} ms", wait.as_millis());
                (finish(FetchStatus::TimedOut, 0, Some(msg)), Vec::new())
            }
            TaskEnd::Cancelled => {
                task_cancel.cancel();
                tracing::warn!("{}/{}: cancelled", config.source, config.chart_type);
                cancelled()
            }
        }
    }
}
