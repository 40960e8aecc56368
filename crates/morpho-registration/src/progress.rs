//! Progress tracking and callbacks for chain alignment.
//!
//! The aligners report once per registered pair. Callbacks can log, drive a
//! progress bar, record history or request cancellation; cancellation is
//! checked between pairs, never inside one.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Progress information after one registered pair.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Pairs completed so far.
    pub pair: usize,
    /// Total number of pairs.
    pub total_pairs: usize,
    /// Name of the fixed sample of the last pair.
    pub fixed: String,
    /// Name of the moving sample of the last pair.
    pub moving: String,
    /// Final variance of the last pair.
    pub sigma2: f64,
    /// Solver iterations of the last pair.
    pub iterations: usize,
    /// Time elapsed since start.
    pub elapsed: Duration,
    /// Estimated remaining time.
    pub estimated_remaining: Option<Duration>,
    /// Additional metrics.
    pub metrics: Vec<(String, f64)>,
}

impl ProgressInfo {
    /// Create new progress information.
    pub fn new(
        pair: usize,
        total_pairs: usize,
        fixed: impl Into<String>,
        moving: impl Into<String>,
        sigma2: f64,
        elapsed: Duration,
    ) -> Self {
        Self {
            pair,
            total_pairs,
            fixed: fixed.into(),
            moving: moving.into(),
            sigma2,
            iterations: 0,
            elapsed,
            estimated_remaining: None,
            metrics: Vec::new(),
        }
    }

    /// Calculate progress percentage.
    pub fn progress_percent(&self) -> f64 {
        if self.total_pairs == 0 {
            100.0
        } else {
            (self.pair as f64 / self.total_pairs as f64) * 100.0
        }
    }

    /// Calculate estimated remaining time.
    pub fn calculate_remaining(&mut self) {
        if self.pair > 0 {
            let per_pair = self.elapsed.as_secs_f64() / self.pair as f64;
            let remaining = self.total_pairs.saturating_sub(self.pair);
            self.estimated_remaining = Some(Duration::from_secs_f64(per_pair * remaining as f64));
        }
    }

    /// Add a custom metric.
    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.push((name.into(), value));
    }
}

/// Progress callback trait for monitoring chain alignment.
pub trait ProgressCallback: Send + Sync {
    /// Called after each registered pair.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when alignment starts.
    fn on_start(&self, _label: &str, _total_pairs: usize) {}

    /// Called when alignment completes successfully.
    fn on_complete(&self, _info: &ProgressInfo) {}

    /// Called when alignment fails.
    fn on_error(&self, _error: &str) {}

    /// Polled between pairs; returning true stops the run.
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Console progress callback that logs to tracing.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log interval (pairs).
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 1 }
    }
}

impl ConsoleProgressCallback {
    /// Create a new console progress callback.
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.pair % self.log_interval == 0 || info.pair == info.total_pairs {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::info!(
                "Pair {}/{} ({:.1}%) | {} -> {} | sigma2: {:.3e} | iters: {} | \
                 Elapsed: {:.2}s | ETA: {}",
                info.pair,
                info.total_pairs,
                info.progress_percent(),
                info.moving,
                info.fixed,
                info.sigma2,
                info.iterations,
                info.elapsed.as_secs_f64(),
                remaining
            );

            for (name, value) in &info.metrics {
                tracing::info!("  {}: {:.6}", name, value);
            }
        }
    }

    fn on_start(&self, label: &str, total_pairs: usize) {
        tracing::info!("{} ({} pairs)", label, total_pairs);
    }

    fn on_complete(&self, info: &ProgressInfo) {
        tracing::info!(
            "Alignment completed in {:.2}s over {} pairs",
            info.elapsed.as_secs_f64(),
            info.total_pairs
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Alignment failed: {}", error);
    }
}

/// Terminal progress bar over pairs.
#[derive(Clone)]
pub struct ProgressBarCallback {
    bar: ProgressBar,
}

impl std::fmt::Debug for ProgressBarCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBarCallback")
            .field("position", &self.bar.position())
            .finish()
    }
}

impl Default for ProgressBarCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBarCallback {
    /// Create a hidden bar; it is sized and shown on start.
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        let style = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    /// Underlying bar, e.g. to attach it to a `MultiProgress`.
    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl ProgressCallback for ProgressBarCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_position(info.pair as u64);
    }

    fn on_start(&self, label: &str, total_pairs: usize) {
        self.bar.set_length(total_pairs as u64);
        self.bar.set_message(label.to_string());
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn on_complete(&self, _info: &ProgressInfo) {
        self.bar.finish_with_message("Alignment complete");
    }

    fn on_error(&self, error: &str) {
        self.bar.abandon_with_message(format!("Alignment failed: {}", error));
    }
}

/// History callback that records all progress information.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    /// Create a new history callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded history.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        lock(&self.history).clone()
    }

    /// Clear the history.
    pub fn clear(&self) {
        lock(&self.history).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        lock(&self.history).push(info.clone());
    }
}

/// Cooperative cancellation, either on demand or after a number of pairs.
#[derive(Debug, Clone, Default)]
pub struct CancelCallback {
    cancelled: Arc<AtomicBool>,
    after_pairs: Option<usize>,
    completed: Arc<AtomicUsize>,
}

impl CancelCallback {
    /// Create a callback that cancels only when asked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel automatically once `pairs` pairs have completed.
    pub fn after_pairs(pairs: usize) -> Self {
        Self {
            after_pairs: Some(pairs),
            ..Self::default()
        }
    }

    /// Request cancellation; takes effect before the next pair.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Reset the cancellation state.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }
}

impl ProgressCallback for CancelCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.completed.store(info.pair, Ordering::SeqCst);
    }

    fn should_cancel(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self
                .after_pairs
                .is_some_and(|n| self.completed.load(Ordering::SeqCst) >= n)
    }
}

/// Progress tracker that manages multiple callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Arc<Mutex<Option<Instant>>>,
    total_pairs: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker with a single callback.
    pub fn with_callback(callback: Arc<dyn ProgressCallback>) -> Self {
        let mut tracker = Self::new();
        tracker.add_callback(callback);
        tracker
    }

    /// Add a callback.
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    /// Whether any callback is attached.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn elapsed(&self) -> Duration {
        lock(&self.start_time).map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Start tracking.
    pub fn start(&self, label: &str, total_pairs: usize) {
        *lock(&self.start_time) = Some(Instant::now());
        self.total_pairs.store(total_pairs, Ordering::SeqCst);
        for callback in &self.callbacks {
            callback.on_start(label, total_pairs);
        }
    }

    /// Report a completed pair.
    pub fn update(&self, pair: usize, fixed: &str, moving: &str, sigma2: f64, iterations: usize) {
        let total = self.total_pairs.load(Ordering::SeqCst);
        let mut info = ProgressInfo::new(pair, total, fixed, moving, sigma2, self.elapsed());
        info.iterations = iterations;
        info.calculate_remaining();

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    /// Complete tracking.
    pub fn complete(&self) {
        let total = self.total_pairs.load(Ordering::SeqCst);
        let info = ProgressInfo::new(total, total, "", "", 0.0, self.elapsed());
        for callback in &self.callbacks {
            callback.on_complete(&info);
        }
    }

    /// Report error.
    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }

    /// Whether any callback requested cancellation.
    pub fn should_cancel(&self) -> bool {
        self.callbacks.iter().any(|c| c.should_cancel())
    }
}
