//! Scan Coordinator Module
//!
//! Runs a scan on a background thread: discovery, parallel fingerprint
//! extraction on a bounded worker pool, then the single-threaded detection
//! pass. Frontends drive it with pause/resume/stop and follow it through
//! [`ScanEvent`]s.
//!
//! Pause and stop are cooperative. Both are polled at comic boundaries and
//! at every image during extraction; work already handed to a worker
//! finishes its current image before the pause takes effect.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};

use crate::core::config::Config;
use crate::core::control::ScanControl;
use crate::core::error::{Result, ScanError};
use crate::core::hasher::{Fingerprinter, ImageHashFingerprinter};
use crate::core::source::{ComicSource, FolderSource};
use crate::duplicate::{
    detect_duplicates, BlacklistFilter, ComicRecord, DetectionSettings, DetectionUpdate,
    FingerprintCache, HashCatalogBuilder, PersistentMatchCache, MATCH_INDEX_FILE,
};
use crate::scan::events::{ScanEvent, ScanProgress, ScanStage, ScanStats, ScanSummary};
use crate::scan::filter::ComicFilter;

/// Sub-directory of the cache directory holding fingerprint entries
pub const FINGERPRINT_CACHE_DIR: &str = "fingerprints";

/// How often the extraction aggregator re-checks the stop flag
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Scan State
// =============================================================================

/// Current state of the coordinator. Pausing is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    /// Ready for a new scan
    Idle = 0,
    /// Fingerprinting comics
    Extracting = 1,
    /// Comparing and grouping
    Detecting = 2,
    /// Last scan finished
    Completed = 3,
    /// Last scan could not run
    Errored = 4,
    /// Last scan was stopped
    Stopped = 5,
}

impl From<u8> for ScanState {
    fn from(value: u8) -> Self {
        match value {
            0 => ScanState::Idle,
            1 => ScanState::Extracting,
            2 => ScanState::Detecting,
            3 => ScanState::Completed,
            4 => ScanState::Errored,
            5 => ScanState::Stopped,
            _ => ScanState::Idle,
        }
    }
}

// =============================================================================
// Scan Options
// =============================================================================

/// Everything a scan needs besides the roots
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Thresholds and filters
    pub settings: DetectionSettings,
    /// Extraction worker count
    pub workers: usize,
    /// Cache directory; `None` disables both caches
    pub cache_dir: Option<PathBuf>,
    /// Blacklisted fingerprints
    pub blacklist: BlacklistFilter,
    /// Name and date filters for discovered comics
    pub filter: ComicFilter,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            settings: DetectionSettings::default(),
            workers: 4,
            cache_dir: None,
            blacklist: BlacklistFilter::new(),
            filter: ComicFilter::new(),
        }
    }
}

impl ScanOptions {
    /// Create options with the given settings and no cache
    pub fn new(settings: DetectionSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Set the worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enable caching in `dir`
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Set the blacklist
    pub fn with_blacklist(mut self, blacklist: BlacklistFilter) -> Self {
        self.blacklist = blacklist;
        self
    }

    /// Set the comic filter
    pub fn with_filter(mut self, filter: ComicFilter) -> Self {
        self.filter = filter;
        self
    }
}

// =============================================================================
// Progress Tracker
// =============================================================================

/// Counters shared between the scan thread and the extraction workers
#[derive(Debug, Default)]
struct ProgressTracker {
    stats: Mutex<ScanStats>,
    groups_found: std::sync::atomic::AtomicUsize,
}

impl ProgressTracker {
    fn update<F: FnOnce(&mut ScanStats)>(&self, f: F) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    fn snapshot(&self) -> ScanStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_groups(&self, groups: usize) {
        self.groups_found.store(groups, Ordering::SeqCst);
    }

    fn groups(&self) -> usize {
        self.groups_found.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Scan Coordinator
// =============================================================================

/// Everything the scan thread owns for one run
struct ScanJob {
    source: Arc<dyn ComicSource>,
    fingerprinter: Arc<dyn Fingerprinter>,
    options: ScanOptions,
    roots: Vec<PathBuf>,
    state: Arc<AtomicU8>,
    control: ScanControl,
    event_tx: Sender<ScanEvent>,
    progress: ProgressTracker,
    started: Instant,
}

/// Thread-safe scan coordinator
///
/// Owns the collaborators (comic source, fingerprinter) and runs one scan
/// at a time on a background thread.
pub struct ScanCoordinator {
    source: Arc<dyn ComicSource>,
    fingerprinter: Arc<dyn Fingerprinter>,
    options: ScanOptions,
    state: Arc<AtomicU8>,
    control: ScanControl,
    event_tx: Sender<ScanEvent>,
    event_rx: Receiver<ScanEvent>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScanCoordinator {
    /// Create a coordinator around explicit collaborators
    pub fn new(
        source: Arc<dyn ComicSource>,
        fingerprinter: Arc<dyn Fingerprinter>,
        options: ScanOptions,
    ) -> Self {
        let (event_tx, event_rx) = unbounded();

        Self {
            source,
            fingerprinter,
            options,
            state: Arc::new(AtomicU8::new(ScanState::Idle as u8)),
            control: ScanControl::new(),
            event_tx,
            event_rx,
            worker_handle: Mutex::new(None),
        }
    }

    /// Create a coordinator for folders on disk from the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let source: Arc<dyn ComicSource> = Arc::new(FolderSource::new(
            config.scan.image_extensions.clone(),
            config.scan.recursive,
        ));
        let fingerprinter: Arc<dyn Fingerprinter> = Arc::new(ImageHashFingerprinter::new(
            config.detection.hash_algorithm,
            config.detection.hash_size,
        ));

        let mut blacklist = BlacklistFilter::from_hex_list(&config.blacklist.hashes)?;
        if let Some(folder) = &config.blacklist.folder {
            let cache = if config.cache.enabled {
                let dir = config.cache.directory.join(FINGERPRINT_CACHE_DIR);
                match FingerprintCache::open(&dir) {
                    Ok(cache) => Some(cache),
                    Err(e) => {
                        warn!("Blacklist fingerprints will not be cached: {}", e);
                        None
                    }
                }
            } else {
                None
            };
            blacklist.merge(BlacklistFilter::from_folder(
                folder,
                source.as_ref(),
                fingerprinter.as_ref(),
                cache.as_ref(),
            )?);
        }

        let mut options = ScanOptions::new(config.detection.to_detection_settings())
            .with_workers(config.scan.workers)
            .with_blacklist(blacklist)
            .with_filter(ComicFilter::from_config(&config.filter)?);
        if config.cache.enabled {
            options = options.with_cache_dir(config.cache.directory.clone());
        }

        Ok(Self::new(source, fingerprinter, options))
    }

    /// Options used for the next scan
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Get current state
    pub fn state(&self) -> ScanState {
        ScanState::from(self.state.load(Ordering::SeqCst))
    }

    /// Check if a scan is running
    pub fn is_active(&self) -> bool {
        matches!(self.state(), ScanState::Extracting | ScanState::Detecting)
    }

    /// Check if the running scan is paused
    pub fn is_paused(&self) -> bool {
        self.is_active() && self.control.is_paused()
    }

    /// Try to receive the next event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ScanEvent> {
        match self.event_rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Receive events with timeout
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ScanEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Drain all pending events
    pub fn drain_events(&self) -> Vec<ScanEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Start scanning `roots` on a background thread
    pub fn start(&self, roots: Vec<PathBuf>) -> Result<()> {
        if self.is_active() {
            return Err(ScanError::InvalidState(
                "A scan is already in progress".to_string(),
            ));
        }

        // a finished worker may still be joinable
        self.wait()?;

        let stale = self.event_rx.try_iter().count();
        if stale > 0 {
            debug!("Discarded {} events from the previous scan", stale);
        }

        self.control.reset();
        self.state
            .store(ScanState::Extracting as u8, Ordering::SeqCst);

        let job = ScanJob {
            source: Arc::clone(&self.source),
            fingerprinter: Arc::clone(&self.fingerprinter),
            options: self.options.clone(),
            roots,
            state: Arc::clone(&self.state),
            control: self.control.clone(),
            event_tx: self.event_tx.clone(),
            progress: ProgressTracker::default(),
            started: Instant::now(),
        };

        let handle = thread::Builder::new()
            .name("scan-coordinator".to_string())
            .spawn(move || job.run())
            .map_err(|e| ScanError::IoError(format!("Failed to spawn scan thread: {}", e)))?;

        *self.lock_handle() = Some(handle);
        Ok(())
    }

    /// Pause the running scan
    pub fn pause(&self) -> Result<()> {
        if !self.is_active() {
            return Err(ScanError::InvalidState("No active scan to pause".to_string()));
        }

        self.control.pause();
        let _ = self.event_tx.send(ScanEvent::Paused);
        Ok(())
    }

    /// Resume a paused scan
    pub fn resume(&self) -> Result<()> {
        if !self.is_paused() {
            return Err(ScanError::InvalidState("Scan is not paused".to_string()));
        }

        self.control.resume();
        let _ = self.event_tx.send(ScanEvent::Resumed);
        Ok(())
    }

    /// Request a graceful stop
    pub fn stop(&self) -> Result<()> {
        if !self.is_active() {
            return Err(ScanError::InvalidState("No active scan to stop".to_string()));
        }

        let _ = self.event_tx.send(ScanEvent::Stopping);
        // also unpauses so the scan thread can exit
        self.control.stop();
        Ok(())
    }

    /// Wait for the scan thread to finish
    pub fn wait(&self) -> Result<()> {
        if let Some(handle) = self.lock_handle().take() {
            handle
                .join()
                .map_err(|_| ScanError::InvalidState("Scan thread panicked".to_string()))?;
        }
        Ok(())
    }

    /// Stop any running scan and wait for it
    pub fn shutdown(&self) {
        let _ = self.stop();
        let _ = self.wait();
    }

    /// Start a scan and block until it ends, returning its terminal event
    pub fn run_blocking(&self, roots: Vec<PathBuf>) -> Result<ScanEvent> {
        self.start(roots)?;
        loop {
            match self.event_rx.recv() {
                Ok(event) if event.is_terminal() => {
                    self.wait()?;
                    return Ok(event);
                }
                Ok(_) => continue,
                Err(_) => {
                    return Err(ScanError::InvalidState(
                        "Scan thread ended without a result".to_string(),
                    ))
                }
            }
        }
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker_handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Scan Thread
// =============================================================================

impl ScanJob {
    fn emit(&self, event: ScanEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: ScanState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn progress_event(
        &self,
        stage: ScanStage,
        processed: usize,
        total: usize,
        current_item: Option<String>,
    ) {
        let stats = self.progress.snapshot();
        self.emit(ScanEvent::Progress(ScanProgress {
            stage,
            processed,
            total,
            current_item,
            errors: stats.errors,
            groups_found: self.progress.groups(),
            cache_hits: stats.cache_hits,
            elapsed: self.started.elapsed(),
        }));
    }

    fn summary(&self, groups: Vec<crate::duplicate::DuplicateGroup>, completed: bool) -> ScanSummary {
        ScanSummary {
            groups,
            stats: self.progress.snapshot(),
            elapsed: self.started.elapsed(),
            completed,
        }
    }

    fn run(self) {
        match self.execute() {
            Ok(summary) if summary.completed => {
                info!(
                    "Scan completed: {} groups in {:.1}s",
                    summary.groups.len(),
                    summary.elapsed.as_secs_f64()
                );
                self.set_state(ScanState::Completed);
                self.emit(ScanEvent::Completed(summary));
            }
            Ok(summary) => {
                info!("Scan stopped with {} groups", summary.groups.len());
                self.set_state(ScanState::Stopped);
                self.emit(ScanEvent::Stopped(summary));
            }
            Err(e) => {
                error!("Scan failed: {}", e);
                self.set_state(ScanState::Errored);
                self.emit(ScanEvent::Failed {
                    error: e.to_string(),
                });
            }
        }
    }

    fn execute(&self) -> Result<ScanSummary> {
        let discovered = self.source.discover(&self.roots)?;
        let total = discovered.len();
        let comics = self.options.filter.apply(discovered, self.source.as_ref());
        let excluded = total - comics.len();
        if excluded > 0 {
            info!("Excluded {} of {} comics by name or date", excluded, total);
        }
        if comics.is_empty() {
            return Err(ScanError::NoComicsFound(self.roots.clone()));
        }

        info!("Found {} comics", comics.len());
        self.progress.update(|s| {
            s.comics_found = comics.len();
            s.comics_excluded = excluded;
        });
        self.emit(ScanEvent::Started {
            roots: self.roots.clone(),
            comics: comics.len(),
        });

        self.emit(ScanEvent::StageChanged(ScanStage::Extracting));
        let records = match self.extract(&comics)? {
            Some(records) => records,
            None => return Ok(self.summary(Vec::new(), false)),
        };

        let stats = self.progress.snapshot();
        if stats.comics_extracted == 0 {
            return Err(ScanError::NothingExtracted {
                errors: stats.errors,
            });
        }

        if !self.control.checkpoint() {
            return Ok(self.summary(Vec::new(), false));
        }

        self.set_state(ScanState::Detecting);
        self.emit(ScanEvent::StageChanged(ScanStage::Detecting));
        Ok(self.detect(&records))
    }

    /// Fingerprint every comic on the worker pool. `None` = stopped.
    fn extract(&self, comics: &[PathBuf]) -> Result<Option<Vec<Arc<ComicRecord>>>> {
        let options = &self.options;

        let mut builder = HashCatalogBuilder::new(
            Arc::clone(&self.source),
            Arc::clone(&self.fingerprinter),
            Arc::new(options.blacklist.clone()),
            options.settings,
        );
        if let Some(dir) = &options.cache_dir {
            match FingerprintCache::open(&dir.join(FINGERPRINT_CACHE_DIR)) {
                Ok(cache) => builder = builder.with_cache(Arc::new(cache)),
                Err(e) => warn!("Fingerprint cache disabled: {}", e),
            }
        }
        let builder = Arc::new(builder);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|i| format!("extract-{}", i))
            .build()
            .map_err(|e| ScanError::IoError(format!("Failed to start worker pool: {}", e)))?;

        let total = comics.len();
        let (tx, rx) = unbounded();

        for (idx, path) in comics.iter().enumerate() {
            let tx = tx.clone();
            let builder = Arc::clone(&builder);
            let control = self.control.clone();
            let path = path.clone();

            pool.spawn(move || {
                let record = if control.checkpoint() {
                    builder.build(&path, &control)
                } else {
                    None
                };
                let _ = tx.send((idx, path, record));
            });
        }
        drop(tx);

        let mut records: Vec<Option<Arc<ComicRecord>>> = vec![None; total];
        let mut received = 0;

        while received < total {
            if self.control.is_stopped() {
                debug!("Discarding in-flight extraction results");
                return Ok(None);
            }

            let (idx, path, record) = match rx.recv_timeout(RESULT_POLL_INTERVAL) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            received += 1;

            let Some(record) = record else {
                continue;
            };

            if let Some(err) = &record.error {
                self.emit(ScanEvent::ComicFailed {
                    path: path.clone(),
                    error: err.clone(),
                });
            }

            self.progress.update(|s| {
                if record.is_ok() {
                    s.comics_extracted += 1;
                } else {
                    s.errors += 1;
                }
                if record.from_cache {
                    s.cache_hits += 1;
                }
                s.rejected_images += record.rejected_images;
                s.blacklisted_images += record.blacklisted_images;
            });

            records[idx] = Some(Arc::new(record));
            self.progress_event(
                ScanStage::Extracting,
                received,
                total,
                Some(path.display().to_string()),
            );
        }

        if self.control.is_stopped() {
            return Ok(None);
        }

        Ok(Some(records.into_iter().flatten().collect()))
    }

    fn detect(&self, records: &[Arc<ComicRecord>]) -> ScanSummary {
        let options = &self.options;
        let algorithm = self.fingerprinter.algorithm();

        let mut cache = match &options.cache_dir {
            Some(dir) => PersistentMatchCache::load(
                &dir.join(MATCH_INDEX_FILE),
                &algorithm,
                &options.settings,
                &options.blacklist,
            ),
            None => {
                PersistentMatchCache::in_memory(&algorithm, &options.settings, &options.blacklist)
            }
        };

        let outcome = detect_duplicates(
            records,
            &options.settings,
            &options.blacklist,
            &mut cache,
            &self.control,
            |update| match update {
                DetectionUpdate::Compared {
                    processed,
                    total,
                    comic,
                    groups,
                } => {
                    self.progress.set_groups(groups);
                    self.progress_event(
                        ScanStage::Detecting,
                        processed,
                        total,
                        Some(comic.display().to_string()),
                    );
                }
                DetectionUpdate::GroupFound { members, groups } => {
                    self.progress.set_groups(groups);
                    self.emit(ScanEvent::GroupFound {
                        members,
                        groups_found: groups,
                    });
                }
                DetectionUpdate::SkippedRemaining { count } => {
                    debug!("{} comics resolved from the match cache", count);
                }
            },
        );

        self.progress.update(|s| {
            s.candidates = outcome.candidates;
            s.compared = outcome.compared;
            s.skipped = outcome.skipped;
            s.restored_groups = outcome.restored_groups;
        });
        self.progress.set_groups(outcome.groups.len());

        self.summary(outcome.groups, outcome.completed)
    }
}

// =============================================================================
// Tests
// =============================================================================
