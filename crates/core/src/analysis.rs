use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::domain::{Fingerprint, Geocode, PhotoRecord};
use crate::error::{Error, Result};
use crate::exif::MetadataReader;
use crate::fingerprint::{self, Freshness};
use crate::geocode::Geocoder;
use crate::{folder_cache, scanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Scanning,
    Extracting,
    Geocoding,
    Persisting,
    Done,
    Cancelled,
}

impl AnalysisState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisState::Done | AnalysisState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// Reuse cached records whose files are unchanged.
    #[default]
    Incremental,
    /// Discard the folder cache and analyze every file again, retrying unresolved places.
    Rebuild,
}

/// Progress events emitted while a folder is analyzed.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisProgress {
    State(AnalysisState),
    FileProcessed {
        processed: usize,
        total: usize,
        path: PathBuf,
    },
    Geocoded {
        processed: usize,
        total: usize,
    },
}

/// Cooperative cancellation flag shared between a caller and a running analysis.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The shared flag, for signal handlers that set it directly.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

/// Summary of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub folder: PathBuf,
    pub state: AnalysisState,
    pub files_total: usize,
    pub files_reused: usize,
    pub files_extracted: usize,
    pub located: usize,
    pub geocode_requests: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Whether the folder cache was written.
    pub persisted: bool,
}

impl AnalysisReport {
    fn new(folder: &Path) -> Self {
        Self {
            folder: folder.to_path_buf(),
            state: AnalysisState::Idle,
            files_total: 0,
            files_reused: 0,
            files_extracted: 0,
            located: 0,
            geocode_requests: 0,
            resolved: 0,
            unresolved: 0,
            persisted: false,
        }
    }
}

/// Registry of folders currently being analyzed.
#[derive(Debug, Clone, Default)]
pub struct FolderLocks {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl FolderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `folder`, or fail if another analysis holds it.
    pub fn try_acquire(&self, folder: &Path) -> Result<FolderGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(folder.to_path_buf()) {
            return Err(Error::AnalysisInProgress(folder.to_path_buf()));
        }
        Ok(FolderGuard {
            active: self.active.clone(),
            folder: folder.to_path_buf(),
        })
    }

    pub fn is_busy(&self, folder: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(folder)
    }
}

/// Releases its folder when dropped.
#[derive(Debug)]
pub struct FolderGuard {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    folder: PathBuf,
}

impl Drop for FolderGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.folder);
    }
}

/// Runs the per-folder pipeline: scan, extract, geocode, persist.
#[derive(Clone)]
pub struct Analyzer {
    reader: Arc<dyn MetadataReader>,
    geocoder: Arc<Geocoder>,
    persist_lock: Arc<Mutex<()>>,
    locks: FolderLocks,
    geocode_cache_path: Option<PathBuf>,
}

impl Analyzer {
    pub fn new(
        reader: Arc<dyn MetadataReader>,
        geocoder: Arc<Geocoder>,
        persist_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            reader,
            geocoder,
            persist_lock,
            locks: FolderLocks::new(),
            geocode_cache_path: None,
        }
    }

    /// Also save the geocoder's cache to `path` whenever a folder is persisted.
    pub fn with_geocode_cache(mut self, path: PathBuf) -> Self {
        self.geocode_cache_path = Some(path);
        self
    }

    pub fn locks(&self) -> &FolderLocks {
        &self.locks
    }

    pub fn geocoder(&self) -> &Arc<Geocoder> {
        &self.geocoder
    }

    /// Analyze `folder` on the calling thread.
    pub fn analyze(
        &self,
        folder: &Path,
        mode: AnalysisMode,
        cancel: &CancelToken,
        progress: Option<&mut dyn FnMut(AnalysisProgress)>,
    ) -> Result<AnalysisReport> {
        let _guard = self.locks.try_acquire(folder)?;
        self.run(folder, mode, cancel, progress)
    }

    fn run(
        &self,
        folder: &Path,
        mode: AnalysisMode,
        cancel: &CancelToken,
        mut progress: Option<&mut dyn FnMut(AnalysisProgress)>,
    ) -> Result<AnalysisReport> {
        let mut report = AnalysisReport::new(folder);
        let mut emit = |event: AnalysisProgress| {
            if let Some(ref mut cb) = progress {
                cb(event);
            }
        };

        if !folder.is_dir() {
            return Err(Error::FolderNotFound(folder.to_path_buf()));
        }

        // ── Scanning ──
        enter(&mut report, AnalysisState::Scanning, &mut emit);
        let files = scanner::list_images(folder)?;
        report.files_total = files.len();
        tracing::info!(folder = %folder.display(), files = files.len(), ?mode, "analyzing folder");

        // ── Extracting ──
        enter(&mut report, AnalysisState::Extracting, &mut emit);
        let existing = folder_cache::load(folder);
        // Places resolved earlier stay free even when the rows themselves are discarded.
        self.geocoder.seed(&existing);
        let cached: HashMap<PathBuf, PhotoRecord> = match mode {
            AnalysisMode::Incremental => existing.into_iter().map(|r| (r.path.clone(), r)).collect(),
            AnalysisMode::Rebuild => {
                self.geocoder.forget_failures();
                HashMap::new()
            }
        };

        let mut records = Vec::with_capacity(files.len());
        let mut changed = false;
        for (i, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(cancelled(report, &mut emit));
            }

            let previous = cached.get(path);
            let record = self.examine(path, previous, &mut report);
            if previous != Some(&record) {
                changed = true;
            }
            records.push(record);

            emit(AnalysisProgress::FileProcessed {
                processed: i + 1,
                total: files.len(),
                path: path.clone(),
            });
        }
        report.located = records.iter().filter(|r| r.coordinate.is_some()).count();

        // ── Geocoding ──
        enter(&mut report, AnalysisState::Geocoding, &mut emit);
        let queue: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.needs_geocoding())
            .map(|(i, _)| i)
            .collect();
        for (done, &idx) in queue.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(cancelled(report, &mut emit));
            }

            let record = &mut records[idx];
            if let Some(coordinate) = record.coordinate {
                let (resolution, requests) = self.geocoder.resolve_counted(coordinate);
                report.geocode_requests += requests;
                record.geocode = resolution.into_geocode();
                match record.geocode {
                    Geocode::Resolved(_) => report.resolved += 1,
                    _ => report.unresolved += 1,
                }
                changed = true;
            }

            emit(AnalysisProgress::Geocoded {
                processed: done + 1,
                total: queue.len(),
            });
        }

        if cancel.is_cancelled() {
            return Ok(cancelled(report, &mut emit));
        }

        // ── Persisting ──
        if changed || mode == AnalysisMode::Rebuild {
            enter(&mut report, AnalysisState::Persisting, &mut emit);
            let _persist = self
                .persist_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let rows = match mode {
                AnalysisMode::Incremental => folder_cache::merge(folder, &records)?,
                AnalysisMode::Rebuild => folder_cache::replace(folder, &records)?,
            };
            if let Some(path) = &self.geocode_cache_path {
                self.geocoder.save_cache(path)?;
            }
            report.persisted = true;
            tracing::info!(folder = %folder.display(), rows, "folder cache persisted");
        } else {
            tracing::debug!(folder = %folder.display(), "folder unchanged, nothing to persist");
        }

        enter(&mut report, AnalysisState::Done, &mut emit);
        if report.unresolved > 0 {
            tracing::warn!(
                folder = %folder.display(),
                unresolved = report.unresolved,
                "could not resolve location for some photos"
            );
        }
        Ok(report)
    }

    /// Decide whether a file's cached record can be reused, extracting metadata when not.
    fn examine(
        &self,
        path: &Path,
        previous: Option<&PhotoRecord>,
        report: &mut AnalysisReport,
    ) -> PhotoRecord {
        let freshness = fingerprint::check(path, previous.map(|r| &r.fingerprint));
        match (freshness, previous) {
            (Ok(Freshness::Unchanged), Some(prev)) => {
                tracing::debug!(path = %path.display(), "unchanged, reusing cached record");
                report.files_reused += 1;
                prev.clone()
            }
            (Ok(Freshness::Touched(fp)), Some(prev)) => {
                tracing::debug!(path = %path.display(), "touched but identical, reusing cached record");
                report.files_reused += 1;
                PhotoRecord {
                    fingerprint: fp,
                    ..prev.clone()
                }
            }
            (Ok(Freshness::Changed(fp)), _) => self.extract(path, fp, report),
            (Ok(_), None) => match fingerprint::fingerprint(path) {
                Ok(fp) => self.extract(path, fp, report),
                Err(err) => unreadable(path, &err, report),
            },
            (Err(err), _) => unreadable(path, &err, report),
        }
    }

    fn extract(&self, path: &Path, fp: Fingerprint, report: &mut AnalysisReport) -> PhotoRecord {
        tracing::debug!(path = %path.display(), "extracting metadata");
        report.files_extracted += 1;
        let metadata = self.reader.extract(path);
        PhotoRecord {
            coordinate: metadata.coordinate.filter(|c| c.is_valid()),
            captured_at: metadata.captured_at,
            ..PhotoRecord::empty(path, fp)
        }
    }
}

fn enter(report: &mut AnalysisReport, state: AnalysisState, emit: &mut dyn FnMut(AnalysisProgress)) {
    report.state = state;
    emit(AnalysisProgress::State(state));
}

fn unreadable(path: &Path, err: &std::io::Error, report: &mut AnalysisReport) -> PhotoRecord {
    tracing::warn!(path = %path.display(), error = %err, "could not read photo");
    report.files_extracted += 1;
    PhotoRecord::empty(path, Fingerprint::default())
}

fn cancelled(mut report: AnalysisReport, emit: &mut dyn FnMut(AnalysisProgress)) -> AnalysisReport {
    tracing::info!(folder = %report.folder.display(), "analysis cancelled");
    report.state = AnalysisState::Cancelled;
    report.persisted = false;
    emit(AnalysisProgress::State(AnalysisState::Cancelled));
    report
}

/// An analysis running on its own thread.
pub struct AnalysisJob {
    folder: PathBuf,
    cancel: CancelToken,
    progress: Receiver<AnalysisProgress>,
    handle: JoinHandle<Result<AnalysisReport>>,
}

impl AnalysisJob {
    /// Claim `folder` and start analyzing it in the background.
    ///
    /// Fails immediately with [`Error::AnalysisInProgress`] if the folder is busy.
    pub fn spawn(analyzer: Analyzer, folder: PathBuf, mode: AnalysisMode) -> Result<Self> {
        let guard = analyzer.locks.try_acquire(&folder)?;
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();

        let token = cancel.clone();
        let worker_folder = folder.clone();
        let handle = std::thread::Builder::new()
            .name("photomap-analysis".into())
            .spawn(move || {
                let _guard = guard;
                let mut send = |event: AnalysisProgress| {
                    // The receiver may have been dropped; the analysis still completes.
                    let _ = tx.send(event);
                };
                analyzer.run(&worker_folder, mode, &token, Some(&mut send))
            })?;

        Ok(Self {
            folder,
            cancel,
            progress: rx,
            handle,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Progress events; the channel closes when the worker finishes.
    pub fn progress(&self) -> &Receiver<AnalysisProgress> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<AnalysisReport> {
        self.handle
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    }
}
