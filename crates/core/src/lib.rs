pub mod analysis;
pub mod atomic;
pub mod clustering;
pub mod combiner;
pub mod domain;
pub mod error;
pub mod exif;
pub mod fingerprint;
pub mod folder_cache;
pub mod geocode;
pub mod grouping;
pub mod scanner;
pub mod settings;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use analysis::{
    AnalysisJob, AnalysisMode, AnalysisProgress, AnalysisReport, Analyzer, CancelToken,
};
use clustering::Clustering;
use combiner::{CombinedDataset, Combiner};
use error::{Error, Result};
use exif::{ExifReader, MetadataReader};
use geocode::cache::GeocodeCache;
use geocode::limiter::{RateLimiter, SystemClock};
use geocode::nominatim::{NominatimClient, DEFAULT_TIMEOUT};
use geocode::{GeocodeStats, Geocoder, ReverseGeocode};
use grouping::{Group, GroupMode};
use settings::Settings;

pub const GEOCODE_CACHE_FILE_NAME: &str = "geocode.json";

/// A photo root and everything needed to analyze, combine, group and cluster it.
pub struct Atlas {
    root: PathBuf,
    settings: Settings,
    analyzer: Analyzer,
    combiner: Combiner,
}

impl Atlas {
    /// Open `root` with the EXIF reader and the configured Nominatim endpoint.
    pub fn open(root: &Path, settings: Settings) -> Result<Self> {
        let backend = NominatimClient::new(
            &settings.endpoint,
            &settings.user_agent,
            &settings.language,
            DEFAULT_TIMEOUT,
        )?;
        let limiter = Arc::new(RateLimiter::new(Arc::new(SystemClock), settings.rate_limit()));
        Self::open_with(root, settings, Arc::new(ExifReader), Box::new(backend), limiter)
    }

    /// Open `root` with explicit collaborators. `limiter` may be shared with other atlases
    /// so the whole process respects one request cadence.
    pub fn open_with(
        root: &Path,
        settings: Settings,
        reader: Arc<dyn MetadataReader>,
        backend: Box<dyn ReverseGeocode>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        settings.validate()?;
        if !root.exists() {
            return Err(Error::RootNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(Error::RootNotDirectory(root.to_path_buf()));
        }
        let root = root.canonicalize()?;

        let cache_path = combiner::meta_dir(&root).join(GEOCODE_CACHE_FILE_NAME);
        let cache = GeocodeCache::load(&cache_path, settings.geocode_precision);
        tracing::debug!(root = %root.display(), places = cache.len(), "geocode cache loaded");

        let geocoder = Arc::new(Geocoder::new(
            backend,
            limiter,
            settings.retry_policy(),
            cache,
        ));
        let lock = Arc::new(Mutex::new(()));
        let analyzer = Analyzer::new(reader, geocoder, lock.clone()).with_geocode_cache(cache_path);
        let combiner = Combiner::new(root.clone(), lock);

        Ok(Self {
            root,
            settings,
            analyzer,
            combiner,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn geocode_cache_path(&self) -> PathBuf {
        combiner::meta_dir(&self.root).join(GEOCODE_CACHE_FILE_NAME)
    }

    /// Folders under the root that hold photos but were never analyzed.
    pub fn find_unanalyzed_folders(&self) -> Result<Vec<PathBuf>> {
        scanner::find_unanalyzed_folders(&self.root)
    }

    /// Canonical form of `folder`, which must be the root or lie beneath it.
    pub fn resolve_folder(&self, folder: &Path) -> Result<PathBuf> {
        let canonical = folder
            .canonicalize()
            .map_err(|_| Error::FolderNotFound(folder.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(Error::FolderNotFound(folder.to_path_buf()));
        }
        if !canonical.starts_with(&self.root) {
            return Err(Error::FolderOutsideRoot {
                folder: canonical,
                root: self.root.clone(),
            });
        }
        Ok(canonical)
    }

    /// Analyze one folder on the calling thread.
    pub fn analyze_folder(
        &self,
        folder: &Path,
        mode: AnalysisMode,
        cancel: &CancelToken,
        progress: Option<&mut dyn FnMut(AnalysisProgress)>,
    ) -> Result<AnalysisReport> {
        let folder = self.resolve_folder(folder)?;
        self.analyzer.analyze(&folder, mode, cancel, progress)
    }

    /// Analyze one folder on a worker thread.
    pub fn spawn_analysis(&self, folder: &Path, mode: AnalysisMode) -> Result<AnalysisJob> {
        let folder = self.resolve_folder(folder)?;
        AnalysisJob::spawn(self.analyzer.clone(), folder, mode)
    }

    pub fn geocode_stats(&self) -> GeocodeStats {
        self.analyzer.geocoder().stats()
    }

    /// Whether the combined dataset must be rebuilt before use.
    pub fn is_stale(&self) -> Result<bool> {
        self.combiner.is_stale()
    }

    pub fn folder_caches(&self) -> Result<Vec<PathBuf>> {
        self.combiner.folder_caches()
    }

    /// The combined dataset, rebuilt from folder caches only when stale.
    pub fn dataset(&self) -> Result<CombinedDataset> {
        self.combiner.load()
    }

    pub fn rebuild_dataset(&self) -> Result<CombinedDataset> {
        self.combiner.rebuild()
    }

    /// Force the next [`Atlas::dataset`] call to rebuild from folder caches.
    pub fn rebuild_cache(&self) -> Result<usize> {
        self.combiner.force_clear()
    }

    pub fn groups(&self, mode: GroupMode) -> Result<Vec<Group>> {
        let dataset = self.dataset()?;
        Ok(grouping::group(&dataset.records, mode))
    }

    /// Cluster one group. `label` selects it by display label; `None` picks the first group.
    /// Returns `None` when the dataset is empty.
    pub fn cluster_group(
        &self,
        mode: GroupMode,
        label: Option<&str>,
        distance_m: f64,
    ) -> Result<Option<(Group, Clustering)>> {
        let mut groups = self.groups(mode)?;
        let index = match label {
            Some(label) => {
                let found = grouping::find_by_label(&groups, label)
                    .ok_or_else(|| Error::GroupNotFound(label.to_string()))?;
                groups.iter().position(|g| g.key == found.key)
            }
            None => (!groups.is_empty()).then_some(0),
        };

        Ok(index.map(|i| {
            let group = groups.swap_remove(i);
            let clustering = clustering::cluster(&group.records, distance_m);
            (group, clustering)
        }))
    }
}
