use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use lineage_shared::cache::FingerprintMode;
use lineage_shared::columns::{ColumnMap, Placeholders};
use lineage_shared::Config;
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::builder::{GraphBuilder, RowErrors};
use crate::error::CacheError;
use crate::ingest::read_rows;
use crate::locator::{self, SourceLocator};
use crate::model::LineageGraph;
use crate::stats::{compute_stats, GraphStats};
use crate::{
    CACHE_HITS_TOTAL, GRAPH_BUILDS_TOTAL, GRAPH_BUILD_FAILURES_TOTAL, GRAPH_BUILD_SECONDS,
    GRAPH_NODES, ROWS_SKIPPED_TOTAL,
};

/// Cheap proxy for "the source file changed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Fingerprint {
    Mtime { modified_ns: u64, len: u64 },
    Sha256 { digest: String },
}

impl Fingerprint {
    pub fn of(path: &Path, mode: FingerprintMode) -> io::Result<Self> {
        match mode {
            FingerprintMode::Mtime => {
                let meta = std::fs::metadata(path)?;
                let modified_ns = meta
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos() as u64;
                Ok(Self::Mtime {
                    modified_ns,
                    len: meta.len(),
                })
            }
            FingerprintMode::Sha256 => {
                let mut file = File::open(path)?;
                let mut hasher = Sha256::new();
                io::copy(&mut file, &mut hasher)?;
                Ok(Self::Sha256 {
                    digest: hex::encode(hasher.finalize()),
                })
            }
        }
    }
}

/// A published build. Immutable; replaced wholesale by the next build.
#[derive(Debug)]
pub struct CacheEntry {
    pub graph: LineageGraph,
    pub stats: GraphStats,
    pub source_path: PathBuf,
    pub source_fingerprint: Fingerprint,
    pub built_at: DateTime<Utc>,
    pub build_duration: Duration,
    pub rows_read: usize,
    pub row_errors: RowErrors,
    built: Instant,
}

impl CacheEntry {
    #[must_use]
    pub fn load_time_ms(&self) -> f64 {
        self.build_duration.as_secs_f64() * 1000.0
    }
}

/// What a build needs besides the source path.
#[derive(Debug, Clone, Default)]
pub struct BuildSettings {
    pub columns: ColumnMap,
    pub placeholders: Placeholders,
    pub fingerprint: FingerprintMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub cached: bool,
    pub loaded_at: Option<DateTime<Utc>>,
    pub source_file: Option<PathBuf>,
    pub build_duration_ms: Option<f64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct Failure {
    error: CacheError,
    /// Source fingerprint when the build failed; `None` if it could not be read.
    fingerprint: Option<Fingerprint>,
}

type Outcome = Result<Arc<CacheEntry>, CacheError>;

/// Handle on a running build. Every clone sees the same outcome.
#[derive(Debug, Clone)]
struct Flight {
    /// Value of `builds_started` once this build was counted.
    started: u64,
    done: watch::Receiver<Option<Outcome>>,
}

impl Flight {
    async fn outcome(&self) -> Outcome {
        let mut done = self.done.clone();
        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome)
                .clone()
                .unwrap_or_else(|| Err(CacheError::BuildFailure("build produced no result".into()))),
            Err(_) => Err(CacheError::BuildFailure(
                "build task ended without a result".into(),
            )),
        };
        outcome
    }
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<Arc<CacheEntry>>,
    failure: Option<Failure>,
    /// Set while a build runs; readers wait on it instead of the published entry.
    in_flight: Option<Flight>,
}

struct Inner {
    locator: Arc<dyn SourceLocator>,
    settings: Arc<BuildSettings>,
    ttl: Duration,
    slot: RwLock<Slot>,
    builds_started: AtomicU64,
}

/// Serves the last built graph while its source is unchanged and younger than
/// the TTL. At most one build runs at a time. Callers arriving meanwhile wait
/// for it and share its outcome, and a build outlives any caller that stops
/// waiting on it.
pub struct GraphCache {
    inner: Arc<Inner>,
}

impl GraphCache {
    pub fn new(locator: Arc<dyn SourceLocator>, settings: BuildSettings, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                locator,
                settings: Arc::new(settings),
                ttl,
                slot: RwLock::new(Slot::default()),
                builds_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let settings = BuildSettings {
            columns: cfg.columns.clone(),
            placeholders: cfg.placeholders.clone(),
            fingerprint: cfg.cache.fingerprint,
        };
        Self::new(
            Arc::from(locator::from_config(&cfg.source)),
            settings,
            cfg.cache_ttl(),
        )
    }

    /// Returns the current graph, rebuilding it first when stale or when forced.
    ///
    /// Must be called from within a tokio runtime; the build runs as its own task.
    pub async fn get(&self, force_refresh: bool) -> Outcome {
        let seen_started = self.inner.builds_started.load(Ordering::Acquire);

        loop {
            let running = self.inner.slot.read().in_flight.clone();
            let flight = match running {
                Some(flight) => flight,
                None => {
                    if !force_refresh {
                        if let Some(result) = self.inner.check() {
                            if result.is_ok() {
                                CACHE_HITS_TOTAL.inc();
                            }
                            return result;
                        }
                    }
                    let mut slot = self.inner.slot.write();
                    let raced = slot.in_flight.clone();
                    match raced {
                        Some(flight) => flight,
                        None => Inner::start(&self.inner, &mut slot, force_refresh),
                    }
                }
            };

            let outcome = flight.outcome().await;
            // forced callers only accept a build that started after they asked
            if !force_refresh || flight.started > seen_started {
                return outcome;
            }
        }
    }

    /// Reports the cache state without building anything.
    pub fn peek(&self) -> CacheStatus {
        let slot = self.inner.slot.read();
        CacheStatus {
            cached: slot.entry.is_some(),
            loaded_at: slot.entry.as_ref().map(|e| e.built_at),
            source_file: slot.entry.as_ref().map(|e| e.source_path.clone()),
            build_duration_ms: slot.entry.as_ref().map(|e| e.load_time_ms()),
            last_error: slot.failure.as_ref().map(|f| f.error.to_string()),
        }
    }

    /// Number of builds started since construction.
    pub fn builds_started(&self) -> u64 {
        self.inner.builds_started.load(Ordering::Acquire)
    }
}

impl Inner {
    /// `Some` when the stored state can answer the caller without a build.
    fn check(&self) -> Option<Outcome> {
        let (entry, failure) = {
            let slot = self.slot.read();
            (slot.entry.clone(), slot.failure.clone())
        };

        if let Some(failure) = failure {
            if self.probe() == failure.fingerprint {
                return Some(Err(failure.error));
            }
            debug!(target = "cache", "source changed since last failed build");
            return None;
        }

        let entry = entry?;
        let age = entry.built.elapsed();
        if age >= self.ttl {
            info!(target = "cache", age_secs = age.as_secs(), ttl_secs = self.ttl.as_secs(), "cache TTL expired");
            return None;
        }

        match Fingerprint::of(&entry.source_path, self.settings.fingerprint) {
            Ok(fp) if fp == entry.source_fingerprint => Some(Ok(entry)),
            Ok(_) => {
                info!(target = "cache", path = %entry.source_path.display(), "source file modified, cache invalidated");
                None
            }
            Err(e) => {
                info!(target = "cache", path = %entry.source_path.display(), error = %e, "source file unreadable, cache invalidated");
                None
            }
        }
    }

    fn probe(&self) -> Option<Fingerprint> {
        let path = self.locator.locate().ok()?;
        Fingerprint::of(&path, self.settings.fingerprint).ok()
    }

    /// Registers a new build in `slot` and spawns it. Called with the slot write-locked.
    fn start(this: &Arc<Self>, slot: &mut Slot, force_refresh: bool) -> Flight {
        let started = this.builds_started.fetch_add(1, Ordering::AcqRel) + 1;
        if force_refresh && slot.failure.take().is_some() {
            debug!(target = "cache", "cleared cached build error");
        }

        let (tx, rx) = watch::channel(None);
        let flight = Flight { started, done: rx };
        slot.in_flight = Some(flight.clone());

        let inner = Arc::clone(this);
        tokio::spawn(async move {
            let outcome = inner.rebuild(force_refresh).await;
            // nobody left waiting is fine; the outcome is already published
            let _ = tx.send(Some(outcome));
        });
        flight
    }

    async fn rebuild(&self, force_refresh: bool) -> Outcome {
        let locator = Arc::clone(&self.locator);
        let settings = Arc::clone(&self.settings);
        let timer = GRAPH_BUILD_SECONDS.start_timer();
        let outcome = tokio::task::spawn_blocking(move || build_entry(locator.as_ref(), &settings))
            .await
            .unwrap_or_else(|e| {
                Err(Failure {
                    error: CacheError::BuildFailure(format!("build task failed: {e}")),
                    fingerprint: None,
                })
            });
        timer.observe_duration();

        let mut slot = self.slot.write();
        slot.in_flight = None;

        match outcome {
            Ok(entry) => {
                let entry = Arc::new(entry);
                GRAPH_BUILDS_TOTAL.inc();
                GRAPH_NODES.set(entry.graph.nodes.len() as i64);
                ROWS_SKIPPED_TOTAL
                    .with_label_values(&["malformed"])
                    .inc_by(entry.row_errors.malformed as u64);
                ROWS_SKIPPED_TOTAL
                    .with_label_values(&["unresolvable"])
                    .inc_by(entry.row_errors.unresolvable as u64);
                info!(
                    target = "cache",
                    path = %entry.source_path.display(),
                    items = entry.graph.total_items,
                    edges = entry.graph.total_connections,
                    skipped = entry.row_errors.total(),
                    load_time_ms = entry.load_time_ms(),
                    "cache updated"
                );

                slot.entry = Some(Arc::clone(&entry));
                slot.failure = None;
                Ok(entry)
            }
            Err(failure) => {
                GRAPH_BUILD_FAILURES_TOTAL.inc();
                warn!(target = "cache", error = %failure.error, forced = force_refresh, "lineage graph build failed");

                if force_refresh && failure.error.is_source_unavailable() {
                    slot.entry = None;
                }
                let error = failure.error.clone();
                slot.failure = Some(failure);
                Err(error)
            }
        }
    }
}

fn build_entry(locator: &dyn SourceLocator, settings: &BuildSettings) -> Result<CacheEntry, Failure> {
    let started = Instant::now();
    let unavailable = |path: &Path, e: io::Error| Failure {
        error: CacheError::SourceUnavailable(format!("{}: {e}", path.display())),
        fingerprint: None,
    };

    let path = locator.locate().map_err(|error| Failure {
        error,
        fingerprint: None,
    })?;
    let fingerprint =
        Fingerprint::of(&path, settings.fingerprint).map_err(|e| unavailable(&path, e))?;
    let file = File::open(&path).map_err(|e| unavailable(&path, e))?;
    info!(target = "cache", path = %path.display(), "loading lineage source");

    let set = read_rows(file, &settings.columns).map_err(|e| Failure {
        error: CacheError::BuildFailure(format!("reading {}: {e}", path.display())),
        fingerprint: Some(fingerprint.clone()),
    })?;
    let report = GraphBuilder::new(&settings.placeholders).build_rows(&set);
    let stats = compute_stats(&report.graph);

    Ok(CacheEntry {
        graph: report.graph,
        stats,
        source_path: path,
        source_fingerprint: fingerprint,
        built_at: Utc::now(),
        build_duration: started.elapsed(),
        rows_read: report.rows_read,
        row_errors: report.row_errors,
        built: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::SystemTime;

    use tempfile::TempDir;

    use super::*;
    use crate::locator::FixedPath;

    const HEADER: &str = "Workspace Name,Item Name,Item Type,Source Type,Source Connection\n";

    fn write_csv(path: &Path, rows: &[&str]) {
        let mut body = HEADER.to_string();
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        fs::write(path, body).unwrap();
    }

    fn set_mtime(path: &Path, offset_secs: u64) {
        let t = SystemTime::now() + Duration::from_secs(offset_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(t)
            .unwrap();
    }

    fn cache_for(path: &Path, ttl: Duration, fingerprint: FingerprintMode) -> GraphCache {
        let settings = BuildSettings {
            fingerprint,
            ..BuildSettings::default()
        };
        GraphCache::new(Arc::new(FixedPath(path.to_path_buf())), settings, ttl)
    }

    fn fixture() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_csv(&path, &["Sales,Report1,Report,Sql,db://host1/sales"]);
        (dir, path)
    }

    #[tokio::test]
    async fn serves_same_instance_while_valid() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);

        let first = cache.get(false).await.unwrap();
        let second = cache.get(false).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.builds_started(), 1);
        assert_eq!(first.graph.total_items, 1);
        assert_eq!(first.stats.total_edges, 1);
    }

    #[tokio::test]
    async fn touched_source_triggers_rebuild() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);

        let first = cache.get(false).await.unwrap();
        write_csv(
            &path,
            &[
                "Sales,Report1,Report,Sql,db://host1/sales",
                "Sales,Report2,Report,Sql,db://host1/sales",
            ],
        );
        set_mtime(&path, 10);
        let second = cache.get(false).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.graph.total_items, 2);
        assert_eq!(cache.builds_started(), 2);
    }

    #[tokio::test]
    async fn expired_ttl_triggers_rebuild() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::ZERO, FingerprintMode::Mtime);

        let first = cache.get(false).await.unwrap();
        let second = cache.get(false).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.graph, second.graph);
    }

    #[tokio::test]
    async fn force_refresh_always_rebuilds() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);

        let first = cache.get(false).await.unwrap();
        let forced = cache.get(true).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &forced));
        assert_eq!(cache.builds_started(), 2);
    }

    #[tokio::test]
    async fn sha256_ignores_touch_without_content_change() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Sha256);

        let first = cache.get(false).await.unwrap();
        set_mtime(&path, 10);
        let second = cache.get(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        write_csv(&path, &["Ops,Pipeline1,DataPipeline,Sql,db://host2/ops"]);
        let third = cache.get(false).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn missing_source_is_cached_until_it_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);

        let err = cache.get(false).await.unwrap_err();
        assert!(err.is_source_unavailable());
        assert!(cache.get(false).await.unwrap_err().is_source_unavailable());
        assert_eq!(cache.builds_started(), 1);

        let status = cache.peek();
        assert!(!status.cached);
        assert!(status.last_error.is_some());

        write_csv(&path, &["Sales,Report1,Report,Sql,db://host1/sales"]);
        let entry = cache.get(false).await.unwrap();
        assert_eq!(entry.graph.nodes.len(), 3);
        assert!(cache.peek().last_error.is_none());
    }

    #[tokio::test]
    async fn deleted_source_is_not_served() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);
        cache.get(false).await.unwrap();

        fs::remove_file(&path).unwrap();

        assert!(cache.get(false).await.unwrap_err().is_source_unavailable());
        let status = cache.peek();
        assert!(status.cached, "previous snapshot is retained for reporting");
        assert!(status.last_error.is_some());

        assert!(cache.get(true).await.unwrap_err().is_source_unavailable());
        assert!(!cache.peek().cached);
    }

    #[tokio::test]
    async fn failed_build_keeps_previous_state() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);
        let good = cache.get(false).await.unwrap();

        fs::write(&path, b"Workspace Name,\xff\xfe\n").unwrap();
        set_mtime(&path, 10);

        let err = cache.get(false).await.unwrap_err();
        assert!(matches!(err, CacheError::BuildFailure(_)));
        let status = cache.peek();
        assert!(status.cached);
        assert_eq!(status.loaded_at, Some(good.built_at));

        // unchanged source: the cached error answers without another build
        assert!(cache.get(false).await.is_err());
        assert_eq!(cache.builds_started(), 2);

        write_csv(&path, &["Sales,Report1,Report,Sql,db://host1/sales"]);
        set_mtime(&path, 20);
        assert!(cache.get(false).await.is_ok());
    }

    #[tokio::test]
    async fn force_refresh_clears_cached_error() {
        let (_dir, path) = fixture();
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);
        fs::write(&path, b"Workspace Name,\xff\xfe\n").unwrap();

        assert!(cache.get(false).await.is_err());
        assert!(cache.get(true).await.is_err());
        assert_eq!(cache.builds_started(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_gets_share_one_build() {
        let (_dir, path) = fixture();
        let cache = Arc::new(cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(false).await.unwrap() })
            })
            .collect();

        let mut entries = Vec::new();
        for h in handles {
            entries.push(h.await.unwrap());
        }

        assert_eq!(cache.builds_started(), 1);
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
    }

    fn write_large_csv(path: &Path, rows: usize) {
        let mut body = HEADER.to_string();
        for i in 0..rows {
            body.push_str(&format!(
                "ws{},item{i},Lakehouse,Sql,db://host{}/db\n",
                i % 50,
                i % 100
            ));
        }
        fs::write(path, body).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_wait_for_forced_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_large_csv(&path, 100_000);
        let cache = Arc::new(cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime));
        let before = cache.get(false).await.unwrap();

        let forced = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(true).await.unwrap() })
        };
        while cache.builds_started() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let read = cache.get(false).await.unwrap();
        let forced = forced.await.unwrap();

        assert!(!Arc::ptr_eq(&read, &before));
        assert!(Arc::ptr_eq(&read, &forced));
        assert_eq!(cache.builds_started(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_caller_does_not_restart_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_large_csv(&path, 100_000);
        let cache = cache_for(&path, Duration::from_secs(300), FingerprintMode::Mtime);

        let _ = tokio::time::timeout(Duration::from_millis(1), cache.get(false)).await;
        let entry = cache.get(false).await.unwrap();

        assert_eq!(cache.builds_started(), 1);
        assert_eq!(entry.graph.total_items, 100_000);
    }
}
