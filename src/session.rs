use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::LoadError;
use crate::model::path_key;
use crate::provider::{LoadCancel, SourceModelProvider};
use crate::snapshot::TreeSnapshot;

type LoadTask = tokio::task::JoinHandle<Result<TreeSnapshot, LoadError>>;

/// Holds zero or one loaded snapshot, keyed by canonical tree path.
///
/// Snapshots are handed out as `Arc`s: a reload swaps the pointer, and anything still
/// holding the previous snapshot keeps reading it unchanged.
pub struct SessionCache {
    provider: Arc<dyn SourceModelProvider>,
    current: Option<Arc<TreeSnapshot>>,
    timeout: Option<Duration>,
    loads: usize,
    runtime: Option<tokio::runtime::Runtime>,
    /// A timed-out load that was told to stop but may not have returned yet.
    abandoned: Option<LoadTask>,
}

impl SessionCache {
    pub fn new(provider: Arc<dyn SourceModelProvider>) -> Self {
        Self {
            provider,
            current: None,
            timeout: None,
            loads: 0,
            runtime: None,
            abandoned: None,
        }
    }

    /// Cancel provider loads that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn current(&self) -> Option<&Arc<TreeSnapshot>> {
        self.current.as_ref()
    }

    /// Provider invocations so far, successful or not.
    pub fn load_count(&self) -> usize {
        self.loads
    }

    pub fn clear(&mut self) {
        if let Some(old) = self.current.take() {
            tracing::debug!(tree = %old.path().display(), "session cache cleared");
        }
    }

    /// The snapshot for `tree_path`, loading it unless it is already cached.
    ///
    /// A different path evicts the cached snapshot before the provider runs, so a
    /// failed or timed-out load leaves the cache empty.
    pub fn get_or_load(&mut self, tree_path: &Path) -> Result<Arc<TreeSnapshot>, LoadError> {
        let canonical = std::fs::canonicalize(tree_path).unwrap_or_else(|_| tree_path.to_path_buf());
        let key = path_key(&canonical);

        if let Some(snap) = self.current.as_ref().filter(|s| path_key(s.path()) == key) {
            tracing::debug!(tree = %canonical.display(), "session cache hit");
            return Ok(Arc::clone(snap));
        }

        tracing::debug!(tree = %canonical.display(), "session cache miss");
        self.clear();
        self.loads += 1;

        let snapshot = Arc::new(self.build(canonical)?);
        self.current = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn build(&mut self, path: PathBuf) -> Result<TreeSnapshot, LoadError> {
        let provider = Arc::clone(&self.provider);
        let timeout = self.timeout;
        let abandoned = self.abandoned.take();
        let runtime = self.runtime()?;

        let (result, leftover) = runtime.block_on(async move {
            // Loads never overlap: a cancelled predecessor must return first.
            if let Some(previous) = abandoned {
                tracing::debug!("waiting for cancelled load to stop");
                let _ = previous.await;
            }

            let cancel = LoadCancel::default();
            let tree_path = path.clone();
            let worker_cancel = cancel.clone();
            let mut task: LoadTask = tokio::task::spawn_blocking(move || {
                let tree = provider.load(&tree_path, &worker_cancel)?;
                TreeSnapshot::build(tree_path, tree)
            });

            let joined = match timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::warn!(tree = %path.display(), ?limit, "tree load timed out");
                        cancel.cancel();
                        return (Err(LoadError::TimedOut { path, timeout: limit }), Some(task));
                    }
                },
                None => task.await,
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(LoadError::Worker(panic_message(e.into_panic()))),
                Err(e) => Err(LoadError::Worker(e.to_string())),
            };
            (result, None)
        });

        self.abandoned = leftover;
        result
    }

    fn runtime(&mut self) -> Result<&tokio::runtime::Runtime, LoadError> {
        if self.runtime.is_none() {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .map_err(|e| LoadError::Worker(format!("failed to start runtime: {e}")))?;
            self.runtime = Some(rt);
        }
        self.runtime
            .as_ref()
            .ok_or_else(|| LoadError::Worker("runtime unavailable".to_string()))
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        // A cancelled load may still be running; do not wait for it.
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("provider panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("provider panicked: {s}")
    } else {
        "provider panicked".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inspector::{build_source_model, parse_source};
    use crate::provider::LoadedTree;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// In-memory trees keyed by tree path; unknown paths fail to load.
    #[derive(Default)]
    pub(crate) struct FixtureProvider {
        pub trees: HashMap<PathBuf, Vec<(PathBuf, String)>>,
        pub calls: AtomicUsize,
        pub delay: Option<Duration>,
        /// Stop sleeping once cancelled instead of running out the full delay.
        pub honor_cancel: bool,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl FixtureProvider {
        pub fn with_tree(mut self, tree: &str, files: &[(&str, &str)]) -> Self {
            let files = files
                .iter()
                .map(|(p, src)| (PathBuf::from(p), src.to_string()))
                .collect();
            self.trees.insert(PathBuf::from(tree), files);
            self
        }
    }

    impl SourceModelProvider for FixtureProvider {
        fn load(&self, tree_path: &Path, cancel: &LoadCancel) -> Result<LoadedTree, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let result = self.load_files(tree_path, cancel);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    impl FixtureProvider {
        fn load_files(&self, tree_path: &Path, cancel: &LoadCancel) -> Result<LoadedTree, LoadError> {
            if let Some(d) = self.delay {
                let until = Instant::now() + d;
                while Instant::now() < until {
                    if self.honor_cancel && cancel.is_cancelled() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            cancel.check(tree_path)?;
            let files = self.trees.get(tree_path).ok_or_else(|| LoadError::Malformed {
                path: tree_path.to_path_buf(),
                message: "not a fixture tree".to_string(),
            })?;
            let parsed: Vec<_> = files
                .iter()
                .map(|(p, src)| parse_source(p.clone(), "Fixture".into(), src.clone()).unwrap())
                .collect();
            let model = build_source_model(&parsed);
            Ok(LoadedTree {
                projects: vec![],
                documents: model.documents,
                symbols: model.symbols,
                warnings: vec![],
            })
        }
    }

    struct PanickingProvider;

    impl SourceModelProvider for PanickingProvider {
        fn load(&self, _: &Path, _: &LoadCancel) -> Result<LoadedTree, LoadError> {
            panic!("solution parser exploded")
        }
    }

    fn fixtures() -> Arc<FixtureProvider> {
        Arc::new(
            FixtureProvider::default()
                .with_tree("/fixtures/one", &[("/fixtures/one/A.cs", "class Foo { void Bar() {} }")])
                .with_tree("/fixtures/two", &[("/fixtures/two/B.cs", "class Baz {}")]),
        )
    }

    #[test]
    fn same_path_is_served_from_cache() {
        let provider = fixtures();
        let mut cache = SessionCache::new(provider.clone());
        let first = cache.get_or_load(Path::new("/fixtures/one")).unwrap();
        let second = cache.get_or_load(Path::new("/fixtures/one")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.load_count(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_path_reloads_and_drops_previous_snapshot() {
        let mut cache = SessionCache::new(fixtures());
        let first = cache.get_or_load(Path::new("/fixtures/one")).unwrap();
        let weak = Arc::downgrade(&first);
        drop(first);

        let second = cache.get_or_load(Path::new("/fixtures/two")).unwrap();
        assert_eq!(cache.load_count(), 2);
        assert!(weak.upgrade().is_none(), "previous snapshot should be unreachable");
        assert_eq!(second.path(), Path::new("/fixtures/two"));
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_swap() {
        let mut cache = SessionCache::new(fixtures());
        let held = cache.get_or_load(Path::new("/fixtures/one")).unwrap();
        cache.get_or_load(Path::new("/fixtures/two")).unwrap();
        assert_eq!(held.index().lookup_by_name("Bar", true).len(), 1);
    }

    #[test]
    fn failed_load_leaves_cache_empty_and_recovers() {
        let mut cache = SessionCache::new(fixtures());
        cache.get_or_load(Path::new("/fixtures/one")).unwrap();

        let err = cache.get_or_load(Path::new("/fixtures/missing")).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
        assert!(cache.current().is_none());

        let snap = cache.get_or_load(Path::new("/fixtures/one")).unwrap();
        assert_eq!(snap.index().lookup_by_name("Bar", true).len(), 1);
        assert_eq!(cache.load_count(), 3);
    }

    #[test]
    fn slow_load_times_out_with_empty_cache() {
        let provider = Arc::new(FixtureProvider {
            delay: Some(Duration::from_millis(500)),
            ..FixtureProvider::default()
        });
        let mut cache = SessionCache::new(provider).with_timeout(Some(Duration::from_millis(20)));
        let err = cache.get_or_load(Path::new("/fixtures/one")).unwrap_err();
        assert!(matches!(err, LoadError::TimedOut { .. }), "{err:?}");
        assert!(cache.current().is_none());
    }

    #[test]
    fn provider_panic_becomes_worker_error() {
        let mut cache = SessionCache::new(Arc::new(PanickingProvider));
        let err = cache.get_or_load(Path::new("/fixtures/one")).unwrap_err();
        match err {
            LoadError::Worker(msg) => assert!(msg.contains("exploded"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(cache.current().is_none());
    }

    #[test]
    fn timed_out_loads_never_overlap_the_next_load() {
        let provider = Arc::new(FixtureProvider {
            delay: Some(Duration::from_millis(400)),
            ..FixtureProvider::default()
        });
        let mut cache = SessionCache::new(provider.clone()).with_timeout(Some(Duration::from_millis(30)));
        for tree in ["/a", "/b", "/c"] {
            let err = cache.get_or_load(Path::new(tree)).unwrap_err();
            assert!(matches!(err, LoadError::TimedOut { .. }), "{err:?}");
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_cancels_the_running_load() {
        let provider = Arc::new(
            FixtureProvider {
                delay: Some(Duration::from_secs(5)),
                honor_cancel: true,
                ..FixtureProvider::default()
            }
            .with_tree("/fixtures/one", &[("/fixtures/one/A.cs", "class Foo {}")]),
        );
        let mut cache = SessionCache::new(provider.clone()).with_timeout(Some(Duration::from_millis(30)));
        let started = Instant::now();
        assert!(cache.get_or_load(Path::new("/fixtures/one")).is_err());

        // Only finishes promptly if the first load stopped when cancelled.
        let second = cache.get_or_load(Path::new("/fixtures/one"));
        assert!(matches!(second, Err(LoadError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
