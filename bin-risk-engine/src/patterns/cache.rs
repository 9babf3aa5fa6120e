//! TTL cache of active fraud patterns with single-flight refresh
//!
//! Readers always get an immutable snapshot. Once the TTL has elapsed the
//! first reader to notice starts one background refresh; everyone (including
//! that reader) keeps serving the stale snapshot until it completes. Only the
//! very first load, when there is nothing to serve yet, is awaited inline,
//! and concurrent first readers share that single load. Every load is
//! bounded by a timeout.

use super::PatternSet;
use crate::metrics::Metrics;
use crate::store::PatternRepository;
use crate::Error;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct CacheState {
    patterns: Arc<PatternSet>,
    refreshed_at: Option<Instant>,
    generation: u64,
}

struct Inner {
    repository: Arc<dyn PatternRepository>,
    ttl: Duration,
    load_timeout: Duration,
    state: RwLock<CacheState>,
    refresh_lock: Arc<Mutex<()>>,
    metrics: Metrics,
}

impl Inner {
    /// Load from the repository. Callers must hold `refresh_lock`.
    ///
    /// A load running past `load_timeout` is dropped and counts as failed, so
    /// a hung repository never holds the lock longer than that.
    async fn load(&self) -> bool {
        let load = self.repository.active_patterns();
        let loaded = match tokio::time::timeout(self.load_timeout, load).await {
            Ok(result) => result,
            Err(_) => Err(Error::PatternRepository(format!(
                "load timed out after {}ms",
                self.load_timeout.as_millis()
            ))),
        };

        match loaded {
            Ok(patterns) => {
                let set: PatternSet = patterns
                    .into_iter()
                    .filter(|p| p.active)
                    .map(|p| (p.id.clone(), p))
                    .collect();
                let count = set.len();

                let mut state = self.state.write();
                state.patterns = Arc::new(set);
                state.refreshed_at = Some(Instant::now());
                state.generation += 1;
                drop(state);

                self.metrics.record_refresh(true);
                debug!(patterns = count, "Pattern cache refreshed");
                true
            }
            Err(e) => {
                let mut state = self.state.write();
                // Keep serving the previous snapshot for another TTL; a cache
                // that never loaded retries on the next read
                if state.refreshed_at.is_some() {
                    state.refreshed_at = Some(Instant::now());
                }
                state.generation += 1;
                drop(state);

                self.metrics.record_refresh(false);
                warn!(error = %e, "Pattern cache refresh failed, serving previous snapshot");
                false
            }
        }
    }
}

/// Process-wide pattern cache, cheap to clone
#[derive(Clone)]
pub struct PatternCache {
    inner: Arc<Inner>,
}

impl PatternCache {
    /// Create an empty cache over `repository`
    pub fn new(
        repository: Arc<dyn PatternRepository>,
        ttl: Duration,
        load_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                ttl,
                load_timeout,
                state: RwLock::new(CacheState {
                    patterns: Arc::new(PatternSet::new()),
                    refreshed_at: None,
                    generation: 0,
                }),
                refresh_lock: Arc::new(Mutex::new(())),
                metrics,
            }),
        }
    }

    /// Current active patterns, refreshing if the TTL has elapsed
    pub async fn patterns(&self) -> Arc<PatternSet> {
        let (snapshot, refreshed_at, generation) = {
            let state = self.inner.state.read();
            (state.patterns.clone(), state.refreshed_at, state.generation)
        };

        match refreshed_at {
            Some(at) if at.elapsed() <= self.inner.ttl => snapshot,
            Some(_) => {
                self.spawn_refresh(generation);
                snapshot
            }
            None => self.initial_load(generation).await,
        }
    }

    async fn initial_load(&self, seen_generation: u64) -> Arc<PatternSet> {
        let _guard = self.inner.refresh_lock.lock().await;

        // Another reader loaded (or tried to) while we waited
        let generation = self.generation();
        if generation == seen_generation {
            self.inner.load().await;
        }
        self.snapshot()
    }

    fn spawn_refresh(&self, seen_generation: u64) {
        let Ok(guard) = self.inner.refresh_lock.clone().try_lock_owned() else {
            return;
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let generation = inner.state.read().generation;
            if generation != seen_generation {
                return;
            }
            info!("Pattern cache stale, refreshing");
            inner.load().await;
        });
    }

    /// Force a refresh, waiting for any in-flight one first
    pub async fn refresh(&self) -> bool {
        let _guard = self.inner.refresh_lock.lock().await;
        self.inner.load().await
    }

    /// Current snapshot without triggering a refresh
    pub fn snapshot(&self) -> Arc<PatternSet> {
        self.inner.state.read().patterns.clone()
    }

    /// Completed load attempts, successful or not
    pub fn generation(&self) -> u64 {
        self.inner.state.read().generation
    }

    /// Configured TTL
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}

impl std::fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("PatternCache")
            .field("ttl", &self.inner.ttl)
            .field("patterns", &state.patterns.len())
            .field("generation", &state.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{FraudPattern, PatternRule};
    use crate::store::MemoryPatternRepository;

    const TTL: Duration = Duration::from_secs(300);
    const LOAD_TIMEOUT: Duration = Duration::from_secs(1);

    fn cache(repo: Arc<MemoryPatternRepository>) -> PatternCache {
        PatternCache::new(repo, TTL, LOAD_TIMEOUT, Metrics::new().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_load_is_single_flight() {
        let repo = Arc::new(MemoryPatternRepository::with_defaults().with_latency(Duration::from_millis(50)));
        let cache = cache(repo.clone());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.patterns().await.len() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 4);
        }

        assert_eq!(repo.load_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_does_not_reload() {
        let repo = Arc::new(MemoryPatternRepository::with_defaults());
        let cache = cache(repo.clone());

        cache.patterns().await;
        tokio::time::advance(Duration::from_secs(299)).await;
        cache.patterns().await;

        assert_eq!(repo.load_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_serves_snapshot_during_refresh() {
        let repo = Arc::new(MemoryPatternRepository::with_defaults().with_latency(Duration::from_millis(50)));
        let cache = cache(repo.clone());
        assert_eq!(cache.patterns().await.len(), 4);

        repo.set_patterns(vec![FraudPattern::new(
            "only",
            "Only pattern",
            PatternRule::Velocity {
                max_lookups_per_minute: 10,
                max_requests_per_second: 2,
            },
            50.0,
        )]);
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        // Every stale reader gets the old snapshot immediately
        for _ in 0..8 {
            assert_eq!(cache.patterns().await.len(), 4);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(repo.load_count(), 2);
        assert_eq!(cache.patterns().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let repo = Arc::new(MemoryPatternRepository::with_defaults());
        let cache = cache(repo.clone());
        cache.patterns().await;

        repo.set_failing(true);
        assert!(!cache.refresh().await);
        assert_eq!(cache.snapshot().len(), 4);
        assert_eq!(cache.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_first_load_gives_up_after_timeout() {
        let repo = Arc::new(
            MemoryPatternRepository::with_defaults().with_latency(Duration::from_secs(3600)),
        );
        let cache = cache(repo.clone());

        let started = Instant::now();
        assert!(cache.patterns().await.is_empty());
        assert!(started.elapsed() < LOAD_TIMEOUT * 2);
        assert_eq!(cache.generation(), 1);

        // Nothing was ever loaded, so the next reader tries again
        repo.set_latency(None);
        assert_eq!(cache.patterns().await.len(), 4);
        assert_eq!(repo.load_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_refresh_releases_the_cache() {
        let repo = Arc::new(MemoryPatternRepository::with_defaults());
        let cache = cache(repo.clone());
        assert_eq!(cache.patterns().await.len(), 4);

        repo.set_latency(Some(Duration::from_secs(3600)));
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.patterns().await.len(), 4);

        tokio::time::sleep(LOAD_TIMEOUT * 2).await;
        assert_eq!(repo.load_count(), 2);
        assert_eq!(cache.generation(), 2);
        assert_eq!(cache.snapshot().len(), 4);

        // The timed-out load no longer holds the refresh lock
        repo.set_latency(None);
        repo.set_patterns(vec![FraudPattern::new(
            "only",
            "Only pattern",
            PatternRule::Velocity {
                max_lookups_per_minute: 10,
                max_requests_per_second: 2,
            },
            50.0,
        )]);
        let started = Instant::now();
        assert!(cache.refresh().await);
        assert!(started.elapsed() < LOAD_TIMEOUT);
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_patterns_are_not_served() {
        let mut inactive = FraudPattern::default_set().remove(0);
        inactive.active = false;
        let repo = Arc::new(MemoryPatternRepository::new(vec![inactive]));

        assert!(cache(repo).patterns().await.is_empty());
    }
}
