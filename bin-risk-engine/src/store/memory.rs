//! In-process collaborator implementations
//!
//! Used by the `risk-eval` binary and by tests.

use super::{AuditStore, EventStore, LookupEvent, PatternRepository, SessionController, Subject};
use crate::patterns::FraudPattern;
use crate::types::{AutomationAction, DetectionRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Lookup history held in memory.
///
/// First-seen times live outside the event list so that session age
/// survives [`MemoryEventStore::prune_before`].
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<LookupEvent>>,
    first_seen: DashMap<Subject, DateTime<Utc>>,
}

impl MemoryEventStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn record(&self, event: LookupEvent) {
        self.note_first_seen(&event);
        self.events.write().push(event);
    }

    /// Append many events
    pub fn record_all(&self, events: impl IntoIterator<Item = LookupEvent>) {
        let mut stored = self.events.write();
        for event in events {
            self.note_first_seen(&event);
            stored.push(event);
        }
    }

    fn note_first_seen(&self, event: &LookupEvent) {
        let mut subjects = vec![
            Subject::Session(event.session_id.clone()),
            Subject::Ip(event.ip.clone()),
        ];
        if let Some(user) = &event.user_id {
            subjects.push(Subject::User(user.clone()));
        }

        for subject in subjects {
            self.first_seen
                .entry(subject)
                .and_modify(|seen| *seen = (*seen).min(event.timestamp))
                .or_insert(event.timestamp);
        }
    }

    /// Drop events at or before `cutoff`, returning how many were removed
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.timestamp > cutoff);
        before - events.len()
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn count_events(
        &self,
        subject: &Subject,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        let events = self.events.read();
        let count = events
            .iter()
            .filter(|e| e.matches(subject) && e.timestamp > since && e.timestamp <= until)
            .count();
        Ok(count as u64)
    }

    async fn distinct_countries(
        &self,
        subject: &Subject,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let events = self.events.read();
        let countries: BTreeSet<String> = events
            .iter()
            .filter(|e| e.matches(subject) && e.timestamp > since && e.timestamp <= until)
            .map(|e| e.country.to_uppercase())
            .collect();
        Ok(countries.into_iter().collect())
    }

    async fn recent_timestamps(
        &self,
        subject: &Subject,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let events = self.events.read();
        let mut stamps: Vec<DateTime<Utc>> = events
            .iter()
            .filter(|e| e.matches(subject) && e.timestamp <= until)
            .map(|e| e.timestamp)
            .collect();
        stamps.sort_unstable();
        let skip = stamps.len().saturating_sub(limit);
        Ok(stamps.split_off(skip))
    }

    async fn first_seen(&self, subject: &Subject) -> Result<Option<DateTime<Utc>>> {
        Ok(self.first_seen.get(subject).map(|seen| *seen))
    }
}

/// Pattern repository held in memory, with load accounting
#[derive(Debug, Default)]
pub struct MemoryPatternRepository {
    patterns: RwLock<Vec<FraudPattern>>,
    loads: AtomicUsize,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryPatternRepository {
    /// Create repository serving `patterns`
    pub fn new(patterns: Vec<FraudPattern>) -> Self {
        Self {
            patterns: RwLock::new(patterns),
            ..Default::default()
        }
    }

    /// Repository seeded with the default pattern set
    pub fn with_defaults() -> Self {
        Self::new(FraudPattern::default_set())
    }

    /// Simulate a slow backing store
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(Some(latency));
        self
    }

    /// Change the simulated latency of subsequent loads
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Replace the stored patterns
    pub fn set_patterns(&self, patterns: Vec<FraudPattern>) {
        *self.patterns.write() = patterns;
    }

    /// Make subsequent loads fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of loads served (including failed ones)
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatternRepository for MemoryPatternRepository {
    async fn active_patterns(&self) -> Result<Vec<FraudPattern>> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::PatternRepository("repository unavailable".to_string()));
        }

        Ok(self
            .patterns
            .read()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }
}

/// Session controller that remembers what it was asked to do
#[derive(Debug, Default)]
pub struct MemorySessionController {
    blocked: DashMap<String, DateTime<Utc>>,
    rate_limited: DashMap<String, DateTime<Utc>>,
    block_calls: AtomicUsize,
}

impl MemorySessionController {
    /// Create controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session is blocked
    pub fn is_blocked(&self, session_id: &str) -> bool {
        self.blocked.contains_key(session_id)
    }

    /// Whether strict rate limits apply to the session
    pub fn is_rate_limited(&self, session_id: &str) -> bool {
        self.rate_limited.contains_key(session_id)
    }

    /// Number of blocked sessions
    pub fn blocked_sessions(&self) -> usize {
        self.blocked.len()
    }

    /// Number of block calls received, including no-ops
    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionController for MemorySessionController {
    async fn block_session(&self, session_id: &str) -> Result<()> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.blocked
            .entry(session_id.to_string())
            .or_insert_with(Utc::now);
        Ok(())
    }

    async fn apply_strict_rate_limits(&self, session_id: &str) -> Result<()> {
        self.rate_limited
            .entry(session_id.to_string())
            .or_insert_with(Utc::now);
        Ok(())
    }
}

/// Audit sink held in memory
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    detections: Mutex<Vec<DetectionRecord>>,
    actions: Mutex<Vec<AutomationAction>>,
}

impl MemoryAuditStore {
    /// Create empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of persisted detection records
    pub fn detections(&self) -> Vec<DetectionRecord> {
        self.detections.lock().clone()
    }

    /// Snapshot of persisted actions
    pub fn actions(&self) -> Vec<AutomationAction> {
        self.actions.lock().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append_detection(&self, record: &DetectionRecord) -> Result<()> {
        self.detections.lock().push(record.clone());
        Ok(())
    }

    async fn append_action(&self, action: &AutomationAction) -> Result<()> {
        self.actions.lock().push(action.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn event(session: &str, user: Option<&str>, country: &str, at: DateTime<Utc>) -> LookupEvent {
        LookupEvent {
            session_id: session.to_string(),
            user_id: user.map(|u| u.to_string()),
            ip: "203.0.113.7".to_string(),
            country: country.to_string(),
            bin: "457173".to_string(),
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn test_window_is_half_open() {
        let store = MemoryEventStore::new();
        let now = Utc::now();
        store.record(event("s1", None, "US", now - ChronoDuration::seconds(60)));
        store.record(event("s1", None, "US", now - ChronoDuration::seconds(30)));
        store.record(event("s1", None, "US", now));

        let count = store
            .count_events(&Subject::Session("s1".into()), now - ChronoDuration::seconds(60), now)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_distinct_countries_per_user() {
        let store = MemoryEventStore::new();
        let now = Utc::now();
        for (i, c) in ["US", "GB", "us", "DE"].iter().enumerate() {
            store.record(event("s1", Some("u1"), c, now - ChronoDuration::minutes(i as i64)));
        }
        store.record(event("s2", Some("u2"), "FR", now));

        let countries = store
            .distinct_countries(&Subject::User("u1".into()), now - ChronoDuration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(countries, vec!["DE", "GB", "US"]);
    }

    #[tokio::test]
    async fn test_recent_timestamps_oldest_first() {
        let store = MemoryEventStore::new();
        let now = Utc::now();
        for i in 0..15 {
            store.record(event("s1", None, "US", now - ChronoDuration::seconds(i)));
        }

        let stamps = store
            .recent_timestamps(&Subject::Session("s1".into()), now, 10)
            .await
            .unwrap();
        assert_eq!(stamps.len(), 10);
        assert_eq!(stamps[0], now - ChronoDuration::seconds(9));
        assert_eq!(stamps[9], now);
    }

    #[tokio::test]
    async fn test_prune_drops_old_events_but_keeps_first_seen() {
        let store = MemoryEventStore::new();
        let now = Utc::now();
        let opened = now - ChronoDuration::hours(3);
        store.record(event("s1", Some("u1"), "US", opened));
        for i in 0..5 {
            store.record(event("s1", Some("u1"), "US", now - ChronoDuration::seconds(i)));
        }

        assert_eq!(store.prune_before(now - ChronoDuration::hours(1)), 1);
        assert_eq!(store.len(), 5);
        assert_eq!(store.prune_before(now - ChronoDuration::hours(1)), 0);

        let session = Subject::Session("s1".into());
        assert_eq!(store.first_seen(&session).await.unwrap(), Some(opened));
        assert_eq!(
            store.first_seen(&Subject::User("u1".into())).await.unwrap(),
            Some(opened)
        );
        assert_eq!(store.first_seen(&Subject::Session("s2".into())).await.unwrap(), None);

        let count = store
            .count_events(&session, now - ChronoDuration::hours(4), now)
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_first_seen_ignores_arrival_order() {
        let store = MemoryEventStore::new();
        let now = Utc::now();
        store.record(event("s1", None, "US", now));
        store.record_all(vec![
            event("s1", None, "US", now - ChronoDuration::minutes(5)),
            event("s1", None, "US", now - ChronoDuration::minutes(2)),
        ]);

        let seen = store.first_seen(&Subject::Session("s1".into())).await.unwrap();
        assert_eq!(seen, Some(now - ChronoDuration::minutes(5)));
    }

    #[tokio::test]
    async fn test_block_is_idempotent() {
        let controller = MemorySessionController::new();
        controller.block_session("s1").await.unwrap();
        controller.block_session("s1").await.unwrap();

        assert!(controller.is_blocked("s1"));
        assert_eq!(controller.blocked_sessions(), 1);
        assert_eq!(controller.block_calls(), 2);
    }

    #[tokio::test]
    async fn test_repository_serves_only_active_patterns() {
        let mut patterns = FraudPattern::default_set();
        patterns[0].active = false;
        let repo = MemoryPatternRepository::new(patterns);

        let active = repo.active_patterns().await.unwrap();
        assert_eq!(active.len(), FraudPattern::default_set().len() - 1);
        assert_eq!(repo.load_count(), 1);

        repo.set_failing(true);
        assert!(repo.active_patterns().await.is_err());
    }
}
