//! TieredCache: read-through/write-through orchestration over stores
//!
//! Reads probe the edges in order, then the source, and stop at the first
//! hit. Edges that missed before the hit get the value copied in the
//! background; a later write or delete of the same id waits for those
//! copies first. Writes with a source first check that the source and the
//! first edge agree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tierstore::{Error, Result, Store};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::stats::{CacheStats, Counters};

/// Shared handle to a cache tier
pub type Tier = Arc<dyn Store>;

/// Options for [`TieredCache::save`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Skip source/edge verification and write everywhere
    pub force: bool,
}

impl SaveOptions {
    /// Options with `force` set
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Successful result of [`TieredCache::save`]
#[derive(Debug)]
pub enum SaveOutcome {
    /// Value was written; one result per edge, in edge order
    Written(Vec<Result<()>>),
    /// Source and first edge already hold this value; nothing was written
    Unchanged,
}

impl SaveOutcome {
    /// Whether the save was a no-op
    pub fn is_unchanged(&self) -> bool {
        matches!(self, SaveOutcome::Unchanged)
    }

    /// Per-edge write results (empty when unchanged)
    pub fn edge_results(&self) -> &[Result<()>] {
        match self {
            SaveOutcome::Written(results) => results,
            SaveOutcome::Unchanged => &[],
        }
    }
}

#[derive(Default)]
struct Tiers {
    source: Option<Tier>,
    edges: Vec<Tier>,
}

fn same_tier(a: &Tier, b: &Tier) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn tier_label(index: usize, edges: usize) -> String {
    if index < edges {
        format!("edge[{index}]")
    } else {
        "source".to_string()
    }
}

fn log_failure(enabled: bool, tier: &str, action: &str, error: &Error) {
    if enabled {
        warn!(tier, action, error = %error, "Cache tier operation failed");
    }
}

/// `Null` counts as absent
fn present(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

/// Orchestrator over one optional source and an ordered list of edges
pub struct TieredCache {
    tiers: RwLock<Tiers>,
    loggable: AtomicBool,
    stats: Counters,
    /// In-flight promotions keyed by id
    promotions: Mutex<HashMap<String, Vec<JoinHandle<()>>, RandomState>>,
}

impl TieredCache {
    /// Create a cache with no source and no edges
    pub fn new() -> Self {
        Self {
            tiers: RwLock::new(Tiers::default()),
            loggable: AtomicBool::new(false),
            stats: Counters::default(),
            promotions: Mutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Route absorbed per-tier failures to `tracing` (off by default)
    pub fn loggable(&self, enabled: bool) {
        self.loggable.store(enabled, Ordering::Relaxed);
    }

    fn report(&self, tier: &str, action: &str, error: &Error) {
        log_failure(self.loggable.load(Ordering::Relaxed), tier, action, error);
    }

    /// Set the source. `None` is rejected and leaves the current source in
    /// place. Returns whether the candidate was accepted.
    pub fn set_source(&self, source: impl Into<Option<Tier>>) -> bool {
        match source.into() {
            Some(source) => {
                self.tiers.write().source = Some(source);
                true
            }
            None => false,
        }
    }

    /// Remove the source
    pub fn clear_source(&self) {
        self.tiers.write().source = None;
    }

    /// Current source
    pub fn source(&self) -> Option<Tier> {
        self.tiers.read().source.clone()
    }

    /// Replace the edge list.
    ///
    /// `None` entries and repeats of an already listed store are dropped;
    /// the rest keep their order. Returns the number of edges accepted.
    pub fn set_edges<I, T>(&self, candidates: I) -> usize
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<Tier>>,
    {
        let mut edges: Vec<Tier> = Vec::new();
        for candidate in candidates {
            let Some(edge) = candidate.into() else {
                continue;
            };
            if edges.iter().any(|e| same_tier(e, &edge)) {
                continue;
            }
            edges.push(edge);
        }

        let accepted = edges.len();
        self.tiers.write().edges = edges;
        accepted
    }

    /// Snapshot of the edge list
    pub fn edges(&self) -> Vec<Tier> {
        self.tiers.read().edges.clone()
    }

    /// Snapshot of the read/write counters
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn snapshot(&self) -> (Vec<Tier>, Option<Tier>) {
        let tiers = self.tiers.read();
        (tiers.edges.clone(), tiers.source.clone())
    }

    /// Read through the tiers: edges in order, then the source.
    ///
    /// Failing tiers count as misses. On a hit, every edge probed before the
    /// hitting tier receives the value in the background.
    pub async fn get(&self, id: &str) -> Option<Value> {
        let (edges, source) = self.snapshot();

        for (index, tier) in edges.iter().chain(source.iter()).enumerate() {
            match tier.get(id).await {
                Ok(value) => {
                    if let Some(value) = present(value) {
                        self.stats.hit();
                        self.promote(&edges[..index.min(edges.len())], id, &value);
                        return Some(value);
                    }
                }
                Err(e) => self.report(&tier_label(index, edges.len()), "get", &e),
            }
        }

        self.stats.miss();
        None
    }

    fn promote(&self, edges: &[Tier], id: &str, value: &Value) {
        if edges.is_empty() {
            return;
        }
        self.stats.promoted(edges.len() as u64);

        let loggable = self.loggable.load(Ordering::Relaxed);
        let mut promotions = self.promotions.lock();
        promotions.retain(|_, handles| {
            handles.retain(|handle| !handle.is_finished());
            !handles.is_empty()
        });

        let handles = promotions.entry(id.to_string()).or_default();
        for (index, edge) in edges.iter().enumerate() {
            let edge = Arc::clone(edge);
            let id = id.to_string();
            let value = value.clone();

            handles.push(tokio::spawn(async move {
                if let Err(e) = edge.save(&id, value).await {
                    log_failure(loggable, &format!("edge[{index}]"), "promote", &e);
                }
            }));
        }
    }

    /// Wait for in-flight promotions of `id`
    async fn await_promotions(&self, id: &str) {
        let Some(handles) = self.promotions.lock().remove(id) else {
            return;
        };
        // Promotion failures are already logged by the task
        join_all(handles).await;
    }

    /// Wait for background promotions started so far
    pub async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = self
                .promotions
                .lock()
                .drain()
                .flat_map(|(_, handles)| handles)
                .collect();
            if pending.is_empty() {
                return;
            }
            join_all(pending).await;
        }
    }

    /// Write a value.
    ///
    /// - forced with a source: source, then every edge
    /// - with a source: read source and edge 0 together; if they disagree the
    ///   edges are rewritten from the source and [`Error::Inconsistent`] is
    ///   returned; if they agree with `value` nothing is written
    /// - without a source: every edge
    ///
    /// `Null` is rejected with [`Error::Validation`]. A failed verification
    /// read is returned as [`Error::Backend`].
    pub async fn save(&self, id: &str, value: Value, options: SaveOptions) -> Result<SaveOutcome> {
        if value.is_null() {
            return Err(Error::Validation(format!(
                "not saving {id:?}: value is absent"
            )));
        }

        self.await_promotions(id).await;

        let (edges, source) = self.snapshot();
        let Some(source) = source else {
            return Ok(SaveOutcome::Written(self.save_edges(&edges, id, &value).await));
        };

        if options.force {
            return self.write_through(&source, &edges, id, value).await;
        }

        let (current, cached) = match edges.first() {
            Some(edge) => {
                let (current, cached) = tokio::join!(source.get(id), edge.get(id));
                (
                    present(current.map_err(|e| Error::backend("source", e))?),
                    present(cached.map_err(|e| Error::backend("edge[0]", e))?),
                )
            }
            None => {
                let current = present(source.get(id).await.map_err(|e| Error::backend("source", e))?);
                (current.clone(), current)
            }
        };

        if current != cached {
            self.stats.repaired();
            self.repair(&edges, id, current).await;
            return Err(Error::Inconsistent { id: id.to_string() });
        }

        if current.as_ref() == Some(&value) {
            return Ok(SaveOutcome::Unchanged);
        }

        self.write_through(&source, &edges, id, value).await
    }

    async fn write_through(
        &self,
        source: &Tier,
        edges: &[Tier],
        id: &str,
        value: Value,
    ) -> Result<SaveOutcome> {
        source
            .save(id, value.clone())
            .await
            .map_err(|e| Error::backend("source", e))?;

        Ok(SaveOutcome::Written(self.save_edges(edges, id, &value).await))
    }

    async fn save_edges(&self, edges: &[Tier], id: &str, value: &Value) -> Vec<Result<()>> {
        let results = join_all(edges.iter().map(|edge| edge.save(id, value.clone()))).await;

        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.map_err(|e| {
                    let label = tier_label(index, edges.len());
                    self.report(&label, "save", &e);
                    Error::backend(label, e)
                })
            })
            .collect()
    }

    /// Make every edge match the source; an absent source value clears them
    async fn repair(&self, edges: &[Tier], id: &str, authoritative: Option<Value>) {
        let results = match &authoritative {
            Some(value) => join_all(edges.iter().map(|edge| edge.save(id, value.clone()))).await,
            None => join_all(edges.iter().map(|edge| edge.delete(id))).await,
        };

        for (index, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                self.report(&tier_label(index, edges.len()), "repair", &e);
            }
        }
    }

    /// Remove `id` from every edge, and from the source when `include_source`
    /// is set. Each tier fails independently; returns how many tiers
    /// succeeded.
    pub async fn delete(&self, id: &str, include_source: bool) -> usize {
        self.await_promotions(id).await;

        let (edges, source) = self.snapshot();
        let mut targets = edges;
        let edge_count = targets.len();
        if include_source {
            targets.extend(source);
        }

        let results = join_all(targets.iter().map(|tier| tier.delete(id))).await;

        let mut succeeded = 0;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) => succeeded += 1,
                Err(e) => self.report(&tier_label(index, edge_count), "delete", &e),
            }
        }
        succeeded
    }

    /// Ask every edge that supports eviction to forget `amount` entries.
    /// The source is never touched. Returns the total evicted.
    pub async fn forget(&self, amount: usize) -> usize {
        let edges = self.edges();
        let forgetting: Vec<(usize, &Tier)> = edges
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.can_forget())
            .collect();

        let results = join_all(forgetting.iter().map(|(_, edge)| edge.forget(amount))).await;

        let mut evicted = 0;
        for ((index, _), result) in forgetting.iter().zip(results) {
            match result {
                Ok(count) => evicted += count,
                Err(e) => self.report(&tier_label(*index, edges.len()), "forget", &e),
            }
        }

        self.stats.evicted(evicted as u64);
        let stats = self.stats.snapshot();
        debug!(
            evicted,
            total_evictions = stats.evictions,
            hit_ratio = stats.hit_ratio(),
            "Forget broadcast finished"
        );
        evicted
    }

    /// Run a custom eviction policy over a snapshot of the edges
    pub fn forget_with<F, R>(&self, policy: F) -> R
    where
        F: FnOnce(Vec<Tier>) -> R,
    {
        policy(self.edges())
    }
}

impl Default for TieredCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tierstore::{DiskConfig, DiskStore, FnStore};

    /// Source holding id1..id9 -> {num: 111..999}
    #[derive(Default)]
    struct FakeSource {
        data: Mutex<HashMap<String, Value>>,
        reject: AtomicBool,
        gets: AtomicUsize,
        saves: AtomicUsize,
    }

    impl FakeSource {
        fn seeded() -> Arc<Self> {
            let source = Self::default();
            for i in 1..=9 {
                source.data.lock().insert(format!("id{i}"), json!({ "num": i * 111 }));
            }
            Arc::new(source)
        }

        fn set_reject(&self, reject: bool) {
            self.reject.store(reject, Ordering::SeqCst);
        }

        fn value(&self, id: &str) -> Option<Value> {
            self.data.lock().get(id).cloned()
        }

        fn check(&self) -> Result<()> {
            if self.reject.load(Ordering::SeqCst) {
                Err(Error::Message("sample".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Store for FakeSource {
        async fn get(&self, id: &str) -> Result<Option<Value>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.value(id))
        }

        async fn save(&self, id: &str, value: Value) -> Result<()> {
            self.check()?;
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.data.lock().insert(id.to_string(), value);
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.data.lock().remove(id);
            Ok(())
        }
    }

    fn broken_store() -> Tier {
        Arc::new(FnStore::new(
            |_| Err(Error::Message("broken get".into())),
            |_, _| Err(Error::Message("broken save".into())),
            |_| Err(Error::Message("broken delete".into())),
        ))
    }

    struct Fixture {
        cache: TieredCache,
        memory: Arc<MemoryStore>,
        disk: Arc<DiskStore>,
        source: Arc<FakeSource>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskStore::open(DiskConfig::new(dir.path())).await.unwrap());
        let memory = Arc::new(MemoryStore::new());
        let source = FakeSource::seeded();

        let cache = TieredCache::new();
        cache.loggable(true);
        cache.set_source(source.clone() as Tier);
        cache.set_edges([memory.clone() as Tier, disk.clone() as Tier]);

        Fixture {
            cache,
            memory,
            disk,
            source,
            _dir: dir,
        }
    }

    #[test]
    fn test_tier_assignment() {
        let cache = TieredCache::new();
        assert!(cache.source().is_none());

        assert!(!cache.set_source(None::<Tier>));
        assert!(cache.source().is_none());

        let memory: Tier = Arc::new(MemoryStore::new());
        let other: Tier = Arc::new(MemoryStore::new());
        assert!(cache.set_source(other.clone()));
        assert!(same_tier(&cache.source().unwrap(), &other));

        let accepted = cache.set_edges([None, Some(memory.clone()), None, Some(memory.clone()), Some(other.clone())]);
        assert_eq!(accepted, 2);
        let edges = cache.edges();
        assert!(same_tier(&edges[0], &memory));
        assert!(same_tier(&edges[1], &other));

        // Replaces, not appends
        assert_eq!(cache.set_edges([other.clone()]), 1);
        assert_eq!(cache.edges().len(), 1);

        cache.clear_source();
        assert!(cache.source().is_none());
    }

    #[tokio::test]
    async fn test_get_promotes_from_source() {
        let f = fixture().await;
        assert_eq!(f.memory.get("id1"), None);
        assert_eq!(f.disk.get("id1").await.unwrap(), None);

        assert_eq!(f.cache.get("id1").await, Some(json!({ "num": 111 })));
        f.cache.settle().await;

        assert_eq!(f.memory.get("id1"), Some(json!({ "num": 111 })));
        assert_eq!(f.disk.get("id1").await.unwrap(), Some(json!({ "num": 111 })));
        assert!(f.disk.has("id1").await);
        assert_eq!(f.cache.stats().promotions, 2);
    }

    #[tokio::test]
    async fn test_forced_save_after_get_wins_over_promotion() {
        let f = fixture().await;

        assert_eq!(f.cache.get("id1").await, Some(json!({ "num": 111 })));
        f.cache.save("id1", json!({ "num": 999 }), SaveOptions::forced()).await.unwrap();
        f.cache.settle().await;

        assert_eq!(f.source.value("id1"), Some(json!({ "num": 999 })));
        assert_eq!(f.memory.get("id1"), Some(json!({ "num": 999 })));
        assert_eq!(f.disk.get("id1").await.unwrap(), Some(json!({ "num": 999 })));

        // Tiers agree, so a verified save goes through
        let outcome = f.cache.save("id1", json!({ "num": 1 }), SaveOptions::default()).await.unwrap();
        assert!(!outcome.is_unchanged());
    }

    #[tokio::test]
    async fn test_delete_after_get_wins_over_promotion() {
        let f = fixture().await;

        assert_eq!(f.cache.get("id2").await, Some(json!({ "num": 222 })));
        assert_eq!(f.cache.delete("id2", false).await, 2);
        f.cache.settle().await;

        assert_eq!(f.memory.get("id2"), None);
        assert!(!f.disk.has("id2").await);
        assert_eq!(f.source.value("id2"), Some(json!({ "num": 222 })));
    }

    #[tokio::test]
    async fn test_promotions_of_other_ids_do_not_block() {
        let f = fixture().await;

        f.cache.get("id3").await;
        f.cache.save("other", json!(1), SaveOptions::forced()).await.unwrap();
        f.cache.settle().await;

        assert_eq!(f.memory.get("id3"), Some(json!({ "num": 333 })));
        assert_eq!(f.memory.get("other"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_get_stops_at_first_hit() {
        let f = fixture().await;
        f.disk.save("id5", json!("from disk")).await.unwrap();

        assert_eq!(f.cache.get("id5").await, Some(json!("from disk")));
        f.cache.settle().await;

        // Source never consulted, memory promoted from disk
        assert_eq!(f.source.gets.load(Ordering::SeqCst), 0);
        assert_eq!(f.memory.get("id5"), Some(json!("from disk")));

        // Memory hit promotes nothing
        assert_eq!(f.cache.get("id5").await, Some(json!("from disk")));
        assert_eq!(f.cache.stats().promotions, 1);
        assert_eq!(f.cache.stats().hits, 2);
    }

    #[tokio::test]
    async fn test_get_sync_source_value() {
        let f = fixture().await;
        f.cache.set_source(Arc::new(FnStore::new(
            |_| Ok(Some(json!(123))),
            |_, _| Ok(()),
            |_| Ok(()),
        )) as Tier);

        assert_eq!(f.cache.get("anyID").await, Some(json!(123)));
        f.cache.settle().await;

        assert_eq!(f.memory.get("anyID"), Some(json!(123)));
        assert_eq!(f.disk.get("anyID").await.unwrap(), Some(json!(123)));
    }

    #[tokio::test]
    async fn test_get_miss_caches_nothing() {
        let f = fixture().await;

        assert_eq!(f.cache.get("noExistId").await, None);
        f.cache.settle().await;

        assert!(!f.memory.has("noExistId"));
        assert!(!f.disk.has("noExistId").await);
        assert_eq!(f.cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_get_rejected_source_is_miss() {
        let f = fixture().await;
        f.source.set_reject(true);

        assert_eq!(f.cache.get("id1").await, None);
        f.cache.settle().await;
        assert!(!f.memory.has("id1"));
    }

    #[tokio::test]
    async fn test_get_skips_failing_edges() {
        let f = fixture().await;
        let broken = broken_store();
        f.cache.set_edges([
            Some(f.memory.clone() as Tier),
            Some(broken.clone()),
            Some(f.disk.clone() as Tier),
            Some(broken),
        ]);

        assert_eq!(f.cache.get("id2").await, Some(json!({ "num": 222 })));
        f.cache.settle().await;

        assert_eq!(f.memory.get("id2"), Some(json!({ "num": 222 })));
        assert_eq!(f.disk.get("id2").await.unwrap(), Some(json!({ "num": 222 })));
    }

    #[tokio::test]
    async fn test_save_verified_writes_new_value() {
        let f = fixture().await;
        f.cache.get("id2").await;
        f.cache.settle().await;

        let outcome = f.cache.save("id2", json!({ "num": "222" }), SaveOptions::default()).await.unwrap();
        assert_eq!(outcome.edge_results().len(), 2);
        assert!(outcome.edge_results().iter().all(|r| r.is_ok()));

        assert_eq!(f.source.value("id2"), Some(json!({ "num": "222" })));
        assert_eq!(f.memory.get("id2"), Some(json!({ "num": "222" })));
        assert_eq!(f.disk.get("id2").await.unwrap(), Some(json!({ "num": "222" })));
    }

    #[tokio::test]
    async fn test_save_inconsistent_repairs_edges() {
        let f = fixture().await;
        f.memory.save("id2", json!({ "num": "222" }));
        f.disk.save("id2", json!({ "num": "stale" })).await.unwrap();

        let result = f.cache.save("id2", json!({ "num": "anything" }), SaveOptions::default()).await;
        assert!(matches!(result, Err(Error::Inconsistent { id }) if id == "id2"));

        assert_eq!(f.source.value("id2"), Some(json!({ "num": 222 })));
        assert_eq!(f.memory.get("id2"), Some(json!({ "num": 222 })));
        assert_eq!(f.disk.get("id2").await.unwrap(), Some(json!({ "num": 222 })));
        assert_eq!(f.cache.stats().repairs, 1);
    }

    #[tokio::test]
    async fn test_save_inconsistent_absent_source_clears_edges() {
        let f = fixture().await;
        f.memory.save("ghost", json!(1));

        let result = f.cache.save("ghost", json!(2), SaveOptions::default()).await;
        assert!(matches!(result, Err(Error::Inconsistent { .. })));
        assert!(!f.memory.has("ghost"));
        assert_eq!(f.source.value("ghost"), None);
    }

    #[tokio::test]
    async fn test_save_unchanged_is_noop() {
        let f = fixture().await;
        f.memory.save("id3", json!({ "num": 333 }));

        let outcome = f.cache.save("id3", json!({ "num": 333 }), SaveOptions::default()).await.unwrap();
        assert!(outcome.is_unchanged());
        assert!(outcome.edge_results().is_empty());
        assert_eq!(f.source.saves.load(Ordering::SeqCst), 0);
        assert!(!f.disk.has("id3").await);
    }

    #[tokio::test]
    async fn test_save_new_id() {
        let f = fixture().await;

        let outcome = f.cache.save("fresh", json!([1, 2, 3]), SaveOptions::default()).await.unwrap();
        assert!(!outcome.is_unchanged());
        assert_eq!(f.source.value("fresh"), Some(json!([1, 2, 3])));
        assert_eq!(f.memory.get("fresh"), Some(json!([1, 2, 3])));
        assert_eq!(f.disk.get("fresh").await.unwrap(), Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn test_save_forced_skips_verification() {
        let f = fixture().await;
        f.memory.save("id2", json!({ "num": "mismatch" }));

        let outcome = f.cache.save("id2", json!({ "num": 0 }), SaveOptions::forced()).await.unwrap();
        assert_eq!(outcome.edge_results().len(), 2);

        assert_eq!(f.source.value("id2"), Some(json!({ "num": 0 })));
        assert_eq!(f.memory.get("id2"), Some(json!({ "num": 0 })));
        assert_eq!(f.disk.get("id2").await.unwrap(), Some(json!({ "num": 0 })));
        assert_eq!(f.source.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_save_without_source() {
        let f = fixture().await;
        f.cache.clear_source();

        let outcome = f.cache.save("id1", json!("edge only"), SaveOptions::default()).await.unwrap();
        assert_eq!(outcome.edge_results().len(), 2);
        assert_eq!(f.memory.get("id1"), Some(json!("edge only")));
        assert_eq!(f.source.value("id1"), Some(json!({ "num": 111 })));
    }

    #[tokio::test]
    async fn test_save_absent_value_rejected() {
        let f = fixture().await;
        let result = f.cache.save("id1", Value::Null, SaveOptions::forced()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_save_verification_read_failure_surfaces() {
        let f = fixture().await;
        f.source.set_reject(true);

        let result = f.cache.save("id1", json!(1), SaveOptions::default()).await;
        assert!(matches!(result, Err(Error::Backend { ref tier, .. }) if tier == "source"));
        assert!(!f.memory.has("id1"));
    }

    #[tokio::test]
    async fn test_save_reports_failing_edges() {
        let f = fixture().await;
        f.cache.clear_source();
        f.cache.set_edges([f.memory.clone() as Tier, broken_store()]);

        let outcome = f.cache.save("id1", json!(1), SaveOptions::default()).await.unwrap();
        let results = outcome.edge_results();
        assert!(results[0].is_ok());
        assert!(matches!(&results[1], Err(Error::Backend { tier, .. }) if tier == "edge[1]"));
    }

    #[tokio::test]
    async fn test_delete_edges_and_source() {
        let f = fixture().await;
        f.cache.get("id4").await;
        f.cache.settle().await;

        assert_eq!(f.cache.delete("id4", false).await, 2);
        assert!(!f.memory.has("id4"));
        assert!(!f.disk.has("id4").await);
        assert!(f.source.value("id4").is_some());

        f.cache.get("id4").await;
        f.cache.settle().await;
        assert_eq!(f.cache.delete("id4", true).await, 3);
        assert!(f.source.value("id4").is_none());
    }

    #[tokio::test]
    async fn test_delete_failure_is_isolated() {
        let f = fixture().await;
        f.memory.save("id6", json!(6));

        // Disk has no entry and fails; memory and source still succeed
        assert_eq!(f.cache.delete("id6", true).await, 2);
        assert!(!f.memory.has("id6"));
        assert!(f.source.value("id6").is_none());
    }

    #[tokio::test]
    async fn test_forget_broadcasts_to_edges() {
        let f = fixture().await;
        f.cache.clear_source();
        for i in 0..4 {
            f.cache.save(&format!("k{i}"), json!(i), SaveOptions::default()).await.unwrap();
        }

        let evicted = f.cache.forget(4).await;
        assert_eq!(evicted, 8);
        assert!(f.memory.is_empty());
        assert_eq!(f.disk.size(), 0);
        assert_eq!(f.cache.stats().evictions, 8);
    }

    #[tokio::test]
    async fn test_forget_skips_unsupported_edges() {
        let f = fixture().await;
        f.cache.set_edges([f.memory.clone() as Tier, broken_store()]);
        f.memory.save("a", json!(1));

        assert_eq!(f.cache.forget(1).await, 1);
        assert!(f.memory.is_empty());
    }

    #[tokio::test]
    async fn test_forget_with_policy() {
        let f = fixture().await;
        f.memory.save("a", json!(1));
        f.memory.save("b", json!(2));

        let count = f.cache.forget_with(|edges| {
            assert_eq!(edges.len(), 2);
            assert!(edges.iter().all(|e| !same_tier(e, &(f.source.clone() as Tier))));
            f.memory.forget(1)
        });

        assert_eq!(count, 1);
        assert_eq!(f.memory.ids(), vec!["b"]);
        assert!(f.source.value("id1").is_some());
    }
}
