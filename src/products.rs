//! Today's product list snapshot and its health annotations.
//!
//! Only "today" is cached: one snapshot, overwritten on every refresh.
//! History stays on the backend and is fetched fresh on demand. A photo
//! taken before the backend confirmed its product is held under a
//! temporary key and reattached to the newest fetched record here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::images::ImageStore;
use crate::models::{date_key, DaySnapshot, HealthLevel, Product};
use crate::remote::RemoteDataSource;
use crate::store::KeyValueStore;

const SNAPSHOT_KEY: &str = "products.today";
const HEALTH_KEY: &str = "products.health_levels";

/// How long a persisted snapshot counts as fresh.
pub const SNAPSHOT_MAX_AGE_MINUTES: i64 = 60;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotBlob {
    products: Vec<Product>,
    total_calories: u32,
    total_weight: f64,
    last_update: Option<DateTime<Utc>>,
}

impl SnapshotBlob {
    fn snapshot(&self) -> DaySnapshot {
        DaySnapshot {
            products: self.products.clone(),
            total_calories: self.total_calories,
            total_weight: self.total_weight,
        }
    }
}

/// Cached "today" product snapshot with photo reconciliation.
///
/// All operations serialize behind an internal lock; a shared clone is
/// safe to call from anywhere.
#[derive(Clone)]
pub struct ProductCache {
    store: Arc<dyn KeyValueStore>,
    images: Arc<dyn ImageStore>,
    remote: Arc<dyn RemoteDataSource>,
    guard: Arc<Mutex<()>>,
}

impl ProductCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        images: Arc<dyn ImageStore>,
        remote: Arc<dyn RemoteDataSource>,
    ) -> Self {
        Self {
            store,
            images,
            remote,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// The persisted snapshot; empty if none exists or it is unreadable.
    pub async fn load(&self) -> DaySnapshot {
        let _guard = self.guard.lock().await;
        self.read_snapshot().snapshot()
    }

    /// Persists a snapshot, stamps its update time and drops health
    /// annotations for products no longer in the list.
    pub async fn save(&self, products: Vec<Product>, total_calories: u32, total_weight: f64) {
        let _guard = self.guard.lock().await;
        self.write_snapshot(products, total_calories, total_weight);
    }

    /// True when no snapshot was ever saved or the last one is older
    /// than `max_age_minutes`.
    pub async fn is_stale(&self, max_age_minutes: i64) -> bool {
        let _guard = self.guard.lock().await;
        is_stale_at(self.read_snapshot().last_update, max_age_minutes)
    }

    /// Returns today's snapshot, fetching from the backend when forced
    /// or stale.
    ///
    /// A pending temp photo forces a live fetch: it can only be attached
    /// once the authoritative newest record is known. After a successful
    /// fetch the photo moves from `temp_image_time` to the newest
    /// product's server time. On fetch failure the last persisted
    /// snapshot comes back unchanged.
    pub async fn refresh(&self, temp_image_time: Option<i64>, force: bool) -> DaySnapshot {
        let _guard = self.guard.lock().await;

        let force = force || temp_image_time.is_some();
        let current = self.read_snapshot();
        if !force && !is_stale_at(current.last_update, SNAPSHOT_MAX_AGE_MINUTES) {
            return current.snapshot();
        }

        let fetched = match self.remote.today_products().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("today's products fetch failed: {e}");
                return current.snapshot();
            }
        };

        if let Some(temp) = temp_image_time {
            match fetched.products.iter().max_by_key(|p| p.time) {
                Some(newest) => {
                    if self.images.move_resource(temp, newest.time) {
                        debug!("attached photo {temp} to product {}", newest.time);
                    } else {
                        warn!("could not attach photo {temp} to product {}", newest.time);
                    }
                }
                None => warn!("no products fetched, photo {temp} left unattached"),
            }
        }

        self.write_snapshot(
            fetched.products,
            fetched.total_calories,
            fetched.total_weight,
        )
    }

    /// A past day's products, fetched fresh every time. Never touches
    /// the cached snapshot or the annotations.
    pub async fn products_for_date(&self, date: NaiveDate) -> DaySnapshot {
        let key = date_key(date);
        match self.remote.products_for_date(&key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("products fetch for {key} failed: {e}");
                DaySnapshot::default()
            }
        }
    }

    /// Stores the health annotation for a product.
    pub async fn put_health_level(&self, time: i64, level: HealthLevel) {
        let _guard = self.guard.lock().await;
        let mut levels = self.read_health();
        levels.insert(time, level);
        self.write_health(&levels);
    }

    pub async fn health_level(&self, time: i64) -> Option<HealthLevel> {
        let _guard = self.guard.lock().await;
        self.read_health().remove(&time)
    }

    pub async fn remove_health_level(&self, time: i64) {
        let _guard = self.guard.lock().await;
        let mut levels = self.read_health();
        if levels.remove(&time).is_some() {
            self.write_health(&levels);
        }
    }

    fn write_snapshot(
        &self,
        products: Vec<Product>,
        total_calories: u32,
        total_weight: f64,
    ) -> DaySnapshot {
        self.collect_health_garbage(&products);
        let blob = SnapshotBlob {
            products,
            total_calories,
            total_weight,
            last_update: Some(Utc::now()),
        };
        match serde_json::to_vec(&blob) {
            Ok(bytes) => {
                if let Err(e) = self.store.set_bytes(SNAPSHOT_KEY, &bytes) {
                    warn!("failed to persist product snapshot: {e}");
                }
            }
            Err(e) => warn!("failed to encode product snapshot: {e}"),
        }
        blob.snapshot()
    }

    fn read_snapshot(&self) -> SnapshotBlob {
        let Some(bytes) = self.store.get_bytes(SNAPSHOT_KEY) else {
            return SnapshotBlob::default();
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("product snapshot unreadable, starting fresh: {e}");
            SnapshotBlob::default()
        })
    }

    /// Drops annotations whose product is gone from the latest list.
    fn collect_health_garbage(&self, products: &[Product]) {
        let keep: HashSet<i64> = products.iter().map(|p| p.time).collect();
        let mut levels = self.read_health();
        let before = levels.len();
        levels.retain(|time, _| keep.contains(time));
        if levels.len() != before {
            debug!("dropped {} orphaned health annotations", before - levels.len());
            self.write_health(&levels);
        }
    }

    fn read_health(&self) -> HashMap<i64, HealthLevel> {
        let Some(bytes) = self.store.get_bytes(HEALTH_KEY) else {
            return HashMap::new();
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("health annotations unreadable, starting fresh: {e}");
            HashMap::new()
        })
    }

    fn write_health(&self, levels: &HashMap<i64, HealthLevel>) {
        match serde_json::to_vec(levels) {
            Ok(bytes) => {
                if let Err(e) = self.store.set_bytes(HEALTH_KEY, &bytes) {
                    warn!("failed to persist health annotations: {e}");
                }
            }
            Err(e) => warn!("failed to encode health annotations: {e}"),
        }
    }
}

fn is_stale_at(last_update: Option<DateTime<Utc>>, max_age_minutes: i64) -> bool {
    match last_update {
        None => true,
        Some(at) => Utc::now() - at > Duration::minutes(max_age_minutes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{local_today, DailyStatistics};
    use crate::store::MemoryStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn product(time: i64, name: &str, calories: u32) -> Product {
        Product {
            time,
            name: name.to_string(),
            calories,
            weight: 150,
            ingredients: vec!["ingredient".to_string()],
            health_rating: 60,
            image_id: None,
            added_sugar_tsp: 0.0,
            extras: HashMap::new(),
        }
    }

    fn level(title: &str) -> HealthLevel {
        HealthLevel {
            title: title.to_string(),
            description: "desc".to_string(),
            summary: "sum".to_string(),
        }
    }

    #[derive(Default)]
    struct ScriptedRemote {
        today: StdMutex<Option<DaySnapshot>>,
        today_calls: AtomicUsize,
        dated_calls: AtomicUsize,
    }

    impl ScriptedRemote {
        fn serving(products: Vec<Product>) -> Self {
            let total_calories = products.iter().map(|p| p.calories).sum();
            let total_weight = products.iter().map(|p| f64::from(p.weight)).sum();
            Self {
                today: StdMutex::new(Some(DaySnapshot {
                    products,
                    total_calories,
                    total_weight,
                })),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RemoteDataSource for ScriptedRemote {
        async fn stats_for_date(&self, _date_key: &str) -> Result<Option<DailyStatistics>> {
            Ok(None)
        }

        async fn today_stats(&self) -> Result<Option<DailyStatistics>> {
            Ok(None)
        }

        async fn today_products(&self) -> Result<DaySnapshot> {
            self.today_calls.fetch_add(1, Ordering::SeqCst);
            self.today
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("backend unavailable"))
        }

        async fn products_for_date(&self, _date_key: &str) -> Result<DaySnapshot> {
            self.dated_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DaySnapshot {
                products: vec![product(1, "history item", 300)],
                total_calories: 300,
                total_weight: 150.0,
            })
        }
    }

    /// Image store double that records every move request.
    struct RecordingImages {
        moves: StdMutex<Vec<(i64, i64)>>,
        succeed: bool,
    }

    impl RecordingImages {
        fn new(succeed: bool) -> Self {
            Self {
                moves: StdMutex::new(Vec::new()),
                succeed,
            }
        }
    }

    impl ImageStore for RecordingImages {
        fn move_resource(&self, from: i64, to: i64) -> bool {
            self.moves.lock().unwrap().push((from, to));
            self.succeed
        }
    }

    fn cache_with(remote: Arc<ScriptedRemote>, images: Arc<RecordingImages>) -> ProductCache {
        ProductCache::new(Arc::new(MemoryStore::new()), images, remote)
    }

    #[tokio::test]
    async fn load_without_snapshot_is_empty() {
        let cache = cache_with(
            Arc::new(ScriptedRemote::failing()),
            Arc::new(RecordingImages::new(true)),
        );
        assert_eq!(cache.load().await, DaySnapshot::default());
        assert!(cache.is_stale(SNAPSHOT_MAX_AGE_MINUTES).await);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let cache = cache_with(
            Arc::new(ScriptedRemote::failing()),
            Arc::new(RecordingImages::new(true)),
        );

        let products = vec![product(10, "oatmeal", 350), product(20, "salad", 220)];
        cache.save(products.clone(), 570, 420.0).await;

        let snapshot = cache.load().await;
        assert_eq!(snapshot.products, products);
        assert_eq!(snapshot.total_calories, 570);
        assert_eq!(snapshot.total_weight, 420.0);
        assert!(!cache.is_stale(SNAPSHOT_MAX_AGE_MINUTES).await);
    }

    #[tokio::test]
    async fn fresh_snapshot_is_served_without_network() {
        let remote = Arc::new(ScriptedRemote::serving(vec![product(1, "fetched", 100)]));
        let cache = cache_with(remote.clone(), Arc::new(RecordingImages::new(true)));

        cache.save(vec![product(10, "saved", 350)], 350, 150.0).await;
        let snapshot = cache.refresh(None, false).await;

        assert_eq!(snapshot.products[0].name, "saved");
        assert_eq!(remote.today_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn force_refresh_hits_the_backend() {
        let remote = Arc::new(ScriptedRemote::serving(vec![product(1, "fetched", 100)]));
        let cache = cache_with(remote.clone(), Arc::new(RecordingImages::new(true)));

        cache.save(vec![product(10, "saved", 350)], 350, 150.0).await;
        let snapshot = cache.refresh(None, true).await;

        assert_eq!(snapshot.products[0].name, "fetched");
        assert_eq!(remote.today_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.load().await.products[0].name, "fetched");
    }

    #[tokio::test]
    async fn temp_photo_moves_to_newest_product() {
        let remote = Arc::new(ScriptedRemote::serving(vec![
            product(100, "first", 300),
            product(205, "newest", 450),
            product(150, "middle", 250),
        ]));
        let images = Arc::new(RecordingImages::new(true));
        let cache = cache_with(remote.clone(), images.clone());

        let snapshot = cache.refresh(Some(777), false).await;

        assert_eq!(*images.moves.lock().unwrap(), vec![(777, 205)]);
        assert_eq!(snapshot.products.len(), 3);
        let reloaded = cache.load().await;
        let times: Vec<i64> = reloaded.products.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![100, 205, 150]);
    }

    #[tokio::test]
    async fn pending_photo_forces_fetch_even_when_fresh() {
        let remote = Arc::new(ScriptedRemote::serving(vec![product(42, "fetched", 100)]));
        let images = Arc::new(RecordingImages::new(true));
        let cache = cache_with(remote.clone(), images.clone());

        cache.save(vec![product(10, "saved", 350)], 350, 150.0).await;
        cache.refresh(Some(777), false).await;

        assert_eq!(remote.today_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*images.moves.lock().unwrap(), vec![(777, 42)]);
    }

    #[tokio::test]
    async fn failed_photo_move_does_not_block_persistence() {
        let remote = Arc::new(ScriptedRemote::serving(vec![product(42, "fetched", 100)]));
        let images = Arc::new(RecordingImages::new(false));
        let cache = cache_with(remote, images);

        let snapshot = cache.refresh(Some(777), false).await;

        assert_eq!(snapshot.products[0].time, 42);
        assert_eq!(cache.load().await.products[0].time, 42);
    }

    #[tokio::test]
    async fn fetch_failure_returns_last_snapshot() {
        let remote = Arc::new(ScriptedRemote::serving(vec![product(1, "fetched", 100)]));
        let cache = cache_with(remote.clone(), Arc::new(RecordingImages::new(true)));

        cache.save(vec![product(10, "saved", 350)], 350, 150.0).await;
        *remote.today.lock().unwrap() = None;

        let snapshot = cache.refresh(None, true).await;
        assert_eq!(snapshot.products[0].name, "saved");
    }

    #[tokio::test]
    async fn fetch_failure_with_no_snapshot_returns_empty() {
        let cache = cache_with(
            Arc::new(ScriptedRemote::failing()),
            Arc::new(RecordingImages::new(true)),
        );
        assert_eq!(cache.refresh(None, true).await, DaySnapshot::default());
    }

    #[tokio::test]
    async fn corrupted_snapshot_reads_as_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set_bytes(SNAPSHOT_KEY, b"garbage!").unwrap();
        let cache = ProductCache::new(
            store,
            Arc::new(RecordingImages::new(true)),
            Arc::new(ScriptedRemote::failing()),
        );
        assert_eq!(cache.load().await, DaySnapshot::default());
    }

    #[tokio::test]
    async fn save_collects_orphaned_health_annotations() {
        let cache = cache_with(
            Arc::new(ScriptedRemote::failing()),
            Arc::new(RecordingImages::new(true)),
        );

        cache.put_health_level(10, level("good")).await;
        cache.put_health_level(20, level("fine")).await;
        cache.put_health_level(99, level("stale")).await;

        cache
            .save(vec![product(10, "a", 100), product(20, "b", 200)], 300, 300.0)
            .await;

        assert_eq!(cache.health_level(10).await, Some(level("good")));
        assert_eq!(cache.health_level(20).await, Some(level("fine")));
        assert_eq!(cache.health_level(99).await, None);
    }

    #[tokio::test]
    async fn remove_health_level_deletes_entry() {
        let cache = cache_with(
            Arc::new(ScriptedRemote::failing()),
            Arc::new(RecordingImages::new(true)),
        );

        cache.put_health_level(10, level("good")).await;
        cache.remove_health_level(10).await;
        assert_eq!(cache.health_level(10).await, None);
    }

    #[tokio::test]
    async fn history_fetch_never_writes_the_cache() {
        let remote = Arc::new(ScriptedRemote::serving(vec![product(1, "today", 100)]));
        let cache = cache_with(remote.clone(), Arc::new(RecordingImages::new(true)));

        let history = cache
            .products_for_date(local_today() - Duration::days(5))
            .await;

        assert_eq!(history.products[0].name, "history item");
        assert_eq!(remote.dated_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.load().await, DaySnapshot::default());
        assert!(cache.is_stale(SNAPSHOT_MAX_AGE_MINUTES).await);
    }
}
