//! Period statistics assembled from the day cache and the backend.
//!
//! A period request always yields one record per day, sorted ascending,
//! no matter how many individual day fetches fail.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{date_key, local_today, DailyStatistics, StatsPeriod};
use crate::remote::RemoteDataSource;
use crate::stats_cache::StatisticsCache;
use crate::store::KeyValueStore;

/// Serves day-by-day statistics for a window ending today, filling cache
/// gaps from the backend.
///
/// Cache access is serialized behind an internal lock, so a shared clone
/// of the service is safe to call from anywhere; only the per-day remote
/// fetches run concurrently.
#[derive(Clone)]
pub struct StatisticsService {
    cache: Arc<Mutex<StatisticsCache>>,
    remote: Arc<dyn RemoteDataSource>,
}

impl StatisticsService {
    pub fn new(store: Arc<dyn KeyValueStore>, remote: Arc<dyn RemoteDataSource>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(StatisticsCache::new(store))),
            remote,
        }
    }

    /// Statistics for every day of the period, oldest first.
    pub async fn fetch_period(&self, period: StatsPeriod) -> Vec<DailyStatistics> {
        self.fetch_days(period.days()).await
    }

    /// Statistics for the last `days` calendar days, today included,
    /// oldest first. Days the backend cannot answer for come back as
    /// placeholders with `has_data = false`.
    pub async fn fetch_days(&self, days: u32) -> Vec<DailyStatistics> {
        if days == 0 {
            return Vec::new();
        }

        let today = local_today();
        let dates: Vec<NaiveDate> = (0..days)
            .rev()
            .map(|i| today - Duration::days(i64::from(i)))
            .collect();
        let keys: Vec<String> = dates.iter().copied().map(date_key).collect();

        let cache = self.cache.lock().await;
        cache.clear_expired();

        let mut series = cache.get_many(&keys);
        let missing = cache.missing(&keys);

        if !missing.is_empty() {
            debug!("fetching {} of {} days from backend", missing.len(), keys.len());
            let today_key = date_key(today);

            let fetches = missing.iter().map(|key| {
                let remote = Arc::clone(&self.remote);
                let key = key.clone();
                let is_today = key == today_key;
                async move {
                    let result = if is_today {
                        remote.today_stats().await
                    } else {
                        remote.stats_for_date(&key).await
                    };
                    match result {
                        Ok(stats) => stats,
                        Err(e) => {
                            warn!("statistics fetch for {key} failed: {e}");
                            None
                        }
                    }
                }
            });

            // Wait for every launched fetch; a failed day simply
            // contributes nothing to this round.
            let fetched: Vec<DailyStatistics> =
                join_all(fetches).await.into_iter().flatten().collect();

            // Only confirmed backend records enter the cache, keyed by
            // their own date. Placeholders never do.
            for stats in &fetched {
                cache.put(stats.clone());
            }
            series.extend(fetched);
        }
        drop(cache);

        let resolved: HashSet<NaiveDate> = series.iter().map(|s| s.date).collect();
        for date in dates {
            if !resolved.contains(&date) {
                series.push(DailyStatistics::placeholder(date));
            }
        }

        series.sort_by_key(|s| s.date);
        series
    }
}

/// Arithmetic means over a series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesAverages {
    pub calories: f64,
    pub food_weight: f64,
    pub person_weight: f64,
    pub proteins: f64,
    pub fats: f64,
    pub carbohydrates: f64,
    pub sugar: f64,
    pub fiber: f64,
}

/// Per-metric deltas between the end and the start of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesTrends {
    pub calories: f64,
    pub food_weight: f64,
    pub person_weight: f64,
    pub proteins: f64,
    pub fats: f64,
    pub carbohydrates: f64,
    pub sugar: f64,
    pub fiber: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Means across the confirmed entries of a series. Placeholder days are
/// ignored. Body weight averages only the days it was recorded on
/// (`person_weight > 0`); with no such day it is 0.
pub fn averages(series: &[DailyStatistics]) -> SeriesAverages {
    let valid: Vec<&DailyStatistics> = series.iter().filter(|s| s.has_data).collect();
    if valid.is_empty() {
        return SeriesAverages::default();
    }

    let weights: Vec<f64> = valid
        .iter()
        .map(|s| s.person_weight)
        .filter(|w| *w > 0.0)
        .collect();

    SeriesAverages {
        calories: mean(&valid.iter().map(|s| f64::from(s.total_calories)).collect::<Vec<_>>()),
        food_weight: mean(&valid.iter().map(|s| f64::from(s.total_food_weight)).collect::<Vec<_>>()),
        person_weight: mean(&weights),
        proteins: mean(&valid.iter().map(|s| s.proteins).collect::<Vec<_>>()),
        fats: mean(&valid.iter().map(|s| s.fats).collect::<Vec<_>>()),
        carbohydrates: mean(&valid.iter().map(|s| s.carbohydrates).collect::<Vec<_>>()),
        sugar: mean(&valid.iter().map(|s| s.sugar).collect::<Vec<_>>()),
        fiber: mean(&valid.iter().map(|s| s.fiber).collect::<Vec<_>>()),
    }
}

/// Delta between the late and early part of each metric's series.
///
/// The series must be in chronological order. Each metric is filtered
/// independently to confirmed, nonzero values; the trend is the mean of
/// the last third minus the mean of the first third (at least one entry
/// each). Fewer than two qualifying values yield 0 for that metric.
pub fn trends(series: &[DailyStatistics]) -> SeriesTrends {
    SeriesTrends {
        calories: trend(series, |s| f64::from(s.total_calories)),
        food_weight: trend(series, |s| f64::from(s.total_food_weight)),
        person_weight: trend(series, |s| s.person_weight),
        proteins: trend(series, |s| s.proteins),
        fats: trend(series, |s| s.fats),
        carbohydrates: trend(series, |s| s.carbohydrates),
        sugar: trend(series, |s| s.sugar),
        fiber: trend(series, |s| s.fiber),
    }
}

fn trend(series: &[DailyStatistics], metric: impl Fn(&DailyStatistics) -> f64) -> f64 {
    let values: Vec<f64> = series
        .iter()
        .filter(|s| s.has_data)
        .map(&metric)
        .filter(|v| *v > 0.0)
        .collect();
    if values.len() < 2 {
        return 0.0;
    }
    let third = (values.len() / 3).max(1);
    mean(&values[values.len() - third..]) - mean(&values[..third])
}
