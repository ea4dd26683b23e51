//! Trending and seasonal analysis.
//!
//! Batch jobs over the interaction log: a daily trend score per item
//! (max-normalized linear blend of volume, reach, time-decayed momentum,
//! purchases, and rating), seasonal rankings bucketed by month and meal
//! period, and a real-time spike rule. Batch recomputes are serialized: a
//! trigger while a run is in progress is a no-op, and results are published
//! in a single cache write so readers never see a partial batch.

use crate::config::TrendingConfig;
use crate::error::Result;
use crate::models::InteractionType;
use crate::stores::{self, Cache, InteractionStore, ItemCatalog};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Meal period derived from hour-of-day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealPeriod {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealPeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=10 => MealPeriod::Breakfast,
            11..=15 => MealPeriod::Lunch,
            16..=21 => MealPeriod::Dinner,
            _ => MealPeriod::Snack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        }
    }

    pub fn months(&self) -> [u32; 3] {
        match self {
            Season::Winter => [12, 1, 2],
            Season::Spring => [3, 4, 5],
            Season::Summer => [6, 7, 8],
            Season::Autumn => [9, 10, 11],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
        }
    }
}

/// Per-item daily trend score, normalized so the batch maximum is 1.0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendScore {
    pub item_id: Uuid,
    pub score: f64,
    pub interaction_count: usize,
    pub unique_users: usize,
    pub momentum: f64,
    pub purchases: usize,
    pub avg_rating: f64,
}

/// Seasonal rank entry within one meal period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalScore {
    pub item_id: Uuid,
    pub score: f64,
    pub interactions: usize,
}

pub struct TrendAnalyzer {
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn ItemCatalog>,
    cache: Arc<dyn Cache>,
    config: TrendingConfig,
    recompute_in_progress: AtomicBool,
}

impl TrendAnalyzer {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn ItemCatalog>,
        cache: Arc<dyn Cache>,
        config: TrendingConfig,
    ) -> Self {
        Self {
            interactions,
            catalog,
            cache,
            config,
            recompute_in_progress: AtomicBool::new(false),
        }
    }

    /// Daily trend batch. Returns `Ok(false)` when a run was already in
    /// progress (the trigger is silently skipped, not queued).
    pub async fn recompute_daily_trends(&self) -> Result<bool> {
        if self
            .recompute_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("trend recompute already running, skipping");
            return Ok(false);
        }

        let result = self.recompute_inner().await;
        self.recompute_in_progress.store(false, Ordering::Release);
        result.map(|_| true)
    }

    async fn recompute_inner(&self) -> Result<()> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::days(self.config.window_days);
        let events = self.interactions.since(cutoff).await?;
        info!(events = events.len(), "trend recompute started");

        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        let mut users: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        let mut momentum: HashMap<Uuid, f64> = HashMap::new();
        let mut purchases: HashMap<Uuid, usize> = HashMap::new();
        let mut rating_sums: HashMap<Uuid, (f64, usize)> = HashMap::new();

        for event in &events {
            *counts.entry(event.item_id).or_insert(0) += 1;
            users.entry(event.item_id).or_default().insert(event.user_id);

            let age_days = (now - event.timestamp).num_seconds() as f64 / 86_400.0;
            *momentum.entry(event.item_id).or_insert(0.0) +=
                self.config.decay_factor(age_days.max(0.0));

            if event.interaction_type == InteractionType::Order {
                *purchases.entry(event.item_id).or_insert(0) += 1;
            }
            if event.interaction_type == InteractionType::Rate {
                if let Some(stars) = event.value {
                    let entry = rating_sums.entry(event.item_id).or_insert((0.0, 0));
                    entry.0 += stars;
                    entry.1 += 1;
                }
            }
        }

        let blend = &self.config.blend;
        let mut scores: Vec<TrendScore> = counts
            .iter()
            .map(|(item_id, count)| {
                let unique = users.get(item_id).map(|set| set.len()).unwrap_or(0);
                let item_momentum = *momentum.get(item_id).unwrap_or(&0.0);
                let purchase_count = *purchases.get(item_id).unwrap_or(&0);
                let avg_rating = rating_sums
                    .get(item_id)
                    .map(|(sum, n)| sum / *n as f64)
                    .unwrap_or(0.0);

                let raw = blend.interaction_count * *count as f64
                    + blend.unique_users * unique as f64
                    + blend.momentum * item_momentum
                    + blend.purchases * purchase_count as f64
                    + blend.rating * avg_rating;

                TrendScore {
                    item_id: *item_id,
                    score: raw,
                    interaction_count: *count,
                    unique_users: unique,
                    momentum: item_momentum,
                    purchases: purchase_count,
                    avg_rating,
                }
            })
            .collect();

        let max = scores.iter().map(|s| s.score).fold(0.0f64, f64::max);
        if max > 0.0 {
            scores.iter_mut().for_each(|s| s.score /= max);
        }
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));

        // One write publishes the whole batch
        stores::set_json(
            self.cache.as_ref(),
            &stores::keys::daily_trends(),
            &scores,
            Duration::from_secs(self.config.cache_ttl_secs),
        )
        .await?;

        info!(items = scores.len(), "trend recompute finished");
        Ok(())
    }

    /// Current daily trend scores, recomputing on cache miss
    pub async fn daily_trends(&self) -> Result<Vec<TrendScore>> {
        let key = stores::keys::daily_trends();
        if let Some(scores) = stores::get_json::<Vec<TrendScore>>(self.cache.as_ref(), &key).await?
        {
            return Ok(scores);
        }
        self.recompute_daily_trends().await?;
        Ok(stores::get_json(self.cache.as_ref(), &key)
            .await?
            .unwrap_or_default())
    }

    /// Seasonal rankings for the season containing `now`: per meal period,
    /// items ranked by interactions × rating factor, restricted to the
    /// season's months across all years of history.
    pub async fn seasonal_rankings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<HashMap<MealPeriod, Vec<SeasonalScore>>> {
        let season = Season::from_month(now.month());
        let key = stores::keys::seasonal_trends(season.as_str());
        if let Some(cached) = stores::get_json(self.cache.as_ref(), &key).await? {
            return Ok(cached);
        }

        let history = self
            .interactions
            .since(now - ChronoDuration::days(365))
            .await?;
        let months = season.months();

        let mut buckets: HashMap<(MealPeriod, Uuid), usize> = HashMap::new();
        let mut ratings: HashMap<Uuid, (f64, usize)> = HashMap::new();
        for event in &history {
            if !months.contains(&event.timestamp.month()) {
                continue;
            }
            let period = MealPeriod::from_hour(event.timestamp.hour());
            *buckets.entry((period, event.item_id)).or_insert(0) += 1;
            if event.interaction_type == InteractionType::Rate {
                if let Some(stars) = event.value {
                    let entry = ratings.entry(event.item_id).or_insert((0.0, 0));
                    entry.0 += stars;
                    entry.1 += 1;
                }
            }
        }

        let mut rankings: HashMap<MealPeriod, Vec<SeasonalScore>> = HashMap::new();
        for ((period, item_id), interactions) in buckets {
            let rating_factor = match ratings.get(&item_id) {
                Some((sum, n)) => (sum / *n as f64) / 5.0,
                None => self.catalog_rating_factor(item_id).await?,
            };
            rankings.entry(period).or_default().push(SeasonalScore {
                item_id,
                score: interactions as f64 * rating_factor,
                interactions,
            });
        }
        for scores in rankings.values_mut() {
            scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        stores::set_json(
            self.cache.as_ref(),
            &key,
            &rankings,
            Duration::from_secs(self.config.cache_ttl_secs),
        )
        .await?;

        Ok(rankings)
    }

    async fn catalog_rating_factor(&self, item_id: Uuid) -> Result<f64> {
        Ok(self
            .catalog
            .get_item(item_id)
            .await?
            .map(|item| item.rating_average / 5.0)
            .unwrap_or(0.5))
    }

    /// Real-time spike detection: items whose interaction count in the last
    /// `spike_window_hours` exceeds `spike_multiplier` × their trailing
    /// hourly average over `spike_baseline_days`. A small absolute floor
    /// keeps single stray events on dormant items from flagging.
    pub async fn emerging_trends(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let baseline_cutoff = now - ChronoDuration::days(self.config.spike_baseline_days);
        let window_cutoff = now - ChronoDuration::hours(self.config.spike_window_hours);
        let events = self.interactions.since(baseline_cutoff).await?;

        let mut baseline_counts: HashMap<Uuid, usize> = HashMap::new();
        let mut window_counts: HashMap<Uuid, usize> = HashMap::new();
        for event in &events {
            *baseline_counts.entry(event.item_id).or_insert(0) += 1;
            if event.timestamp >= window_cutoff {
                *window_counts.entry(event.item_id).or_insert(0) += 1;
            }
        }

        let baseline_hours = (self.config.spike_baseline_days * 24) as f64;
        let floor = self.config.spike_multiplier.ceil() as usize;

        let mut emerging: Vec<Uuid> = window_counts
            .into_iter()
            .filter(|(item_id, current)| {
                let hourly_average = baseline_counts[item_id] as f64 / baseline_hours;
                *current >= floor
                    && *current as f64 > self.config.spike_multiplier * hourly_average
            })
            .map(|(item_id, _)| item_id)
            .collect();
        emerging.sort();

        debug!(emerging = emerging.len(), "spike detection done");
        Ok(emerging)
    }
}
