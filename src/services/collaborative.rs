//! Collaborative filtering.
//!
//! Neighborhood model over implicit ratings: pairwise user similarity
//! (cosine, Pearson, Jaccard), neighbor selection, and similarity-weighted
//! score aggregation. An optional matrix-factorization path trains latent
//! factors by SGD.

use crate::config::{MatrixFactorizationConfig, SimilarityConfig};
use crate::error::Result;
use crate::services::profile::{RatingVector, UserProfileBuilder};
use crate::stores::{self, Cache, InteractionStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub use crate::models::SimilarityMetric;

/// A similar user and how similar they are
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Neighbor {
    pub user_id: Uuid,
    pub similarity: f64,
}

/// Collaborative score for one candidate item
#[derive(Debug, Clone, Copy)]
pub struct CollaborativeScore {
    pub item_id: Uuid,
    pub score: f64,
    pub confidence: f64,
}

pub struct SimilarityEngine {
    interactions: Arc<dyn InteractionStore>,
    cache: Arc<dyn Cache>,
    profiles: Arc<UserProfileBuilder>,
    config: SimilarityConfig,
    refresh_in_progress: AtomicBool,
}

impl SimilarityEngine {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        cache: Arc<dyn Cache>,
        profiles: Arc<UserProfileBuilder>,
        config: SimilarityConfig,
    ) -> Self {
        Self {
            interactions,
            cache,
            profiles,
            config,
            refresh_in_progress: AtomicBool::new(false),
        }
    }

    /// Metric used when the caller does not pick one
    pub fn default_metric(&self) -> SimilarityMetric {
        self.config.default_metric
    }

    /// Pairwise similarity over the items both users have rated.
    ///
    /// Returns 0 when the intersection is smaller than `min_common_items`.
    /// Symmetric for every metric; cosine/Pearson in [-1, 1], Jaccard in
    /// [0, 1].
    pub fn similarity(&self, a: &RatingVector, b: &RatingVector, metric: SimilarityMetric) -> f64 {
        let mut common: Vec<Uuid> = a.keys().filter(|id| b.contains_key(*id)).copied().collect();
        if common.len() < self.config.min_common_items {
            return 0.0;
        }
        // Fixed summation order keeps the result exactly symmetric
        common.sort();

        match metric {
            SimilarityMetric::Cosine => cosine(a, b, &common),
            SimilarityMetric::Pearson => pearson(a, b, &common),
            SimilarityMetric::Jaccard => jaccard(a, b),
        }
    }

    /// Rank a candidate pool by similarity to the target, keeping at most
    /// `max_neighbors` above `min_similarity`.
    pub fn find_neighbors(
        &self,
        target: &RatingVector,
        pool: &HashMap<Uuid, RatingVector>,
        metric: SimilarityMetric,
    ) -> Vec<Neighbor> {
        let mut neighbors: Vec<Neighbor> = pool
            .iter()
            .filter_map(|(user_id, ratings)| {
                let similarity = self.similarity(target, ratings, metric);
                (similarity >= self.config.min_similarity).then_some(Neighbor {
                    user_id: *user_id,
                    similarity,
                })
            })
            .collect();

        neighbors.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        neighbors.truncate(self.config.max_neighbors);
        neighbors
    }

    /// Similarity-weighted aggregation of neighbor ratings.
    ///
    /// Per candidate item: Σ(similarity × rating) / Σ(similarity) over the
    /// neighbors that rated it; confidence grows with supporting-neighbor
    /// count, saturating at 5. Items the target already rated and items in
    /// `exclude` are never returned.
    pub fn recommend(
        &self,
        target: &RatingVector,
        neighbors: &[(Neighbor, RatingVector)],
        exclude: &HashSet<Uuid>,
    ) -> Vec<CollaborativeScore> {
        let mut weighted_sum: HashMap<Uuid, f64> = HashMap::new();
        let mut similarity_sum: HashMap<Uuid, f64> = HashMap::new();
        let mut supporters: HashMap<Uuid, usize> = HashMap::new();

        for (neighbor, ratings) in neighbors {
            if neighbor.similarity <= 0.0 {
                continue;
            }
            for (item_id, rating) in ratings {
                if target.contains_key(item_id) || exclude.contains(item_id) {
                    continue;
                }
                *weighted_sum.entry(*item_id).or_insert(0.0) += neighbor.similarity * rating;
                *similarity_sum.entry(*item_id).or_insert(0.0) += neighbor.similarity;
                *supporters.entry(*item_id).or_insert(0) += 1;
            }
        }

        let mut scored: Vec<CollaborativeScore> = weighted_sum
            .into_iter()
            .map(|(item_id, sum)| {
                let score = sum / similarity_sum[&item_id];
                let confidence = (supporters[&item_id] as f64 / 5.0).min(1.0);
                CollaborativeScore {
                    item_id,
                    score,
                    confidence,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    /// Full user-based pipeline: ratings → neighbors → weighted aggregation.
    ///
    /// Returns an empty list on cold start (no ratings or no neighbors); the
    /// orchestrator handles the fallback.
    pub async fn recommend_for_user(
        &self,
        user_id: Uuid,
        metric: SimilarityMetric,
        exclude: &HashSet<Uuid>,
    ) -> Result<Vec<CollaborativeScore>> {
        let target = self.profiles.user_item_ratings(user_id).await?;
        if target.is_empty() {
            debug!(%user_id, "no interaction history, collaborative path empty");
            return Ok(Vec::new());
        }

        // Prefer the batch-published neighbor list; compute on miss
        let cache_key = stores::keys::user_neighbors(user_id);
        let neighbors: Vec<Neighbor> =
            match stores::get_json(self.cache.as_ref(), &cache_key).await? {
                Some(cached) => cached,
                None => {
                    let pool = self.rating_pool(Some(user_id)).await?;
                    self.find_neighbors(&target, &pool, metric)
                }
            };
        if neighbors.is_empty() {
            return Ok(Vec::new());
        }

        let mut with_ratings: Vec<(Neighbor, RatingVector)> = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let ratings = self.profiles.user_item_ratings(neighbor.user_id).await?;
            if !ratings.is_empty() {
                with_ratings.push((neighbor, ratings));
            }
        }

        Ok(self.recommend(&target, &with_ratings, exclude))
    }

    /// Batch refresh of every user's neighbor list, published to the cache.
    ///
    /// Mutually exclusive with itself: a trigger while a run is in progress
    /// is a no-op returning `Ok(false)`. Each user's list is written in one
    /// `set`, so readers only ever see a complete list.
    pub async fn rebuild_neighbors(&self, metric: SimilarityMetric) -> Result<bool> {
        if self
            .refresh_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("similarity refresh already running, skipping");
            return Ok(false);
        }

        let result = self.rebuild_neighbors_inner(metric).await;
        self.refresh_in_progress.store(false, Ordering::Release);
        result.map(|_| true)
    }

    async fn rebuild_neighbors_inner(&self, metric: SimilarityMetric) -> Result<()> {
        let pool = self.rating_pool(None).await?;
        info!(users = pool.len(), ?metric, "similarity refresh started");

        for (user_id, target) in &pool {
            let neighbors = self.find_neighbors(target, &pool, metric);
            // A user is trivially their own best match
            let neighbors: Vec<Neighbor> = neighbors
                .into_iter()
                .filter(|n| n.user_id != *user_id)
                .collect();
            stores::set_json(
                self.cache.as_ref(),
                &stores::keys::user_neighbors(*user_id),
                &neighbors,
                Duration::from_secs(self.config.cache_ttl_secs),
            )
            .await?;
        }

        info!("similarity refresh finished");
        Ok(())
    }

    async fn rating_pool(&self, skip: Option<Uuid>) -> Result<HashMap<Uuid, RatingVector>> {
        let mut pool = HashMap::new();
        for user_id in self.interactions.user_ids().await? {
            if Some(user_id) == skip {
                continue;
            }
            let ratings = self.profiles.user_item_ratings(user_id).await?;
            if !ratings.is_empty() {
                pool.insert(user_id, ratings);
            }
        }
        Ok(pool)
    }
}

fn cosine(a: &RatingVector, b: &RatingVector, common: &[Uuid]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for id in common {
        let (x, y) = (a[id], b[id]);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

fn pearson(a: &RatingVector, b: &RatingVector, common: &[Uuid]) -> f64 {
    let n = common.len() as f64;
    let mean_a = common.iter().map(|id| a[id]).sum::<f64>() / n;
    let mean_b = common.iter().map(|id| b[id]).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for id in common {
        let da = a[id] - mean_a;
        let db = b[id] - mean_b;
        covariance += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        0.0
    } else {
        covariance / (var_a.sqrt() * var_b.sqrt())
    }
}

fn jaccard(a: &RatingVector, b: &RatingVector) -> f64 {
    let set_a: HashSet<&Uuid> = a.keys().collect();
    let set_b: HashSet<&Uuid> = b.keys().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Latent-factor model trained by SGD with L2 regularization.
///
/// Training runs a fixed number of iterations with no convergence check;
/// that is a known limitation carried over from the original tuning, kept
/// deliberately rather than silently replaced.
pub struct MatrixFactorization {
    config: MatrixFactorizationConfig,
    user_factors: HashMap<Uuid, Vec<f64>>,
    item_factors: HashMap<Uuid, Vec<f64>>,
    trained: bool,
}

impl MatrixFactorization {
    pub fn new(config: MatrixFactorizationConfig) -> Self {
        Self {
            config,
            user_factors: HashMap::new(),
            item_factors: HashMap::new(),
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Train on (user, item, rating) triples
    pub fn train(&mut self, ratings: &[(Uuid, Uuid, f64)]) {
        if ratings.is_empty() {
            return;
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let k = self.config.factors;

        for (user_id, item_id, _) in ratings {
            self.user_factors
                .entry(*user_id)
                .or_insert_with(|| random_factors(&mut rng, k));
            self.item_factors
                .entry(*item_id)
                .or_insert_with(|| random_factors(&mut rng, k));
        }

        let lr = self.config.learning_rate;
        let reg = self.config.regularization;

        for _ in 0..self.config.iterations {
            for (user_id, item_id, rating) in ratings {
                let p_old = self.user_factors[user_id].clone();
                let q_old = self.item_factors[item_id].clone();
                let error = rating - dot(&p_old, &q_old);

                if let Some(user_row) = self.user_factors.get_mut(user_id) {
                    for f in 0..k {
                        user_row[f] += lr * (error * q_old[f] - reg * p_old[f]);
                    }
                }
                if let Some(item_row) = self.item_factors.get_mut(item_id) {
                    for f in 0..k {
                        item_row[f] += lr * (error * p_old[f] - reg * q_old[f]);
                    }
                }
            }
        }

        self.trained = true;
        debug!(
            users = self.user_factors.len(),
            items = self.item_factors.len(),
            iterations = self.config.iterations,
            "matrix factorization trained"
        );
    }

    /// Predicted rating, or `None` for users/items unseen in training
    pub fn predict(&self, user_id: Uuid, item_id: Uuid) -> Option<f64> {
        let p = self.user_factors.get(&user_id)?;
        let q = self.item_factors.get(&item_id)?;
        Some(dot(p, q))
    }
}

fn random_factors(rng: &mut StdRng, k: usize) -> Vec<f64> {
    (0..k).map(|_| rng.gen_range(0.0..0.1)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;
    use crate::stores::{InMemoryCache, InMemoryCatalog, InMemoryInteractionStore};

    fn engine() -> SimilarityEngine {
        let interactions: Arc<InMemoryInteractionStore> = Arc::new(InMemoryInteractionStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let profiles = Arc::new(UserProfileBuilder::new(
            interactions.clone(),
            Arc::new(InMemoryCatalog::new()),
            cache.clone(),
            ProfileConfig::default(),
        ));
        SimilarityEngine::new(interactions, cache, profiles, SimilarityConfig::default())
    }

    fn ratings(pairs: &[(Uuid, f64)]) -> RatingVector {
        pairs.iter().copied().collect()
    }

    #[test]
    fn all_metrics_are_symmetric() {
        let engine = engine();
        let (i1, i2, i3, i4) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let a = ratings(&[(i1, 4.0), (i2, 2.0), (i3, 5.0)]);
        let b = ratings(&[(i1, 3.0), (i2, 5.0), (i4, 1.0)]);

        for metric in [
            SimilarityMetric::Cosine,
            SimilarityMetric::Pearson,
            SimilarityMetric::Jaccard,
        ] {
            let ab = engine.similarity(&a, &b, metric);
            let ba = engine.similarity(&b, &a, metric);
            assert_eq!(ab, ba, "{:?} not symmetric", metric);
        }
    }

    #[test]
    fn below_min_common_items_is_zero() {
        let engine = engine();
        let shared = Uuid::new_v4();
        let a = ratings(&[(shared, 5.0), (Uuid::new_v4(), 3.0)]);
        let b = ratings(&[(shared, 5.0), (Uuid::new_v4(), 3.0)]);
        // Only one common item; min_common_items defaults to 2
        assert_eq!(engine.similarity(&a, &b, SimilarityMetric::Cosine), 0.0);
    }

    #[test]
    fn identical_vectors_have_cosine_one() {
        let engine = engine();
        let (i1, i2) = (Uuid::new_v4(), Uuid::new_v4());
        let a = ratings(&[(i1, 4.0), (i2, 2.0)]);
        let similarity = engine.similarity(&a, &a.clone(), SimilarityMetric::Cosine);
        assert!((similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_counts_presence_not_strength() {
        let engine = engine();
        let (i1, i2, i3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let a = ratings(&[(i1, 5.0), (i2, 1.0)]);
        let b = ratings(&[(i1, 0.5), (i2, 0.5), (i3, 4.0)]);
        let similarity = engine.similarity(&a, &b, SimilarityMetric::Jaccard);
        assert!((similarity - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn recommend_never_returns_excluded_items() {
        let engine = engine();
        let (i1, i2, i3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let target = ratings(&[(i1, 4.0)]);
        let neighbor = Neighbor {
            user_id: Uuid::new_v4(),
            similarity: 0.9,
        };
        let neighbor_ratings = ratings(&[(i1, 4.0), (i2, 5.0), (i3, 3.0)]);

        let exclude: HashSet<Uuid> = [i2].into_iter().collect();
        let scored = engine.recommend(&target, &[(neighbor, neighbor_ratings)], &exclude);

        assert!(scored.iter().all(|s| s.item_id != i2));
        assert!(scored.iter().all(|s| s.item_id != i1)); // already rated
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].item_id, i3);
    }

    #[test]
    fn recommend_is_similarity_weighted_average() {
        let engine = engine();
        let item = Uuid::new_v4();
        let target = ratings(&[(Uuid::new_v4(), 3.0)]);
        let n1 = Neighbor {
            user_id: Uuid::new_v4(),
            similarity: 0.8,
        };
        let n2 = Neighbor {
            user_id: Uuid::new_v4(),
            similarity: 0.2,
        };
        let scored = engine.recommend(
            &target,
            &[(n1, ratings(&[(item, 5.0)])), (n2, ratings(&[(item, 1.0)]))],
            &HashSet::new(),
        );

        // (0.8*5 + 0.2*1) / (0.8 + 0.2) = 4.2
        assert_eq!(scored.len(), 1);
        assert!((scored[0].score - 4.2).abs() < 1e-9);
        // Two supporting neighbors out of the 5 needed for full confidence
        assert!((scored[0].confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn matrix_factorization_learns_and_is_deterministic() {
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let items: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut triples = Vec::new();
        for (ui, user) in users.iter().enumerate() {
            for (ii, item) in items.iter().enumerate() {
                // Block structure: first half likes first half
                let rating = if (ui < 2) == (ii < 2) { 5.0 } else { 1.0 };
                triples.push((*user, *item, rating));
            }
        }

        let config = MatrixFactorizationConfig {
            iterations: 200,
            ..Default::default()
        };
        let mut model_a = MatrixFactorization::new(config.clone());
        model_a.train(&triples);
        let mut model_b = MatrixFactorization::new(config);
        model_b.train(&triples);

        let high = model_a.predict(users[0], items[0]).unwrap();
        let low = model_a.predict(users[0], items[3]).unwrap();
        assert!(high > low, "high {} low {}", high, low);

        // Seeded RNG makes training reproducible
        assert_eq!(high, model_b.predict(users[0], items[0]).unwrap());
        assert!(model_a.predict(Uuid::new_v4(), items[0]).is_none());
    }
}
