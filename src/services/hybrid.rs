//! Hybrid score combination.
//!
//! Merges collaborative, content-based, and popularity scores under a
//! per-call strategy, then applies the uniform post-processing pipeline:
//! diversification, contextual adjustment, the availability filter, and a
//! final stable sort.

use crate::config::HybridConfig;
use crate::models::{
    HybridStrategy, Item, RequestContext, ScoreSource, SourceKind, UserProfile, WeatherKind,
};
use crate::services::trending::MealPeriod;
use chrono::Timelike;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// One source's score for a candidate
#[derive(Debug, Clone, Copy)]
pub struct ScoredItem {
    pub item_id: Uuid,
    pub score: f64,
    pub confidence: f64,
}

/// Scorer outputs handed to the combiner
#[derive(Debug, Clone, Default)]
pub struct CombinerInput {
    pub collaborative: Vec<ScoredItem>,
    pub content: Vec<ScoredItem>,
    pub popularity: Vec<ScoredItem>,
}

/// Combined candidate with per-source components retained
#[derive(Debug, Clone)]
pub struct CombinedScore {
    pub item_id: Uuid,
    pub score: f64,
    pub confidence: f64,
    pub sources: Vec<ScoreSource>,
}

/// Behavioral class driving the adaptive weight triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserClass {
    New,
    Explorer,
    Focused,
    Active,
    Casual,
}

pub struct HybridCombiner {
    config: HybridConfig,
}

impl HybridCombiner {
    pub fn new(config: HybridConfig) -> Self {
        Self { config }
    }

    /// Classify a user from exploration and engagement scores
    pub fn classify_user(&self, profile: &UserProfile) -> UserClass {
        if profile.interaction_count <= self.config.new_user_max_interactions {
            UserClass::New
        } else if profile.exploration_score() >= self.config.explorer_min_exploration {
            UserClass::Explorer
        } else if profile.exploration_score() <= self.config.focused_max_exploration {
            UserClass::Focused
        } else if profile.engagement_score() >= self.config.active_min_engagement {
            UserClass::Active
        } else {
            UserClass::Casual
        }
    }

    /// Merge source scores under the selected strategy, then run the
    /// uniform post-processing pipeline. `items` must cover every candidate
    /// id present in `input`.
    pub fn combine(
        &self,
        strategy: HybridStrategy,
        input: &CombinerInput,
        profile: &UserProfile,
        items: &HashMap<Uuid, Item>,
        context: &RequestContext,
        diversity_factor: f64,
        limit: usize,
    ) -> Vec<CombinedScore> {
        let merged = match strategy {
            HybridStrategy::Weighted => self.combine_weighted(input),
            HybridStrategy::Switching => self.combine_switching(input, profile),
            HybridStrategy::Cascade => self.combine_cascade(input, limit),
            HybridStrategy::Adaptive => self.combine_adaptive(input, profile),
        };

        let processed = self.post_process(merged, items, context, diversity_factor, limit);
        debug!(?strategy, results = processed.len(), "hybrid combination done");
        processed
    }

    /// Uniform post-processing applied to every strategy and to
    /// single-algorithm results: diversification, contextual adjustment,
    /// the availability filter, and a final stable sort.
    pub fn post_process(
        &self,
        merged: Vec<CombinedScore>,
        items: &HashMap<Uuid, Item>,
        context: &RequestContext,
        diversity_factor: f64,
        limit: usize,
    ) -> Vec<CombinedScore> {
        let mut processed = self.diversify(merged, items, diversity_factor);
        self.adjust_for_context(&mut processed, items, context);
        processed.retain(|candidate| {
            items
                .get(&candidate.item_id)
                .map(|item| item.availability_score > self.config.min_availability)
                .unwrap_or(false)
        });
        processed.sort_by(|a, b| b.score.total_cmp(&a.score));
        processed.truncate(limit);
        processed
    }

    /// `collab·wc + content·wcb`; an item found by a single source keeps
    /// that source's weighted score (the missing source contributes 0).
    fn combine_weighted(&self, input: &CombinerInput) -> Vec<CombinedScore> {
        let weights = &self.config.weighted;
        let collab: HashMap<Uuid, ScoredItem> = index_by_id(&input.collaborative);
        let content: HashMap<Uuid, ScoredItem> = index_by_id(&input.content);

        let ids: HashSet<Uuid> = collab.keys().chain(content.keys()).copied().collect();
        ids.into_iter()
            .map(|item_id| {
                let mut score = 0.0;
                let mut confidence: f64 = 0.0;
                let mut sources = Vec::new();
                if let Some(c) = collab.get(&item_id) {
                    score += c.score * weights.collaborative;
                    confidence = confidence.max(c.confidence);
                    sources.push(ScoreSource {
                        kind: SourceKind::Collaborative,
                        score: c.score,
                        weight: weights.collaborative,
                    });
                }
                if let Some(c) = content.get(&item_id) {
                    score += c.score * weights.content_based;
                    confidence = confidence.max(c.confidence);
                    sources.push(ScoreSource {
                        kind: SourceKind::ContentBased,
                        score: c.score,
                        weight: weights.content_based,
                    });
                }
                CombinedScore {
                    item_id,
                    score,
                    confidence,
                    sources,
                }
            })
            .collect()
    }

    /// Rule cascade: no collaborative data → content-only; thin history →
    /// popularity-only; otherwise collaborative-only.
    fn combine_switching(&self, input: &CombinerInput, profile: &UserProfile) -> Vec<CombinedScore> {
        let (selected, kind) = if input.collaborative.is_empty() {
            (&input.content, SourceKind::ContentBased)
        } else if profile.interaction_count < self.config.switching_min_interactions {
            (&input.popularity, SourceKind::Popularity)
        } else {
            (&input.collaborative, SourceKind::Collaborative)
        };

        selected
            .iter()
            .map(|scored| CombinedScore::from_single(scored, kind))
            .collect()
    }

    /// Primary fills ⌈limit·share⌉ slots, secondary the remainder,
    /// popularity any leftover; deduplicated by item id.
    fn combine_cascade(&self, input: &CombinerInput, limit: usize) -> Vec<CombinedScore> {
        let primary_slots = (limit as f64 * self.config.cascade_primary_share).ceil() as usize;
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut out: Vec<CombinedScore> = Vec::new();

        for scored in input.collaborative.iter().take(primary_slots) {
            if seen.insert(scored.item_id) {
                out.push(CombinedScore::from_single(scored, SourceKind::Collaborative));
            }
        }
        for scored in &input.content {
            if out.len() >= limit {
                break;
            }
            if seen.insert(scored.item_id) {
                out.push(CombinedScore::from_single(scored, SourceKind::ContentBased));
            }
        }
        for scored in &input.popularity {
            if out.len() >= limit {
                break;
            }
            if seen.insert(scored.item_id) {
                out.push(CombinedScore::from_single(scored, SourceKind::Popularity));
            }
        }
        out
    }

    /// All three sources merged under the class-specific weight triple
    fn combine_adaptive(&self, input: &CombinerInput, profile: &UserProfile) -> Vec<CombinedScore> {
        let class = self.classify_user(profile);
        let table = &self.config.adaptive;
        let weights = match class {
            UserClass::New => table.new_user,
            UserClass::Explorer => table.explorer,
            UserClass::Focused => table.focused,
            UserClass::Active => table.active,
            UserClass::Casual => table.casual,
        };
        debug!(?class, "adaptive weights selected");

        let mut merged: HashMap<Uuid, CombinedScore> = HashMap::new();
        let mut fold = |scored: &[ScoredItem], kind: SourceKind, weight: f64| {
            if weight == 0.0 {
                return;
            }
            for item in scored {
                let entry = merged.entry(item.item_id).or_insert_with(|| CombinedScore {
                    item_id: item.item_id,
                    score: 0.0,
                    confidence: 0.0,
                    sources: Vec::new(),
                });
                entry.score += item.score * weight;
                entry.confidence = entry.confidence.max(item.confidence);
                entry.sources.push(ScoreSource {
                    kind,
                    score: item.score,
                    weight,
                });
            }
        };

        fold(
            &input.collaborative,
            SourceKind::Collaborative,
            weights.collaborative,
        );
        fold(&input.content, SourceKind::ContentBased, weights.content_based);
        fold(&input.popularity, SourceKind::Popularity, weights.popularity);

        merged.into_values().collect()
    }

    /// Walk the ranked list, rewarding items that introduce an unseen
    /// category or cuisine with ×(1+f) and penalizing repeats with ×(1−f),
    /// then re-sort.
    fn diversify(
        &self,
        mut candidates: Vec<CombinedScore>,
        items: &HashMap<Uuid, Item>,
        diversity_factor: f64,
    ) -> Vec<CombinedScore> {
        if diversity_factor <= 0.0 {
            return candidates;
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen_categories: HashSet<String> = HashSet::new();
        let mut seen_cuisines: HashSet<String> = HashSet::new();

        for candidate in candidates.iter_mut() {
            let Some(item) = items.get(&candidate.item_id) else {
                continue;
            };
            let novel = seen_categories.insert(item.category.clone())
                | seen_cuisines.insert(item.cuisine_type.clone());
            if novel {
                candidate.score *= 1.0 + diversity_factor;
            } else {
                candidate.score *= 1.0 - diversity_factor;
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }

    /// Multiplicative boosts for meal-period fit, weather fit, budget fit,
    /// and active promotions.
    fn adjust_for_context(
        &self,
        candidates: &mut [CombinedScore],
        items: &HashMap<Uuid, Item>,
        context: &RequestContext,
    ) {
        let boosts = &self.config.boosts;
        let period = MealPeriod::from_hour(context.now.hour());

        for candidate in candidates.iter_mut() {
            let Some(item) = items.get(&candidate.item_id) else {
                continue;
            };

            candidate.score *= match meal_period_fit(&item.category, period) {
                Some(true) => boosts.time_match,
                Some(false) => boosts.time_mismatch,
                None => 1.0,
            };

            if let Some(weather) = context.weather {
                if weather_fit(&item.category, weather) {
                    candidate.score *= boosts.weather_match;
                }
            }

            if let Some((low, high)) = context.budget_range {
                candidate.score *= if item.price >= low && item.price <= high {
                    boosts.budget_match
                } else {
                    boosts.budget_mismatch
                };
            }

            if item.is_promoted {
                candidate.score *= boosts.promotion;
            }
        }
    }
}

fn index_by_id(scored: &[ScoredItem]) -> HashMap<Uuid, ScoredItem> {
    scored.iter().map(|s| (s.item_id, *s)).collect()
}

impl CombinedScore {
    /// Wrap one source's score, carrying it at full weight
    pub fn from_single(scored: &ScoredItem, kind: SourceKind) -> Self {
        Self {
            item_id: scored.item_id,
            score: scored.score,
            confidence: scored.confidence,
            sources: vec![ScoreSource {
                kind,
                score: scored.score,
                weight: 1.0,
            }],
        }
    }
}

const BREAKFAST_CATEGORIES: &[&str] = &["breakfast", "bakery", "coffee", "pancakes"];
const SNACK_CATEGORIES: &[&str] = &["dessert", "snack", "ice cream"];

/// Some(true) = suits the period, Some(false) = clashes, None = neutral
fn meal_period_fit(category: &str, period: MealPeriod) -> Option<bool> {
    let is_breakfast = BREAKFAST_CATEGORIES.contains(&category);
    let is_snack = SNACK_CATEGORIES.contains(&category);
    match period {
        MealPeriod::Breakfast if is_breakfast => Some(true),
        MealPeriod::Breakfast if is_snack => Some(false),
        MealPeriod::Lunch | MealPeriod::Dinner if is_breakfast => Some(false),
        MealPeriod::Snack if is_snack => Some(true),
        _ => None,
    }
}

const COLD_WEATHER_CATEGORIES: &[&str] = &["soup", "stew", "ramen", "curry"];
const HOT_WEATHER_CATEGORIES: &[&str] = &["salad", "ice cream", "smoothie", "sushi"];

fn weather_fit(category: &str, weather: WeatherKind) -> bool {
    match weather {
        WeatherKind::Cold | WeatherKind::Rainy => COLD_WEATHER_CATEGORIES.contains(&category),
        WeatherKind::Hot => HOT_WEATHER_CATEGORIES.contains(&category),
        WeatherKind::Sunny => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(id: Uuid, category: &str, cuisine: &str) -> Item {
        Item {
            id,
            name: category.into(),
            description: String::new(),
            ingredients: vec![],
            category: category.into(),
            cuisine_type: cuisine.into(),
            price: 10.0,
            spice_level: 2.0,
            dietary_tags: vec![],
            feature_vector: vec![],
            availability_score: 1.0,
            popularity_score: 0.5,
            rating_average: 4.0,
            is_promoted: false,
        }
    }

    fn scored(id: Uuid, score: f64) -> ScoredItem {
        ScoredItem {
            item_id: id,
            score,
            confidence: 0.8,
        }
    }

    fn lunch_context() -> RequestContext {
        RequestContext::at(Utc.with_ymd_and_hms(2026, 8, 8, 12, 0, 0).unwrap())
    }

    fn profile_with(interactions: usize, unique_items: usize, unique_categories: usize) -> UserProfile {
        UserProfile {
            interaction_count: interactions,
            unique_items,
            unique_categories,
            recent_interactions: interactions / 2,
            ..Default::default()
        }
    }

    #[test]
    fn weighted_matches_formula_for_both_and_single_source() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let both = Uuid::new_v4();
        let collab_only = Uuid::new_v4();

        let input = CombinerInput {
            collaborative: vec![scored(both, 0.8), scored(collab_only, 0.5)],
            content: vec![scored(both, 0.6)],
            popularity: vec![],
        };
        let merged = combiner.combine_weighted(&input);

        let both_score = merged.iter().find(|c| c.item_id == both).unwrap();
        assert!((both_score.score - (0.8 * 0.6 + 0.6 * 0.4)).abs() < 1e-9);
        assert_eq!(both_score.sources.len(), 2);

        let single = merged.iter().find(|c| c.item_id == collab_only).unwrap();
        assert!((single.score - 0.5 * 0.6).abs() < 1e-9);
        assert_eq!(single.sources.len(), 1);
    }

    #[test]
    fn switching_follows_rule_cascade() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let collab_item = scored(Uuid::new_v4(), 0.9);
        let content_item = scored(Uuid::new_v4(), 0.7);
        let popular_item = scored(Uuid::new_v4(), 0.5);

        // No collaborative data: content wins even for a thin history
        let input = CombinerInput {
            collaborative: vec![],
            content: vec![content_item],
            popularity: vec![popular_item],
        };
        let merged = combiner.combine_switching(&input, &profile_with(1, 1, 1));
        assert_eq!(merged[0].item_id, content_item.item_id);

        // Collaborative data but below the interaction floor: popularity
        let input = CombinerInput {
            collaborative: vec![collab_item],
            content: vec![content_item],
            popularity: vec![popular_item],
        };
        let merged = combiner.combine_switching(&input, &profile_with(2, 2, 1));
        assert_eq!(merged[0].item_id, popular_item.item_id);

        // Established user: collaborative only
        let merged = combiner.combine_switching(&input, &profile_with(50, 20, 5));
        assert_eq!(merged[0].item_id, collab_item.item_id);
    }

    #[test]
    fn cascade_fills_slots_without_duplicates() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let shared = Uuid::new_v4();
        let input = CombinerInput {
            collaborative: vec![scored(shared, 0.9), scored(Uuid::new_v4(), 0.8)],
            content: vec![scored(shared, 0.7), scored(Uuid::new_v4(), 0.6)],
            popularity: vec![scored(Uuid::new_v4(), 0.4), scored(Uuid::new_v4(), 0.3)],
        };

        // limit 5, primary share 0.6 → 3 primary slots (only 2 available)
        let merged = combiner.combine_cascade(&input, 5);
        assert_eq!(merged.len(), 5);

        let ids: HashSet<Uuid> = merged.iter().map(|c| c.item_id).collect();
        assert_eq!(ids.len(), 5, "cascade must deduplicate by item id");
    }

    #[test]
    fn adaptive_new_user_skips_collaborative() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let profile = profile_with(1, 1, 1);
        assert_eq!(combiner.classify_user(&profile), UserClass::New);

        let collab_item = Uuid::new_v4();
        let popular_item = Uuid::new_v4();
        let input = CombinerInput {
            collaborative: vec![scored(collab_item, 0.9)],
            content: vec![],
            popularity: vec![scored(popular_item, 0.6)],
        };
        let merged = combiner.combine_adaptive(&input, &profile);
        // New-user collaborative weight is 0: the item never enters
        assert!(merged.iter().all(|c| c.item_id != collab_item));
        assert!(merged.iter().any(|c| c.item_id == popular_item));
    }

    #[test]
    fn classification_covers_all_classes() {
        let combiner = HybridCombiner::new(HybridConfig::default());

        assert_eq!(combiner.classify_user(&profile_with(2, 2, 1)), UserClass::New);
        // 8 categories over 10 items: explorer
        assert_eq!(
            combiner.classify_user(&profile_with(20, 10, 8)),
            UserClass::Explorer
        );
        // 2 categories over 10 items: focused
        assert_eq!(
            combiner.classify_user(&profile_with(20, 10, 2)),
            UserClass::Focused
        );
        // Mid exploration, high engagement: active
        assert_eq!(
            combiner.classify_user(&profile_with(20, 10, 4)),
            UserClass::Active
        );
        // Mid exploration, low engagement: casual
        let mut casual = profile_with(20, 10, 4);
        casual.recent_interactions = 2;
        assert_eq!(combiner.classify_user(&casual), UserClass::Casual);
    }

    #[test]
    fn diversification_rewards_novel_category() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let items: HashMap<Uuid, Item> = [
            (a, item(a, "pizza", "italian")),
            (b, item(b, "pizza", "italian")),
            (c, item(c, "sushi", "japanese")),
        ]
        .into_iter()
        .collect();

        let candidates = vec![
            CombinedScore {
                item_id: a,
                score: 0.9,
                confidence: 1.0,
                sources: vec![],
            },
            CombinedScore {
                item_id: b,
                score: 0.85,
                confidence: 1.0,
                sources: vec![],
            },
            CombinedScore {
                item_id: c,
                score: 0.8,
                confidence: 1.0,
                sources: vec![],
            },
        ];

        let ranked = combiner.diversify(candidates, &items, 0.2);
        assert_eq!(ranked[0].item_id, a, "top item keeps rank 1");
        assert_eq!(ranked[1].item_id, c, "novel category outranks the repeat");
        assert_eq!(ranked[2].item_id, b);
    }

    #[test]
    fn business_filter_drops_low_availability() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let available = Uuid::new_v4();
        let unavailable = Uuid::new_v4();

        let mut low = item(unavailable, "pizza", "italian");
        low.availability_score = 0.4;
        let items: HashMap<Uuid, Item> = [
            (available, item(available, "pizza", "italian")),
            (unavailable, low),
        ]
        .into_iter()
        .collect();

        let input = CombinerInput {
            collaborative: vec![scored(available, 0.5), scored(unavailable, 0.9)],
            content: vec![],
            popularity: vec![],
        };
        let results = combiner.combine(
            HybridStrategy::Weighted,
            &input,
            &profile_with(10, 5, 3),
            &items,
            &lunch_context(),
            0.0,
            10,
        );

        assert!(results.iter().any(|c| c.item_id == available));
        assert!(results.iter().all(|c| c.item_id != unavailable));
    }

    #[test]
    fn budget_fit_boosts_and_penalizes() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let cheap = Uuid::new_v4();
        let pricey = Uuid::new_v4();

        let mut expensive = item(pricey, "steak", "american");
        expensive.price = 80.0;
        let items: HashMap<Uuid, Item> = [
            (cheap, item(cheap, "noodles", "thai")),
            (pricey, expensive),
        ]
        .into_iter()
        .collect();

        let mut context = lunch_context();
        context.budget_range = Some((5.0, 20.0));

        let input = CombinerInput {
            collaborative: vec![scored(cheap, 0.5), scored(pricey, 0.5)],
            content: vec![],
            popularity: vec![],
        };
        let results = combiner.combine(
            HybridStrategy::Weighted,
            &input,
            &profile_with(10, 5, 3),
            &items,
            &context,
            0.0,
            10,
        );

        let cheap_score = results.iter().find(|c| c.item_id == cheap).unwrap().score;
        let pricey_score = results.iter().find(|c| c.item_id == pricey).unwrap().score;
        assert!(cheap_score > pricey_score);
    }

    #[test]
    fn final_order_is_strictly_decreasing() {
        let combiner = HybridCombiner::new(HybridConfig::default());
        let ids: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let items: HashMap<Uuid, Item> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, item(*id, &format!("cat{}", i), "fusion")))
            .collect();

        let input = CombinerInput {
            collaborative: ids.iter().enumerate().map(|(i, id)| scored(*id, 0.3 + 0.1 * i as f64)).collect(),
            content: vec![],
            popularity: vec![],
        };
        let results = combiner.combine(
            HybridStrategy::Weighted,
            &input,
            &profile_with(10, 5, 3),
            &items,
            &lunch_context(),
            0.1,
            10,
        );

        for window in results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }
}
