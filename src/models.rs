//! Domain types shared across the engine.
//!
//! Interactions are append-only events; profiles and similarity scores are
//! derived caches rebuilt by batch jobs and never hand-edited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of user-item event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Click,
    Cart,
    Order,
    Rate,
    Favorite,
    Share,
}

impl InteractionType {
    /// Base implicit-rating weight for this event kind.
    ///
    /// Orders carry the strongest signal, views the weakest.
    pub fn base_weight(&self) -> f64 {
        match self {
            InteractionType::View => 1.0,
            InteractionType::Click => 1.5,
            InteractionType::Cart => 2.5,
            InteractionType::Order => 4.0,
            InteractionType::Rate => 3.0,
            InteractionType::Favorite => 3.5,
            InteractionType::Share => 3.0,
        }
    }
}

/// Experiment attribution attached to tracked interactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentTag {
    pub experiment_id: Uuid,
    pub variant: Variant,
    pub algorithm: AlgorithmKind,
}

/// Per-event context captured at ingestion time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionContext {
    /// Seconds the user spent on the item view, if known
    pub dwell_seconds: Option<u32>,
    /// Experiment attribution, set when the event came from an experiment arm
    pub experiment: Option<ExperimentTag>,
}

/// One user-item event. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub interaction_type: InteractionType,
    /// Explicit value for `Rate` events (stars, 0-5)
    pub value: Option<f64>,
    #[serde(default)]
    pub context: InteractionContext,
    pub timestamp: DateTime<Utc>,
}

/// Catalog entry as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub ingredients: Vec<String>,
    pub category: String,
    pub cuisine_type: String,
    pub price: f64,
    /// Heat level, 0 (none) to 5 (extreme)
    pub spice_level: f64,
    pub dietary_tags: Vec<String>,
    /// Catalog-provided embedding used for content matching
    pub feature_vector: Vec<f64>,
    /// 0.0 = unavailable, excluded from every recommendation path
    pub availability_score: f64,
    pub popularity_score: f64,
    pub rating_average: f64,
    pub is_promoted: bool,
}

impl Item {
    pub fn text_corpus(&self) -> String {
        let mut corpus = String::new();
        corpus.push_str(&self.name);
        corpus.push(' ');
        corpus.push_str(&self.description);
        for ingredient in &self.ingredients {
            corpus.push(' ');
            corpus.push_str(ingredient);
        }
        corpus
    }
}

/// Explicit, user-stated preferences (distinct from derived profile weights)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplicitPreferences {
    pub favorite_cuisines: Vec<String>,
    pub dietary_restrictions: Vec<String>,
    pub preferred_price_range: Option<(f64, f64)>,
}

/// Aggregated taste profile derived from a user's interaction history.
///
/// Weight maps are normalized so each dimension sums to at most 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub category_weights: HashMap<String, f64>,
    pub cuisine_weights: HashMap<String, f64>,
    pub feature_vector: Vec<f64>,
    pub avg_price: f64,
    pub avg_spice_level: f64,
    pub dietary_tag_weights: HashMap<String, f64>,
    pub text_corpus: String,
    pub explicit: Option<ExplicitPreferences>,
    pub interaction_count: usize,
    pub unique_items: usize,
    pub unique_categories: usize,
    /// Interactions inside the recent-activity window
    pub recent_interactions: usize,
    pub built_at: DateTime<Utc>,
}

impl UserProfile {
    /// Share of distinct categories over distinct items; high values mean
    /// the user samples broadly instead of reordering favorites.
    pub fn exploration_score(&self) -> f64 {
        if self.unique_items == 0 {
            return 0.0;
        }
        self.unique_categories as f64 / self.unique_items as f64
    }

    /// Share of activity that is recent.
    pub fn engagement_score(&self) -> f64 {
        if self.interaction_count == 0 {
            return 0.0;
        }
        self.recent_interactions as f64 / self.interaction_count as f64
    }
}

/// Pairwise similarity method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    Cosine,
    Pearson,
    Jaccard,
}

/// Which signal source produced (part of) a recommendation score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Collaborative,
    ContentBased,
    Trending,
    Popularity,
    Neural,
}

/// Per-source score component retained for explanations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSource {
    pub kind: SourceKind,
    pub score: f64,
    pub weight: f64,
}

/// Hybrid combination strategy, selected per call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HybridStrategy {
    Weighted,
    Switching,
    Cascade,
    Adaptive,
}

/// Closed set of dispatchable algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "strategy")]
pub enum AlgorithmKind {
    Collaborative,
    ContentBased,
    Trending,
    Popularity,
    Neural,
    Hybrid(HybridStrategy),
}

/// Scored output entry. Within one response, scores strictly decrease by rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: Uuid,
    pub score: f64,
    /// How much evidence backs the score, 0..1
    pub confidence: f64,
    pub algorithm: AlgorithmKind,
    pub sources: Vec<ScoreSource>,
    pub explanation: String,
}

/// Experiment arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Control,
    Treatment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Active,
    Stopped,
}

/// Metric an experiment is judged on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    Ctr,
    ConversionRate,
    EngagementRate,
}

/// A/B test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub control_algorithm: AlgorithmKind,
    pub treatment_algorithm: AlgorithmKind,
    /// Fraction of traffic per arm, in (0, 0.5]
    pub traffic_split: f64,
    pub target_metrics: Vec<TargetMetric>,
    pub segment_filters: Vec<String>,
    pub status: ExperimentStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// User-variant binding, deterministic and immutable for the experiment's life
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub user_id: Uuid,
    pub experiment_id: Uuid,
    pub variant: Variant,
    pub assigned_at: DateTime<Utc>,
}

/// Weather condition resolved by a `WeatherProvider`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherKind {
    Sunny,
    Rainy,
    Cold,
    Hot,
}

/// Demand level resolved by a `DemandProvider`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemandLevel {
    Low,
    Normal,
    High,
}

/// Per-request scoring context, resolved once by the orchestrator
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub now: DateTime<Utc>,
    pub weather: Option<WeatherKind>,
    pub demand: Option<DemandLevel>,
    pub budget_range: Option<(f64, f64)>,
}

impl RequestContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            weather: None,
            demand: None,
            budget_range: None,
        }
    }
}

/// Options for a recommendation request
#[derive(Debug, Clone)]
pub struct RecommendationOptions {
    pub limit: usize,
    /// Explicit algorithm override; takes precedence over experiments
    pub algorithm: Option<AlgorithmKind>,
    pub diversity_factor: f64,
    pub exclude_interacted: bool,
    pub budget_range: Option<(f64, f64)>,
}

impl Default for RecommendationOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            algorithm: None,
            diversity_factor: 0.2,
            exclude_interacted: true,
            budget_range: None,
        }
    }
}

/// Experiment attribution returned alongside recommendations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentInfo {
    pub experiment_id: Uuid,
    pub name: String,
    pub variant: Variant,
}

/// Engine response for one recommendation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<Recommendation>,
    pub algorithm_used: AlgorithmKind,
    pub experiment_info: Option<ExperimentInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_outweighs_view() {
        assert!(InteractionType::Order.base_weight() > InteractionType::View.base_weight());
    }

    #[test]
    fn exploration_score_handles_empty_profile() {
        let profile = UserProfile::default();
        assert_eq!(profile.exploration_score(), 0.0);
        assert_eq!(profile.engagement_score(), 0.0);
    }

    #[test]
    fn algorithm_kind_serializes_with_strategy() {
        let algo = AlgorithmKind::Hybrid(HybridStrategy::Weighted);
        let json = serde_json::to_string(&algo).unwrap();
        let back: AlgorithmKind = serde_json::from_str(&json).unwrap();
        assert_eq!(algo, back);
    }
}
