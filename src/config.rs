/// Engine configuration
///
/// Every hand-tuned blend weight lives here with a `Default` impl rather
/// than at a call site. None of the defaults are claimed optimal; they are
/// starting points meant to be tuned through experiments.
use crate::error::{AppError, Result};
use crate::models::{AlgorithmKind, HybridStrategy, SimilarityMetric};
use serde::{Deserialize, Serialize};

/// Profile building parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Window that counts as "recent" for engagement scoring
    pub recent_window_days: i64,
    /// Implicit-rating bonus per minute of dwell time
    pub dwell_bonus_per_minute: f64,
    /// Cap on the dwell bonus
    pub dwell_bonus_cap: f64,
    pub cache_ttl_secs: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            recent_window_days: 14,
            dwell_bonus_per_minute: 0.25,
            dwell_bonus_cap: 1.0,
            cache_ttl_secs: 1800,
        }
    }
}

/// Neighborhood-based collaborative filtering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Below this many co-rated items, similarity is reported as 0
    pub min_common_items: usize,
    pub min_similarity: f64,
    pub max_neighbors: usize,
    /// Metric used when the caller does not pick one
    pub default_metric: SimilarityMetric,
    pub cache_ttl_secs: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            min_common_items: 2,
            min_similarity: 0.1,
            max_neighbors: 20,
            default_metric: SimilarityMetric::Cosine,
            cache_ttl_secs: 3600,
        }
    }
}

/// SGD matrix factorization parameters.
///
/// Training runs a fixed iteration count with no convergence check; that
/// limitation is inherited from the original tuning and kept as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixFactorizationConfig {
    pub factors: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for MatrixFactorizationConfig {
    fn default() -> Self {
        Self {
            factors: 16,
            learning_rate: 0.01,
            regularization: 0.02,
            iterations: 40,
            seed: 42,
        }
    }
}

/// Relative weight of each content sub-score. The final item score is
/// Σ(weight × sub-score) / Σ(weight) over the sub-scores that apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentScoreWeights {
    pub category: f64,
    pub cuisine: f64,
    pub feature_vector: f64,
    pub price: f64,
    pub spice: f64,
    pub dietary: f64,
    pub explicit_preference: f64,
    pub popularity: f64,
}

impl Default for ContentScoreWeights {
    fn default() -> Self {
        Self {
            category: 0.25,
            cuisine: 0.20,
            feature_vector: 0.20,
            price: 0.10,
            spice: 0.05,
            dietary: 0.10,
            explicit_preference: 0.05,
            popularity: 0.05,
        }
    }
}

/// Content-based scoring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    pub weights: ContentScoreWeights,
    /// Blend ratio for TF-IDF text similarity when enabled
    pub text_mixing_ratio: f64,
    pub enable_text_similarity: bool,
    /// Candidates scoring below this are dropped
    pub min_score: f64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            weights: ContentScoreWeights::default(),
            text_mixing_ratio: 0.3,
            enable_text_similarity: true,
            min_score: 0.05,
        }
    }
}

/// Linear blend weights for the daily trend score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendBlendWeights {
    pub interaction_count: f64,
    pub unique_users: f64,
    pub momentum: f64,
    pub purchases: f64,
    pub rating: f64,
}

impl Default for TrendBlendWeights {
    fn default() -> Self {
        Self {
            interaction_count: 0.3,
            unique_users: 0.25,
            momentum: 0.2,
            purchases: 0.15,
            rating: 0.1,
        }
    }
}

/// Trending computation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingConfig {
    /// Days of history the daily trend batch looks at
    pub window_days: i64,
    /// Decay rate (lambda) for momentum: higher = faster decay
    pub decay_rate: f64,
    pub blend: TrendBlendWeights,
    /// Spike rule: current window vs trailing hourly average
    pub spike_window_hours: i64,
    pub spike_baseline_days: i64,
    pub spike_multiplier: f64,
    pub cache_ttl_secs: u64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            decay_rate: 0.1,
            blend: TrendBlendWeights::default(),
            spike_window_hours: 2,
            spike_baseline_days: 7,
            spike_multiplier: 3.0,
            cache_ttl_secs: 900,
        }
    }
}

impl TrendingConfig {
    /// e^(-λ × age_days); weights recent days higher inside the window
    pub fn decay_factor(&self, age_days: f64) -> f64 {
        (-self.decay_rate * age_days).exp()
    }

    /// Time for a momentum contribution to decay to 50%: ln(2) / λ
    pub fn half_life_days(&self) -> f64 {
        2.0_f64.ln() / self.decay_rate
    }

    pub fn validate(&self) -> Result<()> {
        if self.decay_rate <= 0.0 || self.decay_rate > 1.0 {
            return Err(AppError::ValidationError(format!(
                "Decay rate must be in (0, 1], got {}",
                self.decay_rate
            )));
        }
        if self.spike_multiplier <= 1.0 {
            return Err(AppError::ValidationError(
                "Spike multiplier must exceed 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Weights for the weighted hybrid strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridWeights {
    pub collaborative: f64,
    pub content_based: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.6,
            content_based: 0.4,
        }
    }
}

impl HybridWeights {
    pub fn validate(&self) -> Result<()> {
        let sum = self.collaborative + self.content_based;
        if (sum - 1.0).abs() > 0.01 {
            return Err(AppError::ValidationError(format!(
                "Hybrid weights must sum to 1.0 (got {})",
                sum
            )));
        }
        Ok(())
    }
}

/// Weight triple used by the adaptive strategy, one per user class
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveWeights {
    pub collaborative: f64,
    pub content_based: f64,
    pub popularity: f64,
}

/// Per-class adaptive weight table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveWeightTable {
    pub new_user: AdaptiveWeights,
    pub explorer: AdaptiveWeights,
    pub focused: AdaptiveWeights,
    pub active: AdaptiveWeights,
    pub casual: AdaptiveWeights,
}

impl Default for AdaptiveWeightTable {
    fn default() -> Self {
        Self {
            new_user: AdaptiveWeights {
                collaborative: 0.0,
                content_based: 0.3,
                popularity: 0.7,
            },
            explorer: AdaptiveWeights {
                collaborative: 0.3,
                content_based: 0.3,
                popularity: 0.4,
            },
            focused: AdaptiveWeights {
                collaborative: 0.3,
                content_based: 0.6,
                popularity: 0.1,
            },
            active: AdaptiveWeights {
                collaborative: 0.6,
                content_based: 0.3,
                popularity: 0.1,
            },
            casual: AdaptiveWeights {
                collaborative: 0.2,
                content_based: 0.4,
                popularity: 0.4,
            },
        }
    }
}

/// Multiplicative boosts applied during contextual adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBoosts {
    /// Category suits the current meal period
    pub time_match: f64,
    /// Category clashes with the current meal period
    pub time_mismatch: f64,
    /// Category suits the current weather
    pub weather_match: f64,
    /// Price inside the requested budget range
    pub budget_match: f64,
    /// Price outside the requested budget range
    pub budget_mismatch: f64,
    pub promotion: f64,
}

impl Default for ContextBoosts {
    fn default() -> Self {
        Self {
            time_match: 1.15,
            time_mismatch: 0.9,
            weather_match: 1.15,
            budget_match: 1.1,
            budget_mismatch: 0.85,
            promotion: 1.1,
        }
    }
}

/// Hybrid combination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub weighted: HybridWeights,
    /// Switching: below this many interactions, fall to popularity-only
    pub switching_min_interactions: usize,
    /// Cascade: fraction of the limit the primary algorithm fills
    pub cascade_primary_share: f64,
    pub adaptive: AdaptiveWeightTable,
    /// Adaptive classification thresholds
    pub new_user_max_interactions: usize,
    pub explorer_min_exploration: f64,
    pub focused_max_exploration: f64,
    pub active_min_engagement: f64,
    pub boosts: ContextBoosts,
    /// Items at or below this availability are dropped by the business filter
    pub min_availability: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            weighted: HybridWeights::default(),
            switching_min_interactions: 5,
            cascade_primary_share: 0.6,
            adaptive: AdaptiveWeightTable::default(),
            new_user_max_interactions: 3,
            explorer_min_exploration: 0.6,
            focused_max_exploration: 0.3,
            active_min_engagement: 0.5,
            boosts: ContextBoosts::default(),
            min_availability: 0.5,
        }
    }
}

/// Experiment analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Per-variant minimum sample size for a computed p-value
    pub min_sample_size: usize,
    pub significance_level: f64,
    /// TTL used when caching variant assignments
    pub assignment_ttl_secs: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 30,
            significance_level: 0.05,
            assignment_ttl_secs: 90 * 24 * 3600,
        }
    }
}

/// Orchestrator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub default_algorithm: AlgorithmKind,
    /// Upper bound on candidates pulled from the catalog per request
    pub candidate_pool_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_algorithm: AlgorithmKind::Hybrid(HybridStrategy::Weighted),
            candidate_pool_size: 500,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub profile: ProfileConfig,
    pub similarity: SimilarityConfig,
    pub matrix_factorization: MatrixFactorizationConfig,
    pub content: ContentConfig,
    pub trending: TrendingConfig,
    pub hybrid: HybridConfig,
    pub experiments: ExperimentConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Load defaults, applying optional environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<f64>("RECO_TRENDING_DECAY_RATE") {
            config.trending.decay_rate = v;
        }
        if let Some(v) = env_parse::<u64>("RECO_TRENDING_CACHE_TTL_SECS") {
            config.trending.cache_ttl_secs = v;
        }
        if let Some(v) = env_parse::<f64>("RECO_HYBRID_COLLABORATIVE_WEIGHT") {
            config.hybrid.weighted.collaborative = v;
            config.hybrid.weighted.content_based = 1.0 - v;
        }
        if let Some(v) = env_parse::<usize>("RECO_MIN_SAMPLE_SIZE") {
            config.experiments.min_sample_size = v;
        }
        if let Some(v) = env_parse::<usize>("RECO_CANDIDATE_POOL_SIZE") {
            config.orchestrator.candidate_pool_size = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.trending.validate()?;
        self.hybrid.weighted.validate()?;
        if self.hybrid.cascade_primary_share <= 0.0 || self.hybrid.cascade_primary_share >= 1.0 {
            return Err(AppError::ValidationError(
                "Cascade primary share must be in (0, 1)".into(),
            ));
        }
        if self.experiments.significance_level <= 0.0 || self.experiments.significance_level >= 1.0
        {
            return Err(AppError::ValidationError(
                "Significance level must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
