//! Engine services.
//!
//! Leaves first: profile building feeds the collaborative and content
//! scorers, trending runs independently of any single user, the hybrid
//! combiner merges scorer outputs, and the orchestrator ties everything
//! together under experiment governance.

pub mod collaborative;
pub mod content_based;
pub mod experiments;
pub mod hybrid;
pub mod orchestrator;
pub mod profile;
pub mod trending;

pub use collaborative::{MatrixFactorization, SimilarityEngine, SimilarityMetric};
pub use content_based::ContentProfiler;
pub use experiments::{
    Decision, ExperimentAnalysis, ExperimentManager, MetricResult, NewExperiment, Significance,
    VariantMetrics,
};
pub use hybrid::{CombinedScore, CombinerInput, HybridCombiner, ScoredItem, UserClass};
pub use orchestrator::{
    LinearNeuralModel, NeuralModel, RecommendationOrchestrator, Scorer, ScoringRequest,
};
pub use profile::{RatingVector, UserProfileBuilder};
pub use trending::{MealPeriod, Season, SeasonalScore, TrendAnalyzer, TrendScore};
