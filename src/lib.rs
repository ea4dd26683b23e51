// ============================================
// Hybrid Recommendation & Experimentation Engine
// ============================================
//
// Scores candidate items for a user by blending multiple signal sources:
// 1. Collaborative Filtering (user-user similarity, matrix factorization)
// 2. Content-Based Filtering (profile matching + TF-IDF text similarity)
// 3. Trending / Seasonal Analysis (time-decayed batch scoring)
// 4. Hybrid Combination (weighted / switching / cascade / adaptive)
// 5. A/B Experimentation (deterministic bucketing + z-test analysis)
//
// Architecture:
//   Request → Orchestrator → (Profile, Collaborative, Content, Trending)
//                               ↓
//                        Hybrid Combiner → diversify → adjust → filter
//                               ↓
//            Experiment exposure recorded → ranked response
//
// Transport, persistence, and the training pipeline live outside this
// crate; it consumes an ItemCatalog, an InteractionStore, and a TTL Cache.

pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;
pub mod stores;

pub use config::EngineConfig;
pub use error::{AppError, Result};
pub use models::{
    AlgorithmKind, HybridStrategy, Interaction, InteractionType, Item, Recommendation,
    RecommendationOptions, RecommendationResponse, SimilarityMetric, UserProfile, Variant,
};
pub use services::{
    ExperimentManager, HybridCombiner, NeuralModel, RecommendationOrchestrator, Scorer,
    SimilarityEngine, TrendAnalyzer, UserProfileBuilder,
};
pub use stores::{Cache, InMemoryCache, InMemoryCatalog, InMemoryInteractionStore, InteractionStore, ItemCatalog};
