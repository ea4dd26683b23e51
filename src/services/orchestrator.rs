//! Request orchestration.
//!
//! Resolves which algorithm to run (explicit override → active experiment
//! assignment → configured default), dispatches through the closed `Scorer`
//! set, routes results through the hybrid combiner's post-processing, and
//! records experiment exposure. A scorer failure is logged and replaced by
//! the popularity ranking; callers never see it.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{
    AlgorithmKind, ExperimentInfo, ExperimentTag, Interaction, InteractionContext,
    InteractionType, Item, Recommendation, RecommendationOptions, RecommendationResponse,
    RequestContext, ScoreSource, SourceKind, UserProfile,
};
use crate::providers::{
    DemandProvider, StaticDemandProvider, StaticWeatherProvider, WeatherProvider,
};
use crate::services::collaborative::SimilarityEngine;
use crate::services::content_based::ContentProfiler;
use crate::services::experiments::ExperimentManager;
use crate::services::hybrid::{CombinedScore, CombinerInput, HybridCombiner, ScoredItem};
use crate::services::profile::UserProfileBuilder;
use crate::services::trending::TrendAnalyzer;
use crate::stores::{Cache, InteractionStore, ItemCatalog};
use chrono::Utc;
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Pluggable learned scorer. The engine only depends on this contract; the
/// training/serving pipeline behind an implementation is out of scope.
pub trait NeuralModel: Send + Sync {
    fn score(
        &self,
        profile: &UserProfile,
        candidates: &[Item],
        context: &RequestContext,
    ) -> Result<Vec<ScoredItem>>;

    fn explain(&self) -> String;
}

/// Baseline `NeuralModel`: a logistic blend over catalog and taste-affinity
/// features. Stands in until an integrator supplies a trained model.
pub struct LinearNeuralModel {
    popularity_weight: f64,
    rating_weight: f64,
    affinity_weight: f64,
    price_weight: f64,
    bias: f64,
}

impl Default for LinearNeuralModel {
    fn default() -> Self {
        Self {
            popularity_weight: 1.2,
            rating_weight: 1.0,
            affinity_weight: 1.5,
            price_weight: 0.6,
            bias: -1.5,
        }
    }
}

impl NeuralModel for LinearNeuralModel {
    fn score(
        &self,
        profile: &UserProfile,
        candidates: &[Item],
        _context: &RequestContext,
    ) -> Result<Vec<ScoredItem>> {
        let mut scored: Vec<ScoredItem> = candidates
            .iter()
            .map(|item| {
                let affinity = *profile.category_weights.get(&item.category).unwrap_or(&0.0);
                let price_fit = if profile.avg_price > 0.0 {
                    1.0 - ((item.price - profile.avg_price).abs() / profile.avg_price).min(1.0)
                } else {
                    0.5
                };
                let logit = self.popularity_weight * item.popularity_score.clamp(0.0, 1.0)
                    + self.rating_weight * item.rating_average / 5.0
                    + self.affinity_weight * affinity
                    + self.price_weight * price_fit
                    + self.bias;
                ScoredItem {
                    item_id: item.id,
                    score: 1.0 / (1.0 + (-logit).exp()),
                    confidence: 0.5,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scored)
    }

    fn explain(&self) -> String {
        "ranked by a learned blend of popularity, rating, and taste affinity".into()
    }
}

/// Everything a scorer needs for one request
pub struct ScoringRequest<'a> {
    pub user_id: Uuid,
    pub profile: &'a UserProfile,
    pub candidates: &'a [Item],
    pub exclude: &'a HashSet<Uuid>,
    pub context: &'a RequestContext,
}

/// Closed set of dispatchable scorers. The orchestrator matches on the
/// variant; there is no string-keyed lookup anywhere.
#[derive(Clone)]
pub enum Scorer {
    Collaborative(Arc<SimilarityEngine>),
    ContentBased(Arc<ContentProfiler>),
    Trending(Arc<TrendAnalyzer>),
    Popularity,
    Neural(Arc<dyn NeuralModel>),
}

impl Scorer {
    pub fn kind(&self) -> SourceKind {
        match self {
            Scorer::Collaborative(_) => SourceKind::Collaborative,
            Scorer::ContentBased(_) => SourceKind::ContentBased,
            Scorer::Trending(_) => SourceKind::Trending,
            Scorer::Popularity => SourceKind::Popularity,
            Scorer::Neural(_) => SourceKind::Neural,
        }
    }

    pub async fn score(&self, request: &ScoringRequest<'_>) -> Result<Vec<ScoredItem>> {
        let candidate_ids: HashSet<Uuid> = request.candidates.iter().map(|i| i.id).collect();
        match self {
            Scorer::Collaborative(engine) => {
                let metric = engine.default_metric();
                let scored = engine
                    .recommend_for_user(request.user_id, metric, request.exclude)
                    .await?;
                Ok(scored
                    .into_iter()
                    .filter(|s| candidate_ids.contains(&s.item_id))
                    .map(|s| ScoredItem {
                        item_id: s.item_id,
                        // Implicit ratings live on a 0-5 scale
                        score: (s.score / 5.0).clamp(0.0, 1.0),
                        confidence: s.confidence,
                    })
                    .collect())
            }
            Scorer::ContentBased(profiler) => Ok(profiler
                .score_candidates(request.profile, request.candidates, request.exclude)
                .into_iter()
                .map(|s| ScoredItem {
                    item_id: s.item_id,
                    score: s.score,
                    confidence: s.confidence,
                })
                .collect()),
            Scorer::Trending(analyzer) => {
                let trends = analyzer.daily_trends().await?;
                Ok(trends
                    .into_iter()
                    .filter(|t| {
                        candidate_ids.contains(&t.item_id) && !request.exclude.contains(&t.item_id)
                    })
                    .map(|t| ScoredItem {
                        item_id: t.item_id,
                        score: t.score,
                        confidence: (t.interaction_count as f64 / 20.0).min(1.0),
                    })
                    .collect())
            }
            Scorer::Popularity => Ok(popularity_scores(request.candidates, request.exclude)),
            Scorer::Neural(model) => {
                let mut scored =
                    model.score(request.profile, request.candidates, request.context)?;
                scored.retain(|s| !request.exclude.contains(&s.item_id));
                Ok(scored)
            }
        }
    }
}

/// Catalog-derived popularity ranking, the universal fallback
pub fn popularity_scores(candidates: &[Item], exclude: &HashSet<Uuid>) -> Vec<ScoredItem> {
    let mut scored: Vec<ScoredItem> = candidates
        .iter()
        .filter(|item| !exclude.contains(&item.id))
        .map(|item| ScoredItem {
            item_id: item.id,
            score: 0.7 * item.popularity_score.clamp(0.0, 1.0) + 0.3 * item.rating_average / 5.0,
            confidence: 0.5,
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

pub struct RecommendationOrchestrator {
    catalog: Arc<dyn ItemCatalog>,
    interactions: Arc<dyn InteractionStore>,
    profiles: Arc<UserProfileBuilder>,
    similarity: Arc<SimilarityEngine>,
    content: Arc<ContentProfiler>,
    trending: Arc<TrendAnalyzer>,
    combiner: HybridCombiner,
    experiments: Arc<ExperimentManager>,
    neural: Arc<dyn NeuralModel>,
    weather: Arc<dyn WeatherProvider>,
    demand: Arc<dyn DemandProvider>,
    config: EngineConfig,
}

impl RecommendationOrchestrator {
    /// Wire the full engine over the given collaborators. Providers default
    /// to the static stubs and the neural scorer to the linear baseline;
    /// swap them with the `with_*` builders.
    pub fn new(
        catalog: Arc<dyn ItemCatalog>,
        interactions: Arc<dyn InteractionStore>,
        cache: Arc<dyn Cache>,
        config: EngineConfig,
    ) -> Self {
        let profiles = Arc::new(UserProfileBuilder::new(
            interactions.clone(),
            catalog.clone(),
            cache.clone(),
            config.profile.clone(),
        ));
        let similarity = Arc::new(SimilarityEngine::new(
            interactions.clone(),
            cache.clone(),
            profiles.clone(),
            config.similarity.clone(),
        ));
        let content = Arc::new(ContentProfiler::new(config.content.clone()));
        let trending = Arc::new(TrendAnalyzer::new(
            interactions.clone(),
            catalog.clone(),
            cache.clone(),
            config.trending.clone(),
        ));
        let combiner = HybridCombiner::new(config.hybrid.clone());
        let experiments = Arc::new(ExperimentManager::new(
            interactions.clone(),
            cache,
            config.experiments.clone(),
        ));

        Self {
            catalog,
            interactions,
            profiles,
            similarity,
            content,
            trending,
            combiner,
            experiments,
            neural: Arc::new(LinearNeuralModel::default()),
            weather: Arc::new(StaticWeatherProvider::default()),
            demand: Arc::new(StaticDemandProvider::default()),
            config,
        }
    }

    pub fn with_neural_model(mut self, model: Arc<dyn NeuralModel>) -> Self {
        self.neural = model;
        self
    }

    pub fn with_weather_provider(mut self, provider: Arc<dyn WeatherProvider>) -> Self {
        self.weather = provider;
        self
    }

    pub fn with_demand_provider(mut self, provider: Arc<dyn DemandProvider>) -> Self {
        self.demand = provider;
        self
    }

    pub fn experiments(&self) -> &ExperimentManager {
        &self.experiments
    }

    pub fn trending(&self) -> &TrendAnalyzer {
        &self.trending
    }

    pub fn similarity(&self) -> &SimilarityEngine {
        &self.similarity
    }

    pub fn profiles(&self) -> &UserProfileBuilder {
        &self.profiles
    }

    /// Score and rank recommendations for a user.
    ///
    /// Algorithm precedence: explicit override, then active experiment
    /// assignment, then the configured default.
    pub async fn get_recommendations(
        &self,
        user_id: Uuid,
        options: RecommendationOptions,
    ) -> Result<RecommendationResponse> {
        let profile = self.profiles.build_profile(user_id).await?;

        let mut experiment_info = None;
        let algorithm = if let Some(explicit) = options.algorithm {
            explicit
        } else if let Some((experiment, variant, assigned)) =
            self.experiments.resolve_for_user(user_id).await?
        {
            experiment_info = Some(ExperimentInfo {
                experiment_id: experiment.id,
                name: experiment.name.clone(),
                variant,
            });
            assigned
        } else {
            self.config.orchestrator.default_algorithm
        };

        let candidates = self
            .catalog
            .available_items(self.config.orchestrator.candidate_pool_size)
            .await?;
        let items: HashMap<Uuid, Item> =
            candidates.iter().map(|item| (item.id, item.clone())).collect();

        let exclude: HashSet<Uuid> = if options.exclude_interacted {
            self.profiles
                .user_item_ratings(user_id)
                .await?
                .into_keys()
                .collect()
        } else {
            HashSet::new()
        };

        let context = self.resolve_context(&options).await;
        let request = ScoringRequest {
            user_id,
            profile: &profile,
            candidates: &candidates,
            exclude: &exclude,
            context: &context,
        };

        let (combined, algorithm_used) = match self
            .dispatch(algorithm, &request, &options, &items)
            .await
        {
            Ok(combined) => (combined, algorithm),
            Err(error) => {
                warn!(%user_id, %error, "scorer failed, serving popularity fallback");
                let merged = popularity_scores(&candidates, &exclude)
                    .iter()
                    .map(|s| CombinedScore::from_single(s, SourceKind::Popularity))
                    .collect();
                let processed = self.combiner.post_process(
                    merged,
                    &items,
                    &context,
                    options.diversity_factor,
                    options.limit,
                );
                (processed, AlgorithmKind::Popularity)
            }
        };

        if let Some(info) = &experiment_info {
            self.experiments
                .record_exposure(info.experiment_id, info.variant, user_id)
                .await?;
        }

        debug!(%user_id, ?algorithm_used, results = combined.len(), "recommendations served");
        Ok(RecommendationResponse {
            recommendations: to_recommendations(combined, algorithm_used, self.neural.as_ref()),
            algorithm_used,
            experiment_info,
        })
    }

    /// Record a user-item event, tagging it with the user's experiment
    /// assignment when one is active.
    pub async fn track_interaction(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        interaction_type: InteractionType,
        value: Option<f64>,
        context: Option<InteractionContext>,
    ) -> Result<()> {
        let mut context = context.unwrap_or_default();

        if context.experiment.is_none() {
            if let Some((experiment, variant, algorithm)) =
                self.experiments.resolve_for_user(user_id).await?
            {
                context.experiment = Some(ExperimentTag {
                    experiment_id: experiment.id,
                    variant,
                    algorithm,
                });
            }
        }

        if let Some(tag) = context.experiment.clone() {
            return self
                .experiments
                .track_interaction(user_id, item_id, interaction_type, value, tag)
                .await;
        }

        self.interactions
            .append(Interaction {
                user_id,
                item_id,
                interaction_type,
                value,
                context,
                timestamp: Utc::now(),
            })
            .await
    }

    async fn dispatch(
        &self,
        algorithm: AlgorithmKind,
        request: &ScoringRequest<'_>,
        options: &RecommendationOptions,
        items: &HashMap<Uuid, Item>,
    ) -> Result<Vec<CombinedScore>> {
        match algorithm {
            AlgorithmKind::Hybrid(strategy) => {
                let scorers = [
                    Scorer::Collaborative(self.similarity.clone()),
                    Scorer::ContentBased(self.content.clone()),
                    Scorer::Popularity,
                ];
                let mut outputs =
                    try_join_all(scorers.iter().map(|scorer| scorer.score(request))).await?;
                let popularity = outputs.pop().unwrap_or_default();
                let content = outputs.pop().unwrap_or_default();
                let collaborative = outputs.pop().unwrap_or_default();

                let input = CombinerInput {
                    collaborative,
                    content,
                    popularity,
                };
                Ok(self.combiner.combine(
                    strategy,
                    &input,
                    request.profile,
                    items,
                    request.context,
                    options.diversity_factor,
                    options.limit,
                ))
            }
            single => {
                let scorer = match single {
                    AlgorithmKind::Collaborative => Scorer::Collaborative(self.similarity.clone()),
                    AlgorithmKind::ContentBased => Scorer::ContentBased(self.content.clone()),
                    AlgorithmKind::Trending => Scorer::Trending(self.trending.clone()),
                    AlgorithmKind::Popularity => Scorer::Popularity,
                    AlgorithmKind::Neural => Scorer::Neural(self.neural.clone()),
                    AlgorithmKind::Hybrid(_) => unreachable!("handled above"),
                };
                let kind = scorer.kind();
                let merged = scorer
                    .score(request)
                    .await?
                    .iter()
                    .map(|s| CombinedScore::from_single(s, kind))
                    .collect();
                Ok(self.combiner.post_process(
                    merged,
                    items,
                    request.context,
                    options.diversity_factor,
                    options.limit,
                ))
            }
        }
    }

    /// Resolve external signals once per request. A provider failure only
    /// disables its adjustment; it never fails the request.
    async fn resolve_context(&self, options: &RecommendationOptions) -> RequestContext {
        let mut context = RequestContext::at(Utc::now());
        context.budget_range = options.budget_range;

        match self.weather.current_weather().await {
            Ok(weather) => context.weather = Some(weather),
            Err(error) => warn!(%error, "weather provider failed, skipping weather adjustment"),
        }
        match self.demand.current_demand().await {
            Ok(demand) => context.demand = Some(demand),
            Err(error) => warn!(%error, "demand provider failed, skipping demand signal"),
        }

        context
    }
}

fn to_recommendations(
    combined: Vec<CombinedScore>,
    algorithm: AlgorithmKind,
    neural: &dyn NeuralModel,
) -> Vec<Recommendation> {
    let mut recommendations: Vec<Recommendation> = combined
        .into_iter()
        .map(|candidate| {
            let explanation = explain(&candidate.sources, neural);
            Recommendation {
                item_id: candidate.item_id,
                score: candidate.score,
                confidence: candidate.confidence.clamp(0.0, 1.0),
                algorithm,
                sources: candidate.sources,
                explanation,
            }
        })
        .collect();

    // Scores must strictly decrease by rank within one response
    let mut previous = f64::INFINITY;
    for recommendation in &mut recommendations {
        if recommendation.score >= previous {
            recommendation.score = previous - 1e-9;
        }
        previous = recommendation.score;
    }
    recommendations
}

fn explain(sources: &[ScoreSource], neural: &dyn NeuralModel) -> String {
    if sources.is_empty() {
        return "recommended for you".into();
    }
    let mut parts: Vec<String> = Vec::new();
    for source in sources {
        let phrase = match source.kind {
            SourceKind::Collaborative => "users with similar taste ordered this".to_string(),
            SourceKind::ContentBased => "matches your taste profile".to_string(),
            SourceKind::Trending => "trending right now".to_string(),
            SourceKind::Popularity => "a crowd favorite".to_string(),
            SourceKind::Neural => neural.explain(),
        };
        if !parts.contains(&phrase) {
            parts.push(phrase);
        }
    }
    parts.join("; ")
}
