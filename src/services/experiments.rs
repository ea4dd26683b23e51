//! A/B experimentation.
//!
//! Experiment lifecycle, deterministic traffic splitting, per-variant
//! outcome tracking, and two-proportion z-test analysis governing the
//! ship/hold decision. Variant assignment is a pure function of
//! (user, experiment, split) and is additionally cached for the
//! experiment's lifetime, so a user sees one variant throughout.

use crate::config::ExperimentConfig;
use crate::error::{AppError, Result};
use crate::models::{
    AlgorithmKind, Assignment, Experiment, ExperimentStatus, ExperimentTag, Interaction,
    InteractionContext, InteractionType, TargetMetric, Variant,
};
use crate::stores::{self, Cache, InteractionStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Experiment creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExperiment {
    pub name: String,
    pub description: String,
    pub control_algorithm: AlgorithmKind,
    pub treatment_algorithm: AlgorithmKind,
    /// Fraction of traffic per arm, in (0, 0.5]
    pub traffic_split: f64,
    pub target_metrics: Vec<TargetMetric>,
    #[serde(default)]
    pub segment_filters: Vec<String>,
}

/// Per-variant outcome counters
#[derive(Debug, Clone, Default)]
struct VariantCounters {
    impressions: u64,
    clicks: u64,
    purchases: u64,
    exposed_users: HashSet<Uuid>,
    active_users: HashSet<Uuid>,
}

/// Per-variant aggregate metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub sample_size: usize,
    pub impressions: u64,
    pub clicks: u64,
    pub purchases: u64,
    pub active_users: u64,
    pub ctr: f64,
    pub conversion_rate: f64,
    pub engagement_rate: f64,
}

/// Statistical verdict for one target metric
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Significance {
    /// Either variant was below the minimum sample size; no p-value is
    /// reported rather than a misleading one.
    InsufficientSample,
    Computed {
        z_score: f64,
        p_value: f64,
        /// 95% confidence interval on (treatment − control)
        ci_low: f64,
        ci_high: f64,
        significant: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: TargetMetric,
    pub control_rate: f64,
    pub treatment_rate: f64,
    pub significance: Significance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Inconclusive,
    TreatmentWins,
    ControlWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentAnalysis {
    pub experiment_id: Uuid,
    pub control: VariantMetrics,
    pub treatment: VariantMetrics,
    pub metrics: Vec<MetricResult>,
    pub decision: Decision,
}

pub struct ExperimentManager {
    interactions: Arc<dyn InteractionStore>,
    cache: Arc<dyn Cache>,
    config: ExperimentConfig,
    experiments: RwLock<HashMap<Uuid, Experiment>>,
    counters: RwLock<HashMap<(Uuid, Variant), VariantCounters>>,
}

impl ExperimentManager {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        cache: Arc<dyn Cache>,
        config: ExperimentConfig,
    ) -> Self {
        Self {
            interactions,
            cache,
            config,
            experiments: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and register an experiment. Rejects a missing name, a
    /// split outside (0, 0.5], identical arms, and a name already used by
    /// an active experiment.
    pub async fn create_experiment(&self, new: NewExperiment) -> Result<Uuid> {
        if new.name.trim().is_empty() {
            return Err(AppError::ValidationError("Experiment name is required".into()));
        }
        if new.traffic_split <= 0.0 || new.traffic_split > 0.5 {
            return Err(AppError::ValidationError(format!(
                "Traffic split must be in (0, 0.5] (got {})",
                new.traffic_split
            )));
        }
        if new.control_algorithm == new.treatment_algorithm {
            return Err(AppError::ValidationError(
                "Control and treatment algorithms must differ".into(),
            ));
        }
        if new.target_metrics.is_empty() {
            return Err(AppError::ValidationError(
                "At least one target metric is required".into(),
            ));
        }

        let mut experiments = self.experiments.write().await;
        let duplicate = experiments
            .values()
            .any(|e| e.status == ExperimentStatus::Active && e.name == new.name);
        if duplicate {
            return Err(AppError::ValidationError(format!(
                "An active experiment named '{}' already exists",
                new.name
            )));
        }

        let experiment = Experiment {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            control_algorithm: new.control_algorithm,
            treatment_algorithm: new.treatment_algorithm,
            traffic_split: new.traffic_split,
            target_metrics: new.target_metrics,
            segment_filters: new.segment_filters,
            status: ExperimentStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
        };
        let id = experiment.id;
        info!(experiment_id = %id, name = %experiment.name, "experiment created");
        experiments.insert(id, experiment);
        Ok(id)
    }

    pub async fn stop_experiment(&self, experiment_id: Uuid) -> Result<()> {
        let mut experiments = self.experiments.write().await;
        let experiment = experiments
            .get_mut(&experiment_id)
            .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))?;
        experiment.status = ExperimentStatus::Stopped;
        experiment.ended_at = Some(Utc::now());
        info!(%experiment_id, "experiment stopped");
        Ok(())
    }

    pub async fn get_experiment(&self, experiment_id: Uuid) -> Result<Experiment> {
        self.experiments
            .read()
            .await
            .get(&experiment_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))
    }

    pub async fn list_active(&self) -> Vec<Experiment> {
        let mut active: Vec<Experiment> = self
            .experiments
            .read()
            .await
            .values()
            .filter(|e| e.status == ExperimentStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|e| e.started_at);
        active
    }

    /// Deterministic variant for a user, or `None` when the user falls
    /// outside both arms. [0, split) → treatment, [split, 2·split) →
    /// control. Idempotent: the bucket is a pure function of the inputs,
    /// and the first result is cached for the experiment's lifetime.
    pub async fn assign_variant(
        &self,
        user_id: Uuid,
        experiment_id: Uuid,
    ) -> Result<Option<Variant>> {
        let experiment = self.get_experiment(experiment_id).await?;
        if experiment.status != ExperimentStatus::Active {
            return Ok(None);
        }

        let cache_key = stores::keys::assignment(user_id, experiment_id);
        if let Some(assignment) =
            stores::get_json::<Assignment>(self.cache.as_ref(), &cache_key).await?
        {
            return Ok(Some(assignment.variant));
        }

        let variant = match bucket(user_id, experiment_id) {
            b if b < experiment.traffic_split => Variant::Treatment,
            b if b < 2.0 * experiment.traffic_split => Variant::Control,
            _ => return Ok(None),
        };

        let assignment = Assignment {
            user_id,
            experiment_id,
            variant,
            assigned_at: Utc::now(),
        };
        stores::set_json(
            self.cache.as_ref(),
            &cache_key,
            &assignment,
            Duration::from_secs(self.config.assignment_ttl_secs),
        )
        .await?;

        debug!(%user_id, %experiment_id, ?variant, "variant assigned");
        Ok(Some(variant))
    }

    /// First active experiment the user is enrolled in, with their variant
    /// and the algorithm that variant maps to
    pub async fn resolve_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<(Experiment, Variant, AlgorithmKind)>> {
        for experiment in self.list_active().await {
            if let Some(variant) = self.assign_variant(user_id, experiment.id).await? {
                let algorithm = match variant {
                    Variant::Control => experiment.control_algorithm,
                    Variant::Treatment => experiment.treatment_algorithm,
                };
                return Ok(Some((experiment, variant, algorithm)));
            }
        }
        Ok(None)
    }

    /// Count one serving of recommendations toward the variant's exposure
    pub async fn record_exposure(
        &self,
        experiment_id: Uuid,
        variant: Variant,
        user_id: Uuid,
    ) -> Result<()> {
        let mut counters = self.counters.write().await;
        let entry = counters.entry((experiment_id, variant)).or_default();
        entry.impressions += 1;
        entry.exposed_users.insert(user_id);
        Ok(())
    }

    /// Append an experiment-tagged interaction and bump variant counters
    pub async fn track_interaction(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        interaction_type: InteractionType,
        value: Option<f64>,
        tag: ExperimentTag,
    ) -> Result<()> {
        {
            let mut counters = self.counters.write().await;
            let entry = counters
                .entry((tag.experiment_id, tag.variant))
                .or_default();
            match interaction_type {
                InteractionType::Click => entry.clicks += 1,
                InteractionType::Order => entry.purchases += 1,
                _ => {}
            }
            entry.active_users.insert(user_id);
        }

        self.interactions
            .append(Interaction {
                user_id,
                item_id,
                interaction_type,
                value,
                context: InteractionContext {
                    dwell_seconds: None,
                    experiment: Some(tag),
                },
                timestamp: Utc::now(),
            })
            .await
    }

    /// Per-variant metrics, per-metric significance, and the decision
    pub async fn analyze(&self, experiment_id: Uuid) -> Result<ExperimentAnalysis> {
        let experiment = self.get_experiment(experiment_id).await?;
        let counters = self.counters.read().await;
        let control = variant_metrics(counters.get(&(experiment_id, Variant::Control)));
        let treatment = variant_metrics(counters.get(&(experiment_id, Variant::Treatment)));
        drop(counters);

        let metrics: Vec<MetricResult> = experiment
            .target_metrics
            .iter()
            .map(|metric| self.metric_result(*metric, &control, &treatment))
            .collect();

        let significant: Vec<&MetricResult> = metrics
            .iter()
            .filter(|m| {
                matches!(
                    m.significance,
                    Significance::Computed { significant: true, .. }
                )
            })
            .collect();

        let decision = if significant.is_empty() {
            Decision::Inconclusive
        } else {
            let positive = significant
                .iter()
                .filter(|m| m.treatment_rate > m.control_rate)
                .count();
            if positive * 2 > significant.len() {
                Decision::TreatmentWins
            } else {
                Decision::ControlWins
            }
        };

        Ok(ExperimentAnalysis {
            experiment_id,
            control,
            treatment,
            metrics,
            decision,
        })
    }

    fn metric_result(
        &self,
        metric: TargetMetric,
        control: &VariantMetrics,
        treatment: &VariantMetrics,
    ) -> MetricResult {
        let (x1, n1, x2, n2) = match metric {
            TargetMetric::Ctr => (
                control.clicks,
                control.impressions,
                treatment.clicks,
                treatment.impressions,
            ),
            TargetMetric::ConversionRate => (
                control.purchases,
                control.clicks,
                treatment.purchases,
                treatment.clicks,
            ),
            TargetMetric::EngagementRate => (
                control.active_users,
                control.sample_size as u64,
                treatment.active_users,
                treatment.sample_size as u64,
            ),
        };

        let control_rate = rate(x1, n1);
        let treatment_rate = rate(x2, n2);

        let significance = if (n1 as usize) < self.config.min_sample_size
            || (n2 as usize) < self.config.min_sample_size
        {
            Significance::InsufficientSample
        } else {
            two_proportion_z_test(x1, n1, x2, n2, self.config.significance_level)
        };

        MetricResult {
            metric,
            control_rate,
            treatment_rate,
            significance,
        }
    }
}

fn variant_metrics(counters: Option<&VariantCounters>) -> VariantMetrics {
    let empty = VariantCounters::default();
    let c = counters.unwrap_or(&empty);
    let sample_size = c.exposed_users.len();
    VariantMetrics {
        sample_size,
        impressions: c.impressions,
        clicks: c.clicks,
        purchases: c.purchases,
        active_users: c.active_users.len() as u64,
        ctr: rate(c.clicks, c.impressions),
        conversion_rate: rate(c.purchases, c.clicks),
        engagement_rate: rate(c.active_users.len() as u64, sample_size as u64),
    }
}

fn rate(successes: u64, trials: u64) -> f64 {
    if trials == 0 {
        0.0
    } else {
        successes as f64 / trials as f64
    }
}

/// Stable bucket in [0, 1) from (user, experiment)
fn bucket(user_id: Uuid, experiment_id: Uuid) -> f64 {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    experiment_id.hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

/// Two-tailed two-proportion z-test with a 95% CI on the difference.
///
/// Pooled proportion for the test statistic, unpooled standard error for
/// the interval.
pub fn two_proportion_z_test(
    x1: u64,
    n1: u64,
    x2: u64,
    n2: u64,
    significance_level: f64,
) -> Significance {
    let (p1, p2) = (rate(x1, n1), rate(x2, n2));
    let (n1f, n2f) = (n1 as f64, n2 as f64);

    let pooled = (x1 + x2) as f64 / (n1f + n2f);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1f + 1.0 / n2f)).sqrt();

    let (z_score, p_value) = if se == 0.0 {
        // Identical degenerate proportions (all 0s or all 1s)
        (0.0, 1.0)
    } else {
        let z = (p2 - p1).abs() / se;
        (z, 2.0 * (1.0 - normal_cdf(z)))
    };

    let se_diff = (p1 * (1.0 - p1) / n1f + p2 * (1.0 - p2) / n2f).sqrt();
    let diff = p2 - p1;

    Significance::Computed {
        z_score,
        p_value,
        ci_low: diff - 1.96 * se_diff,
        ci_high: diff + 1.96 * se_diff,
        significant: p_value < significance_level,
    }
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation
/// (formula 7.1.26, |error| < 1.5e-7)
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{InMemoryCache, InMemoryInteractionStore};

    fn manager() -> ExperimentManager {
        ExperimentManager::new(
            Arc::new(InMemoryInteractionStore::new()),
            Arc::new(InMemoryCache::new()),
            ExperimentConfig::default(),
        )
    }

    fn new_experiment(name: &str) -> NewExperiment {
        NewExperiment {
            name: name.into(),
            description: "test".into(),
            control_algorithm: AlgorithmKind::Popularity,
            treatment_algorithm: AlgorithmKind::Collaborative,
            traffic_split: 0.25,
            target_metrics: vec![TargetMetric::Ctr],
            segment_filters: vec![],
        }
    }

    #[tokio::test]
    async fn assignment_is_deterministic() {
        let manager = manager();
        let experiment_id = manager
            .create_experiment(new_experiment("determinism"))
            .await
            .unwrap();

        for _ in 0..20 {
            let user = Uuid::new_v4();
            let first = manager.assign_variant(user, experiment_id).await.unwrap();
            for _ in 0..5 {
                let again = manager.assign_variant(user, experiment_id).await.unwrap();
                assert_eq!(first, again);
            }
        }
    }

    #[tokio::test]
    async fn assignment_distribution_tracks_split() {
        let manager = manager();
        let experiment_id = manager
            .create_experiment(new_experiment("distribution"))
            .await
            .unwrap();

        let mut treatment = 0;
        let mut control = 0;
        let mut excluded = 0;
        for _ in 0..2000 {
            match manager
                .assign_variant(Uuid::new_v4(), experiment_id)
                .await
                .unwrap()
            {
                Some(Variant::Treatment) => treatment += 1,
                Some(Variant::Control) => control += 1,
                None => excluded += 1,
            }
        }

        // split 0.25: ~500 / ~500 / ~1000, ±10% tolerance
        assert!((400..=600).contains(&treatment), "treatment {}", treatment);
        assert!((400..=600).contains(&control), "control {}", control);
        assert!((800..=1200).contains(&excluded), "excluded {}", excluded);
    }

    #[tokio::test]
    async fn duplicate_active_name_rejected() {
        let manager = manager();
        manager
            .create_experiment(new_experiment("ship-it"))
            .await
            .unwrap();
        assert!(manager
            .create_experiment(new_experiment("ship-it"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn stopped_name_can_be_reused() {
        let manager = manager();
        let first = manager
            .create_experiment(new_experiment("retry"))
            .await
            .unwrap();
        manager.stop_experiment(first).await.unwrap();
        assert!(manager.create_experiment(new_experiment("retry")).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_configs_rejected() {
        let manager = manager();

        let mut unnamed = new_experiment("");
        unnamed.name = "  ".into();
        assert!(manager.create_experiment(unnamed).await.is_err());

        let mut bad_split = new_experiment("bad-split");
        bad_split.traffic_split = 0.8;
        assert!(manager.create_experiment(bad_split).await.is_err());

        let mut same_arms = new_experiment("same-arms");
        same_arms.treatment_algorithm = same_arms.control_algorithm;
        assert!(manager.create_experiment(same_arms).await.is_err());
    }

    #[test]
    fn identical_rates_are_not_significant() {
        let result = two_proportion_z_test(100, 1000, 100, 1000, 0.05);
        match result {
            Significance::Computed {
                p_value,
                significant,
                ..
            } => {
                assert!(p_value > 0.99, "p {}", p_value);
                assert!(!significant);
            }
            _ => panic!("expected computed significance"),
        }
    }

    #[test]
    fn extreme_difference_is_significant_and_ci_excludes_zero() {
        let result = two_proportion_z_test(100, 1000, 900, 1000, 0.05);
        match result {
            Significance::Computed {
                p_value,
                ci_low,
                ci_high,
                significant,
                ..
            } => {
                assert!(p_value < 0.0001, "p {}", p_value);
                assert!(significant);
                assert!(ci_low > 0.0 && ci_high > ci_low);
            }
            _ => panic!("expected computed significance"),
        }
    }

    #[test]
    fn normal_cdf_matches_known_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[tokio::test]
    async fn small_sample_marked_insufficient() {
        let manager = manager();
        let experiment_id = manager
            .create_experiment(new_experiment("tiny"))
            .await
            .unwrap();

        // 10 impressions per arm, well under the minimum of 30
        for i in 0..10 {
            let user = Uuid::from_u128(i);
            manager
                .record_exposure(experiment_id, Variant::Control, user)
                .await
                .unwrap();
            manager
                .record_exposure(experiment_id, Variant::Treatment, user)
                .await
                .unwrap();
        }

        let analysis = manager.analyze(experiment_id).await.unwrap();
        assert!(matches!(
            analysis.metrics[0].significance,
            Significance::InsufficientSample
        ));
        assert_eq!(analysis.decision, Decision::Inconclusive);
    }

    #[tokio::test]
    async fn clear_winner_detected() {
        let manager = manager();
        let experiment_id = manager
            .create_experiment(new_experiment("winner"))
            .await
            .unwrap();
        let item = Uuid::new_v4();

        for i in 0..1000u128 {
            let control_user = Uuid::from_u128(i);
            let treatment_user = Uuid::from_u128(100_000 + i);
            manager
                .record_exposure(experiment_id, Variant::Control, control_user)
                .await
                .unwrap();
            manager
                .record_exposure(experiment_id, Variant::Treatment, treatment_user)
                .await
                .unwrap();

            // Control clicks 10% of the time, treatment 90%
            if i % 10 == 0 {
                manager
                    .track_interaction(
                        control_user,
                        item,
                        InteractionType::Click,
                        None,
                        ExperimentTag {
                            experiment_id,
                            variant: Variant::Control,
                            algorithm: AlgorithmKind::Popularity,
                        },
                    )
                    .await
                    .unwrap();
            }
            if i % 10 != 0 {
                manager
                    .track_interaction(
                        treatment_user,
                        item,
                        InteractionType::Click,
                        None,
                        ExperimentTag {
                            experiment_id,
                            variant: Variant::Treatment,
                            algorithm: AlgorithmKind::Collaborative,
                        },
                    )
                    .await
                    .unwrap();
            }
        }

        let analysis = manager.analyze(experiment_id).await.unwrap();
        assert_eq!(analysis.decision, Decision::TreatmentWins);
        assert!(analysis.treatment.ctr > analysis.control.ctr);
        match analysis.metrics[0].significance {
            Significance::Computed { p_value, ci_low, .. } => {
                assert!(p_value < 0.0001);
                assert!(ci_low > 0.0);
            }
            _ => panic!("expected computed significance"),
        }
    }
}
