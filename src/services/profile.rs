//! User profile building.
//!
//! Turns a user's raw interaction history into an aggregated taste profile
//! and into the implicit item ratings the collaborative path consumes.
//! Profiles are derived caches: rebuilt on demand, cached with a TTL, never
//! hand-edited.

use crate::config::ProfileConfig;
use crate::error::Result;
use crate::models::{Interaction, InteractionType, Item, UserProfile};
use crate::stores::{self, Cache, InteractionStore, ItemCatalog};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Implicit rating per item, the collaborative filtering input
pub type RatingVector = HashMap<Uuid, f64>;

pub struct UserProfileBuilder {
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn ItemCatalog>,
    cache: Arc<dyn Cache>,
    config: ProfileConfig,
}

impl UserProfileBuilder {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn ItemCatalog>,
        cache: Arc<dyn Cache>,
        config: ProfileConfig,
    ) -> Self {
        Self {
            interactions,
            catalog,
            cache,
            config,
        }
    }

    /// Derived preference strength in [0, 5].
    ///
    /// Explicit star ratings pass through; everything else is the event
    /// type's base weight plus a capped dwell-time bonus.
    pub fn implicit_rating(&self, interaction: &Interaction) -> f64 {
        if interaction.interaction_type == InteractionType::Rate {
            if let Some(stars) = interaction.value {
                return stars.clamp(0.0, 5.0);
            }
        }

        let base = interaction.interaction_type.base_weight();
        let bonus = interaction
            .context
            .dwell_seconds
            .map(|secs| {
                (secs as f64 / 60.0 * self.config.dwell_bonus_per_minute)
                    .min(self.config.dwell_bonus_cap)
            })
            .unwrap_or(0.0);

        (base + bonus).clamp(0.0, 5.0)
    }

    /// Strongest implicit rating per interacted item
    pub async fn user_item_ratings(&self, user_id: Uuid) -> Result<RatingVector> {
        let history = self.interactions.for_user(user_id).await?;
        Ok(self.ratings_from(&history))
    }

    pub fn ratings_from(&self, history: &[Interaction]) -> RatingVector {
        let mut ratings: RatingVector = HashMap::new();
        for interaction in history {
            let rating = self.implicit_rating(interaction);
            let entry = ratings.entry(interaction.item_id).or_insert(0.0);
            if rating > *entry {
                *entry = rating;
            }
        }
        ratings
    }

    /// Build (or fetch from cache) the aggregated profile for a user
    pub async fn build_profile(&self, user_id: Uuid) -> Result<UserProfile> {
        let cache_key = stores::keys::user_profile(user_id);
        if let Some(cached) = stores::get_json::<UserProfile>(self.cache.as_ref(), &cache_key).await?
        {
            debug!(%user_id, "profile cache hit");
            return Ok(cached);
        }

        let history = self.interactions.for_user(user_id).await?;
        let profile = self.aggregate(user_id, &history).await?;

        stores::set_json(
            self.cache.as_ref(),
            &cache_key,
            &profile,
            Duration::from_secs(self.config.cache_ttl_secs),
        )
        .await?;

        Ok(profile)
    }

    /// Drop the cached profile so the next read rebuilds it
    pub async fn invalidate(&self, user_id: Uuid) -> Result<()> {
        self.cache
            .del(&stores::keys::user_profile(user_id))
            .await
    }

    async fn aggregate(&self, user_id: Uuid, history: &[Interaction]) -> Result<UserProfile> {
        let ratings = self.ratings_from(history);
        let item_ids: Vec<Uuid> = ratings.keys().copied().collect();
        let items: Vec<Item> = self.catalog.get_items(&item_ids).await?;

        let mut profile = UserProfile {
            user_id,
            built_at: Utc::now(),
            ..Default::default()
        };

        profile.interaction_count = history.len();
        profile.unique_items = ratings.len();

        let recent_cutoff = Utc::now() - ChronoDuration::days(self.config.recent_window_days);
        profile.recent_interactions = history
            .iter()
            .filter(|event| event.timestamp >= recent_cutoff)
            .count();

        if items.is_empty() {
            return Ok(profile);
        }

        let mut category_weights: HashMap<String, f64> = HashMap::new();
        let mut cuisine_weights: HashMap<String, f64> = HashMap::new();
        let mut dietary_weights: HashMap<String, f64> = HashMap::new();
        let mut categories: HashSet<&str> = HashSet::new();
        let mut price_sum = 0.0;
        let mut spice_sum = 0.0;
        let mut total_weight = 0.0;
        let mut corpus = String::new();

        let dim = items
            .iter()
            .map(|item| item.feature_vector.len())
            .max()
            .unwrap_or(0);
        let mut feature_vector = vec![0.0f64; dim];

        for item in &items {
            let weight = *ratings.get(&item.id).unwrap_or(&0.0);
            if weight <= 0.0 {
                continue;
            }

            *category_weights.entry(item.category.clone()).or_insert(0.0) += weight;
            *cuisine_weights
                .entry(item.cuisine_type.clone())
                .or_insert(0.0) += weight;
            for tag in &item.dietary_tags {
                *dietary_weights.entry(tag.clone()).or_insert(0.0) += weight;
            }
            categories.insert(item.category.as_str());

            price_sum += item.price * weight;
            spice_sum += item.spice_level * weight;
            total_weight += weight;

            for (idx, value) in item.feature_vector.iter().enumerate() {
                feature_vector[idx] += value * weight;
            }

            if !corpus.is_empty() {
                corpus.push(' ');
            }
            corpus.push_str(&item.text_corpus());
        }

        if total_weight > 0.0 {
            profile.avg_price = price_sum / total_weight;
            profile.avg_spice_level = spice_sum / total_weight;
            feature_vector.iter_mut().for_each(|v| *v /= total_weight);
        }

        normalize(&mut category_weights);
        normalize(&mut cuisine_weights);
        normalize(&mut dietary_weights);

        profile.category_weights = category_weights;
        profile.cuisine_weights = cuisine_weights;
        profile.dietary_tag_weights = dietary_weights;
        profile.feature_vector = feature_vector;
        profile.text_corpus = corpus;
        profile.unique_categories = categories.len();

        debug!(
            %user_id,
            interactions = profile.interaction_count,
            items = profile.unique_items,
            "profile built"
        );

        Ok(profile)
    }
}

/// Scale weights so they sum to 1 (no-op on an empty map)
fn normalize(weights: &mut HashMap<String, f64>) {
    let total: f64 = weights.values().sum();
    if total > 0.0 {
        weights.values_mut().for_each(|w| *w /= total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionContext;
    use crate::stores::{InMemoryCache, InMemoryCatalog, InMemoryInteractionStore};

    fn test_item(category: &str, cuisine: &str, price: f64) -> Item {
        Item {
            id: Uuid::new_v4(),
            name: format!("{} special", category),
            description: "house favorite".into(),
            ingredients: vec!["salt".into()],
            category: category.into(),
            cuisine_type: cuisine.into(),
            price,
            spice_level: 2.0,
            dietary_tags: vec!["vegetarian".into()],
            feature_vector: vec![1.0, 0.0],
            availability_score: 1.0,
            popularity_score: 0.5,
            rating_average: 4.0,
            is_promoted: false,
        }
    }

    fn interaction(user: Uuid, item: Uuid, kind: InteractionType) -> Interaction {
        Interaction {
            user_id: user,
            item_id: item,
            interaction_type: kind,
            value: None,
            context: InteractionContext::default(),
            timestamp: Utc::now(),
        }
    }

    fn builder() -> (
        UserProfileBuilder,
        Arc<InMemoryInteractionStore>,
        Arc<InMemoryCatalog>,
    ) {
        let store = Arc::new(InMemoryInteractionStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let builder = UserProfileBuilder::new(
            store.clone(),
            catalog.clone(),
            Arc::new(InMemoryCache::new()),
            ProfileConfig::default(),
        );
        (builder, store, catalog)
    }

    #[test]
    fn implicit_rating_is_bounded() {
        let (builder, _, _) = builder();
        let mut event = interaction(Uuid::new_v4(), Uuid::new_v4(), InteractionType::Order);
        event.context.dwell_seconds = Some(3600);

        let rating = builder.implicit_rating(&event);
        assert!(rating <= 5.0);
        // Bonus is capped, so only one cap's worth above the base weight
        assert!((rating - (4.0 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn explicit_stars_pass_through() {
        let (builder, _, _) = builder();
        let mut event = interaction(Uuid::new_v4(), Uuid::new_v4(), InteractionType::Rate);
        event.value = Some(4.5);
        assert_eq!(builder.implicit_rating(&event), 4.5);

        event.value = Some(9.0);
        assert_eq!(builder.implicit_rating(&event), 5.0);
    }

    #[tokio::test]
    async fn profile_weights_sum_to_one() {
        let (builder, store, catalog) = builder();
        let user = Uuid::new_v4();
        let pizza = test_item("pizza", "italian", 12.0);
        let sushi = test_item("sushi", "japanese", 20.0);

        catalog.insert(pizza.clone()).await;
        catalog.insert(sushi.clone()).await;
        store
            .append(interaction(user, pizza.id, InteractionType::Order))
            .await
            .unwrap();
        store
            .append(interaction(user, sushi.id, InteractionType::View))
            .await
            .unwrap();

        let profile = builder.build_profile(user).await.unwrap();
        let category_sum: f64 = profile.category_weights.values().sum();
        assert!((category_sum - 1.0).abs() < 1e-9);
        // Order outweighs view
        assert!(profile.category_weights["pizza"] > profile.category_weights["sushi"]);
        assert_eq!(profile.unique_items, 2);
        assert_eq!(profile.unique_categories, 2);
        assert!(!profile.text_corpus.is_empty());
    }

    #[tokio::test]
    async fn empty_history_yields_empty_profile() {
        let (builder, _, _) = builder();
        let profile = builder.build_profile(Uuid::new_v4()).await.unwrap();
        assert_eq!(profile.interaction_count, 0);
        assert!(profile.category_weights.is_empty());
        assert_eq!(profile.avg_price, 0.0);
    }

    #[tokio::test]
    async fn strongest_rating_wins_per_item() {
        let (builder, _, _) = builder();
        let user = Uuid::new_v4();
        let item = Uuid::new_v4();
        let history = vec![
            interaction(user, item, InteractionType::View),
            interaction(user, item, InteractionType::Order),
            interaction(user, item, InteractionType::Click),
        ];
        let ratings = builder.ratings_from(&history);
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[&item], InteractionType::Order.base_weight());
    }
}
