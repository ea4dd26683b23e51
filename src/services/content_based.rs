//! Content-based scoring.
//!
//! Scores candidate items against a user's aggregated profile as a weighted
//! ratio of independent sub-scores (category, cuisine, feature vector,
//! price, spice, dietary tags, explicit preferences, popularity), optionally
//! blended with TF-IDF text similarity over item names, descriptions, and
//! ingredients.

use crate::config::ContentConfig;
use crate::models::{Item, UserProfile};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Content score for one candidate item
#[derive(Debug, Clone, Copy)]
pub struct ContentScore {
    pub item_id: Uuid,
    pub score: f64,
    pub confidence: f64,
}

pub struct ContentProfiler {
    config: ContentConfig,
}

impl ContentProfiler {
    pub fn new(config: ContentConfig) -> Self {
        Self { config }
    }

    /// Score a single item against a profile, bounded to [0, 1].
    ///
    /// Each applicable sub-score contributes `weight × value` to the
    /// numerator and `weight` to the denominator; inapplicable sub-scores
    /// (no data on either side) contribute neither.
    pub fn score_item(&self, item: &Item, profile: &UserProfile) -> f64 {
        let weights = &self.config.weights;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        let mut add = |weight: f64, value: Option<f64>| {
            if let Some(v) = value {
                numerator += weight * v.clamp(0.0, 1.0);
                denominator += weight;
            }
        };

        add(
            weights.category,
            (!profile.category_weights.is_empty())
                .then(|| *profile.category_weights.get(&item.category).unwrap_or(&0.0)),
        );
        add(
            weights.cuisine,
            (!profile.cuisine_weights.is_empty())
                .then(|| *profile.cuisine_weights.get(&item.cuisine_type).unwrap_or(&0.0)),
        );
        add(
            weights.feature_vector,
            feature_cosine(&profile.feature_vector, &item.feature_vector),
        );
        add(
            weights.price,
            (profile.avg_price > 0.0)
                .then(|| 1.0 - (item.price - profile.avg_price).abs() / profile.avg_price),
        );
        add(
            weights.spice,
            (profile.interaction_count > 0)
                .then(|| 1.0 - (item.spice_level - profile.avg_spice_level).abs() / 5.0),
        );
        add(
            weights.dietary,
            (!profile.dietary_tag_weights.is_empty()).then(|| {
                item.dietary_tags
                    .iter()
                    .filter_map(|tag| profile.dietary_tag_weights.get(tag))
                    .sum::<f64>()
            }),
        );
        add(
            weights.explicit_preference,
            profile
                .explicit
                .as_ref()
                .map(|prefs| explicit_compatibility(item, prefs)),
        );
        add(
            weights.popularity,
            Some((item.popularity_score.clamp(0.0, 1.0) + item.rating_average / 5.0) / 2.0),
        );

        if denominator == 0.0 {
            return 0.0;
        }
        (numerator / denominator).clamp(0.0, 1.0)
    }

    /// Score candidates against the profile, dropping excluded items and
    /// anything under `min_score`. Text similarity, when enabled and the
    /// profile has a corpus, is blended in at the configured mixing ratio.
    pub fn score_candidates(
        &self,
        profile: &UserProfile,
        candidates: &[Item],
        exclude: &HashSet<Uuid>,
    ) -> Vec<ContentScore> {
        let use_text = self.config.enable_text_similarity && !profile.text_corpus.is_empty();
        let idf = use_text.then(|| {
            let mut docs: Vec<String> = candidates.iter().map(|i| i.text_corpus()).collect();
            docs.push(profile.text_corpus.clone());
            build_idf(&docs)
        });
        let profile_vector = idf
            .as_ref()
            .map(|idf| tfidf_vector(&profile.text_corpus, idf));

        let confidence = (profile.unique_items as f64 / 10.0).min(1.0);

        let mut scored: Vec<ContentScore> = candidates
            .iter()
            .filter(|item| !exclude.contains(&item.id) && item.availability_score > 0.0)
            .map(|item| {
                let mut score = self.score_item(item, profile);
                if let (Some(idf), Some(profile_vec)) = (&idf, &profile_vector) {
                    let item_vec = tfidf_vector(&item.text_corpus(), idf);
                    let text_similarity = sparse_cosine(profile_vec, &item_vec);
                    let ratio = self.config.text_mixing_ratio;
                    score = (1.0 - ratio) * score + ratio * text_similarity;
                }
                ContentScore {
                    item_id: item.id,
                    score,
                    confidence,
                }
            })
            .filter(|scored| scored.score >= self.config.min_score)
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(
            candidates = candidates.len(),
            kept = scored.len(),
            "content scoring done"
        );
        scored
    }
}

fn feature_cosine(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a * norm_b)).max(0.0))
}

fn explicit_compatibility(item: &Item, prefs: &crate::models::ExplicitPreferences) -> f64 {
    // A violated dietary restriction disqualifies the item outright
    let restrictions_met = prefs
        .dietary_restrictions
        .iter()
        .all(|restriction| item.dietary_tags.contains(restriction));
    if !restrictions_met {
        return 0.0;
    }
    if prefs.favorite_cuisines.contains(&item.cuisine_type) {
        1.0
    } else {
        0.6
    }
}

// --- text similarity ---

const STOP_WORDS: &[&str] = &[
    "the", "and", "with", "for", "our", "your", "from", "this", "that", "are", "was", "has",
    "have", "its", "served", "fresh", "made", "house",
];

/// Lower-case, strip punctuation, drop stop words and tokens under 3 chars.
/// Approximates the noun/adjective filter of the original pipeline.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 3 && !STOP_WORDS.contains(token))
        .map(|token| token.to_string())
        .collect()
}

/// Inverse document frequency over a document set: ln(N / (1 + df)) + 1
pub fn build_idf(docs: &[String]) -> HashMap<String, f64> {
    let n = docs.len() as f64;
    let mut document_frequency: HashMap<String, usize> = HashMap::new();
    for doc in docs {
        let unique: HashSet<String> = tokenize(doc).into_iter().collect();
        for token in unique {
            *document_frequency.entry(token).or_insert(0) += 1;
        }
    }
    document_frequency
        .into_iter()
        .map(|(token, df)| (token, (n / (1.0 + df as f64)).ln() + 1.0))
        .collect()
}

/// Sparse TF-IDF vector for one document
pub fn tfidf_vector(doc: &str, idf: &HashMap<String, f64>) -> HashMap<String, f64> {
    let tokens = tokenize(doc);
    if tokens.is_empty() {
        return HashMap::new();
    }
    let total = tokens.len() as f64;
    let mut term_frequency: HashMap<String, f64> = HashMap::new();
    for token in tokens {
        *term_frequency.entry(token).or_insert(0.0) += 1.0;
    }
    term_frequency
        .into_iter()
        .filter_map(|(token, count)| {
            idf.get(&token)
                .map(|idf_value| (token, count / total * idf_value))
        })
        .collect()
}

/// Cosine similarity between sparse vectors
pub fn sparse_cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(token, x)| b.get(token).map(|y| x * y))
        .sum();
    let norm_a: f64 = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExplicitPreferences;

    fn item(category: &str, cuisine: &str) -> Item {
        Item {
            id: Uuid::new_v4(),
            name: format!("{} plate", category),
            description: format!("classic {} dish", cuisine),
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

    fn profile_liking(category: &str, cuisine: &str) -> UserProfile {
        UserProfile {
            category_weights: [(category.to_string(), 1.0)].into_iter().collect(),
            cuisine_weights: [(cuisine.to_string(), 1.0)].into_iter().collect(),
            avg_price: 10.0,
            avg_spice_level: 2.0,
            interaction_count: 12,
            unique_items: 10,
            ..Default::default()
        }
    }

    #[test]
    fn score_is_bounded() {
        let profiler = ContentProfiler::new(ContentConfig::default());
        let profile = profile_liking("pizza", "italian");
        for candidate in [item("pizza", "italian"), item("sushi", "japanese")] {
            let score = profiler.score_item(&candidate, &profile);
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn matching_category_scores_higher() {
        let profiler = ContentProfiler::new(ContentConfig::default());
        let profile = profile_liking("pizza", "italian");
        let matching = profiler.score_item(&item("pizza", "italian"), &profile);
        let other = profiler.score_item(&item("sushi", "japanese"), &profile);
        assert!(matching > other);
    }

    #[test]
    fn empty_profile_scores_only_popularity() {
        let profiler = ContentProfiler::new(ContentConfig::default());
        let profile = UserProfile::default();
        let score = profiler.score_item(&item("pizza", "italian"), &profile);
        // Only the popularity component applies: (0.5 + 4.0/5.0) / 2 = 0.65
        assert!((score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn violated_restriction_zeroes_compatibility() {
        let prefs = ExplicitPreferences {
            favorite_cuisines: vec!["italian".into()],
            dietary_restrictions: vec!["vegan".into()],
            preferred_price_range: None,
        };
        assert_eq!(explicit_compatibility(&item("pizza", "italian"), &prefs), 0.0);

        let mut vegan_pizza = item("pizza", "italian");
        vegan_pizza.dietary_tags.push("vegan".into());
        assert_eq!(explicit_compatibility(&vegan_pizza, &prefs), 1.0);
    }

    #[test]
    fn candidates_respect_exclusions_and_min_score() {
        let mut config = ContentConfig::default();
        config.enable_text_similarity = false;
        config.min_score = 0.3;
        let profiler = ContentProfiler::new(config);
        let profile = profile_liking("pizza", "italian");

        let liked = item("pizza", "italian");
        let excluded = item("pizza", "italian");
        let weak = item("salad", "greek");

        let exclude: HashSet<Uuid> = [excluded.id].into_iter().collect();
        let scored = profiler.score_candidates(
            &profile,
            &[liked.clone(), excluded.clone(), weak.clone()],
            &exclude,
        );

        assert!(scored.iter().any(|s| s.item_id == liked.id));
        assert!(scored.iter().all(|s| s.item_id != excluded.id));
        assert!(scored.iter().all(|s| s.score >= 0.3));
    }

    #[test]
    fn tokenizer_strips_noise() {
        let tokens = tokenize("The Spicy, wood-fired PIZZA!");
        assert!(tokens.contains(&"spicy".to_string()));
        assert!(tokens.contains(&"pizza".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
    }

    #[test]
    fn text_similarity_favors_shared_vocabulary() {
        let docs = vec![
            "spicy tuna roll rice seaweed".to_string(),
            "spicy tuna bowl rice".to_string(),
            "chocolate lava cake dessert".to_string(),
        ];
        let idf = build_idf(&docs);
        let query = tfidf_vector(&docs[0], &idf);
        let close = tfidf_vector(&docs[1], &idf);
        let far = tfidf_vector(&docs[2], &idf);

        assert!(sparse_cosine(&query, &close) > sparse_cosine(&query, &far));
    }
}
