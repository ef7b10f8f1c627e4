//! Listing Matcher
//!
//! Pairs each normalized candidate with existing inventory records using an
//! ordered sequence of fuzzy-matching tiers. Each tier is an independent
//! strategy object so it can be tested in isolation; a tier is only tried
//! when the previous one produced zero eligible matches.
//!
//! Pure function of the candidate plus the inventory snapshot taken at
//! session start: no side effects, deterministic ordering (score
//! descending, then listing id as the stable tie-break).

use uuid::Uuid;

use crate::models::{CandidateListing, ExistingListing, MatchTier};

/// Minimum score a tier match must reach to be eligible
pub const MIN_MATCH_SCORE: f64 = 0.6;

/// Minimum variant-string similarity for the close-variant tier
pub const VARIANT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Monthly price tolerance for the close-variant tier (±10%)
pub const CLOSE_PRICE_TOLERANCE: f64 = 0.10;

/// Monthly price tolerance for the loose tier (±25%)
pub const LOOSE_PRICE_TOLERANCE: f64 = 0.25;

/// Two top scores closer than this are a tie
const SCORE_TIE_EPSILON: f64 = 1e-9;

/// One scored pairing of a candidate with an existing listing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredMatch {
    pub listing_id: Uuid,
    /// Similarity score in [0,1]
    pub score: f64,
    /// Tier that produced this match
    pub tier: MatchTier,
}

/// Ranked match outcome for one candidate
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Eligible matches, ordered by score descending then listing id.
    /// Empty signals a brand-new listing.
    pub matches: Vec<ScoredMatch>,
    /// Multiple existing records tied at the top score within the tier
    pub ambiguous: bool,
}

impl MatchResult {
    /// Best match, if any
    pub fn top(&self) -> Option<&ScoredMatch> {
        self.matches.first()
    }
}

/// One fuzzy-matching tier
pub trait MatchStrategy: Send + Sync {
    /// Tier identity for provenance
    fn tier(&self) -> MatchTier;

    /// Score every eligible listing; ineligible listings are omitted
    fn evaluate(
        &self,
        candidate: &CandidateListing,
        inventory: &[ExistingListing],
    ) -> Vec<ScoredMatch>;
}

/// Tier 1: identity match on (make, model, variant, period, mileage)
pub struct ExactKeyTier;

impl MatchStrategy for ExactKeyTier {
    fn tier(&self) -> MatchTier {
        MatchTier::ExactKey
    }

    fn evaluate(
        &self,
        candidate: &CandidateListing,
        inventory: &[ExistingListing],
    ) -> Vec<ScoredMatch> {
        inventory
            .iter()
            .filter(|listing| {
                text_eq(&listing.make, &candidate.make)
                    && text_eq(&listing.model, &candidate.model)
                    && text_eq(&listing.variant, &candidate.variant)
                    && listing
                        .offer_for(candidate.period_months, candidate.mileage_per_year)
                        .is_some()
            })
            .map(|listing| ScoredMatch {
                listing_id: listing.id,
                score: 1.0,
                tier: MatchTier::ExactKey,
            })
            .collect()
    }
}

/// Tier 2: (make, model) + variant similarity ≥ 0.8 + price within ±10%
pub struct CloseVariantTier;

impl MatchStrategy for CloseVariantTier {
    fn tier(&self) -> MatchTier {
        MatchTier::CloseVariant
    }

    fn evaluate(
        &self,
        candidate: &CandidateListing,
        inventory: &[ExistingListing],
    ) -> Vec<ScoredMatch> {
        inventory
            .iter()
            .filter(|listing| {
                text_eq(&listing.make, &candidate.make) && text_eq(&listing.model, &candidate.model)
            })
            .filter_map(|listing| {
                let similarity = variant_similarity(&listing.variant, &candidate.variant);
                if similarity < VARIANT_SIMILARITY_THRESHOLD {
                    return None;
                }
                price_delta_ratio(candidate, listing)
                    .filter(|delta| *delta <= CLOSE_PRICE_TOLERANCE)
                    .map(|_| ScoredMatch {
                        listing_id: listing.id,
                        score: similarity,
                        tier: MatchTier::CloseVariant,
                    })
            })
            .collect()
    }
}

/// Tier 3: (make, model) + price within ±25%, surfaces probable renames.
///
/// Score decays linearly from 0.8 (identical price) to 0.6 (at the
/// tolerance edge), keeping loose matches below close-variant scores.
pub struct LooseTier;

impl MatchStrategy for LooseTier {
    fn tier(&self) -> MatchTier {
        MatchTier::Loose
    }

    fn evaluate(
        &self,
        candidate: &CandidateListing,
        inventory: &[ExistingListing],
    ) -> Vec<ScoredMatch> {
        inventory
            .iter()
            .filter(|listing| {
                text_eq(&listing.make, &candidate.make) && text_eq(&listing.model, &candidate.model)
            })
            .filter_map(|listing| {
                price_delta_ratio(candidate, listing)
                    .filter(|delta| *delta <= LOOSE_PRICE_TOLERANCE)
                    .map(|delta| ScoredMatch {
                        listing_id: listing.id,
                        score: 0.8 - (delta / LOOSE_PRICE_TOLERANCE) * 0.2,
                        tier: MatchTier::Loose,
                    })
            })
            .collect()
    }
}

/// Tiered listing matcher
pub struct ListingMatcher {
    tiers: Vec<Box<dyn MatchStrategy>>,
}

impl ListingMatcher {
    /// Standard three-tier configuration
    pub fn new() -> Self {
        Self {
            tiers: vec![
                Box::new(ExactKeyTier),
                Box::new(CloseVariantTier),
                Box::new(LooseTier),
            ],
        }
    }

    /// Match one candidate against the inventory snapshot.
    ///
    /// Tiers are tried in order; the first tier with any eligible match
    /// (score ≥ 0.6) wins and later tiers are not consulted.
    pub fn match_candidate(
        &self,
        candidate: &CandidateListing,
        inventory: &[ExistingListing],
    ) -> MatchResult {
        for tier in &self.tiers {
            let mut matches = tier.evaluate(candidate, inventory);
            matches.retain(|m| m.score >= MIN_MATCH_SCORE);
            if matches.is_empty() {
                continue;
            }

            matches.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.listing_id.cmp(&b.listing_id))
            });

            let ambiguous = matches.len() >= 2
                && (matches[0].score - matches[1].score).abs() < SCORE_TIE_EPSILON;

            tracing::debug!(
                make = %candidate.make,
                model = %candidate.model,
                variant = %candidate.variant,
                tier = tier.tier().as_str(),
                matches = matches.len(),
                ambiguous,
                "Candidate matched"
            );

            return MatchResult { matches, ambiguous };
        }

        MatchResult::default()
    }
}

impl Default for ListingMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive text equality on canonicalized fields
fn text_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Variant-string similarity: max of token overlap (Jaccard) and
/// normalized Levenshtein, case-insensitive.
///
/// Token overlap handles reordered trim names ("Active Plus" vs "Plus
/// Active"); edit distance handles near-spellings.
pub fn variant_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return 1.0;
    }

    let tokens_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
    let jaccard = if tokens_a.is_empty() || tokens_b.is_empty() {
        0.0
    } else {
        let intersection = tokens_a.intersection(&tokens_b).count() as f64;
        let union = tokens_a.union(&tokens_b).count() as f64;
        intersection / union
    };

    let levenshtein = strsim::normalized_levenshtein(&a, &b);

    jaccard.max(levenshtein)
}

/// Relative monthly-price distance between candidate and the nearest of
/// the listing's offers. None when the listing has no offers.
fn price_delta_ratio(candidate: &CandidateListing, listing: &ExistingListing) -> Option<f64> {
    // Prefer the offer with the same term/mileage; otherwise the offer
    // with the closest monthly price.
    let reference = listing
        .offer_for(candidate.period_months, candidate.mileage_per_year)
        .or_else(|| {
            listing.offers.iter().min_by_key(|o| {
                (o.monthly_price - candidate.monthly_price).unsigned_abs()
            })
        })?;

    if reference.monthly_price <= 0 {
        return None;
    }
    Some(
        (candidate.monthly_price - reference.monthly_price).abs() as f64
            / reference.monthly_price as f64,
    )
}
