//! Diff Classifier
//!
//! Turns match results plus the set of existing listings claimed by no
//! candidate into change records. Deletions are only ever staged here;
//! the Apply Engine decides whether they may run.
//!
//! Derived totals are never compared between candidate and existing
//! records; only the pricing components are diffed, which avoids false
//! positives from inconsistent upstream rounding.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::models::{
    ApprovalStatus, CandidateListing, ChangeKind, ChangeRecord, ExistingListing, FieldChange,
    LeaseOffer,
};
use crate::services::matcher::MatchResult;

/// Confidence ceiling for ambiguous matches
pub const AMBIGUOUS_CONFIDENCE_CAP: f64 = 0.5;

/// Classify one session's match results into change records.
///
/// `results` is parallel to `candidates`. Conflict exclusivity is enforced
/// here: the first candidate to claim an existing listing wins, later
/// candidates are classified with that listing excluded.
pub fn classify(
    session_id: Uuid,
    candidates: &[CandidateListing],
    results: &[MatchResult],
    inventory: &[ExistingListing],
) -> Vec<ChangeRecord> {
    debug_assert_eq!(candidates.len(), results.len());

    let by_id: HashMap<Uuid, &ExistingListing> =
        inventory.iter().map(|l| (l.id, l)).collect();
    let mut claimed: HashSet<Uuid> = HashSet::new();
    let mut records = Vec::with_capacity(candidates.len());

    for (candidate, result) in candidates.iter().zip(results.iter()) {
        // Listings already claimed by an earlier candidate are out of play
        let eligible: Vec<_> = result
            .matches
            .iter()
            .filter(|m| !claimed.contains(&m.listing_id))
            .collect();

        let record = match eligible.first() {
            None => ChangeRecord {
                change_id: Uuid::new_v4(),
                session_id,
                kind: ChangeKind::Create,
                existing_id: None,
                candidate: Some(candidate.clone()),
                confidence: 1.0,
                ambiguous: false,
                tier: None,
                match_score: None,
                diff: Vec::new(),
                rationale: format!(
                    "No existing {} {} listing matched; new listing",
                    candidate.make, candidate.model
                ),
                approval: ApprovalStatus::Pending,
                inventory_at_start: None,
            },
            Some(top) => {
                let ambiguous = eligible.len() >= 2
                    && (eligible[0].score - eligible[1].score).abs() < 1e-9;
                let existing = by_id[&top.listing_id];
                claimed.insert(top.listing_id);

                let diff = compute_diff(candidate, existing);
                let kind = if diff.is_empty() {
                    ChangeKind::Unchanged
                } else {
                    ChangeKind::Update
                };
                let confidence = if ambiguous {
                    top.score.min(AMBIGUOUS_CONFIDENCE_CAP)
                } else {
                    top.score
                };

                let rationale = if ambiguous {
                    format!(
                        "{} existing listings tied at score {:.2} ({} tier); deferred to manual review",
                        eligible.len(),
                        top.score,
                        top.tier.as_str()
                    )
                } else if kind == ChangeKind::Unchanged {
                    format!(
                        "Matched '{}' via {} tier with no field differences",
                        existing.variant,
                        top.tier.as_str()
                    )
                } else {
                    format!(
                        "Matched '{}' via {} tier; {} field(s) differ",
                        existing.variant,
                        top.tier.as_str(),
                        diff.len()
                    )
                };

                ChangeRecord {
                    change_id: Uuid::new_v4(),
                    session_id,
                    kind,
                    existing_id: Some(existing.id),
                    candidate: Some(candidate.clone()),
                    confidence,
                    ambiguous,
                    tier: Some(top.tier),
                    match_score: Some(top.score),
                    diff,
                    rationale,
                    approval: ApprovalStatus::Pending,
                    inventory_at_start: None,
                }
            }
        };
        records.push(record);
    }

    // Existing listings claimed by no candidate become staged deletions,
    // tagged with the snapshot inventory count for the apply-time cap check.
    let mut unmatched: Vec<&ExistingListing> = inventory
        .iter()
        .filter(|l| !claimed.contains(&l.id))
        .collect();
    unmatched.sort_by_key(|l| l.id);

    for listing in unmatched {
        records.push(ChangeRecord {
            change_id: Uuid::new_v4(),
            session_id,
            kind: ChangeKind::Delete,
            existing_id: Some(listing.id),
            candidate: None,
            confidence: 1.0,
            ambiguous: false,
            tier: None,
            match_score: None,
            diff: Vec::new(),
            rationale: format!(
                "{} {} '{}' present in inventory but absent from the extracted document",
                listing.make, listing.model, listing.variant
            ),
            approval: ApprovalStatus::Pending,
            inventory_at_start: Some(inventory.len() as i64),
        });
    }

    records
}

/// Field-level diff between a candidate and its matched existing listing.
///
/// Pricing is compared against the offer with the candidate's term/mileage
/// combination when present, otherwise the offer with the closest monthly
/// price; each component is compared independently. Listing-level fields
/// are only diffed when the candidate actually provides a value.
pub fn compute_diff(candidate: &CandidateListing, existing: &ExistingListing) -> Vec<FieldChange> {
    let mut diff = Vec::new();

    if !existing.variant.eq_ignore_ascii_case(&candidate.variant) {
        diff.push(FieldChange::new(
            "variant",
            &existing.variant,
            &candidate.variant,
        ));
    }

    if let Some(reference) = reference_offer(candidate, existing) {
        if reference.monthly_price != candidate.monthly_price {
            diff.push(FieldChange::new(
                "monthly_price",
                reference.monthly_price,
                candidate.monthly_price,
            ));
        }
        if reference.first_payment != candidate.first_payment {
            diff.push(FieldChange::new(
                "first_payment",
                reference.first_payment,
                candidate.first_payment,
            ));
        }
        if reference.period_months != candidate.period_months {
            diff.push(FieldChange::new(
                "period_months",
                reference.period_months,
                candidate.period_months,
            ));
        }
        if reference.mileage_per_year != candidate.mileage_per_year {
            diff.push(FieldChange::new(
                "mileage_per_year",
                reference.mileage_per_year,
                candidate.mileage_per_year,
            ));
        }
    }

    if let Some(hp) = candidate.horsepower {
        if existing.horsepower != Some(hp) {
            diff.push(FieldChange::new("horsepower", existing.horsepower, hp));
        }
    }
    if let Some(fuel) = candidate.fuel_type {
        if existing.fuel_type != Some(fuel) {
            diff.push(FieldChange::new(
                "fuel_type",
                existing.fuel_type.map(|f| f.as_str()),
                fuel.as_str(),
            ));
        }
    }

    diff
}

fn reference_offer<'a>(
    candidate: &CandidateListing,
    existing: &'a ExistingListing,
) -> Option<&'a LeaseOffer> {
    existing
        .offer_for(candidate.period_months, candidate.mileage_per_year)
        .or_else(|| {
            existing.offers.iter().min_by_key(|o| {
                (o.monthly_price - candidate.monthly_price).unsigned_abs()
            })
        })
}
