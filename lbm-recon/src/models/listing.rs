//! Listing and candidate types
//!
//! `ExistingListing` is the canonical inventory record owned by the store.
//! `CandidateListing` is a machine-extracted, not-yet-trusted record that
//! exists only for the duration of one extraction session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Powertrain vocabulary carried over from dealer price lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Gasoline,
    Diesel,
    Hybrid,
    Electric,
}

impl FuelType {
    /// Parse from the extraction vocabulary (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gasoline" | "benzin" | "petrol" => Some(FuelType::Gasoline),
            "diesel" => Some(FuelType::Diesel),
            "hybrid" => Some(FuelType::Hybrid),
            "electric" | "el" | "ev" => Some(FuelType::Electric),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Gasoline => "gasoline",
            FuelType::Diesel => "diesel",
            FuelType::Hybrid => "hybrid",
            FuelType::Electric => "electric",
        }
    }
}

/// Whether the variant name came verbatim from the document or was
/// inferred by the extraction model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantSource {
    Existing,
    Inferred,
}

/// Where in the source document a candidate came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Source file name (e.g. the uploaded PDF)
    pub source_file: String,
    /// Page number within the source file, if known
    pub page: Option<u32>,
}

/// One pricing configuration attached to a listing
///
/// A listing may carry several offers (term/mileage/price combinations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseOffer {
    /// Monthly payment in whole DKK
    pub monthly_price: i64,
    /// Up-front payment in whole DKK
    pub first_payment: i64,
    /// Lease term in months (12/24/36/48)
    pub period_months: i32,
    /// Included mileage per year in km
    pub mileage_per_year: i32,
}

impl LeaseOffer {
    /// Total lease cost, recomputed from components.
    ///
    /// Never persisted and never compared directly between candidate and
    /// existing records; upstream rounding differs between documents, so
    /// only the components are diffed.
    pub fn total_cost(&self) -> i64 {
        self.first_payment + self.monthly_price * self.period_months as i64
    }
}

/// Validated candidate vehicle record extracted from a dealer document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateListing {
    pub make: String,
    pub model: String,
    pub variant: String,
    pub variant_source: VariantSource,
    /// Monthly payment in whole DKK
    pub monthly_price: i64,
    /// Up-front payment in whole DKK
    pub first_payment: i64,
    /// Lease term in months
    pub period_months: i32,
    /// Included mileage per year in km
    pub mileage_per_year: i32,
    pub horsepower: Option<i32>,
    pub fuel_type: Option<FuelType>,
    pub provenance: Option<Provenance>,
}

impl CandidateListing {
    /// The pricing offer this candidate represents
    pub fn offer(&self) -> LeaseOffer {
        LeaseOffer {
            monthly_price: self.monthly_price,
            first_payment: self.first_payment,
            period_months: self.period_months,
            mileage_per_year: self.mileage_per_year,
        }
    }
}

/// Canonical inventory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingListing {
    pub id: Uuid,
    pub dealer_id: Uuid,
    pub make: String,
    pub model: String,
    pub variant: String,
    pub horsepower: Option<i32>,
    pub fuel_type: Option<FuelType>,
    /// Current pricing offers (one listing, many term/mileage combinations)
    pub offers: Vec<LeaseOffer>,
}

impl ExistingListing {
    /// Find the offer with the given term/mileage combination
    pub fn offer_for(&self, period_months: i32, mileage_per_year: i32) -> Option<&LeaseOffer> {
        self.offers
            .iter()
            .find(|o| o.period_months == period_months && o.mileage_per_year == mileage_per_year)
    }
}

/// Why a raw record was rejected at normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingRequiredField,
    OutOfRange,
    TypeMismatch,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingRequiredField => "missing_required_field",
            RejectReason::OutOfRange => "out_of_range",
            RejectReason::TypeMismatch => "type_mismatch",
        }
    }
}

/// A raw record that failed normalization
///
/// Recorded on the session for audit; excluded from matching. A rejected
/// record never aborts the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    /// Position in the submitted batch
    pub index: usize,
    pub reason: RejectReason,
    /// Human-readable detail (field name, offending value)
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_cost_recomputed_from_components() {
        let offer = LeaseOffer {
            monthly_price: 3495,
            first_payment: 4999,
            period_months: 36,
            mileage_per_year: 15000,
        };
        assert_eq!(offer.total_cost(), 4999 + 3495 * 36);
    }

    #[test]
    fn fuel_type_parses_danish_vocabulary() {
        assert_eq!(FuelType::parse("Benzin"), Some(FuelType::Gasoline));
        assert_eq!(FuelType::parse("electric"), Some(FuelType::Electric));
        assert_eq!(FuelType::parse("steam"), None);
    }

    #[test]
    fn offer_lookup_by_term_and_mileage() {
        let listing = ExistingListing {
            id: Uuid::new_v4(),
            dealer_id: Uuid::new_v4(),
            make: "Toyota".to_string(),
            model: "Yaris".to_string(),
            variant: "Active".to_string(),
            horsepower: Some(116),
            fuel_type: Some(FuelType::Hybrid),
            offers: vec![
                LeaseOffer { monthly_price: 2699, first_payment: 4999, period_months: 36, mileage_per_year: 15000 },
                LeaseOffer { monthly_price: 2899, first_payment: 4999, period_months: 36, mileage_per_year: 20000 },
            ],
        };

        assert_eq!(listing.offer_for(36, 20000).unwrap().monthly_price, 2899);
        assert!(listing.offer_for(48, 15000).is_none());
    }
}
