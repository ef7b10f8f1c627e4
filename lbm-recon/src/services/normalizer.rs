//! Candidate Normalizer
//!
//! Validates and canonicalizes raw extracted records (untyped JSON from the
//! extraction service) into `CandidateListing`s. Pure and side-effect-free:
//! a malformed record is rejected individually with a reason and never
//! aborts the batch.
//!
//! Numeric fields accept Danish locale formatting ("2.699" → 2699,
//! "3.495,50" → 3495) because dealer price lists are Danish. Values outside
//! sanity ranges are rejected, not clamped.

use serde_json::Value;

use crate::models::{
    CandidateListing, FuelType, Provenance, RejectReason, RejectedCandidate, VariantSource,
};

/// Accepted lease terms in months
pub const VALID_PERIODS: [i32; 4] = [12, 24, 36, 48];

/// Horsepower sanity range
pub const HORSEPOWER_RANGE: std::ops::RangeInclusive<i32> = 0..=1500;

/// Annual mileage sanity range in km
pub const MILEAGE_RANGE: std::ops::RangeInclusive<i32> = 5_000..=100_000;

/// Outcome of normalizing one raw record
pub type NormalizeResult = Result<CandidateListing, RejectedCandidate>;

/// Normalize a whole batch, partitioning into candidates and rejections.
///
/// Order of accepted candidates follows submission order.
pub fn normalize_batch(raw_records: &[Value]) -> (Vec<CandidateListing>, Vec<RejectedCandidate>) {
    let mut candidates = Vec::with_capacity(raw_records.len());
    let mut rejected = Vec::new();

    for (index, raw) in raw_records.iter().enumerate() {
        match normalize(raw, index) {
            Ok(candidate) => candidates.push(candidate),
            Err(rejection) => {
                tracing::debug!(
                    index,
                    reason = rejection.reason.as_str(),
                    detail = %rejection.detail,
                    "Candidate rejected at normalization"
                );
                rejected.push(rejection);
            }
        }
    }

    (candidates, rejected)
}

/// Normalize one raw record
pub fn normalize(raw: &Value, index: usize) -> NormalizeResult {
    let obj = raw.as_object().ok_or_else(|| RejectedCandidate {
        index,
        reason: RejectReason::TypeMismatch,
        detail: "record is not a JSON object".to_string(),
    })?;

    let reject = |reason: RejectReason, detail: String| RejectedCandidate {
        index,
        reason,
        detail,
    };

    let make = required_string(obj, "make").map_err(|(r, d)| reject(r, d))?;
    let model = required_string(obj, "model").map_err(|(r, d)| reject(r, d))?;
    let variant = required_string(obj, "variant").map_err(|(r, d)| reject(r, d))?;

    let monthly_price = required_integer(obj, "monthly_price").map_err(|(r, d)| reject(r, d))?;
    let first_payment = required_integer(obj, "first_payment").map_err(|(r, d)| reject(r, d))?;
    let period_raw = required_integer(obj, "period_months").map_err(|(r, d)| reject(r, d))?;
    let mileage_raw =
        required_integer(obj, "mileage_per_year").map_err(|(r, d)| reject(r, d))?;

    // Sanity ranges: reject, never clamp. Checked on the full-width value
    // so an oversized input cannot wrap into range when narrowed.
    if monthly_price <= 0 {
        return Err(reject(
            RejectReason::OutOfRange,
            format!("monthly_price must be positive, got {}", monthly_price),
        ));
    }
    if first_payment < 0 {
        return Err(reject(
            RejectReason::OutOfRange,
            format!("first_payment must be non-negative, got {}", first_payment),
        ));
    }
    let period_months = i32::try_from(period_raw)
        .ok()
        .filter(|p| VALID_PERIODS.contains(p))
        .ok_or_else(|| {
            reject(
                RejectReason::OutOfRange,
                format!("period_months must be one of {:?}, got {}", VALID_PERIODS, period_raw),
            )
        })?;
    let mileage_per_year = i32::try_from(mileage_raw)
        .ok()
        .filter(|m| MILEAGE_RANGE.contains(m))
        .ok_or_else(|| {
            reject(
                RejectReason::OutOfRange,
                format!("mileage_per_year out of range: {}", mileage_raw),
            )
        })?;

    let horsepower = match obj.get("horsepower") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let hp_raw = coerce_integer(v).ok_or_else(|| {
                reject(RejectReason::TypeMismatch, format!("horsepower: {}", v))
            })?;
            let hp = i32::try_from(hp_raw)
                .ok()
                .filter(|h| HORSEPOWER_RANGE.contains(h))
                .ok_or_else(|| {
                    reject(
                        RejectReason::OutOfRange,
                        format!("horsepower out of range: {}", hp_raw),
                    )
                })?;
            Some(hp)
        }
    };

    let fuel_type = match obj.get("fuel_type") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(FuelType::parse(s).ok_or_else(|| {
            reject(RejectReason::TypeMismatch, format!("unknown fuel_type: {}", s))
        })?),
        Some(v) => {
            return Err(reject(
                RejectReason::TypeMismatch,
                format!("fuel_type must be a string, got {}", v),
            ))
        }
    };

    let variant_source = match obj.get("variant_source").and_then(Value::as_str) {
        Some("existing") => VariantSource::Existing,
        // Absent or unrecognized tags are treated as model-inferred
        _ => VariantSource::Inferred,
    };

    let provenance = obj.get("provenance").and_then(|p| {
        let source_file = p.get("source_file")?.as_str()?.to_string();
        let page = p.get("page").and_then(Value::as_u64).map(|n| n as u32);
        Some(Provenance { source_file, page })
    });

    Ok(CandidateListing {
        make,
        model,
        variant,
        variant_source,
        monthly_price,
        first_payment,
        period_months,
        mileage_per_year,
        horsepower,
        fuel_type,
        provenance,
    })
}

/// Extract a required, non-empty string field with whitespace canonicalized
fn required_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, (RejectReason, String)> {
    match obj.get(field) {
        None | Some(Value::Null) => Err((
            RejectReason::MissingRequiredField,
            format!("missing field: {}", field),
        )),
        Some(Value::String(s)) => {
            let canonical = canonicalize_text(s);
            if canonical.is_empty() {
                Err((
                    RejectReason::MissingRequiredField,
                    format!("empty field: {}", field),
                ))
            } else {
                Ok(canonical)
            }
        }
        Some(v) => Err((
            RejectReason::TypeMismatch,
            format!("{} must be a string, got {}", field, v),
        )),
    }
}

/// Extract a required integer field, coercing locale-formatted strings
fn required_integer(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<i64, (RejectReason, String)> {
    match obj.get(field) {
        None | Some(Value::Null) => Err((
            RejectReason::MissingRequiredField,
            format!("missing field: {}", field),
        )),
        Some(v) => coerce_integer(v).ok_or_else(|| {
            (
                RejectReason::TypeMismatch,
                format!("{} is not numeric: {}", field, v),
            )
        }),
    }
}

/// Coerce a JSON value to a whole number.
///
/// Accepts integers, integral floats, and Danish-formatted strings where
/// "." is the thousands separator and "," the decimal mark ("2.699" →
/// 2699, "3.495,50" → 3495). Fractional øre are truncated; prices in the
/// source documents are whole DKK.
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
            }
        }
        Value::String(s) => parse_danish_number(s),
        _ => None,
    }
}

/// Parse a Danish locale-formatted number string
fn parse_danish_number(s: &str) -> Option<i64> {
    let cleaned: String = s
        .trim()
        .trim_start_matches("kr.")
        .trim_end_matches("kr.")
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    // "2.699" / "102.163" thousands separators; "," starts the decimal part
    let without_thousands = cleaned.replace('.', "");
    let normalized = without_thousands.replace(',', ".");
    normalized.parse::<f64>().ok().map(|f| f.trunc() as i64)
}

/// Trim and collapse internal whitespace
fn canonicalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
