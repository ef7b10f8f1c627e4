//! Inventory store queries
//!
//! Reads take a pool; writes take a `SqliteConnection` so the Apply Engine
//! can run them inside one all-or-nothing transaction.

use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{ReconError, ReconResult};
use crate::models::{CandidateListing, ExistingListing, FieldChange, FuelType, LeaseOffer};

/// Load the full inventory for one dealer, ordered by listing id for
/// deterministic snapshots.
pub async fn snapshot_inventory(
    pool: &SqlitePool,
    dealer_id: Uuid,
) -> ReconResult<Vec<ExistingListing>> {
    let rows = sqlx::query(
        r#"
        SELECT id, dealer_id, make, model, variant, horsepower, fuel_type
        FROM listings
        WHERE dealer_id = ?
        ORDER BY id
        "#,
    )
    .bind(dealer_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut inventory = Vec::with_capacity(rows.len());
    for row in rows {
        let id = parse_uuid(row.get("id"))?;
        let offers = load_offers(pool, id).await?;
        inventory.push(ExistingListing {
            id,
            dealer_id: parse_uuid(row.get("dealer_id"))?,
            make: row.get("make"),
            model: row.get("model"),
            variant: row.get("variant"),
            horsepower: row.get::<Option<i64>, _>("horsepower").map(|h| h as i32),
            fuel_type: parse_fuel(row.get("fuel_type"))?,
            offers,
        });
    }

    Ok(inventory)
}

async fn load_offers(pool: &SqlitePool, listing_id: Uuid) -> ReconResult<Vec<LeaseOffer>> {
    let rows = sqlx::query(
        r#"
        SELECT monthly_price, first_payment, period_months, mileage_per_year
        FROM lease_offers
        WHERE listing_id = ?
        ORDER BY period_months, mileage_per_year
        "#,
    )
    .bind(listing_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| LeaseOffer {
            monthly_price: row.get("monthly_price"),
            first_payment: row.get("first_payment"),
            period_months: row.get::<i64, _>("period_months") as i32,
            mileage_per_year: row.get::<i64, _>("mileage_per_year") as i32,
        })
        .collect())
}

/// Number of listings currently in a dealer's inventory
pub async fn count_inventory(pool: &SqlitePool, dealer_id: Uuid) -> ReconResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings WHERE dealer_id = ?")
        .bind(dealer_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Insert a brand-new listing plus its offer (transactional write)
pub async fn insert_listing(
    conn: &mut SqliteConnection,
    dealer_id: Uuid,
    candidate: &CandidateListing,
) -> ReconResult<Uuid> {
    let listing_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO listings (id, dealer_id, make, model, variant, horsepower, fuel_type)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(listing_id.to_string())
    .bind(dealer_id.to_string())
    .bind(&candidate.make)
    .bind(&candidate.model)
    .bind(&candidate.variant)
    .bind(candidate.horsepower.map(|h| h as i64))
    .bind(candidate.fuel_type.map(|f| f.as_str()))
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO lease_offers (id, listing_id, monthly_price, first_payment, period_months, mileage_per_year)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(listing_id.to_string())
    .bind(candidate.monthly_price)
    .bind(candidate.first_payment)
    .bind(candidate.period_months as i64)
    .bind(candidate.mileage_per_year as i64)
    .execute(&mut *conn)
    .await?;

    Ok(listing_id)
}

/// Apply a field-level diff to one listing (transactional write).
///
/// Mutates only the diffed fields. Pricing fields are applied to the offer
/// row the diff was computed against: the row whose term/mileage equals
/// the diff's before-values, falling back to the candidate's term/mileage
/// when those fields did not change. A missing offer row means the diff
/// proposes a new term/mileage combination, which is inserted.
pub async fn apply_update(
    conn: &mut SqliteConnection,
    listing_id: Uuid,
    diff: &[FieldChange],
    candidate: &CandidateListing,
) -> ReconResult<()> {
    let changed: std::collections::HashMap<&str, &FieldChange> =
        diff.iter().map(|d| (d.field.as_str(), d)).collect();

    // Listing-level fields
    if changed.contains_key("variant") {
        sqlx::query("UPDATE listings SET variant = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(&candidate.variant)
            .bind(listing_id.to_string())
            .execute(&mut *conn)
            .await?;
    }
    if changed.contains_key("horsepower") {
        sqlx::query("UPDATE listings SET horsepower = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(candidate.horsepower.map(|h| h as i64))
            .bind(listing_id.to_string())
            .execute(&mut *conn)
            .await?;
    }
    if changed.contains_key("fuel_type") {
        sqlx::query("UPDATE listings SET fuel_type = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(candidate.fuel_type.map(|f| f.as_str()))
            .bind(listing_id.to_string())
            .execute(&mut *conn)
            .await?;
    }

    let offer_fields = ["monthly_price", "first_payment", "period_months", "mileage_per_year"];
    if !offer_fields.iter().any(|f| changed.contains_key(*f)) {
        return Ok(());
    }

    // The offer row the classifier diffed against
    let ref_period = changed
        .get("period_months")
        .and_then(|d| d.before.as_i64())
        .unwrap_or(candidate.period_months as i64);
    let ref_mileage = changed
        .get("mileage_per_year")
        .and_then(|d| d.before.as_i64())
        .unwrap_or(candidate.mileage_per_year as i64);

    let result = sqlx::query(
        r#"
        UPDATE lease_offers
        SET monthly_price = ?, first_payment = ?, period_months = ?, mileage_per_year = ?
        WHERE listing_id = ? AND period_months = ? AND mileage_per_year = ?
        "#,
    )
    .bind(candidate.monthly_price)
    .bind(candidate.first_payment)
    .bind(candidate.period_months as i64)
    .bind(candidate.mileage_per_year as i64)
    .bind(listing_id.to_string())
    .bind(ref_period)
    .bind(ref_mileage)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        // New term/mileage combination for this listing
        sqlx::query(
            r#"
            INSERT INTO lease_offers (id, listing_id, monthly_price, first_payment, period_months, mileage_per_year)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(listing_id.to_string())
        .bind(candidate.monthly_price)
        .bind(candidate.first_payment)
        .bind(candidate.period_months as i64)
        .bind(candidate.mileage_per_year as i64)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Remove a listing and all of its offers (transactional write)
pub async fn delete_listing(conn: &mut SqliteConnection, listing_id: Uuid) -> ReconResult<()> {
    sqlx::query("DELETE FROM lease_offers WHERE listing_id = ?")
        .bind(listing_id.to_string())
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM listings WHERE id = ?")
        .bind(listing_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn parse_uuid(s: String) -> ReconResult<Uuid> {
    Uuid::parse_str(&s).map_err(|e| ReconError::Internal(format!("Invalid UUID in database: {}", e)))
}

fn parse_fuel(s: Option<String>) -> ReconResult<Option<FuelType>> {
    match s {
        None => Ok(None),
        Some(s) => FuelType::parse(&s)
            .map(Some)
            .ok_or_else(|| ReconError::Internal(format!("Invalid fuel_type in database: {}", s))),
    }
}
