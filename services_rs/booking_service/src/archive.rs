use crate::error::ApiError;
use crate::models::{SeatOut, SweepOut};
use crate::state::AppState;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::Row;
use std::time::Duration;

/// Combine a journey's date and time into an instant. Both fields are
/// interpreted in the single canonical zone so creation, comparison and the
/// sweep all agree on when a journey departs.
pub fn journey_instant(date: &str, time: &str, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    let d = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = time.trim();
    let t = NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .ok()?;
    NaiveDateTime::new(d, t)
        .and_local_timezone(*tz)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Move every journey whose departure instant is strictly in the past into
/// the archive and delete the live record. Each journey is archived in its
/// own transaction; a failure leaves that journey live for the next tick.
/// The archive primary key makes a rerun a no-op.
pub async fn run_sweep(state: &AppState, now: DateTime<Utc>) -> Result<SweepOut, ApiError> {
    let journeys = state.table("journeys");

    let rows = sqlx::query(&format!(
        "SELECT id,source,destination,travel_date,depart_time,bus_number,bus_type,price_per_seat,seats_total \
         FROM {journeys}"
    ))
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db sweep journey scan failed");
        ApiError::internal("database error")
    })?;

    let mut stats = SweepOut {
        scanned: rows.len() as u32,
        archived: 0,
        skipped: 0,
    };

    for row in rows {
        let id: String = row.try_get("id").unwrap_or_default();
        let date: String = row.try_get("travel_date").unwrap_or_default();
        let time: String = row.try_get("depart_time").unwrap_or_default();

        let Some(instant) = journey_instant(&date, &time, &state.tz_offset) else {
            tracing::warn!(journey_id = %id, %date, %time, "unparseable journey date/time, skipping");
            stats.skipped += 1;
            continue;
        };
        if instant >= now {
            continue;
        }

        match archive_one(state, &row, &id, now).await {
            Ok(()) => {
                tracing::info!(journey_id = %id, "archived expired journey");
                stats.archived += 1;
            }
            Err(e) => {
                // Left live; the next scheduled sweep retries it.
                tracing::error!(journey_id = %id, error = %e.detail, "journey archive failed");
                stats.skipped += 1;
            }
        }
    }

    if stats.archived > 0 {
        tracing::info!(archived = stats.archived, skipped = stats.skipped, "sweep complete");
    }
    Ok(stats)
}

async fn archive_one(
    state: &AppState,
    row: &sqlx::postgres::PgRow,
    journey_id: &str,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let seats = state.table("journey_seats");
    let journeys = state.table("journeys");
    let archived = state.table("archived_journeys");

    let db_err = |e: sqlx::Error| {
        tracing::error!(error = %e, "db archive step failed");
        ApiError::internal("database error")
    };

    let mut tx = state.pool.begin().await.map_err(db_err)?;

    let seat_rows = sqlx::query(&format!(
        "SELECT seat_no,available,booked_by FROM {seats} WHERE journey_id=$1 ORDER BY seat_no FOR UPDATE"
    ))
    .bind(journey_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(db_err)?;
    let snapshot: Vec<SeatOut> = seat_rows
        .iter()
        .map(|r| SeatOut {
            seat_no: r.try_get("seat_no").unwrap_or(0),
            available: r.try_get::<i32, _>("available").unwrap_or(0) != 0,
            booked_by: r.try_get("booked_by").unwrap_or(None),
        })
        .collect();
    let seats_json = serde_json::to_string(&snapshot)
        .map_err(|e| ApiError::internal(format!("seat snapshot encode failed: {e}")))?;

    // The primary key is the existence check: rerunning the sweep over the
    // same journey inserts nothing new.
    sqlx::query(&format!(
        "INSERT INTO {archived} (original_id,source,destination,travel_date,depart_time,bus_number,bus_type,price_per_seat,seats_total,seats_json,archived_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) \
         ON CONFLICT (original_id) DO NOTHING"
    ))
    .bind(journey_id)
    .bind(row.try_get::<String, _>("source").unwrap_or_default())
    .bind(row.try_get::<String, _>("destination").unwrap_or_default())
    .bind(row.try_get::<String, _>("travel_date").unwrap_or_default())
    .bind(row.try_get::<String, _>("depart_time").unwrap_or_default())
    .bind(row.try_get::<String, _>("bus_number").unwrap_or_default())
    .bind(row.try_get::<String, _>("bus_type").unwrap_or_default())
    .bind(row.try_get::<i64, _>("price_per_seat").unwrap_or(0))
    .bind(row.try_get::<i32, _>("seats_total").unwrap_or(0))
    .bind(&seats_json)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    sqlx::query(&format!("DELETE FROM {seats} WHERE journey_id=$1"))
        .bind(journey_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    sqlx::query(&format!("DELETE FROM {journeys} WHERE id=$1"))
        .bind(journey_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;
    Ok(())
}

/// In-process fallback scheduler. Failures are logged and retried on the
/// next tick only.
pub fn spawn_sweeper(state: AppState, period: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            match run_sweep(&state, Utc::now()).await {
                Ok(stats) => {
                    tracing::debug!(
                        scanned = stats.scanned,
                        archived = stats.archived,
                        skipped = stats.skipped,
                        "scheduled sweep finished"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e.detail, "scheduled sweep failed");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
    }

    #[test]
    fn instant_applies_canonical_offset() {
        // Midnight IST is 18:30 the previous day in UTC.
        let dt = journey_instant("2026-01-01", "00:00", &ist()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-12-31T18:30:00+00:00");
    }

    #[test]
    fn instant_accepts_seconds_suffix() {
        let a = journey_instant("2026-03-05", "14:45", &ist()).unwrap();
        let b = journey_instant("2026-03-05", "14:45:00", &ist()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unparseable_date_or_time_yields_none() {
        assert!(journey_instant("2026-13-01", "10:00", &ist()).is_none());
        assert!(journey_instant("not-a-date", "10:00", &ist()).is_none());
        assert!(journey_instant("2026-01-01", "25:00", &ist()).is_none());
        assert!(journey_instant("2026-01-01", "", &ist()).is_none());
    }

    #[test]
    fn expiry_comparison_is_strict() {
        let depart = journey_instant("2026-06-01", "09:00", &ist()).unwrap();
        // Departing exactly at "now" is not yet expired.
        assert!(!(depart < depart));
        assert!(depart < depart + chrono::Duration::minutes(1));
        assert!(!(depart < depart - chrono::Duration::minutes(1)));
    }
}
