use crate::archive;
use crate::error::{ApiError, ApiResult, BookingError};
use crate::models::*;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashSet;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const ORDER_STATUS_CREATED: &str = "created";
const ORDER_STATUS_PAID: &str = "paid";
const MINOR_UNITS_PER_MAJOR: i64 = 100;

#[derive(Debug, serde::Deserialize)]
pub struct SearchJourneysParams {
    pub source: String,
    pub destination: String,
    pub date: String, // YYYY-MM-DD
}

#[derive(Debug, serde::Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health(State(state): State<AppState>) -> axum::Json<HealthOut> {
    axum::Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "Safar Booking API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn parse_db_dt(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::internal("invalid stored timestamp"))
}

fn row_dt_opt(row: &PgRow, col: &str) -> Option<DateTime<Utc>> {
    let raw: Option<String> = row.try_get(col).unwrap_or(None);
    raw.as_deref().and_then(|s| parse_db_dt(s).ok())
}

fn encode_seat_csv(seats: &[i32]) -> String {
    seats
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_seat_csv(raw: &str) -> Vec<i32> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<i32>().ok())
        .collect()
}

/// Check a requested seat selection against a journey's seat count: must be
/// non-empty, free of duplicates, every index in [0, seats_total).
fn validate_selection(seat_numbers: &[i32], seats_total: i32) -> Result<(), BookingError> {
    if seat_numbers.is_empty() {
        return Err(BookingError::InvalidSelection(
            "seat_numbers cannot be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for sn in seat_numbers {
        if *sn < 0 || *sn >= seats_total {
            return Err(BookingError::InvalidSelection(format!(
                "seat {sn} out of range 0..{seats_total}"
            )));
        }
        if !seen.insert(*sn) {
            return Err(BookingError::InvalidSelection(format!(
                "seat {sn} listed more than once"
            )));
        }
    }
    Ok(())
}

fn unavailable_requested(requested: &[i32], unavailable: &HashSet<i32>) -> Vec<i32> {
    let mut out: Vec<i32> = requested
        .iter()
        .copied()
        .filter(|sn| unavailable.contains(sn))
        .collect();
    out.sort_unstable();
    out
}

fn order_amount_minor(seat_count: usize, price_per_seat: i64) -> i64 {
    seat_count as i64 * price_per_seat * MINOR_UNITS_PER_MAJOR
}

fn payment_signature(secret: &str, order_id: &str, payment_id: &str) -> String {
    let msg = format!("{order_id}|{payment_id}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(msg.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_payment_signature(secret: &str, order_id: &str, payment_id: &str, provided: &str) -> bool {
    use subtle::ConstantTimeEq;
    let expected = payment_signature(secret, order_id, payment_id);
    let provided = provided.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() == 1
}

fn make_in_clause(start_index: usize, n: usize) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(n);
    for i in 0..n {
        parts.push(format!("${}", start_index + i));
    }
    format!("({})", parts.join(","))
}

fn row_to_journey_out(row: &PgRow) -> JourneyOut {
    JourneyOut {
        id: row.try_get("id").unwrap_or_default(),
        source: row.try_get("source").unwrap_or_default(),
        destination: row.try_get("destination").unwrap_or_default(),
        date: row.try_get("travel_date").unwrap_or_default(),
        time: row.try_get("depart_time").unwrap_or_default(),
        bus_number: row.try_get("bus_number").unwrap_or_default(),
        bus_type: row.try_get("bus_type").unwrap_or_default(),
        price_per_seat: row.try_get("price_per_seat").unwrap_or(0),
        seats_total: row.try_get("seats_total").unwrap_or(SEATS_PER_BUS),
        seats_available: row.try_get("seats_available").unwrap_or(0),
    }
}

const JOURNEY_COLS: &str =
    "id,source,destination,travel_date,depart_time,bus_number,bus_type,price_per_seat,seats_total,seats_available";

// ---------------------------------------------------------------------------
// Journey catalog

pub async fn create_journey(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<JourneyIn>,
) -> ApiResult<axum::Json<JourneyOut>> {
    let source = body.source.trim().to_string();
    let destination = body.destination.trim().to_string();
    let bus_number = body.bus_number.trim().to_string();
    let bus_type = body.bus_type.trim().to_string();
    if source.is_empty() || destination.is_empty() {
        return Err(ApiError::bad_request("source and destination required"));
    }
    if bus_number.is_empty() {
        return Err(ApiError::bad_request("bus_number required"));
    }
    if body.price_per_seat <= 0 {
        return Err(
            ApiError::unprocessable("price_per_seat must be > 0").with_code("pricing_error")
        );
    }
    // Date and time must resolve to an instant in the canonical zone; anything
    // the archival sweep could not parse is rejected up front.
    let date = body.date.trim().to_string();
    let time = body.time.trim().to_string();
    if archive::journey_instant(&date, &time, &state.tz_offset).is_none() {
        return Err(ApiError::bad_request(
            "date must be YYYY-MM-DD and time HH:MM",
        ));
    }

    let journeys = state.table("journeys");
    let seats = state.table("journey_seats");
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin tx failed");
        ApiError::internal("database error")
    })?;
    sqlx::query(&format!(
        "INSERT INTO {journeys} (id,source,destination,travel_date,depart_time,bus_number,bus_type,price_per_seat,seats_total,seats_available,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)"
    ))
    .bind(&id)
    .bind(&source)
    .bind(&destination)
    .bind(&date)
    .bind(&time)
    .bind(&bus_number)
    .bind(&bus_type)
    .bind(body.price_per_seat)
    .bind(SEATS_PER_BUS)
    .bind(SEATS_PER_BUS)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db create_journey failed");
        ApiError::internal("database error")
    })?;

    for seat_no in 0..SEATS_PER_BUS {
        sqlx::query(&format!(
            "INSERT INTO {seats} (journey_id,seat_no,available) VALUES ($1,$2,1)"
        ))
        .bind(&id)
        .bind(seat_no)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db seat insert failed");
            ApiError::internal("database error")
        })?;
    }
    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db commit failed");
        ApiError::internal("database error")
    })?;

    Ok(axum::Json(JourneyOut {
        id,
        source,
        destination,
        date,
        time,
        bus_number,
        bus_type,
        price_per_seat: body.price_per_seat,
        seats_total: SEATS_PER_BUS,
        seats_available: SEATS_PER_BUS,
    }))
}

pub async fn list_journeys(State(state): State<AppState>) -> ApiResult<axum::Json<Vec<JourneyOut>>> {
    let journeys = state.table("journeys");
    let rows = sqlx::query(&format!(
        "SELECT {JOURNEY_COLS} FROM {journeys} ORDER BY travel_date,depart_time"
    ))
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db list_journeys failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(rows.iter().map(row_to_journey_out).collect()))
}

pub async fn search_journeys(
    State(state): State<AppState>,
    Query(params): Query<SearchJourneysParams>,
) -> ApiResult<axum::Json<Vec<JourneyOut>>> {
    let date = params.date.trim();
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("invalid date (YYYY-MM-DD)"))?;

    let journeys = state.table("journeys");
    let rows = sqlx::query(&format!(
        "SELECT {JOURNEY_COLS} FROM {journeys} \
         WHERE LOWER(source)=LOWER($1) AND LOWER(destination)=LOWER($2) AND travel_date=$3 \
         ORDER BY depart_time"
    ))
    .bind(params.source.trim())
    .bind(params.destination.trim())
    .bind(date)
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db search_journeys failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(rows.iter().map(row_to_journey_out).collect()))
}

pub async fn journey_detail(
    Path(journey_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<JourneyDetailOut>> {
    let journeys = state.table("journeys");
    let seats = state.table("journey_seats");

    let row = sqlx::query(&format!(
        "SELECT {JOURNEY_COLS} FROM {journeys} WHERE id=$1"
    ))
    .bind(journey_id.trim())
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db journey lookup failed");
        ApiError::internal("database error")
    })?
    .ok_or_else(|| ApiError::not_found("journey not found").with_code("journey_not_found"))?;

    let seat_rows = sqlx::query(&format!(
        "SELECT seat_no,available,booked_by FROM {seats} WHERE journey_id=$1 ORDER BY seat_no"
    ))
    .bind(journey_id.trim())
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db seats lookup failed");
        ApiError::internal("database error")
    })?;

    let seats_out: Vec<SeatOut> = seat_rows
        .iter()
        .map(|r| SeatOut {
            seat_no: r.try_get("seat_no").unwrap_or(0),
            available: r.try_get::<i32, _>("available").unwrap_or(0) != 0,
            booked_by: r.try_get("booked_by").unwrap_or(None),
        })
        .collect();

    Ok(axum::Json(JourneyDetailOut {
        journey: row_to_journey_out(&row),
        seats: seats_out,
    }))
}

pub async fn delete_journey(
    Path(journey_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<serde_json::Value>> {
    let journeys = state.table("journeys");
    let seats = state.table("journey_seats");

    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin tx failed");
        ApiError::internal("database error")
    })?;
    let _ = sqlx::query(&format!("DELETE FROM {seats} WHERE journey_id=$1"))
        .bind(journey_id.trim())
        .execute(&mut *tx)
        .await;
    let res = sqlx::query(&format!("DELETE FROM {journeys} WHERE id=$1"))
        .bind(journey_id.trim())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db delete_journey failed");
            ApiError::internal("database error")
        })?;
    if res.rows_affected() == 0 {
        tx.rollback().await.ok();
        return Err(ApiError::not_found("journey not found").with_code("journey_not_found"));
    }
    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db commit failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(serde_json::json!({ "deleted": journey_id })))
}

// ---------------------------------------------------------------------------
// Booking committer

pub async fn book_journey(
    Path(journey_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<BookReq>,
) -> ApiResult<axum::Json<BookingOut>> {
    let journey_id = journey_id.trim().to_string();
    if journey_id.is_empty() {
        return Err(ApiError::bad_request("journey_id required"));
    }
    let user_id = body.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("user_id required"));
    }

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(k) = idempotency_key.as_deref() {
        if k.len() > 120 {
            return Err(ApiError::bad_request("Idempotency-Key too long"));
        }
    }

    let seat_csv = encode_seat_csv(&body.seat_numbers);
    let idempotency = state.table("idempotency");

    // Replay detection: a key already bound to a booking returns that booking;
    // a key reused with different parameters is rejected.
    if let Some(ikey) = idempotency_key.as_deref() {
        let row = sqlx::query(&format!(
            "SELECT journey_id,user_id,seat_numbers,booking_id FROM {idempotency} WHERE key=$1"
        ))
        .bind(ikey)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db idempotency lookup failed");
            ApiError::internal("database error")
        })?;

        if let Some(idem) = row {
            let idem_journey: Option<String> = idem.try_get("journey_id").unwrap_or(None);
            let idem_user: Option<String> = idem.try_get("user_id").unwrap_or(None);
            let idem_seats: Option<String> = idem.try_get("seat_numbers").unwrap_or(None);
            if idem_journey.as_deref().unwrap_or("") != journey_id
                || idem_user.as_deref().unwrap_or("") != user_id
                || idem_seats.as_deref().unwrap_or("") != seat_csv
            {
                return Err(ApiError::conflict(
                    "Idempotency-Key reused with different parameters",
                ));
            }
            if let Some(bid) = idem.try_get::<Option<String>, _>("booking_id").unwrap_or(None) {
                let out = booking_out(&state, &bid).await?;
                return Ok(axum::Json(out));
            }
        } else {
            // Best-effort insert. If it races, the primary key will trip and
            // the next request re-reads.
            let _ = sqlx::query(&format!(
                "INSERT INTO {idempotency} (key,journey_id,user_id,seat_numbers,created_at) VALUES ($1,$2,$3,$4,$5)"
            ))
            .bind(ikey)
            .bind(&journey_id)
            .bind(&user_id)
            .bind(&seat_csv)
            .bind(Utc::now().to_rfc3339())
            .execute(&state.pool)
            .await;
        }
    }

    let booking_id = match tokio::time::timeout(
        state.commit_timeout,
        commit_booking(&state, &journey_id, &user_id, &body.seat_numbers),
    )
    .await
    {
        Ok(res) => res.map_err(ApiError::from)?,
        Err(_) => return Err(ApiError::from(BookingError::Timeout)),
    };

    if let Some(ikey) = idempotency_key.as_deref() {
        let _ = sqlx::query(&format!(
            "UPDATE {idempotency} SET booking_id=$1 WHERE key=$2"
        ))
        .bind(&booking_id)
        .bind(ikey)
        .execute(&state.pool)
        .await;
    }

    let out = booking_out(&state, &booking_id).await?;
    Ok(axum::Json(out))
}

/// Mark the requested seats unavailable and record the booking, all inside one
/// transaction. The journey row and the requested seat rows are locked first,
/// so two overlapping requests serialize and the loser observes the winner's
/// writes before deciding.
async fn commit_booking(
    state: &AppState,
    journey_id: &str,
    user_id: &str,
    seat_numbers: &[i32],
) -> Result<String, BookingError> {
    let journeys = state.table("journeys");
    let seats = state.table("journey_seats");
    let bookings = state.table("bookings");

    let mut tx = state.pool.begin().await?;

    let journey = sqlx::query(&format!(
        "SELECT source,destination,travel_date,depart_time,bus_number,seats_total,seats_available \
         FROM {journeys} WHERE id=$1 FOR UPDATE"
    ))
    .bind(journey_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BookingError::JourneyNotFound)?;

    let seats_total: i32 = journey.try_get("seats_total").unwrap_or(SEATS_PER_BUS);
    validate_selection(seat_numbers, seats_total)?;

    let in_clause = make_in_clause(2, seat_numbers.len());
    let lock_sql = format!(
        "SELECT seat_no,available FROM {seats} WHERE journey_id=$1 AND seat_no IN {in_clause} FOR UPDATE"
    );
    let mut q = sqlx::query(&lock_sql).bind(journey_id);
    for sn in seat_numbers {
        q = q.bind(*sn);
    }
    let seat_rows = q.fetch_all(&mut *tx).await?;
    if seat_rows.len() != seat_numbers.len() {
        let found: HashSet<i32> = seat_rows
            .iter()
            .filter_map(|r| r.try_get("seat_no").ok())
            .collect();
        let missing: Vec<String> = seat_numbers
            .iter()
            .filter(|sn| !found.contains(*sn))
            .map(|sn| sn.to_string())
            .collect();
        return Err(BookingError::InvalidSelection(format!(
            "unknown seats: {}",
            missing.join(",")
        )));
    }

    let taken: HashSet<i32> = seat_rows
        .iter()
        .filter(|r| r.try_get::<i32, _>("available").unwrap_or(0) == 0)
        .filter_map(|r| r.try_get("seat_no").ok())
        .collect();
    let conflicts = unavailable_requested(seat_numbers, &taken);
    if !conflicts.is_empty() {
        return Err(BookingError::SeatConflict(conflicts));
    }

    let now = Utc::now();
    let upd_sql = format!(
        "UPDATE {seats} SET available=0, booked_by=$1, booked_at=$2 WHERE journey_id=$3 AND seat_no IN {}",
        make_in_clause(4, seat_numbers.len())
    );
    let mut q = sqlx::query(&upd_sql)
        .bind(user_id)
        .bind(now.to_rfc3339())
        .bind(journey_id);
    for sn in seat_numbers {
        q = q.bind(*sn);
    }
    q.execute(&mut *tx).await?;

    let seats_available: i32 = journey.try_get("seats_available").unwrap_or(0);
    let new_avail = (seats_available - seat_numbers.len() as i32).max(0);
    sqlx::query(&format!(
        "UPDATE {journeys} SET seats_available=$1 WHERE id=$2"
    ))
    .bind(new_avail)
    .bind(journey_id)
    .execute(&mut *tx)
    .await?;

    let booking_id = Uuid::new_v4().to_string();
    sqlx::query(&format!(
        "INSERT INTO {bookings} (id,user_id,journey_id,seat_numbers,source,destination,travel_date,depart_time,bus_number,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)"
    ))
    .bind(&booking_id)
    .bind(user_id)
    .bind(journey_id)
    .bind(encode_seat_csv(seat_numbers))
    .bind(journey.try_get::<String, _>("source").unwrap_or_default())
    .bind(journey.try_get::<String, _>("destination").unwrap_or_default())
    .bind(journey.try_get::<String, _>("travel_date").unwrap_or_default())
    .bind(journey.try_get::<String, _>("depart_time").unwrap_or_default())
    .bind(journey.try_get::<String, _>("bus_number").unwrap_or_default())
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(booking_id)
}

async fn booking_out(state: &AppState, booking_id: &str) -> Result<BookingOut, ApiError> {
    let bookings = state.table("bookings");
    let row = sqlx::query(&format!(
        "SELECT id,user_id,journey_id,seat_numbers,source,destination,travel_date,depart_time,bus_number,created_at \
         FROM {bookings} WHERE id=$1"
    ))
    .bind(booking_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db booking lookup failed");
        ApiError::internal("database error")
    })?
    .ok_or_else(|| ApiError::not_found("booking not found"))?;

    Ok(row_to_booking_out(&row))
}

fn row_to_booking_out(row: &PgRow) -> BookingOut {
    BookingOut {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("user_id").unwrap_or_default(),
        journey_id: row.try_get("journey_id").unwrap_or_default(),
        seat_numbers: parse_seat_csv(&row.try_get::<String, _>("seat_numbers").unwrap_or_default()),
        source: row.try_get("source").unwrap_or_default(),
        destination: row.try_get("destination").unwrap_or_default(),
        date: row.try_get("travel_date").unwrap_or_default(),
        time: row.try_get("depart_time").unwrap_or_default(),
        bus_number: row.try_get("bus_number").unwrap_or_default(),
        created_at: row_dt_opt(row, "created_at"),
    }
}

pub async fn user_bookings(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<Vec<BookingOut>>> {
    let bookings = state.table("bookings");
    let rows = sqlx::query(&format!(
        "SELECT id,user_id,journey_id,seat_numbers,source,destination,travel_date,depart_time,bus_number,created_at \
         FROM {bookings} WHERE user_id=$1 ORDER BY created_at DESC"
    ))
    .bind(user_id.trim())
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db user_bookings failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(rows.iter().map(row_to_booking_out).collect()))
}

// ---------------------------------------------------------------------------
// Payment order bridge

pub async fn create_order(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<OrderIn>,
) -> ApiResult<axum::Json<OrderOut>> {
    let user_id = body.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("user_id required"));
    }
    let journey_id = body.journey_id.trim().to_string();

    let journeys = state.table("journeys");
    let journey = sqlx::query(&format!(
        "SELECT price_per_seat,seats_total FROM {journeys} WHERE id=$1"
    ))
    .bind(&journey_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db order journey lookup failed");
        ApiError::internal("database error")
    })?
    .ok_or_else(|| ApiError::from(BookingError::JourneyNotFound))?;

    let seats_total: i32 = journey.try_get("seats_total").unwrap_or(SEATS_PER_BUS);
    validate_selection(&body.seat_numbers, seats_total).map_err(ApiError::from)?;

    let price_per_seat: i64 = journey.try_get("price_per_seat").unwrap_or(0);
    if price_per_seat <= 0 {
        return Err(ApiError::from(BookingError::Pricing));
    }
    let amount_minor = order_amount_minor(body.seat_numbers.len(), price_per_seat);

    let orders = state.table("orders");
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let user_name = body
        .user_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let user_email = body
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    sqlx::query(&format!(
        "INSERT INTO {orders} (id,user_id,user_name,user_email,journey_id,seat_numbers,amount_minor,currency,status,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)"
    ))
    .bind(&id)
    .bind(&user_id)
    .bind(&user_name)
    .bind(&user_email)
    .bind(&journey_id)
    .bind(encode_seat_csv(&body.seat_numbers))
    .bind(amount_minor)
    .bind(&state.currency)
    .bind(ORDER_STATUS_CREATED)
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db create_order failed");
        ApiError::internal("database error")
    })?;

    Ok(axum::Json(OrderOut {
        id,
        user_id,
        journey_id,
        seat_numbers: body.seat_numbers,
        amount_minor,
        currency: state.currency.clone(),
        status: ORDER_STATUS_CREATED.to_string(),
        user_name,
        user_email,
        payment_id: None,
        created_at: Some(now),
        paid_at: None,
    }))
}

fn row_to_order_out(row: &PgRow) -> OrderOut {
    OrderOut {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("user_id").unwrap_or_default(),
        journey_id: row.try_get("journey_id").unwrap_or_default(),
        seat_numbers: parse_seat_csv(&row.try_get::<String, _>("seat_numbers").unwrap_or_default()),
        amount_minor: row.try_get("amount_minor").unwrap_or(0),
        currency: row.try_get("currency").unwrap_or_default(),
        status: row.try_get("status").unwrap_or_default(),
        user_name: row.try_get("user_name").unwrap_or(None),
        user_email: row.try_get("user_email").unwrap_or(None),
        payment_id: row.try_get("payment_id").unwrap_or(None),
        created_at: row_dt_opt(row, "created_at"),
        paid_at: row_dt_opt(row, "paid_at"),
    }
}

const ORDER_COLS: &str = "id,user_id,user_name,user_email,journey_id,seat_numbers,amount_minor,currency,status,payment_id,created_at,paid_at";

pub async fn get_order(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<OrderOut>> {
    let orders = state.table("orders");
    let row = sqlx::query(&format!("SELECT {ORDER_COLS} FROM {orders} WHERE id=$1"))
        .bind(order_id.trim())
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db order lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("order not found"))?;
    Ok(axum::Json(row_to_order_out(&row)))
}

/// Callback target for the external checkout flow. The payment id and
/// signature arrive from the client and are treated as untrusted: the
/// signature must match HMAC-SHA256("{order_id}|{payment_id}") under the
/// checkout key secret before the order transitions to paid. Replays of an
/// already-paid order return it unchanged.
pub async fn finalize_order(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
    axum::Json(body): axum::Json<FinalizeReq>,
) -> ApiResult<axum::Json<OrderOut>> {
    let order_id = order_id.trim().to_string();
    let payment_id = body.payment_id.trim().to_string();
    let signature = body.signature.trim().to_string();
    if payment_id.is_empty() || signature.is_empty() {
        return Err(ApiError::bad_request("payment_id and signature required"));
    }

    let orders = state.table("orders");
    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin tx failed");
        ApiError::internal("database error")
    })?;

    let row = sqlx::query(&format!(
        "SELECT {ORDER_COLS} FROM {orders} WHERE id=$1 FOR UPDATE"
    ))
    .bind(&order_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db finalize order lookup failed");
        ApiError::internal("database error")
    })?
    .ok_or_else(|| ApiError::not_found("order not found"))?;

    let status: String = row.try_get("status").unwrap_or_default();
    if status == ORDER_STATUS_PAID {
        // At-least-once callback delivery: keep the first payment identifiers.
        tx.rollback().await.ok();
        return Ok(axum::Json(row_to_order_out(&row)));
    }

    if !verify_payment_signature(&state.checkout_key_secret, &order_id, &payment_id, &signature) {
        tx.rollback().await.ok();
        tracing::warn!(order_id = %order_id, "payment signature rejected");
        return Err(ApiError::from(BookingError::PaymentVerificationFailed));
    }

    let now = Utc::now();
    sqlx::query(&format!(
        "UPDATE {orders} SET status=$1, payment_id=$2, payment_signature=$3, paid_at=$4 WHERE id=$5"
    ))
    .bind(ORDER_STATUS_PAID)
    .bind(&payment_id)
    .bind(&signature)
    .bind(now.to_rfc3339())
    .bind(&order_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db finalize order update failed");
        ApiError::internal("database error")
    })?;
    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db commit failed");
        ApiError::internal("database error")
    })?;

    let row = sqlx::query(&format!("SELECT {ORDER_COLS} FROM {orders} WHERE id=$1"))
        .bind(&order_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db order readback failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::internal("order finalize readback failed"))?;
    Ok(axum::Json(row_to_order_out(&row)))
}

// ---------------------------------------------------------------------------
// Archival trigger (internal; the scheduler calls this on a fixed cadence)

pub async fn archive_run(State(state): State<AppState>) -> ApiResult<axum::Json<SweepOut>> {
    let stats = archive::run_sweep(&state, Utc::now()).await?;
    Ok(axum::Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_csv_round_trips_in_order() {
        assert_eq!(encode_seat_csv(&[0, 7, 39]), "0,7,39");
        assert_eq!(parse_seat_csv("0,7,39"), vec![0, 7, 39]);
        assert_eq!(parse_seat_csv(""), Vec::<i32>::new());
    }

    #[test]
    fn selection_rejects_empty_duplicate_and_out_of_range() {
        assert!(matches!(
            validate_selection(&[], 40),
            Err(BookingError::InvalidSelection(_))
        ));
        assert!(matches!(
            validate_selection(&[1, 1], 40),
            Err(BookingError::InvalidSelection(_))
        ));
        assert!(matches!(
            validate_selection(&[40], 40),
            Err(BookingError::InvalidSelection(_))
        ));
        assert!(matches!(
            validate_selection(&[-1], 40),
            Err(BookingError::InvalidSelection(_))
        ));
        assert!(validate_selection(&[0, 1, 39], 40).is_ok());
    }

    #[test]
    fn conflicts_name_only_requested_unavailable_seats() {
        let taken: HashSet<i32> = [1, 5, 9].into_iter().collect();
        assert_eq!(unavailable_requested(&[1, 2], &taken), vec![1]);
        assert_eq!(unavailable_requested(&[2, 3], &taken), Vec::<i32>::new());
        assert_eq!(unavailable_requested(&[9, 5, 1], &taken), vec![1, 5, 9]);
    }

    #[test]
    fn amount_is_seats_times_price_in_minor_units() {
        // price 500, two seats -> 100000 minor units.
        assert_eq!(order_amount_minor(2, 500), 100_000);
        assert_eq!(order_amount_minor(1, 1), 100);
    }

    #[test]
    fn payment_signature_verifies_and_rejects_tampering() {
        let sig = payment_signature("key-secret", "order-1", "pay-1");
        assert_eq!(sig.len(), 64);
        assert!(verify_payment_signature("key-secret", "order-1", "pay-1", &sig));
        assert!(verify_payment_signature(
            "key-secret",
            "order-1",
            "pay-1",
            &sig.to_uppercase()
        ));
        assert!(!verify_payment_signature("key-secret", "order-1", "pay-2", &sig));
        assert!(!verify_payment_signature("other-secret", "order-1", "pay-1", &sig));
        assert!(!verify_payment_signature("key-secret", "order-1", "pay-1", "deadbeef"));
    }

    #[test]
    fn in_clause_numbering_continues_from_start_index() {
        assert_eq!(make_in_clause(2, 3), "($2,$3,$4)");
        assert_eq!(make_in_clause(1, 1), "($1)");
    }
}
