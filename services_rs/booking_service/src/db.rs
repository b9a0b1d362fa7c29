use sqlx::postgres::{PgPool, PgPoolOptions};

fn table_name(schema: &Option<String>, name: &str) -> String {
    match schema {
        Some(s) => format!("{s}.{name}"),
        None => name.to_string(),
    }
}

pub async fn connect(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(db_url)
        .await
}

pub async fn ensure_schema(pool: &PgPool, db_schema: &Option<String>) -> Result<(), sqlx::Error> {
    if let Some(schema) = db_schema {
        let ddl = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
        let _ = sqlx::query(&ddl).execute(pool).await;
    }

    let journeys = table_name(db_schema, "journeys");
    let seats = table_name(db_schema, "journey_seats");
    let bookings = table_name(db_schema, "bookings");
    let orders = table_name(db_schema, "orders");
    let archived = table_name(db_schema, "archived_journeys");
    let idempotency = table_name(db_schema, "idempotency");

    let ddls = [
        format!(
            "CREATE TABLE IF NOT EXISTS {journeys} (\
             id VARCHAR(36) PRIMARY KEY,\
             source VARCHAR(120) NOT NULL,\
             destination VARCHAR(120) NOT NULL,\
             travel_date VARCHAR(10) NOT NULL,\
             depart_time VARCHAR(5) NOT NULL,\
             bus_number VARCHAR(32) NOT NULL,\
             bus_type VARCHAR(32) NOT NULL,\
             price_per_seat BIGINT NOT NULL,\
             seats_total INTEGER NOT NULL DEFAULT 40,\
             seats_available INTEGER NOT NULL,\
             created_at VARCHAR(40)\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {seats} (\
             journey_id VARCHAR(36) NOT NULL,\
             seat_no INTEGER NOT NULL,\
             available INTEGER NOT NULL DEFAULT 1,\
             booked_by VARCHAR(64),\
             booked_at VARCHAR(40),\
             PRIMARY KEY (journey_id, seat_no)\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {bookings} (\
             id VARCHAR(36) PRIMARY KEY,\
             user_id VARCHAR(64) NOT NULL,\
             journey_id VARCHAR(36) NOT NULL,\
             seat_numbers VARCHAR(512) NOT NULL,\
             source VARCHAR(120) NOT NULL,\
             destination VARCHAR(120) NOT NULL,\
             travel_date VARCHAR(10) NOT NULL,\
             depart_time VARCHAR(5) NOT NULL,\
             bus_number VARCHAR(32) NOT NULL,\
             created_at VARCHAR(40) NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {orders} (\
             id VARCHAR(36) PRIMARY KEY,\
             user_id VARCHAR(64) NOT NULL,\
             user_name VARCHAR(160),\
             user_email VARCHAR(160),\
             journey_id VARCHAR(36) NOT NULL,\
             seat_numbers VARCHAR(512) NOT NULL,\
             amount_minor BIGINT NOT NULL,\
             currency VARCHAR(8) NOT NULL,\
             status VARCHAR(16) NOT NULL,\
             payment_id VARCHAR(64),\
             payment_signature VARCHAR(128),\
             created_at VARCHAR(40) NOT NULL,\
             paid_at VARCHAR(40)\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {archived} (\
             original_id VARCHAR(36) PRIMARY KEY,\
             source VARCHAR(120) NOT NULL,\
             destination VARCHAR(120) NOT NULL,\
             travel_date VARCHAR(10) NOT NULL,\
             depart_time VARCHAR(5) NOT NULL,\
             bus_number VARCHAR(32) NOT NULL,\
             bus_type VARCHAR(32) NOT NULL,\
             price_per_seat BIGINT NOT NULL,\
             seats_total INTEGER NOT NULL,\
             seats_json TEXT NOT NULL,\
             archived_at VARCHAR(40) NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {idempotency} (\
             key VARCHAR(120) PRIMARY KEY,\
             journey_id VARCHAR(36),\
             user_id VARCHAR(64),\
             seat_numbers VARCHAR(512),\
             booking_id VARCHAR(36),\
             created_at VARCHAR(40)\
             )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_journeys_search ON {journeys} (travel_date)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_user ON {bookings} (user_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_orders_user ON {orders} (user_id)"),
    ];

    for ddl in ddls {
        sqlx::query(&ddl).execute(pool).await?;
    }
    Ok(())
}
