use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SEATS_PER_BUS: i32 = 40;

#[derive(Debug, Deserialize)]
pub struct JourneyIn {
    pub source: String,
    pub destination: String,
    pub date: String, // YYYY-MM-DD
    pub time: String, // HH:MM
    pub bus_number: String,
    #[serde(default = "default_bus_type")]
    pub bus_type: String,
    pub price_per_seat: i64,
}

fn default_bus_type() -> String {
    "Seater".to_string()
}

#[derive(Debug, Serialize, Clone)]
pub struct SeatOut {
    pub seat_no: i32,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booked_by: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct JourneyOut {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub date: String,
    pub time: String,
    pub bus_number: String,
    pub bus_type: String,
    pub price_per_seat: i64,
    pub seats_total: i32,
    pub seats_available: i32,
}

#[derive(Debug, Serialize)]
pub struct JourneyDetailOut {
    #[serde(flatten)]
    pub journey: JourneyOut,
    pub seats: Vec<SeatOut>,
}

#[derive(Debug, Deserialize)]
pub struct BookReq {
    pub user_id: String,
    pub seat_numbers: Vec<i32>,
}

#[derive(Debug, Serialize)]
pub struct BookingOut {
    pub id: String,
    pub user_id: String,
    pub journey_id: String,
    pub seat_numbers: Vec<i32>,
    pub source: String,
    pub destination: String,
    pub date: String,
    pub time: String,
    pub bus_number: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct OrderIn {
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub journey_id: String,
    pub seat_numbers: Vec<i32>,
}

#[derive(Debug, Serialize)]
pub struct OrderOut {
    pub id: String,
    pub user_id: String,
    pub journey_id: String,
    pub seat_numbers: Vec<i32>,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeReq {
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct SweepOut {
    pub scanned: u32,
    pub archived: u32,
    pub skipped: u32,
}
