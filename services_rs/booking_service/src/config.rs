use chrono::FixedOffset;
use regex::Regex;
use safar_common::secret_policy;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,

    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,

    pub db_url: String,
    pub db_schema: Option<String>,

    pub checkout_key_secret: String,
    pub currency: String,

    pub require_internal_secret: bool,
    pub internal_secret: Option<String>,
    pub internal_allowed_callers: Vec<String>,

    pub allowed_origins: Vec<String>,

    // Canonical zone for combining a journey's date and time into an instant.
    pub tz_offset: FixedOffset,
    pub archive_sweep_secs: u64,
    pub commit_timeout: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn normalize_db_url(raw: &str) -> String {
    // Accept SQLAlchemy-style URLs like "postgresql+psycopg://..." by dropping
    // the "+driver" portion.
    if let Some(colon) = raw.find(':') {
        let (scheme, rest) = raw.split_at(colon);
        if let Some(plus) = scheme.find('+') {
            return format!("{}{}", &scheme[..plus], rest);
        }
    }
    raw.to_string()
}

fn validate_postgres_url(url: &str) -> Result<(), String> {
    let scheme = url
        .split_once(':')
        .map(|(s, _)| s.trim().to_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(()),
        _ => Err("BOOKING_DB_URL (or DB_URL) must be a postgres URL".to_string()),
    }
}

fn parse_required_bool_like(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    if v.is_empty() {
        return None;
    }
    if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        Some(true)
    }
}

/// Parse an offset like "+05:30" or "-03:00" into a fixed zone.
pub fn parse_tz_offset(raw: &str) -> Result<FixedOffset, String> {
    let raw = raw.trim();
    let err = || format!("BOOKING_TZ_OFFSET must look like +05:30, got {raw:?}");
    let (sign, rest) = if let Some(r) = raw.strip_prefix('+') {
        (1i32, r)
    } else if let Some(r) = raw.strip_prefix('-') {
        (-1i32, r)
    } else {
        return Err(err());
    };
    let (hh, mm) = rest.split_once(':').ok_or_else(err)?;
    let hours: i32 = hh.parse().map_err(|_| err())?;
    let minutes: i32 = mm.parse().map_err(|_| err())?;
    if hours > 14 || minutes > 59 {
        return Err(err());
    }
    let secs = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(secs).ok_or_else(err)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("ENV", "dev");

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "8084")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let db_raw = env_opt("BOOKING_DB_URL")
            .or_else(|| env_opt("DB_URL"))
            .unwrap_or_else(|| "postgresql://safar:safar@db:5432/safar_booking".to_string());
        let db_url = normalize_db_url(&db_raw);
        validate_postgres_url(&db_url)?;

        let db_schema = env_opt("DB_SCHEMA");
        if let Some(s) = &db_schema {
            let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| e.to_string())?;
            if !re.is_match(s) {
                return Err("DB_SCHEMA must match ^[A-Za-z_][A-Za-z0-9_]*$".to_string());
            }
        }

        let prod_like = secret_policy::is_production_like(&env_name);

        let checkout_key_secret = env_or("CHECKOUT_KEY_SECRET", "change-me-checkout-key");
        secret_policy::enforce_value_policy_for_env(
            &env_name,
            "CHECKOUT_KEY_SECRET",
            Some(checkout_key_secret.as_str()),
            true,
        )?;

        let currency = env_or("BOOKING_CURRENCY", "INR").trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err("BOOKING_CURRENCY must be a 3-letter code".to_string());
        }

        let require_internal_secret = {
            let raw = env_or("BOOKING_REQUIRE_INTERNAL_SECRET", "");
            match parse_required_bool_like(&raw) {
                Some(v) => v,
                None => prod_like,
            }
        };
        if prod_like && !require_internal_secret {
            return Err("BOOKING_REQUIRE_INTERNAL_SECRET must be true in prod/staging".to_string());
        }

        let internal_secret = env_opt("BOOKING_INTERNAL_SECRET");
        if require_internal_secret && internal_secret.as_deref().unwrap_or("").is_empty() {
            return Err(
                "BOOKING_INTERNAL_SECRET must be set when BOOKING_REQUIRE_INTERNAL_SECRET is enabled"
                    .to_string(),
            );
        }
        secret_policy::enforce_value_policy_for_env(
            &env_name,
            "BOOKING_INTERNAL_SECRET",
            internal_secret.as_deref(),
            false,
        )?;

        let internal_allowed_callers =
            parse_csv(&env_or("BOOKING_INTERNAL_ALLOWED_CALLERS", ""))
                .into_iter()
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>();

        let mut allowed_origins = parse_csv(&env_or("ALLOWED_ORIGINS", ""));
        if allowed_origins.is_empty() {
            // Safe local default for development.
            allowed_origins = vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ];
        }
        if prod_like && allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err("ALLOWED_ORIGINS must not contain '*' in prod/staging".to_string());
        }

        let max_body_bytes: usize = env_or("BOOKING_MAX_BODY_BYTES", "1048576")
            .parse()
            .map_err(|_| "BOOKING_MAX_BODY_BYTES must be an integer".to_string())?;
        let max_body_bytes = max_body_bytes.clamp(16 * 1024, 10 * 1024 * 1024);

        let tz_offset = parse_tz_offset(&env_or("BOOKING_TZ_OFFSET", "+05:30"))?;

        let archive_sweep_secs: u64 = env_or("ARCHIVE_SWEEP_SECS", "3600")
            .parse()
            .map_err(|_| "ARCHIVE_SWEEP_SECS must be an integer (0 disables)".to_string())?;

        let commit_timeout_ms: u64 = env_or("BOOKING_COMMIT_TIMEOUT_MS", "5000")
            .parse()
            .map_err(|_| "BOOKING_COMMIT_TIMEOUT_MS must be an integer".to_string())?;
        let commit_timeout = Duration::from_millis(commit_timeout_ms.clamp(100, 60_000));

        Ok(Self {
            env_name,
            host,
            port,
            max_body_bytes,
            db_url,
            db_schema,
            checkout_key_secret,
            currency,
            require_internal_secret,
            internal_secret,
            internal_allowed_callers,
            allowed_origins,
            tz_offset,
            archive_sweep_secs,
            commit_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tz_offset_parses_common_zones() {
        assert_eq!(
            parse_tz_offset("+05:30").unwrap().local_minus_utc(),
            5 * 3600 + 30 * 60
        );
        assert_eq!(
            parse_tz_offset("-03:00").unwrap().local_minus_utc(),
            -3 * 3600
        );
        assert_eq!(parse_tz_offset("+00:00").unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn tz_offset_rejects_garbage() {
        assert!(parse_tz_offset("").is_err());
        assert!(parse_tz_offset("0530").is_err());
        assert!(parse_tz_offset("+5:3x").is_err());
        assert!(parse_tz_offset("+15:00").is_err());
    }

    #[test]
    fn db_url_normalization_strips_driver() {
        assert_eq!(
            normalize_db_url("postgresql+psycopg://u:p@h/db"),
            "postgresql://u:p@h/db"
        );
        assert_eq!(
            normalize_db_url("postgres://u:p@h/db"),
            "postgres://u:p@h/db"
        );
        assert!(validate_postgres_url("mysql://u@h/db").is_err());
    }
}
