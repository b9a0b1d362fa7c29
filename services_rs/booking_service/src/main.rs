mod archive;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod state;

use axum::extract::MatchedPath;
use axum::http::{header, header::HeaderName, Method, StatusCode};
use axum::routing::{delete, get, post};
use axum::Router;
use config::Config;
use safar_common::internal_auth::InternalAuthLayer;
use safar_common::request_id::RequestIdLayer;
use state::AppState;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let pool = match db::connect(&cfg.db_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "db connect failed");
            std::process::exit(2);
        }
    };
    if let Err(e) = db::ensure_schema(&pool, &cfg.db_schema).await {
        tracing::error!(error = %e, "db ensure_schema failed");
        std::process::exit(2);
    }

    let state = AppState {
        pool,
        db_schema: cfg.db_schema.clone(),
        env_name: cfg.env_name.clone(),
        checkout_key_secret: cfg.checkout_key_secret.clone(),
        currency: cfg.currency.clone(),
        tz_offset: cfg.tz_offset,
        commit_timeout: cfg.commit_timeout,
    };

    if cfg.archive_sweep_secs > 0 {
        archive::spawn_sweeper(state.clone(), Duration::from_secs(cfg.archive_sweep_secs));
    }

    let internal = InternalAuthLayer::new(cfg.require_internal_secret, cfg.internal_secret.clone())
        .with_allowed_callers(cfg.internal_allowed_callers.clone());

    let admin = Router::new()
        .route("/admin/journeys", post(handlers::create_journey))
        .route(
            "/admin/journeys/:journey_id",
            delete(handlers::delete_journey),
        )
        .route("/internal/archive/run", post(handlers::archive_run))
        .layer(internal);

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/journeys", get(handlers::list_journeys))
        .route("/journeys/search", get(handlers::search_journeys))
        .route("/journeys/:journey_id", get(handlers::journey_detail))
        .route("/journeys/:journey_id/book", post(handlers::book_journey))
        .route("/users/:user_id/bookings", get(handlers::user_bookings))
        .route("/orders", post(handlers::create_order))
        .route("/orders/:order_id", get(handlers::get_order))
        .route("/orders/:order_id/finalize", post(handlers::finalize_order))
        .merge(admin)
        // Ensure unknown routes return 404, not auth middleware fallback details.
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
        .layer(build_cors(&cfg))
        .layer(RequestBodyLimitLayer::new(cfg.max_body_bytes))
        // Log the matched route template when available, never the query string.
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or_else(|| req.uri().path());
                tracing::span!(
                    tracing::Level::INFO,
                    "http_request",
                    method = %req.method(),
                    path = %path
                )
            }),
        )
        .layer(RequestIdLayer::new(HeaderName::from_static("x-request-id")));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
    tracing::info!(%addr, "starting safar_booking_service");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn build_cors(cfg: &Config) -> CorsLayer {
    if cfg.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            .allow_credentials(false)
    } else {
        let origins: Vec<axum::http::HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            // No cookie or session credentials are expected from the browser.
            .allow_credentials(false)
            .allow_origin(AllowOrigin::list(origins))
    }
}

fn booking_cors_allowed_headers() -> Vec<HeaderName> {
    vec![
        header::ACCEPT,
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        HeaderName::from_static("x-request-id"),
        HeaderName::from_static("idempotency-key"),
    ]
}

#[cfg(test)]
mod router_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    #[tokio::test]
    async fn unknown_routes_return_404_not_internal_auth_required() {
        let internal = InternalAuthLayer::new(true, Some("test-secret".to_string()));
        let admin = Router::new()
            .route("/admin/journeys", get(ok_handler))
            .layer(internal);

        let app = Router::new()
            .route("/health", get(ok_handler))
            .merge(admin)
            .fallback(|| async { StatusCode::NOT_FOUND });

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/does_not_exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_routes_refuse_without_secret() {
        let internal = InternalAuthLayer::new(true, Some("test-secret".to_string()));
        let admin = Router::new()
            .route("/admin/journeys", get(ok_handler))
            .layer(internal);
        let app = Router::new().route("/health", get(ok_handler)).merge(admin);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/journeys")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // Health stays open.
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn cors_whitelist_excludes_internal_headers() {
        let headers = booking_cors_allowed_headers();
        let has = |name: &str| {
            headers
                .iter()
                .any(|h| h.as_str().eq_ignore_ascii_case(name))
        };

        assert!(has("content-type"));
        assert!(has("x-request-id"));
        assert!(has("idempotency-key"));

        assert!(!has("x-internal-secret"));
        assert!(!has("x-internal-service-id"));
        assert!(!has("cookie"));
    }
}
