use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod db;
mod dto;
mod error;
mod handlers;
mod models;
mod services;

use auth::rate_limit::RateLimitState;
use config::Config;
use db::PgCreditStore;
use services::credits::CreditPolicy;
use services::signal_model::HttpSignalModel;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub rate_limiter: RateLimitState,
    pub policy: Arc<CreditPolicy>,
    pub credit_store: PgCreditStore,
    pub signal_model: Arc<HttpSignalModel>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signalgate_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    let db = db::create_pool(&config.database_url, config.credit_lock_timeout_ms).await;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations applied");

    let policy = Arc::new(CreditPolicy::standard(config.credit_rollover()));
    let signal_model =
        Arc::new(HttpSignalModel::new(&config).expect("Failed to build signal model client"));

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        rate_limiter: RateLimitState::new(
            config.auth_rate_limit_max_requests,
            config.auth_rate_limit_window_secs,
        ),
        policy: policy.clone(),
        credit_store: PgCreditStore::new(db.clone(), config.credit_lock_timeout_ms),
        signal_model,
    };

    let auth_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit::rate_limit_auth,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route("/api/tiers", get(handlers::subscription::list_tiers))
        .merge(auth_routes);

    let protected_routes = Router::new()
        .route("/api/me", get(handlers::auth::me))
        .route("/api/auth/logout", post(handlers::auth::logout))
        // Signals
        .route("/api/signal-generation", post(handlers::signals::generate_signal))
        .route("/api/signals", get(handlers::signals::list_signals))
        .route("/api/signals/:id/outcome", put(handlers::signals::report_outcome))
        // Subscription & credits
        .route("/api/subscription", get(handlers::subscription::get_subscription))
        .route("/api/credits", get(handlers::subscription::get_credits))
        .route("/api/pricing", get(handlers::payments::get_pricing))
        .route(
            "/api/payment-requests",
            get(handlers::payments::list_payment_requests)
                .post(handlers::payments::create_payment_request),
        )
        // Review challenge
        .route("/api/challenge", get(handlers::challenge::get_challenge))
        .route(
            "/api/challenge/discount/claim",
            post(handlers::challenge::claim_discount),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    // Layers run bottom-up: authenticate, then check the admin tier.
    let admin_routes = Router::new()
        .route(
            "/api/admin/payment-requests",
            get(handlers::admin::list_payment_requests),
        )
        .route(
            "/api/admin/payment-requests/:id/confirm",
            post(handlers::admin::confirm_payment),
        )
        .route(
            "/api/admin/payment-requests/:id/cancel",
            post(handlers::admin::cancel_payment),
        )
        .route(
            "/api/admin/signals/:id/status",
            put(handlers::admin::update_signal_status),
        )
        .route(
            "/api/admin/users/:id/discount/consume",
            post(handlers::admin::consume_discount),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_admin,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let allowed_origins: Vec<HeaderValue> = std::iter::once(&config.frontend_url)
        .chain(config.cors_extra_origins.iter())
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    services::subscription::spawn_downgrade_sweeper(
        db,
        policy,
        config.subscription_sweep_interval_secs,
    );
    auth::rate_limit::spawn_rate_limit_pruner(state.rate_limiter.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listen address");
    // Client IP is needed for rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .expect("Server error");
}
