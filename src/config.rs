use std::env;

use chrono::FixedOffset;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    pub cors_extra_origins: Vec<String>,

    pub jwt_secret: String,
    pub jwt_access_ttl_secs: i64,
    pub jwt_refresh_ttl_secs: i64,

    pub auth_rate_limit_max_requests: u32,
    pub auth_rate_limit_window_secs: u64,

    pub signal_model_url: String,
    pub signal_model_api_key: String,
    pub signal_model_timeout_secs: u64,

    // Credit gate
    pub credit_reset_utc_offset_minutes: i32,
    pub credit_lock_timeout_ms: u64,

    pub subscription_sweep_interval_secs: u64,

    /// Phone number the payment confirmation message is addressed to.
    pub payment_contact_number: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            // Comma-separated, e.g. LAN addresses in development
            cors_extra_origins: env::var("CORS_EXTRA_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            jwt_access_ttl_secs: env::var("JWT_ACCESS_TTL_SECS")
                .unwrap_or_else(|_| "900".into())
                .parse()
                .expect("JWT_ACCESS_TTL_SECS must be a number"),
            jwt_refresh_ttl_secs: env::var("JWT_REFRESH_TTL_SECS")
                .unwrap_or_else(|_| "604800".into())
                .parse()
                .expect("JWT_REFRESH_TTL_SECS must be a number"),

            auth_rate_limit_max_requests: env::var("AUTH_RATE_LIMIT_MAX_REQUESTS")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
            auth_rate_limit_window_secs: env::var("AUTH_RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|_| "60".into())
                .parse()
                .unwrap_or(60),

            signal_model_url: env::var("SIGNAL_MODEL_URL")
                .unwrap_or_else(|_| "http://localhost:9000/v1/signals".into()),
            signal_model_api_key: env::var("SIGNAL_MODEL_API_KEY").unwrap_or_default(),
            signal_model_timeout_secs: env::var("SIGNAL_MODEL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),

            credit_reset_utc_offset_minutes: env::var("CREDIT_RESET_UTC_OFFSET_MINUTES")
                .unwrap_or_else(|_| "0".into())
                .parse()
                .expect("CREDIT_RESET_UTC_OFFSET_MINUTES must be a number"),
            credit_lock_timeout_ms: env::var("CREDIT_LOCK_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".into())
                .parse()
                .unwrap_or(2000),

            subscription_sweep_interval_secs: env::var("SUBSCRIPTION_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".into()) // 5 min
                .parse()
                .unwrap_or(300),

            payment_contact_number: env::var("PAYMENT_CONTACT_NUMBER").unwrap_or_default(),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Offset at which the daily credit counter rolls over.
    pub fn credit_rollover(&self) -> FixedOffset {
        FixedOffset::east_opt(self.credit_reset_utc_offset_minutes * 60)
            .expect("CREDIT_RESET_UTC_OFFSET_MINUTES must be within +/- 24h")
    }
}
