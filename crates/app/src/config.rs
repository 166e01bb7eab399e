use std::env;

use exam_core::model::UserId;

pub const DEFAULT_DB_URL: &str = "sqlite:exam.sqlite3";
pub const DEFAULT_LOG_FILTER: &str = "exam=info,services=info,storage=info";

/// Settings read from the environment after `.env` has been loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub user_id: UserId,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_url = env::var("EXAM_DB_URL").unwrap_or_else(|_| DEFAULT_DB_URL.into());
        let user_id = env::var("EXAM_USER_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| UserId::new(1), UserId::new);
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

        Self {
            db_url,
            user_id,
            rust_log,
        }
    }
}
