use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::engine::relay::ChatRelay;

use super::rate_limit::ApiRateLimiters;

/// Shared application state passed to all axum handlers.
pub struct AppState {
    pub relay: Arc<ChatRelay>,
    pub db: SqlitePool,
    pub config: ServerConfig,
    pub limiters: Arc<ApiRateLimiters>,
    /// Fired on shutdown; open sockets close and run their disconnect path.
    pub shutdown: CancellationToken,
}
