pub mod client;
pub mod coach;
pub mod error;
pub mod middleware;

use std::sync::Arc;

use serde::Deserialize;

use corner_db::Database;
use corner_gateway::delivery::Delivery;

pub type AppState = Arc<AppStateInner>;

/// Shared state for the REST facade.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub delivery: Delivery,
    pub jwt_secret: String,
}

/// Run a blocking store call off the async runtime, mapping failures to
/// the REST taxonomy.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, error::ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| error::ApiError::Internal(format!("blocking task join error: {e}")))?
        .map_err(|e| error::ApiError::Internal(e.to_string()))
}

/// Query parameters for message listings, shared by both role-scoped
/// routers.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor pagination: message id from the previous page; only
    /// strictly older rows come back.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}
