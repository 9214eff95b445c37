use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use corner_api::middleware::require_auth;
use corner_api::{AppState, AppStateInner, client, coach};
use corner_gateway::connection;
use corner_gateway::delivery::Delivery;
use corner_gateway::registry::Registry;

#[derive(Clone)]
struct GatewayState {
    delivery: Delivery,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corner=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("CORNER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("CORNER_DB_PATH").unwrap_or_else(|_| "corner.db".into());
    let host = std::env::var("CORNER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CORNER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(corner_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = Registry::new();
    let delivery = Delivery::new(db.clone(), registry);
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        delivery: delivery.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    // Role-scoped routers; membership is re-derived inside every handler
    let client_routes = Router::new()
        .route(
            "/client/conversations",
            get(client::list_conversations).post(client::create_conversation),
        )
        .route(
            "/client/conversations/{conversation_id}/messages",
            get(client::list_messages).post(client::send_message),
        )
        .route(
            "/client/conversations/{conversation_id}/messages/{message_id}/read",
            patch(client::mark_read),
        );

    let coach_routes = Router::new()
        .route("/coach/conversations", get(coach::list_conversations))
        .route(
            "/coach/conversations/{conversation_id}/messages",
            get(coach::list_messages).post(coach::send_message),
        )
        .route(
            "/coach/conversations/{conversation_id}/messages/{message_id}/read",
            patch(coach::mark_read),
        );

    let protected_routes = Router::new()
        .merge(client_routes)
        .merge(coach_routes)
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(GatewayState {
            delivery,
            jwt_secret,
        });

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("corner server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, state.delivery, state.jwt_secret, query.token)
    })
}
