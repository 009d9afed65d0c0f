//! Huddle server entry point.

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware, routing::get};
use huddle_api::{DeliveryRegistry, middleware::AppState, router as api_router, streaming_handler};
use huddle_common::Config;
use huddle_core::ConversationService;
use huddle_db::repositories::{
    ConversationRepository, MessageRepository, ReadStatusRepository, UserRepository,
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting huddle server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = Arc::new(huddle_db::init(&config).await?);
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    huddle_db::migrate(&db).await?;
    info!("Migrations completed");

    // Create repositories
    let conversation_repo = ConversationRepository::new(db.clone());
    let message_repo = MessageRepository::new(db.clone());
    let read_status_repo = ReadStatusRepository::new(db.clone());
    let user_repo = UserRepository::new(db);

    // Live delivery registry, shared between the WS handler and the service
    let delivery = DeliveryRegistry::new(
        config.delivery.session_queue,
        Duration::from_secs(config.delivery.stale_after_secs),
    );

    // Wire services
    let mut conversation_service = ConversationService::new(
        conversation_repo,
        message_repo,
        read_status_repo,
        user_repo.clone(),
    );
    conversation_service.set_delivery_publisher(Arc::new(delivery.clone()));

    let state = AppState {
        conversation_service,
        user_repo,
        delivery,
    };

    // Build router
    let app = Router::new()
        .route("/streaming", get(streaming_handler))
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            huddle_api::middleware::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
