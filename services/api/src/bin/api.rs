//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{OpenAiCoachAdapter, PgStore},
    config::Config,
    error::ApiError,
    web::{
        add_friend_handler, auth::{login_handler, logout_handler, signup_handler},
        chat_handler, leaderboard_handler, list_friends_handler, post_event_handler,
        profile_handler, recommendation_handler, require_auth, rest::ApiDoc,
        state::AppState, stats_summary_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use posture_core::{
    identity::IdentityResolver, leaderboard::Leaderboard, ledger::SessionLedger,
    recommend::WeeklyCoach, stats::StatsAggregator,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(db_pool));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize the Coach Model Adapter ---
    let mut openai_config = OpenAIConfig::new();
    if let Some(key) = config.openai_api_key.as_deref() {
        openai_config = openai_config.with_api_key(key);
    }
    if let Some(base) = config.coach_api_base.as_deref() {
        openai_config = openai_config.with_api_base(base);
    }
    let coach_model = Arc::new(OpenAiCoachAdapter::new(
        Client::with_config(openai_config),
        config.coach_model.clone(),
        Duration::from_secs(config.coach_timeout_secs),
    ));

    // --- 4. Assemble the Core Services & Shared AppState ---
    let resolver = IdentityResolver::new(store.clone());
    let ledger = Arc::new(SessionLedger::new(store.clone()));
    let stats = StatsAggregator::new(store.clone());
    let leaderboard = Leaderboard::new(store.clone(), store.clone(), resolver.clone());
    let coach = WeeklyCoach::new(
        store.clone(),
        store.clone(),
        store.clone(),
        coach_model.clone(),
        config.coach_model.clone(),
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        auth: store.clone(),
        users: store.clone(),
        friends: store.clone(),
        sessions: store.clone(),
        coach_model,
        resolver,
        ledger,
        stats,
        leaderboard,
        coach,
    });

    // --- 5. CORS for the dashboard origin ---
    let cors_origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes: the monitor process and dashboard widgets post/read
    // without a login, identified by the fuzzy userId they carry.
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/events", post(post_event_handler))
        .route("/stats/summary", get(stats_summary_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/friends", get(list_friends_handler).post(add_friend_handler))
        .route("/coach", post(chat_handler))
        .route("/coach/recommendation", get(recommendation_handler));

    // Protected routes (auth cookie required)
    let protected_routes = Router::new()
        .route("/profile", get(profile_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
