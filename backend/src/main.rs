use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use schoolhub_backend::{
    config::Config,
    db::connection::{create_pool, DbPool},
    docs::ApiDoc,
    handlers::activity_logs,
    middleware::{self as app_middleware, REQUEST_ID_HEADER},
    repositories::{PgActivityLogStore, PgEntityResolver},
    services::ActivityLogService,
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let allow_origin = if config.cors_allow_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allow_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(std::time::Duration::from_secs(24 * 60 * 60))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schoolhub_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(
        jwt_secret = %mask_secret(&config.jwt_secret),
        time_zone = %config.time_zone,
        server_port = config.server_port,
        activity_log_retention_days = config.activity_log_retention_days,
        "Loaded configuration from environment/.env"
    );

    let pool: DbPool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let activity_log = ActivityLogService::new(Arc::new(PgActivityLogStore::new(pool.clone())));
    let state = AppState::new(
        config.clone(),
        activity_log,
        Arc::new(PgEntityResolver::new(pool.clone())),
    );

    // Layers added last run first: auth, then the role check, then the
    // causer binding.
    let admin_routes = activity_logs::admin_routes()
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            app_middleware::resolve_causer,
        ))
        .route_layer(axum_middleware::from_fn(app_middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            (pool.clone(), config.clone()),
            app_middleware::auth,
        ));

    let user_routes = activity_logs::user_routes()
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            app_middleware::resolve_causer,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            (pool.clone(), config.clone()),
            app_middleware::auth,
        ));

    let app = Router::new()
        .merge(admin_routes)
        .merge(user_routes)
        .with_state(state)
        .merge(
            SwaggerUi::new("/api/docs/swagger-ui")
                .url("/api/docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(axum_middleware::from_fn(app_middleware::request_id))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config)),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
