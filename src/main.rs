//! Base API Server - Main Application Entry Point
//!
//! A REST API backing internal reporting tools. Authenticated users upload
//! files to blob storage, list their uploads and read the indicator catalogue.
//! Every stored file is audit-logged in a document store and the uploader is
//! notified through an email queue.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: HS512 bearer tokens issued by the identity provider
//! - **Storage**: Azure Blob Storage, Cosmos DB (audit log), Service Bus (emails),
//!   SharePoint (document library, optional)
//!
//! # Commands
//!
//! - `migrate`: apply the schema migrations
//! - `runserver` (default): start the HTTP server
//! - `initdata`: seed formulas and indicators

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod state;
mod storage;
mod validators;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, request::Parts},
    middleware as axum_middleware,
    routing::get,
};
use clap::{Parser, Subcommand};
use regex::Regex;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    db::Database,
    state::AppState,
    storage::{
        AzureBlobStore, CosmosDocumentStore, LibraryCredentials, ServiceBusQueue,
        SharepointLibrary,
    },
};

/// Largest multipart body accepted by the upload endpoint.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "base-api-server", version, about = "Base API server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Create or update the database schema
    Migrate,
    /// Run the HTTP server
    Runserver,
    /// Seed the initial formulas and indicators
    Initdata,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!("Configuration loaded ({})", config.env);

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    match cli.command.unwrap_or(Command::Runserver) {
        Command::Migrate => {
            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");
        }
        Command::Initdata => {
            let seeded = services::seed_service::seed_indicators(&Database::new(pool)).await?;
            tracing::info!("Seeded {} formulas and indicators", seeded);
        }
        Command::Runserver => runserver(config, pool).await?,
    }

    Ok(())
}

async fn runserver(config: Config, pool: db::DbPool) -> anyhow::Result<()> {
    let users_pool = if config.users_database_url() == config.database_url {
        pool.clone()
    } else {
        db::create_pool(config.users_database_url()).await?
    };

    let blob_store = AzureBlobStore::from_connection_string(
        &config.azure_storage_connection_string,
        &config.azure_storage_domain,
    )?;
    let documents = CosmosDocumentStore::new(
        &config.cosmos_endpoint,
        &config.cosmos_key,
        &config.cosmos_database,
    )?;
    let queue = ServiceBusQueue::from_connection_string(&config.sb_connection_str)?;
    let library = config
        .sharepoint()
        .map(|settings| {
            SharepointLibrary::new(
                &settings.site_url,
                LibraryCredentials {
                    tenant_id: settings.tenant_id,
                    client_id: settings.client_id,
                    client_secret: settings.client_secret,
                },
            )
        })
        .transpose()?;
    tracing::info!("Storage clients created");

    let addr = format!("0.0.0.0:{}", config.server_port);
    let mut state = AppState::new(
        config,
        pool,
        users_pool,
        Arc::new(blob_store),
        Arc::new(documents),
        Arc::new(queue),
    );
    match library {
        Some(library) => state = state.with_library(Arc::new(library)),
        None => tracing::warn!("Document library not configured; its routes answer 503"),
    }
    let app = build_router(state)?;

    // Bind to network address and start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes with their middleware stack.
///
/// Authentication wraps every route and the fallback, so only preflight
/// requests get through without a token.
fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors = build_cors(&state.config)?;

    let app = Router::new()
        .route("/api_check", get(handlers::health::api_check))
        .route("/api/v1/users/me", get(handlers::users::me))
        .route(
            "/api/v1/files",
            get(handlers::files::list_files)
                .post(handlers::files::upload_files)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/v1/indicators",
            get(handlers::indicators::list_indicators),
        )
        .route(
            "/api/v1/audit-logs",
            get(handlers::audit_logs::list_audit_logs),
        )
        .route(
            "/api/v1/audit-logs/{id}",
            get(handlers::audit_logs::get_audit_log),
        )
        .route(
            "/api/v1/library/files",
            get(handlers::library::list_files)
                .post(handlers::library::upload_files)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/v1/library/files/download",
            get(handlers::library::download_file),
        )
        .fallback(handlers::route_not_found)
        // Apply authentication middleware to all routes, the fallback included
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

/// CORS for the configured origin list plus the optional origin regex.
fn build_cors(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = config.allowed_origins.clone();
    let pattern = config
        .allowed_origins_regex
        .as_deref()
        .filter(|pattern| !pattern.is_empty())
        .map(Regex::new)
        .transpose()
        .context("ALLOWED_ORIGINS_REGEX is not a valid regex")?;

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
        let Ok(origin) = origin.to_str() else {
            return false;
        };

        origins.iter().any(|allowed| allowed == origin)
            || pattern.as_ref().is_some_and(|re| re.is_match(origin))
    });

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::handlers::files::tests::multipart_body;
    use crate::middleware::auth::test_token;
    use crate::state::TestBackends;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
        response::Response,
    };
    use tower::ServiceExt;

    fn test_router() -> Router {
        build_router(TestBackends::new().state()).unwrap()
    }

    fn bearer() -> String {
        format!("Bearer {}", test_token("access", 640, 300, "test-secret"))
    }

    async fn get_with_token(router: Router, uri: &str) -> Response {
        router
            .oneshot(
                Request::get(uri)
                    .header(header::AUTHORIZATION, bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized_with_cors_headers() {
        for uri in [
            "/api_check",
            "/api/v1/users/me",
            "/api/v1/files",
            "/api/v1/indicators",
            "/api/v1/audit-logs",
            "/api/v1/library/files",
            "/does/not/exist",
        ] {
            let response = test_router()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
            let headers = response.headers();
            assert_eq!(
                headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
                "http://localhost:3000,https://app.example.com"
            );
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

            let body = json_body(response).await;
            assert_eq!(body["detail"], "Unauthorized");
        }
    }

    #[tokio::test]
    async fn api_check_answers_authenticated_callers() {
        let response = get_with_token(test_router(), "/api_check").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Success!");
    }

    #[tokio::test]
    async fn current_user_comes_from_the_token() {
        let response = get_with_token(test_router(), "/api/v1/users/me").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], 640);
        assert_eq!(body["email"], "maria@example.com");
    }

    #[tokio::test]
    async fn malformed_token_is_unauthorized() {
        let response = test_router()
            .oneshot(
                Request::post("/api/v1/files")
                    .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn preflight_passes_without_token() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/files")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn origins_matching_the_regex_are_allowed() {
        let preflight = |origin: &'static str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/v1/indicators")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap()
        };

        let allowed = test_router()
            .oneshot(preflight("https://reports.example.com"))
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://reports.example.com"
        );

        let rejected = test_router()
            .oneshot(preflight("https://example.org"))
            .await
            .unwrap();
        assert!(
            rejected
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[tokio::test]
    async fn unknown_routes_return_json_not_found_once_authenticated() {
        let response = get_with_token(test_router(), "/api/v2/files").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "Route not found");
    }

    #[tokio::test]
    async fn audit_trail_lists_only_own_items() {
        let backends = TestBackends::new();
        let (content_type, body) =
            multipart_body(("container_name", "reports"), &[("q1.pdf", "first")]);
        let uploaded = build_router(backends.state())
            .unwrap()
            .oneshot(
                Request::post("/api/v1/files")
                    .header(header::AUTHORIZATION, bearer())
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(uploaded.status(), StatusCode::CREATED);

        let trail = json_body(
            get_with_token(build_router(backends.state()).unwrap(), "/api/v1/audit-logs").await,
        )
        .await;
        assert_eq!(trail.as_array().unwrap().len(), 1);
        assert_eq!(trail[0]["source"], "BlobFile");
        assert_eq!(trail[0]["action"], "INSERT");

        let id = trail[0]["id"].as_str().unwrap();
        let item = get_with_token(
            build_router(backends.state()).unwrap(),
            &format!("/api/v1/audit-logs/{}", id),
        )
        .await;
        assert_eq!(item.status(), StatusCode::OK);

        let selected = json_body(
            get_with_token(
                build_router(backends.state()).unwrap(),
                &format!("/api/v1/audit-logs?ids={},unknown", id),
            )
            .await,
        )
        .await;
        assert_eq!(selected.as_array().unwrap().len(), 1);

        let missing = get_with_token(
            build_router(backends.state()).unwrap(),
            "/api/v1/audit-logs/unknown",
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn library_files_can_be_uploaded_listed_and_downloaded() {
        let backends = TestBackends::new();
        let (content_type, body) = multipart_body(("folder", "2024/Q1"), &[("accrual.pdf", "rows")]);

        let uploaded = build_router(backends.state())
            .unwrap()
            .oneshot(
                Request::post("/api/v1/library/files")
                    .header(header::AUTHORIZATION, bearer())
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(uploaded.status(), StatusCode::CREATED);

        let listed = json_body(
            get_with_token(
                build_router(backends.state()).unwrap(),
                "/api/v1/library/files?search=Q1",
            )
            .await,
        )
        .await;
        assert_eq!(
            listed[0]["file_relative_path"],
            "/sites/reports/Shared Documents/2024/Q1/accrual.pdf"
        );

        let download = get_with_token(
            build_router(backends.state()).unwrap(),
            "/api/v1/library/files/download?path=2024/Q1/accrual.pdf",
        )
        .await;
        assert_eq!(download.status(), StatusCode::OK);
        assert_eq!(
            download.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"accrual.pdf\""
        );
        let content = to_bytes(download.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&content[..], b"rows");

        let escaped = get_with_token(
            build_router(backends.state()).unwrap(),
            "/api/v1/library/files/download?path=../secret.pdf",
        )
        .await;
        assert_eq!(escaped.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unconfigured_library_is_unavailable() {
        let mut state = TestBackends::new().state();
        state.library = None;

        let response = get_with_token(build_router(state).unwrap(), "/api/v1/library/files").await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn invalid_origin_regex_is_rejected() {
        let mut config = test_config();
        config.allowed_origins_regex = Some("(".to_string());
        assert!(build_cors(&config).is_err());
    }

    #[test]
    fn command_defaults_to_runserver() {
        let cli = Cli::parse_from(["base-api-server"]);
        assert_eq!(cli.command.unwrap_or(Command::Runserver), Command::Runserver);

        let cli = Cli::parse_from(["base-api-server", "initdata"]);
        assert_eq!(cli.command, Some(Command::Initdata));
    }
}
