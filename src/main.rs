use book_catalog::{
    AppState,
    config::{AppConfig, Env, ImageBackend},
    create_router,
    repository::{PostgresRepository, RepositoryState},
    storage::{ImageStore, ImageStoreState, LocalDiskImageStore, S3ImageStore},
};
use sqlx::postgres::PgPoolOptions;
use std::{process::ExitCode, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, sets up logging, connects and migrates the database, picks
/// the image store and serves the router. Any startup failure is logged and ends the
/// process with a non-zero exit code.
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "book_catalog=debug,tower_http=info".into());

    // The log format depends on APP_ENV, which is read before the rest of the config
    // so that configuration errors are themselves logged in the right format.
    let env = match std::env::var("APP_ENV").as_deref() {
        Ok("production") => Env::Production,
        _ => Env::Local,
    };
    match env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("FATAL: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Application starting in {:?} mode", config.env);

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("FATAL: failed to connect to Postgres, check DATABASE_URL: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!("FATAL: migrations failed: {e}");
        return ExitCode::FAILURE;
    }

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    let images: ImageStoreState = match config.image_backend {
        ImageBackend::LocalDisk => Arc::new(LocalDiskImageStore::new(&config.upload_dir)),
        ImageBackend::S3 => Arc::new(S3ImageStore::new(
            &config.s3_endpoint,
            &config.s3_region,
            &config.s3_key,
            &config.s3_secret,
            &config.s3_bucket,
        )),
    };

    if let Err(e) = images.ensure_ready().await {
        tracing::error!("FATAL: image store is not usable: {e}");
        return ExitCode::FAILURE;
    }

    let port = config.port;
    let app = create_router(AppState {
        repo,
        images,
        config,
    });

    let address = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("FATAL: could not bind {address}: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Listening on {address}");
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{port}/swagger-ui");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
