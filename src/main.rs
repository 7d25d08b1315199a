use sqlx::{
    migrate::{MigrateError, Migrator},
    postgres::{PgPool, PgPoolOptions},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;
use router::app_router;
use std::{net::SocketAddr, path::Path, sync::Arc};
mod ai;
use ai::{AiError, Assistant, CompletionClient};
mod auth;
mod config;
use config::{Config, ConfigError};
mod data;
use data::repository::{CommentRepository, ExerciseRepository, KnowledgeRepository, UserRepository};
mod error;
mod middleware;
mod rate_limit;
use rate_limit::RateLimiter;
mod sandbox;

pub struct AppState {
    config: Config,
    /// Connection used to run learner queries against the practice tables.
    sandbox: Arc<PgPool>,
    users: UserRepository,
    comments: CommentRepository,
    knowledge: KnowledgeRepository,
    exercises: ExerciseRepository,
    assistant: Assistant,
    api_limiter: RateLimiter,
    ai_limiter: RateLimiter,
}

impl AppState {
    /// Without a dedicated sandbox pool, learner queries share the main pool.
    pub fn new(config: Config, pool: PgPool, sandbox: Option<PgPool>) -> Result<Self, AiError> {
        let pool = Arc::new(pool);
        let sandbox = match sandbox {
            Some(sandbox) => Arc::new(sandbox),
            None => pool.clone(),
        };
        let assistant = Assistant::new(CompletionClient::new(&config.ai)?)?;

        Ok(AppState {
            users: UserRepository { pool: pool.clone() },
            comments: CommentRepository { pool: pool.clone() },
            knowledge: KnowledgeRepository { pool: pool.clone() },
            exercises: ExerciseRepository { pool },
            sandbox,
            assistant,
            api_limiter: RateLimiter::new(config.api_rate_limit.clone()),
            ai_limiter: RateLimiter::new(config.ai_rate_limit.clone()),
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("can't connect to database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error("can't set up the AI client: {0}")]
    Ai(#[from] AiError),
    #[error("server error: {0}")]
    Serve(String),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqlcoach=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(&config.database_url)
        .await?;

    let migrator = Migrator::new(Path::new(&config.migrations_path)).await?;
    migrator.run(&pool).await?;
    tracing::info!("migrations applied from {}", config.migrations_path);

    let sandbox = match &config.sandbox_database_url {
        Some(url) => Some(
            PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(config.db_acquire_timeout)
                .connect(url)
                .await?,
        ),
        None => {
            tracing::warn!("SANDBOX_DATABASE_URL not set, learner queries use the main pool");
            None
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = Arc::new(AppState::new(config, pool, sandbox)?);
    let app = app_router(state);

    tracing::info!("listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| StartupError::Serve(e.to_string()))
}
