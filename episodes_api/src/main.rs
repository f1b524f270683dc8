/**
 * This is the main entrypoint for the `episodes_api` service.
 *
 * It serves CRUD operations over podcast episodes stored in SQLite and
 * hands out presigned URLs so clients can upload media straight to S3.
 *
 */
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;

mod db;
mod episodes;
mod handlers;
mod uploads;

use uploads::{ObjectStore, S3ObjectStore};

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database_url")]
    database_url: String,
    #[serde(default = "default_database_max_connections")]
    database_max_connections: u32,
    upload_bucket: String,
    #[serde(default = "default_upload_url_ttl_secs")]
    upload_url_ttl_secs: u64,
    #[serde(default)]
    upload_public_base_url: Option<String>,
    #[serde(default = "default_listen_addr")]
    listen_addr: SocketAddr,
    /// Comma separated. Any origin is allowed when unset.
    #[serde(default)]
    cors_allowed_origins: Option<String>,
}

fn default_database_url() -> String {
    "sqlite://podcast.db".to_string()
}

const fn default_database_max_connections() -> u32 {
    8
}

const fn default_upload_url_ttl_secs() -> u64 {
    3600
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3030))
}

pub struct AppContext {
    config: Config,
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
}

impl AppContext {
    fn upload_url_ttl(&self) -> Duration {
        Duration::from_secs(self.config.upload_url_ttl_secs)
    }
}

impl pc_app::ContextProvider<Config> for AppContext {
    async fn new(
        config: Config,
        aws_config: aws_config::SdkConfig,
    ) -> Result<Self, pc_app::BoxError> {
        let pool =
            db::connect(&config.database_url, config.database_max_connections)
                .await?;

        let region = aws_config
            .region()
            .map_or_else(|| DEFAULT_REGION.to_string(), ToString::to_string);

        let store = S3ObjectStore::new(
            aws_sdk_s3::Client::new(&aws_config),
            config.upload_bucket.clone(),
            region,
            config.upload_public_base_url.clone(),
        );

        Ok(Self {
            config,
            pool,
            store: Arc::new(store),
        })
    }
}

pub fn router(state: Arc<AppContext>, allowed_origins: Vec<HeaderValue>) -> Router {
    let app = Router::new()
        .route(
            "/episodes",
            get(handlers::list_episodes).post(handlers::create_episode),
        )
        .route(
            "/episodes/{id}",
            get(handlers::get_episode)
                .put(handlers::update_episode)
                .delete(handlers::delete_episode),
        )
        .route("/uploads/presign", post(handlers::presign_upload))
        .with_state(state);

    pc_axum::with_common_layers(app, allowed_origins)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app_context =
        pc_app::create_app_context::<AppContext, Config>().await?;

    let listen_addr = app_context.config.listen_addr;
    let allowed_origins = pc_axum::parse_origins(
        app_context
            .config
            .cors_allowed_origins
            .as_deref()
            .unwrap_or_default(),
    )?;

    let app = router(Arc::new(app_context), allowed_origins);

    pc_axum::run_app(app, listen_addr).await?;

    Ok(())
}
