use std::{str::FromStr, sync::Arc, time::Duration};

use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::{
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};

use crate::{handlers::ApiError, AppContext};

/// How long a statement waits on a locked database before giving up.
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_PODCASTS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS podcasts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL CHECK (length(trim(title)) > 0),
        notes TEXT,
        audio_url TEXT,
        video_url TEXT,
        thumbnail_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

const CREATE_PODCASTS_CREATED_AT_INDEX: &str = r"
    CREATE INDEX IF NOT EXISTS podcasts_created_at_idx
        ON podcasts (created_at)
";

/**
 * Opens the connection pool and makes sure the schema exists.
 *
 * In-memory databases live only as long as their connection, so they get a
 * single connection that is never recycled.
 */
pub async fn connect(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool_options = if is_in_memory(database_url) {
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Creates the `podcasts` table and its index if they are missing. Safe to
/// run on every start.
#[tracing::instrument(skip(pool))]
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_PODCASTS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_PODCASTS_CREATED_AT_INDEX)
        .execute(pool)
        .await?;

    tracing::info!("schema ready");

    Ok(())
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Takes one connection from the pool, reporting failure as a 500.
pub async fn acquire(pool: &SqlitePool) -> Result<PoolConnection<Sqlite>, ApiError> {
    pool.acquire().await.map_err(|e| {
        tracing::error!("error getting connection from pool: {e}");
        ApiError::Internal
    })
}

/**
 * Extractor handing a handler one pooled connection.
 *
 * The connection goes back to the pool when the extractor is dropped, which
 * covers early returns and requests aborted by the client. Handlers that
 * also read a body acquire with [`acquire`] after parsing it instead, so a
 * slow or malformed body never holds a connection.
 */
pub struct DbConnection(pub PoolConnection<Sqlite>);

impl FromRequestParts<Arc<AppContext>> for DbConnection {
    type Rejection = ApiError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        acquire(&state.pool).await.map(Self)
    }
}
