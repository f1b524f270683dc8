use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use types::{Episode, MessageResponse, PresignedUpload};

use crate::{
    db::{self, DbConnection},
    episodes::{self, EpisodeChanges, EpisodeError, NewEpisode},
    uploads::{self, PresignUploadRequest, UploadError},
    AppContext,
};

/// Errors as the client sees them. Internal failures are logged where they
/// happen and reported without detail.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("episode not found")]
    NotFound,

    #[error("internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

impl From<EpisodeError> for ApiError {
    fn from(error: EpisodeError) -> Self {
        match error {
            EpisodeError::Validation(errors) => Self::Validation(errors.to_string()),
            EpisodeError::NotFound(_) => Self::NotFound,
            EpisodeError::Database(e) => {
                tracing::error!("database error: {e}");
                Self::Internal
            }
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::Validation(errors) => Self::Validation(errors.to_string()),
            UploadError::UnsupportedContentType(_) => {
                Self::Validation(error.to_string())
            }
            UploadError::Presign(e) => {
                tracing::error!("failed to presign upload: {e}");
                Self::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!("rejected request body: {rejection}");
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::warn!("rejected request path: {rejection}");
        Self::Validation(rejection.body_text())
    }
}

/// Newest episodes first.
#[tracing::instrument(skip_all)]
pub async fn list_episodes(
    DbConnection(mut db): DbConnection,
) -> Result<Json<Vec<Episode>>, ApiError> {
    tracing::info!("list_episodes");

    let mut rows = episodes::list_all(&mut db).await?;
    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    Ok(Json(rows.into_iter().map(Episode::from).collect()))
}

#[tracing::instrument(skip_all)]
pub async fn get_episode(
    DbConnection(mut db): DbConnection,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Episode>, ApiError> {
    let Path(id) = path?;
    tracing::info!(id, "get_episode");

    episodes::get_by_id(&mut db, id)
        .await?
        .map(|row| Json(Episode::from(row)))
        .ok_or(ApiError::NotFound)
}

#[tracing::instrument(skip_all)]
pub async fn create_episode(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<NewEpisode>, JsonRejection>,
) -> Result<(StatusCode, Json<Episode>), ApiError> {
    let Json(body) = body?;
    tracing::info!("create_episode");

    let mut db = db::acquire(&ctx.pool).await?;

    let row = episodes::insert(&mut db, &body).await?;

    Ok((StatusCode::CREATED, Json(Episode::from(row))))
}

#[tracing::instrument(skip_all)]
pub async fn update_episode(
    State(ctx): State<Arc<AppContext>>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<EpisodeChanges>, JsonRejection>,
) -> Result<Json<Episode>, ApiError> {
    let Path(id) = path?;
    let Json(body) = body?;
    tracing::info!(id, "update_episode");

    let mut db = db::acquire(&ctx.pool).await?;

    let row = episodes::update(&mut db, id, &body).await?;

    Ok(Json(Episode::from(row)))
}

#[tracing::instrument(skip_all)]
pub async fn delete_episode(
    DbConnection(mut db): DbConnection,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path(id) = path?;
    tracing::info!(id, "delete_episode");

    episodes::delete(&mut db, id).await?;

    Ok(Json(MessageResponse {
        message: "episode deleted".to_string(),
    }))
}

#[tracing::instrument(skip_all)]
pub async fn presign_upload(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<PresignUploadRequest>, JsonRejection>,
) -> Result<Json<PresignedUpload>, ApiError> {
    let Json(body) = body?;
    tracing::info!(file_type = %body.file_type, "presign_upload");

    let upload =
        uploads::presign_upload(ctx.store.as_ref(), &body, ctx.upload_url_ttl())
            .await?;

    Ok(Json(upload))
}
