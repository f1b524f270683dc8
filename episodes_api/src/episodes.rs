//! Persistence for episode records.
//!
//! Every statement here binds its inputs as parameters; none of them are
//! assembled from request data.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use sqlx::{FromRow, SqliteConnection};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

const UPDATE_EPISODE: &str = r"
    UPDATE podcasts
    SET title = COALESCE(?, title),
        notes = CASE WHEN ? THEN ? ELSE notes END,
        audio_url = CASE WHEN ? THEN ? ELSE audio_url END,
        video_url = CASE WHEN ? THEN ? ELSE video_url END,
        thumbnail_url = CASE WHEN ? THEN ? ELSE thumbnail_url END,
        updated_at = MAX(?, updated_at)
    WHERE id = ?
    RETURNING *
";

#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("invalid episode: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("episode {0} not found")]
    NotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EpisodeRow {
    pub id: i64,
    pub title: String,
    pub notes: Option<String>,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EpisodeRow> for types::Episode {
    fn from(row: EpisodeRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            notes: row.notes,
            audio_url: row.audio_url,
            video_url: row.video_url,
            thumbnail_url: row.thumbnail_url,
            created_at: row.created_at.format(TIMESTAMP_FORMAT).to_string(),
            updated_at: row.updated_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Fields accepted when creating an episode. A missing title deserializes
/// to an empty string so that it fails validation instead of parsing.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewEpisode {
    #[serde(default)]
    #[validate(custom(function = "non_blank"))]
    pub title: String,
    pub notes: Option<String>,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// A partial update.
///
/// For the optional fields, the outer `Option` tells whether the field was
/// present in the request at all, and `Some(None)` (an explicit `null`)
/// clears the stored value. The title can be replaced but never cleared.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct EpisodeChanges {
    #[validate(custom(function = "non_blank"))]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub audio_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub video_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub thumbnail_url: Option<Option<String>>,
}

// any value that is present, including null, is wrapped in Some
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some(Cow::from("must not be blank"));
        return Err(error);
    }

    Ok(())
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn patch_value(field: Option<&Option<String>>) -> (bool, Option<&str>) {
    (
        field.is_some(),
        field.and_then(|value| blank_to_none(value.as_deref())),
    )
}

#[tracing::instrument(skip(conn))]
pub async fn insert(
    conn: &mut SqliteConnection,
    episode: &NewEpisode,
) -> Result<EpisodeRow, EpisodeError> {
    episode.validate()?;

    let now = Utc::now();

    let row = sqlx::query_as::<_, EpisodeRow>(
        r"
        INSERT INTO podcasts (
            title, notes, audio_url, video_url, thumbnail_url,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        ",
    )
    .bind(&episode.title)
    .bind(blank_to_none(episode.notes.as_deref()))
    .bind(blank_to_none(episode.audio_url.as_deref()))
    .bind(blank_to_none(episode.video_url.as_deref()))
    .bind(blank_to_none(episode.thumbnail_url.as_deref()))
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(id = row.id, "inserted episode");

    Ok(row)
}

/// Every stored episode, in whatever order the store returns them.
#[tracing::instrument(skip(conn))]
pub async fn list_all(
    conn: &mut SqliteConnection,
) -> Result<Vec<EpisodeRow>, EpisodeError> {
    let rows = sqlx::query_as::<_, EpisodeRow>("SELECT * FROM podcasts")
        .fetch_all(&mut *conn)
        .await?;

    tracing::info!("returning {0} episodes", rows.len());

    Ok(rows)
}

#[tracing::instrument(skip(conn))]
pub async fn get_by_id(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<EpisodeRow>, EpisodeError> {
    let row =
        sqlx::query_as::<_, EpisodeRow>("SELECT * FROM podcasts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(row)
}

#[tracing::instrument(skip(conn))]
pub async fn update(
    conn: &mut SqliteConnection,
    id: i64,
    changes: &EpisodeChanges,
) -> Result<EpisodeRow, EpisodeError> {
    changes.validate()?;

    let (set_notes, notes) = patch_value(changes.notes.as_ref());
    let (set_audio_url, audio_url) = patch_value(changes.audio_url.as_ref());
    let (set_video_url, video_url) = patch_value(changes.video_url.as_ref());
    let (set_thumbnail_url, thumbnail_url) =
        patch_value(changes.thumbnail_url.as_ref());

    let row = sqlx::query_as::<_, EpisodeRow>(UPDATE_EPISODE)
        .bind(changes.title.as_deref())
        .bind(set_notes)
        .bind(notes)
        .bind(set_audio_url)
        .bind(audio_url)
        .bind(set_video_url)
        .bind(video_url)
        .bind(set_thumbnail_url)
        .bind(thumbnail_url)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let row = row.ok_or(EpisodeError::NotFound(id))?;

    tracing::info!(id, "updated episode");

    Ok(row)
}

#[tracing::instrument(skip(conn))]
pub async fn delete(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<(), EpisodeError> {
    let result = sqlx::query("DELETE FROM podcasts WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(EpisodeError::NotFound(id));
    }

    tracing::info!(id, "deleted episode");

    Ok(())
}
