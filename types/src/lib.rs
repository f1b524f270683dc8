//! Wire types shared between the episodes API and its clients.
//!
//! Timestamps are RFC 3339 strings in UTC with millisecond precision, so two
//! changes within the same millisecond carry the same `updated_at`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,

    pub title: String,

    pub notes: Option<String>,

    pub audio_url: Option<String>,

    pub video_url: Option<String>,

    pub thumbnail_url: Option<String>,

    pub created_at: String,

    pub updated_at: String,
}

/// Result of asking for an upload slot in the object store.
///
/// `signed_url` accepts a single `PUT` of the raw bytes until it expires;
/// `file_url` is where the object can be read once the upload is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub signed_url: String,

    pub file_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presigned_upload_uses_camel_case() {
        let upload = PresignedUpload {
            signed_url: "https://bucket.s3.amazonaws.com/audio/a.mp3?X-Amz-Signature=abc"
                .to_string(),
            file_url: "https://bucket.s3.us-east-1.amazonaws.com/audio/a.mp3"
                .to_string(),
        };

        let value = serde_json::to_value(&upload).unwrap();
        assert!(value.get("signedUrl").is_some());
        assert!(value.get("fileUrl").is_some());
        assert!(value.get("signed_url").is_none());
    }

    #[test]
    fn test_episode_serializes_missing_fields_as_null() {
        let episode = Episode {
            id: 1,
            title: "Ep1".to_string(),
            notes: None,
            audio_url: None,
            video_url: None,
            thumbnail_url: None,
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000Z".to_string(),
        };

        let value = serde_json::to_value(&episode).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["title"], "Ep1");
        assert!(value["notes"].is_null());
        assert!(value["thumbnail_url"].is_null());
    }
}
