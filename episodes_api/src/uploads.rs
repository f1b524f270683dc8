use std::{borrow::Cow, fmt, time::Duration};

use async_trait::async_trait;
use aws_sdk_s3::{error::DisplayErrorContext, presigning::PresigningConfig, Client};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use thiserror::Error;
use types::PresignedUpload;
use validator::{Validate, ValidationError, ValidationErrors};

/// Characters S3 leaves unescaped in an object path.
const KEY_PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload request: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("unsupported file type: {0}")]
    UnsupportedContentType(String),

    #[error("failed to presign upload: {0}")]
    Presign(String),
}

/// Top-level folder an upload lands in, chosen from its content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFolder {
    Audio,
    Images,
    Video,
}

impl UploadFolder {
    /// Classify a declared content type such as `audio/mpeg`. Only the type
    /// part is inspected, and it is matched case-insensitively.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let (kind, subtype) = content_type.trim().split_once('/')?;
        if subtype.trim().is_empty() {
            return None;
        }

        match kind.to_ascii_lowercase().as_str() {
            "audio" => Some(Self::Audio),
            "image" => Some(Self::Images),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Images => "images",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for UploadFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadRequest {
    #[serde(default)]
    #[validate(custom(function = "safe_file_name"))]
    pub file_name: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub file_type: String,
}

// the file name becomes the last segment of the object key, so it must not
// be able to walk into another folder
fn safe_file_name(value: &str) -> Result<(), ValidationError> {
    let message = if value.trim().is_empty() {
        "must not be blank"
    } else if value.contains(['/', '\\'])
        || value.contains("..")
        || value.chars().any(char::is_control)
    {
        "must be a plain file name"
    } else {
        return Ok(());
    };

    let mut error = ValidationError::new("file_name");
    error.message = Some(Cow::from(message));
    Err(error)
}

pub fn object_key(folder: UploadFolder, file_name: &str) -> String {
    format!("{folder}/{file_name}")
}

/// Minimal object store capability needed to hand out direct uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A URL that accepts one `PUT` of `key` with the given content type
    /// until `ttl` has passed.
    async fn presign_write(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, UploadError>;

    /// Where `key` can be read once uploaded. Always the same for a key.
    fn public_url(&self, key: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    region: String,
    public_base_url: Option<String>,
}

impl S3ObjectStore {
    pub const fn new(
        client: Client,
        bucket: String,
        region: String,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket,
            region,
            public_base_url,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign_write(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, UploadError> {
        let presigning_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| UploadError::Presign(e.to_string()))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(|e| {
                tracing::error!(
                    "S3 PutObject presign error for key {}: {}",
                    key,
                    DisplayErrorContext(&e)
                );
                UploadError::Presign(e.to_string())
            })?;

        Ok(request.uri().to_string())
    }

    // encoded the same way as the path of the presigned URL, so both point
    // at the same object
    fn public_url(&self, key: &str) -> String {
        let key = utf8_percent_encode(key, KEY_PATH_SET);

        match &self.public_base_url {
            Some(base_url) => {
                format!("{}/{key}", base_url.trim_end_matches('/'))
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{key}",
                self.bucket, self.region
            ),
        }
    }
}

/// Validate the request, pick the folder and mint the write/read URL pair.
/// Nothing is written to the store here.
#[tracing::instrument(skip(store))]
pub async fn presign_upload(
    store: &dyn ObjectStore,
    request: &PresignUploadRequest,
    ttl: Duration,
) -> Result<PresignedUpload, UploadError> {
    request.validate()?;

    let folder = UploadFolder::from_content_type(&request.file_type)
        .ok_or_else(|| {
            UploadError::UnsupportedContentType(request.file_type.clone())
        })?;

    let key = object_key(folder, &request.file_name);

    let signed_url = store
        .presign_write(&key, &request.file_type, ttl)
        .await?;
    let file_url = store.public_url(&key);

    tracing::info!(%key, "issued upload url");

    Ok(PresignedUpload {
        signed_url,
        file_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<(String, String, Duration)>>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn presign_write(
            &self,
            key: &str,
            content_type: &str,
            ttl: Duration,
        ) -> Result<String, UploadError> {
            self.calls.lock().unwrap().push((
                key.to_string(),
                content_type.to_string(),
                ttl,
            ));
            Ok(format!("https://signed.example.com/{key}?sig=1"))
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://files.example.com/{key}")
        }
    }

    fn request(file_name: &str, file_type: &str) -> PresignUploadRequest {
        PresignUploadRequest {
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
        }
    }

    fn s3_store(public_base_url: Option<String>) -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-west-2"))
            .credentials_provider(Credentials::new(
                "AKIDEXAMPLE",
                "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
                None,
                None,
                "test",
            ))
            .build();

        S3ObjectStore::new(
            Client::from_conf(config),
            "podcast-assets".to_string(),
            "us-west-2".to_string(),
            public_base_url,
        )
    }

    #[test]
    fn test_folder_from_content_type() {
        assert_eq!(
            UploadFolder::from_content_type("audio/mpeg"),
            Some(UploadFolder::Audio)
        );
        assert_eq!(
            UploadFolder::from_content_type("Image/PNG"),
            Some(UploadFolder::Images)
        );
        assert_eq!(
            UploadFolder::from_content_type("video/mp4"),
            Some(UploadFolder::Video)
        );
        assert_eq!(UploadFolder::from_content_type("application/zip"), None);
        assert_eq!(UploadFolder::from_content_type("audio"), None);
        assert_eq!(UploadFolder::from_content_type("audio/"), None);
        assert_eq!(UploadFolder::from_content_type(""), None);
    }

    #[tokio::test]
    async fn test_presign_audio_goes_to_audio_folder() {
        let store = RecordingStore::default();

        let upload = presign_upload(
            &store,
            &request("ep1.mp3", "audio/mpeg"),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

        assert_eq!(upload.signed_url, "https://signed.example.com/audio/ep1.mp3?sig=1");
        assert_eq!(upload.file_url, "https://files.example.com/audio/ep1.mp3");

        let calls = store.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "audio/ep1.mp3".to_string(),
                "audio/mpeg".to_string(),
                Duration::from_secs(3600)
            )]
        );
    }

    #[tokio::test]
    async fn test_presign_image_goes_to_images_folder() {
        let store = RecordingStore::default();

        let upload = presign_upload(
            &store,
            &request("cover.png", "image/png"),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert_eq!(upload.file_url, "https://files.example.com/images/cover.png");
    }

    #[tokio::test]
    async fn test_presign_unsupported_type_is_rejected() {
        let store = RecordingStore::default();

        let result = presign_upload(
            &store,
            &request("bundle.zip", "application/zip"),
            Duration::from_secs(3600),
        )
        .await;

        assert!(matches!(
            result,
            Err(UploadError::UnsupportedContentType(ref t)) if t == "application/zip"
        ));
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presign_rejects_unsafe_file_names() {
        let store = RecordingStore::default();

        for file_name in ["", "  ", "../secret.mp3", "nested/ep1.mp3", "a\\b.mp3", "ep\n1.mp3"] {
            let result = presign_upload(
                &store,
                &request(file_name, "audio/mpeg"),
                Duration::from_secs(3600),
            )
            .await;

            assert!(
                matches!(result, Err(UploadError::Validation(_))),
                "expected {file_name:?} to be rejected"
            );
        }
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_request_uses_camel_case_fields() {
        let request: PresignUploadRequest = serde_json::from_str(
            r#"{"fileName": "ep1.mp3", "fileType": "audio/mpeg"}"#,
        )
        .unwrap();

        assert_eq!(request.file_name, "ep1.mp3");
        assert_eq!(request.file_type, "audio/mpeg");
    }

    #[test]
    fn test_s3_public_url_is_derived_from_bucket_and_region() {
        let store = s3_store(None);

        assert_eq!(
            store.public_url("audio/ep1.mp3"),
            "https://podcast-assets.s3.us-west-2.amazonaws.com/audio/ep1.mp3"
        );
        assert_eq!(
            store.public_url("audio/ep1.mp3"),
            store.public_url("audio/ep1.mp3")
        );
    }

    #[test]
    fn test_s3_public_url_prefers_configured_base_url() {
        let store = s3_store(Some("https://cdn.example.com/".to_string()));

        assert_eq!(
            store.public_url("images/cover.png"),
            "https://cdn.example.com/images/cover.png"
        );
    }

    #[tokio::test]
    async fn test_s3_presign_write_signs_put_for_key() {
        let store = s3_store(None);

        let url = store
            .presign_write("audio/ep1.mp3", "audio/mpeg", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.starts_with("https://podcast-assets.s3.us-west-2.amazonaws.com/audio/ep1.mp3?"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_s3_file_url_matches_signed_path_for_escaped_names() {
        let store = s3_store(None);

        for (file_name, escaped) in [
            ("ep 1.mp3", "ep%201.mp3"),
            ("ep#1.mp3", "ep%231.mp3"),
            ("ep?1.mp3", "ep%3F1.mp3"),
            ("ep%1.mp3", "ep%251.mp3"),
        ] {
            let upload = presign_upload(
                &store,
                &request(file_name, "audio/mpeg"),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

            let signed_path = upload.signed_url.split('?').next().unwrap();
            assert_eq!(upload.file_url, signed_path);
            assert_eq!(
                upload.file_url,
                format!(
                    "https://podcast-assets.s3.us-west-2.amazonaws.com/audio/{escaped}"
                )
            );
        }
    }

    #[test]
    fn test_s3_public_url_escapes_key_under_base_url() {
        let store = s3_store(Some("https://cdn.example.com".to_string()));

        assert_eq!(
            store.public_url("images/cover art#2.png"),
            "https://cdn.example.com/images/cover%20art%232.png"
        );
    }

    #[tokio::test]
    async fn test_s3_presign_write_rejects_overlong_ttl() {
        let store = s3_store(None);

        // presigned URLs can live for at most a week
        let result = store
            .presign_write(
                "audio/ep1.mp3",
                "audio/mpeg",
                Duration::from_secs(8 * 24 * 60 * 60),
            )
            .await;

        assert!(matches!(result, Err(UploadError::Presign(_))));
    }
}
