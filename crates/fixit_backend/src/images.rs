//! Photo storage on the external image host.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{
    config::CloudinaryConfig,
    error::{ApiError, ApiResult},
    models::ImageRef,
};

pub const ISSUE_FOLDER: &str = "campus-fixit/issues";
pub const AVATAR_FOLDER: &str = "campus-fixit/avatars";

/// An image received from a client, already checked against the upload
/// limits
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, image: ImageUpload, folder: &str) -> ApiResult<ImageRef>;

    /// Remove an image in the background. Failures are only logged.
    fn schedule_delete(&self, public_id: String);
}

/// Used when no image host is configured
pub struct DisabledImageStore;

#[async_trait]
impl ImageStore for DisabledImageStore {
    async fn upload(&self, _image: ImageUpload, _folder: &str) -> ApiResult<ImageRef> {
        Err(ApiError::bad_request("Image uploads are not configured"))
    }

    fn schedule_delete(&self, public_id: String) {
        debug!("image host disabled, not deleting {public_id}");
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

struct CloudinaryInner {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

/// Signed uploads against the Cloudinary REST API
#[derive(Clone)]
pub struct CloudinaryStore {
    inner: Arc<CloudinaryInner>,
}

fn timestamp() -> String {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}

/// Hex SHA-256 over the alphabetically sorted `key=value` pairs joined by
/// `&`, followed directly by the API secret
fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut params = params.to_vec();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

impl CloudinaryStore {
    pub fn new(config: &CloudinaryConfig, timeout: Duration) -> anyhow::Result<CloudinaryStore> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build image host HTTP client")?;
        Ok(CloudinaryStore {
            inner: Arc::new(CloudinaryInner {
                client,
                config: config.clone(),
            }),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/image/{action}",
            self.inner.config.cloud_name
        )
    }

    async fn try_upload(&self, image: ImageUpload, folder: &str) -> anyhow::Result<ImageRef> {
        let config = &self.inner.config;
        let timestamp = timestamp();
        let signature = sign(
            &[("folder", folder), ("timestamp", timestamp.as_str())],
            &config.api_secret,
        );

        let file = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.content_type)?;
        let form = Form::new()
            .part("file", file)
            .text("api_key", config.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", folder.to_string())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let uploaded: UploadResponse = self
            .inner
            .client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ImageRef {
            url: uploaded.secure_url,
            public_id: uploaded.public_id,
        })
    }

    async fn destroy(&self, public_id: &str) -> anyhow::Result<()> {
        let config = &self.inner.config;
        let timestamp = timestamp();
        let signature = sign(
            &[("public_id", public_id), ("timestamp", timestamp.as_str())],
            &config.api_secret,
        );

        let response: DestroyResponse = self
            .inner
            .client
            .post(self.endpoint("destroy"))
            .form(&[
                ("public_id", public_id),
                ("api_key", config.api_key.as_str()),
                ("timestamp", timestamp.as_str()),
                ("signature", signature.as_str()),
                ("signature_algorithm", "sha256"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(anyhow!("image host answered {other:?}")),
        }
    }
}

#[async_trait]
impl ImageStore for CloudinaryStore {
    async fn upload(&self, image: ImageUpload, folder: &str) -> ApiResult<ImageRef> {
        let file_name = image.file_name.clone();
        match self.try_upload(image, folder).await {
            Ok(image) => {
                info!("Image uploaded ({})", image.public_id);
                Ok(image)
            },
            Err(err) => {
                warn!("Failed to upload image {file_name}: {err:#}");
                Err(ApiError::Internal(err.context("Failed to upload image")))
            },
        }
    }

    fn schedule_delete(&self, public_id: String) {
        let store = self.clone();
        tokio::spawn(async move {
            match store.destroy(&public_id).await {
                Ok(()) => info!("Image deleted ({public_id})"),
                Err(err) => warn!("Failed to delete image {public_id}: {err:#}"),
            }
        });
    }
}
