//! Firebase Cloud Messaging (HTTP v1).

use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

use super::PushMessage;
use crate::config::PushConfig;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
/// Cached access tokens are renewed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PushError {
    #[error("device token is not registered")]
    Unregistered,
    #[error("FCM rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("could not obtain an FCM access token: {0:#}")]
    Auth(anyhow::Error),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct PushChannel {
    client: reqwest::Client,
    send_url: String,
    client_email: String,
    key: EncodingKey,
    token: Mutex<Option<AccessToken>>,
}

impl PushChannel {
    pub fn new(config: &PushConfig, timeout: Duration) -> anyhow::Result<PushChannel> {
        let key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .context("FIREBASE_PRIVATE_KEY is not a valid RSA private key")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build push HTTP client")?;

        Ok(PushChannel {
            client,
            send_url: format!(
                "https://fcm.googleapis.com/v1/projects/{}/messages:send",
                config.project_id
            ),
            client_email: config.client_email.clone(),
            key,
            token: Mutex::new(None),
        })
    }

    /// Sign the service account assertion used in the OAuth exchange
    fn assertion(&self) -> anyhow::Result<String> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        let claims = ServiceAccountClaims {
            iss: &self.client_email,
            scope: SCOPE,
            aud: TOKEN_URL,
            iat: now,
            exp: now + 3600,
        };

        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        debug!("requesting new FCM access token");
        let assertion = self.assertion()?;
        let response: TokenResponse = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let value = response.access_token.clone();
        *cached = Some(AccessToken {
            value: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(value)
    }

    pub async fn send(&self, device_token: &str, message: &PushMessage) -> Result<(), PushError> {
        let access_token = self.access_token().await.map_err(PushError::Auth)?;

        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&request_body(device_token, message))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), body))
    }
}

fn request_body(device_token: &str, message: &PushMessage) -> serde_json::Value {
    json!({
        "message": {
            "token": device_token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
            "android": { "priority": "high" },
        }
    })
}

fn classify_failure(status: u16, body: String) -> PushError {
    if body.contains("UNREGISTERED") || (status == 404 && body.contains("NOT_FOUND")) {
        PushError::Unregistered
    } else {
        PushError::Rejected { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_token_notification_and_data() {
        let message = PushMessage {
            title: "Issue Assigned to You".into(),
            body: "You have been assigned: \"Wifi down\"".into(),
            data: [("issueId".to_string(), "i-1".to_string())].into_iter().collect(),
        };
        let body = request_body("device-1", &message);

        assert_eq!(body["message"]["token"], "device-1");
        assert_eq!(body["message"]["notification"]["title"], "Issue Assigned to You");
        assert_eq!(body["message"]["data"]["issueId"], "i-1");
    }

    #[test]
    fn unregistered_tokens_are_recognised() {
        let body = r#"{"error":{"code":404,"status":"NOT_FOUND","details":[{"errorCode":"UNREGISTERED"}]}}"#;
        assert!(matches!(classify_failure(404, body.into()), PushError::Unregistered));
        assert!(matches!(
            classify_failure(400, r#"{"error":{"status":"INVALID_ARGUMENT"}}"#.into()),
            PushError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn rejects_malformed_service_key() {
        let config = PushConfig {
            project_id: "campus".into(),
            client_email: "push@campus.iam.gserviceaccount.com".into(),
            private_key: "not a pem".into(),
        };
        assert!(PushChannel::new(&config, Duration::from_secs(5)).is_err());
    }
}
