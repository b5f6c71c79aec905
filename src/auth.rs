// IAM token exchange: trades the long-lived api key for a short-lived bearer token
// Tokens are never cached, every logical operation fetches its own

use crate::error::{AuthFailure, SyncError, SyncResult};
use crate::types::AccessToken;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;

const RESPONSE_TYPE: &str = "cloud_iam";
const GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

#[derive(Clone)]
pub struct TokenProvider {
    http: Client,
    iam_url: String,
    api_key: String,
    timeout: Duration,
}

impl TokenProvider {
    pub fn new(http: Client, iam_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            iam_url: iam_url.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    /// Build the token exchange url with the api key and fixed grant parameters.
    pub fn token_url(&self) -> SyncResult<Url> {
        if self.api_key.trim().is_empty() {
            return Err(SyncError::UrlConstruction("api key is empty".to_string()));
        }

        Url::parse_with_params(
            &self.iam_url,
            &[
                ("apikey", self.api_key.as_str()),
                ("response_type", RESPONSE_TYPE),
                ("grant_type", GRANT_TYPE),
            ],
        )
        .map_err(|e| SyncError::UrlConstruction(format!("token endpoint: {}", e)))
    }

    /// Exchange the api key for a fresh access token.
    pub async fn get_token(&self) -> SyncResult<AccessToken> {
        let url = self.token_url()?;

        log::debug!("Requesting access token from {}", self.iam_url);

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SyncError::from)?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Token exchange rejected with HTTP {}", status.as_u16());
            return Err(SyncError::Authentication {
                failure: AuthFailure::Rejected,
                status: Some(status.as_u16()),
            });
        }

        let body = response.bytes().await.map_err(SyncError::from)?;
        let token = extract_access_token(&body, status.as_u16()).map_err(|e| {
            log::warn!("Token exchange failed with HTTP {}: {}", status.as_u16(), e);
            e
        })?;

        Ok(AccessToken::new(token))
    }
}

/// Pull `access_token` out of a token endpoint response body.
fn extract_access_token(body: &[u8], status: u16) -> SyncResult<String> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| SyncError::Parse(format!("Unable to parse json: {}", e)))?;

    let failed = |failure| SyncError::Authentication {
        failure,
        status: Some(status),
    };

    let object = json.as_object().ok_or_else(|| failed(AuthFailure::NotAnObject))?;

    match object.get("access_token") {
        Some(Value::String(token)) if !token.is_empty() => Ok(token.clone()),
        Some(_) => Err(failed(AuthFailure::InvalidAccessToken)),
        None => Err(failed(AuthFailure::MissingAccessToken)),
    }
}
