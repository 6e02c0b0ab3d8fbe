use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::{sync::Mutex, time::Instant};
use tracing::{Level, debug, instrument};

const METADATA_ENDPOINT: &str = "http://metadata.google.internal/computeMetadata/v1";
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Metadata server responded with {0}.")]
    Status(StatusCode),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub enum TokenSource {
    Static(String),
    Metadata(Mutex<Option<CachedToken>>),
}

impl TokenSource {
    pub fn new(access_token: Option<String>) -> Self {
        match access_token {
            Some(token) => Self::Static(token),
            None => Self::Metadata(Mutex::default()),
        }
    }

    pub async fn token(&self, http: &Client) -> Result<String, TokenError> {
        let cache = match self {
            Self::Static(token) => return Ok(token.clone()),
            Self::Metadata(cache) => cache,
        };

        let mut cache = cache.lock().await;

        if let Some(cached) = cache.as_ref()
            && Instant::now() + EXPIRY_MARGIN < cached.expires_at
        {
            return Ok(cached.value.clone());
        }

        let response: TokenResponse = metadata(http, "instance/service-accounts/default/token")
            .await?
            .json()
            .await?;

        debug!(
            "Fetched access token from metadata server, valid for {}s.",
            response.expires_in
        );

        let value = response.access_token;
        *cache = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });

        Ok(value)
    }
}

#[instrument(skip(http), ret(level = Level::DEBUG), err(level = Level::WARN))]
pub async fn project_id(http: &Client) -> Result<String, TokenError> {
    Ok(metadata(http, "project/project-id").await?.text().await?)
}

async fn metadata(http: &Client, path: &str) -> Result<reqwest::Response, TokenError> {
    let response = http
        .get(format!("{METADATA_ENDPOINT}/{path}"))
        .header("Metadata-Flavor", "Google")
        .send()
        .await?;

    match response.status() {
        status if status.is_success() => Ok(response),
        status => Err(TokenError::Status(status)),
    }
}
