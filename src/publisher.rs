use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{PublishItem, PublishOutcome};

pub const PINTEREST_API_BASE: &str = "https://api.pinterest.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to reach publishing endpoint: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid publishing endpoint: {0}")]
    Url(String),
}

/// Raw answer from the publishing endpoint; any status is a valid answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinResponse {
    pub status: u16,
    pub body: String,
    /// Set when the status arrived but the body could not be read.
    pub body_error: Option<String>,
}

#[async_trait]
pub trait PinPublisher: Send + Sync {
    async fn create_pin(&self, item: &PublishItem) -> Result<PinResponse, PublishError>;
}

#[derive(Clone)]
pub struct PinterestClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for PinterestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinterestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PinterestClient {
    pub fn with_base_url(token: String, base_url: Url) -> Result<Self, PublishError> {
        let http = Client::builder()
            .user_agent("pin-scheduler/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, PublishError> {
        let base_url =
            Url::parse(&cfg.publishing.api_base).map_err(|e| PublishError::Url(e.to_string()))?;
        Self::with_base_url(cfg.publishing.token.expose().to_string(), base_url)
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request, PublishError> {
        let endpoint = self
            .base_url
            .join("v5/pins")
            .map_err(|e| PublishError::Url(e.to_string()))?;
        Ok(self
            .http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(body)
            .build()?)
    }
}

#[async_trait]
impl PinPublisher for PinterestClient {
    async fn create_pin(&self, item: &PublishItem) -> Result<PinResponse, PublishError> {
        let body = build_pin_body(item);
        let request = self.build_request(&body)?;
        debug!(url=%request.url(), board_id=%item.board_id, "sending pin");
        let res = self.http.execute(request).await?;
        let status = res.status().as_u16();
        let (body, body_error) = match res.text().await {
            Ok(body) => (body, None),
            Err(err) => {
                warn!(status, error = %err, "failed to read pin response body");
                (String::new(), Some(format!("failed to read response body: {err}")))
            }
        };
        Ok(PinResponse {
            status,
            body,
            body_error,
        })
    }
}

/// Pinterest v5 wants the image as a typed media source, not a bare URL.
pub fn build_pin_body(item: &PublishItem) -> Value {
    json!({
        "title": item.title,
        "description": item.description,
        "alt_text": item.alt_text,
        "link": item.link,
        "media_source": {
            "source_type": "image_url",
            "url": item.image_url,
        },
        "board_id": item.board_id,
    })
}

pub fn is_accepted(status: u16) -> bool {
    matches!(status, 200 | 201 | 202)
}

/// Submit one item and fold every failure into the outcome record.
pub async fn publish(
    publisher: &dyn PinPublisher,
    index: usize,
    item: &PublishItem,
) -> PublishOutcome {
    match publisher.create_pin(item).await {
        Ok(res) => {
            let ok = is_accepted(res.status);
            if ok {
                info!(index, status = res.status, "pin posted");
            } else {
                warn!(index, status = res.status, body = %res.body, "pin rejected");
            }
            PublishOutcome {
                index,
                ok,
                status_code: Some(res.status),
                response: res.body_error.is_none().then_some(res.body),
                error: res.body_error,
            }
        }
        Err(err) => {
            warn!(index, error = %err, "pin request failed");
            PublishOutcome {
                index,
                ok: false,
                status_code: None,
                response: None,
                error: Some(err.to_string()),
            }
        }
    }
}
