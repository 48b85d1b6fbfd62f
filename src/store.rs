//! Remote version-controlled store backing the batch queue.
//!
//! The production implementation speaks the GitHub contents API: a directory
//! listing, base64 file bodies, and blob shas as integrity tokens.
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::model::{EntryKind, RemoteEntry, RemoteFile};

pub const GITHUB_API_BASE: &str = "https://api.github.com/";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "pin-scheduler/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to reach store: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid store response: {0}")]
    Decode(String),
    #[error("invalid store URL: {0}")]
    Url(String),
}

impl StoreError {
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// List a directory. A directory that does not exist lists as empty.
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, StoreError>;

    /// Read a file with its current sha. `None` when it does not exist.
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, StoreError>;

    /// Create (`sha = None`) or overwrite a file. Returns the new blob sha.
    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Delete a file, guarded by the sha it must currently have.
    async fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<(), StoreError>;
}

/// Fetches a CSV body from an arbitrary URL (ad-hoc runs).
#[async_trait]
pub trait RawFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, StoreError>;
}

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    base_url: Url,
    token: String,
    owner: String,
    repo: String,
    branch: String,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    pub fn new(
        base_url: Url,
        token: String,
        owner: String,
        repo: String,
        branch: String,
    ) -> Result<Self, StoreError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
            owner,
            repo,
            branch,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, StoreError> {
        let base_url =
            Url::parse(&cfg.store.api_base).map_err(|e| StoreError::Url(e.to_string()))?;
        Self::new(
            base_url,
            cfg.store.token.expose().to_string(),
            cfg.store.owner.clone(),
            cfg.store.name.clone(),
            cfg.store.branch.clone(),
        )
    }

    fn contents_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str(), "contents"])
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    /// GET for a file or directory at the configured branch.
    pub fn build_get_request(&self, path: &str) -> Result<reqwest::Request, StoreError> {
        let mut url = self.contents_url(path)?;
        url.query_pairs_mut().append_pair("ref", &self.branch);
        Ok(self.request(Method::GET, url).build()?)
    }

    pub fn build_put_request(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<reqwest::Request, StoreError> {
        let url = self.contents_url(path)?;
        let body = build_put_body(&self.branch, content, message, sha);
        Ok(self.request(Method::PUT, url).json(&body).build()?)
    }

    pub fn build_delete_request(
        &self,
        path: &str,
        sha: &str,
        message: &str,
    ) -> Result<reqwest::Request, StoreError> {
        let url = self.contents_url(path)?;
        let body = json!({
            "message": message,
            "sha": sha,
            "branch": self.branch,
        });
        Ok(self.request(Method::DELETE, url).json(&body).build()?)
    }

    /// Execute and return the body, `None` on 404.
    async fn execute(&self, request: reqwest::Request) -> Result<Option<String>, StoreError> {
        debug!(method=%request.method(), url=%request.url(), "sending store request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = match res.text().await {
            Ok(body) => body,
            Err(err) if status.is_success() => return Err(err.into()),
            Err(err) => format!("(unreadable body: {err})"),
        };
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(body))
    }
}

#[async_trait]
impl ContentStore for GithubClient {
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, StoreError> {
        let request = self.build_get_request(dir)?;
        match self.execute(request).await? {
            Some(body) => parse_listing(&body),
            None => Ok(Vec::new()),
        }
    }

    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, StoreError> {
        let request = self.build_get_request(path)?;
        match self.execute(request).await? {
            Some(body) => parse_file(&body).map(Some),
            None => Ok(None),
        }
    }

    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<String, StoreError> {
        let request = self.build_put_request(path, content, message, sha)?;
        let body = self
            .execute(request)
            .await?
            .ok_or_else(|| StoreError::Status {
                status: 404,
                body: format!("cannot write {path}"),
            })?;
        let payload: PutResponse =
            serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(payload.content.sha)
    }

    async fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<(), StoreError> {
        let request = self.build_delete_request(path, sha, message)?;
        match self.execute(request).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::Status {
                status: 404,
                body: format!("{path} not found"),
            }),
        }
    }
}

pub fn build_put_body(branch: &str, content: &[u8], message: &str, sha: Option<&str>) -> Value {
    let mut body = json!({
        "message": message,
        "content": BASE64_STANDARD.encode(content),
        "branch": branch,
    });
    if let Some(sha) = sha {
        body["sha"] = Value::String(sha.to_string());
    }
    body
}

#[derive(Deserialize)]
struct EntryResp {
    name: String,
    path: String,
    #[serde(default)]
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct FileResp {
    path: String,
    #[serde(default)]
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

pub fn parse_listing(body: &str) -> Result<Vec<RemoteEntry>, StoreError> {
    let entries: Vec<EntryResp> = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("expected a directory listing: {e}")))?;
    Ok(entries
        .into_iter()
        .map(|e| RemoteEntry {
            name: e.name,
            path: e.path,
            kind: EntryKind::parse(&e.kind),
            sha: e.sha,
        })
        .collect())
}

pub fn parse_file(body: &str) -> Result<RemoteFile, StoreError> {
    let file: FileResp = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("expected a file: {e}")))?;
    let content = match (file.encoding.as_deref(), file.content) {
        (Some("base64"), Some(content)) => decode_base64(&content)?,
        (encoding, _) => {
            return Err(StoreError::Decode(format!(
                "{} has no inline content (encoding {:?})",
                file.path, encoding
            )))
        }
    };
    Ok(RemoteFile {
        path: file.path,
        sha: file.sha,
        content,
    })
}

/// GitHub wraps base64 bodies at 60 columns.
pub fn decode_base64(raw: &str) -> Result<Vec<u8>, StoreError> {
    let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64_STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Decode(format!("bad base64 content: {e}")))
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, StoreError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RawFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, StoreError> {
        let url = Url::parse(url).map_err(|e| StoreError::Url(e.to_string()))?;
        let res = self.http.get(url).send().await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
