//! Front API HTTP client.
//!
//! Every request goes through `get_rate_limited`, which waits
//! out 429 responses and re-issues the same URL. Paginated collections are
//! walked with an explicit cursor loop, one page at a time.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::error::FrontError;
use super::models::{Comment, Conversation, Inbox, Message, Page};
use super::rate_limit::{RateLimitKind, RateLimitState, Sleeper, TokioSleeper};
use crate::retry::BackoffConfig;

pub const DEFAULT_API_BASE: &str = "https://api2.frontapp.com";

/// Media type requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Listings and resource metadata.
    Json,
    /// Raw RFC 822 message source, written out as `.eml`.
    Rfc822,
    /// Attachment bytes in whatever type they were uploaded with.
    Any,
}

impl Accept {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::Rfc822 => "message/rfc822",
            Accept::Any => "*/*",
        }
    }
}

/// Explicit client configuration: the token and endpoint live here rather
/// than in process-wide state.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub token: String,
    pub backoff: BackoffConfig,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Headers sent with every request.
    fn default_headers(&self) -> Result<HeaderMap, FrontError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| FrontError::InvalidToken(e.to_string()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }
}

/// Rate-limit aware client for the Front core API.
pub struct FrontClient {
    http: Client,
    api_base: String,
    backoff: BackoffConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl FrontClient {
    pub fn new(config: &ClientConfig) -> Result<Self, FrontError> {
        Self::with_sleeper(config, Arc::new(TokioSleeper))
    }

    /// Build a client that waits out rate limits through `sleeper`.
    pub fn with_sleeper(
        config: &ClientConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, FrontError> {
        let http = Client::builder()
            .default_headers(config.default_headers()?)
            .build()
            .map_err(|e| FrontError::Http {
                source: e,
                url: config.api_base.clone(),
            })?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            backoff: config.backoff,
            sleeper,
        })
    }

    /// Absolute URL for an API path such as `/inboxes`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Fetch every record of a paginated collection, following `next` links
    /// until a page has none. Records keep server order across pages.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        start_url: &str,
    ) -> Result<Vec<T>, FrontError> {
        let mut resources: Vec<T> = Vec::new();
        let mut next = Some(start_url.to_string());
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let body = self
                .get_rate_limited(&url, Accept::Json)
                .await?
                .bytes()
                .await
                .map_err(|e| FrontError::Http {
                    source: e,
                    url: url.clone(),
                })?;
            let page: Page<T> = serde_json::from_slice(&body)
                .map_err(|source| FrontError::InvalidResponse {
                    url: url.clone(),
                    source,
                })?;

            next = page.next_url().map(str::to_owned);
            pages += 1;
            tracing::debug!(
                url = %url,
                page = pages,
                records = page.results.len(),
                "Fetched page"
            );
            resources.extend(page.results);
        }

        Ok(resources)
    }

    /// Fetch a single non-paginated payload as raw bytes.
    pub async fn fetch_one(&self, url: &str, accept: Accept) -> Result<Vec<u8>, FrontError> {
        let bytes = self
            .get_rate_limited(url, accept)
            .await?
            .bytes()
            .await
            .map_err(|e| FrontError::Http {
                source: e,
                url: url.to_string(),
            })?;
        Ok(bytes.to_vec())
    }

    /// GET `url`, waiting out 429 responses and re-issuing the same request
    /// until the server answers with something else.
    async fn get_rate_limited(&self, url: &str, accept: Accept) -> Result<Response, FrontError> {
        let mut unsignalled = 0u32;

        loop {
            tracing::debug!("Querying API... {}", url);
            let response = self
                .http
                .get(url)
                .header(ACCEPT, accept.as_str())
                .send()
                .await
                .map_err(|e| FrontError::Http {
                    source: e,
                    url: url.to_string(),
                })?;

            let status = response.status();
            if status != StatusCode::TOO_MANY_REQUESTS {
                if !status.is_success() {
                    return Err(FrontError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                return Ok(response);
            }

            let state = RateLimitState::from_headers(response.headers());
            match state.kind() {
                RateLimitKind::Burst { tier } => {
                    tracing::warn!("Tier {} resource burst limit reached", tier)
                }
                RateLimitKind::Global { limit } => {
                    tracing::warn!("Global rate limit of {} reached", limit)
                }
            }

            let wait = match state.retry_after() {
                Some(wait) => {
                    unsignalled = 0;
                    tracing::info!("Waiting {}s before retrying {}", wait.as_secs(), url);
                    wait
                }
                None => {
                    if !self.backoff.allows(unsignalled) {
                        return Err(FrontError::RateLimitedWithoutRetryAfter {
                            url: url.to_string(),
                            attempts: unsignalled,
                        });
                    }
                    let wait = self.backoff.delay_for_retry(unsignalled);
                    unsignalled += 1;
                    tracing::warn!(
                        "429 without retry-after (attempt {}/{}), backing off {}s",
                        unsignalled,
                        self.backoff.max_retries,
                        wait.as_secs()
                    );
                    wait
                }
            };
            self.sleeper.sleep(wait).await;
        }
    }

    pub async fn list_inboxes(&self) -> Result<Vec<Inbox>, FrontError> {
        self.fetch_all(&self.url("/inboxes")).await
    }

    pub async fn list_inbox_conversations(
        &self,
        inbox_id: &str,
    ) -> Result<Vec<Conversation>, FrontError> {
        self.fetch_all(&self.url(&format!("/inboxes/{}/conversations", inbox_id)))
            .await
    }

    /// `encoded_query` must already be percent-encoded as one path segment.
    pub async fn search_conversations(
        &self,
        encoded_query: &str,
    ) -> Result<Vec<Conversation>, FrontError> {
        self.fetch_all(&self.url(&format!("/conversations/search/{}", encoded_query)))
            .await
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, FrontError> {
        self.fetch_all(&self.url(&format!("/conversations/{}/messages", conversation_id)))
            .await
    }

    pub async fn list_comments(&self, conversation_id: &str) -> Result<Vec<Comment>, FrontError> {
        self.fetch_all(&self.url(&format!("/conversations/{}/comments", conversation_id)))
            .await
    }

    /// Raw RFC 822 source of a message.
    pub async fn fetch_message_source(&self, message_id: &str) -> Result<Vec<u8>, FrontError> {
        self.fetch_one(&self.url(&format!("/messages/{}", message_id)), Accept::Rfc822)
            .await
    }

    pub async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, FrontError> {
        self.fetch_one(url, Accept::Any).await
    }
}
