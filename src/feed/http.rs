//! HTTP feed client — pages through a channel history API, newest first.
//!
//! Wire contract:
//! - `GET {base}/channels/{feed}/messages?limit={n}[&offset_id={id}]` returns
//!   `{"messages": [RawRecord, ...]}` ordered newest first. `offset_id`
//!   restricts the page to records strictly older than `id`.
//! - `GET {base}/channels/{feed}` succeeds when the feed is visible to the token.
//!
//! Pages are requested lazily: the next page is only fetched once the
//! consumer has drained the current one.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{FeedClient, RawRecord, RecordStream};
use crate::error::FeedError;

/// Connection settings for [`HttpFeedClient`].
#[derive(Debug, Clone)]
pub struct HttpFeedConfig {
    pub base_url: String,
    pub token: SecretString,
    pub page_size: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<RawRecord>,
}

/// Feed client backed by a paged JSON history API.
pub struct HttpFeedClient {
    config: HttpFeedConfig,
    client: reqwest::Client,
}

impl HttpFeedClient {
    pub fn new(config: HttpFeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FeedError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self.config.token.expose_secret();
        if token.is_empty() {
            request
        } else {
            request.bearer_auth(token)
        }
    }

    async fn send(
        &self,
        feed: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FeedError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| FeedError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                feed: feed.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// Fetch one page of records older than `offset_id` (or the newest page).
    async fn fetch_page(
        &self,
        feed: &str,
        offset_id: Option<i64>,
    ) -> Result<Vec<RawRecord>, FeedError> {
        let mut request = self
            .client
            .get(self.api_url(&format!("channels/{feed}/messages")))
            .query(&[("limit", self.config.page_size.to_string())]);
        if let Some(offset) = offset_id {
            request = request.query(&[("offset_id", offset.to_string())]);
        }

        let page: HistoryPage = self
            .send(feed, request)
            .await?
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        debug!(feed, offset_id = ?offset_id, records = page.messages.len(), "Fetched feed page");
        Ok(page.messages)
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    fn fetch_recent<'a>(&'a self, feed: &'a str) -> RecordStream<'a> {
        // `Some(offset)` = another page may follow, `None` = exhausted.
        let pages = stream::try_unfold(Some(None::<i64>), move |cursor| async move {
            let Some(offset_id) = cursor else {
                return Ok(None);
            };
            let page = self.fetch_page(feed, offset_id).await?;
            if page.is_empty() {
                return Ok(None);
            }
            let next = (page.len() >= self.config.page_size).then(|| page.last().map(|r| r.id));
            Ok(Some((page, next)))
        });

        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn health_check(&self, feed: &str) -> Result<(), FeedError> {
        let request = self.client.get(self.api_url(&format!("channels/{feed}")));
        self.send(feed, request).await.map(|_| ())
    }
}
