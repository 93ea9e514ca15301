use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{redirect, Client, StatusCode};

use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::feed::CachedValidators;

/// Largest body accepted from a feed (5 MiB).
pub const MAX_FEED_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The server answered 304 for the cached validators.
    NotModified,
    Fetched(FetchedFeed),
}

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub body: Bytes,
    pub charset: Option<String>,
    /// Present only when the response carried both `Last-Modified` and `ETag`.
    pub validators: Option<CachedValidators>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// `validators` is `(last_modified, etag)` from the previous cycle.
    async fn fetch(
        &self,
        url: &str,
        validators: Option<(&str, &str)>,
    ) -> Result<FetchOutcome, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .redirect(redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        validators: Option<(&str, &str)>,
    ) -> Result<FetchOutcome, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_owned()))?;

        let mut request = self.client.get(parsed);
        if let Some((last_modified, etag)) = validators {
            request = request
                .header(IF_MODIFIED_SINCE, last_modified)
                .header(IF_NONE_MATCH, etag);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        if let Some(size) = response.content_length() {
            if size > MAX_FEED_SIZE {
                return Err(FetchError::TooLarge {
                    size,
                    max: MAX_FEED_SIZE,
                });
            }
        }

        let headers = response.headers();
        let validators = match (
            header_value(headers, LAST_MODIFIED),
            header_value(headers, ETAG),
        ) {
            (Some(last_modified), Some(etag)) => Some(CachedValidators::new(last_modified, etag)),
            _ => None,
        };
        let charset = header_value(headers, CONTENT_TYPE)
            .and_then(|value| charset_from_content_type(&value));

        let body = response.bytes().await?;
        if body.len() as u64 > MAX_FEED_SIZE {
            return Err(FetchError::TooLarge {
                size: body.len() as u64,
                max: MAX_FEED_SIZE,
            });
        }

        Ok(FetchOutcome::Fetched(FetchedFeed {
            body,
            charset,
            validators,
        }))
    }
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Extracts the lower-cased `charset` parameter of a `Content-Type` value.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_ascii_lowercase())
        } else {
            None
        }
    })
}
