//! Google News RSS search client.
//!
//! Fetches per-keyword result feeds and flattens them into [`RawNewsItem`]s
//! for the normalizer. Feed quality is poor by construction: the publisher is
//! carried as a ` - Publisher` suffix on the title, the `<source>` element is
//! sometimes absent, and date formats vary. This module only splits the title
//! suffix; everything else is the pipeline's problem.
//!
//! Multi-query fetches run with bounded concurrency. A single failing query
//! degrades to an empty result with a warning instead of sinking the run.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::candidate::RawNewsItem;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Concurrent in-flight feed requests for multi-query fetches.
const FEED_CONCURRENCY: usize = 6;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request for {query:?} failed: {source}")]
    Unavailable {
        query: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("feed for {query:?} is not parseable RSS: {source}")]
    Malformed {
        query: String,
        #[source]
        source: rss::Error,
    },
}

/// Regional parameters for the search endpoint.
#[derive(Debug, Clone)]
pub struct Locale {
    /// Interface language (`hl`), e.g. `ko`.
    pub language: String,
    /// Country (`gl`), e.g. `KR`.
    pub country: String,
    /// Tag stamped onto every item so downstream stages know which regional
    /// feed produced it.
    pub region_tag: String,
}

impl Locale {
    pub fn korea() -> Self {
        Self {
            language: "ko".into(),
            country: "KR".into(),
            region_tag: "KR".into(),
        }
    }

    pub fn global() -> Self {
        Self {
            language: "en-US".into(),
            country: "US".into(),
            region_tag: "GLOBAL".into(),
        }
    }

    fn ceid(&self) -> String {
        format!("{}:{}", self.country, self.language)
    }
}

/// Thin client over the Google News RSS search endpoint.
#[derive(Debug, Clone)]
pub struct GoogleNewsClient {
    client: Client,
    base_url: String,
}

impl Default for GoogleNewsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleNewsClient {
    pub fn new() -> Self {
        Self::with_base_url("https://news.google.com/rss")
    }

    /// Point the client somewhere else. Used by tests to aim at a local mock.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Fetch search results for one query.
    pub async fn search(&self, query: &str, locale: &Locale) -> Result<Vec<RawNewsItem>, FeedError> {
        let url = format!("{}/search", self.base_url);
        let ceid = locale.ceid();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("hl", locale.language.as_str()),
                ("gl", locale.country.as_str()),
                ("ceid", ceid.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| FeedError::Unavailable {
                query: query.to_string(),
                source,
            })?;

        let body = response.bytes().await.map_err(|source| FeedError::Unavailable {
            query: query.to_string(),
            source,
        })?;

        let channel = rss::Channel::read_from(&body[..]).map_err(|source| FeedError::Malformed {
            query: query.to_string(),
            source,
        })?;

        let items: Vec<RawNewsItem> = channel
            .items()
            .iter()
            .map(|item| to_raw_item(item, locale))
            .collect();

        debug!(query, region = %locale.region_tag, count = items.len(), "feed fetched");
        Ok(items)
    }

    /// Fetch several queries with bounded concurrency.
    ///
    /// Per-query failures degrade to an empty contribution; the combined
    /// result preserves query order so candidate numbering stays stable
    /// across runs with the same input.
    pub async fn search_all(&self, queries: &[(String, Locale)]) -> Vec<RawNewsItem> {
        let results: Vec<Vec<RawNewsItem>> = stream::iter(queries.iter())
            .map(|(query, locale)| async move {
                match self.search(query, locale).await {
                    Ok(items) => items,
                    Err(err) => {
                        warn!(query = %query, error = %err, "feed query failed, continuing without it");
                        Vec::new()
                    }
                }
            })
            .buffered(FEED_CONCURRENCY)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }
}

/// Flatten one RSS item, recovering the publisher from the title suffix when
/// the `<source>` element is missing.
fn to_raw_item(item: &rss::Item, locale: &Locale) -> RawNewsItem {
    let full_title = item.title().unwrap_or_default();
    let (title, title_press) = split_press_suffix(full_title);

    let source_label = item
        .source()
        .map(|s| s.title().unwrap_or(s.url()).to_string())
        .filter(|s| !s.is_empty())
        .or(title_press)
        .unwrap_or_default();

    RawNewsItem {
        title: title.to_string(),
        url: item.link().unwrap_or_default().to_string(),
        source_label,
        published_at_raw: item.pub_date().unwrap_or_default().to_string(),
        region_tag: locale.region_tag.clone(),
    }
}

/// Split the trailing ` - Publisher` marker Google News appends to titles.
///
/// Only the last occurrence counts; titles legitimately contain ` - ` in
/// their own right.
fn split_press_suffix(title: &str) -> (&str, Option<String>) {
    match title.rsplit_once(" - ") {
        Some((head, press)) if !head.is_empty() && !press.trim().is_empty() => {
            (head.trim_end(), Some(press.trim().to_string()))
        }
        _ => (title, None),
    }
}
