//! Post-selection summarization.
//!
//! Strictly an enrichment step: it runs after the final selection is fixed
//! and can only attach a [`SummaryOutcome`] to each selected item. A failed
//! extraction or summarization marks the item `Unavailable` with the reason;
//! it never removes the item or re-orders the selection.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::gateway::{ChatGateway, ChatModel, ChatRequest, Message};
use crate::pipeline::SelectedItem;

/// Article text sent to the model is capped here; selection summaries do not
/// need the long tail of a page.
const MAX_ARTICLE_CHARS: usize = 12_000;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a news summarizer for accounting-firm analysts. Summarize the article in 3 short bullet points focused on financial, audit, and corporate-structure facts. Answer in plain text, no Markdown.";

#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error("could not fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("no readable article body at {url}")]
    Empty { url: String },
}

/// Result of the summarization attempt for one selected item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Summarized { text: String },
    Unavailable { reason: String },
}

/// Pulls readable article text for a URL.
///
/// Google News links redirect through consent walls and paywalled outlets;
/// implementations are expected to fail often, and callers treat failure as
/// an annotation, not an error.
#[async_trait]
pub trait ArticleExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<String, ExtractionFailure>;
}

/// Best-effort HTTP extractor: fetches the page and pulls heading,
/// paragraph, and list text out of the parsed document.
#[derive(Debug, Clone, Default)]
pub struct HttpArticleExtractor {
    client: reqwest::Client,
}

#[async_trait]
impl ArticleExtractor for HttpArticleExtractor {
    async fn extract(&self, url: &str) -> Result<String, ExtractionFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExtractionFailure::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let html = response.text().await.map_err(|e| ExtractionFailure::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let text = extract_article_text(&html);
        if text.len() < 200 {
            return Err(ExtractionFailure::Empty {
                url: url.to_string(),
            });
        }
        Ok(text)
    }
}

/// Pull readable text from a page: headings, paragraphs, list items, joined
/// one block per line. Script and style bodies never appear because only
/// text under the selected content tags is collected.
fn extract_article_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("h1, h2, h3, p, li") else {
        return String::new();
    };

    let mut blocks = Vec::new();
    for el in doc.select(&selector) {
        let raw = el.text().collect::<Vec<_>>().join(" ");
        let text = normalize_whitespace(&raw);
        if !text.is_empty() {
            blocks.push(text);
        }
    }
    blocks.join("\n")
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Attach a summary outcome to every selected item, in place.
///
/// The selection itself is never altered: same items, same order, whatever
/// happens per item.
pub async fn summarize_selection(
    extractor: &dyn ArticleExtractor,
    gateway: &dyn ChatGateway,
    model: &ChatModel,
    selection: &mut [SelectedItem],
) {
    for item in selection.iter_mut() {
        item.summary = Some(summarize_one(extractor, gateway, model, item).await);
    }
}

async fn summarize_one(
    extractor: &dyn ArticleExtractor,
    gateway: &dyn ChatGateway,
    model: &ChatModel,
    item: &SelectedItem,
) -> SummaryOutcome {
    let article = match extractor.extract(&item.url).await {
        Ok(text) => text,
        Err(err) => {
            warn!(index = item.original_index, error = %err, "article extraction failed");
            return SummaryOutcome::Unavailable {
                reason: err.to_string(),
            };
        }
    };

    let body: String = article.chars().take(MAX_ARTICLE_CHARS).collect();
    let request = ChatRequest::new(
        model.clone(),
        vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(&format!("Title: {}\n\nArticle:\n{}", item.title, body)),
        ],
    );

    match gateway.chat(request).await {
        Ok(resp) if !resp.content.trim().is_empty() => {
            debug!(index = item.original_index, "summary attached");
            SummaryOutcome::Summarized {
                text: resp.content.trim().to_string(),
            }
        }
        Ok(_) => SummaryOutcome::Unavailable {
            reason: "model returned an empty summary".to_string(),
        },
        Err(err) => {
            warn!(index = item.original_index, error = %err, "summarization failed");
            SummaryOutcome::Unavailable {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_content_blocks_and_collapses_whitespace() {
        let html = "<html><body><h1>Title</h1><p>Hello   <b>world</b></p>\n<p>again</p></body></html>";
        assert_eq!(extract_article_text(html), "Title\nHello world\nagain");
    }

    #[test]
    fn ignores_script_and_style_bodies() {
        let html =
            "<style>p { color: red }</style><p>first</p><script>var x = 1;</script><p>second</p>";
        assert_eq!(extract_article_text(html), "first\nsecond");
    }

    #[test]
    fn attribute_values_do_not_leak_into_text() {
        let html = r#"<p data-note="a>b">hello</p>"#;
        assert_eq!(extract_article_text(html), "hello");
    }

    #[test]
    fn commented_out_tags_do_not_swallow_content() {
        let html = "<!-- <script> --><p>kept</p>";
        assert_eq!(extract_article_text(html), "kept");
    }
}
