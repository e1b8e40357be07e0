//! Best-effort web search fallback.
//!
//! Invoked only when the structured and semantic tiers left the composer
//! short of evidence. Results carry no provenance guarantee and are cited
//! as unverified general web information. Failures degrade to an empty
//! result set close to the source; the only error callers ever see from
//! the bundled client is a timeout imposed by the composer.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::warn;

use crate::types::TierError;

/// One external search result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Seam the composer drives; lets tests count invocations with a double.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search the web, returning at most `max_results` results.
    async fn fallback_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebResult>, TierError>;
}

static RESULT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.result").expect("static selector is valid"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a").expect("static selector is valid"));
static SNIPPET_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__snippet").expect("static selector is valid"));

/// Parse DuckDuckGo's HTML results page.
fn parse_results(html: &str, max_results: usize) -> Vec<WebResult> {
    let document = Html::parse_document(html);
    let mut results = Vec::new();

    for element in document.select(&RESULT_SELECTOR) {
        if results.len() == max_results {
            break;
        }
        let Some(anchor) = element.select(&TITLE_SELECTOR).next() else {
            continue;
        };
        let title = anchor.text().collect::<String>().trim().to_string();
        let url = anchor.value().attr("href").unwrap_or_default().to_string();
        let snippet = element
            .select(&SNIPPET_SELECTOR)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        if !title.is_empty() && !url.is_empty() {
            results.push(WebResult {
                title,
                snippet,
                url,
            });
        }
    }
    results
}

/// Web search via DuckDuckGo's HTML endpoint — no API key required.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    base_url: String,
}

impl DuckDuckGoSearch {
    pub fn new(timeout: std::time::Duration) -> Result<Self, TierError> {
        let client = reqwest::Client::builder()
            .user_agent("bhujal/0.1")
            .timeout(timeout)
            .build()
            .map_err(|err| TierError::unavailable(crate::types::TierKind::Web, err))?;
        Ok(Self {
            client,
            base_url: "https://html.duckduckgo.com/html".to_string(),
        })
    }

    /// Point at a different endpoint; used by tests against a local mock.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn fallback_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebResult>, TierError> {
        let url = match url::Url::parse_with_params(&self.base_url, &[("q", query)]) {
            Ok(url) => url,
            Err(err) => {
                warn!(%err, "could not build web search url");
                return Ok(Vec::new());
            }
        };

        // Best-effort by contract: transport and status failures degrade to
        // an empty result set rather than propagating.
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "web search request failed");
                return Ok(Vec::new());
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "web search returned an error status");
            return Ok(Vec::new());
        }

        let html = match response.text().await {
            Ok(html) => html,
            Err(err) => {
                warn!(%err, "web search body could not be read");
                return Ok(Vec::new());
            }
        };

        Ok(parse_results(&html, max_results))
    }
}
