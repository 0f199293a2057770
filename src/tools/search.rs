use std::time::Duration;

use crate::agent::StepError;
use crate::tools::http::{DEFAULT_TIMEOUT, post_json};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// Name of the plain search tool offered to free-text generators.
pub const SEARCH_TOOL: &str = "search";

/// Highlight text used when the provider returns none.
pub const NO_HIGHLIGHTS: &str = "No highlights";

const EXA_SEARCH_URL: &str = "https://api.exa.ai/search";

/// One retrieved document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub highlight: String,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, highlight: impl Into<String>) -> Self {
        let highlight = highlight.into();
        Self {
            url: url.into(),
            highlight: if highlight.trim().is_empty() {
                NO_HIGHLIGHTS.to_string()
            } else {
                highlight
            },
        }
    }
}

/// The retrieval collaborator: at most `k` hits per query, best first.
pub trait SearchProvider: Send + Sync {
    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, StepError>;
}

impl<P: SearchProvider + ?Sized> SearchProvider for std::sync::Arc<P> {
    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, StepError> {
        (**self).search(query, k)
    }
}

impl<P: SearchProvider + ?Sized> SearchProvider for Box<P> {
    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, StepError> {
        (**self).search(query, k)
    }
}

/// Tool definition for the `search` tool, in the model's tool format.
pub fn search_tool_definition() -> Value {
    json!({
        "name": SEARCH_TOOL,
        "description": "Perform a search query on the web, and retrieve the most relevant URLs with highlights.",
        "input_schema": {
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query to perform." }
            },
            "required": ["query"]
        }
    })
}

/// Exa neural search with highlights.
pub struct ExaSearch {
    api_key: String,
    url: String,
    timeout: Duration,
}

impl ExaSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: EXA_SEARCH_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SearchProvider for ExaSearch {
    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, StepError> {
        let body = json!({
            "query": query,
            "type": "auto",
            "numResults": k,
            "contents": { "highlights": true },
        });
        let response = post_json(
            &self.url,
            &[("x-api-key", self.api_key.as_str())],
            &body,
            self.timeout,
        )
        .map_err(StepError::into_tool)?;
        let hits = parse_exa_results(&response, k);
        debug!(query, hits = hits.len(), "exa search");
        Ok(hits)
    }
}

fn parse_exa_results(response: &Value, k: usize) -> Vec<SearchHit> {
    response
        .get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|result| {
                    let url = result.get("url").and_then(Value::as_str)?;
                    let highlight = result
                        .get("highlights")
                        .and_then(Value::as_array)
                        .map(|h| {
                            h.iter()
                                .filter_map(Value::as_str)
                                .collect::<Vec<_>>()
                                .join(" ... ")
                        })
                        .unwrap_or_default();
                    Some(SearchHit::new(url, highlight))
                })
                .take(k)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_highlight_falls_back() {
        let hit = SearchHit::new("https://a.example", "  ");
        assert_eq!(hit.highlight, NO_HIGHLIGHTS);
    }

    #[test]
    fn parses_exa_response() {
        let response = json!({
            "results": [
                { "url": "https://a.example", "highlights": ["first", "second"] },
                { "url": "https://b.example" },
                { "title": "no url" },
                { "url": "https://c.example", "highlights": [] },
                { "url": "https://d.example", "highlights": ["over k"] }
            ]
        });
        let hits = parse_exa_results(&response, 3);
        assert_eq!(
            hits,
            vec![
                SearchHit::new("https://a.example", "first ... second"),
                SearchHit::new("https://b.example", NO_HIGHLIGHTS),
                SearchHit::new("https://c.example", NO_HIGHLIGHTS),
            ]
        );
    }

    #[test]
    fn missing_results_is_empty() {
        assert!(parse_exa_results(&json!({}), 3).is_empty());
    }

    #[test]
    fn search_bad_url_is_tool_error() {
        let exa = ExaSearch::new("key")
            .with_url("http://localhost:1/search")
            .with_timeout(Duration::from_secs(2));
        let err = exa.search("anything", 3).unwrap_err();
        assert!(matches!(err, StepError::ToolExecution(_)));
    }

    #[test]
    fn tool_definition_names_query() {
        let def = search_tool_definition();
        assert_eq!(def["name"], SEARCH_TOOL);
        assert_eq!(def["input_schema"]["required"][0], "query");
    }
}
