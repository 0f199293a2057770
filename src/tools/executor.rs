use std::thread;

use crate::agent::StepError;
use crate::message::{ToolCall, ToolResult};
use crate::schema::OutputSchema;
use crate::tools::search::{SEARCH_TOOL, SearchHit, SearchProvider};
use serde_json::{Value, json};
use tracing::{info, warn};

/// Hits kept per query unless configured otherwise.
pub const DEFAULT_RESULTS_PER_QUERY: usize = 3;

/// Runs the actor's tool calls against a search provider.
///
/// Every query of every call is dispatched on its own scoped thread. Results
/// come back in the order the calls and queries were issued, whatever order
/// the searches finish in. A failing query is recorded in its call's payload
/// and never aborts the others.
pub struct ToolExecutor {
    provider: Box<dyn SearchProvider>,
    k: usize,
}

impl ToolExecutor {
    pub fn new(provider: impl SearchProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            k: DEFAULT_RESULTS_PER_QUERY,
        }
    }

    pub fn with_results_per_query(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn results_per_query(&self) -> usize {
        self.k
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>, StepError> {
        self.provider.search(query, self.k).map_err(StepError::into_tool)
    }

    /// One result list per query, input order preserved.
    pub fn search_batch(&self, queries: &[String]) -> Vec<Result<Vec<SearchHit>, StepError>> {
        if queries.len() <= 1 {
            return queries.iter().map(|q| self.search(q)).collect();
        }

        thread::scope(|scope| {
            let handles: Vec<_> = queries
                .iter()
                .map(|query| scope.spawn(move || self.search(query)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(StepError::tool("search thread panicked")))
                })
                .collect()
        })
    }

    /// One [`ToolResult`] per call, in issue order.
    pub fn execute(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let per_call: Vec<Option<Vec<String>>> = calls
            .iter()
            .map(|call| is_search_tool(&call.name).then(|| call.queries()))
            .collect();

        let all_queries: Vec<String> = per_call.iter().flatten().flatten().cloned().collect();
        let mut outcomes = self.search_batch(&all_queries).into_iter();

        calls
            .iter()
            .zip(per_call)
            .map(|(call, queries)| {
                let Some(queries) = queries else {
                    warn!(tool = %call.name, "unknown tool requested");
                    return ToolResult {
                        tool_call_id: call.id.clone(),
                        content: json!({ "error": format!("unknown tool: {}", call.name) }),
                        is_error: true,
                    };
                };

                let mut failed = 0;
                let entries: Vec<Value> = queries
                    .iter()
                    .map(|query| match outcomes.next() {
                        Some(Ok(hits)) => json!({ "query": query, "results": hits }),
                        Some(Err(err)) => {
                            failed += 1;
                            warn!(query = %query, error = %err, "search failed");
                            json!({ "query": query, "error": err.to_string() })
                        }
                        None => {
                            failed += 1;
                            json!({ "query": query, "error": "search result missing" })
                        }
                    })
                    .collect();

                info!(
                    tool = %call.name,
                    queries = queries.len(),
                    failed,
                    "tool executed"
                );

                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: Value::Array(entries),
                    is_error: !queries.is_empty() && failed == queries.len(),
                }
            })
            .collect()
    }
}

/// The plain search tool, or a structured answer whose queries we run.
fn is_search_tool(name: &str) -> bool {
    name == SEARCH_TOOL
        || [
            OutputSchema::InitialAnswer,
            OutputSchema::RevisedAnswer,
            OutputSchema::ClaimExtraction,
            OutputSchema::FinalAnalysis,
        ]
        .iter()
        .any(|schema| schema.tool_name() == Some(name))
}
