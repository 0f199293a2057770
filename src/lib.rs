//! Actor/critic self-correction loops for LLM agents.
//!
//! A [`Generator`] drafts an answer together with its own critique and the
//! searches that would improve it. The [`Runner`] executes those searches
//! through a [`ToolExecutor`], feeds the results back, and asks for a
//! revision until the actor stops asking for research or the
//! [`IterationPolicy`] cuts the loop. Structured turns are validated against
//! their [`OutputSchema`] and repaired in place before they are accepted.
//!
//! [`HallucinationChecker`] runs the same loop to verify the claims of a
//! text, and [`CritiqueLoop`] pairs two generators as writer and reviewer.
//!
//! # Quick start
//!
//! ```rust
//! use reflex_line::{
//!     Conversation, Generator, Message, OutputSchema, Runner, SearchHit, SearchProvider,
//!     StepError, StopReason, Task, ToolCall, ToolExecutor,
//! };
//! use serde_json::json;
//!
//! struct Docs;
//! impl SearchProvider for Docs {
//!     fn search(&self, _query: &str, _k: usize) -> Result<Vec<SearchHit>, StepError> {
//!         Ok(vec![SearchHit::new("https://docs.rs", "Rust crate docs")])
//!     }
//! }
//!
//! /// Searches once, then answers.
//! struct Agent;
//! impl Generator for Agent {
//!     fn generate(&mut self, convo: &Conversation, _: OutputSchema) -> Result<Message, StepError> {
//!         if convo.len() == 1 {
//!             let call = ToolCall::new("c1", "search", json!({ "query": "rust docs" }));
//!             Ok(Message::assistant_with_tools("", vec![call]))
//!         } else {
//!             Ok(Message::assistant("See https://docs.rs"))
//!         }
//!     }
//! }
//!
//! let mut runner = Runner::new(Agent, ToolExecutor::new(Docs));
//! let outcome = runner.run(Task::Retrieval, "Where are Rust docs?").unwrap();
//!
//! assert_eq!(outcome.stop, StopReason::Completed);
//! assert_eq!(outcome.conversation().len(), 4);
//! assert_eq!(outcome.conversation().surfaced_urls(), vec!["https://docs.rs"]);
//! ```

mod agent;
pub mod checkpoint;
pub mod config;
pub mod critique;
pub mod hallucination;
pub mod llm;
mod message;
pub mod policy;
pub mod repair;
mod runner;
pub mod schema;
mod state;
pub mod tools;

pub use agent::{Generator, StepError};
pub use checkpoint::{Checkpoint, FileCheckpoint, MemoryCheckpoint};
pub use config::Config;
pub use critique::CritiqueLoop;
pub use hallucination::{AnalysisResult, Confidence, HallucinationChecker};
pub use llm::AnthropicGenerator;
pub use message::{Conversation, Message, Role, ToolCall, ToolResult};
pub use policy::{FinalMarker, IterationPolicy, MAX_ITERATIONS, MessageBudget, TrailingRounds};
pub use repair::{Candidate, respond_with_retries};
pub use runner::{CancelToken, ErrorEvent, RunOutcome, Runner, StepEvent, StopReason};
pub use schema::{
    ClaimSet, FinalAnalysis, OutputSchema, Reflection, RevisedAnswer, Structured,
    StructuredAnswer, parse,
};
pub use state::{AgentState, Step, Task, next_step};
pub use tools::{ExaSearch, SearchHit, SearchProvider, ToolExecutor};
