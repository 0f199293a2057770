//! Typed shapes for the actor's structured output.
//!
//! Every structured answer travels as the arguments of a tool call named
//! after its schema. [`parse`] turns that call back into the typed value and
//! [`OutputSchema::validate`] checks the invariants serde cannot express,
//! some of which depend on what the conversation has already surfaced.

use crate::agent::StepError;
use crate::message::{Conversation, Message, cites_url, url_in};
use crate::tools::parse::extract_json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Soft length budget for an answer, in words.
pub const ANSWER_WORD_BUDGET: usize = 250;

/// Most follow-up queries a single answer may request.
pub const MAX_SEARCH_QUERIES: usize = 3;

/// Selects the instruction variant and output shape for one generator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSchema {
    InitialAnswer,
    RevisedAnswer,
    ClaimExtraction,
    FinalAnalysis,
    /// Unstructured reply, optionally with `search` tool calls.
    FreeText,
}

impl OutputSchema {
    /// Name of the tool call that carries this schema, `None` for free text.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            Self::InitialAnswer => Some("AnswerQuestion"),
            Self::RevisedAnswer => Some("ReviseAnswer"),
            Self::ClaimExtraction => Some("ExtractClaims"),
            Self::FinalAnalysis => Some("FinalAnalysis"),
            Self::FreeText => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        self.tool_name().is_some()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::InitialAnswer => {
                "Answer the question. Provide an answer, reflection, and then follow up with \
                 search queries to improve the answer."
            }
            Self::RevisedAnswer => {
                "Revise your original answer to your question. Provide an answer, reflection, \
                 cite your reflection with references, and finally add search queries to \
                 improve the answer."
            }
            Self::ClaimExtraction => {
                "Extract every atomic factual claim from the text and write one web search \
                 query per claim that would verify it."
            }
            Self::FinalAnalysis => {
                "Classify each claim as verified or hallucinated based on the retrieved \
                 evidence, and list the source URLs used."
            }
            Self::FreeText => "Reply in plain text, calling the search tool when needed.",
        }
    }

    /// JSON Schema definition sent to the model and echoed back in repair
    /// prompts. Free text has none.
    pub fn json_schema(&self) -> Value {
        let reflection = json!({
            "type": "object",
            "description": "Your reflection on the initial answer.",
            "properties": {
                "missing": { "type": "string", "description": "Critique of what is missing." },
                "superfluous": { "type": "string", "description": "Critique of what is superfluous." }
            },
            "required": ["missing", "superfluous"]
        });
        let queries = |description: &str| {
            json!({
                "type": "array",
                "items": { "type": "string" },
                "maxItems": MAX_SEARCH_QUERIES,
                "description": description,
            })
        };

        match self {
            Self::InitialAnswer => json!({
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": format!("~{ANSWER_WORD_BUDGET} word detailed answer to the question.")
                    },
                    "reflection": reflection,
                    "search_queries": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "maxItems": MAX_SEARCH_QUERIES,
                        "description": "1-3 search queries for researching improvements to address the critique of your current answer."
                    }
                },
                "required": ["answer", "reflection", "search_queries"]
            }),
            Self::RevisedAnswer => json!({
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": format!("~{ANSWER_WORD_BUDGET} word revised answer with numerical citations.")
                    },
                    "reflection": reflection,
                    "search_queries": queries("0-3 further search queries. Leave empty when the answer is final."),
                    "references": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Citations motivating your updated answer, e.g. \"[1] https://example.com\". Only cite URLs returned by earlier searches."
                    }
                },
                "required": ["answer", "reflection", "references"]
            }),
            Self::ClaimExtraction => json!({
                "type": "object",
                "properties": {
                    "claims": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "Atomic factual claims found in the text."
                    },
                    "search_queries": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "One search query per claim, in the same order."
                    }
                },
                "required": ["claims", "search_queries"]
            }),
            Self::FinalAnalysis => json!({
                "type": "object",
                "properties": {
                    "verified_facts": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Claims corroborated by the evidence."
                    },
                    "hallucinated_facts": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Claims contradicted by, or absent from, the evidence."
                    },
                    "sources": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "URLs of the search results used."
                    },
                    "search_queries": queries("0-3 further queries if the evidence is inconclusive.")
                },
                "required": ["verified_facts", "hallucinated_facts", "sources"]
            }),
            Self::FreeText => Value::Null,
        }
    }

    /// Check a candidate message against this schema. Free text always
    /// passes.
    pub fn validate(&self, message: &Message, conversation: &Conversation) -> Result<(), StepError> {
        let outcome = match self {
            Self::InitialAnswer => parse::<StructuredAnswer>(message)?.check(conversation),
            Self::RevisedAnswer => parse::<RevisedAnswer>(message)?.check(conversation),
            Self::ClaimExtraction => parse::<ClaimSet>(message)?.check(conversation),
            Self::FinalAnalysis => parse::<FinalAnalysis>(message)?.check(conversation),
            Self::FreeText => Ok(()),
        };
        outcome.map_err(StepError::schema)
    }
}

/// A typed structured answer bound to one [`OutputSchema`].
pub trait Structured: DeserializeOwned + Serialize {
    const SCHEMA: OutputSchema;

    /// Invariants beyond the shape; the error is fed back to the actor.
    fn check(&self, conversation: &Conversation) -> Result<(), String>;

    /// Follow-up research this answer asks for.
    fn search_queries(&self) -> &[String];
}

/// Decode the structured answer carried by `message`.
///
/// The tool call named after the schema wins; a message without one falls
/// back to the first JSON object in its text.
pub fn parse<T: Structured>(message: &Message) -> Result<T, StepError> {
    let name = T::SCHEMA.tool_name().unwrap_or_default();
    let value = match message.tool_calls.iter().find(|call| call.name == name) {
        Some(call) => call.arguments_value(),
        None => extract_json(&message.content)
            .ok_or_else(|| StepError::schema(format!("expected a {name} tool call")))?,
    };
    serde_json::from_value(value).map_err(|e| StepError::schema(format!("{name}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub missing: String,
    pub superfluous: String,
}

/// Draft answer with its own critique and follow-up queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub answer: String,
    pub reflection: Reflection,
    #[serde(default)]
    pub search_queries: Vec<String>,
}

impl StructuredAnswer {
    pub fn word_count(&self) -> usize {
        self.answer.split_whitespace().count()
    }

    pub fn over_budget(&self) -> bool {
        self.word_count() > ANSWER_WORD_BUDGET
    }

    fn check_common(&self, min_queries: usize) -> Result<(), String> {
        if self.answer.trim().is_empty() {
            return Err("answer must not be empty".into());
        }
        let n = self.search_queries.len();
        if n < min_queries || n > MAX_SEARCH_QUERIES {
            return Err(format!(
                "search_queries must hold {min_queries}-{MAX_SEARCH_QUERIES} queries, got {n}"
            ));
        }
        if self.search_queries.iter().any(|q| q.trim().is_empty()) {
            return Err("search_queries must not contain empty queries".into());
        }
        Ok(())
    }
}

impl Structured for StructuredAnswer {
    const SCHEMA: OutputSchema = OutputSchema::InitialAnswer;

    fn check(&self, _conversation: &Conversation) -> Result<(), String> {
        self.check_common(1)
    }

    fn search_queries(&self) -> &[String] {
        &self.search_queries
    }
}

/// A revision: the draft fields plus citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisedAnswer {
    #[serde(flatten)]
    pub base: StructuredAnswer,
    #[serde(default)]
    pub references: Vec<String>,
}

impl Structured for RevisedAnswer {
    const SCHEMA: OutputSchema = OutputSchema::RevisedAnswer;

    fn check(&self, conversation: &Conversation) -> Result<(), String> {
        self.base.check_common(0)?;
        check_cited(&self.references, conversation, "reference")
    }

    fn search_queries(&self) -> &[String] {
        &self.base.search_queries
    }
}

/// Atomic claims pulled out of a text, one verification query each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    pub claims: Vec<String>,
    pub search_queries: Vec<String>,
}

impl Structured for ClaimSet {
    const SCHEMA: OutputSchema = OutputSchema::ClaimExtraction;

    fn check(&self, _conversation: &Conversation) -> Result<(), String> {
        if self.claims.is_empty() {
            return Err("claims must not be empty".into());
        }
        if self.claims.len() != self.search_queries.len() {
            return Err(format!(
                "expected one search query per claim: {} claims, {} queries",
                self.claims.len(),
                self.search_queries.len()
            ));
        }
        if self
            .claims
            .iter()
            .chain(&self.search_queries)
            .any(|s| s.trim().is_empty())
        {
            return Err("claims and queries must not be empty strings".into());
        }
        Ok(())
    }

    fn search_queries(&self) -> &[String] {
        &self.search_queries
    }
}

/// Terminal verdict of a hallucination check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnalysis {
    pub verified_facts: Vec<String>,
    pub hallucinated_facts: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<String>,
}

impl Structured for FinalAnalysis {
    const SCHEMA: OutputSchema = OutputSchema::FinalAnalysis;

    fn check(&self, conversation: &Conversation) -> Result<(), String> {
        if self.search_queries.len() > MAX_SEARCH_QUERIES {
            return Err(format!(
                "search_queries must hold at most {MAX_SEARCH_QUERIES} queries, got {}",
                self.search_queries.len()
            ));
        }
        check_cited(&self.sources, conversation, "source")
    }

    fn search_queries(&self) -> &[String] {
        &self.search_queries
    }
}

/// Every citation must point at a URL a tool result already surfaced.
fn check_cited(citations: &[String], conversation: &Conversation, what: &str) -> Result<(), String> {
    if citations.is_empty() {
        return Ok(());
    }
    let known = conversation.surfaced_urls();
    for citation in citations {
        let Some(url) = url_in(citation) else {
            return Err(format!("{what} `{citation}` carries no URL"));
        };
        if !known.contains(&url) && !known.iter().any(|u| cites_url(citation, u)) {
            return Err(format!(
                "{what} `{citation}` cites {url}, which no search result returned"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolCall, ToolResult};

    fn reflection() -> Value {
        json!({ "missing": "dates", "superfluous": "history" })
    }

    fn answer_message(args: Value) -> Message {
        Message::assistant_with_tools("", vec![ToolCall::new("call_1", "AnswerQuestion", args)])
    }

    fn revise_message(args: Value) -> Message {
        Message::assistant_with_tools("", vec![ToolCall::new("call_2", "ReviseAnswer", args)])
    }

    fn researched() -> Conversation {
        let mut convo = Conversation::from_user("Why is reflection useful in AI?");
        convo.push(Message::tool(ToolResult {
            tool_call_id: "call_1".into(),
            content: json!([{ "query": "q", "results": [
                { "url": "https://arxiv.org/abs/2303.11366", "highlight": "Reflexion" }
            ]}]),
            is_error: false,
        }));
        convo
    }

    // --- OutputSchema ---

    #[test]
    fn tool_names() {
        assert_eq!(OutputSchema::InitialAnswer.tool_name(), Some("AnswerQuestion"));
        assert_eq!(OutputSchema::RevisedAnswer.tool_name(), Some("ReviseAnswer"));
        assert_eq!(OutputSchema::FreeText.tool_name(), None);
        assert!(!OutputSchema::FreeText.is_structured());
    }

    #[test]
    fn json_schema_lists_required_fields() {
        let schema = OutputSchema::RevisedAnswer.json_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"references"));
        assert_eq!(OutputSchema::FreeText.json_schema(), Value::Null);
    }

    #[test]
    fn free_text_always_validates() {
        let convo = Conversation::new();
        assert!(OutputSchema::FreeText.validate(&Message::assistant("hi"), &convo).is_ok());
    }

    // --- StructuredAnswer ---

    #[test]
    fn valid_initial_answer() {
        let msg = answer_message(json!({
            "answer": "Reflection lets a model critique itself.",
            "reflection": reflection(),
            "search_queries": ["reflexion paper"]
        }));
        assert!(OutputSchema::InitialAnswer.validate(&msg, &Conversation::new()).is_ok());
    }

    #[test]
    fn initial_answer_needs_a_query() {
        let msg = answer_message(json!({
            "answer": "x",
            "reflection": reflection(),
            "search_queries": []
        }));
        let err = OutputSchema::InitialAnswer
            .validate(&msg, &Conversation::new())
            .unwrap_err();
        assert!(err.to_string().contains("1-3 queries"));
    }

    #[test]
    fn initial_answer_rejects_four_queries() {
        let msg = answer_message(json!({
            "answer": "x",
            "reflection": reflection(),
            "search_queries": ["a", "b", "c", "d"]
        }));
        assert!(OutputSchema::InitialAnswer.validate(&msg, &Conversation::new()).is_err());
    }

    #[test]
    fn missing_reflection_is_a_schema_error() {
        let msg = answer_message(json!({ "answer": "x", "search_queries": ["a"] }));
        let err = OutputSchema::InitialAnswer
            .validate(&msg, &Conversation::new())
            .unwrap_err();
        assert!(matches!(err, StepError::SchemaValidation(msg) if msg.contains("reflection")));
    }

    #[test]
    fn parse_falls_back_to_json_text() {
        let msg = Message::assistant(
            "```json\n{\"answer\":\"x\",\"reflection\":{\"missing\":\"\",\"superfluous\":\"\"},\"search_queries\":[\"q\"]}\n```",
        );
        let parsed: StructuredAnswer = parse(&msg).unwrap();
        assert_eq!(parsed.search_queries, vec!["q"]);
    }

    #[test]
    fn word_budget_is_soft() {
        let long = "word ".repeat(ANSWER_WORD_BUDGET + 1);
        let answer = StructuredAnswer {
            answer: long,
            reflection: Reflection {
                missing: String::new(),
                superfluous: String::new(),
            },
            search_queries: vec!["q".into()],
        };
        assert!(answer.over_budget());
        assert!(answer.check(&Conversation::new()).is_ok());
    }

    // --- RevisedAnswer ---

    #[test]
    fn revision_with_known_reference() {
        let msg = revise_message(json!({
            "answer": "Reflexion [1] improves agents.",
            "reflection": reflection(),
            "search_queries": [],
            "references": ["[1] https://arxiv.org/abs/2303.11366"]
        }));
        assert!(OutputSchema::RevisedAnswer.validate(&msg, &researched()).is_ok());
    }

    #[test]
    fn revision_citing_parenthesised_url() {
        let url = "https://en.wikipedia.org/wiki/Python_(programming_language)";
        let mut convo = Conversation::from_user("What is Python?");
        convo.push(Message::tool(ToolResult {
            tool_call_id: "call_1".into(),
            content: json!([{ "query": "python", "results": [{ "url": url, "highlight": "Python" }] }]),
            is_error: false,
        }));
        let msg = revise_message(json!({
            "answer": "Python is a programming language [1].",
            "reflection": reflection(),
            "search_queries": [],
            "references": [format!("[1] {url}")]
        }));
        assert!(OutputSchema::RevisedAnswer.validate(&msg, &convo).is_ok());
    }

    #[test]
    fn reference_extending_a_known_url_is_rejected() {
        let msg = revise_message(json!({
            "answer": "x [1].",
            "reflection": reflection(),
            "references": ["[1] https://arxiv.org/abs/2303.11366v9"]
        }));
        assert!(OutputSchema::RevisedAnswer.validate(&msg, &researched()).is_err());
    }

    #[test]
    fn revision_with_unknown_reference_is_rejected() {
        let msg = revise_message(json!({
            "answer": "Made up [1].",
            "reflection": reflection(),
            "references": ["[1] https://not-searched.example"]
        }));
        let err = OutputSchema::RevisedAnswer
            .validate(&msg, &researched())
            .unwrap_err();
        assert!(err.to_string().contains("https://not-searched.example"));
    }

    #[test]
    fn reference_without_url_is_rejected() {
        let msg = revise_message(json!({
            "answer": "x",
            "reflection": reflection(),
            "references": ["Smith et al."]
        }));
        let err = OutputSchema::RevisedAnswer
            .validate(&msg, &researched())
            .unwrap_err();
        assert!(err.to_string().contains("carries no URL"));
    }

    #[test]
    fn revision_flattens_answer_fields() {
        let msg = revise_message(json!({
            "answer": "x",
            "reflection": reflection(),
            "search_queries": ["more"],
            "references": []
        }));
        let revised: RevisedAnswer = parse(&msg).unwrap();
        assert_eq!(revised.base.answer, "x");
        assert_eq!(revised.search_queries(), ["more".to_string()]);
    }

    // --- ClaimSet / FinalAnalysis ---

    #[test]
    fn claims_need_one_query_each() {
        let claims = ClaimSet {
            claims: vec!["a".into(), "b".into()],
            search_queries: vec!["qa".into()],
        };
        assert!(claims.check(&Conversation::new()).is_err());
    }

    #[test]
    fn analysis_sources_must_be_surfaced() {
        let analysis = FinalAnalysis {
            verified_facts: vec!["a".into()],
            hallucinated_facts: vec![],
            sources: vec!["https://elsewhere.example".into()],
            search_queries: vec![],
        };
        assert!(analysis.check(&researched()).is_err());

        let analysis = FinalAnalysis {
            sources: vec!["https://arxiv.org/abs/2303.11366".into()],
            ..analysis
        };
        assert!(analysis.check(&researched()).is_ok());
    }
}
