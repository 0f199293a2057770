//! [`Generator`] backed by the Anthropic Messages API.
//!
//! Structured schemas are requested as a forced tool call named after the
//! schema, so the answer arrives as the tool call's `input`. Free text gets
//! the `search` tool with automatic tool choice.

use std::time::Duration;

use crate::agent::{Generator, StepError};
use crate::message::{Conversation, Message, Role, ToolCall};
use crate::schema::OutputSchema;
use crate::tools::http::{DEFAULT_TIMEOUT, post_json};
use crate::tools::search::{SEARCH_TOOL, search_tool_definition};
use serde_json::{Map, Value, json};
use tracing::debug;

pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

const STRUCTURED: [OutputSchema; 4] = [
    OutputSchema::InitialAnswer,
    OutputSchema::RevisedAnswer,
    OutputSchema::ClaimExtraction,
    OutputSchema::FinalAnalysis,
];

const RESEARCHER: &str = "You are expert researcher.\n\n\
1. {first_instruction}\n\
2. Reflect and critique your answer. Be severe to maximize improvement.\n\
3. Recommend search queries to research information and improve your answer.";

const FIRST_ANSWER: &str = "Provide a detailed ~250 word answer.";

const REVISE_ANSWER: &str = "Revise your previous answer using the new information.\n\
- You should use the previous critique to add important information to your answer.\n\
- You MUST include numerical citations in your revised answer to ensure it can be verified.\n\
- Add a \"References\" section to the bottom of your answer (which does not count towards the word limit). In form of:\n\
  - [1] https://example.com\n\
  - [2] https://example.com\n\
- You should use the previous critique to remove superfluous information from your answer and make SURE it is not more than 250 words.";

const FACT_CHECKER: &str = "You are a fact checker assessing a text for hallucinations.\n\
1. Extract the factual claims from the text.\n\
2. For each claim, write one web search query that would verify it.\n\
3. Once search results are available, classify each claim as verified or hallucinated \
based only on those results, and list the URLs you relied on.";

const SEARCH_AGENT: &str = "You are an agent that has access to an advanced search engine. \
Please provide the user with the information they are looking for by using the search tool provided.";

/// Default system prompt for a schema.
pub fn system_prompt(schema: OutputSchema) -> String {
    match schema {
        OutputSchema::InitialAnswer => RESEARCHER.replace("{first_instruction}", FIRST_ANSWER),
        OutputSchema::RevisedAnswer => RESEARCHER.replace("{first_instruction}", REVISE_ANSWER),
        OutputSchema::ClaimExtraction | OutputSchema::FinalAnalysis => FACT_CHECKER.to_string(),
        OutputSchema::FreeText => SEARCH_AGENT.to_string(),
    }
}

pub struct AnthropicGenerator {
    api_key: String,
    model: String,
    max_tokens: u32,
    url: String,
    timeout: Duration,
    system: Option<String>,
}

impl AnthropicGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            url: ANTHROPIC_MESSAGES_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            system: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the per-schema system prompt, e.g. for the two roles of a
    /// critique loop.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, conversation: &Conversation, schema: OutputSchema) -> Value {
        let system = self
            .system
            .clone()
            .unwrap_or_else(|| system_prompt(schema));
        let mut messages = to_api_messages(conversation);

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
        });

        match schema.tool_name() {
            Some(name) => {
                push_user_text(
                    &mut messages,
                    format!(
                        "Reflect on the user's original question and the actions taken thus far. \
                         Respond using the {name} function."
                    ),
                );
                body["tools"] = Value::Array(tool_definitions(conversation, Some(name)));
                body["tool_choice"] = json!({ "type": "tool", "name": name });
            }
            None => {
                body["tools"] = Value::Array(tool_definitions(conversation, None));
                body["tool_choice"] = json!({ "type": "auto" });
            }
        }

        body["messages"] = Value::Array(messages);
        body
    }
}

impl Generator for AnthropicGenerator {
    fn generate(
        &mut self,
        conversation: &Conversation,
        schema: OutputSchema,
    ) -> Result<Message, StepError> {
        let body = self.request_body(conversation, schema);
        debug!(model = %self.model, ?schema, messages = conversation.len(), "anthropic request");

        let response = post_json(
            &self.url,
            &[
                ("x-api-key", self.api_key.as_str()),
                ("anthropic-version", ANTHROPIC_VERSION),
            ],
            &body,
            self.timeout,
        )
        .map_err(StepError::into_model_call)?;

        parse_response(&response)
    }
}

/// Tool definition for a structured schema.
fn schema_tool(schema: OutputSchema) -> Option<Value> {
    let name = schema.tool_name()?;
    Some(json!({
        "name": name,
        "description": schema.description(),
        "input_schema": schema.json_schema(),
    }))
}

/// The requested tool first, then every other tool the history already
/// used, since tool_use blocks need a matching definition.
fn tool_definitions(conversation: &Conversation, requested: Option<&str>) -> Vec<Value> {
    let mut names: Vec<&str> = vec![requested.unwrap_or(SEARCH_TOOL)];
    for call in conversation.iter().flat_map(|m| &m.tool_calls) {
        if !names.contains(&call.name.as_str()) {
            names.push(call.name.as_str());
        }
    }

    names
        .into_iter()
        .filter_map(|name| {
            if name == SEARCH_TOOL {
                return Some(search_tool_definition());
            }
            STRUCTURED
                .into_iter()
                .find(|s| s.tool_name() == Some(name))
                .and_then(schema_tool)
        })
        .collect()
}

/// Map the conversation onto alternating API turns. User messages and tool
/// results share the `user` side, so consecutive ones merge into one turn.
fn to_api_messages(conversation: &Conversation) -> Vec<Value> {
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in conversation {
        let (role, blocks) = match message.role {
            Role::User => ("user", vec![text_block(&message.content)]),
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                    "is_error": message.is_error,
                })],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(text_block(&message.content));
                }
                for call in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                if blocks.is_empty() {
                    blocks.push(text_block("(no content)"));
                }
                ("assistant", blocks)
            }
        };

        match turns.last_mut() {
            Some((last, existing)) if *last == role => existing.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    turns
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

fn text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

/// Append a text block to the trailing user turn, opening one if needed.
fn push_user_text(messages: &mut Vec<Value>, text: String) {
    if let Some(last) = messages.last_mut()
        && last["role"] == "user"
        && let Some(content) = last["content"].as_array_mut()
    {
        content.push(text_block(&text));
        return;
    }
    messages.push(json!({ "role": "user", "content": [text_block(&text)] }));
}

/// Turn a Messages API response into an assistant [`Message`].
pub fn parse_response(response: &Value) -> Result<Message, StepError> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| StepError::model_call(format!("response has no content: {response}")))?;

    let mut text = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push(t);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                let input = block
                    .get("input")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                calls.push(ToolCall::new(id, name, input));
            }
            _ => {}
        }
    }

    if let Some(reason) = response.get("stop_reason").and_then(Value::as_str) {
        debug!(stop_reason = reason, tool_calls = calls.len(), "anthropic response");
    }

    Ok(Message::assistant_with_tools(text.join("\n"), calls))
}
