use crate::agent::{Generator, StepError};
use crate::message::{Conversation, Message, ToolResult};
use crate::schema::OutputSchema;
use serde_json::Value;
use tracing::{debug, warn};

/// Generator calls per turn before settling for the last candidate.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// What a repair loop settled on.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub message: Message,
    /// Generator calls made, `1..=max_attempts`.
    pub attempts: usize,
    /// Last validation error when every attempt failed.
    pub error: Option<String>,
}

impl Candidate {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Ask `generator` for a `schema`-conforming candidate, feeding validation
/// errors back on failure.
///
/// Each failed attempt appends the invalid candidate and a tool result
/// describing the error (plus the schema definition) to a working copy of
/// the conversation; the caller's conversation is left untouched. After
/// `max_attempts` calls the last candidate is returned as-is with its error
/// recorded. Model-call failures are returned immediately.
pub fn respond_with_retries(
    generator: &mut dyn Generator,
    conversation: &Conversation,
    schema: OutputSchema,
    max_attempts: usize,
) -> Result<Candidate, StepError> {
    let max_attempts = max_attempts.max(1);
    let mut working = conversation.clone();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let message = generator.generate(&working, schema)?;

        // Citations are checked against the caller's conversation: repair
        // feedback must not make a URL count as researched.
        let error = match schema.validate(&message, conversation) {
            Ok(()) => {
                debug!(?schema, attempts, "candidate accepted");
                return Ok(Candidate {
                    message,
                    attempts,
                    error: None,
                });
            }
            Err(err) => err.to_string(),
        };

        warn!(?schema, attempts, max_attempts, error = %error, "candidate failed validation");

        if attempts >= max_attempts {
            return Ok(Candidate {
                message,
                attempts,
                error: Some(error),
            });
        }

        let feedback = repair_feedback(&message, schema, &error);
        working.push(message);
        working.push(feedback);
    }
}

/// The message that tells the actor what to fix. Answers the candidate's
/// tool call when it made one, otherwise arrives as a user turn.
fn repair_feedback(candidate: &Message, schema: OutputSchema, error: &str) -> Message {
    let definition = serde_json::to_string(&schema.json_schema()).unwrap_or_default();
    let text = format!(
        "{error}\n\nPay close attention to the function schema.\n\n{definition} \
         Respond by fixing all validation errors."
    );

    match candidate.first_tool_call() {
        Some(call) => Message::tool(ToolResult {
            tool_call_id: call.id.clone(),
            content: Value::String(text),
            is_error: true,
        }),
        None => Message::user(text),
    }
}
