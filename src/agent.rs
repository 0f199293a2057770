use crate::message::{Conversation, Message};
use crate::schema::OutputSchema;

/// The actor: proposes the next candidate for a conversation.
///
/// Implementations wrap a model-serving collaborator. A structured schema
/// must come back as an assistant message whose first tool call is named
/// [`OutputSchema::tool_name`] and carries the object as its arguments.
/// [`OutputSchema::FreeText`] may return plain text and any number of
/// `search` tool calls.
///
/// Generators never retry. Collaborator failures go back to the caller as
/// [`StepError::ModelCall`].
pub trait Generator: Send {
    fn generate(
        &mut self,
        conversation: &Conversation,
        schema: OutputSchema,
    ) -> Result<Message, StepError>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(
        &mut self,
        conversation: &Conversation,
        schema: OutputSchema,
    ) -> Result<Message, StepError> {
        (**self).generate(conversation, schema)
    }
}

/// Error type for loop steps, with variants designed around what the caller
/// can do about them.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Bad input or configuration. Don't retry, fix the caller.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Structured output did not match its schema.
    #[error("schema validation: {0}")]
    SchemaValidation(String),
    /// A search or other tool failed.
    #[error("tool execution: {0}")]
    ToolExecution(String),
    /// The model collaborator is unavailable, timed out, or rejected the call.
    #[error("model call: {0}")]
    ModelCall(String),
    /// Transport failure (network, rate limit). Retrying might help.
    #[error("transient: {0}")]
    Transient(String),
    /// Saving or loading a checkpoint failed.
    #[error("checkpoint: {0}")]
    Checkpoint(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Everything else. Inspect the message for details.
    #[error("{0}")]
    Other(String),
}

impl From<ureq::Error> for StepError {
    fn from(e: ureq::Error) -> Self {
        StepError::Transient(e.to_string())
    }
}

impl StepError {
    /// Create an [`Invalid`](StepError::Invalid) error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        StepError::Invalid(msg.into())
    }

    /// Create a [`SchemaValidation`](StepError::SchemaValidation) error.
    pub fn schema(msg: impl Into<String>) -> Self {
        StepError::SchemaValidation(msg.into())
    }

    /// Create a [`ToolExecution`](StepError::ToolExecution) error.
    pub fn tool(msg: impl Into<String>) -> Self {
        StepError::ToolExecution(msg.into())
    }

    /// Create a [`ModelCall`](StepError::ModelCall) error.
    pub fn model_call(msg: impl Into<String>) -> Self {
        StepError::ModelCall(msg.into())
    }

    /// Create a [`Transient`](StepError::Transient) error.
    pub fn transient(msg: impl Into<String>) -> Self {
        StepError::Transient(msg.into())
    }

    /// Create a [`Checkpoint`](StepError::Checkpoint) error.
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        StepError::Checkpoint(msg.into())
    }

    /// Create an [`Other`](StepError::Other) error.
    pub fn other(msg: impl Into<String>) -> Self {
        StepError::Other(msg.into())
    }

    /// Reclassify a transport or tool failure as a model-call failure.
    pub(crate) fn into_model_call(self) -> Self {
        match self {
            StepError::Transient(msg) | StepError::ToolExecution(msg) => StepError::ModelCall(msg),
            other => other,
        }
    }

    /// Reclassify a transport failure as a tool failure.
    pub(crate) fn into_tool(self) -> Self {
        match self {
            StepError::Transient(msg) | StepError::ModelCall(msg) => StepError::ToolExecution(msg),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- StepError constructors ---

    #[test]
    fn invalid_constructor() {
        let err = StepError::invalid("bad input");
        assert!(matches!(err, StepError::Invalid(msg) if msg == "bad input"));
    }

    #[test]
    fn schema_constructor() {
        let err = StepError::schema("missing field");
        assert!(matches!(err, StepError::SchemaValidation(msg) if msg == "missing field"));
    }

    #[test]
    fn transient_constructor() {
        let err = StepError::transient("timeout");
        assert!(matches!(err, StepError::Transient(msg) if msg == "timeout"));
    }

    // --- StepError Display ---

    #[test]
    fn display_invalid() {
        let err = StepError::Invalid("bad input".into());
        assert_eq!(err.to_string(), "invalid: bad input");
    }

    #[test]
    fn display_other() {
        let err = StepError::Other("something".into());
        assert_eq!(err.to_string(), "something");
    }

    #[test]
    fn display_model_call() {
        let err = StepError::model_call("503");
        assert_eq!(err.to_string(), "model call: 503");
    }

    #[test]
    fn display_tool() {
        let err = StepError::tool("search down");
        assert_eq!(err.to_string(), "tool execution: search down");
    }

    // --- From conversions ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let step_err: StepError = io_err.into();
        assert!(matches!(step_err, StepError::Io(_)));
        assert!(step_err.to_string().contains("file missing"));
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let step_err: StepError = json_err.into();
        assert!(matches!(step_err, StepError::Json(_)));
    }

    // --- Reclassification ---

    #[test]
    fn transient_becomes_model_call() {
        let err = StepError::transient("reset").into_model_call();
        assert!(matches!(err, StepError::ModelCall(msg) if msg == "reset"));
    }

    #[test]
    fn transient_becomes_tool() {
        let err = StepError::transient("reset").into_tool();
        assert!(matches!(err, StepError::ToolExecution(msg) if msg == "reset"));
    }

    #[test]
    fn reclassify_leaves_other_kinds_alone() {
        let err = StepError::invalid("x").into_tool();
        assert!(matches!(err, StepError::Invalid(_)));
    }
}
