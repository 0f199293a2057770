use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A declared request by the actor to invoke an external capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Build a call from any JSON value. Non-object arguments become an
    /// empty map, which the schema validation will then reject.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Search queries this call asks for: a single `query` argument, or the
    /// `search_queries` array carried by structured answers.
    pub fn queries(&self) -> Vec<String> {
        if let Some(query) = self.arguments.get("query").and_then(Value::as_str) {
            return vec![query.to_string()];
        }
        self.arguments
            .get("search_queries")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|q| !q.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The arguments as a single JSON object value.
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Output of one executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: Value,
    pub is_error: bool,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    /// Wrap a tool result as a tool-role message. The payload is stored as
    /// its JSON text (plain strings are stored verbatim).
    pub fn tool(result: ToolResult) -> Self {
        let content = match result.content {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Self {
            role: Role::Tool,
            content,
            tool_calls: Vec::new(),
            tool_call_id: Some(result.tool_call_id),
            is_error: result.is_error,
        }
    }

    pub fn first_tool_call(&self) -> Option<&ToolCall> {
        self.tool_calls.first()
    }

    /// True when at least one tool call asks for a search.
    pub fn requests_tools(&self) -> bool {
        self.tool_calls.iter().any(|call| !call.queries().is_empty())
    }
}

/// Ordered, append-only log of turns.
///
/// Messages can be appended and read, never edited or removed. The order is
/// what "most recent" means for every termination check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation from a single user request.
    pub fn from_user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(content)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Length of the trailing run of assistant and tool messages. User turns
    /// end the run, so they never count as an iteration.
    pub fn trailing_rounds(&self) -> usize {
        self.messages
            .iter()
            .rev()
            .take_while(|m| matches!(m.role, Role::Assistant | Role::Tool))
            .count()
    }

    /// Every URL that a tool result has shown so far, first-seen order.
    pub fn surfaced_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for message in self.messages.iter().filter(|m| m.role == Role::Tool) {
            match serde_json::from_str::<Value>(&message.content) {
                Ok(value) => collect_urls(&value, &mut urls),
                Err(_) => {
                    for token in message.content.split_whitespace() {
                        if let Some(url) = url_in(token) {
                            push_unique(&mut urls, url);
                        }
                    }
                }
            }
        }
        urls
    }

    /// Every search query that was actually run, first-seen order. A call's
    /// queries count once a tool result answers it.
    pub fn queries_used(&self) -> Vec<String> {
        let answered: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        let mut queries = Vec::new();
        for message in self.messages.iter().filter(|m| m.role == Role::Assistant) {
            for call in message
                .tool_calls
                .iter()
                .filter(|c| answered.contains(&c.id.as_str()))
            {
                for query in call.queries() {
                    push_unique(&mut queries, query);
                }
            }
        }
        queries
    }

    /// The critic's view: the first request stays as-is, the remaining
    /// user and assistant turns trade places.
    pub fn with_swapped_roles(&self) -> Conversation {
        let messages = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| match (i, m.role) {
                (0, _) => m.clone(),
                (_, Role::Assistant) => Message::user(m.content.clone()),
                (_, Role::User) => Message::assistant(m.content.clone()),
                _ => m.clone(),
            })
            .collect();
        Conversation { messages }
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Pull the URL out of a citation such as `[1] https://example.com`.
/// A closing `)` stays part of the URL when it balances an opening one, as
/// in `https://en.wikipedia.org/wiki/Rust_(programming_language)`.
pub(crate) fn url_in(text: &str) -> Option<String> {
    let start = text.find("http://").or_else(|| text.find("https://"))?;
    let mut url: String = text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, ']' | '>' | '"' | '\''))
        .collect();
    loop {
        let trimmed = url.trim_end_matches(['.', ',', ';']).len();
        url.truncate(trimmed);
        if url.ends_with(')') && url.matches(')').count() > url.matches('(').count() {
            url.pop();
        } else {
            break;
        }
    }
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

/// True when `text` contains `url` as a whole URL, not as the prefix of a
/// longer one.
pub(crate) fn cites_url(text: &str, url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    text.match_indices(url).any(|(i, _)| {
        text[i + url.len()..].chars().next().is_none_or(|c| {
            c.is_whitespace() || matches!(c, ')' | ']' | '>' | '"' | '\'' | '.' | ',' | ';')
        })
    })
}

fn collect_urls(value: &Value, urls: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                if key == "url"
                    && let Some(url) = inner.as_str()
                {
                    push_unique(urls, url.to_string());
                } else {
                    collect_urls(inner, urls);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_urls(item, urls);
            }
        }
        _ => {}
    }
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_call(id: &str, query: &str) -> ToolCall {
        ToolCall::new(id, "search", json!({ "query": query }))
    }

    // --- ToolCall ---

    #[test]
    fn queries_from_single_query_argument() {
        let call = search_call("c1", "rust borrow checker");
        assert_eq!(call.queries(), vec!["rust borrow checker"]);
    }

    #[test]
    fn queries_from_search_queries_array() {
        let call = ToolCall::new(
            "c1",
            "AnswerQuestion",
            json!({ "answer": "x", "search_queries": ["a", "", "b"] }),
        );
        assert_eq!(call.queries(), vec!["a", "b"]);
    }

    #[test]
    fn non_object_arguments_become_empty() {
        let call = ToolCall::new("c1", "search", json!("oops"));
        assert!(call.arguments.is_empty());
        assert!(call.queries().is_empty());
    }

    // --- Message ---

    #[test]
    fn requests_tools_only_with_queries() {
        let with = Message::assistant_with_tools("", vec![search_call("c1", "q")]);
        let without = Message::assistant_with_tools(
            "",
            vec![ToolCall::new("c2", "ReviseAnswer", json!({ "search_queries": [] }))],
        );
        assert!(with.requests_tools());
        assert!(!without.requests_tools());
        assert!(!Message::assistant("plain").requests_tools());
    }

    #[test]
    fn tool_message_keeps_string_payload_verbatim() {
        let msg = Message::tool(ToolResult {
            tool_call_id: "c1".into(),
            content: json!("plain text"),
            is_error: true,
        });
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "plain text");
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        assert!(msg.is_error);
    }

    // --- Conversation ---

    #[test]
    fn trailing_rounds_stop_at_user_turn() {
        let convo = Conversation::from(vec![
            Message::assistant("earlier"),
            Message::user("question"),
            Message::assistant("draft"),
            Message::tool(ToolResult {
                tool_call_id: "c1".into(),
                content: json!([]),
                is_error: false,
            }),
            Message::assistant("revision"),
        ]);
        assert_eq!(convo.trailing_rounds(), 3);
    }

    #[test]
    fn trailing_rounds_zero_after_user() {
        let convo = Conversation::from_user("hi");
        assert_eq!(convo.trailing_rounds(), 0);
    }

    #[test]
    fn surfaced_urls_from_nested_payloads() {
        let mut convo = Conversation::from_user("q");
        convo.push(Message::tool(ToolResult {
            tool_call_id: "c1".into(),
            content: json!([
                { "query": "a", "results": [{ "url": "https://a.example", "highlight": "x" }] },
                { "query": "b", "results": [{ "url": "https://b.example", "highlight": "y" }] }
            ]),
            is_error: false,
        }));
        convo.push(Message::tool(ToolResult {
            tool_call_id: "c2".into(),
            content: json!([{ "url": "https://a.example" }]),
            is_error: false,
        }));
        assert_eq!(
            convo.surfaced_urls(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn surfaced_urls_from_plain_text() {
        let mut convo = Conversation::new();
        convo.push(Message::tool(ToolResult {
            tool_call_id: "c1".into(),
            content: json!("see https://c.example/page. for details"),
            is_error: false,
        }));
        assert_eq!(convo.surfaced_urls(), vec!["https://c.example/page"]);
    }

    #[test]
    fn urls_in_user_messages_are_not_surfaced() {
        let convo = Conversation::from_user("https://made.up");
        assert!(convo.surfaced_urls().is_empty());
    }

    fn answered(id: &str) -> Message {
        Message::tool(ToolResult {
            tool_call_id: id.into(),
            content: json!([]),
            is_error: false,
        })
    }

    #[test]
    fn queries_used_dedupes_in_order() {
        let mut convo = Conversation::from_user("q");
        convo.push(Message::assistant_with_tools(
            "",
            vec![search_call("c1", "one"), search_call("c2", "two")],
        ));
        convo.push(answered("c1"));
        convo.push(answered("c2"));
        convo.push(Message::assistant_with_tools("", vec![search_call("c3", "one")]));
        convo.push(answered("c3"));
        assert_eq!(convo.queries_used(), vec!["one", "two"]);
    }

    #[test]
    fn queries_never_run_are_not_used() {
        let mut convo = Conversation::from_user("q");
        convo.push(Message::assistant_with_tools("", vec![search_call("c1", "ran")]));
        convo.push(answered("c1"));
        convo.push(Message::assistant_with_tools("", vec![search_call("c2", "pending")]));
        assert_eq!(convo.queries_used(), vec!["ran"]);
    }

    #[test]
    fn swapped_roles_keep_first_message() {
        let convo = Conversation::from(vec![
            Message::user("write an essay"),
            Message::assistant("essay v1"),
            Message::user("critique"),
        ]);
        let swapped = convo.with_swapped_roles();
        let roles: Vec<Role> = swapped.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
        assert_eq!(swapped.messages()[1].content, "essay v1");
    }

    #[test]
    fn url_in_keeps_balanced_parentheses() {
        let url = "https://en.wikipedia.org/wiki/Python_(programming_language)";
        assert_eq!(url_in(&format!("[1] {url}")).as_deref(), Some(url));
        assert_eq!(url_in(&format!("(see {url})")).as_deref(), Some(url));
        assert_eq!(url_in(&format!("[2] {url}.")).as_deref(), Some(url));
    }

    #[test]
    fn cites_url_needs_the_whole_url() {
        assert!(cites_url("[1] https://a.example/x", "https://a.example/x"));
        assert!(cites_url("(https://a.example/x), see", "https://a.example/x"));
        assert!(!cites_url("[1] https://a.example/xyz", "https://a.example/x"));
        assert!(!cites_url("[1] https://a.example.evil", "https://a.example"));
    }

    #[test]
    fn url_in_citation() {
        assert_eq!(
            url_in("[1] https://example.com/a)").as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(url_in("no link here"), None);
    }

    #[test]
    fn conversation_serializes_as_array() {
        let convo = Conversation::from_user("hi");
        let value = serde_json::to_value(&convo).unwrap();
        assert!(value.is_array());
        let back: Conversation = serde_json::from_value(value).unwrap();
        assert_eq!(back, convo);
    }
}
