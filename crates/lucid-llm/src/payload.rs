//! Provider payload shapes, reduced to the few fields instrumentation needs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lucid_core::tokens::TokenUsage;

pub const UNKNOWN_MODEL: &str = "unknown_model";

/// Canonical view of one model call: what went in or came out.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallRecord {
    pub text: Vec<String>,
    pub images: Vec<String>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl CallRecord {
    pub fn joined_text(&self) -> Option<String> {
        if self.text.is_empty() {
            None
        } else {
            Some(self.text.join("\n"))
        }
    }

    fn absorb(&mut self, content: &MessageContent) {
        match content {
            MessageContent::Text(t) => self.text.push(t.clone()),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => self.text.push(text.clone()),
                        ContentBlock::ImageUrl { image_url } => {
                            self.images.push(strip_data_url(&image_url.url).to_string())
                        }
                        ContentBlock::Image { source } => {
                            if let Some(data) = &source.data {
                                self.images.push(strip_data_url(data).to_string());
                            }
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
        }
    }
}

/// Drop a `data:<mime>;base64,` prefix, leaving the payload.
pub fn strip_data_url(url: &str) -> &str {
    match url.find(',') {
        Some(i) if url.starts_with("data:") => &url[i + 1..],
        _ => url,
    }
}

/// Cut to at most `max` characters on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((i, _)) => text[..i].to_string(),
        None => text.to_string(),
    }
}

// ---- message content ----

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageSource {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// One block of multi-part content. Unknown block types are kept as `Other`
/// and dropped during normalization.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    Image { source: ImageSource },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".into()),
            content: MessageContent::Text(text.into()),
        }
    }
}

// ---- direct-call requests and responses ----

/// Outbound chat request, shared by OpenAI-style and Anthropic-style calls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub system: Option<MessageContent>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            stream: false,
        }
    }

    pub fn normalize(&self) -> CallRecord {
        let mut record = CallRecord {
            model: Some(self.model.clone()),
            ..Default::default()
        };
        if let Some(system) = &self.system {
            record.absorb(system);
        }
        for message in &self.messages {
            record.absorb(&message.content);
        }
        record
    }
}

/// Completed model response, whichever provider produced it.
pub trait ModelResponse {
    fn normalize(&self) -> CallRecord;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenAiMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenAiChoice {
    pub message: OpenAiMessage,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenAiResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

impl ModelResponse for OpenAiResponse {
    fn normalize(&self) -> CallRecord {
        CallRecord {
            text: self
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .into_iter()
                .collect(),
            images: Vec::new(),
            model: self.model.clone(),
            usage: self.usage.as_ref().and_then(TokenUsage::from_value),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<Value>,
}

impl ModelResponse for AnthropicResponse {
    fn normalize(&self) -> CallRecord {
        let text = MessageContent::Blocks(self.content.clone()).text();
        CallRecord {
            text: if text.is_empty() { Vec::new() } else { vec![text] },
            images: Vec::new(),
            model: self.model.clone(),
            usage: self.usage.as_ref().and_then(TokenUsage::from_value),
        }
    }
}

/// One streamed chunk.
pub trait StreamChunk {
    fn text_delta(&self) -> Option<&str>;
    fn usage(&self) -> Option<TokenUsage> {
        None
    }
    fn model(&self) -> Option<&str> {
        None
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenAiChunkChoice {
    pub delta: OpenAiDelta,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenAiChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiChunkChoice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

impl StreamChunk for OpenAiChunk {
    fn text_delta(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }
    fn usage(&self) -> Option<TokenUsage> {
        self.usage.as_ref().and_then(TokenUsage::from_value)
    }
    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

/// Anthropic streaming events, reduced to the ones carrying text or usage.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicEvent {
    MessageStart { message: AnthropicResponse },
    ContentBlockDelta { delta: AnthropicDelta },
    MessageDelta { #[serde(default)] usage: Option<Value> },
    #[serde(other)]
    Other,
}

impl StreamChunk for AnthropicEvent {
    fn text_delta(&self) -> Option<&str> {
        match self {
            Self::ContentBlockDelta {
                delta: AnthropicDelta::TextDelta { text },
            } => Some(text),
            _ => None,
        }
    }
    fn usage(&self) -> Option<TokenUsage> {
        match self {
            Self::MessageStart { message } => message.usage.as_ref().and_then(TokenUsage::from_value),
            Self::MessageDelta { usage } => usage.as_ref().and_then(TokenUsage::from_value),
            _ => None,
        }
    }
    fn model(&self) -> Option<&str> {
        match self {
            Self::MessageStart { message } => message.model.as_deref(),
            _ => None,
        }
    }
}

// ---- callback-framework payloads ----

/// Model name for a callback run: invocation params first, then the
/// serialized component's `model_name`, then its `name`.
pub fn resolve_model_name(serialized: &Value, invocation_params: Option<&Value>) -> String {
    invocation_params
        .and_then(|p| p.get("model"))
        .and_then(Value::as_str)
        .or_else(|| serialized.get("model_name").and_then(Value::as_str))
        .or_else(|| serialized.get("name").and_then(Value::as_str))
        .unwrap_or(UNKNOWN_MODEL)
        .to_string()
}

/// Component name from a serialized payload, or `fallback`.
pub fn serialized_name<'a>(serialized: &'a Value, fallback: &'a str) -> &'a str {
    serialized
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
}

/// A prompt handed to a completion-style start callback.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PromptInput {
    Text(String),
    Image { image: String },
    Other(Value),
}

pub fn normalize_prompts(prompts: &[PromptInput]) -> CallRecord {
    let mut record = CallRecord::default();
    for prompt in prompts {
        match prompt {
            PromptInput::Text(t) => record.text.push(t.clone()),
            PromptInput::Image { image } => record.images.push(strip_data_url(image).to_string()),
            PromptInput::Other(_) => {}
        }
    }
    record
}

/// Chat start: only the first batch of messages is described.
pub fn normalize_chat(messages: &[Vec<ChatMessage>]) -> CallRecord {
    let mut record = CallRecord::default();
    if let Some(batch) = messages.first() {
        for message in batch {
            record.absorb(&message.content);
        }
    }
    record
}

/// Chain inputs are free-form; strings and message lists are described.
pub fn normalize_chain_inputs(inputs: &Value) -> CallRecord {
    let mut record = CallRecord::default();
    let values: Vec<&Value> = match inputs {
        Value::Object(map) => map.values().collect(),
        other => vec![other],
    };
    for value in values {
        match value {
            Value::String(s) => record.text.push(s.clone()),
            Value::Array(items) => {
                for item in items {
                    if let Ok(msg) = serde_json::from_value::<ChatMessage>(item.clone()) {
                        record.absorb(&msg.content);
                    } else if let Some(s) = item.as_str() {
                        record.text.push(s.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    record
}

/// First output value, strings as-is and anything else pretty-printed.
pub fn summarize_chain_outputs(outputs: &Value) -> Option<String> {
    let first = match outputs {
        Value::Object(map) => map.values().next()?,
        Value::Null => return None,
        other => other,
    };
    match first {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => serde_json::to_string_pretty(other).ok(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeneratedMessage {
    pub content: MessageContent,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub message: Option<GeneratedMessage>,
}

/// Result of an LLM run: generations per prompt plus provider output.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmResult {
    #[serde(default)]
    pub generations: Vec<Vec<Generation>>,
    #[serde(default)]
    pub llm_output: Option<Value>,
}

impl LlmResult {
    pub fn normalize(&self) -> CallRecord {
        let first = self.generations.first().and_then(|g| g.first());
        let text = first.map(|g| match &g.message {
            Some(m) => m.content.text(),
            None => g.text.clone(),
        });
        let usage = first
            .and_then(|g| g.message.as_ref())
            .and_then(|m| m.usage_metadata.as_ref())
            .and_then(TokenUsage::from_value)
            .or_else(|| {
                self.llm_output
                    .as_ref()
                    .and_then(|o| o.get("token_usage").or_else(|| o.get("usage")))
                    .and_then(TokenUsage::from_value)
            });
        let model = self
            .llm_output
            .as_ref()
            .and_then(|o| o.get("model_name").or_else(|| o.get("model")))
            .and_then(Value::as_str)
            .map(str::to_string);
        CallRecord {
            text: text.filter(|t| !t.is_empty()).into_iter().collect(),
            images: Vec::new(),
            model,
            usage,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentAction {
    pub tool: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub log: String,
}

impl AgentAction {
    pub fn summary(&self) -> String {
        match &self.tool_input {
            Value::Null => format!("Using tool '{}'", self.tool),
            Value::String(s) if s.is_empty() => format!("Using tool '{}'", self.tool),
            Value::String(s) => format!("Using tool '{}' with input: {s}", self.tool),
            Value::Object(map) if map.is_empty() => format!("Using tool '{}'", self.tool),
            Value::Object(map) => {
                let inputs = map
                    .iter()
                    .map(|(k, v)| match v {
                        Value::String(s) => format!("{k}: {s}"),
                        other => format!("{k}: {other}"),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Using tool '{}' with inputs: {inputs}", self.tool)
            }
            other => format!("Using tool '{}' with input: {other}", self.tool),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentFinish {
    #[serde(default)]
    pub return_values: Value,
    #[serde(default)]
    pub log: String,
}

impl AgentFinish {
    /// The `output` return value if present, else all return values.
    pub fn output(&self) -> Option<String> {
        match &self.return_values {
            Value::Null => None,
            Value::Object(map) => match map.get("output") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
                None => Some(self.return_values.to_string()),
            },
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_url_prefix_stripped() {
        assert_eq!(strip_data_url("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("https://x/y.png"), "https://x/y.png");
        assert_eq!(strip_data_url("AAAA"), "AAAA");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 100), "short");
        assert_eq!(truncate("", 3), "");
    }

    #[test]
    fn request_keeps_text_and_images_only() {
        let req: ChatRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,QUJD"}},
                    {"type": "input_audio", "input_audio": {"data": "zzz"}}
                ]}
            ]
        }))
        .unwrap();
        let rec = req.normalize();
        assert_eq!(rec.text, vec!["be brief", "what is this?"]);
        assert_eq!(rec.images, vec!["QUJD"]);
        assert_eq!(rec.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn anthropic_image_source() {
        let req: ChatRequest = serde_json::from_value(json!({
            "model": "claude-3-5-sonnet-20241022",
            "system": "sys",
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "SlBH"}}
            ]}]
        }))
        .unwrap();
        let rec = req.normalize();
        assert_eq!(rec.text, vec!["sys"]);
        assert_eq!(rec.images, vec!["SlBH"]);
    }

    #[test]
    fn openai_response_normalized() {
        let resp: OpenAiResponse = serde_json::from_value(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"role": "assistant", "content": "Paris"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }))
        .unwrap();
        let rec = resp.normalize();
        assert_eq!(rec.joined_text().as_deref(), Some("Paris"));
        assert_eq!(rec.usage.unwrap().output_tokens, 3);
    }

    #[test]
    fn anthropic_stream_events() {
        let delta: AnthropicEvent = serde_json::from_value(json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": "Hel"}
        }))
        .unwrap();
        assert_eq!(delta.text_delta(), Some("Hel"));

        let ping: AnthropicEvent = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert_eq!(ping, AnthropicEvent::Other);
        assert!(ping.text_delta().is_none());
    }

    #[test]
    fn model_name_resolution_order() {
        let ser = json!({"model_name": "gpt-4", "name": "ChatOpenAI"});
        assert_eq!(resolve_model_name(&ser, Some(&json!({"model": "gpt-4o"}))), "gpt-4o");
        assert_eq!(resolve_model_name(&ser, Some(&json!({}))), "gpt-4");
        assert_eq!(resolve_model_name(&json!({"name": "ChatOpenAI"}), None), "ChatOpenAI");
        assert_eq!(resolve_model_name(&json!({}), None), UNKNOWN_MODEL);
    }

    #[test]
    fn prompts_and_chat_messages() {
        let prompts: Vec<PromptInput> = serde_json::from_value(json!([
            "tell me a joke",
            {"image": "data:image/png;base64,SU1H"},
            42
        ]))
        .unwrap();
        let rec = normalize_prompts(&prompts);
        assert_eq!(rec.text, vec!["tell me a joke"]);
        assert_eq!(rec.images, vec!["SU1H"]);

        let chat = vec![
            vec![ChatMessage::user("first batch")],
            vec![ChatMessage::user("ignored")],
        ];
        assert_eq!(normalize_chat(&chat).text, vec!["first batch"]);
    }

    #[test]
    fn llm_result_usage_fallbacks() {
        let with_meta: LlmResult = serde_json::from_value(json!({
            "generations": [[{"text": "", "message": {
                "content": "hi there",
                "usage_metadata": {"input_tokens": 5, "output_tokens": 2}
            }}]]
        }))
        .unwrap();
        let rec = with_meta.normalize();
        assert_eq!(rec.text, vec!["hi there"]);
        assert_eq!(rec.usage.unwrap().input_tokens, 5);

        let with_output: LlmResult = serde_json::from_value(json!({
            "generations": [[{"text": "plain"}]],
            "llm_output": {"token_usage": {"prompt_tokens": 7, "completion_tokens": 1}, "model_name": "gpt-3.5-turbo"}
        }))
        .unwrap();
        let rec = with_output.normalize();
        assert_eq!(rec.text, vec!["plain"]);
        assert_eq!(rec.usage.unwrap().input_tokens, 7);
        assert_eq!(rec.model.as_deref(), Some("gpt-3.5-turbo"));
    }

    #[test]
    fn chain_inputs_and_outputs() {
        let rec = normalize_chain_inputs(&json!({
            "question": "why?",
            "messages": [{"role": "user", "content": "context"}],
            "k": 4
        }));
        assert!(rec.text.contains(&"why?".to_string()));
        assert!(rec.text.contains(&"context".to_string()));

        assert_eq!(summarize_chain_outputs(&json!({"text": "answer"})).as_deref(), Some("answer"));
        assert!(summarize_chain_outputs(&json!({"docs": [1, 2]})).unwrap().contains('1'));
        assert!(summarize_chain_outputs(&json!({})).is_none());
    }

    #[test]
    fn agent_action_summaries() {
        let dict = AgentAction {
            tool: "search".into(),
            tool_input: json!({"query": "rust"}),
            log: String::new(),
        };
        assert_eq!(dict.summary(), "Using tool 'search' with inputs: query: rust");

        let plain = AgentAction {
            tool: "calc".into(),
            tool_input: json!("2+2"),
            log: String::new(),
        };
        assert_eq!(plain.summary(), "Using tool 'calc' with input: 2+2");

        let bare = AgentAction {
            tool: "noop".into(),
            tool_input: Value::Null,
            log: String::new(),
        };
        assert_eq!(bare.summary(), "Using tool 'noop'");
    }

    #[test]
    fn agent_finish_output() {
        let f = AgentFinish {
            return_values: json!({"output": "done"}),
            log: String::new(),
        };
        assert_eq!(f.output().as_deref(), Some("done"));
        let g = AgentFinish {
            return_values: json!({"answer": 1}),
            log: String::new(),
        };
        assert_eq!(g.output().as_deref(), Some(r#"{"answer":1}"#));
    }
}
