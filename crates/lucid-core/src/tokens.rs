use serde::{Deserialize, Serialize};

/// Token usage for one model call, normalized across provider families.
///
/// OpenAI-style payloads report `prompt_tokens`/`completion_tokens`,
/// Anthropic-style report `input_tokens`/`output_tokens` plus cache counters,
/// LangChain reports either shape depending on the wrapped model. All map
/// onto this record before pricing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, read: u32, creation: u32) -> Self {
        self.cache_read_tokens = read;
        self.cache_creation_tokens = creation;
        self
    }

    pub fn total(&self) -> u64 {
        self.input_tokens as u64
            + self.output_tokens as u64
            + self.cache_read_tokens as u64
            + self.cache_creation_tokens as u64
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Parse a loosely-shaped usage object. Accepts either naming scheme;
    /// returns `None` when neither input nor output counts are present.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let read = |keys: &[&str]| -> Option<u32> {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_u64()))
                .map(|n| n.min(u32::MAX as u64) as u32)
        };
        let input = read(&["input_tokens", "prompt_tokens"]);
        let output = read(&["output_tokens", "completion_tokens"]);
        if input.is_none() && output.is_none() {
            return None;
        }
        Some(Self {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
            cache_read_tokens: read(&["cache_read_input_tokens", "cache_read_tokens"]).unwrap_or(0),
            cache_creation_tokens: read(&["cache_creation_input_tokens", "cache_creation_tokens"])
                .unwrap_or(0),
        })
    }
}
