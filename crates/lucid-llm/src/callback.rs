//! Callback-style adapter: a framework calls start/end/error hooks keyed by
//! its own run ids, and each run becomes one event.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error};

use lucid_core::ids::RunId;
use lucid_core::records::EventUpdate;
use lucid_core::ProviderKind;

use crate::correlation::RunNamespace;
use crate::lifecycle::{RunEnd, RunTracker};
use crate::payload::{
    normalize_chain_inputs, normalize_chat, normalize_prompts, resolve_model_name, serialized_name,
    summarize_chain_outputs, truncate, AgentAction, AgentFinish, CallRecord, ChatMessage, Document,
    LlmResult, PromptInput,
};
use crate::ProviderAdapter;

pub const LLM_RESULT_MAX_CHARS: usize = 500;
pub const TOOL_RESULT_MAX_CHARS: usize = 1000;
pub const RETRIEVER_SAMPLE_MAX_CHARS: usize = 200;
pub const INPUT_PREVIEW_MAX_CHARS: usize = 100;

/// Hooks a host framework fires around its runs. Every method defaults to a
/// no-op so handlers only implement what they observe.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Stable name; hosts use it to avoid registering a handler twice.
    fn name(&self) -> &str;

    async fn on_llm_start(
        &self,
        _run_id: RunId,
        _serialized: &Value,
        _prompts: &[PromptInput],
        _invocation_params: Option<&Value>,
    ) {
    }

    async fn on_chat_model_start(
        &self,
        _run_id: RunId,
        _serialized: &Value,
        _messages: &[Vec<ChatMessage>],
        _invocation_params: Option<&Value>,
    ) {
    }

    async fn on_llm_end(&self, _run_id: RunId, _response: &LlmResult) {}

    async fn on_llm_error(&self, _run_id: RunId, _error: &str) {}

    async fn on_chain_start(&self, _run_id: RunId, _serialized: &Value, _inputs: &Value) {}

    async fn on_chain_end(&self, _run_id: RunId, _outputs: &Value) {}

    async fn on_chain_error(&self, _run_id: RunId, _error: &str) {}

    async fn on_tool_start(&self, _run_id: RunId, _serialized: &Value, _input: &str) {}

    async fn on_tool_end(&self, _run_id: RunId, _output: &str) {}

    async fn on_tool_error(&self, _run_id: RunId, _error: &str) {}

    async fn on_retriever_start(&self, _run_id: RunId, _serialized: &Value, _query: &str) {}

    async fn on_retriever_end(&self, _run_id: RunId, _documents: &[Document]) {}

    async fn on_retriever_error(&self, _run_id: RunId, _error: &str) {}

    async fn on_agent_action(&self, _run_id: RunId, _action: &AgentAction) {}

    async fn on_agent_finish(&self, _run_id: RunId, _finish: &AgentFinish) {}
}

pub const HANDLER_NAME: &str = "lucid";

/// Records framework runs as events on the active session.
pub struct LucidCallbackHandler {
    tracker: RunTracker,
    enabled: AtomicBool,
}

impl LucidCallbackHandler {
    pub fn new(tracker: RunTracker) -> Self {
        Self {
            tracker,
            enabled: AtomicBool::new(true),
        }
    }

    /// Run a callback body so that neither a disabled adapter nor a panic
    /// reaches the host.
    async fn guarded<F>(&self, callback: &'static str, body: F)
    where
        F: Future<Output = ()> + Send,
    {
        if !self.is_enabled() {
            debug!(callback, "adapter disabled; callback ignored");
            return;
        }
        if AssertUnwindSafe(body).catch_unwind().await.is_err() {
            error!(callback, "callback panicked; host dispatch unaffected");
        }
    }

    async fn start_model_run(&self, run_id: RunId, record: CallRecord, model: String) {
        let mut fields = EventUpdate::default();
        fields.description = record.joined_text();
        if !record.images.is_empty() {
            fields.screenshots = Some(record.images);
        }
        self.tracker
            .start(RunNamespace::Llm, run_id, fields, Some(model))
            .await;
    }
}

#[async_trait]
impl ProviderAdapter for LucidCallbackHandler {
    fn kind(&self) -> ProviderKind {
        self.tracker.provider()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    async fn in_flight(&self) -> usize {
        self.tracker.in_flight().await
    }
}

#[async_trait]
impl CallbackHandler for LucidCallbackHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn on_llm_start(
        &self,
        run_id: RunId,
        serialized: &Value,
        prompts: &[PromptInput],
        invocation_params: Option<&Value>,
    ) {
        self.guarded("on_llm_start", async {
            let model = resolve_model_name(serialized, invocation_params);
            self.start_model_run(run_id, normalize_prompts(prompts), model)
                .await;
        })
        .await
    }

    async fn on_chat_model_start(
        &self,
        run_id: RunId,
        serialized: &Value,
        messages: &[Vec<ChatMessage>],
        invocation_params: Option<&Value>,
    ) {
        self.guarded("on_chat_model_start", async {
            let model = resolve_model_name(serialized, invocation_params);
            self.start_model_run(run_id, normalize_chat(messages), model)
                .await;
        })
        .await
    }

    async fn on_llm_end(&self, run_id: RunId, response: &LlmResult) {
        self.guarded("on_llm_end", async {
            let record = response.normalize();
            let end = RunEnd {
                result: record
                    .joined_text()
                    .map(|t| truncate(&t, LLM_RESULT_MAX_CHARS)),
                usage: record.usage,
                model: record.model,
            };
            self.tracker.end(RunNamespace::Llm, &run_id, end).await;
        })
        .await
    }

    async fn on_llm_error(&self, run_id: RunId, error: &str) {
        self.guarded("on_llm_error", async {
            self.tracker
                .fail(RunNamespace::Llm, &run_id, Some(error.to_string()))
                .await;
        })
        .await
    }

    async fn on_chain_start(&self, run_id: RunId, serialized: &Value, inputs: &Value) {
        self.guarded("on_chain_start", async {
            let record = normalize_chain_inputs(inputs);
            let name = serialized_name(serialized, "chain");
            let mut fields = EventUpdate::described(
                record
                    .joined_text()
                    .unwrap_or_else(|| format!("Chain ({name})")),
            );
            if !record.images.is_empty() {
                fields.screenshots = Some(record.images);
            }
            self.tracker
                .start(RunNamespace::Chain, run_id, fields, None)
                .await;
        })
        .await
    }

    async fn on_chain_end(&self, run_id: RunId, outputs: &Value) {
        self.guarded("on_chain_end", async {
            let end = RunEnd {
                result: summarize_chain_outputs(outputs),
                ..Default::default()
            };
            self.tracker.end(RunNamespace::Chain, &run_id, end).await;
        })
        .await
    }

    async fn on_chain_error(&self, run_id: RunId, error: &str) {
        self.guarded("on_chain_error", async {
            self.tracker
                .fail(RunNamespace::Chain, &run_id, Some(error.to_string()))
                .await;
        })
        .await
    }

    async fn on_tool_start(&self, run_id: RunId, serialized: &Value, input: &str) {
        self.guarded("on_tool_start", async {
            let name = serialized_name(serialized, "unknown_tool");
            let fields = EventUpdate::described(format!(
                "Tool Call ({name}): {}...",
                truncate(input, INPUT_PREVIEW_MAX_CHARS)
            ));
            self.tracker
                .start(RunNamespace::Tool, run_id, fields, None)
                .await;
        })
        .await
    }

    async fn on_tool_end(&self, run_id: RunId, output: &str) {
        self.guarded("on_tool_end", async {
            let end = RunEnd {
                result: Some(truncate(output, TOOL_RESULT_MAX_CHARS)),
                ..Default::default()
            };
            self.tracker.end(RunNamespace::Tool, &run_id, end).await;
        })
        .await
    }

    async fn on_tool_error(&self, run_id: RunId, error: &str) {
        self.guarded("on_tool_error", async {
            self.tracker
                .fail(RunNamespace::Tool, &run_id, Some(error.to_string()))
                .await;
        })
        .await
    }

    async fn on_retriever_start(&self, run_id: RunId, serialized: &Value, query: &str) {
        self.guarded("on_retriever_start", async {
            let name = serialized_name(serialized, "unknown_retriever");
            let fields = EventUpdate::described(format!(
                "Retriever ({name}): {}...",
                truncate(query, INPUT_PREVIEW_MAX_CHARS)
            ));
            self.tracker
                .start(RunNamespace::Retriever, run_id, fields, None)
                .await;
        })
        .await
    }

    async fn on_retriever_end(&self, run_id: RunId, documents: &[Document]) {
        self.guarded("on_retriever_end", async {
            let end = RunEnd {
                result: summarize_documents(documents),
                ..Default::default()
            };
            self.tracker.end(RunNamespace::Retriever, &run_id, end).await;
        })
        .await
    }

    async fn on_retriever_error(&self, run_id: RunId, error: &str) {
        self.guarded("on_retriever_error", async {
            self.tracker
                .fail(RunNamespace::Retriever, &run_id, Some(error.to_string()))
                .await;
        })
        .await
    }

    async fn on_agent_action(&self, _run_id: RunId, action: &AgentAction) {
        self.guarded("on_agent_action", async {
            let fields = EventUpdate::described(format!("Agent Action: {}", action.tool));
            let end = EventUpdate::succeeded(Some(action.summary()), None, None);
            self.tracker.record_instant(fields, end).await;
        })
        .await
    }

    async fn on_agent_finish(&self, _run_id: RunId, finish: &AgentFinish) {
        self.guarded("on_agent_finish", async {
            let result = finish
                .output()
                .map(|o| truncate(&o, TOOL_RESULT_MAX_CHARS));
            self.tracker
                .end_latest(EventUpdate::succeeded(result, None, None))
                .await;
        })
        .await
    }
}

fn summarize_documents(documents: &[Document]) -> Option<String> {
    let first = documents.first()?;
    Some(format!(
        "Retrieved {} documents. Sample: {}...",
        documents.len(),
        truncate(&first.page_content, RETRIEVER_SAMPLE_MAX_CHARS)
    ))
}
