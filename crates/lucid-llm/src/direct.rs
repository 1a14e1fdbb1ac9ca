//! Direct-call adapter: wraps an outbound model call and records it as one
//! event, leaving the call's result untouched.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, warn};

use lucid_core::ids::RunId;
use lucid_core::records::EventUpdate;
use lucid_core::tokens::TokenUsage;
use lucid_core::ProviderKind;

use crate::correlation::RunNamespace;
use crate::lifecycle::{RunEnd, RunTracker};
use crate::payload::{truncate, ChatRequest, ModelResponse, StreamChunk};
use crate::ProviderAdapter;

/// Upper bound on the result text stored for a direct call.
pub const RESULT_MAX_CHARS: usize = 4000;

/// Failure reason recorded when a call or stream is dropped before it finished.
pub const CANCELLED_REASON: &str = "cancelled";

/// An open run that is failed with [`CANCELLED_REASON`] if dropped before
/// it is settled.
struct OpenCall {
    tracker: Arc<RunTracker>,
    run_id: Option<RunId>,
}

impl OpenCall {
    fn run_id(&self) -> Option<RunId> {
        self.run_id.clone()
    }

    /// The run has been ended or failed.
    fn settle(&mut self) {
        self.run_id = None;
    }
}

impl Drop for OpenCall {
    fn drop(&mut self) {
        let Some(run_id) = self.run_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(run_id = %run_id, "call dropped outside a runtime; run left open");
            return;
        };
        let tracker = Arc::clone(&self.tracker);
        debug!(run_id = %run_id, "call dropped before completion");
        handle.spawn(async move {
            tracker
                .fail(RunNamespace::Llm, &run_id, Some(CANCELLED_REASON.to_string()))
                .await;
        });
    }
}

pub struct DirectCallAdapter {
    tracker: Arc<RunTracker>,
    enabled: AtomicBool,
}

impl DirectCallAdapter {
    pub fn new(tracker: RunTracker) -> Self {
        Self {
            tracker: Arc::new(tracker),
            enabled: AtomicBool::new(true),
        }
    }

    /// Open an event for `request`. Returns the run id when one was opened.
    async fn begin(&self, request: &ChatRequest) -> Option<RunId> {
        if !self.is_enabled() {
            return None;
        }
        let record = request.normalize();
        let mut fields = EventUpdate::default();
        fields.description = record.joined_text();
        if !record.images.is_empty() {
            fields.screenshots = Some(record.images);
        }
        let run_id = RunId::new();
        self.tracker
            .start(RunNamespace::Llm, run_id.clone(), fields, record.model)
            .await?;
        Some(run_id)
    }

    async fn open_call(&self, request: &ChatRequest) -> OpenCall {
        OpenCall {
            tracker: Arc::clone(&self.tracker),
            run_id: self.begin(request).await,
        }
    }

    /// Await `call` and record its outcome against an event describing
    /// `request`. Errors are recorded with their text as the reason.
    pub async fn intercept<R, E, F, Fut>(&self, request: &ChatRequest, call: F) -> Result<R, E>
    where
        R: ModelResponse,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut open = self.open_call(request).await;
        let result = call().await;
        let Some(run_id) = open.run_id() else {
            return result;
        };

        match &result {
            Ok(response) => {
                let record = response.normalize();
                let end = RunEnd {
                    result: record.joined_text().map(|t| truncate(&t, RESULT_MAX_CHARS)),
                    usage: record.usage,
                    model: record.model,
                };
                self.tracker.end(RunNamespace::Llm, &run_id, end).await;
            }
            Err(e) => {
                self.tracker
                    .fail(RunNamespace::Llm, &run_id, Some(e.to_string()))
                    .await;
            }
        }
        open.settle();
        result
    }

    /// Wrap a streaming response. Text deltas are accumulated and the event
    /// is ended when the stream is exhausted, or failed on the first error.
    /// Dropping the stream early fails the event as cancelled.
    pub async fn intercept_stream<S, C, E>(
        &self,
        request: &ChatRequest,
        inner: S,
    ) -> BoxStream<'static, Result<C, E>>
    where
        S: Stream<Item = Result<C, E>> + Send + Unpin + 'static,
        C: StreamChunk + Send + 'static,
        E: Display + Send + 'static,
    {
        let state = StreamState {
            inner,
            open: self.open_call(request).await,
            text: String::new(),
            usage: None,
            model: None,
        };

        stream::unfold(state, |mut st| async move {
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    if let Some(delta) = chunk.text_delta() {
                        st.text.push_str(delta);
                    }
                    if let Some(usage) = chunk.usage() {
                        st.usage = Some(merge_usage(st.usage.take(), usage));
                    }
                    if let Some(model) = chunk.model() {
                        st.model = Some(model.to_string());
                    }
                    Some((Ok(chunk), st))
                }
                Some(Err(e)) => {
                    if let Some(run_id) = st.open.run_id() {
                        st.open
                            .tracker
                            .fail(RunNamespace::Llm, &run_id, Some(e.to_string()))
                            .await;
                        st.open.settle();
                    }
                    Some((Err(e), st))
                }
                None => {
                    if let Some(run_id) = st.open.run_id() {
                        let end = RunEnd {
                            result: (!st.text.is_empty())
                                .then(|| truncate(&st.text, RESULT_MAX_CHARS)),
                            usage: st.usage.take(),
                            model: st.model.take(),
                        };
                        st.open.tracker.end(RunNamespace::Llm, &run_id, end).await;
                        st.open.settle();
                    } else {
                        debug!("stream finished without an open event");
                    }
                    None
                }
            }
        })
        .boxed()
    }
}

struct StreamState<S> {
    inner: S,
    open: OpenCall,
    text: String,
    usage: Option<TokenUsage>,
    model: Option<String>,
}

/// Streams report input and output counts in separate chunks.
fn merge_usage(acc: Option<TokenUsage>, next: TokenUsage) -> TokenUsage {
    let Some(acc) = acc else {
        return next;
    };
    let pick = |new: u32, old: u32| if new > 0 { new } else { old };
    TokenUsage {
        input_tokens: pick(next.input_tokens, acc.input_tokens),
        output_tokens: pick(next.output_tokens, acc.output_tokens),
        cache_read_tokens: pick(next.cache_read_tokens, acc.cache_read_tokens),
        cache_creation_tokens: pick(next.cache_creation_tokens, acc.cache_creation_tokens),
    }
}

#[async_trait]
impl ProviderAdapter for DirectCallAdapter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::testing::tracker;
    use crate::payload::{AnthropicEvent, AnthropicResponse, ChatMessage, OpenAiResponse};
    use serde_json::json;

    fn request(model: &str) -> ChatRequest {
        ChatRequest::new(model, vec![ChatMessage::user("summarize this")])
    }

    fn openai_response() -> OpenAiResponse {
        serde_json::from_value(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"content": "a summary"}}],
            "usage": {"prompt_tokens": 1000, "completion_tokens": 200}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn successful_call_is_recorded_and_returned() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::OpenAi).await;
        let adapter = DirectCallAdapter::new(tracker);

        let response = adapter
            .intercept(&request("gpt-4o"), || async { Ok::<_, String>(openai_response()) })
            .await
            .unwrap();
        assert_eq!(response, openai_response());

        let ev = &session.event_history().await[0];
        assert_eq!(ev.description.as_deref(), Some("summarize this"));
        assert_eq!(ev.result.as_deref(), Some("a summary"));
        assert_eq!(ev.model.as_deref(), Some("gpt-4o-2024-08-06"));
        let expected = (1000.0 * 2.5 + 200.0 * 10.0) / 1_000_000.0;
        assert!((ev.cost_added.unwrap() - expected).abs() < 1e-12);
        assert_eq!(adapter.in_flight().await, 0);
    }

    #[tokio::test]
    async fn failed_call_is_recorded_and_error_returned() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::Anthropic).await;
        let adapter = DirectCallAdapter::new(tracker);

        let err = adapter
            .intercept(&request("claude-3-5-sonnet"), || async {
                Err::<AnthropicResponse, _>("overloaded".to_string())
            })
            .await
            .unwrap_err();
        assert_eq!(err, "overloaded");

        let ev = &session.event_history().await[0];
        assert_eq!(ev.is_successful, Some(false));
        assert_eq!(ev.success_reason.as_deref(), Some("overloaded"));
        assert_eq!(ev.model.as_deref(), Some("claude-3-5-sonnet"));
        assert!(ev.cost_added.is_none());
    }

    #[tokio::test]
    async fn disabled_adapter_passes_through() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::OpenAi).await;
        let adapter = DirectCallAdapter::new(tracker);
        adapter.set_enabled(false);

        adapter
            .intercept(&request("gpt-4o"), || async { Ok::<_, String>(openai_response()) })
            .await
            .unwrap();
        assert!(session.event_history().await.is_empty());
    }

    #[tokio::test]
    async fn call_without_active_step_still_returns() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::OpenAi).await;
        session.end_step(&Default::default()).await.unwrap();
        let adapter = DirectCallAdapter::new(tracker);

        let response = adapter
            .intercept(&request("gpt-4o"), || async { Ok::<_, String>(openai_response()) })
            .await;
        assert!(response.is_ok());
    }

    fn anthropic_events() -> Vec<Result<AnthropicEvent, String>> {
        [
            json!({"type": "message_start", "message": {
                "model": "claude-3-5-haiku-20241022",
                "content": [],
                "usage": {"input_tokens": 500, "output_tokens": 1}
            }}),
            json!({"type": "content_block_start", "index": 0}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hello"}}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": " world"}}),
            json!({"type": "message_delta", "usage": {"output_tokens": 40}}),
            json!({"type": "message_stop"}),
        ]
        .into_iter()
        .map(|v| Ok(serde_json::from_value(v).unwrap()))
        .collect()
    }

    #[tokio::test]
    async fn stream_accumulates_and_ends_on_completion() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::Anthropic).await;
        let adapter = DirectCallAdapter::new(tracker);

        let wrapped = adapter
            .intercept_stream(&request("claude-3-5-haiku"), stream::iter(anthropic_events()))
            .await;
        assert_eq!(adapter.in_flight().await, 1);

        let items: Vec<_> = wrapped.collect().await;
        assert_eq!(items.len(), 6);

        let ev = &session.event_history().await[0];
        assert!(ev.is_finished);
        assert_eq!(ev.result.as_deref(), Some("Hello world"));
        assert_eq!(ev.model.as_deref(), Some("claude-3-5-haiku-20241022"));
        let expected = (500.0 * 0.80 + 40.0 * 4.0) / 1_000_000.0;
        assert!((ev.cost_added.unwrap() - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn stream_error_fails_the_event() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::Anthropic).await;
        let adapter = DirectCallAdapter::new(tracker);

        let mut events = anthropic_events();
        events.truncate(3);
        events.push(Err("connection reset".to_string()));
        let items: Vec<_> = adapter
            .intercept_stream(&request("claude-3-5-haiku"), stream::iter(events))
            .await
            .collect()
            .await;
        assert!(items.last().unwrap().is_err());

        let ev = &session.event_history().await[0];
        assert_eq!(ev.is_successful, Some(false));
        assert_eq!(ev.success_reason.as_deref(), Some("connection reset"));
    }

    async fn wait_idle(adapter: &DirectCallAdapter) {
        for _ in 0..100 {
            if adapter.in_flight().await == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn dropped_stream_fails_the_event() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::Anthropic).await;
        let adapter = DirectCallAdapter::new(tracker);

        let mut wrapped = adapter
            .intercept_stream(&request("claude-3-5-haiku"), stream::iter(anthropic_events()))
            .await;
        assert!(wrapped.next().await.unwrap().is_ok());
        drop(wrapped);

        wait_idle(&adapter).await;
        assert_eq!(adapter.in_flight().await, 0);
        let ev = &session.event_history().await[0];
        assert!(ev.is_finished);
        assert_eq!(ev.is_successful, Some(false));
        assert_eq!(ev.success_reason.as_deref(), Some(CANCELLED_REASON));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_fails_the_event() {
        let (_, _, session, _, tracker) = tracker(ProviderKind::OpenAi).await;
        let adapter = DirectCallAdapter::new(tracker);

        let req = request("gpt-4o");
        let call = adapter.intercept(&req, || async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok::<_, String>(openai_response())
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_secs(1), call).await;
        assert!(timed_out.is_err());

        wait_idle(&adapter).await;
        assert_eq!(adapter.in_flight().await, 0);
        let ev = &session.event_history().await[0];
        assert_eq!(ev.is_successful, Some(false));
        assert_eq!(ev.success_reason.as_deref(), Some(CANCELLED_REASON));
    }

    #[test]
    fn usage_merge_keeps_both_halves() {
        let merged = merge_usage(Some(TokenUsage::new(500, 1)), TokenUsage::new(0, 40));
        assert_eq!(merged, TokenUsage::new(500, 40));
    }
}
