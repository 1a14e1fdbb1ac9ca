use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A warn+ diagnostic kept in memory for later inspection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub step_id: Option<String>,
}

/// Filter for `WarningLog::query`. Results come back newest first.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    /// Substring match on target.
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

/// Bounded ring of recent warnings and errors.
pub struct WarningLog {
    capacity: usize,
    inner: Mutex<WarningRing>,
}

struct WarningRing {
    next_seq: u64,
    records: VecDeque<LogRecord>,
}

impl WarningLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(WarningRing {
                next_seq: 1,
                records: VecDeque::new(),
            }),
        }
    }

    fn push(&self, mut record: LogRecord) {
        let mut ring = self.inner.lock();
        record.seq = ring.next_seq;
        ring.next_seq += 1;
        if ring.records.len() == self.capacity {
            ring.records.pop_front();
        }
        ring.records.push_back(record);
    }

    pub fn query(&self, q: &LogQuery) -> Vec<LogRecord> {
        let ring = self.inner.lock();
        ring.records
            .iter()
            .rev()
            .filter(|r| q.level.as_deref().map_or(true, |l| r.level == l))
            .filter(|r| q.target.as_deref().map_or(true, |t| r.target.contains(t)))
            .filter(|r| {
                q.session_id
                    .as_deref()
                    .map_or(true, |s| r.session_id.as_deref() == Some(s))
            })
            .take(q.limit.unwrap_or(100))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn clear(&self) {
        self.inner.lock().records.clear();
    }
}

/// tracing Layer that copies warn+ events into a `WarningLog`.
pub struct WarningLayer {
    sink: Arc<WarningLog>,
}

impl WarningLayer {
    pub fn new(sink: Arc<WarningLog>) -> Self {
        Self { sink }
    }
}

/// Visitor that extracts fields from a tracing event.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
    step_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            session_id: None,
            step_id: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(val),
            "session_id" => self.session_id = Some(val.trim_matches('"').to_string()),
            "step_id" => self.step_id = Some(val.trim_matches('"').to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "session_id" => self.session_id = Some(value.to_string()),
            "step_id" => self.step_id = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for WarningLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        // Fall back to the enclosing spans for ids the event did not carry
        if visitor.session_id.is_none() || visitor.step_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.session_id.is_none() {
                            visitor.session_id.clone_from(&fields.session_id);
                        }
                        if visitor.step_id.is_none() {
                            visitor.step_id.clone_from(&fields.step_id);
                        }
                    }
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.push(LogRecord {
            seq: 0,
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            session_id: visitor.session_id,
            step_id: visitor.step_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if visitor.session_id.is_some() || visitor.step_id.is_some() {
            if let Some(span) = ctx.span(id) {
                let mut extensions = span.extensions_mut();
                extensions.insert(SpanFields {
                    session_id: visitor.session_id,
                    step_id: visitor.step_id,
                });
            }
        }
    }
}

/// Stored on spans to propagate session_id / step_id to child events.
struct SpanFields {
    session_id: Option<String>,
    step_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture<F: FnOnce()>(capacity: usize, f: F) -> Arc<WarningLog> {
        let sink = Arc::new(WarningLog::new(capacity));
        let subscriber = tracing_subscriber::registry().with(WarningLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, f);
        sink
    }

    #[test]
    fn info_events_are_ignored() {
        let sink = capture(16, || {
            tracing::info!("started");
            tracing::debug!("noise");
        });
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn warn_and_error_are_kept() {
        let sink = capture(16, || {
            tracing::warn!(run_id = "abc", "unknown run");
            tracing::error!("backend unreachable");
        });
        assert_eq!(sink.count(), 2);

        let errors = sink.query(&LogQuery {
            level: Some("ERROR".into()),
            ..Default::default()
        });
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "backend unreachable");

        let warns = sink.query(&LogQuery {
            level: Some("WARN".into()),
            ..Default::default()
        });
        assert!(warns[0].fields.as_deref().unwrap().contains("abc"));
    }

    #[test]
    fn session_id_inherited_from_span() {
        let sink = capture(16, || {
            let span = tracing::info_span!("end_step", session_id = "sess_123");
            let _enter = span.enter();
            tracing::warn!("no active step");
        });

        let hits = sink.query(&LogQuery {
            session_id: Some("sess_123".into()),
            ..Default::default()
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message, "no active step");
    }

    #[test]
    fn ring_drops_oldest() {
        let sink = capture(2, || {
            tracing::warn!("one");
            tracing::warn!("two");
            tracing::warn!("three");
        });
        let all = sink.query(&LogQuery::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "three");
        assert_eq!(all[1].message, "two");
        assert!(all[0].seq > all[1].seq);
    }

    #[test]
    fn query_limit_and_target() {
        let log = WarningLog::new(8);
        for target in ["lucid_llm::callback", "lucid_store::controller", "lucid_llm::direct"] {
            log.push(LogRecord {
                seq: 0,
                timestamp: Utc::now().to_rfc3339(),
                level: "WARN".into(),
                target: target.into(),
                message: "m".into(),
                fields: None,
                session_id: None,
                step_id: None,
            });
        }
        let llm = log.query(&LogQuery {
            target: Some("lucid_llm".into()),
            ..Default::default()
        });
        assert_eq!(llm.len(), 2);
        let one = log.query(&LogQuery {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(one.len(), 1);
        log.clear();
        assert_eq!(log.count(), 0);
    }
}
