use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use lucid_core::ids::{EventId, RunId};
use lucid_core::records::{EventRecord, EventUpdate};
use lucid_core::tokens::TokenUsage;
use lucid_core::{PricingLookup, ProviderKind};
use lucid_store::SessionSource;
use lucid_telemetry::MetricsRecorder;

use crate::correlation::{CorrelationTable, Correlations, OpenRun, RunNamespace, RunState};

pub mod metric {
    pub const EVENTS_STARTED: &str = "lucid.events.started";
    pub const EVENTS_ENDED: &str = "lucid.events.ended";
    pub const EVENTS_FAILED: &str = "lucid.events.failed";
    pub const CORRELATION_MISS: &str = "lucid.correlation.miss";
    pub const DUPLICATE_START: &str = "lucid.correlation.duplicate_start";
    pub const RUN_DURATION_MS: &str = "lucid.run.duration_ms";
    pub const RUNS_IN_FLIGHT: &str = "lucid.runs.in_flight";
}

/// What a successful run reports at the end.
#[derive(Clone, Debug, Default)]
pub struct RunEnd {
    pub result: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Overrides the model remembered at start.
    pub model: Option<String>,
}

/// Drives the start/end/error transitions of correlated runs and turns them
/// into event writes on whichever session is active at start time.
pub struct RunTracker {
    provider: ProviderKind,
    sessions: Arc<dyn SessionSource>,
    pricing: Arc<dyn PricingLookup>,
    table: CorrelationTable,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl RunTracker {
    pub fn new(
        provider: ProviderKind,
        sessions: Arc<dyn SessionSource>,
        pricing: Arc<dyn PricingLookup>,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> Self {
        Self {
            provider,
            sessions,
            pricing,
            table: CorrelationTable::new(),
            metrics,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub async fn in_flight(&self) -> usize {
        self.table.in_flight().await
    }

    fn count(&self, name: &str, ns: RunNamespace) {
        if let Some(m) = &self.metrics {
            let provider = self.provider.to_string();
            m.counter_inc(name, &[("namespace", ns.as_str()), ("provider", &provider)], 1);
        }
    }

    fn track_in_flight(&self, ns: RunNamespace, delta: f64) {
        if let Some(m) = &self.metrics {
            m.gauge_inc(metric::RUNS_IN_FLIGHT, &[("namespace", ns.as_str())], delta);
        }
    }

    fn observe_duration(&self, ns: RunNamespace, started: Instant) {
        if let Some(m) = &self.metrics {
            let ms = started.elapsed().as_secs_f64() * 1000.0;
            m.histogram_observe(metric::RUN_DURATION_MS, &[("namespace", ns.as_str())], ms);
        }
    }

    /// `Unseen → Started`. Creates an event on the active step. Returns the
    /// event id, or `None` if nothing was recorded.
    pub async fn start(
        &self,
        ns: RunNamespace,
        run_id: RunId,
        fields: EventUpdate,
        model: Option<String>,
    ) -> Option<EventId> {
        let mut table = self.table.lock().await;
        match table.state(ns, &run_id) {
            RunState::Unseen => {}
            state => {
                warn!(namespace = %ns, run_id = %run_id, ?state, "duplicate run start ignored");
                self.count(metric::DUPLICATE_START, ns);
                return None;
            }
        }

        let Some(session) = self.sessions.active_session() else {
            debug!(namespace = %ns, run_id = %run_id, "no active session; run not recorded");
            return None;
        };

        // once the event is in memory the run is open, even if the push failed
        let event = match session.append_event(&fields).await {
            Ok((event, pushed)) => {
                if let Err(e) = pushed {
                    warn!(namespace = %ns, run_id = %run_id, error = %e, "event not pushed; run stays open");
                }
                event
            }
            Err(e) => {
                warn!(namespace = %ns, run_id = %run_id, error = %e, "could not create event for run");
                return None;
            }
        };

        let event_id = event.id.clone();
        table.open(
            ns,
            run_id,
            OpenRun {
                event_id: event_id.clone(),
                session,
                model,
                started: Instant::now(),
            },
        );
        self.count(metric::EVENTS_STARTED, ns);
        self.track_in_flight(ns, 1.0);
        Some(event_id)
    }

    fn take(&self, table: &mut Correlations, ns: RunNamespace, run_id: &RunId) -> Option<OpenRun> {
        match table.close(ns, run_id) {
            Ok(run) => {
                self.track_in_flight(ns, -1.0);
                Some(run)
            }
            Err(RunState::Terminated) => {
                debug!(namespace = %ns, run_id = %run_id, "run already terminated");
                None
            }
            Err(_) => {
                warn!(namespace = %ns, run_id = %run_id, "no open event for run");
                self.count(metric::CORRELATION_MISS, ns);
                None
            }
        }
    }

    /// `Started → Terminated` with success. Cost comes from usage and the model.
    pub async fn end(&self, ns: RunNamespace, run_id: &RunId, end: RunEnd) -> Option<EventRecord> {
        let mut table = self.table.lock().await;
        let run = self.take(&mut table, ns, run_id)?;

        let model = end.model.or(run.model);
        let cost = match (&model, &end.usage) {
            (Some(model), Some(usage)) => self.pricing.cost(model, usage),
            _ => None,
        };
        let update = EventUpdate::succeeded(end.result, cost, model);

        self.observe_duration(ns, run.started);
        match run.session.end_event_by_id(&run.event_id, &update).await {
            Ok(event) => {
                if event.is_some() {
                    self.count(metric::EVENTS_ENDED, ns);
                }
                event
            }
            Err(e) => {
                warn!(namespace = %ns, run_id = %run_id, error = %e, "could not end event for run");
                None
            }
        }
    }

    /// `Started → Terminated` with failure. No cost or result is recorded.
    pub async fn fail(&self, ns: RunNamespace, run_id: &RunId, reason: Option<String>) -> Option<EventRecord> {
        let mut table = self.table.lock().await;
        let run = self.take(&mut table, ns, run_id)?;

        let mut update = EventUpdate::failed(reason);
        update.model = run.model;

        self.observe_duration(ns, run.started);
        match run.session.end_event_by_id(&run.event_id, &update).await {
            Ok(event) => {
                if event.is_some() {
                    self.count(metric::EVENTS_FAILED, ns);
                }
                event
            }
            Err(e) => {
                warn!(namespace = %ns, run_id = %run_id, error = %e, "could not fail event for run");
                None
            }
        }
    }

    /// Uncorrelated event that is created and ended in one go.
    pub async fn record_instant(&self, fields: EventUpdate, end: EventUpdate) -> Option<EventRecord> {
        let session = self.sessions.active_session()?;
        let event = match session.append_event(&fields).await {
            Ok((event, pushed)) => {
                if let Err(e) = pushed {
                    warn!(error = %e, "event not pushed; ending it anyway");
                }
                event
            }
            Err(e) => {
                warn!(error = %e, "could not record event");
                return None;
            }
        };
        match session.end_event_by_id(&event.id, &end).await {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "could not end event");
                None
            }
        }
    }

    /// End the active step's most recent event.
    pub async fn end_latest(&self, end: EventUpdate) -> Option<EventRecord> {
        let session = self.sessions.active_session()?;
        match session.end_event(&end).await {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "could not end latest event");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    use lucid_client::MockBackend;
    use lucid_core::ids::AgentId;
    use lucid_core::records::{SessionOptions, StepUpdate};
    use lucid_store::SessionController;

    /// Single-slot session source for adapter tests.
    #[derive(Default)]
    pub struct Slot(pub Mutex<Option<Arc<SessionController>>>);

    impl SessionSource for Slot {
        fn active_session(&self) -> Option<Arc<SessionController>> {
            self.0.lock().clone()
        }
    }

    pub async fn session_with_step(mock: &Arc<MockBackend>) -> Arc<SessionController> {
        let session = Arc::new(
            SessionController::create(mock.clone(), AgentId::new(), SessionOptions::named("t"))
                .await
                .unwrap(),
        );
        session.create_step(&StepUpdate::goal("work")).await.unwrap();
        session
    }

    pub async fn tracker(
        provider: ProviderKind,
    ) -> (Arc<MockBackend>, Arc<Slot>, Arc<SessionController>, Arc<MetricsRecorder>, RunTracker) {
        let mock = Arc::new(MockBackend::new());
        let session = session_with_step(&mock).await;
        let slot = Arc::new(Slot(Mutex::new(Some(session.clone()))));
        let metrics = Arc::new(MetricsRecorder::new());
        let tracker = RunTracker::new(
            provider,
            slot.clone(),
            Arc::new(crate::models::StaticPricing),
            Some(metrics.clone()),
        );
        (mock, slot, session, metrics, tracker)
    }
}
