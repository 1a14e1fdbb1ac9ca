use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use lucid_core::ids::{EventId, MassSimId, SessionId, StepId};
use lucid_core::records::{EventRecord, SessionRecord, StepRecord};
use lucid_core::{Backend, BackendError, MassSimRequest};

/// One call observed by `MockBackend`, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    VerifyCredentials,
    CreateSession(SessionId),
    UpdateSession(SessionId),
    EndSession(SessionId),
    CreateStep(StepId),
    UpdateStep(StepId),
    CreateEvent(EventId),
    UpdateEvent(EventId),
    CreateMassSim(String),
    FetchPrompt { name: String, label: String },
}

#[derive(Default)]
struct Recorded {
    calls: Vec<BackendCall>,
    sessions: HashMap<SessionId, SessionRecord>,
    steps: HashMap<StepId, StepRecord>,
    events: HashMap<EventId, EventRecord>,
}

/// In-memory backend that records every call and keeps the last pushed
/// version of each record. Prompts are served from a fixed table.
#[derive(Default)]
pub struct MockBackend {
    recorded: Mutex<Recorded>,
    prompts: Mutex<HashMap<(String, String), String>>,
    failure: Mutex<Option<BackendError>>,
    reject_credentials: Mutex<bool>,
    prompt_fetches: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(self, name: &str, label: &str, text: &str) -> Self {
        self.prompts
            .lock()
            .insert((name.to_string(), label.to_string()), text.to_string());
        self
    }

    /// Fail every credential check with an authentication error.
    pub fn rejecting_credentials(self) -> Self {
        *self.reject_credentials.lock() = true;
        self
    }

    /// Make every subsequent write fail with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<BackendError>) {
        *self.failure.lock() = err;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.recorded.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.recorded.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn prompt_fetches(&self) -> usize {
        self.prompt_fetches.load(Ordering::Relaxed)
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionRecord> {
        self.recorded.lock().sessions.get(id).cloned()
    }

    pub fn step(&self, id: &StepId) -> Option<StepRecord> {
        self.recorded.lock().steps.get(id).cloned()
    }

    pub fn event(&self, id: &EventId) -> Option<EventRecord> {
        self.recorded.lock().events.get(id).cloned()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        let mut events: Vec<_> = self.recorded.lock().events.values().cloned().collect();
        events.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        events
    }

    fn record(&self, call: BackendCall, apply: impl FnOnce(&mut Recorded)) -> Result<(), BackendError> {
        let mut recorded = self.recorded.lock();
        recorded.calls.push(call);
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        apply(&mut recorded);
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn verify_credentials(&self) -> Result<(), BackendError> {
        self.recorded.lock().calls.push(BackendCall::VerifyCredentials);
        if *self.reject_credentials.lock() {
            return Err(BackendError::AuthenticationFailed("invalid api key".into()));
        }
        Ok(())
    }

    async fn create_session(&self, session: &SessionRecord) -> Result<(), BackendError> {
        self.record(BackendCall::CreateSession(session.id.clone()), |r| {
            r.sessions.insert(session.id.clone(), session.clone());
        })
    }

    async fn update_session(&self, session: &SessionRecord) -> Result<(), BackendError> {
        self.record(BackendCall::UpdateSession(session.id.clone()), |r| {
            r.sessions.insert(session.id.clone(), session.clone());
        })
    }

    async fn end_session(&self, session: &SessionRecord) -> Result<(), BackendError> {
        self.record(BackendCall::EndSession(session.id.clone()), |r| {
            r.sessions.insert(session.id.clone(), session.clone());
        })
    }

    async fn create_step(&self, step: &StepRecord) -> Result<(), BackendError> {
        self.record(BackendCall::CreateStep(step.id.clone()), |r| {
            r.steps.insert(step.id.clone(), step.clone());
        })
    }

    async fn update_step(&self, step: &StepRecord) -> Result<(), BackendError> {
        self.record(BackendCall::UpdateStep(step.id.clone()), |r| {
            r.steps.insert(step.id.clone(), step.clone());
        })
    }

    async fn create_event(&self, event: &EventRecord) -> Result<(), BackendError> {
        self.record(BackendCall::CreateEvent(event.id.clone()), |r| {
            r.events.insert(event.id.clone(), event.clone());
        })
    }

    async fn update_event(&self, event: &EventRecord) -> Result<(), BackendError> {
        self.record(BackendCall::UpdateEvent(event.id.clone()), |r| {
            r.events.insert(event.id.clone(), event.clone());
        })
    }

    async fn create_mass_sim(&self, request: &MassSimRequest) -> Result<MassSimId, BackendError> {
        self.record(BackendCall::CreateMassSim(request.name.clone()), |_| {})?;
        Ok(MassSimId::new())
    }

    async fn fetch_prompt(&self, name: &str, label: &str) -> Result<String, BackendError> {
        self.prompt_fetches.fetch_add(1, Ordering::Relaxed);
        self.record(
            BackendCall::FetchPrompt {
                name: name.to_string(),
                label: label.to_string(),
            },
            |_| {},
        )?;
        self.prompts
            .lock()
            .get(&(name.to_string(), label.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("prompt {name}@{label}")))
    }
}
