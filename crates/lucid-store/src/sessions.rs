use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use lucid_core::ids::{AgentId, EventId, SessionId};
use lucid_core::records::{
    EventRecord, EventUpdate, SessionOptions, SessionRecord, SessionUpdate, StepRecord, StepUpdate,
};
use lucid_core::{Backend, BackendError, LucidError};

use crate::steps::StepTracker;

/// Anything that can hand out the currently active session.
pub trait SessionSource: Send + Sync {
    fn active_session(&self) -> Option<Arc<SessionController>>;
}

struct SessionState {
    session: SessionRecord,
    steps: StepTracker,
}

/// Owns one session and serializes every mutation of it.
///
/// In-memory state changes first and the backend is pushed afterwards, with
/// the lock still held. A failed push is returned to the caller but the
/// in-memory transition stays.
pub struct SessionController {
    id: SessionId,
    backend: Arc<dyn Backend>,
    state: Mutex<SessionState>,
    finished: AtomicBool,
}

impl SessionController {
    /// Register a new session with the backend. Nothing is kept if that fails.
    #[instrument(skip(backend, options), fields(name = %options.name))]
    pub async fn create(
        backend: Arc<dyn Backend>,
        agent_id: AgentId,
        options: SessionOptions,
    ) -> Result<Self, LucidError> {
        let session = SessionRecord::new(agent_id, options);
        backend.create_session(&session).await?;
        info!(session_id = %session.id, "session started");
        Ok(Self {
            id: session.id.clone(),
            backend,
            state: Mutex::new(SessionState {
                steps: StepTracker::new(session.id.clone()),
                session,
            }),
            finished: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub async fn session(&self) -> SessionRecord {
        self.state.lock().await.session.clone()
    }

    /// Set as soon as `end` has finished the session in memory.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    #[instrument(skip(self, update), fields(session_id = %self.id))]
    pub async fn update(&self, update: &SessionUpdate) -> Result<Option<SessionRecord>, LucidError> {
        let mut state = self.state.lock().await;
        if state.session.is_finished {
            warn!("update ignored: session already finished");
            return Ok(None);
        }
        state.session.apply(update);
        self.backend.update_session(&state.session).await?;
        Ok(Some(state.session.clone()))
    }

    /// Finish the session. Any still-active step is ended first. Ending an
    /// already finished session only warns.
    #[instrument(skip(self, outcome), fields(session_id = %self.id))]
    pub async fn end(&self, outcome: &SessionUpdate) -> Result<Option<SessionRecord>, LucidError> {
        let mut state = self.state.lock().await;
        if state.session.is_finished {
            warn!("end ignored: session already finished");
            return Ok(None);
        }

        let dangling = if state.steps.active().is_some() {
            Some(state.steps.end_active(&StepUpdate::default())?)
        } else {
            None
        };
        state.session.apply(outcome);
        state.session.is_finished = true;
        self.finished.store(true, Ordering::Release);
        log_step_history(&state.steps.history());

        if let Some(step) = dangling {
            self.backend.update_step(&step).await?;
        }
        self.backend.end_session(&state.session).await?;
        info!(
            steps = state.steps.len(),
            is_successful = ?state.session.is_successful,
            "session finished"
        );
        Ok(Some(state.session.clone()))
    }

    #[instrument(skip(self, init), fields(session_id = %self.id))]
    pub async fn create_step(&self, init: &StepUpdate) -> Result<StepRecord, LucidError> {
        let mut state = self.state.lock().await;
        ensure_open(&state.session)?;
        let step = state.steps.create(init)?;
        self.backend.create_step(&step).await?;
        Ok(step)
    }

    #[instrument(skip(self, update), fields(session_id = %self.id))]
    pub async fn update_step(&self, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        let mut state = self.state.lock().await;
        ensure_open(&state.session)?;
        let step = state.steps.update_active(update)?;
        self.backend.update_step(&step).await?;
        Ok(step)
    }

    #[instrument(skip(self, update), fields(session_id = %self.id))]
    pub async fn end_step(&self, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        let mut state = self.state.lock().await;
        ensure_open(&state.session)?;
        let step = state.steps.end_active(update)?;
        self.backend.update_step(&step).await?;
        Ok(step)
    }

    #[instrument(skip(self, update), fields(session_id = %self.id))]
    pub async fn update_step_at(&self, index: isize, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        let mut state = self.state.lock().await;
        ensure_open(&state.session)?;
        let step = state.steps.update_at(index, update)?;
        self.backend.update_step(&step).await?;
        Ok(step)
    }

    pub async fn has_active_step(&self) -> bool {
        let state = self.state.lock().await;
        !state.session.is_finished && state.steps.active().is_some()
    }

    pub async fn step_history(&self) -> Vec<StepRecord> {
        self.state.lock().await.steps.history()
    }

    /// Every event of every step, in creation order.
    pub async fn event_history(&self) -> Vec<EventRecord> {
        self.state.lock().await.steps.all_events()
    }

    pub async fn create_event(&self, init: &EventUpdate) -> Result<EventRecord, LucidError> {
        let (event, pushed) = self.append_event(init).await?;
        pushed?;
        Ok(event)
    }

    /// Append an event to the active step and push it.
    ///
    /// Unlike [`create_event`](Self::create_event) a failed push does not hide
    /// the record: once appended, the event is returned together with the
    /// push outcome so the caller can still end it.
    #[instrument(skip(self, init), fields(session_id = %self.id))]
    pub async fn append_event(
        &self,
        init: &EventUpdate,
    ) -> Result<(EventRecord, Result<(), BackendError>), LucidError> {
        let mut state = self.state.lock().await;
        ensure_open(&state.session)?;
        let step = state
            .steps
            .active_mut()
            .ok_or_else(|| LucidError::invalid("cannot create event: no active step"))?;
        let event = step.events.create(init)?;
        let pushed = self.backend.create_event(&event).await;
        Ok((event, pushed))
    }

    /// Update the active step's most recent event.
    #[instrument(skip(self, update), fields(session_id = %self.id))]
    pub async fn update_event(&self, update: &EventUpdate) -> Result<Option<EventRecord>, LucidError> {
        let mut state = self.state.lock().await;
        if !accepts_event_writes(&state.session) {
            return Ok(None);
        }
        let Some(step) = state.steps.active_mut() else {
            warn!("no active step; event update ignored");
            return Ok(None);
        };
        let event = step.events.update_latest(update)?;
        if let Some(event) = &event {
            self.backend.update_event(event).await?;
        }
        Ok(event)
    }

    /// End the active step's most recent event.
    #[instrument(skip(self, update), fields(session_id = %self.id))]
    pub async fn end_event(&self, update: &EventUpdate) -> Result<Option<EventRecord>, LucidError> {
        let mut state = self.state.lock().await;
        if !accepts_event_writes(&state.session) {
            return Ok(None);
        }
        let Some(step) = state.steps.active_mut() else {
            warn!("no active step; event end ignored");
            return Ok(None);
        };
        let event = step.events.end_latest(update)?;
        if let Some(event) = &event {
            self.backend.update_event(event).await?;
        }
        Ok(event)
    }

    #[instrument(skip(self, update), fields(session_id = %self.id))]
    pub async fn update_event_at(&self, index: isize, update: &EventUpdate) -> Result<EventRecord, LucidError> {
        let mut state = self.state.lock().await;
        ensure_open(&state.session)?;
        let step = state
            .steps
            .active_mut()
            .ok_or_else(|| LucidError::invalid("cannot update event: no active step"))?;
        let event = step.events.update_at(index, update)?;
        self.backend.update_event(&event).await?;
        Ok(event)
    }

    #[instrument(skip(self, update), fields(session_id = %self.id, event_id = %id))]
    pub async fn update_event_by_id(
        &self,
        id: &EventId,
        update: &EventUpdate,
    ) -> Result<Option<EventRecord>, LucidError> {
        let mut state = self.state.lock().await;
        if !accepts_event_writes(&state.session) {
            return Ok(None);
        }
        let Some(result) = state.steps.update_event_by_id(id, update) else {
            warn!("event not found in this session");
            return Ok(None);
        };
        let event = result?;
        self.backend.update_event(&event).await?;
        Ok(Some(event))
    }

    #[instrument(skip(self, update), fields(session_id = %self.id, event_id = %id))]
    pub async fn end_event_by_id(
        &self,
        id: &EventId,
        update: &EventUpdate,
    ) -> Result<Option<EventRecord>, LucidError> {
        let mut state = self.state.lock().await;
        if !accepts_event_writes(&state.session) {
            return Ok(None);
        }
        let Some(result) = state.steps.end_event_by_id(id, update) else {
            warn!("event not found in this session");
            return Ok(None);
        };
        let event = result?;
        self.backend.update_event(&event).await?;
        Ok(Some(event))
    }
}

fn ensure_open(session: &SessionRecord) -> Result<(), LucidError> {
    if session.is_finished {
        return Err(LucidError::invalid(format!(
            "session {} is finished",
            session.id
        )));
    }
    Ok(())
}

fn accepts_event_writes(session: &SessionRecord) -> bool {
    if session.is_finished {
        warn!("session already finished; event write ignored");
        return false;
    }
    true
}

fn log_step_history(steps: &[StepRecord]) {
    info!(count = steps.len(), "step history");
    for (i, step) in steps.iter().enumerate() {
        let status = if step.is_finished { "finished" } else { "active" };
        info!(
            index = i,
            goal = step.goal.as_deref().unwrap_or("-"),
            action = step.action.as_deref().unwrap_or("-"),
            status,
            eval_score = ?step.eval_score,
            "step"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucid_client::{BackendCall, MockBackend};
    use lucid_core::BackendError;

    async fn controller() -> (Arc<MockBackend>, SessionController) {
        let mock = Arc::new(MockBackend::new());
        let ctl = SessionController::create(
            mock.clone(),
            AgentId::from_raw("agent-1"),
            SessionOptions::named("test run").with_task("do things"),
        )
        .await
        .unwrap();
        (mock, ctl)
    }

    #[tokio::test]
    async fn create_registers_with_backend() {
        let (mock, ctl) = controller().await;
        assert_eq!(mock.calls(), vec![BackendCall::CreateSession(ctl.id().clone())]);
        assert_eq!(ctl.session().await.task.as_deref(), Some("do things"));
    }

    #[tokio::test]
    async fn create_fails_when_backend_rejects() {
        let mock = Arc::new(MockBackend::new());
        mock.set_failure(Some(BackendError::AuthenticationFailed("nope".into())));
        let res = SessionController::create(mock, AgentId::new(), SessionOptions::named("x")).await;
        assert!(matches!(res, Err(LucidError::Backend(BackendError::AuthenticationFailed(_)))));
    }

    #[tokio::test]
    async fn one_active_step_at_a_time() {
        let (_, ctl) = controller().await;
        ctl.create_step(&StepUpdate::goal("a")).await.unwrap();
        let err = ctl.create_step(&StepUpdate::goal("b")).await.unwrap_err();
        assert!(matches!(err, LucidError::InvalidOperation(_)));

        ctl.end_step(&StepUpdate::default()).await.unwrap();
        ctl.create_step(&StepUpdate::goal("b")).await.unwrap();
        assert_eq!(ctl.step_history().await.len(), 2);
    }

    #[tokio::test]
    async fn step_ops_without_active_step_fail() {
        let (_, ctl) = controller().await;
        assert!(matches!(
            ctl.update_step(&StepUpdate::default()).await,
            Err(LucidError::InvalidOperation(_))
        ));
        assert!(ctl.end_step(&StepUpdate::default()).await.is_err());
        assert!(ctl.create_event(&EventUpdate::default()).await.is_err());
    }

    #[tokio::test]
    async fn event_lifecycle_pushes_backend() {
        let (mock, ctl) = controller().await;
        ctl.create_step(&StepUpdate::goal("search")).await.unwrap();
        let ev = ctl.create_event(&EventUpdate::described("query")).await.unwrap();
        let ended = ctl
            .end_event(&EventUpdate::succeeded(Some("3 hits".into()), Some(0.002), None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended.id, ev.id);
        assert!(mock.event(&ev.id).unwrap().is_finished);

        let err = ctl.end_event(&EventUpdate::default()).await.unwrap_err();
        assert!(matches!(err, LucidError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn empty_event_history_noops() {
        let (mock, ctl) = controller().await;
        ctl.create_step(&StepUpdate::default()).await.unwrap();
        assert!(ctl.update_event(&EventUpdate::described("x")).await.unwrap().is_none());
        assert!(ctl.end_event(&EventUpdate::default()).await.unwrap().is_none());
        assert_eq!(mock.count(|c| matches!(c, BackendCall::UpdateEvent(_))), 0);
    }

    #[tokio::test]
    async fn end_session_finishes_dangling_step_once() {
        let (mock, ctl) = controller().await;
        let step = ctl.create_step(&StepUpdate::goal("last")).await.unwrap();

        let ended = ctl
            .end(&SessionUpdate::outcome(Some(0.0), None, Some(false), Some("gave up".into())))
            .await
            .unwrap()
            .unwrap();
        assert!(ended.is_finished);
        assert_eq!(ended.eval_score, Some(0.0));
        assert!(mock.step(&step.id).unwrap().is_finished);

        // second end only warns
        assert!(ctl.end(&SessionUpdate::default()).await.unwrap().is_none());
        assert_eq!(mock.count(|c| matches!(c, BackendCall::EndSession(_))), 1);
    }

    #[tokio::test]
    async fn finished_session_rejects_creates_and_ignores_writes() {
        let (_, ctl) = controller().await;
        ctl.create_step(&StepUpdate::default()).await.unwrap();
        let ev = ctl.create_event(&EventUpdate::default()).await.unwrap();
        ctl.end(&SessionUpdate::default()).await.unwrap();

        assert!(ctl.create_step(&StepUpdate::default()).await.is_err());
        assert!(ctl.create_event(&EventUpdate::default()).await.is_err());
        assert!(ctl.update(&SessionUpdate::default()).await.unwrap().is_none());
        assert!(ctl.end_event_by_id(&ev.id, &EventUpdate::default()).await.unwrap().is_none());
        assert!(!ctl.has_active_step().await);
    }

    #[tokio::test]
    async fn update_step_at_history() {
        let (_, ctl) = controller().await;
        ctl.create_step(&StepUpdate::goal("one")).await.unwrap();
        ctl.end_step(&StepUpdate::default()).await.unwrap();
        ctl.create_step(&StepUpdate::goal("two")).await.unwrap();

        let step = ctl
            .update_step_at(-2, &StepUpdate::default().with_eval(0.5, "meh"))
            .await
            .unwrap();
        assert_eq!(step.goal.as_deref(), Some("one"));
        assert!(ctl.update_step_at(0, &StepUpdate::default()).await.is_err());
        assert!(ctl.update_step_at(-3, &StepUpdate::default()).await.is_err());
    }

    #[tokio::test]
    async fn end_by_id_with_interleaved_events() {
        let (_, ctl) = controller().await;
        ctl.create_step(&StepUpdate::default()).await.unwrap();
        let first = ctl.create_event(&EventUpdate::described("r1")).await.unwrap();
        let second = ctl.create_event(&EventUpdate::described("r2")).await.unwrap();

        ctl.end_event_by_id(&first.id, &EventUpdate::succeeded(None, None, Some("m1".into())))
            .await
            .unwrap();
        let events = ctl.event_history().await;
        assert!(events[0].is_finished);
        assert_eq!(events[0].model.as_deref(), Some("m1"));
        assert!(!events[1].is_finished);
        assert_eq!(events[1].id, second.id);
    }

    #[tokio::test]
    async fn backend_failure_keeps_memory_state() {
        let (mock, ctl) = controller().await;
        mock.set_failure(Some(BackendError::NetworkError("down".into())));
        let err = ctl.create_step(&StepUpdate::goal("x")).await.unwrap_err();
        assert!(matches!(err, LucidError::Backend(_)));
        assert!(ctl.has_active_step().await);
    }

    #[tokio::test]
    async fn appended_event_survives_failed_push() {
        let (mock, ctl) = controller().await;
        ctl.create_step(&StepUpdate::default()).await.unwrap();
        mock.set_failure(Some(BackendError::NetworkError("down".into())));

        let (event, pushed) = ctl.append_event(&EventUpdate::described("r1")).await.unwrap();
        assert!(matches!(pushed, Err(BackendError::NetworkError(_))));
        mock.set_failure(None);

        let ended = ctl
            .end_event_by_id(&event.id, &EventUpdate::succeeded(None, None, None))
            .await
            .unwrap()
            .unwrap();
        assert!(ended.is_finished);
        assert!(mock.event(&event.id).unwrap().is_finished);
    }

    #[tokio::test]
    async fn finished_flag_set_by_end() {
        let (_, ctl) = controller().await;
        assert!(!ctl.is_finished());
        ctl.end(&SessionUpdate::default()).await.unwrap();
        assert!(ctl.is_finished());
    }
}
