use lucid_core::ids::{EventId, SessionId};
use lucid_core::records::{EventRecord, EventUpdate, StepRecord, StepUpdate};
use lucid_core::LucidError;

use crate::events::EventTracker;
use crate::history::resolve_offset;

/// A step and the events recorded under it.
#[derive(Debug)]
pub struct Step {
    pub record: StepRecord,
    pub events: EventTracker,
}

/// All steps of one session, oldest first. Only the last step can be active.
#[derive(Debug)]
pub struct StepTracker {
    session_id: SessionId,
    steps: Vec<Step>,
}

impl StepTracker {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            steps: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn active(&self) -> Option<&Step> {
        self.steps.last().filter(|s| !s.record.is_finished)
    }

    pub fn active_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut().filter(|s| !s.record.is_finished)
    }

    pub fn create(&mut self, fields: &StepUpdate) -> Result<StepRecord, LucidError> {
        if let Some(current) = self.active() {
            return Err(LucidError::invalid(format!(
                "cannot create step: step {} is still active",
                current.record.id
            )));
        }
        let record = StepRecord::new(self.session_id.clone(), fields);
        self.steps.push(Step {
            events: EventTracker::new(record.id.clone()),
            record: record.clone(),
        });
        Ok(record)
    }

    pub fn update_active(&mut self, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        let step = self
            .active_mut()
            .ok_or_else(|| LucidError::invalid("cannot update step: no active step"))?;
        step.record.apply(update);
        Ok(step.record.clone())
    }

    pub fn end_active(&mut self, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        let step = self
            .active_mut()
            .ok_or_else(|| LucidError::invalid("cannot end step: no active step"))?;
        step.record.apply(update);
        step.record.finish();
        step.events.seal();
        Ok(step.record.clone())
    }

    pub fn update_at(&mut self, index: isize, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        let pos = resolve_offset(index, self.steps.len())?;
        let step = &mut self.steps[pos];
        step.record.apply(update);
        Ok(step.record.clone())
    }

    pub fn history(&self) -> Vec<StepRecord> {
        self.steps.iter().map(|s| s.record.clone()).collect()
    }

    pub fn all_events(&self) -> Vec<EventRecord> {
        self.steps
            .iter()
            .flat_map(|s| s.events.events().iter().cloned())
            .collect()
    }

    fn owner_of_mut(&mut self, id: &EventId) -> Option<&mut EventTracker> {
        // Last step is the active one when there is one, so newest-first covers both.
        self.steps
            .iter_mut()
            .rev()
            .map(|s| &mut s.events)
            .find(|t| t.contains(id))
    }

    pub fn update_event_by_id(
        &mut self,
        id: &EventId,
        update: &EventUpdate,
    ) -> Option<Result<EventRecord, LucidError>> {
        self.owner_of_mut(id)?.update_by_id(id, update)
    }

    pub fn end_event_by_id(
        &mut self,
        id: &EventId,
        update: &EventUpdate,
    ) -> Option<Result<EventRecord, LucidError>> {
        self.owner_of_mut(id)?.end_by_id(id, update)
    }
}
