use tracing::warn;

use lucid_core::ids::{EventId, StepId};
use lucid_core::records::{EventRecord, EventUpdate};
use lucid_core::LucidError;

use crate::history::resolve_offset;

/// Ordered events of one step.
///
/// Once the owning step ends the tracker is sealed: no new events, though
/// events still open may be updated and ended.
#[derive(Debug)]
pub struct EventTracker {
    step_id: StepId,
    events: Vec<EventRecord>,
    sealed: bool,
}

impl EventTracker {
    pub fn new(step_id: StepId) -> Self {
        Self {
            step_id,
            events: Vec::new(),
            sealed: false,
        }
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn create(&mut self, fields: &EventUpdate) -> Result<EventRecord, LucidError> {
        if self.sealed {
            return Err(LucidError::invalid(format!(
                "cannot create event: step {} is finished",
                self.step_id
            )));
        }
        let event = EventRecord::new(self.step_id.clone(), fields);
        self.events.push(event.clone());
        Ok(event)
    }

    /// Update the most recent event. `Ok(None)` when there is none.
    pub fn update_latest(&mut self, update: &EventUpdate) -> Result<Option<EventRecord>, LucidError> {
        let Some(event) = self.events.last_mut() else {
            warn!(step_id = %self.step_id, "no event to update");
            return Ok(None);
        };
        apply_open(event, update).map(Some)
    }

    /// End the most recent event. `Ok(None)` when there is none.
    pub fn end_latest(&mut self, update: &EventUpdate) -> Result<Option<EventRecord>, LucidError> {
        let Some(event) = self.events.last_mut() else {
            warn!(step_id = %self.step_id, "no event to end");
            return Ok(None);
        };
        finish_open(event, update).map(Some)
    }

    pub fn update_at(&mut self, index: isize, update: &EventUpdate) -> Result<EventRecord, LucidError> {
        let pos = resolve_offset(index, self.events.len())?;
        apply_open(&mut self.events[pos], update)
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.events.iter().any(|e| &e.id == id)
    }

    pub fn update_by_id(
        &mut self,
        id: &EventId,
        update: &EventUpdate,
    ) -> Option<Result<EventRecord, LucidError>> {
        let event = self.events.iter_mut().find(|e| &e.id == id)?;
        Some(apply_open(event, update))
    }

    pub fn end_by_id(
        &mut self,
        id: &EventId,
        update: &EventUpdate,
    ) -> Option<Result<EventRecord, LucidError>> {
        let event = self.events.iter_mut().find(|e| &e.id == id)?;
        Some(finish_open(event, update))
    }
}

fn apply_open(event: &mut EventRecord, update: &EventUpdate) -> Result<EventRecord, LucidError> {
    if event.is_finished {
        return Err(LucidError::invalid(format!(
            "cannot update event {}: already finished",
            event.id
        )));
    }
    event.apply(update);
    Ok(event.clone())
}

fn finish_open(event: &mut EventRecord, update: &EventUpdate) -> Result<EventRecord, LucidError> {
    if event.is_finished {
        return Err(LucidError::invalid(format!(
            "cannot end event {}: already finished",
            event.id
        )));
    }
    event.apply(update);
    event.finish();
    Ok(event.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> EventTracker {
        EventTracker::new(StepId::new())
    }

    #[test]
    fn create_appends_exactly_one() {
        let mut t = tracker();
        let ev = t.create(&EventUpdate::described("call model")).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.events()[0].id, ev.id);
        assert!(!ev.is_finished);
    }

    #[test]
    fn create_on_sealed_fails() {
        let mut t = tracker();
        t.seal();
        let err = t.create(&EventUpdate::default()).unwrap_err();
        assert!(matches!(err, LucidError::InvalidOperation(_)));
        assert!(t.is_empty());
    }

    #[test]
    fn end_twice_is_rejected() {
        let mut t = tracker();
        t.create(&EventUpdate::described("a")).unwrap();
        let ended = t.end_latest(&EventUpdate::default().with_result("ok")).unwrap();
        assert!(ended.unwrap().is_finished);
        let err = t.end_latest(&EventUpdate::default()).unwrap_err();
        assert!(matches!(err, LucidError::InvalidOperation(_)));
    }

    #[test]
    fn update_on_finished_is_rejected() {
        let mut t = tracker();
        t.create(&EventUpdate::default()).unwrap();
        t.end_latest(&EventUpdate::default()).unwrap();
        assert!(t.update_latest(&EventUpdate::described("late")).is_err());
    }

    #[test]
    fn empty_history_update_and_end_are_noops() {
        let mut t = tracker();
        assert!(t.update_latest(&EventUpdate::described("x")).unwrap().is_none());
        assert!(t.end_latest(&EventUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn update_at_negative_offsets() {
        let mut t = tracker();
        t.create(&EventUpdate::described("first")).unwrap();
        t.create(&EventUpdate::described("second")).unwrap();

        let first = t.update_at(-2, &EventUpdate::default().with_result("r1")).unwrap();
        assert_eq!(first.description.as_deref(), Some("first"));
        assert_eq!(t.events()[0].result.as_deref(), Some("r1"));

        assert!(t.update_at(0, &EventUpdate::default()).is_err());
        assert!(t.update_at(-3, &EventUpdate::default()).is_err());
    }

    #[test]
    fn end_by_id_targets_exact_event() {
        let mut t = tracker();
        let a = t.create(&EventUpdate::described("a")).unwrap();
        t.create(&EventUpdate::described("b")).unwrap();

        let ended = t
            .end_by_id(&a.id, &EventUpdate::succeeded(Some("done".into()), None, None))
            .unwrap()
            .unwrap();
        assert_eq!(ended.id, a.id);
        assert!(t.events()[0].is_finished);
        assert!(!t.events()[1].is_finished);

        assert!(t.end_by_id(&EventId::new(), &EventUpdate::default()).is_none());
    }

    #[test]
    fn sealed_tracker_still_ends_open_events() {
        let mut t = tracker();
        let ev = t.create(&EventUpdate::described("slow call")).unwrap();
        t.seal();
        assert!(t.end_by_id(&ev.id, &EventUpdate::default()).unwrap().is_ok());
    }
}
