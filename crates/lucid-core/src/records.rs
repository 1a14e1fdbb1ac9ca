use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, EventId, MassSimId, SessionId, StepId};

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Options accepted when a session is created.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    pub name: String,
    pub task: Option<String>,
    #[serde(default)]
    pub rubrics: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub mass_sim_id: Option<MassSimId>,
}

impl SessionOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_rubrics(mut self, rubrics: Vec<String>) -> Self {
        self.rubrics = rubrics;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_mass_sim(mut self, id: MassSimId) -> Self {
        self.mass_sim_id = Some(id);
        self
    }
}

/// One recorded agent run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub name: String,
    pub task: Option<String>,
    pub rubrics: Vec<String>,
    pub tags: Vec<String>,
    pub mass_sim_id: Option<MassSimId>,
    pub eval_score: Option<f64>,
    pub eval_reason: Option<String>,
    pub is_successful: Option<bool>,
    pub success_reason: Option<String>,
    pub is_finished: bool,
    pub created_at: String,
}

impl SessionRecord {
    pub fn new(agent_id: AgentId, options: SessionOptions) -> Self {
        Self {
            id: SessionId::new(),
            agent_id,
            name: options.name,
            task: options.task,
            rubrics: options.rubrics,
            tags: options.tags,
            mass_sim_id: options.mass_sim_id,
            eval_score: None,
            eval_reason: None,
            is_successful: None,
            success_reason: None,
            is_finished: false,
            created_at: now(),
        }
    }

    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(task) = &update.task {
            self.task = Some(task.clone());
        }
        if let Some(tags) = &update.tags {
            self.tags = tags.clone();
        }
        if let Some(score) = update.eval_score {
            self.eval_score = Some(score);
        }
        if let Some(reason) = &update.eval_reason {
            self.eval_reason = Some(reason.clone());
        }
        if let Some(ok) = update.is_successful {
            self.is_successful = Some(ok);
        }
        if let Some(reason) = &update.success_reason {
            self.success_reason = Some(reason.clone());
        }
    }
}

/// Partial session update; `None` leaves the field unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub task: Option<String>,
    pub tags: Option<Vec<String>>,
    pub eval_score: Option<f64>,
    pub eval_reason: Option<String>,
    pub is_successful: Option<bool>,
    pub success_reason: Option<String>,
}

impl SessionUpdate {
    /// The update pushed when a session ends.
    pub fn outcome(
        eval_score: Option<f64>,
        eval_reason: Option<String>,
        is_successful: Option<bool>,
        success_reason: Option<String>,
    ) -> Self {
        Self {
            eval_score,
            eval_reason,
            is_successful,
            success_reason,
            ..Default::default()
        }
    }
}

/// One unit of agent action within a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub session_id: SessionId,
    pub state: Option<String>,
    pub action: Option<String>,
    pub goal: Option<String>,
    pub eval_score: Option<f64>,
    pub eval_description: Option<String>,
    pub screenshot: Option<String>,
    pub is_finished: bool,
    pub created_at: String,
    pub ended_at: Option<String>,
}

impl StepRecord {
    pub fn new(session_id: SessionId, fields: &StepUpdate) -> Self {
        let mut step = Self {
            id: StepId::new(),
            session_id,
            state: None,
            action: None,
            goal: None,
            eval_score: None,
            eval_description: None,
            screenshot: None,
            is_finished: false,
            created_at: now(),
            ended_at: None,
        };
        step.apply(fields);
        step
    }

    pub fn apply(&mut self, update: &StepUpdate) {
        if let Some(state) = &update.state {
            self.state = Some(state.clone());
        }
        if let Some(action) = &update.action {
            self.action = Some(action.clone());
        }
        if let Some(goal) = &update.goal {
            self.goal = Some(goal.clone());
        }
        if let Some(score) = update.eval_score {
            self.eval_score = Some(score);
        }
        if let Some(desc) = &update.eval_description {
            self.eval_description = Some(desc.clone());
        }
        if let Some(shot) = &update.screenshot {
            self.screenshot = Some(shot.clone());
        }
    }

    pub fn finish(&mut self) {
        self.is_finished = true;
        self.ended_at = Some(now());
    }
}

/// Step fields used for create, update and end alike.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepUpdate {
    pub state: Option<String>,
    pub action: Option<String>,
    pub goal: Option<String>,
    pub eval_score: Option<f64>,
    pub eval_description: Option<String>,
    pub screenshot: Option<String>,
}

impl StepUpdate {
    pub fn goal(goal: impl Into<String>) -> Self {
        Self {
            goal: Some(goal.into()),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_eval(mut self, score: f64, description: impl Into<String>) -> Self {
        self.eval_score = Some(score);
        self.eval_description = Some(description.into());
        self
    }
}

/// One observable sub-action (usually one model call) within a step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub step_id: StepId,
    pub description: Option<String>,
    pub result: Option<String>,
    pub cost_added: Option<f64>,
    pub model: Option<String>,
    pub screenshots: Vec<String>,
    pub is_finished: bool,
    pub is_successful: Option<bool>,
    pub success_reason: Option<String>,
    pub created_at: String,
    pub ended_at: Option<String>,
}

impl EventRecord {
    pub fn new(step_id: StepId, fields: &EventUpdate) -> Self {
        let mut event = Self {
            id: EventId::new(),
            step_id,
            description: None,
            result: None,
            cost_added: None,
            model: None,
            screenshots: Vec::new(),
            is_finished: false,
            is_successful: None,
            success_reason: None,
            created_at: now(),
            ended_at: None,
        };
        event.apply(fields);
        event
    }

    pub fn apply(&mut self, update: &EventUpdate) {
        if let Some(desc) = &update.description {
            self.description = Some(desc.clone());
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(cost) = update.cost_added {
            self.cost_added = Some(cost);
        }
        if let Some(model) = &update.model {
            self.model = Some(model.clone());
        }
        if let Some(shots) = &update.screenshots {
            self.screenshots = shots.clone();
        }
        if let Some(ok) = update.is_successful {
            self.is_successful = Some(ok);
        }
        if let Some(reason) = &update.success_reason {
            self.success_reason = Some(reason.clone());
        }
    }

    pub fn finish(&mut self) {
        self.is_finished = true;
        self.ended_at = Some(now());
    }
}

/// Event fields used for create, update and end alike.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventUpdate {
    pub description: Option<String>,
    pub result: Option<String>,
    pub cost_added: Option<f64>,
    pub model: Option<String>,
    pub screenshots: Option<Vec<String>>,
    pub is_successful: Option<bool>,
    pub success_reason: Option<String>,
}

impl EventUpdate {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_screenshots(mut self, screenshots: Vec<String>) -> Self {
        self.screenshots = Some(screenshots);
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Terminal update for a call that completed.
    pub fn succeeded(result: Option<String>, cost_added: Option<f64>, model: Option<String>) -> Self {
        Self {
            result,
            cost_added,
            model,
            is_successful: Some(true),
            ..Default::default()
        }
    }

    /// Terminal update for a call that failed. Carries no cost or result.
    pub fn failed(reason: Option<String>) -> Self {
        Self {
            is_successful: Some(false),
            success_reason: reason,
            ..Default::default()
        }
    }
}
