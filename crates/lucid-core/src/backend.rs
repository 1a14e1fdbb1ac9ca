use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;
use crate::ids::MassSimId;
use crate::records::{EventRecord, SessionRecord, StepRecord};
use crate::tokens::TokenUsage;

/// Request to group several sessions under one mass simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MassSimRequest {
    pub name: String,
    pub total_num_sessions: u32,
    pub task: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The remote telemetry service. Every call is an RPC the caller awaits;
/// records carry client-generated ids so the backend never mints identity.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Cheap authenticated round-trip used at init to fail fast on a bad key.
    async fn verify_credentials(&self) -> Result<(), BackendError>;

    async fn create_session(&self, session: &SessionRecord) -> Result<(), BackendError>;
    async fn update_session(&self, session: &SessionRecord) -> Result<(), BackendError>;

    /// Final push for a finished session. Defaults to a plain update.
    async fn end_session(&self, session: &SessionRecord) -> Result<(), BackendError> {
        self.update_session(session).await
    }

    async fn create_step(&self, step: &StepRecord) -> Result<(), BackendError>;
    async fn update_step(&self, step: &StepRecord) -> Result<(), BackendError>;

    async fn create_event(&self, event: &EventRecord) -> Result<(), BackendError>;
    async fn update_event(&self, event: &EventRecord) -> Result<(), BackendError>;

    async fn create_mass_sim(&self, request: &MassSimRequest) -> Result<MassSimId, BackendError>;

    async fn fetch_prompt(&self, name: &str, label: &str) -> Result<String, BackendError>;
}

/// Turns a model name and its token usage into a monetary cost.
/// `None` means the model is not priced; the event is recorded without cost.
pub trait PricingLookup: Send + Sync {
    fn cost(&self, model: &str, usage: &TokenUsage) -> Option<f64>;
}
