use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use lucid_core::ids::MassSimId;
use lucid_core::records::{EventRecord, SessionRecord, StepRecord};
use lucid_core::security::ApiKey;
use lucid_core::{Backend, BackendError, MassSimRequest};

pub const DEFAULT_BASE_URL: &str = "https://analytics.lucidic.ai/api";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend speaking the JSON-over-HTTP telemetry API.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl HttpBackend {
    pub fn new(api_key: ApiKey, base_url: Option<&str>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<String, BackendError> {
        let mut req = self
            .client
            .request(method, self.url(endpoint))
            .header("Authorization", self.api_key.authorization_header())
            .header("accept", "application/json");
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;
        if !status.is_success() {
            return Err(BackendError::from_status(status.as_u16(), text));
        }
        debug!(endpoint, status = status.as_u16(), "backend call ok");
        Ok(text)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let text = self.send(method, endpoint, body, query).await?;
        serde_json::from_str(&text).map_err(|e| BackendError::Decode(format!("{endpoint}: {e}")))
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn session_body(session: &SessionRecord) -> Value {
    json!({
        "session_id": session.id,
        "agent_id": session.agent_id,
        "session_name": session.name,
        "task": session.task,
        "rubrics": session.rubrics,
        "tags": session.tags,
        "mass_sim_id": session.mass_sim_id,
        "is_finished": session.is_finished,
        "is_successful": session.is_successful,
        "is_successful_reason": session.success_reason,
        "session_eval": session.eval_score,
        "session_eval_reason": session.eval_reason,
        "current_time": now(),
    })
}

fn step_body(step: &StepRecord) -> Value {
    json!({
        "step_id": step.id,
        "session_id": step.session_id,
        "state": step.state,
        "action": step.action,
        "goal": step.goal,
        "eval_score": step.eval_score,
        "eval_description": step.eval_description,
        "screenshot": step.screenshot,
        "is_finished": step.is_finished,
        "current_time": now(),
    })
}

fn event_body(event: &EventRecord) -> Value {
    json!({
        "event_id": event.id,
        "step_id": event.step_id,
        "description": event.description,
        "result": event.result,
        "cost_added": event.cost_added,
        "model": event.model,
        "screenshots": event.screenshots,
        "is_finished": event.is_finished,
        "is_successful": event.is_successful,
        "is_successful_reason": event.success_reason,
        "current_time": now(),
    })
}

#[derive(Deserialize)]
struct MassSimResponse {
    mass_sim_id: String,
}

#[derive(Deserialize)]
struct PromptResponse {
    prompt_content: String,
}

#[async_trait]
impl Backend for HttpBackend {
    #[instrument(skip(self))]
    async fn verify_credentials(&self) -> Result<(), BackendError> {
        self.send(Method::GET, "verifyapikey", None, &[]).await.map(|_| ())
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn create_session(&self, session: &SessionRecord) -> Result<(), BackendError> {
        self.send(Method::POST, "initsession", Some(&session_body(session)), &[])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn update_session(&self, session: &SessionRecord) -> Result<(), BackendError> {
        self.send(Method::PUT, "updatesession", Some(&session_body(session)), &[])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, step), fields(step_id = %step.id))]
    async fn create_step(&self, step: &StepRecord) -> Result<(), BackendError> {
        self.send(Method::POST, "initstep", Some(&step_body(step)), &[])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, step), fields(step_id = %step.id))]
    async fn update_step(&self, step: &StepRecord) -> Result<(), BackendError> {
        self.send(Method::PUT, "updatestep", Some(&step_body(step)), &[])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn create_event(&self, event: &EventRecord) -> Result<(), BackendError> {
        self.send(Method::POST, "initevent", Some(&event_body(event)), &[])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn update_event(&self, event: &EventRecord) -> Result<(), BackendError> {
        self.send(Method::PUT, "updateevent", Some(&event_body(event)), &[])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn create_mass_sim(&self, request: &MassSimRequest) -> Result<MassSimId, BackendError> {
        let body = json!({
            "mass_sim_name": request.name,
            "total_num_sessions": request.total_num_sessions,
            "task": request.task,
            "tags": request.tags,
        });
        let resp: MassSimResponse = self
            .send_json(Method::POST, "createmasssim", Some(&body), &[])
            .await?;
        Ok(MassSimId::from_raw(resp.mass_sim_id))
    }

    #[instrument(skip(self))]
    async fn fetch_prompt(&self, name: &str, label: &str) -> Result<String, BackendError> {
        let resp: PromptResponse = self
            .send_json(
                Method::GET,
                "getprompt",
                None,
                &[("prompt_name", name), ("label", label)],
            )
            .await?;
        Ok(resp.prompt_content)
    }
}
