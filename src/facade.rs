use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use lucid_client::{resolve_credentials, HttpBackend};
use lucid_core::ids::{AgentId, MassSimId};
use lucid_core::records::{
    EventRecord, EventUpdate, SessionOptions, SessionRecord, SessionUpdate, StepRecord, StepUpdate,
};
use lucid_core::{Backend, LucidError, MassSimRequest, PricingLookup, ProviderKind};
use lucid_llm::{
    attach_to_host, CallbackHost, DirectCallAdapter, LucidCallbackHandler, ProviderAdapter,
    RunTracker, StaticPricing,
};
use lucid_prompt::{CacheTtl, PromptCache, DEFAULT_LABEL};
use lucid_store::{SessionController, SessionSource};
use lucid_telemetry::{init_telemetry, TelemetryGuard};

use crate::config::LucidConfig;
use crate::shutdown::{install_signal_handler, SignalGuard};

const ACTIVE_SESSIONS: &str = "lucid.sessions.active";

/// The slot adapters read to find where events go. A session ended through
/// its controller rather than the facade counts as absent.
#[derive(Default)]
struct ActiveSession(Mutex<Option<Arc<SessionController>>>);

impl SessionSource for ActiveSession {
    fn active_session(&self) -> Option<Arc<SessionController>> {
        self.0.lock().clone().filter(|s| !s.is_finished())
    }
}

/// The adapter currently installed for the configured provider.
#[derive(Clone)]
pub enum InstalledAdapter {
    Callback(Arc<LucidCallbackHandler>),
    Direct(Arc<DirectCallAdapter>),
}

impl InstalledAdapter {
    pub fn as_adapter(&self) -> Arc<dyn ProviderAdapter> {
        match self {
            Self::Callback(h) => h.clone(),
            Self::Direct(d) => d.clone(),
        }
    }
}

struct Inner {
    agent_id: AgentId,
    backend: Arc<dyn Backend>,
    active: Arc<ActiveSession>,
    /// Serializes session create/end so at most one session is live.
    lifecycle: tokio::sync::Mutex<()>,
    prompts: PromptCache,
    prompt_ttl: CacheTtl,
    pricing: Arc<dyn PricingLookup>,
    telemetry: TelemetryGuard,
    adapter: Mutex<Option<InstalledAdapter>>,
    signals: Mutex<Option<SignalGuard>>,
    finalized: AtomicBool,
}

/// Handle to the instrumentation client. Clones share one state; at most
/// one session is active per handle.
#[derive(Clone)]
pub struct Lucid {
    inner: Arc<Inner>,
}

/// Non-owning reference used by background tasks.
#[derive(Clone)]
pub struct WeakLucid(Weak<Inner>);

impl WeakLucid {
    pub fn upgrade(&self) -> Option<Lucid> {
        self.0.upgrade().map(|inner| Lucid { inner })
    }
}

impl Lucid {
    /// Resolve credentials, verify them with the hosted backend and install
    /// the configured provider adapter.
    pub async fn connect(config: LucidConfig) -> Result<Self, LucidError> {
        let credentials = resolve_credentials(config.api_key.clone(), config.agent_id.clone())?;
        let base_url = config
            .base_url
            .clone()
            .or_else(lucid_client::auth::base_url_from_env);
        let backend = HttpBackend::new(credentials.api_key, base_url.as_deref())?;
        Self::connect_with_backend(Arc::new(backend), credentials.agent_id, config).await
    }

    /// Same as [`Lucid::connect`] against an arbitrary backend.
    #[instrument(skip_all, fields(agent_id = %agent_id))]
    pub async fn connect_with_backend(
        backend: Arc<dyn Backend>,
        agent_id: AgentId,
        config: LucidConfig,
    ) -> Result<Self, LucidError> {
        let telemetry = init_telemetry(config.telemetry.clone());
        backend
            .verify_credentials()
            .await
            .map_err(LucidError::from_init)?;

        let lucid = Self {
            inner: Arc::new(Inner {
                agent_id,
                prompts: PromptCache::new(backend.clone()),
                backend,
                active: Arc::new(ActiveSession::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                prompt_ttl: config.prompt_ttl,
                pricing: Arc::new(StaticPricing),
                telemetry,
                adapter: Mutex::new(None),
                signals: Mutex::new(None),
                finalized: AtomicBool::new(false),
            }),
        };
        lucid.set_provider(config.provider);
        if config.handle_signals {
            *lucid.inner.signals.lock() = Some(install_signal_handler(&lucid));
        }
        info!(provider = %config.provider, "client connected");
        Ok(lucid)
    }

    /// Connect and open a session in one call.
    pub async fn init(config: LucidConfig, options: SessionOptions) -> Result<Self, LucidError> {
        let lucid = Self::connect(config).await?;
        lucid.create_session(options).await?;
        Ok(lucid)
    }

    pub fn downgrade(&self) -> WeakLucid {
        WeakLucid(Arc::downgrade(&self.inner))
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.inner.agent_id
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.inner.telemetry
    }

    // ---- sessions ----

    /// The active session, or `NotInitialized`.
    pub fn session(&self) -> Result<Arc<SessionController>, LucidError> {
        self.inner
            .active
            .active_session()
            .ok_or(LucidError::NotInitialized)
    }

    pub fn has_session(&self) -> bool {
        self.inner.active.active_session().is_some()
    }

    #[instrument(skip(self, options), fields(session_name = %options.name))]
    pub async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<SessionController>, LucidError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if let Some(existing) = self.inner.active.active_session() {
            return Err(LucidError::invalid(format!(
                "session {} is already active; end it first",
                existing.id()
            )));
        }
        if let Some(stale) = self.inner.active.0.lock().take() {
            debug!(session_id = %stale.id(), "dropping session ended outside the facade");
        }
        let session = Arc::new(
            SessionController::create(
                self.inner.backend.clone(),
                self.inner.agent_id.clone(),
                options,
            )
            .await?,
        );
        *self.inner.active.0.lock() = Some(session.clone());
        self.set_active_gauge(1.0);
        Ok(session)
    }

    /// Partial update of the active session. No session is a warning.
    pub async fn update_session(
        &self,
        update: &SessionUpdate,
    ) -> Result<Option<SessionRecord>, LucidError> {
        let Some(session) = self.inner.active.active_session() else {
            warn!("no active session; update ignored");
            return Ok(None);
        };
        session.update(update).await
    }

    /// End the active session and detach it. With no session this is a
    /// warning and returns `Ok(None)`.
    pub async fn end_session(
        &self,
        outcome: &SessionUpdate,
    ) -> Result<Option<SessionRecord>, LucidError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let taken = self.inner.active.0.lock().take();
        let Some(session) = taken else {
            warn!("no active session; end ignored");
            return Ok(None);
        };
        self.set_active_gauge(0.0);
        session.end(outcome).await
    }

    // ---- steps and events on the active session ----

    pub async fn create_step(&self, init: &StepUpdate) -> Result<StepRecord, LucidError> {
        self.session()?.create_step(init).await
    }

    pub async fn update_step(&self, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        self.session()?.update_step(update).await
    }

    pub async fn end_step(&self, update: &StepUpdate) -> Result<StepRecord, LucidError> {
        self.session()?.end_step(update).await
    }

    pub async fn update_step_at(
        &self,
        index: isize,
        update: &StepUpdate,
    ) -> Result<StepRecord, LucidError> {
        self.session()?.update_step_at(index, update).await
    }

    pub async fn create_event(&self, init: &EventUpdate) -> Result<EventRecord, LucidError> {
        self.session()?.create_event(init).await
    }

    pub async fn update_event(&self, update: &EventUpdate) -> Result<Option<EventRecord>, LucidError> {
        match self.inner.active.active_session() {
            Some(session) => session.update_event(update).await,
            None => {
                warn!("no active session; event update ignored");
                Ok(None)
            }
        }
    }

    pub async fn end_event(&self, update: &EventUpdate) -> Result<Option<EventRecord>, LucidError> {
        match self.inner.active.active_session() {
            Some(session) => session.end_event(update).await,
            None => {
                warn!("no active session; event end ignored");
                Ok(None)
            }
        }
    }

    pub async fn update_event_at(
        &self,
        index: isize,
        update: &EventUpdate,
    ) -> Result<EventRecord, LucidError> {
        self.session()?.update_event_at(index, update).await
    }

    // ---- mass simulations ----

    /// Register a group of sessions; pass the id to each via
    /// `SessionOptions::with_mass_sim`.
    #[instrument(skip(self, task, tags))]
    pub async fn create_mass_sim(
        &self,
        name: &str,
        total_num_sessions: u32,
        task: Option<String>,
        tags: Vec<String>,
    ) -> Result<MassSimId, LucidError> {
        let request = MassSimRequest {
            name: name.to_string(),
            total_num_sessions,
            task,
            tags,
        };
        let id = self.inner.backend.create_mass_sim(&request).await?;
        info!(mass_sim_id = %id, "mass simulation created");
        Ok(id)
    }

    // ---- prompts ----

    /// Fetch a prompt (cached per `ttl`) and substitute `variables`.
    /// `None` picks the configured TTL and the `production` label.
    pub async fn get_prompt(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
        ttl: Option<CacheTtl>,
        label: Option<&str>,
    ) -> Result<String, LucidError> {
        let template = self.get_raw_prompt(name, ttl, label).await?;
        lucid_prompt::resolve(&template, variables)
    }

    /// Prompt text without substitution.
    pub async fn get_raw_prompt(
        &self,
        name: &str,
        ttl: Option<CacheTtl>,
        label: Option<&str>,
    ) -> Result<String, LucidError> {
        self.inner
            .prompts
            .get(
                name,
                label.unwrap_or(DEFAULT_LABEL),
                ttl.unwrap_or(self.inner.prompt_ttl),
            )
            .await
    }

    pub fn invalidate_prompt(&self, name: &str, label: Option<&str>) {
        self.inner
            .prompts
            .invalidate(name, label.unwrap_or(DEFAULT_LABEL));
    }

    // ---- provider adapters ----

    /// Replace the installed adapter. The previous one is disabled so that
    /// callers still holding it stop recording.
    pub fn set_provider(&self, kind: ProviderKind) -> Option<InstalledAdapter> {
        let mut slot = self.inner.adapter.lock();
        if let Some(previous) = slot.take() {
            previous.as_adapter().set_enabled(false);
            debug!(provider = %previous.as_adapter().kind(), "previous adapter disabled");
        }

        let tracker = RunTracker::new(
            kind,
            self.inner.active.clone(),
            self.inner.pricing.clone(),
            self.inner.telemetry.metrics_handle(),
        );
        let installed = match kind {
            ProviderKind::None => None,
            ProviderKind::LangChain => Some(InstalledAdapter::Callback(Arc::new(
                LucidCallbackHandler::new(tracker),
            ))),
            ProviderKind::OpenAi | ProviderKind::Anthropic => {
                Some(InstalledAdapter::Direct(Arc::new(DirectCallAdapter::new(tracker))))
            }
        };
        *slot = installed.clone();
        info!(provider = %kind, "provider set");
        installed
    }

    pub fn adapter(&self) -> Option<Arc<dyn ProviderAdapter>> {
        self.inner.adapter.lock().as_ref().map(InstalledAdapter::as_adapter)
    }

    pub fn callback_handler(&self) -> Option<Arc<LucidCallbackHandler>> {
        match self.inner.adapter.lock().as_ref() {
            Some(InstalledAdapter::Callback(h)) => Some(h.clone()),
            _ => None,
        }
    }

    pub fn direct_adapter(&self) -> Option<Arc<DirectCallAdapter>> {
        match self.inner.adapter.lock().as_ref() {
            Some(InstalledAdapter::Direct(d)) => Some(d.clone()),
            _ => None,
        }
    }

    /// Register the callback handler with a host framework object.
    /// Requires the callback provider to be installed.
    pub fn attach(&self, host: &mut dyn CallbackHost) -> Result<usize, LucidError> {
        let handler = self
            .callback_handler()
            .ok_or_else(|| LucidError::invalid("no callback provider installed"))?;
        Ok(attach_to_host(host, handler))
    }

    // ---- shutdown ----

    /// End the active session, once per handle. Later calls return `None`.
    pub async fn finalize(&self) -> Option<SessionRecord> {
        if self.inner.finalized.swap(true, Ordering::AcqRel) {
            debug!("already finalized");
            return None;
        }
        if let Some(guard) = self.inner.signals.lock().as_ref() {
            guard.disarm();
        }
        match self.end_session(&SessionUpdate::default()).await {
            Ok(session) => {
                info!(ended = session.is_some(), "client finalized");
                session
            }
            Err(e) => {
                warn!(error = %e, "could not end session during finalize");
                None
            }
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    fn set_active_gauge(&self, value: f64) {
        if let Some(metrics) = self.inner.telemetry.metrics() {
            metrics.gauge_set(ACTIVE_SESSIONS, &[], value);
        }
    }
}

impl SessionSource for Lucid {
    fn active_session(&self) -> Option<Arc<SessionController>> {
        self.inner.active.active_session()
    }
}
