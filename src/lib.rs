//! Records AI-agent runs as sessions, steps and events and ships them to
//! the Lucidic backend.
//!
//! ```no_run
//! use lucid::{Lucid, LucidConfig, SessionOptions, SessionUpdate, StepUpdate};
//!
//! # async fn demo() -> Result<(), lucid::LucidError> {
//! let lucid = Lucid::init(LucidConfig::from_env()?, SessionOptions::named("checkout flow")).await?;
//! lucid.create_step(&StepUpdate::goal("find the cart")).await?;
//! lucid.end_step(&StepUpdate::default().with_action("clicked cart")).await?;
//! lucid.end_session(&SessionUpdate::outcome(None, None, Some(true), None)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod facade;
pub mod shutdown;

pub use config::LucidConfig;
pub use facade::{InstalledAdapter, Lucid, WeakLucid};
pub use shutdown::{install_signal_handler, run_session, run_session_until, shutdown_signal, SignalGuard};

pub use lucid_core::ids::{AgentId, EventId, MassSimId, RunId, SessionId, StepId};
pub use lucid_core::records::{
    EventRecord, EventUpdate, SessionOptions, SessionRecord, SessionUpdate, StepRecord, StepUpdate,
};
pub use lucid_core::{Backend, BackendError, LucidError, ProviderKind};
pub use lucid_llm::{CallbackHandler, CallbackHost, DirectCallAdapter, LucidCallbackHandler, ProviderAdapter};
pub use lucid_prompt::CacheTtl;
pub use lucid_store::SessionController;
pub use lucid_telemetry::TelemetryConfig;
