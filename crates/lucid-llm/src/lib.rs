pub mod attach;
pub mod callback;
pub mod correlation;
pub mod direct;
pub mod lifecycle;
pub mod models;
pub mod payload;

use async_trait::async_trait;
use lucid_core::ProviderKind;

pub use attach::{attach_to_host, CallbackHost, HostChild};
pub use callback::{CallbackHandler, LucidCallbackHandler};
pub use correlation::{CorrelationTable, RunNamespace, RunState};
pub use direct::DirectCallAdapter;
pub use lifecycle::{RunEnd, RunTracker};
pub use models::StaticPricing;

/// Common surface of the installed provider integrations.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn is_enabled(&self) -> bool;

    /// Enable or disable recording without uninstalling the adapter.
    fn set_enabled(&self, enabled: bool);

    /// Runs started but not yet ended.
    async fn in_flight(&self) -> usize;
}
