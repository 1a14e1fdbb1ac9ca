pub mod backend;
pub mod errors;
pub mod ids;
pub mod provider;
pub mod records;
pub mod security;
pub mod tokens;

pub use backend::{Backend, MassSimRequest, PricingLookup};
pub use errors::{BackendError, LucidError};
pub use provider::ProviderKind;
