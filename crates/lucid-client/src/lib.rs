pub mod auth;
pub mod http;
pub mod mock;

pub use auth::{resolve_credentials, Credentials};
pub use http::{HttpBackend, DEFAULT_BASE_URL};
pub use mock::{BackendCall, MockBackend};
