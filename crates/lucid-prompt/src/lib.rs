pub mod cache;
pub mod template;

pub use cache::{CacheTtl, PromptCache, DEFAULT_LABEL, DEFAULT_TTL_SECS};
pub use template::resolve;
