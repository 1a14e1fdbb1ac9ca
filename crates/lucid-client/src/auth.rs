use lucid_core::ids::AgentId;
use lucid_core::security::{env_vars, ApiKey};
use lucid_core::LucidError;

/// Credentials needed to open a session.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_key: ApiKey,
    pub agent_id: AgentId,
}

/// Resolve credentials. Explicit values win; otherwise the environment is
/// consulted. Empty strings count as absent.
pub fn resolve_credentials(
    api_key: Option<String>,
    agent_id: Option<String>,
) -> Result<Credentials, LucidError> {
    resolve_with(api_key, agent_id, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_with(
    api_key: Option<String>,
    agent_id: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, LucidError> {
    let pick = |explicit: Option<String>, var: &str| {
        explicit
            .filter(|v| !v.is_empty())
            .or_else(|| env(var).filter(|v| !v.is_empty()))
    };

    let api_key = pick(api_key, env_vars::API_KEY).ok_or_else(|| {
        LucidError::Config(format!(
            "no API key: pass one explicitly or set {}",
            env_vars::API_KEY
        ))
    })?;
    let agent_id = pick(agent_id, env_vars::AGENT_ID).ok_or_else(|| {
        LucidError::Config(format!(
            "no agent id: pass one explicitly or set {}",
            env_vars::AGENT_ID
        ))
    })?;

    Ok(Credentials {
        api_key: ApiKey::new(api_key),
        agent_id: AgentId::from_raw(agent_id),
    })
}

/// Base URL override from the environment, if set.
pub fn base_url_from_env() -> Option<String> {
    std::env::var(env_vars::BASE_URL).ok().filter(|v| !v.is_empty())
}
