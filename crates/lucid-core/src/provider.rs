use serde::{Deserialize, Serialize};

/// Which provider family gets instrumented when a session starts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    None,
    /// Direct-call adapter around OpenAI-style chat completions.
    OpenAi,
    /// Direct-call adapter around Anthropic-style messages.
    Anthropic,
    /// Callback adapter subscribed to a LangChain-style framework.
    LangChain,
}

impl ProviderKind {
    /// True for adapters that wrap an outbound call rather than listen to callbacks.
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::OpenAi | Self::Anthropic)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::OpenAi => f.write_str("openai"),
            Self::Anthropic => f.write_str("anthropic"),
            Self::LangChain => f.write_str("langchain"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "langchain" => Ok(Self::LangChain),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        for kind in [
            ProviderKind::None,
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::LangChain,
        ] {
            let parsed: ProviderKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!(" LangChain ".parse::<ProviderKind>().unwrap(), ProviderKind::LangChain);
        assert!("cohere".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn direct_adapters() {
        assert!(ProviderKind::OpenAi.is_direct());
        assert!(ProviderKind::Anthropic.is_direct());
        assert!(!ProviderKind::LangChain.is_direct());
        assert!(!ProviderKind::None.is_direct());
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&ProviderKind::OpenAi).unwrap();
        assert_eq!(json, r#""openai""#);
    }
}
