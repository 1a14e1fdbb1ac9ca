use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use lucid_core::LucidError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("placeholder regex is valid"));

/// Substitute `{{key}}` placeholders.
///
/// Every supplied key must appear in the template. Substitution is a single
/// pass over the template, so values are inserted verbatim even when they
/// contain placeholders themselves. Placeholders without a value are reported
/// with a warning, not an error.
pub fn resolve(template: &str, variables: &HashMap<String, String>) -> Result<String, LucidError> {
    let mut keys: Vec<&String> = variables.keys().collect();
    keys.sort();
    for key in keys {
        let placeholder = format!("{{{{{key}}}}}");
        if !template.contains(&placeholder) {
            return Err(LucidError::PromptResolution(format!(
                "variable '{key}' has no {placeholder} placeholder in the prompt"
            )));
        }
    }

    let text = PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            match variables.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned();

    let leftover = unresolved(template)
        .into_iter()
        .filter(|p| !variables.contains_key(&p[2..p.len() - 2]))
        .collect::<Vec<_>>();
    if !leftover.is_empty() {
        warn!(placeholders = ?leftover, "prompt still has unresolved placeholders");
    }
    Ok(text)
}

/// Placeholders present in `text`.
pub fn unresolved(text: &str) -> Vec<String> {
    PLACEHOLDER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}
