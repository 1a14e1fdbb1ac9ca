use lucid_core::tokens::TokenUsage;
use lucid_core::PricingLookup;

/// Per-model pricing in USD per million tokens.
#[derive(Clone, Debug)]
pub struct ModelPricing {
    /// Matched against the start of the model name.
    pub prefix: &'static str,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    pub cache_read_cost_per_mtok: f64,
    pub cache_write_cost_per_mtok: f64,
}

impl ModelPricing {
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let input = usage.input_tokens as f64 / 1_000_000.0 * self.input_cost_per_mtok;
        let output = usage.output_tokens as f64 / 1_000_000.0 * self.output_cost_per_mtok;
        let cache_read = usage.cache_read_tokens as f64 / 1_000_000.0 * self.cache_read_cost_per_mtok;
        let cache_write =
            usage.cache_creation_tokens as f64 / 1_000_000.0 * self.cache_write_cost_per_mtok;
        input + output + cache_read + cache_write
    }
}

const fn price(prefix: &'static str, input: f64, output: f64, cache_read: f64, cache_write: f64) -> ModelPricing {
    ModelPricing {
        prefix,
        input_cost_per_mtok: input,
        output_cost_per_mtok: output,
        cache_read_cost_per_mtok: cache_read,
        cache_write_cost_per_mtok: cache_write,
    }
}

pub static PRICING: &[ModelPricing] = &[
    // OpenAI
    price("gpt-4o-mini", 0.15, 0.60, 0.075, 0.0),
    price("gpt-4o", 2.50, 10.0, 1.25, 0.0),
    price("gpt-4.1-nano", 0.10, 0.40, 0.025, 0.0),
    price("gpt-4.1-mini", 0.40, 1.60, 0.10, 0.0),
    price("gpt-4.1", 2.0, 8.0, 0.50, 0.0),
    price("gpt-4-turbo", 10.0, 30.0, 0.0, 0.0),
    price("gpt-4", 30.0, 60.0, 0.0, 0.0),
    price("gpt-3.5-turbo", 0.50, 1.50, 0.0, 0.0),
    price("o1-mini", 1.10, 4.40, 0.55, 0.0),
    price("o1", 15.0, 60.0, 7.50, 0.0),
    price("o3-mini", 1.10, 4.40, 0.55, 0.0),
    // Anthropic
    price("claude-opus-4", 15.0, 75.0, 1.50, 18.75),
    price("claude-sonnet-4", 3.0, 15.0, 0.30, 3.75),
    price("claude-haiku-4", 1.0, 5.0, 0.10, 1.25),
    price("claude-3-7-sonnet", 3.0, 15.0, 0.30, 3.75),
    price("claude-3-5-sonnet", 3.0, 15.0, 0.30, 3.75),
    price("claude-3-5-haiku", 0.80, 4.0, 0.08, 1.0),
    price("claude-3-opus", 15.0, 75.0, 1.50, 18.75),
    price("claude-3-haiku", 0.25, 1.25, 0.03, 0.30),
];

/// Longest table prefix matching `model`, case-insensitively.
/// A leading `provider/` segment is ignored.
pub fn find_pricing(model: &str) -> Option<&'static ModelPricing> {
    let lowered = model.to_ascii_lowercase();
    let name = lowered.rsplit('/').next().unwrap_or(&lowered);
    PRICING
        .iter()
        .filter(|p| name.starts_with(p.prefix))
        .max_by_key(|p| p.prefix.len())
}

/// The built-in pricing table as a `PricingLookup`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticPricing;

impl PricingLookup for StaticPricing {
    fn cost(&self, model: &str, usage: &TokenUsage) -> Option<f64> {
        find_pricing(model).map(|p| p.calculate_cost(usage))
    }
}
