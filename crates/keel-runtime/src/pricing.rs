//! Cost attribution — pricing tiers and per-exchange cost computation.
//!
//! Tiers are USD per million tokens with cache multipliers. Unknown models
//! get no tier and no implicit fallback; the exchange then reports no cost.

use keel_core::messages::TokenUsage;

/// Pricing tier per million tokens.
struct PricingTier {
    input_per_million: f64,
    output_per_million: f64,
    cache_write_multiplier: f64,
    cache_read_multiplier: f64,
}

// ─── Anthropic ───────────────────────────────────────────────────────────────

const OPUS_4_5: PricingTier = PricingTier {
    input_per_million: 5.0,
    output_per_million: 25.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const OPUS_4: PricingTier = PricingTier {
    input_per_million: 15.0,
    output_per_million: 75.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const SONNET_4_5: PricingTier = PricingTier {
    input_per_million: 3.0,
    output_per_million: 15.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const SONNET_4: PricingTier = PricingTier {
    input_per_million: 3.0,
    output_per_million: 15.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const HAIKU_4_5: PricingTier = PricingTier {
    input_per_million: 1.0,
    output_per_million: 5.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const HAIKU_3: PricingTier = PricingTier {
    input_per_million: 0.25,
    output_per_million: 1.25,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

// ─── Google ──────────────────────────────────────────────────────────────────

const GEMINI_PRO: PricingTier = PricingTier {
    input_per_million: 1.25,
    output_per_million: 5.0,
    cache_write_multiplier: 1.0,
    cache_read_multiplier: 0.25,
};

const GEMINI_FLASH: PricingTier = PricingTier {
    input_per_million: 0.075,
    output_per_million: 0.3,
    cache_write_multiplier: 1.0,
    cache_read_multiplier: 0.25,
};

/// Look up the pricing tier for a model id.
///
/// Tries an exact id match first, then pattern-matches on model family
/// substrings, most specific first. Returns `None` for unknown models.
fn pricing_tier(model: &str) -> Option<&'static PricingTier> {
    // Exact match
    match model {
        "claude-opus-4-5-20251101" => return Some(&OPUS_4_5),
        "claude-opus-4-1-20250805" | "claude-opus-4-20250514" => return Some(&OPUS_4),
        "claude-sonnet-4-5-20250929" => return Some(&SONNET_4_5),
        "claude-sonnet-4-20250514" => return Some(&SONNET_4),
        "claude-haiku-4-5-20251001" => return Some(&HAIKU_4_5),
        "claude-3-haiku-20240307" => return Some(&HAIKU_3),
        "gemini-2.5-pro" => return Some(&GEMINI_PRO),
        "gemini-2.5-flash" => return Some(&GEMINI_FLASH),
        _ => {}
    }

    // Pattern matching on model family substrings
    let lower = model.to_lowercase();

    if lower.contains("opus-4-5") || lower.contains("opus-4.5") {
        return Some(&OPUS_4_5);
    }
    if lower.contains("opus") {
        return Some(&OPUS_4);
    }
    if lower.contains("sonnet-4-5") || lower.contains("sonnet-4.5") {
        return Some(&SONNET_4_5);
    }
    if lower.contains("sonnet") {
        return Some(&SONNET_4);
    }
    if lower.contains("haiku-4-5") || lower.contains("haiku-4.5") {
        return Some(&HAIKU_4_5);
    }
    if lower.contains("haiku") {
        return Some(&HAIKU_3);
    }
    if lower.contains("gemini") && lower.contains("pro") {
        return Some(&GEMINI_PRO);
    }
    if lower.contains("gemini") {
        return Some(&GEMINI_FLASH);
    }

    None
}

/// Compute the USD cost of one exchange's accumulated usage.
///
/// Returns `None` when the model has no pricing tier.
#[must_use]
pub fn compute_cost(model: &str, usage: &TokenUsage) -> Option<f64> {
    let pricing = pricing_tier(model)?;

    #[allow(clippy::cast_precision_loss)]
    let input_tokens = usage.input_tokens as f64;
    #[allow(clippy::cast_precision_loss)]
    let output_tokens = usage.output_tokens as f64;
    #[allow(clippy::cast_precision_loss)]
    let cache_read_tokens = usage.cache_read_tokens.unwrap_or(0) as f64;
    #[allow(clippy::cast_precision_loss)]
    let cache_creation_tokens = usage.cache_creation_tokens.unwrap_or(0) as f64;

    // Base input tokens exclude cache tokens billed separately.
    let base_input_tokens = (input_tokens - cache_read_tokens - cache_creation_tokens).max(0.0);
    let base_input_cost = (base_input_tokens / 1_000_000.0) * pricing.input_per_million;

    let cache_creation_cost = (cache_creation_tokens / 1_000_000.0)
        * pricing.input_per_million
        * pricing.cache_write_multiplier;

    let cache_read_cost = (cache_read_tokens / 1_000_000.0)
        * pricing.input_per_million
        * pricing.cache_read_multiplier;

    let output_cost = (output_tokens / 1_000_000.0) * pricing.output_per_million;

    Some(base_input_cost + cache_creation_cost + cache_read_cost + output_cost)
}
