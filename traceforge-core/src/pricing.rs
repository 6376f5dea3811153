// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Model pricing calculator.
//!
//! Static model -> (input, output) rate table. Unlike the registry this was
//! grounded on, there is no LiteLLM upstream sync here: the table is
//! immutable once built, optionally overridden from a TOML file at startup
//! via `PRICING_TABLE_PATH`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-million-token rates for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_rate_per_million: f64,
    pub output_rate_per_million: f64,
}

impl ModelRate {
    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_rate_per_million
            + output_tokens as f64 * self.output_rate_per_million)
            / 1_000_000.0
    }
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("failed to read pricing table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse pricing table {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// TOML shape for `PRICING_TABLE_PATH` overrides: a flat map of canonical
/// model id -> rate, merged over the builtin table at construction time.
#[derive(Debug, Deserialize)]
struct PricingOverrideFile {
    #[serde(flatten)]
    models: HashMap<String, ModelRate>,
}

/// Immutable model -> rate table, built once at startup.
#[derive(Debug, Clone)]
pub struct PricingCalculator {
    rates: HashMap<String, ModelRate>,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PricingCalculator {
    pub fn with_builtins() -> Self {
        Self {
            rates: builtin_rates(),
        }
    }

    /// Load the builtin table, overlaid with entries from `path`
    /// (`PRICING_TABLE_PATH`). Unknown models outside the override file
    /// keep their builtin rate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let path_ref = path.as_ref();
        let contents = std::fs::read_to_string(path_ref).map_err(|e| PricingError::Io {
            path: path_ref.display().to_string(),
            source: e,
        })?;
        let overrides: PricingOverrideFile =
            toml::from_str(&contents).map_err(|e| PricingError::Parse {
                path: path_ref.display().to_string(),
                source: e,
            })?;

        let mut rates = builtin_rates();
        rates.extend(overrides.models);
        Ok(Self { rates })
    }

    /// Unknown model -> 0 and no error; restricted to LLM spans with a
    /// known model, which the caller (the event normaliser) enforces by
    /// only invoking this when `model` is `Some`.
    pub fn calculate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.lookup(model) {
            Some(rate) => rate.calculate_cost(input_tokens, output_tokens),
            None => 0.0,
        }
    }

    /// Whether a model resolves to a known rate (used to decide `costUsd`
    /// nil-ness for LLM spans).
    pub fn is_known(&self, model: &str) -> bool {
        self.lookup(model).is_some()
    }

    /// Case-insensitive lookup with suffix-stripping for versioned names,
    /// e.g. `gpt-4o-2024-08-06` falls back to `gpt-4o`.
    fn lookup(&self, model: &str) -> Option<ModelRate> {
        let lower = model.to_lowercase();
        if let Some(rate) = self.rates.get(&lower) {
            return Some(*rate);
        }

        let stripped = strip_version_suffix(&lower);
        if let Some(rate) = self.rates.get(stripped) {
            return Some(*rate);
        }

        // Provider-prefixed ids, e.g. "openai/gpt-4o" -> "gpt-4o".
        if let Some(last) = lower.rsplit('/').next() {
            if let Some(rate) = self.rates.get(last) {
                return Some(*rate);
            }
            let stripped = strip_version_suffix(last);
            if let Some(rate) = self.rates.get(stripped) {
                return Some(*rate);
            }
        }

        None
    }
}

/// Strips a trailing date/version suffix such as `-2024-08-06` or
/// `-20241022` from a lowercased model id, longest known prefix wins via
/// simple trailing-segment trimming.
fn strip_version_suffix(model: &str) -> &str {
    if let Some(idx) = model.rfind('-') {
        let suffix = &model[idx + 1..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return &model[..idx];
        }
    }
    model
}

fn builtin_rates() -> HashMap<String, ModelRate> {
    let mut map = HashMap::new();

    let mut insert = |id: &str, input: f64, output: f64| {
        map.insert(
            id.to_string(),
            ModelRate {
                input_rate_per_million: input,
                output_rate_per_million: output,
            },
        );
    };

    // OpenAI
    insert("gpt-4o", 2.5, 10.0);
    insert("gpt-4o-mini", 0.15, 0.6);
    insert("gpt-4-turbo", 10.0, 30.0);
    insert("gpt-4", 30.0, 60.0);
    insert("gpt-3.5-turbo", 0.5, 1.5);
    insert("o1", 15.0, 60.0);
    insert("o1-mini", 3.0, 12.0);

    // Anthropic
    insert("claude-3-5-sonnet", 3.0, 15.0);
    insert("claude-3-opus", 15.0, 75.0);
    insert("claude-3-haiku", 0.25, 1.25);
    insert("claude-3-5-haiku", 0.8, 4.0);

    // Google Gemini
    insert("gemini-1.5-pro", 3.5, 10.5);
    insert("gemini-1.5-flash", 0.075, 0.3);
    insert("gemini-2.0-flash", 0.1, 0.4);

    // DeepSeek
    insert("deepseek-chat", 0.14, 0.28);
    insert("deepseek-coder", 0.14, 0.28);

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_computes_cost() {
        let calc = PricingCalculator::with_builtins();
        let cost = calc.calculate_cost("gpt-4o", 1_000_000, 500_000);
        assert!((cost - 7.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_zero_cost_no_error() {
        let calc = PricingCalculator::with_builtins();
        assert_eq!(calc.calculate_cost("totally-unknown-model", 100, 100), 0.0);
        assert!(!calc.is_known("totally-unknown-model"));
    }

    #[test]
    fn versioned_suffix_falls_back_to_base_model() {
        let calc = PricingCalculator::with_builtins();
        assert!(calc.is_known("gpt-4o-2024-08-06"));
        assert!(calc.is_known("claude-3-5-sonnet-20241022"));
        let cost = calc.calculate_cost("GPT-4O-2024-08-06", 1_000_000, 0);
        assert!((cost - 2.5).abs() < 1e-9);
    }

    #[test]
    fn provider_prefixed_id_resolves() {
        let calc = PricingCalculator::with_builtins();
        assert!(calc.is_known("openai/gpt-4o-mini"));
    }
}
