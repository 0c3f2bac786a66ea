//! Canonical token-usage records and provider-shape normalization.
//!
//! Providers report usage in more than one shape: flat OpenAI-style fields,
//! flat fields with nested `*_details` objects, or a Gemini-style
//! `usageMetadata` block. [`normalize_usage`] collapses all of them into one
//! canonical record so everything downstream (budgets, events) deals with a
//! single shape.

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Canonical per-call usage.
///
/// All counters are non-negative; `cost` is 0 when the provider does not
/// report one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

impl Usage {
    /// Field-wise sum.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.cost += other.cost;
    }

    /// The canonical JSON representation, as attached to log events.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Read a counter, coercing anything that is not a finite number > 0 to 0.
fn counter(value: Option<&serde_json::Value>) -> u64 {
    value
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n as u64)
        .unwrap_or(0)
}

fn money(value: Option<&serde_json::Value>) -> f64 {
    value
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite() && *n > 0.0)
        .unwrap_or(0.0)
}

/// Collapse a provider usage object into the canonical shape.
///
/// Accepts the flat OpenAI shape (with optional `prompt_tokens_details` /
/// `completion_tokens_details`), the canonical shape itself, or a nested
/// `usageMetadata` block. Fails only if `raw` is not a JSON object.
pub fn normalize_usage(raw: &serde_json::Value) -> Result<Usage> {
    let obj = raw
        .as_object()
        .ok_or_else(|| DriverError::Usage(format!("invalid usage payload: {raw}")))?;

    if let Some(meta) = obj.get("usageMetadata").and_then(|m| m.as_object()) {
        let prompt = counter(meta.get("promptTokenCount"));
        let completion = counter(meta.get("candidatesTokenCount"));
        let mut total = counter(meta.get("totalTokenCount"));
        if total == 0 {
            total = prompt + completion;
        }
        return Ok(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            cached_tokens: 0,
            reasoning_tokens: 0,
            cost: 0.0,
        });
    }

    let prompt = counter(obj.get("prompt_tokens"));
    let completion = counter(obj.get("completion_tokens"));
    let mut total = counter(obj.get("total_tokens"));
    if total == 0 {
        total = prompt + completion;
    }

    // The canonical shape keeps these at the top level; providers nest them.
    let cached = match obj.get("cached_tokens") {
        Some(v) => counter(Some(v)),
        None => counter(
            obj.get("prompt_tokens_details")
                .and_then(|d| d.get("cached_tokens")),
        ),
    };
    let reasoning = match obj.get("reasoning_tokens") {
        Some(v) => counter(Some(v)),
        None => counter(
            obj.get("completion_tokens_details")
                .and_then(|d| d.get("reasoning_tokens")),
        ),
    };

    Ok(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
        cached_tokens: cached,
        reasoning_tokens: reasoning,
        cost: money(obj.get("cost")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_openai_shape() {
        let usage = normalize_usage(&json!({
            "prompt_tokens": 120,
            "completion_tokens": 30,
            "total_tokens": 150,
            "prompt_tokens_details": {"cached_tokens": 100},
            "completion_tokens_details": {"reasoning_tokens": 5},
            "cost": 0.002
        }))
        .unwrap();

        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.cached_tokens, 100);
        assert_eq!(usage.reasoning_tokens, 5);
        assert!((usage.cost - 0.002).abs() < f64::EPSILON);
    }

    #[test]
    fn test_nested_usage_metadata_shape() {
        let usage = normalize_usage(&json!({
            "usageMetadata": {
                "promptTokenCount": 40,
                "candidatesTokenCount": 10,
                "totalTokenCount": 50
            }
        }))
        .unwrap();

        assert_eq!(usage.prompt_tokens, 40);
        assert_eq!(usage.completion_tokens, 10);
        assert_eq!(usage.total_tokens, 50);
        assert_eq!(usage.cost, 0.0);
    }

    #[test]
    fn test_total_falls_back_to_sum() {
        let usage = normalize_usage(&json!({
            "prompt_tokens": 7,
            "completion_tokens": 3
        }))
        .unwrap();
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn test_garbage_values_coerce_to_zero() {
        let usage = normalize_usage(&json!({
            "prompt_tokens": -5,
            "completion_tokens": "many",
            "total_tokens": null,
            "cost": -1.0
        }))
        .unwrap();

        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 0);
        assert_eq!(usage.cost, 0.0);
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(
            normalize_usage(&json!("tokens: lots")),
            Err(DriverError::Usage(_))
        ));
        assert!(matches!(
            normalize_usage(&json!(42)),
            Err(DriverError::Usage(_))
        ));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let first = normalize_usage(&json!({
            "prompt_tokens": 11,
            "completion_tokens": 4,
            "prompt_tokens_details": {"cached_tokens": 8},
            "completion_tokens_details": {"reasoning_tokens": 2},
            "cost": 0.5
        }))
        .unwrap();

        let second = normalize_usage(&first.to_value()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_add() {
        let mut a = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cached_tokens: 1,
            reasoning_tokens: 2,
            cost: 0.1,
        };
        a.add(&a.clone());
        assert_eq!(a.prompt_tokens, 20);
        assert_eq!(a.total_tokens, 30);
        assert!((a.cost - 0.2).abs() < f64::EPSILON);
    }
}
