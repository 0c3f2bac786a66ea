//! Endpoint configuration and runtime model resolution.
//!
//! The preflight runs once per top-level invocation: validate the endpoint
//! config, pull the provider's model catalog, and pin a concrete model id
//! for each of the two roles (primary agent at depth 0, sub agent below).
//! The resolved pair is reused by every descendant so one invocation tree
//! always sees a single model pair.
//!
//! Environment *reading* stays with the caller; every function here takes
//! the environment as a plain map.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{DriverError, Result};

pub const ENV_BASE_URL: &str = "RLM_MODEL_BASE_URL";
pub const ENV_API_KEY: &str = "RLM_MODEL_API_KEY";
pub const ENV_PRIMARY_AGENT: &str = "RLM_PRIMARY_AGENT";
pub const ENV_SUB_AGENT: &str = "RLM_SUB_AGENT";
pub const ENV_FALLBACK_PRIMARY: &str = "RLM_FALLBACK_PRIMARY";
pub const ENV_FALLBACK_SUB: &str = "RLM_FALLBACK_SUB";

const DEFAULT_PRIMARY: &str = "gpt-5";
const DEFAULT_SUB: &str = "gpt-5-codex-mini";

/// Ordered fallbacks scanned when a requested model is missing from the
/// catalog and no env override applies.
const PRIMARY_FALLBACKS: &[&str] = &["gpt-5", "gpt-5.1", "gpt-5.2", "gpt-5-codex"];
const SUB_FALLBACKS: &[&str] = &["gpt-5-codex-mini", "gpt-5.1-codex-mini", "gemini-2.5-flash"];

/// Validated endpoint configuration.
#[derive(Debug, Clone)]
pub struct ProxyClientConfig {
    /// Base URL, trailing slashes trimmed, always ending in `/v1`.
    pub base_url: String,
    /// Bearer key.
    pub api_key: String,
}

/// Model names as requested, before the catalog is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedModels {
    pub primary: String,
    pub sub: String,
}

/// The pinned model pair for one invocation tree.
#[derive(Debug, Clone)]
pub struct RuntimeModels {
    pub primary: String,
    pub sub: String,
    /// One entry per non-identity selection, naming role, requested, chosen.
    pub warnings: Vec<String>,
}

/// Validate the two required endpoint variables.
pub fn resolve_proxy_client_config(env: &HashMap<String, String>) -> Result<ProxyClientConfig> {
    let base_url = env
        .get(ENV_BASE_URL)
        .map(|s| s.trim_end_matches('/').to_string())
        .ok_or_else(|| DriverError::Config(format!("{ENV_BASE_URL} is not set")))?;

    if !base_url.ends_with("/v1") {
        return Err(DriverError::Config(format!(
            "{ENV_BASE_URL} must end in /v1, got '{base_url}'"
        )));
    }

    let api_key = env
        .get(ENV_API_KEY)
        .cloned()
        .ok_or_else(|| DriverError::Config(format!("{ENV_API_KEY} is not set")))?;

    Ok(ProxyClientConfig { base_url, api_key })
}

/// Pick the requested model names: env, then config, then defaults.
pub fn resolve_model_names(
    config_primary: Option<&str>,
    config_sub: Option<&str>,
    env: &HashMap<String, String>,
) -> RequestedModels {
    let primary = env
        .get(ENV_PRIMARY_AGENT)
        .map(String::as_str)
        .or(config_primary)
        .unwrap_or(DEFAULT_PRIMARY)
        .to_string();
    let sub = env
        .get(ENV_SUB_AGENT)
        .map(String::as_str)
        .or(config_sub)
        .unwrap_or(DEFAULT_SUB)
        .to_string();
    RequestedModels { primary, sub }
}

#[derive(Deserialize)]
struct ModelCatalog {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

/// GET the provider's model catalog.
pub async fn fetch_available_models(
    http: &reqwest::Client,
    config: &ProxyClientConfig,
) -> Result<Vec<String>> {
    let url = format!("{}/models", config.base_url);
    let response = http
        .get(&url)
        .bearer_auth(&config.api_key)
        .send()
        .await
        .map_err(|e| DriverError::Proxy(format!("GET {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DriverError::Proxy(format!(
            "GET {url} returned {status}"
        )));
    }

    let catalog: ModelCatalog = response
        .json()
        .await
        .map_err(|e| DriverError::Proxy(format!("invalid /models response: {e}")))?;

    let ids: Vec<String> = catalog
        .data
        .into_iter()
        .map(|entry| entry.id)
        .filter(|id| !id.is_empty())
        .collect();

    if ids.is_empty() {
        return Err(DriverError::Model(
            "provider returned an empty model catalog".to_string(),
        ));
    }
    Ok(ids)
}

fn resolve_role(
    role: &str,
    requested: &str,
    env_fallback: Option<&str>,
    builtin: &[&str],
    available: &[String],
) -> (String, Option<String>) {
    let has = |id: &str| available.iter().any(|a| a == id);

    if has(requested) {
        return (requested.to_string(), None);
    }

    let chosen = env_fallback
        .filter(|id| has(id))
        .map(str::to_string)
        .or_else(|| {
            builtin
                .iter()
                .find(|id| has(id))
                .map(|id| id.to_string())
        })
        .unwrap_or_else(|| available[0].clone());

    let warning = format!(
        "{role} model '{requested}' is not available; falling back to '{chosen}'"
    );
    (chosen, Some(warning))
}

/// Pin the runtime model pair against the catalog. Deterministic.
pub fn resolve_runtime_models(
    requested: &RequestedModels,
    available: &[String],
    env: &HashMap<String, String>,
) -> RuntimeModels {
    let mut warnings = Vec::new();

    let (primary, warn) = resolve_role(
        "primary",
        &requested.primary,
        env.get(ENV_FALLBACK_PRIMARY).map(String::as_str),
        PRIMARY_FALLBACKS,
        available,
    );
    warnings.extend(warn);

    let (sub, warn) = resolve_role(
        "sub",
        &requested.sub,
        env.get(ENV_FALLBACK_SUB).map(String::as_str),
        SUB_FALLBACKS,
        available,
    );
    warnings.extend(warn);

    RuntimeModels {
        primary,
        sub,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn catalog(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_client_config_requires_both_vars() {
        let err = resolve_proxy_client_config(&env(&[])).unwrap_err();
        assert!(err.to_string().contains(ENV_BASE_URL));

        let err =
            resolve_proxy_client_config(&env(&[(ENV_BASE_URL, "https://proxy.local/v1")]))
                .unwrap_err();
        assert!(err.to_string().contains(ENV_API_KEY));
    }

    #[test]
    fn test_client_config_trims_and_validates_v1() {
        let config = resolve_proxy_client_config(&env(&[
            (ENV_BASE_URL, "https://proxy.local/v1///"),
            (ENV_API_KEY, "sk-test"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://proxy.local/v1");

        let err = resolve_proxy_client_config(&env(&[
            (ENV_BASE_URL, "https://proxy.local/api"),
            (ENV_API_KEY, "sk-test"),
        ]))
        .unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn test_model_names_precedence() {
        // Env beats config beats defaults.
        let names = resolve_model_names(
            Some("cfg-primary"),
            Some("cfg-sub"),
            &env(&[(ENV_PRIMARY_AGENT, "env-primary")]),
        );
        assert_eq!(names.primary, "env-primary");
        assert_eq!(names.sub, "cfg-sub");

        let names = resolve_model_names(None, None, &env(&[]));
        assert_eq!(names.primary, "gpt-5");
        assert_eq!(names.sub, "gpt-5-codex-mini");
    }

    #[test]
    fn test_identity_resolution_has_no_warning() {
        let requested = RequestedModels {
            primary: "gpt-5".into(),
            sub: "gpt-5-codex-mini".into(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["gpt-5", "gpt-5-codex-mini"]),
            &env(&[]),
        );
        assert_eq!(resolved.primary, "gpt-5");
        assert_eq!(resolved.sub, "gpt-5-codex-mini");
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_builtin_fallback_with_single_warning() {
        let requested = RequestedModels {
            primary: "gpt-6".into(),
            sub: "gpt-5-codex-mini".into(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["gpt-5", "gpt-5-codex-mini"]),
            &env(&[]),
        );
        assert_eq!(resolved.primary, "gpt-5");
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].contains("gpt-6"));
        assert!(resolved.warnings[0].contains("gpt-5"));
        assert!(resolved.warnings[0].contains("primary"));
    }

    #[test]
    fn test_env_fallback_beats_builtin() {
        let requested = RequestedModels {
            primary: "gpt-6".into(),
            sub: "gpt-6-mini".into(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["gpt-5", "house-model", "gemini-2.5-flash"]),
            &env(&[(ENV_FALLBACK_PRIMARY, "house-model")]),
        );
        assert_eq!(resolved.primary, "house-model");
        // Sub had no env fallback: builtin list supplies gemini-2.5-flash.
        assert_eq!(resolved.sub, "gemini-2.5-flash");
        assert_eq!(resolved.warnings.len(), 2);
    }

    #[test]
    fn test_unavailable_env_fallback_is_skipped() {
        let requested = RequestedModels {
            primary: "gpt-6".into(),
            sub: "gpt-5-codex-mini".into(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["gpt-5.1", "gpt-5-codex-mini"]),
            &env(&[(ENV_FALLBACK_PRIMARY, "not-in-catalog")]),
        );
        assert_eq!(resolved.primary, "gpt-5.1");
    }

    #[test]
    fn test_first_available_as_last_resort() {
        let requested = RequestedModels {
            primary: "gpt-6".into(),
            sub: "gpt-6-mini".into(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["house-a", "house-b"]),
            &env(&[]),
        );
        assert_eq!(resolved.primary, "house-a");
        assert_eq!(resolved.sub, "house-a");
        assert_eq!(resolved.warnings.len(), 2);
    }
}
