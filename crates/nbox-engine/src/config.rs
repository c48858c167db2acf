use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nbox_contracts::models::{
    ModelSelector, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT_TO_IMAGE, CAPABILITY_VISION,
};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_HISTORY_PATH: &str = "nbox-history.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub imagen_model: String,
    pub history_path: PathBuf,
    pub features_locked: bool,
    pub request_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            imagen_model: DEFAULT_IMAGEN_MODEL.to_string(),
            history_path: PathBuf::from(DEFAULT_HISTORY_PATH),
            features_locked: false,
            request_timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let api_key = lookup("GEMINI_API_KEY")
            .or_else(|| lookup("GOOGLE_API_KEY"))
            .or_else(|| lookup("API_KEY"));
        let api_base = lookup("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base);

        let selector = ModelSelector::default();
        let text_model = resolve_model(
            &selector,
            lookup("NBOX_TEXT_MODEL"),
            CAPABILITY_VISION,
            defaults.text_model,
        );
        let image_model = resolve_model(
            &selector,
            lookup("NBOX_IMAGE_MODEL"),
            CAPABILITY_IMAGE,
            defaults.image_model,
        );
        if selector.registry.ensure(&image_model, CAPABILITY_EDIT).is_none() {
            tracing::warn!(model = %image_model, "image model does not advertise masked edit support");
        }
        let imagen_model = resolve_model(
            &selector,
            lookup("NBOX_IMAGEN_MODEL"),
            CAPABILITY_TEXT_TO_IMAGE,
            defaults.imagen_model,
        );

        let history_path = lookup("NBOX_HISTORY_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.history_path);
        let features_locked = match lookup("NBOX_FEATURES_LOCKED") {
            Some(raw) => parse_bool(&raw)
                .with_context(|| format!("NBOX_FEATURES_LOCKED has invalid value '{raw}'"))?,
            None => false,
        };
        let request_timeout = match lookup("NBOX_REQUEST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().with_context(|| {
                    format!("NBOX_REQUEST_TIMEOUT_SECS has invalid value '{raw}'")
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            api_key,
            api_base,
            text_model,
            image_model,
            imagen_model,
            history_path,
            features_locked,
            request_timeout,
        })
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Resolves an override through the registry. Unknown or incapable names fall back to the
/// registry's model for `capability`, and the reason is logged.
fn resolve_model(
    selector: &ModelSelector,
    requested: Option<String>,
    capability: &str,
    default: String,
) -> String {
    let Some(requested) = requested else {
        return default;
    };
    match selector.select(Some(&requested), capability) {
        Some(selection) => {
            if let Some(reason) = selection.fallback {
                tracing::warn!(requested = %requested, model = %selection.model.name, "{reason}; using registry model");
            }
            selection.model.name
        }
        None => {
            tracing::warn!(requested = %requested, capability, "no registered model for capability; using default");
            default
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<EngineConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() -> Result<()> {
        let config = config_from(&[])?;
        assert_eq!(config, EngineConfig::default());
        assert!(!config.has_credential());
        Ok(())
    }

    #[test]
    fn api_key_prefers_gemini_variable() -> Result<()> {
        let config = config_from(&[("GOOGLE_API_KEY", "google"), ("GEMINI_API_KEY", "gemini")])?;
        assert_eq!(config.api_key.as_deref(), Some("gemini"));
        let config = config_from(&[("API_KEY", "plain")])?;
        assert_eq!(config.api_key.as_deref(), Some("plain"));
        Ok(())
    }

    #[test]
    fn model_overrides_resolve_through_the_registry() -> Result<()> {
        let config = config_from(&[
            ("NBOX_TEXT_MODEL", "imagen-4.0-generate-001"),
            ("NBOX_IMAGE_MODEL", "gemini-3-pro-image-preview"),
            ("NBOX_IMAGEN_MODEL", "imagen-4.0-generate-001"),
        ])?;
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(config.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.imagen_model, "imagen-4.0-generate-001");
        Ok(())
    }

    #[test]
    fn parses_gate_timeout_and_base() -> Result<()> {
        let config = config_from(&[
            ("NBOX_FEATURES_LOCKED", "true"),
            ("NBOX_REQUEST_TIMEOUT_SECS", "45"),
            ("GEMINI_API_BASE", "http://localhost:9000/v1beta/"),
            ("NBOX_HISTORY_PATH", "/tmp/h.json"),
        ])?;
        assert!(config.features_locked);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");
        assert_eq!(config.history_path, PathBuf::from("/tmp/h.json"));
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config_from(&[("NBOX_FEATURES_LOCKED", "maybe")]).is_err());
        assert!(config_from(&[("NBOX_REQUEST_TIMEOUT_SECS", "soon")]).is_err());
    }
}
