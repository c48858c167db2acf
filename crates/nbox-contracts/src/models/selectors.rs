use std::fmt;

use super::registry::{ModelRegistry, ModelSpec};

/// Why a configured model name was not used as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    NotConfigured,
    Unknown(String),
    Lacks { model: String, capability: String },
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => f.write_str("no model configured"),
            Self::Unknown(model) => write!(f, "model '{model}' is not a known Gemini or Imagen model"),
            Self::Lacks { model, capability } => {
                write!(f, "model '{model}' does not support '{capability}'")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub fallback: Option<Fallback>,
}

/// Resolves configured model names against the registry, one capability at a time.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    /// The requested model when it is registered with `capability`, otherwise the first
    /// registered model that has it. `None` only when no model has the capability.
    pub fn select(&self, requested: Option<&str>, capability: &str) -> Option<ModelSelection> {
        let fallback = match requested {
            None => Fallback::NotConfigured,
            Some(name) => match self.registry.get(name) {
                Some(model) if model.supports(capability) => {
                    return Some(ModelSelection {
                        model: model.clone(),
                        fallback: None,
                    })
                }
                Some(_) => Fallback::Lacks {
                    model: name.to_string(),
                    capability: capability.to_string(),
                },
                None => Fallback::Unknown(name.to_string()),
            },
        };
        let model = self.registry.by_capability(capability).into_iter().next()?;
        Some(ModelSelection {
            model,
            fallback: Some(fallback),
        })
    }
}
