use thiserror::Error;

pub type NboxResult<T> = std::result::Result<T, NboxError>;

/// Message shown for every workflow disabled by the feature gate.
pub const MAINTENANCE_MESSAGE: &str =
    "This feature is under maintenance, please come back later.";

#[derive(Debug, Error)]
pub enum NboxError {
    #[error("API key is not configured")]
    MissingCredential,

    #[error("unsupported image type '{0}'")]
    InvalidImageFormat(String),

    #[error("the model returned no image")]
    NoImageProduced,

    #[error("the model returned no description text")]
    NoTextProduced,

    #[error("{operation} failed: {source:#}")]
    Transport {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("stored history for '{key}' is malformed: {reason}")]
    MalformedPersistedData { key: String, reason: String },

    #[error("{0}")]
    Validation(String),

    #[error("{}", MAINTENANCE_MESSAGE)]
    FeatureLocked,

    #[error("{0} is already in progress")]
    Busy(&'static str),
}

impl NboxError {
    pub fn transport(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Transport { operation, source }
    }

    /// Text for the blocking notification raised at the user-action boundary.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingCredential => {
                "No API key is configured. Set GEMINI_API_KEY and try again.".to_string()
            }
            Self::InvalidImageFormat(_) => {
                "Please upload a valid image file (PNG, JPG, WEBP).".to_string()
            }
            Self::NoImageProduced | Self::Transport { .. } => {
                "Something went wrong while generating the image. Check the API key and try again."
                    .to_string()
            }
            Self::NoTextProduced => {
                "Could not describe the image automatically. Please type a description manually."
                    .to_string()
            }
            Self::MalformedPersistedData { .. } => {
                "Stored history could not be read and was reset.".to_string()
            }
            Self::Validation(message) => message.clone(),
            Self::FeatureLocked => MAINTENANCE_MESSAGE.to_string(),
            Self::Busy(surface) => format!("Please wait until the current {surface} finishes."),
        }
    }
}
