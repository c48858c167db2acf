pub mod client;
pub mod config;
pub mod gemini;
pub mod session;

#[cfg(test)]
mod testing;

pub use client::{GenerationClient, GenerationRequest, DEFAULT_RENDER_COUNT};
pub use config::EngineConfig;
pub use gemini::{GeminiBackend, GenerativeModel};
pub use session::{DescriptionTicket, SessionController, SessionState, Shortfall, Workflow};
