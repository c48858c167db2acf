pub mod error;
pub mod history;
pub mod images;
pub mod models;
pub mod prompts;
pub mod store;

pub use error::{NboxError, NboxResult};
pub use images::SourceImage;
