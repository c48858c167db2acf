mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT,
    CAPABILITY_TEXT_TO_IMAGE, CAPABILITY_VISION,
};
pub use selectors::{Fallback, ModelSelection, ModelSelector};
