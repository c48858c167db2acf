//! Prompt templates: render elaboration rules, utility task catalog, workflow presets
//! and the fixed instructions used by describe, upscale and edit.

pub mod instructions;
pub mod presets;
pub mod render;
pub mod utilities;

pub use instructions::{masked_edit_instruction, upscale_instruction, UpscaleTier};
pub use render::{elaborate, select_rule, PromptContext, PromptRule, RenderType};
pub use utilities::{
    find_utility_task, utility_tasks, InputArity, PredefinedPrompt, TaskService, UtilityTaskDef,
};
