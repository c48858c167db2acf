use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderType {
    Exterior,
    Interior,
    Floorplan,
}

impl RenderType {
    pub const ALL: [RenderType; 3] = [Self::Exterior, Self::Interior, Self::Floorplan];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exterior => "exterior",
            Self::Interior => "interior",
            Self::Floorplan => "floorplan",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            Self::Exterior => "building",
            _ => "room",
        }
    }

    fn sketch_kind(self) -> &'static str {
        match self {
            Self::Exterior => "architectural sketch",
            _ => "interior sketch",
        }
    }

    fn shot_kind(self) -> &'static str {
        match self {
            Self::Exterior => "exterior shot",
            _ => "interior shot",
        }
    }
}

impl fmt::Display for RenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exterior" => Ok(Self::Exterior),
            "interior" => Ok(Self::Interior),
            "floorplan" => Ok(Self::Floorplan),
            other => Err(format!("unknown render type '{other}'")),
        }
    }
}

/// The inputs that decide how a render prompt is elaborated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptContext {
    pub render_type: RenderType,
    pub has_reference: bool,
    pub is_angle: bool,
    pub use_raw: bool,
}

impl PromptContext {
    pub fn new(render_type: RenderType) -> Self {
        Self {
            render_type,
            has_reference: false,
            is_angle: false,
            use_raw: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRule {
    RawPassthrough,
    FloorplanTo3d,
    AngleChange,
    ReferenceStyleTransfer,
    Plain,
}

/// Evaluation order. The first rule whose predicate holds wins.
pub const PROMPT_RULES: [PromptRule; 5] = [
    PromptRule::RawPassthrough,
    PromptRule::FloorplanTo3d,
    PromptRule::AngleChange,
    PromptRule::ReferenceStyleTransfer,
    PromptRule::Plain,
];

impl PromptRule {
    pub fn applies(self, ctx: &PromptContext) -> bool {
        match self {
            Self::RawPassthrough => ctx.use_raw,
            Self::FloorplanTo3d => ctx.render_type == RenderType::Floorplan,
            Self::AngleChange => ctx.is_angle,
            Self::ReferenceStyleTransfer => ctx.has_reference,
            Self::Plain => true,
        }
    }

    pub fn render(self, prompt: &str, render_type: RenderType) -> String {
        match self {
            Self::RawPassthrough | Self::Plain => prompt.to_string(),
            Self::FloorplanTo3d => format!(
                "You are an expert 3D architectural visualizer. Your task is to convert the provided 2D floorplan image into a photorealistic 3D interior render, viewed from a human-eye level perspective inside the room. Adhere strictly to the layout, dimensions, and placement of walls, doors, and windows as shown in the floorplan. The user's request is: \"{prompt}\". Create a beautiful and realistic image based on these instructions."
            ),
            Self::AngleChange => format!(
                "The user wants to change the camera angle of the provided {}. Render the exact same {} from the image, but from this new perspective: \"{prompt}\". The prompt's main goal is to define the camera shot, not to add new content to the scene.",
                render_type.sketch_kind(),
                render_type.subject(),
            ),
            Self::ReferenceStyleTransfer => style_transfer_prompt(
                prompt,
                render_type.subject(),
                render_type.shot_kind(),
            ),
        }
    }
}

/// Two-image instruction: image 1 carries structure, image 2 carries mood only.
pub fn style_transfer_prompt(prompt: &str, subject: &str, shot: &str) -> String {
    format!(
        "The user's prompt is: \"{prompt}\". You are creating a realistic architectural render. The first image is the architectural sketch. You MUST use the exact structure, form, and layout from this first sketch. The second image is a reference for style ONLY. You must apply the mood, lighting, and color palette from the second image to the {subject} from the first sketch. It is forbidden to copy any shapes, objects, architectural elements, or scene composition (like window frames or foreground elements) from the second style-reference image. The final render must be an {shot} based on the user's prompt."
    )
}

pub fn select_rule(ctx: &PromptContext) -> PromptRule {
    PROMPT_RULES
        .into_iter()
        .find(|rule| rule.applies(ctx))
        .unwrap_or(PromptRule::Plain)
}

pub fn elaborate(prompt: &str, ctx: &PromptContext) -> String {
    select_rule(ctx).render(prompt, ctx.render_type)
}
