use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DESCRIBE_INTERIOR_INSTRUCTION: &str = "As an expert interior designer, describe the provided image of a room. Focus on the style (e.g., modern, minimalist, classic), key materials (e.g., wood floors, marble countertops), furniture, and the overall lighting and mood. The description should be suitable for use as a prompt to regenerate the image. Be descriptive and detailed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpscaleTier {
    #[serde(rename = "2k")]
    TwoK,
    #[serde(rename = "4k")]
    FourK,
}

impl UpscaleTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TwoK => "2k",
            Self::FourK => "4k",
        }
    }
}

impl fmt::Display for UpscaleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpscaleTier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "2k" => Ok(Self::TwoK),
            "4k" => Ok(Self::FourK),
            other => Err(format!("unsupported upscale tier '{other}' (expected 2k or 4k)")),
        }
    }
}

pub fn upscale_instruction(tier: UpscaleTier) -> String {
    format!(
        "Upscale this image to {} resolution. Enhance details, sharpness, and clarity while preserving the original content, style, and composition. Make it photorealistic.",
        tier.as_str().to_ascii_uppercase()
    )
}

/// The mask constraint lives only in this text; nothing verifies the model honoured it.
pub fn masked_edit_instruction(prompt: &str) -> String {
    format!(
        "You are an expert photo editor. You will receive an original image, a mask image, and a text prompt. Your task is to edit the original image *exclusively* within the white area defined by the mask. The black area of the mask represents the parts of the image that MUST remain completely untouched. The user's instruction for the edit is: \"{prompt}\". Whether this involves adding a new object, removing an existing one, or altering features, confine all changes strictly to the masked region. The final output should be a photorealistic image where the edits are seamlessly blended with the surrounding, unchanged areas."
    )
}
