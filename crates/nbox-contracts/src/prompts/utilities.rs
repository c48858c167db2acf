use std::fmt;

use crate::images::SourceImage;

use super::render::style_transfer_prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskService {
    TextToImage,
    Generate,
    GenerateWithReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputArity {
    None,
    One,
    Two,
}

impl InputArity {
    pub fn count(self) -> usize {
        match self {
            Self::None => 0,
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredefinedPrompt {
    pub label: &'static str,
    pub value: &'static str,
}

#[derive(Clone, Copy)]
pub struct UtilityTaskDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub inputs: InputArity,
    pub input_labels: &'static [&'static str],
    pub prompt_placeholder: &'static str,
    pub service: TaskService,
    pub prompt_engineer: fn(&str) -> String,
    pub predefined_prompts: &'static [PredefinedPrompt],
    pub prompt_optional: bool,
    pub locked_under_maintenance: bool,
}

impl UtilityTaskDef {
    pub fn engineer(&self, prompt: &str) -> String {
        (self.prompt_engineer)(prompt)
    }

    /// Whether the task has everything it needs to run.
    pub fn can_run(
        &self,
        first: Option<&SourceImage>,
        second: Option<&SourceImage>,
        prompt: &str,
    ) -> bool {
        let has_prompt = self.prompt_optional || !prompt.is_empty();
        match self.inputs {
            InputArity::None => !prompt.is_empty(),
            InputArity::One => first.is_some() && has_prompt,
            InputArity::Two => first.is_some() && second.is_some() && has_prompt,
        }
    }
}

impl fmt::Debug for UtilityTaskDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilityTaskDef")
            .field("id", &self.id)
            .field("inputs", &self.inputs)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl PartialEq for UtilityTaskDef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

pub fn utility_tasks() -> &'static [UtilityTaskDef] {
    &UTILITY_TASKS
}

pub fn find_utility_task(id: &str) -> Option<&'static UtilityTaskDef> {
    UTILITY_TASKS.iter().find(|task| task.id == id)
}

static UTILITY_TASKS: [UtilityTaskDef; 9] = [
    UtilityTaskDef {
        id: "render_from_moodboard",
        name: "3D render from moodboard",
        description: "Upload a moodboard and describe the room to get a 3D render.",
        icon: "cube",
        inputs: InputArity::One,
        input_labels: &["Moodboard image"],
        prompt_placeholder: "e.g. modern living room, daylight",
        service: TaskService::Generate,
        prompt_engineer: moodboard_prompt,
        predefined_prompts: &[],
        prompt_optional: false,
        locked_under_maintenance: false,
    },
    UtilityTaskDef {
        id: "change_style",
        name: "Change building style",
        description: "Keep the architecture of the original, apply the style of the reference.",
        icon: "arrows-right-left",
        inputs: InputArity::Two,
        input_labels: &["Original building", "Style reference"],
        prompt_placeholder: "e.g. turn the daylight scene into sunset",
        service: TaskService::GenerateWithReference,
        prompt_engineer: change_style_prompt,
        predefined_prompts: &[],
        prompt_optional: false,
        locked_under_maintenance: true,
    },
    UtilityTaskDef {
        id: "change_interior_style",
        name: "Change interior style",
        description: "Keep the room layout, change only the interior style.",
        icon: "sparkles",
        inputs: InputArity::One,
        input_labels: &["Original interior"],
        prompt_placeholder: "e.g. neoclassical style with gold tones",
        service: TaskService::Generate,
        prompt_engineer: interior_style_prompt,
        predefined_prompts: &[
            PredefinedPrompt {
                label: "Minimalism",
                value: "change the style of this room to Minimalism",
            },
            PredefinedPrompt {
                label: "Modern",
                value: "change the style of this room to Modern",
            },
            PredefinedPrompt {
                label: "Scandinavian",
                value: "change the style of this room to Scandinavian",
            },
            PredefinedPrompt {
                label: "Industrial",
                value: "change the style of this room to Industrial",
            },
            PredefinedPrompt {
                label: "Wabi-sabi",
                value: "change the style of this room to Wabi-sabi",
            },
            PredefinedPrompt {
                label: "Bohemian",
                value: "change the style of this room to Bohemian",
            },
            PredefinedPrompt {
                label: "Neoclassical",
                value: "change the style of this room to Neoclassical",
            },
            PredefinedPrompt {
                label: "Coastal",
                value: "change the style of this room to Coastal",
            },
            PredefinedPrompt {
                label: "Mid-Century Modern",
                value: "change the style of this room to Mid-Century Modern",
            },
            PredefinedPrompt {
                label: "Art Deco",
                value: "change the style of this room to Art Deco",
            },
        ],
        prompt_optional: false,
        locked_under_maintenance: false,
    },
    UtilityTaskDef {
        id: "insert_building",
        name: "Insert building into site",
        description: "Composite your building into a photo of the existing site.",
        icon: "photo",
        inputs: InputArity::Two,
        input_labels: &["Building (plain background)", "Site photo"],
        prompt_placeholder: "e.g. place on the empty lot, match lighting, soft shadows",
        service: TaskService::GenerateWithReference,
        prompt_engineer: insert_building_prompt,
        predefined_prompts: &[
            PredefinedPrompt {
                label: "Place house in red zone (photo)",
                value: "Place the house in img 2 into the red zone in the img 1. and turn it into a real photo.",
            },
            PredefinedPrompt {
                label: "Place 2D drawing in red zone (as 3D)",
                value: "Place the 2d photo in img 2 into the red zone in the img 1. and turn it into a 3d real photo.",
            },
        ],
        prompt_optional: false,
        locked_under_maintenance: true,
    },
    UtilityTaskDef {
        id: "perspective_from_plan",
        name: "Perspective from master plan",
        description: "Upload a master plan with a marked viewpoint to get that perspective.",
        icon: "viewfinder",
        inputs: InputArity::One,
        input_labels: &["Master plan (marked)"],
        prompt_placeholder: "e.g. 3D render, modern style, sunny afternoon",
        service: TaskService::Generate,
        prompt_engineer: perspective_from_plan_prompt,
        predefined_prompts: &[],
        prompt_optional: false,
        locked_under_maintenance: true,
    },
    UtilityTaskDef {
        id: "3d_to_2d",
        name: "3D render to 2D drawing",
        description: "Convert a 3D render into a technical line drawing.",
        icon: "pencil",
        inputs: InputArity::One,
        input_labels: &["3D render"],
        prompt_placeholder: "e.g. front elevation, thin lines",
        service: TaskService::Generate,
        prompt_engineer: line_drawing_prompt,
        predefined_prompts: &[PredefinedPrompt {
            label: "Four views (front, back, left, top)",
            value: "Use the provided architectural image as reference. Create front, back, left and top views on a white background, evenly spaced.",
        }],
        prompt_optional: false,
        locked_under_maintenance: true,
    },
    UtilityTaskDef {
        id: "color_floorplan",
        name: "Color and shade a floorplan",
        description: "Add color, materials and shadows so a 2D floorplan looks finished.",
        icon: "brush",
        inputs: InputArity::One,
        input_labels: &["2D floorplan"],
        prompt_placeholder: "e.g. wooden floor, white walls, add plants",
        service: TaskService::Generate,
        prompt_engineer: color_floorplan_prompt,
        predefined_prompts: &[],
        prompt_optional: false,
        locked_under_maintenance: true,
    },
    UtilityTaskDef {
        id: "image_to_3d_model",
        name: "Photo to 3D model",
        description: "Turn a photo into a small 3D scale model on a desk.",
        icon: "cube",
        inputs: InputArity::One,
        input_labels: &["Building or product photo"],
        prompt_placeholder: "e.g. on an oak desk surrounded by architect tools",
        service: TaskService::Generate,
        prompt_engineer: scale_model_prompt,
        predefined_prompts: &[],
        prompt_optional: false,
        locked_under_maintenance: true,
    },
    UtilityTaskDef {
        id: "remove_watermark",
        name: "Remove watermark",
        description: "Remove watermarks or overlaid text from an image.",
        icon: "x-circle",
        inputs: InputArity::One,
        input_labels: &["Image with watermark"],
        prompt_placeholder: "May be left empty, or describe where the watermark is.",
        service: TaskService::Generate,
        prompt_engineer: remove_watermark_prompt,
        predefined_prompts: &[],
        prompt_optional: true,
        locked_under_maintenance: true,
    },
];

fn moodboard_prompt(p: &str) -> String {
    format!("Create a hyper-realistic 3D interior render of a room based on the materials, colors and style of the provided moodboard image. The user's request is: \"{p}\".")
}

fn change_style_prompt(p: &str) -> String {
    style_transfer_prompt(p, "room", "interior shot")
}

fn interior_style_prompt(p: &str) -> String {
    format!("You are an expert interior designer AI. The user has provided an image of a room. Your task is to re-render this exact room, keeping the layout, camera angle, and architectural elements (walls, windows, doors) the same, but completely changing the interior design style based on the user's text prompt. The user's request is: \"{p}\". Do not change the structure of the room.")
}

fn insert_building_prompt(p: &str) -> String {
    format!("You are an expert architectural visualizer and photo editor. The user has provided two images. The first image is an architectural building, likely with a plain background. The second image is a photo of the existing site/location. Your task is to seamlessly photoshop the building from the first image into the site from the second image. Pay close attention to scale, perspective, lighting, and shadows to make the composition look photorealistic. The user's specific instructions are: \"{p}\".")
}

fn perspective_from_plan_prompt(p: &str) -> String {
    format!("The user has provided a 2D master plan image that includes hand-drawn lines or arrows indicating a specific camera position and viewing direction. Your task is to interpret this drawing and generate a photorealistic 3D perspective view from that exact angle. Create a full 3D scene based on the layout in the plan. The user's specific request for style and mood is: \"{p}\".")
}

fn line_drawing_prompt(p: &str) -> String {
    format!("Convert this photorealistic 3D image into a 2D architectural technical line drawing. Keep every detail and proportion accurate. The user's specific request is: \"{p}\".")
}

fn color_floorplan_prompt(p: &str) -> String {
    format!("Render a high-quality version of this 2D floorplan from a top-down view. Add realistic materials (such as wood for floors, tiles for bathrooms) and soft shadows to create a sense of depth. Do not convert it into a 3D perspective view. The user's request is: \"{p}\".")
}

fn scale_model_prompt(p: &str) -> String {
    format!("Create a hyper-realistic image of a miniature 3D architectural scale model of the building in the provided image. The model must sit on an architect's wooden desk. The scene should have a shallow depth of field focused on the model. The user's specific request is: \"{p}\".")
}

fn remove_watermark_prompt(p: &str) -> String {
    format!("Remove any watermark or overlaid text from this image. Additional user request: \"{p}\"")
}
