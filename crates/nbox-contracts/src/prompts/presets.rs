pub const DEFAULT_EXTERIOR_PROMPT: &str =
    "a modern one-story house, photorealistic, cinematic lighting, 8k";

pub const EXTERIOR_PREDEFINED_PROMPTS: &[&str] = &[
    "Real photo of the building on a Vietnamese street, harsh midday sun",
    "Real photo of the building at a busy three-way intersection in Ho Chi Minh City, daytime right after rain",
    "Real photo of the building in a wealthy villa neighbourhood in Vietnam, daytime right after rain",
    "Real photo of the building in the Vietnamese countryside, golden afternoon sun",
];

pub const INTERIOR_PREDEFINED_PROMPTS: &[&str] = &[
    "create a realistic photo of a modern living room with a grey sofa, wooden floor and large windows facing the garden",
    "create a realistic photo of a cosy bedroom in neutral tones with a wooden bed and soft warm light",
    "create a realistic photo of a minimalist kitchen with handleless white cabinets, a marble countertop and pendant lights",
    "create a realistic photo of a luxurious marble bathroom with a freestanding tub, a rain shower and natural light",
    "create a realistic photo of a home office with an oak desk, an ergonomic chair and built-in bookshelves",
];

pub const EXTERIOR_ANGLE_PRESETS: &[&str] = &[
    "Straight-on wide shot of the full facade",
    "Three-quarter view from the left, showing the facade and the side of the house",
    "Three-quarter view from the right, capturing the depth of the building",
    "High drone view looking down over the whole property",
    "Low angle looking up, emphasising height and presence",
    "Close-up of the main entrance and facade materials",
    "Shot through trees and landscaping for a natural frame",
    "View from inside the house looking out to the garden or gate",
    "Night shot with artificial lighting, highlighting the lighting design",
    "Horizontal panorama covering the whole setting and surroundings",
];

pub const INTERIOR_ANGLE_PRESETS: &[&str] = &[
    "Realistic photo from above looking down over the whole room",
    "Realistic photo, three-quarter view from the left covering the whole room",
    "Realistic photo, three-quarter view from the right covering the whole room",
    "Realistic photo, straight-on view into the centre of the room",
    "Realistic photo, diagonal view from the doorway into the room",
    "Realistic photo from behind the sofa looking towards the window",
    "Realistic photo from inside the room looking back at the main door",
    "Realistic photo from near the ceiling for a sense of depth",
    "Realistic photo, symmetrical balanced composition of the whole room",
    "Realistic photo from a corner to make the space feel wide",
    "Realistic photo of the sofa and coffee table at eye level",
    "Realistic photo of the TV wall and feature wall, straight on",
    "Realistic photo of the dining table and chairs at 45 degrees",
    "Realistic photo of a large window with natural light pouring in",
    "Realistic photo of a decorated wall corner with artwork and wall washers",
    "Realistic photo towards the kitchen opening onto the living room",
    "Realistic photo of a reading nook with a bookshelf and armchair",
    "Realistic photo of the rug around the coffee table",
    "Realistic photo of the curtains with light coming through",
    "Realistic photo of ceiling details and the decorative lighting",
    "Realistic close-up of the sofa fabric or leather",
    "Realistic close-up of a glass or wooden coffee table",
    "Realistic close-up of a crystal chandelier or pendant light",
    "Realistic close-up of colourful cushions on the sofa",
    "Realistic close-up of a patterned rug",
    "Realistic close-up of sheer curtains",
    "Realistic close-up of a potted plant in the room",
    "Realistic close-up of the TV cabinet and small decor",
    "Realistic close-up of a wooden chair armrest",
    "Realistic close-up of a wall surface with pattern or mouldings",
];

pub const FLOORPLAN_BASE_PROMPT: &str = "Turn this floorplan into a 3D interior render";

pub const FLOORPLAN_ROOM_TYPES: &[&str] = &[
    "Living room",
    "Bedroom",
    "Kitchen",
    "Bathroom / WC",
    "Balcony",
    "Study",
    "Dining room",
    "Entrance",
];

pub const FLOORPLAN_ROOM_STYLES: &[&str] = &[
    "Modern",
    "Neoclassical",
    "Wabi-sabi",
    "Minimalism",
    "Scandinavian",
    "Indochine",
    "Industrial",
    "Bohemian",
];

pub fn floorplan_prompt(room_type: &str, room_style: &str) -> String {
    format!("{FLOORPLAN_BASE_PROMPT}. Room type: {room_type}. Style: {room_style}.")
}

/// Prompt seeded from an automatic interior description.
pub fn interior_seed_prompt(description: &str) -> String {
    format!("create a realistic photo of {description}")
}
