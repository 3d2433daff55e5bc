//! WGSL sources for the pipelines the renderer creates, looked up by shader name.

const SHADOW: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shadow.wgsl"));
const GBUFFER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/gbuffer.wgsl"));
const LIGHTING: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/lighting.wgsl"));
const SPRITE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/sprite.wgsl"));
const PRESENT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/present.wgsl"));

pub const NAMES: [&str; 5] = ["shadow", "gbuffer", "lighting", "sprite", "present"];

pub fn source(name: &str) -> Option<&'static str> {
    match name {
        "shadow" => Some(SHADOW),
        "gbuffer" => Some(GBUFFER),
        "lighting" => Some(LIGHTING),
        "sprite" => Some(SPRITE),
        "present" => Some(PRESENT),
        _ => None,
    }
}
