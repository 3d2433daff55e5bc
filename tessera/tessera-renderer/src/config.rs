//! Tessera configuration: frames in flight, supersampling, shadow camera.

use render_api::ClearColor;

/// Capacity of the light uniform array.
pub const MAX_LIGHTS: usize = 16;
/// Capacity of the bone uniform array.
pub const MAX_BONES: usize = 128;

/// Directional shadow camera parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowConfig {
    /// Shadow eye sits at `-direction * eye_distance`, looking at the origin.
    pub eye_distance: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            eye_distance: 10.0,
            fov_y_degrees: 60.0,
            near: 1.0,
            far: 1000.0,
        }
    }
}

/// Tessera renderer configuration.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Frames in flight; one present recording is kept per frame.
    pub frame_count: u16,
    /// Working resolution = supersampling × largest window dimension (shadow map and G-buffer).
    pub supersampling: u32,
    pub shadow: ShadowConfig,
    /// Clear color of the lit offscreen target.
    pub clear_color: ClearColor,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_count: 3,
            supersampling: 2,
            shadow: ShadowConfig::default(),
            clear_color: ClearColor::BLACK,
        }
    }
}
