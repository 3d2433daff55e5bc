//! Frame resources: shadow map, G-buffer (albedo, normal, world position, depth), one lit offscreen
//! target per window and the 1x1 fallback texture. Created once per renderer.

use render_api::{GpuDevice, TextureDescriptor, TextureFormat, TextureHandle};

use crate::error::{RendererError, Result};

pub const SHADOW_MAP_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const ALBEDO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
/// Normal and world position need a float format for signed values.
pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const WORLD_POSITION_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const OFFSCREEN_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Supersampling factor times the largest window width and height.
pub fn working_resolution(window_sizes: &[(u32, u32)], factor: u32) -> (u32, u32) {
    let (w, h) = largest_extent(window_sizes);
    (w * factor.max(1), h * factor.max(1))
}

/// Largest width and largest height over all windows, at least 1x1.
pub fn largest_extent(window_sizes: &[(u32, u32)]) -> (u32, u32) {
    window_sizes
        .iter()
        .fold((1, 1), |(w, h), &(ww, wh)| (w.max(ww), h.max(wh)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferTargets {
    pub albedo: TextureHandle,
    pub normal: TextureHandle,
    pub world_position: TextureHandle,
    pub depth: TextureHandle,
}

impl GBufferTargets {
    pub fn colors(&self) -> [TextureHandle; 3] {
        [self.albedo, self.normal, self.world_position]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameResources {
    pub shadow_map: TextureHandle,
    pub shadow_depth: TextureHandle,
    pub gbuffer: GBufferTargets,
    /// One per window, all sized to the largest window extent.
    pub offscreen: Vec<TextureHandle>,
    /// White 1x1 texture bound for materials without a diffuse texture.
    pub fallback_texture: TextureHandle,
    lit_target: TextureHandle,
    working_size: (u32, u32),
    surface_size: (u32, u32),
}

impl FrameResources {
    pub fn new<D: GpuDevice>(device: &mut D, window_sizes: &[(u32, u32)], supersampling: u32) -> Result<Self> {
        if window_sizes.is_empty() {
            return Err(RendererError::NoWindows);
        }
        let working_size = working_resolution(window_sizes, supersampling);
        let surface_size = largest_extent(window_sizes);

        let mut make_rt = |label: &'static str, size: (u32, u32), format: TextureFormat| {
            device.create_texture(&TextureDescriptor::render_target(label, size, format))
        };
        let shadow_map = make_rt("shadow_map", working_size, SHADOW_MAP_FORMAT)?;
        let shadow_depth = make_rt("shadow_depth", working_size, DEPTH_FORMAT)?;
        let gbuffer = GBufferTargets {
            albedo: make_rt("gbuffer_albedo", working_size, ALBEDO_FORMAT)?,
            normal: make_rt("gbuffer_normal", working_size, NORMAL_FORMAT)?,
            world_position: make_rt("gbuffer_world_position", working_size, WORLD_POSITION_FORMAT)?,
            depth: make_rt("gbuffer_depth", working_size, DEPTH_FORMAT)?,
        };
        let offscreen = window_sizes
            .iter()
            .map(|_| make_rt("offscreen", surface_size, OFFSCREEN_FORMAT))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let lit_target = *offscreen.last().ok_or(RendererError::NoWindows)?;

        let fallback_texture =
            device.create_texture(&TextureDescriptor::sampled("fallback_white", (1, 1), TextureFormat::Rgba8Unorm))?;
        device.write_texture(fallback_texture, &[255; 4])?;

        log::debug!(
            "frame resources: working {}x{}, surface {}x{}, {} window(s)",
            working_size.0,
            working_size.1,
            surface_size.0,
            surface_size.1,
            window_sizes.len()
        );
        Ok(Self {
            shadow_map,
            shadow_depth,
            gbuffer,
            offscreen,
            fallback_texture,
            lit_target,
            working_size,
            surface_size,
        })
    }

    /// Offscreen target the lighting and sprite passes draw into (the last window's).
    pub fn lit_target(&self) -> TextureHandle { self.lit_target }
    pub fn working_size(&self) -> (u32, u32) { self.working_size }
    pub fn surface_size(&self) -> (u32, u32) { self.surface_size }

    pub fn working_aspect(&self) -> f32 {
        self.working_size.0 as f32 / self.working_size.1 as f32
    }
}
