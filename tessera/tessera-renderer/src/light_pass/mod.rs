//! Deferred lighting pass: full-screen triangle strip that reads the G-buffer and shadow map and
//! writes the lit image into the last window's offscreen target. Recorded once; only the light and
//! camera uniforms change between frames.

use glam::Vec3;
use render_api::{
    BufferDescriptor, BufferHandle, ClearColor, ColorBlend, CommandBufferHandle, CommandList, DepthTest,
    GpuDevice, GraphicsPipelineDescriptor, LightComponent, LoadOp, PipelineHandle, PrimitiveTopology,
    RasterizerState, RecordDraws, RenderPassDescriptor, RenderPassHandle, ResourceLayoutEntry, SamplerKind,
    ShaderResourceSet, ShaderStage, ShaderStages,
};

use crate::config::MAX_LIGHTS;
use crate::error::Result;
use crate::resources::FrameResources;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightData {
    pub direction: [f32; 3],
    /// 0 directional, 1 point.
    pub light_type: u32,
    pub color: [f32; 4],
}

impl From<&LightComponent> for LightData {
    fn from(light: &LightComponent) -> Self {
        Self {
            direction: light.direction.to_array(),
            light_type: light.kind.code(),
            color: light.color.to_array(),
        }
    }
}

/// Fixed-size light array; unused slots are zero (black, so they contribute nothing).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightBlock {
    pub lights: [LightData; MAX_LIGHTS],
}

impl LightBlock {
    /// Packs lights in registration order. Lights past `MAX_LIGHTS` are dropped with a warning.
    pub fn pack(lights: &[LightComponent]) -> Self {
        if lights.len() > MAX_LIGHTS {
            log::warn!("{} lights registered; only the first {} are shaded", lights.len(), MAX_LIGHTS);
        }
        let mut block = Self { lights: [LightData::default(); MAX_LIGHTS] };
        for (slot, light) in block.lights.iter_mut().zip(lights) {
            *slot = LightData::from(light);
        }
        block
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraData {
    pub position: [f32; 3],
    _pad: f32,
}

impl CameraData {
    pub fn new(position: Vec3) -> Self {
        Self { position: position.to_array(), _pad: 0.0 }
    }
}

pub struct LightingPass {
    render_pass: RenderPassHandle,
    light_buffer: BufferHandle,
    camera_buffer: BufferHandle,
    command_buffer: CommandBufferHandle,
}

impl LightingPass {
    pub fn new<D: GpuDevice>(
        device: &mut D,
        frame: &FrameResources,
        shadow_uniform: BufferHandle,
        clear_color: ClearColor,
    ) -> Result<Self> {
        let render_pass = device.create_render_pass(&RenderPassDescriptor::textures(
            "lighting_pass",
            vec![frame.lit_target()],
            None,
            LoadOp::Clear(clear_color),
        ))?;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some("lighting_pipeline"),
            render_pass,
            vertex: ShaderStage::new("lighting", "vs_main"),
            fragment: ShaderStage::new("lighting", "fs_main"),
            vertex_layout: None,
            topology: PrimitiveTopology::TriangleStrip,
            rasterizer: RasterizerState::NO_CULL,
            depth: DepthTest::None,
            blend: ColorBlend::Replace,
            resource_sets: vec![
                vec![
                    ResourceLayoutEntry::uniform(0, ShaderStages::FRAGMENT),
                    ResourceLayoutEntry::uniform(1, ShaderStages::FRAGMENT),
                    ResourceLayoutEntry::uniform(2, ShaderStages::FRAGMENT),
                ],
                vec![
                    ResourceLayoutEntry::texture(0),
                    ResourceLayoutEntry::texture(1),
                    ResourceLayoutEntry::texture(2),
                    ResourceLayoutEntry::texture(3),
                    ResourceLayoutEntry::sampler(4),
                ],
            ],
        })?;
        let light_buffer = device.create_buffer(&BufferDescriptor::uniform::<LightBlock>("light_uniform"))?;
        let camera_buffer = device.create_buffer(&BufferDescriptor::uniform::<CameraData>("camera_uniform"))?;

        let mut list = CommandList::new();
        list.begin(render_pass);
        list.bind_pipeline(pipeline);
        list.bind_resource_set(
            0,
            ShaderResourceSet::new()
                .bind_buffer(0, light_buffer)
                .bind_buffer(1, camera_buffer)
                .bind_buffer(2, shadow_uniform),
        );
        list.bind_resource_set(
            1,
            ShaderResourceSet::new()
                .bind_texture(0, frame.gbuffer.albedo)
                .bind_texture(1, frame.gbuffer.normal)
                .bind_texture(2, frame.gbuffer.world_position)
                .bind_texture(3, frame.shadow_map)
                .bind_sampler(4, SamplerKind::LinearClamp),
        );
        list.draw(4, 1, 0, 0);
        list.end();
        let command_buffer = device.create_command_buffer(&[list])?;

        Ok(Self { render_pass, light_buffer, camera_buffer, command_buffer })
    }

    pub fn render_pass(&self) -> RenderPassHandle { self.render_pass }
    pub fn light_buffer(&self) -> BufferHandle { self.light_buffer }
    pub fn camera_buffer(&self) -> BufferHandle { self.camera_buffer }
    pub fn command_buffer(&self) -> CommandBufferHandle { self.command_buffer }
}
