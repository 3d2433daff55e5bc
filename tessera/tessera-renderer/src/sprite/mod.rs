//! Sprite pass: pixel-space textured quads alpha-blended over the lit offscreen target.
//! All sprites share one index buffer and one projection; each sprite owns a 4-vertex buffer that
//! is rewritten from its transform every build.

use glam::{Mat4, Vec2, Vec4};
use render_api::{
    BufferDescriptor, BufferHandle, ColorBlend, CommandBufferHandle, CommandList, DepthTest, GpuDevice,
    GraphicsPipelineDescriptor, LoadOp, Pivot, PipelineHandle, PrimitiveTopology, RasterizerState, RecordDraws,
    RenderPassDescriptor, RenderPassHandle, ResourceLayoutEntry, SamplerKind, ShaderResourceSet, ShaderStage,
    ShaderStages, SubCommandList, TextureHandle, Transform, VertexFormat, VertexLayout,
};

use crate::error::Result;
use crate::resources::FrameResources;

/// lu, ld, ru / ru, ld, rd.
pub const QUAD_INDICES: [u32; 6] = [0, 2, 1, 1, 2, 3];

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteProjection {
    pub proj: [f32; 16],
}

/// Maps pixel (0, 0)..(width, height) to clip -1..1 on both axes; z passes through.
pub fn screen_projection(width: u32, height: u32) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(2.0 / width.max(1) as f32, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 / height.max(1) as f32, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(-1.0, -1.0, 0.0, 1.0),
    )
}

/// Quad corners in pixel space, ordered lu, ru, ld, rd. Scale applies for both pivots; the
/// rotation angle turns the quad about its pivot. Depth is clamped to [0, 1].
pub fn sprite_quad(texture_size: (u32, u32), transform: &Transform, pivot: Pivot) -> [SpriteVertex; 4] {
    let size = Vec2::new(texture_size.0 as f32, texture_size.1 as f32) * transform.scale.truncate();
    let corners = match pivot {
        Pivot::Center => {
            let half = size * 0.5;
            [
                Vec2::new(-half.x, -half.y),
                Vec2::new(half.x, -half.y),
                Vec2::new(-half.x, half.y),
                Vec2::new(half.x, half.y),
            ]
        }
        Pivot::UpperLeft => [Vec2::ZERO, Vec2::new(size.x, 0.0), Vec2::new(0.0, size.y), size],
    };
    let rotation = Vec2::from_angle(transform.rotation_angle);
    let origin = transform.position.truncate();
    let z = transform.position.z.clamp(0.0, 1.0);
    let uvs = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
    let mut quad = [SpriteVertex { position: [0.0; 3], uv: [0.0; 2] }; 4];
    for ((vertex, corner), uv) in quad.iter_mut().zip(corners).zip(uvs) {
        let p = rotation.rotate(corner) + origin;
        *vertex = SpriteVertex { position: [p.x, p.y, z], uv };
    }
    quad
}

pub struct SpritePass {
    render_pass: RenderPassHandle,
    pipeline: PipelineHandle,
    index_buffer: BufferHandle,
    projection_buffer: BufferHandle,
    command_buffer: CommandBufferHandle,
}

impl SpritePass {
    pub fn new<D: GpuDevice>(device: &mut D, frame: &FrameResources) -> Result<Self> {
        let render_pass = device.create_render_pass(&RenderPassDescriptor::textures(
            "sprite_pass",
            vec![frame.lit_target()],
            None,
            LoadOp::Load,
        ))?;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some("sprite_pipeline"),
            render_pass,
            vertex: ShaderStage::new("sprite", "vs_main"),
            fragment: ShaderStage::new("sprite", "fs_main"),
            vertex_layout: Some(VertexLayout::packed(&[VertexFormat::Float32x3, VertexFormat::Float32x2])),
            topology: PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::NO_CULL,
            depth: DepthTest::None,
            blend: ColorBlend::AlphaBlend,
            resource_sets: vec![
                vec![ResourceLayoutEntry::uniform(0, ShaderStages::VERTEX)],
                vec![ResourceLayoutEntry::texture(0), ResourceLayoutEntry::sampler(1)],
            ],
        })?;

        let index_buffer = device.create_buffer(&BufferDescriptor::index("sprite_indices", QUAD_INDICES.len()))?;
        device.write_slice(index_buffer, &QUAD_INDICES)?;

        let (width, height) = frame.surface_size();
        let projection_buffer =
            device.create_buffer(&BufferDescriptor::uniform::<SpriteProjection>("sprite_projection"))?;
        device.write_value(
            projection_buffer,
            &SpriteProjection { proj: screen_projection(width, height).to_cols_array() },
        )?;

        let command_buffer = device.create_command_buffer(&[record(render_pass, std::iter::empty())])?;
        Ok(Self { render_pass, pipeline, index_buffer, projection_buffer, command_buffer })
    }

    pub fn render_pass(&self) -> RenderPassHandle { self.render_pass }
    pub fn index_buffer(&self) -> BufferHandle { self.index_buffer }
    pub fn projection_buffer(&self) -> BufferHandle { self.projection_buffer }
    pub fn command_buffer(&self) -> CommandBufferHandle { self.command_buffer }

    pub fn record(&self, sub_commands: impl IntoIterator<Item = CommandBufferHandle>) -> CommandList {
        record(self.render_pass, sub_commands)
    }

    pub fn record_sub(&self, vertex_buffer: BufferHandle, texture: TextureHandle) -> SubCommandList {
        let mut sub = SubCommandList::new(self.render_pass);
        sub.bind_pipeline(self.pipeline);
        sub.bind_resource_set(0, ShaderResourceSet::new().bind_buffer(0, self.projection_buffer));
        sub.bind_resource_set(
            1,
            ShaderResourceSet::new()
                .bind_texture(0, texture)
                .bind_sampler(1, SamplerKind::LinearClamp),
        );
        sub.bind_buffers(vertex_buffer, self.index_buffer);
        sub.draw_indexed(QUAD_INDICES.len() as u32, 1, 0, 0, 0);
        sub
    }
}

fn record(render_pass: RenderPassHandle, sub_commands: impl IntoIterator<Item = CommandBufferHandle>) -> CommandList {
    let mut list = CommandList::new();
    list.begin(render_pass);
    for sub in sub_commands {
        list.execute_sub_command(sub);
    }
    list.end();
    list
}
