//! G-buffer pass: writes albedo, normal (w = receive-shadow flag) and world position
//! (w = lighting flag) plus depth for every visible drawable. Static and skinned meshes share one
//! pipeline; the bone block's `use_bone` switches skinning on.

use glam::Mat4;
use render_api::{
    Bone, BufferHandle, ClearColor, ColorBlend, CommandBufferHandle, CommandList, DepthTest, GpuDevice,
    GraphicsPipelineDescriptor, LoadOp, PipelineHandle, PrimitiveTopology, RasterizerState, RecordDraws,
    RenderPassDescriptor, RenderPassHandle, ResourceLayoutEntry, SamplerKind, ShaderResourceSet, ShaderStage,
    ShaderStages, SubCommandList, TextureHandle, VertexFormat, VertexLayout,
};

use crate::config::MAX_BONES;
use crate::error::Result;
use crate::resources::FrameResources;

/// Position, normal, uv, joints, weights: matches [`render_api::Vertex`].
pub fn mesh_vertex_layout() -> VertexLayout {
    VertexLayout::packed(&[
        VertexFormat::Float32x3,
        VertexFormat::Float32x3,
        VertexFormat::Float32x2,
        VertexFormat::Float32x4,
        VertexFormat::Float32x4,
    ])
}

/// Per-drawable transforms and flags.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneData {
    pub world: [f32; 16],
    pub view: [f32; 16],
    pub proj: [f32; 16],
    /// 1.0 or 0.0.
    pub receive_shadow: f32,
    /// 1.0 or 0.0.
    pub lighting: f32,
    _pad: [f32; 2],
}

impl SceneData {
    pub fn new(world: Mat4, view: Mat4, proj: Mat4, receive_shadow: bool, lighting: bool) -> Self {
        Self {
            world: world.to_cols_array(),
            view: view.to_cols_array(),
            proj: proj.to_cols_array(),
            receive_shadow: if receive_shadow { 1.0 } else { 0.0 },
            lighting: if lighting { 1.0 } else { 0.0 },
            _pad: [0.0; 2],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BoneData {
    pub use_bone: u32,
    _pad: [u32; 3],
    pub transforms: [[f32; 16]; MAX_BONES],
}

impl BoneData {
    /// Skinning off; transforms are identity.
    pub fn disabled() -> Self {
        Self {
            use_bone: 0,
            _pad: [0; 3],
            transforms: [Mat4::IDENTITY.to_cols_array(); MAX_BONES],
        }
    }

    /// Skinning on with the first `MAX_BONES` bone transforms; the rest stay identity.
    pub fn from_bones(bones: &[Bone]) -> Self {
        if bones.len() > MAX_BONES {
            log::warn!("skinned mesh has {} bones; only the first {} are uploaded", bones.len(), MAX_BONES);
        }
        let mut data = Self::disabled();
        data.use_bone = 1;
        for (slot, bone) in data.transforms.iter_mut().zip(bones) {
            *slot = bone.transform.to_cols_array();
        }
        data
    }
}

pub struct GeometryPass {
    render_pass: RenderPassHandle,
    pipeline: PipelineHandle,
    targets: [TextureHandle; 3],
    command_buffer: CommandBufferHandle,
}

impl GeometryPass {
    pub fn new<D: GpuDevice>(device: &mut D, frame: &FrameResources) -> Result<Self> {
        let targets = frame.gbuffer.colors();
        let render_pass = device.create_render_pass(&RenderPassDescriptor::textures(
            "gbuffer_pass",
            targets.to_vec(),
            Some(frame.gbuffer.depth),
            LoadOp::Clear(ClearColor::TRANSPARENT),
        ))?;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some("gbuffer_pipeline"),
            render_pass,
            vertex: ShaderStage::new("gbuffer", "vs_main"),
            fragment: ShaderStage::new("gbuffer", "fs_main"),
            vertex_layout: Some(mesh_vertex_layout()),
            topology: PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::default(),
            depth: DepthTest::LessEqual,
            blend: ColorBlend::Replace,
            resource_sets: vec![
                vec![
                    ResourceLayoutEntry::uniform(0, ShaderStages::VERTEX),
                    ResourceLayoutEntry::uniform(1, ShaderStages::VERTEX),
                ],
                vec![ResourceLayoutEntry::texture(0), ResourceLayoutEntry::sampler(1)],
            ],
        })?;
        let command_buffer = device.create_command_buffer(&[record(render_pass, targets, std::iter::empty())])?;
        Ok(Self { render_pass, pipeline, targets, command_buffer })
    }

    pub fn render_pass(&self) -> RenderPassHandle { self.render_pass }
    pub fn command_buffer(&self) -> CommandBufferHandle { self.command_buffer }

    /// Barriers on the three color targets, then the pass around the given draws.
    pub fn record(&self, sub_commands: impl IntoIterator<Item = CommandBufferHandle>) -> CommandList {
        record(self.render_pass, self.targets, sub_commands)
    }

    pub fn record_sub(
        &self,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        index_count: u32,
        scene: BufferHandle,
        bones: BufferHandle,
        diffuse: TextureHandle,
    ) -> SubCommandList {
        let mut sub = SubCommandList::new(self.render_pass);
        sub.bind_pipeline(self.pipeline);
        sub.bind_resource_set(0, ShaderResourceSet::new().bind_buffer(0, scene).bind_buffer(1, bones));
        sub.bind_resource_set(
            1,
            ShaderResourceSet::new()
                .bind_texture(0, diffuse)
                .bind_sampler(1, SamplerKind::LinearRepeat),
        );
        sub.bind_buffers(vertex_buffer, index_buffer);
        sub.draw_indexed(index_count, 1, 0, 0, 0);
        sub
    }
}

fn record(
    render_pass: RenderPassHandle,
    targets: [TextureHandle; 3],
    sub_commands: impl IntoIterator<Item = CommandBufferHandle>,
) -> CommandList {
    let mut list = CommandList::new();
    for target in targets {
        list.barrier(target);
    }
    list.begin(render_pass);
    for sub in sub_commands {
        list.execute_sub_command(sub);
    }
    list.end();
    list
}
