//! Shadow map pass: renders shadow casters from the first light's point of view into a float
//! target holding view depth. One directional light casts; the lighting pass samples the map.

use glam::{Mat4, Vec3};
use render_api::{
    BufferDescriptor, BufferHandle, ClearColor, ColorBlend, CommandBufferHandle, CommandList, DepthTest,
    GpuDevice, GraphicsPipelineDescriptor, LoadOp, PipelineHandle, PrimitiveTopology, RasterizerState,
    RecordDraws, RenderPassDescriptor, RenderPassHandle, ResourceLayoutEntry, ShaderResourceSet, ShaderStage,
    ShaderStages, SubCommandList,
};

use crate::config::ShadowConfig;
use crate::error::Result;
use crate::gbuffer::mesh_vertex_layout;
use crate::resources::FrameResources;

/// Cleared value of the shadow map: farther than anything the shadow camera sees.
pub const SHADOW_CLEAR_DEPTH: f64 = 10_000.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowData {
    pub light_view_proj: [f32; 16],
    /// `light_view_proj` followed by the clip-to-texture bias.
    pub light_view_proj_bias: [f32; 16],
}

/// Maps clip-space xyz from [-1, 1] to [0, 1].
pub fn bias_matrix() -> Mat4 {
    Mat4::from_translation(Vec3::splat(0.5)) * Mat4::from_scale(Vec3::splat(0.5))
}

impl ShadowData {
    /// Shadow camera at `-direction * eye_distance` looking at the origin. The direction is used as
    /// given, so a non-unit direction moves the eye proportionally. A zero direction points straight
    /// down.
    pub fn from_light(direction: Vec3, aspect: f32, config: &ShadowConfig) -> Self {
        let direction = if direction.length_squared() > 0.0 { direction } else { Vec3::NEG_Y };
        let vertical = direction.normalize().cross(Vec3::Y).length_squared() < 1e-6;
        let up = if vertical { Vec3::Z } else { Vec3::Y };
        let view = Mat4::look_at_rh(direction * -config.eye_distance, Vec3::ZERO, up);
        let mut proj = Mat4::perspective_rh(config.fov_y_degrees.to_radians(), aspect, config.near, config.far);
        proj.y_axis.y *= -1.0;
        let light_view_proj = proj * view;
        Self {
            light_view_proj: light_view_proj.to_cols_array(),
            light_view_proj_bias: (bias_matrix() * light_view_proj).to_cols_array(),
        }
    }
}

pub struct ShadowPass {
    render_pass: RenderPassHandle,
    pipeline: PipelineHandle,
    uniform: BufferHandle,
    command_buffer: CommandBufferHandle,
}

impl ShadowPass {
    pub fn new<D: GpuDevice>(device: &mut D, frame: &FrameResources) -> Result<Self> {
        let render_pass = device.create_render_pass(&RenderPassDescriptor::textures(
            "shadow_pass",
            vec![frame.shadow_map],
            Some(frame.shadow_depth),
            LoadOp::Clear(ClearColor::splat(SHADOW_CLEAR_DEPTH)),
        ))?;
        // The flipped projection reverses winding, so nothing is culled here.
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some("shadow_pipeline"),
            render_pass,
            vertex: ShaderStage::new("shadow", "vs_main"),
            fragment: ShaderStage::new("shadow", "fs_main"),
            vertex_layout: Some(mesh_vertex_layout()),
            topology: PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::NO_CULL,
            depth: DepthTest::LessEqual,
            blend: ColorBlend::Replace,
            resource_sets: vec![vec![
                ResourceLayoutEntry::uniform(0, ShaderStages::VERTEX),
                ResourceLayoutEntry::uniform(1, ShaderStages::VERTEX),
                ResourceLayoutEntry::uniform(2, ShaderStages::VERTEX),
            ]],
        })?;
        let uniform = device.create_buffer(&BufferDescriptor::uniform::<ShadowData>("shadow_uniform"))?;
        let command_buffer = device.create_command_buffer(&[record(render_pass, std::iter::empty())])?;
        Ok(Self { render_pass, pipeline, uniform, command_buffer })
    }

    pub fn render_pass(&self) -> RenderPassHandle { self.render_pass }
    pub fn uniform(&self) -> BufferHandle { self.uniform }
    pub fn command_buffer(&self) -> CommandBufferHandle { self.command_buffer }

    /// Top-level recording: the pass with every given caster's sub command inside it.
    pub fn record(&self, sub_commands: impl IntoIterator<Item = CommandBufferHandle>) -> CommandList {
        record(self.render_pass, sub_commands)
    }

    /// Draw of one caster with its own scene and bone uniforms.
    pub fn record_sub(
        &self,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        index_count: u32,
        scene: BufferHandle,
        bones: BufferHandle,
    ) -> SubCommandList {
        let mut sub = SubCommandList::new(self.render_pass);
        sub.bind_pipeline(self.pipeline);
        sub.bind_resource_set(
            0,
            ShaderResourceSet::new()
                .bind_buffer(0, scene)
                .bind_buffer(1, self.uniform)
                .bind_buffer(2, bones),
        );
        sub.bind_buffers(vertex_buffer, index_buffer);
        sub.draw_indexed(index_count, 1, 0, 0, 0);
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

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use render_api::{Binding, Command, RecordingDevice};

    #[test]
    fn shadow_data_is_two_matrices() {
        assert_eq!(std::mem::size_of::<ShadowData>(), 128);
    }

    #[test]
    fn bias_maps_clip_cube_to_unit_cube() {
        let bias = bias_matrix();
        assert!(bias.transform_point3(Vec3::splat(-1.0)).abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!(bias.transform_point3(Vec3::ONE).abs_diff_eq(Vec3::ONE, 1e-6));
    }

    #[test]
    fn origin_projects_to_texture_center() {
        let data = ShadowData::from_light(Vec3::new(0.0, -1.0, -1.0), 4.0 / 3.0, &ShadowConfig::default());
        let biased = Mat4::from_cols_array(&data.light_view_proj_bias) * Vec4::W;
        assert!(biased.w > 0.0);
        assert!((biased.x / biased.w - 0.5).abs() < 1e-5);
        assert!((biased.y / biased.w - 0.5).abs() < 1e-5);
        let unbiased = Mat4::from_cols_array(&data.light_view_proj) * Vec4::W;
        assert!((unbiased.w - 10.0 * 2f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn eye_distance_scales_with_raw_direction() {
        let config = ShadowConfig::default();
        let depth = |dir: Vec3| {
            let data = ShadowData::from_light(dir, 1.0, &config);
            (Mat4::from_cols_array(&data.light_view_proj) * Vec4::W).w
        };
        assert!((depth(Vec3::new(1.0, -1.0, 0.0).normalize()) - 10.0).abs() < 1e-4);
        assert!((depth(Vec3::new(3.0, -3.0, 0.0).normalize() * 3.0) - 30.0).abs() < 1e-3);
    }

    #[test]
    fn vertical_and_zero_directions_stay_finite() {
        for dir in [Vec3::NEG_Y, Vec3::Y, Vec3::ZERO] {
            let data = ShadowData::from_light(dir, 1.0, &ShadowConfig::default());
            assert!(data.light_view_proj.iter().all(|v| v.is_finite()));
            assert!(data.light_view_proj_bias.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn sub_binds_scene_shadow_and_bones() {
        let sizes = [(64, 64)];
        let mut device = RecordingDevice::with_windows(&sizes);
        let frame = FrameResources::new(&mut device, &sizes, 1).unwrap();
        let pass = ShadowPass::new(&mut device, &frame).unwrap();
        let sub = pass.record_sub(BufferHandle(90), BufferHandle(91), 36, BufferHandle(92), BufferHandle(93));
        let set = sub
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::BindResourceSet { set: 0, resources } => Some(resources.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(set.get(0), Some(Binding::Buffer(BufferHandle(92))));
        assert_eq!(set.get(1), Some(Binding::Buffer(pass.uniform())));
        assert_eq!(set.get(2), Some(Binding::Buffer(BufferHandle(93))));
        assert_eq!(sub.commands().last(), Some(&Command::DrawIndexed {
            index_count: 36,
            instance_count: 1,
            first_index: 0,
            vertex_offset: 0,
            first_instance: 0,
        }));

        let rp = device.render_pass(pass.render_pass()).unwrap();
        assert_eq!(rp.load, LoadOp::Clear(ClearColor::splat(SHADOW_CLEAR_DEPTH)));
        assert_eq!(device.primary_recordings(pass.command_buffer()).unwrap()[0].commands().len(), 2);
    }
}
