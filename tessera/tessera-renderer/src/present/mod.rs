//! Present pass: samples a window's offscreen target onto its swapchain image with a full-screen
//! triangle strip. One recording per frame in flight, recorded once and never rebuilt.

use render_api::{
    ColorBlend, CommandBufferHandle, CommandList, DepthTest, GpuDevice, GraphicsPipelineDescriptor,
    PrimitiveTopology, RasterizerState, RecordDraws, RenderPassDescriptor, RenderPassHandle, ResourceLayoutEntry,
    SamplerKind, ShaderResourceSet, ShaderStage, TextureHandle, WindowId,
};

use crate::error::Result;

pub struct PresentPass {
    window: WindowId,
    render_pass: RenderPassHandle,
    command_buffer: CommandBufferHandle,
}

impl PresentPass {
    pub fn new<D: GpuDevice>(
        device: &mut D,
        window: WindowId,
        source: TextureHandle,
        frame_count: u16,
    ) -> Result<Self> {
        let render_pass = device.create_render_pass(&RenderPassDescriptor::window("present_pass", window))?;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some("present_pipeline"),
            render_pass,
            vertex: ShaderStage::new("present", "vs_main"),
            fragment: ShaderStage::new("present", "fs_main"),
            vertex_layout: None,
            topology: PrimitiveTopology::TriangleStrip,
            rasterizer: RasterizerState::NO_CULL,
            depth: DepthTest::None,
            blend: ColorBlend::Replace,
            resource_sets: vec![vec![ResourceLayoutEntry::texture(0), ResourceLayoutEntry::sampler(1)]],
        })?;

        let recordings: Vec<CommandList> = (0..frame_count.max(1))
            .map(|_| {
                let mut list = CommandList::new();
                list.barrier(source);
                list.begin(render_pass);
                list.bind_pipeline(pipeline);
                list.bind_resource_set(
                    0,
                    ShaderResourceSet::new()
                        .bind_texture(0, source)
                        .bind_sampler(1, SamplerKind::LinearClamp),
                );
                list.draw(4, 1, 0, 0);
                list.end();
                list
            })
            .collect();
        let command_buffer = device.create_command_buffer(&recordings)?;
        log::debug!("present pass for window {} with {} frame recordings", window.0, recordings.len());
        Ok(Self { window, render_pass, command_buffer })
    }

    pub fn window(&self) -> WindowId { self.window }
    pub fn render_pass(&self) -> RenderPassHandle { self.render_pass }
    pub fn command_buffer(&self) -> CommandBufferHandle { self.command_buffer }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_api::{Command, RecordingDevice, RenderTarget, TextureDescriptor, TextureFormat};

    #[test]
    fn one_recording_per_frame_in_flight() {
        let mut device = RecordingDevice::with_windows(&[(320, 240), (640, 480)]);
        let source = device
            .create_texture(&TextureDescriptor::render_target("offscreen", (640, 480), TextureFormat::Rgba8Unorm))
            .unwrap();
        let pass = PresentPass::new(&mut device, WindowId(1), source, 3).unwrap();
        let recordings = device.primary_recordings(pass.command_buffer()).unwrap();
        assert_eq!(recordings.len(), 3);
        for list in recordings {
            assert_eq!(list.commands()[0], Command::Barrier(source));
            assert!(list.commands().contains(&Command::Draw {
                vertex_count: 4,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            }));
        }
        assert_eq!(
            device.render_pass(pass.render_pass()).unwrap().target,
            RenderTarget::Window(WindowId(1))
        );
    }

    #[test]
    fn unknown_window_fails() {
        let mut device = RecordingDevice::with_windows(&[(320, 240)]);
        let result = PresentPass::new(&mut device, WindowId(4), TextureHandle(1), 2);
        assert!(result.is_err());
    }
}
