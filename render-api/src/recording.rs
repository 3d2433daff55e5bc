//! In-memory [`GpuDevice`] that records every call. Used for headless runs and tests: it keeps
//! buffer contents and command recordings so callers can inspect exactly what a renderer did.

use std::collections::HashMap;

use crate::command::{Command, CommandList, SubCommandList};
use crate::device::{
    BufferDescriptor, BufferHandle, CommandBufferHandle, DeviceError, GpuDevice, GraphicsPipelineDescriptor,
    PipelineHandle, RenderPassDescriptor, RenderPassHandle, RenderTarget, ResourceId, TextureDescriptor,
    TextureHandle, WindowId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    CreateTexture(TextureHandle),
    WriteTexture(TextureHandle),
    DestroyTexture(TextureHandle),
    CreateBuffer(BufferHandle),
    WriteBuffer(BufferHandle),
    DestroyBuffer(BufferHandle),
    CreateRenderPass(RenderPassHandle),
    CreatePipeline(PipelineHandle),
    CreateCommandBuffer(CommandBufferHandle),
    UpdateCommandBuffer(CommandBufferHandle),
    CreateSubCommandBuffer(CommandBufferHandle),
    DestroyCommandBuffer(CommandBufferHandle),
    Execute(CommandBufferHandle),
    Present,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recording {
    Primary(Vec<CommandList>),
    Sub(SubCommandList),
}

#[derive(Debug)]
struct TextureRecord {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

#[derive(Debug)]
struct BufferRecord {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RecordingDevice {
    windows: Vec<(u32, u32)>,
    next_id: ResourceId,
    textures: HashMap<ResourceId, TextureRecord>,
    buffers: HashMap<ResourceId, BufferRecord>,
    render_passes: HashMap<ResourceId, RenderPassDescriptor>,
    pipelines: HashMap<ResourceId, GraphicsPipelineDescriptor>,
    command_buffers: HashMap<ResourceId, Recording>,
    calls: Vec<DeviceCall>,
    frames_presented: u64,
    fail_creation: bool,
}

impl RecordingDevice {
    /// Device with one window per entry of `sizes`.
    pub fn with_windows(sizes: &[(u32, u32)]) -> Self {
        Self {
            windows: sizes.to_vec(),
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn windows(&self) -> Vec<WindowId> {
        (0..self.windows.len() as u32).map(WindowId).collect()
    }

    /// While set, every create call fails.
    pub fn set_fail_creation(&mut self, fail: bool) {
        self.fail_creation = fail;
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Command buffers passed to `execute`, in call order.
    pub fn executed(&self) -> Vec<CommandBufferHandle> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Execute(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    pub fn count_calls(&self, call: DeviceCall) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    /// Buffer contents read back as `T` values. Trailing bytes that do not fill a `T` are skipped.
    pub fn buffer_values<T: bytemuck::Pod>(&self, buffer: BufferHandle) -> Option<Vec<T>> {
        let data = self.buffer_data(buffer)?;
        Some(
            data.chunks_exact(std::mem::size_of::<T>())
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        )
    }

    /// The first `T` stored in the buffer.
    pub fn buffer_value<T: bytemuck::Pod>(&self, buffer: BufferHandle) -> Option<T> {
        let data = self.buffer_data(buffer)?;
        data.get(..std::mem::size_of::<T>()).map(bytemuck::pod_read_unaligned)
    }

    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.0).map(|b| &b.desc)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|t| t.data.as_slice())
    }

    pub fn render_pass(&self, pass: RenderPassHandle) -> Option<&RenderPassDescriptor> {
        self.render_passes.get(&pass.0)
    }

    pub fn pipeline(&self, pipeline: PipelineHandle) -> Option<&GraphicsPipelineDescriptor> {
        self.pipelines.get(&pipeline.0)
    }

    pub fn recording(&self, command_buffer: CommandBufferHandle) -> Option<&Recording> {
        self.command_buffers.get(&command_buffer.0)
    }

    /// Recordings of a top-level command buffer, one per frame in flight.
    pub fn primary_recordings(&self, command_buffer: CommandBufferHandle) -> Option<&[CommandList]> {
        match self.command_buffers.get(&command_buffer.0) {
            Some(Recording::Primary(lists)) => Some(lists),
            _ => None,
        }
    }

    pub fn sub_recording(&self, command_buffer: CommandBufferHandle) -> Option<&SubCommandList> {
        match self.command_buffers.get(&command_buffer.0) {
            Some(Recording::Sub(list)) => Some(list),
            _ => None,
        }
    }

    pub fn contains_buffer(&self, buffer: BufferHandle) -> bool {
        self.buffers.contains_key(&buffer.0)
    }

    pub fn contains_command_buffer(&self, command_buffer: CommandBufferHandle) -> bool {
        self.command_buffers.contains_key(&command_buffer.0)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn allocate(&mut self, what: &'static str) -> Result<ResourceId, DeviceError> {
        if self.fail_creation {
            return Err(DeviceError::Creation {
                what,
                reason: "creation disabled on recording device".to_string(),
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn check_pass(&self, pass: RenderPassHandle) -> Result<(), DeviceError> {
        if self.render_passes.contains_key(&pass.0) {
            Ok(())
        } else {
            Err(DeviceError::unknown("render pass", pass.0))
        }
    }

    fn check_commands(&self, commands: &[Command]) -> Result<(), DeviceError> {
        for command in commands {
            match command {
                Command::BeginRenderPass(pass) => self.check_pass(*pass)?,
                Command::BindPipeline(p) if !self.pipelines.contains_key(&p.0) => {
                    return Err(DeviceError::unknown("pipeline", p.0));
                }
                Command::BindVertexBuffer(b) | Command::BindIndexBuffer(b) if !self.buffers.contains_key(&b.0) => {
                    return Err(DeviceError::unknown("buffer", b.0));
                }
                Command::ExecuteSubCommand(h) => match self.command_buffers.get(&h.0) {
                    Some(Recording::Sub(_)) => {}
                    _ => return Err(DeviceError::unknown("sub command buffer", h.0)),
                },
                _ => {}
            }
        }
        Ok(())
    }
}

impl GpuDevice for RecordingDevice {
    fn window_size(&self, window: WindowId) -> Result<(u32, u32), DeviceError> {
        self.windows
            .get(window.0 as usize)
            .copied()
            .ok_or(DeviceError::UnknownWindow(window.0))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle, DeviceError> {
        let id = self.allocate("texture")?;
        let data = vec![0; desc.byte_len() as usize];
        self.textures.insert(id, TextureRecord { desc: desc.clone(), data });
        self.calls.push(DeviceCall::CreateTexture(TextureHandle(id)));
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), DeviceError> {
        let record = self
            .textures
            .get_mut(&texture.0)
            .ok_or(DeviceError::unknown("texture", texture.0))?;
        if data.len() as u64 != record.desc.byte_len() {
            return Err(DeviceError::WriteOutOfBounds {
                what: "texture",
                len: data.len() as u64,
                capacity: record.desc.byte_len(),
            });
        }
        record.data.copy_from_slice(data);
        self.calls.push(DeviceCall::WriteTexture(texture));
        Ok(())
    }

    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), DeviceError> {
        self.textures
            .get(&texture.0)
            .map(|t| t.desc.size)
            .ok_or(DeviceError::unknown("texture", texture.0))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), DeviceError> {
        self.textures
            .remove(&texture.0)
            .ok_or(DeviceError::unknown("texture", texture.0))?;
        self.calls.push(DeviceCall::DestroyTexture(texture));
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle, DeviceError> {
        let id = self.allocate("buffer")?;
        let data = vec![0; desc.size as usize];
        self.buffers.insert(id, BufferRecord { desc: desc.clone(), data });
        self.calls.push(DeviceCall::CreateBuffer(BufferHandle(id)));
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), DeviceError> {
        let record = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(DeviceError::unknown("buffer", buffer.0))?;
        if data.len() as u64 > record.desc.size {
            return Err(DeviceError::WriteOutOfBounds {
                what: "buffer",
                len: data.len() as u64,
                capacity: record.desc.size,
            });
        }
        record.data[..data.len()].copy_from_slice(data);
        self.calls.push(DeviceCall::WriteBuffer(buffer));
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), DeviceError> {
        self.buffers
            .remove(&buffer.0)
            .ok_or(DeviceError::unknown("buffer", buffer.0))?;
        self.calls.push(DeviceCall::DestroyBuffer(buffer));
        Ok(())
    }

    fn create_render_pass(&mut self, desc: &RenderPassDescriptor) -> Result<RenderPassHandle, DeviceError> {
        match &desc.target {
            RenderTarget::Textures { colors, depth } => {
                for t in colors.iter().chain(depth.iter()) {
                    if !self.textures.contains_key(&t.0) {
                        return Err(DeviceError::unknown("texture", t.0));
                    }
                }
            }
            RenderTarget::Window(w) => {
                self.window_size(*w)?;
            }
        }
        let id = self.allocate("render pass")?;
        self.render_passes.insert(id, desc.clone());
        self.calls.push(DeviceCall::CreateRenderPass(RenderPassHandle(id)));
        Ok(RenderPassHandle(id))
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineHandle, DeviceError> {
        self.check_pass(desc.render_pass)?;
        let id = self.allocate("pipeline")?;
        self.pipelines.insert(id, desc.clone());
        self.calls.push(DeviceCall::CreatePipeline(PipelineHandle(id)));
        Ok(PipelineHandle(id))
    }

    fn create_command_buffer(&mut self, recordings: &[CommandList]) -> Result<CommandBufferHandle, DeviceError> {
        for list in recordings {
            self.check_commands(list.commands())?;
        }
        let id = self.allocate("command buffer")?;
        self.command_buffers.insert(id, Recording::Primary(recordings.to_vec()));
        self.calls.push(DeviceCall::CreateCommandBuffer(CommandBufferHandle(id)));
        Ok(CommandBufferHandle(id))
    }

    fn update_command_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        recording: &CommandList,
    ) -> Result<(), DeviceError> {
        self.check_commands(recording.commands())?;
        match self.command_buffers.get_mut(&command_buffer.0) {
            Some(Recording::Primary(lists)) => {
                let frames = lists.len().max(1);
                *lists = vec![recording.clone(); frames];
            }
            _ => return Err(DeviceError::unknown("command buffer", command_buffer.0)),
        }
        self.calls.push(DeviceCall::UpdateCommandBuffer(command_buffer));
        Ok(())
    }

    fn create_sub_command_buffer(&mut self, recording: &SubCommandList) -> Result<CommandBufferHandle, DeviceError> {
        self.check_pass(recording.render_pass())?;
        self.check_commands(recording.commands())?;
        let id = self.allocate("sub command buffer")?;
        self.command_buffers.insert(id, Recording::Sub(recording.clone()));
        self.calls.push(DeviceCall::CreateSubCommandBuffer(CommandBufferHandle(id)));
        Ok(CommandBufferHandle(id))
    }

    fn destroy_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> Result<(), DeviceError> {
        self.command_buffers
            .remove(&command_buffer.0)
            .ok_or(DeviceError::unknown("command buffer", command_buffer.0))?;
        self.calls.push(DeviceCall::DestroyCommandBuffer(command_buffer));
        Ok(())
    }

    /// Fails when the recording references a sub command buffer that no longer exists.
    fn execute(&mut self, command_buffer: CommandBufferHandle) -> Result<(), DeviceError> {
        let frame = self.frames_presented;
        let list = match self.command_buffers.get(&command_buffer.0) {
            Some(Recording::Primary(lists)) if !lists.is_empty() => {
                lists[(frame % lists.len() as u64) as usize].clone()
            }
            Some(Recording::Primary(_)) => return Ok(()),
            Some(Recording::Sub(_)) => {
                return Err(DeviceError::Unsupported(
                    "sub command buffers run inside a top-level command buffer".to_string(),
                ))
            }
            None => return Err(DeviceError::unknown("command buffer", command_buffer.0)),
        };
        self.check_commands(list.commands())?;
        self.calls.push(DeviceCall::Execute(command_buffer));
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        self.frames_presented += 1;
        self.calls.push(DeviceCall::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordDraws;
    use crate::device::{LoadOp, TextureFormat};

    fn pass(device: &mut RecordingDevice) -> RenderPassHandle {
        let target = device
            .create_texture(&TextureDescriptor::render_target("rt", (4, 4), TextureFormat::Rgba8Unorm))
            .unwrap();
        device
            .create_render_pass(&RenderPassDescriptor::textures("pass", vec![target], None, LoadOp::Load))
            .unwrap()
    }

    #[test]
    fn writes_are_stored() {
        let mut device = RecordingDevice::with_windows(&[(8, 8)]);
        let buffer = device.create_buffer(&BufferDescriptor::uniform::<[u32; 4]>("ub")).unwrap();
        device.write_slice(buffer, &[1u32, 2]).unwrap();
        let data: &[u32] = bytemuck::cast_slice(device.buffer_data(buffer).unwrap());
        assert_eq!(data, &[1, 2, 0, 0]);
        assert!(device.write_slice(buffer, &[0u32; 5]).is_err());
    }

    #[test]
    fn double_destroy_is_an_error() {
        let mut device = RecordingDevice::with_windows(&[(8, 8)]);
        let buffer = device.create_buffer(&BufferDescriptor::index("ib", 6)).unwrap();
        device.destroy_buffer(buffer).unwrap();
        assert_eq!(
            device.destroy_buffer(buffer),
            Err(DeviceError::unknown("buffer", buffer.0))
        );
        assert_eq!(device.count_calls(DeviceCall::DestroyBuffer(buffer)), 1);
    }

    #[test]
    fn execute_rejects_dangling_sub_commands() {
        let mut device = RecordingDevice::with_windows(&[(8, 8)]);
        let pass = pass(&mut device);
        let sub = device.create_sub_command_buffer(&SubCommandList::new(pass)).unwrap();
        let mut list = CommandList::new();
        list.begin(pass);
        list.execute_sub_command(sub);
        list.end();
        let primary = device.create_command_buffer(&[list]).unwrap();
        device.execute(primary).unwrap();
        device.destroy_command_buffer(sub).unwrap();
        assert!(device.execute(primary).is_err());
        assert_eq!(device.executed(), vec![primary]);
    }

    #[test]
    fn update_replaces_every_frame() {
        let mut device = RecordingDevice::with_windows(&[(8, 8)]);
        let pass = pass(&mut device);
        let primary = device
            .create_command_buffer(&[CommandList::new(), CommandList::new(), CommandList::new()])
            .unwrap();
        let mut list = CommandList::new();
        list.begin(pass);
        list.draw(3, 1, 0, 0);
        list.end();
        device.update_command_buffer(primary, &list).unwrap();
        let lists = device.primary_recordings(primary).unwrap();
        assert_eq!(lists.len(), 3);
        assert!(lists.iter().all(|l| *l == list));
    }

    #[test]
    fn failing_creation() {
        let mut device = RecordingDevice::with_windows(&[(8, 8)]);
        device.set_fail_creation(true);
        assert!(matches!(
            device.create_buffer(&BufferDescriptor::index("ib", 6)),
            Err(DeviceError::Creation { .. })
        ));
        assert!(device.calls().is_empty());
    }
}
