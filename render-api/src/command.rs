//! Command recordings handed to [`crate::GpuDevice`]. Recordings are plain data: building one
//! never touches the GPU, which keeps "what to draw" testable without a device.

use crate::device::{BufferHandle, CommandBufferHandle, PipelineHandle, RenderPassHandle, TextureHandle};

/// Device-owned sampler presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    LinearRepeat,
    LinearClamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Sampler(SamplerKind),
}

/// Resources bound to one set, keyed by binding slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderResourceSet {
    bindings: Vec<(u32, Binding)>,
}

impl ShaderResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_buffer(self, slot: u32, buffer: BufferHandle) -> Self {
        self.bind(slot, Binding::Buffer(buffer))
    }

    pub fn bind_texture(self, slot: u32, texture: TextureHandle) -> Self {
        self.bind(slot, Binding::Texture(texture))
    }

    pub fn bind_sampler(self, slot: u32, sampler: SamplerKind) -> Self {
        self.bind(slot, Binding::Sampler(sampler))
    }

    /// Rebinding a slot replaces the previous resource.
    pub fn bind(mut self, slot: u32, binding: Binding) -> Self {
        match self.bindings.iter_mut().find(|(s, _)| *s == slot) {
            Some(entry) => entry.1 = binding,
            None => self.bindings.push((slot, binding)),
        }
        self
    }

    pub fn get(&self, slot: u32) -> Option<Binding> {
        self.bindings.iter().find(|(s, _)| *s == slot).map(|(_, b)| *b)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Binding)> + '_ {
        self.bindings.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Make a render target readable by later passes.
    Barrier(TextureHandle),
    BeginRenderPass(RenderPassHandle),
    EndRenderPass,
    BindPipeline(PipelineHandle),
    BindVertexBuffer(BufferHandle),
    BindIndexBuffer(BufferHandle),
    BindResourceSet { set: u32, resources: ShaderResourceSet },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    ExecuteSubCommand(CommandBufferHandle),
}

/// Draw-state commands shared by top-level and sub command lists.
pub trait RecordDraws {
    fn push(&mut self, command: Command);

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.push(Command::BindPipeline(pipeline));
    }

    fn bind_buffers(&mut self, vertex: BufferHandle, index: BufferHandle) {
        self.push(Command::BindVertexBuffer(vertex));
        self.push(Command::BindIndexBuffer(index));
    }

    fn bind_vertex_buffer(&mut self, vertex: BufferHandle) {
        self.push(Command::BindVertexBuffer(vertex));
    }

    fn bind_resource_set(&mut self, set: u32, resources: ShaderResourceSet) {
        self.push(Command::BindResourceSet { set, resources });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }
}

/// Recording for a top-level command buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn barrier(&mut self, texture: TextureHandle) {
        self.commands.push(Command::Barrier(texture));
    }

    pub fn begin(&mut self, pass: RenderPassHandle) {
        self.commands.push(Command::BeginRenderPass(pass));
    }

    pub fn end(&mut self) {
        self.commands.push(Command::EndRenderPass);
    }

    pub fn execute_sub_command(&mut self, sub_command: CommandBufferHandle) {
        self.commands.push(Command::ExecuteSubCommand(sub_command));
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sub command buffers referenced by this recording, in execution order.
    pub fn sub_commands(&self) -> impl Iterator<Item = CommandBufferHandle> + '_ {
        self.commands.iter().filter_map(|c| match c {
            Command::ExecuteSubCommand(h) => Some(*h),
            _ => None,
        })
    }
}

impl RecordDraws for CommandList {
    fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
}

/// Recording for a sub command buffer, tied to the render pass it will execute in.
#[derive(Debug, Clone, PartialEq)]
pub struct SubCommandList {
    render_pass: RenderPassHandle,
    commands: Vec<Command>,
}

impl SubCommandList {
    pub fn new(render_pass: RenderPassHandle) -> Self {
        Self {
            render_pass,
            commands: Vec::new(),
        }
    }

    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl RecordDraws for SubCommandList {
    fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
}
