//! GPU device facade: opaque handles, resource descriptors and the [`GpuDevice`] trait.
//! Renderers only talk to the GPU through this trait, so they can run against a real backend
//! or against [`crate::RecordingDevice`].

use crate::command::{CommandList, SubCommandList};

/// Unique identifier for a GPU resource.
pub type ResourceId = u64;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub ResourceId);
    };
}

handle!(
    /// Texture or render target.
    TextureHandle
);
handle!(BufferHandle);
handle!(RenderPassHandle);
handle!(PipelineHandle);
handle!(
    /// Top-level or sub command buffer.
    CommandBufferHandle
);

/// Output window known to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: ResourceId },
    #[error("unknown window {0}")]
    UnknownWindow(u32),
    #[error("failed to create {what}: {reason}")]
    Creation { what: &'static str, reason: String },
    #[error("write of {len} bytes exceeds {what} capacity of {capacity} bytes")]
    WriteOutOfBounds {
        what: &'static str,
        len: u64,
        capacity: u64,
    },
    #[error("no shader named `{0}`")]
    UnknownShader(String),
    #[error("surface: {0}")]
    Surface(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DeviceError {
    pub fn unknown(kind: &'static str, id: ResourceId) -> Self {
        Self::UnknownHandle { kind, id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_DST = 1 << 0;
        const SAMPLED = 1 << 1;
        const RENDER_TARGET = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Buffer usage flags. Every buffer is writable through [`GpuDevice::write_buffer`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<&'static str>,
    pub size: (u32, u32),
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: (1, 1),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        }
    }
}

impl TextureDescriptor {
    /// Color or depth attachment that later passes can sample.
    pub fn render_target(label: &'static str, size: (u32, u32), format: TextureFormat) -> Self {
        Self {
            label: Some(label),
            size,
            format,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
        }
    }

    /// Texture filled from the CPU with [`GpuDevice::write_texture`].
    pub fn sampled(label: &'static str, size: (u32, u32), format: TextureFormat) -> Self {
        Self {
            label: Some(label),
            size,
            format,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        }
    }

    pub fn byte_len(&self) -> u64 {
        self.size.0 as u64 * self.size.1 as u64 * self.format.bytes_per_pixel() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDescriptor {
    pub label: Option<&'static str>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn vertex<T>(label: &'static str, count: usize) -> Self {
        Self {
            label: Some(label),
            size: (std::mem::size_of::<T>() * count) as u64,
            usage: BufferUsage::VERTEX,
        }
    }

    /// u32 index buffer.
    pub fn index(label: &'static str, count: usize) -> Self {
        Self {
            label: Some(label),
            size: (std::mem::size_of::<u32>() * count) as u64,
            usage: BufferUsage::INDEX,
        }
    }

    pub fn uniform<T>(label: &'static str) -> Self {
        Self {
            label: Some(label),
            size: std::mem::size_of::<T>() as u64,
            usage: BufferUsage::UNIFORM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    pub const TRANSPARENT: Self = Self { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };
    pub const BLACK: Self = Self { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };

    pub fn splat(v: f64) -> Self {
        Self { r: v, g: v, b: v, a: v }
    }
}

/// What happens to attachment contents when a pass begins. Depth attachments are always cleared
/// to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear(ClearColor),
    Load,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderTarget {
    Textures {
        colors: Vec<TextureHandle>,
        depth: Option<TextureHandle>,
    },
    /// The window's current swapchain image, acquired by the device on first use in a frame.
    Window(WindowId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDescriptor {
    pub label: Option<&'static str>,
    pub target: RenderTarget,
    pub load: LoadOp,
}

impl RenderPassDescriptor {
    pub fn textures(
        label: &'static str,
        colors: Vec<TextureHandle>,
        depth: Option<TextureHandle>,
        load: LoadOp,
    ) -> Self {
        Self {
            label: Some(label),
            target: RenderTarget::Textures { colors, depth },
            load,
        }
    }

    pub fn window(label: &'static str, window: WindowId) -> Self {
        Self {
            label: Some(label),
            target: RenderTarget::Window(window),
            load: LoadOp::Clear(ClearColor::BLACK),
        }
    }
}

/// Shader entry point, resolved by name inside the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStage {
    pub shader: &'static str,
    pub entry_point: &'static str,
}

impl ShaderStage {
    pub const fn new(shader: &'static str, entry_point: &'static str) -> Self {
        Self { shader, entry_point }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Tightly packed layout with consecutive locations starting at 0.
    pub fn packed(formats: &[VertexFormat]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, &format)| {
                let attribute = VertexAttribute {
                    location: location as u32,
                    format,
                    offset,
                };
                offset += format.size();
                attribute
            })
            .collect();
        Self { stride: offset, attributes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
}

impl RasterizerState {
    pub const NO_CULL: Self = Self {
        cull_mode: CullMode::None,
        front_face: FrontFace::CounterClockwise,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthTest {
    /// No depth test or write.
    #[default]
    None,
    /// Test with less-or-equal and write.
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorBlend {
    #[default]
    Replace,
    AlphaBlend,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBuffer,
    /// Filterable float texture.
    SampledTexture,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLayoutEntry {
    pub binding: u32,
    pub kind: ResourceKind,
    pub stages: ShaderStages,
}

impl ResourceLayoutEntry {
    pub fn uniform(binding: u32, stages: ShaderStages) -> Self {
        Self { binding, kind: ResourceKind::UniformBuffer, stages }
    }

    pub fn texture(binding: u32) -> Self {
        Self { binding, kind: ResourceKind::SampledTexture, stages: ShaderStages::FRAGMENT }
    }

    pub fn sampler(binding: u32) -> Self {
        Self { binding, kind: ResourceKind::Sampler, stages: ShaderStages::FRAGMENT }
    }
}

/// Graphics pipeline for one render pass. Color target formats come from the pass, so the
/// pipeline is only valid inside passes created from the same descriptor shape.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<&'static str>,
    pub render_pass: RenderPassHandle,
    pub vertex: ShaderStage,
    pub fragment: ShaderStage,
    /// None for pipelines that generate vertices from the vertex index.
    pub vertex_layout: Option<VertexLayout>,
    pub topology: PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub depth: DepthTest,
    pub blend: ColorBlend,
    /// One entry list per resource set, indexed by set number.
    pub resource_sets: Vec<Vec<ResourceLayoutEntry>>,
}

/// Backend-agnostic device used by the scene renderer. Single-threaded: every mutating call
/// takes `&mut self`.
pub trait GpuDevice {
    fn window_size(&self, window: WindowId) -> Result<(u32, u32), DeviceError>;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle, DeviceError>;
    /// Replaces the whole texture; `data` is tightly packed rows.
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), DeviceError>;
    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), DeviceError>;
    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), DeviceError>;

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle, DeviceError>;
    /// Writes `data` at offset 0.
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), DeviceError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), DeviceError>;

    fn create_render_pass(&mut self, desc: &RenderPassDescriptor) -> Result<RenderPassHandle, DeviceError>;
    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineHandle, DeviceError>;

    /// Top-level command buffer with one recording per frame in flight. A single recording is
    /// used for every frame.
    fn create_command_buffer(&mut self, recordings: &[CommandList]) -> Result<CommandBufferHandle, DeviceError>;
    /// Replaces every recording of a top-level command buffer with `recording`.
    fn update_command_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        recording: &CommandList,
    ) -> Result<(), DeviceError>;
    /// Reusable draw sequence for one render pass, referenced from top-level recordings.
    fn create_sub_command_buffer(&mut self, recording: &SubCommandList) -> Result<CommandBufferHandle, DeviceError>;
    fn destroy_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> Result<(), DeviceError>;

    fn execute(&mut self, command_buffer: CommandBufferHandle) -> Result<(), DeviceError>;
    /// Presents every window image acquired since the last call and advances the frame index.
    fn present(&mut self) -> Result<(), DeviceError>;

    fn write_value<T: bytemuck::Pod>(&mut self, buffer: BufferHandle, value: &T) -> Result<(), DeviceError>
    where
        Self: Sized,
    {
        self.write_buffer(buffer, bytemuck::bytes_of(value))
    }

    fn write_slice<T: bytemuck::Pod>(&mut self, buffer: BufferHandle, values: &[T]) -> Result<(), DeviceError>
    where
        Self: Sized,
    {
        self.write_buffer(buffer, bytemuck::cast_slice(values))
    }
}
