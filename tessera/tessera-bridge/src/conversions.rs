//! Conversions from render-api descriptor types to their wgpu counterparts.

use render_api::{
    BufferUsage, ClearColor, ColorBlend, CullMode, FrontFace, PrimitiveTopology, ResourceKind, ResourceLayoutEntry,
    ShaderStages, TextureFormat, TextureUsage, VertexFormat,
};

/// Local conversion trait; the orphan rule rules out `From` impls between two foreign crates.
pub(crate) trait IntoWgpu<T> {
    fn into_wgpu(self) -> T;
}

impl IntoWgpu<wgpu::TextureFormat> for TextureFormat {
    fn into_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

impl IntoWgpu<wgpu::TextureUsages> for TextureUsage {
    fn into_wgpu(self) -> wgpu::TextureUsages {
        let mut usages = wgpu::TextureUsages::empty();
        if self.contains(TextureUsage::COPY_DST) {
            usages |= wgpu::TextureUsages::COPY_DST;
        }
        if self.contains(TextureUsage::SAMPLED) {
            usages |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if self.contains(TextureUsage::RENDER_TARGET) {
            usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        usages
    }
}

/// Every buffer is written through the queue, so `COPY_DST` is always set.
impl IntoWgpu<wgpu::BufferUsages> for BufferUsage {
    fn into_wgpu(self) -> wgpu::BufferUsages {
        let mut usages = wgpu::BufferUsages::COPY_DST;
        if self.contains(BufferUsage::VERTEX) {
            usages |= wgpu::BufferUsages::VERTEX;
        }
        if self.contains(BufferUsage::INDEX) {
            usages |= wgpu::BufferUsages::INDEX;
        }
        if self.contains(BufferUsage::UNIFORM) {
            usages |= wgpu::BufferUsages::UNIFORM;
        }
        usages
    }
}

impl IntoWgpu<wgpu::VertexFormat> for VertexFormat {
    fn into_wgpu(self) -> wgpu::VertexFormat {
        match self {
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }
}

impl IntoWgpu<wgpu::PrimitiveTopology> for PrimitiveTopology {
    fn into_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

impl IntoWgpu<Option<wgpu::Face>> for CullMode {
    fn into_wgpu(self) -> Option<wgpu::Face> {
        match self {
            CullMode::None => None,
            CullMode::Back => Some(wgpu::Face::Back),
            CullMode::Front => Some(wgpu::Face::Front),
        }
    }
}

impl IntoWgpu<wgpu::FrontFace> for FrontFace {
    fn into_wgpu(self) -> wgpu::FrontFace {
        match self {
            FrontFace::CounterClockwise => wgpu::FrontFace::Ccw,
            FrontFace::Clockwise => wgpu::FrontFace::Cw,
        }
    }
}

impl IntoWgpu<wgpu::BlendState> for ColorBlend {
    fn into_wgpu(self) -> wgpu::BlendState {
        match self {
            ColorBlend::Replace => wgpu::BlendState::REPLACE,
            ColorBlend::AlphaBlend => wgpu::BlendState::ALPHA_BLENDING,
        }
    }
}

impl IntoWgpu<wgpu::ShaderStages> for ShaderStages {
    fn into_wgpu(self) -> wgpu::ShaderStages {
        let mut stages = wgpu::ShaderStages::NONE;
        if self.contains(ShaderStages::VERTEX) {
            stages |= wgpu::ShaderStages::VERTEX;
        }
        if self.contains(ShaderStages::FRAGMENT) {
            stages |= wgpu::ShaderStages::FRAGMENT;
        }
        stages
    }
}

impl IntoWgpu<wgpu::Color> for ClearColor {
    fn into_wgpu(self) -> wgpu::Color {
        wgpu::Color { r: self.r, g: self.g, b: self.b, a: self.a }
    }
}

impl IntoWgpu<wgpu::BindGroupLayoutEntry> for ResourceLayoutEntry {
    fn into_wgpu(self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            ResourceKind::UniformBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            ResourceKind::SampledTexture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            ResourceKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: self.stages.into_wgpu(),
            ty,
            count: None,
        }
    }
}

/// Buffer size rounded up to the copy alignment, never zero.
pub(crate) fn padded_len(len: u64) -> u64 {
    len.max(1).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}
