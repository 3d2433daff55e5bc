//! Shared render API for Tessera.
//! Scene component types observed by the renderer, the weak component references it holds, and
//! the `GpuDevice` facade every backend implements.

mod command;
mod component;
mod device;
mod recording;
mod scene;

pub use command::{Binding, Command, CommandList, RecordDraws, SamplerKind, ShaderResourceSet, SubCommandList};
pub use component::{Component, ComponentId, ComponentRef};
pub use device::{
    BufferDescriptor, BufferHandle, BufferUsage, ClearColor, ColorBlend, CommandBufferHandle, CullMode, DepthTest,
    DeviceError, FrontFace, GpuDevice, GraphicsPipelineDescriptor, LoadOp, PipelineHandle, PrimitiveTopology,
    RasterizerState, RenderPassDescriptor, RenderPassHandle, RenderTarget, ResourceId, ResourceKind,
    ResourceLayoutEntry, ShaderStage, ShaderStages, TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
    VertexAttribute, VertexFormat, VertexLayout, WindowId,
};
pub use recording::{DeviceCall, Recording, RecordingDevice};
pub use scene::{
    Bone, CameraComponent, LightComponent, LightKind, MaterialComponent, MeshComponent, Pivot, SkinnedMeshComponent,
    SpriteComponent, Transform, Vertex,
};
