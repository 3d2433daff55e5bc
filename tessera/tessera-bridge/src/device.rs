//! `GpuDevice` on wgpu. Resources live in id-keyed maps; top-level command buffers keep their
//! recordings and are encoded into a fresh `CommandEncoder` on every `execute`, while sub command
//! buffers are baked into render bundles when they are created.

use std::collections::HashMap;
use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{
    Binding, BufferDescriptor, BufferHandle, Command, CommandBufferHandle, CommandList, DepthTest, DeviceError,
    GpuDevice, GraphicsPipelineDescriptor, LoadOp, PipelineHandle, RenderPassDescriptor, RenderPassHandle,
    RenderTarget, ResourceId, SamplerKind, ShaderResourceSet, SubCommandList, TextureDescriptor, TextureHandle,
    WindowId,
};

use crate::config::BridgeConfig;
use crate::conversions::{padded_len, IntoWgpu};
use crate::shaders;

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct BufferEntry {
    buffer: wgpu::Buffer,
    /// Size requested by the caller; the wgpu buffer may be padded past it.
    size: u64,
}

struct RenderPassEntry {
    desc: RenderPassDescriptor,
    color_formats: Vec<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
}

struct PipelineEntry {
    pipeline: wgpu::RenderPipeline,
    /// One layout per resource set.
    layouts: Vec<wgpu::BindGroupLayout>,
}

enum CommandBufferEntry {
    Primary(Vec<CommandList>),
    Bundle(wgpu::RenderBundle),
}

struct AcquiredFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

struct WindowSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    frame: Option<AcquiredFrame>,
}

struct Samplers {
    linear_repeat: wgpu::Sampler,
    linear_clamp: wgpu::Sampler,
}

impl Samplers {
    fn new(device: &wgpu::Device) -> Self {
        let linear = |label, address_mode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            })
        };
        Self {
            linear_repeat: linear("linear_repeat_sampler", wgpu::AddressMode::Repeat),
            linear_clamp: linear("linear_clamp_sampler", wgpu::AddressMode::ClampToEdge),
        }
    }

    fn get(&self, kind: SamplerKind) -> &wgpu::Sampler {
        match kind {
            SamplerKind::LinearRepeat => &self.linear_repeat,
            SamplerKind::LinearClamp => &self.linear_clamp,
        }
    }
}

/// wgpu-backed [`GpuDevice`]. Window `i` of the list given to [`WgpuDevice::new`] is `WindowId(i)`.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    windows: Vec<WindowSurface>,
    samplers: Samplers,
    shader_modules: HashMap<&'static str, wgpu::ShaderModule>,
    textures: HashMap<ResourceId, TextureEntry>,
    buffers: HashMap<ResourceId, BufferEntry>,
    render_passes: HashMap<ResourceId, RenderPassEntry>,
    pipelines: HashMap<ResourceId, PipelineEntry>,
    command_buffers: HashMap<ResourceId, CommandBufferEntry>,
    next_id: ResourceId,
    frame_index: u64,
}

fn surface_error(error: impl std::fmt::Display) -> DeviceError {
    DeviceError::Surface(error.to_string())
}

impl WgpuDevice {
    /// Creates one surface per window, picks an adapter compatible with the first one and
    /// configures every surface at its given size.
    pub fn new<W>(windows: Vec<(Arc<W>, (u32, u32))>, config: &BridgeConfig) -> Result<Self, DeviceError>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        pollster::block_on(Self::new_async(windows, config))
    }

    async fn new_async<W>(windows: Vec<(Arc<W>, (u32, u32))>, config: &BridgeConfig) -> Result<Self, DeviceError>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::default();
        let surfaces = windows
            .into_iter()
            .map(|(window, size)| instance.create_surface(window).map(|surface| (surface, size)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(surface_error)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: surfaces.first().map(|(surface, _)| surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| DeviceError::Creation {
                what: "adapter",
                reason: "no compatible adapter".to_string(),
            })?;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tessera_device"),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::Creation { what: "device", reason: e.to_string() })?;
        device.on_uncaptured_error(Box::new(|error: wgpu::Error| log::error!("wgpu: {error}")));

        let windows = surfaces
            .into_iter()
            .map(|(surface, (width, height))| {
                let caps = surface.get_capabilities(&adapter);
                let format = caps
                    .formats
                    .iter()
                    .copied()
                    .find(|format| format.is_srgb())
                    .or_else(|| caps.formats.first().copied())
                    .ok_or_else(|| surface_error("surface reports no formats"))?;
                let present_mode = if caps.present_modes.contains(&config.present_mode) {
                    config.present_mode
                } else {
                    log::warn!("present mode {:?} unsupported; using Fifo", config.present_mode);
                    wgpu::PresentMode::Fifo
                };
                let surface_config = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format,
                    width: width.max(1),
                    height: height.max(1),
                    present_mode,
                    alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
                    view_formats: vec![],
                    desired_maximum_frame_latency: config.frame_count.max(1),
                };
                surface.configure(&device, &surface_config);
                Ok(WindowSurface { surface, config: surface_config, frame: None })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        log::info!("wgpu device on {:?} with {} window(s)", adapter.get_info().backend, windows.len());
        Ok(Self {
            samplers: Samplers::new(&device),
            device,
            queue,
            windows,
            shader_modules: HashMap::new(),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            render_passes: HashMap::new(),
            pipelines: HashMap::new(),
            command_buffers: HashMap::new(),
            next_id: 1,
            frame_index: 0,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Reconfigures a window's surface. Offscreen targets keep their size.
    pub fn resize(&mut self, window: WindowId, size: (u32, u32)) -> Result<(), DeviceError> {
        let entry = self.windows.get_mut(window.0 as usize).ok_or(DeviceError::UnknownWindow(window.0))?;
        entry.frame = None;
        entry.config.width = size.0.max(1);
        entry.config.height = size.1.max(1);
        entry.surface.configure(&self.device, &entry.config);
        log::debug!("window {} resized to {}x{}", window.0, entry.config.width, entry.config.height);
        Ok(())
    }

    fn allocate_id(&mut self) -> ResourceId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Runs `create` inside a validation error scope and turns a captured error into
    /// `DeviceError::Creation`.
    fn scoped<T>(&self, what: &'static str, create: impl FnOnce() -> Result<T, DeviceError>) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(DeviceError::Creation { what, reason: error.to_string() }),
            None => value,
        }
    }

    fn window(&self, window: WindowId) -> Result<&WindowSurface, DeviceError> {
        self.windows.get(window.0 as usize).ok_or(DeviceError::UnknownWindow(window.0))
    }

    fn texture(&self, texture: TextureHandle) -> Result<&TextureEntry, DeviceError> {
        self.textures.get(&texture.0).ok_or(DeviceError::unknown("texture", texture.0))
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<&wgpu::Buffer, DeviceError> {
        self.buffers
            .get(&buffer.0)
            .map(|entry| &entry.buffer)
            .ok_or(DeviceError::unknown("buffer", buffer.0))
    }

    fn render_pass(&self, pass: RenderPassHandle) -> Result<&RenderPassEntry, DeviceError> {
        self.render_passes.get(&pass.0).ok_or(DeviceError::unknown("render pass", pass.0))
    }

    fn pipeline(&self, pipeline: PipelineHandle) -> Result<&PipelineEntry, DeviceError> {
        self.pipelines.get(&pipeline.0).ok_or(DeviceError::unknown("pipeline", pipeline.0))
    }

    fn bundle(&self, command_buffer: CommandBufferHandle) -> Result<&wgpu::RenderBundle, DeviceError> {
        match self.command_buffers.get(&command_buffer.0) {
            Some(CommandBufferEntry::Bundle(bundle)) => Ok(bundle),
            _ => Err(DeviceError::unknown("sub command buffer", command_buffer.0)),
        }
    }

    fn shader_module(&self, name: &str) -> Result<&wgpu::ShaderModule, DeviceError> {
        self.shader_modules.get(name).ok_or_else(|| DeviceError::UnknownShader(name.to_string()))
    }

    fn load_shader(&mut self, name: &'static str) -> Result<(), DeviceError> {
        if self.shader_modules.contains_key(name) {
            return Ok(());
        }
        let source = shaders::source(name).ok_or_else(|| DeviceError::UnknownShader(name.to_string()))?;
        let module = self.scoped("shader module", || {
            Ok(self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            }))
        })?;
        self.shader_modules.insert(name, module);
        Ok(())
    }

    fn build_pipeline(&self, desc: &GraphicsPipelineDescriptor) -> Result<PipelineEntry, DeviceError> {
        let pass = self.render_pass(desc.render_pass)?;
        let vertex_module = self.shader_module(desc.vertex.shader)?;
        let fragment_module = self.shader_module(desc.fragment.shader)?;

        let layouts: Vec<wgpu::BindGroupLayout> = desc
            .resource_sets
            .iter()
            .map(|set| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = set.iter().map(|entry| entry.into_wgpu()).collect();
                self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: desc.label,
                    entries: &entries,
                })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: desc.label,
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .vertex_layout
            .iter()
            .flat_map(|layout| layout.attributes.iter())
            .map(|attribute| wgpu::VertexAttribute {
                format: attribute.format.into_wgpu(),
                offset: attribute.offset as u64,
                shader_location: attribute.location,
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layout
            .iter()
            .map(|layout| wgpu::VertexBufferLayout {
                array_stride: layout.stride as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            })
            .collect();

        let blend: wgpu::BlendState = desc.blend.into_wgpu();
        let targets: Vec<Option<wgpu::ColorTargetState>> = pass
            .color_formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let depth_write = desc.depth == DepthTest::LessEqual;
        let depth_stencil = pass.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: depth_write,
            depth_compare: if depth_write { wgpu::CompareFunction::LessEqual } else { wgpu::CompareFunction::Always },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: desc.label,
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: vertex_module,
                entry_point: Some(desc.vertex.entry_point),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: fragment_module,
                entry_point: Some(desc.fragment.entry_point),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: desc.topology.into_wgpu(),
                front_face: desc.rasterizer.front_face.into_wgpu(),
                cull_mode: desc.rasterizer.cull_mode.into_wgpu(),
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        Ok(PipelineEntry { pipeline, layouts })
    }

    fn create_bind_group(
        &self,
        pipeline: PipelineHandle,
        set: u32,
        resources: &ShaderResourceSet,
    ) -> Result<wgpu::BindGroup, DeviceError> {
        let layout = self.pipeline(pipeline)?.layouts.get(set as usize).ok_or_else(|| {
            DeviceError::Unsupported(format!("pipeline {} has no resource set {set}", pipeline.0))
        })?;
        let entries = resources
            .iter()
            .map(|(binding, resource)| {
                let resource = match resource {
                    Binding::Buffer(buffer) => self.buffer(buffer)?.as_entire_binding(),
                    Binding::Texture(texture) => wgpu::BindingResource::TextureView(&self.texture(texture)?.view),
                    Binding::Sampler(kind) => wgpu::BindingResource::Sampler(self.samplers.get(kind)),
                };
                Ok(wgpu::BindGroupEntry { binding, resource })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tessera_resource_set"),
            layout,
            entries: &entries,
        }))
    }

    /// Bind groups for every `BindResourceSet` in `commands`, aligned with the command indices.
    fn bind_groups_for(&self, commands: &[Command]) -> Result<Vec<Option<wgpu::BindGroup>>, DeviceError> {
        let mut pipeline = None;
        commands
            .iter()
            .map(|command| match command {
                Command::BindPipeline(handle) => {
                    pipeline = Some(*handle);
                    Ok(None)
                }
                Command::BindResourceSet { set, resources } => {
                    let handle = pipeline.ok_or_else(|| {
                        DeviceError::Unsupported("resource set bound before a pipeline".to_string())
                    })?;
                    self.create_bind_group(handle, *set, resources).map(Some)
                }
                _ => Ok(None),
            })
            .collect()
    }

    fn encode_bundle(&self, recording: &SubCommandList) -> Result<wgpu::RenderBundle, DeviceError> {
        let pass = self.render_pass(recording.render_pass())?;
        let bind_groups = self.bind_groups_for(recording.commands())?;
        let color_formats: Vec<Option<wgpu::TextureFormat>> = pass.color_formats.iter().copied().map(Some).collect();
        let mut encoder = self.device.create_render_bundle_encoder(&wgpu::RenderBundleEncoderDescriptor {
            label: Some("tessera_sub_command"),
            color_formats: &color_formats,
            depth_stencil: pass.depth_format.map(|format| wgpu::RenderBundleDepthStencil {
                format,
                depth_read_only: false,
                stencil_read_only: true,
            }),
            sample_count: 1,
            multiview: None,
        });
        for (command, bind_group) in recording.commands().iter().zip(&bind_groups) {
            match command {
                Command::BindPipeline(pipeline) => encoder.set_pipeline(&self.pipeline(*pipeline)?.pipeline),
                Command::BindVertexBuffer(buffer) => encoder.set_vertex_buffer(0, self.buffer(*buffer)?.slice(..)),
                Command::BindIndexBuffer(buffer) => {
                    encoder.set_index_buffer(self.buffer(*buffer)?.slice(..), wgpu::IndexFormat::Uint32)
                }
                Command::BindResourceSet { set, .. } => {
                    if let Some(group) = bind_group {
                        encoder.set_bind_group(*set, group, &[]);
                    }
                }
                Command::Draw { vertex_count, instance_count, first_vertex, first_instance } => encoder.draw(
                    *first_vertex..first_vertex + vertex_count,
                    *first_instance..first_instance + instance_count,
                ),
                Command::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance } => {
                    encoder.draw_indexed(
                        *first_index..first_index + index_count,
                        *vertex_offset,
                        *first_instance..first_instance + instance_count,
                    )
                }
                other => return Err(DeviceError::Unsupported(format!("{other:?} in a sub command buffer"))),
            }
        }
        Ok(encoder.finish(&wgpu::RenderBundleDescriptor { label: Some("tessera_sub_command") }))
    }

    fn acquire(&mut self, window: WindowId) -> Result<(), DeviceError> {
        let entry = self.windows.get_mut(window.0 as usize).ok_or(DeviceError::UnknownWindow(window.0))?;
        if entry.frame.is_some() {
            return Ok(());
        }
        let texture = match entry.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                entry.surface.configure(&self.device, &entry.config);
                entry.surface.get_current_texture().map_err(surface_error)?
            }
            Err(error) => return Err(surface_error(error)),
        };
        let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
        entry.frame = Some(AcquiredFrame { texture, view });
        Ok(())
    }

    /// Encodes the commands between one `BeginRenderPass` and its `EndRenderPass`.
    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: RenderPassHandle,
        commands: &[Command],
        bind_groups: &[Option<wgpu::BindGroup>],
    ) -> Result<(), DeviceError> {
        let entry = self.render_pass(pass)?;
        let (color_views, depth_view) = match &entry.desc.target {
            RenderTarget::Textures { colors, depth } => {
                let colors = colors
                    .iter()
                    .map(|texture| self.texture(*texture).map(|t| &t.view))
                    .collect::<Result<Vec<_>, _>>()?;
                let depth = depth.map(|texture| self.texture(texture).map(|t| &t.view)).transpose()?;
                (colors, depth)
            }
            RenderTarget::Window(window) => {
                let frame = self
                    .window(*window)?
                    .frame
                    .as_ref()
                    .ok_or_else(|| surface_error(format!("window {} has no acquired image", window.0)))?;
                (vec![&frame.view], None)
            }
        };
        let ops = wgpu::Operations {
            load: match entry.desc.load {
                LoadOp::Clear(color) => wgpu::LoadOp::Clear(color.into_wgpu()),
                LoadOp::Load => wgpu::LoadOp::Load,
            },
            store: wgpu::StoreOp::Store,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
            .into_iter()
            .map(|view| Some(wgpu::RenderPassColorAttachment { view, resolve_target: None, ops }))
            .collect();

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: entry.desc.label,
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        for (command, bind_group) in commands.iter().zip(bind_groups) {
            match command {
                Command::BindPipeline(pipeline) => render_pass.set_pipeline(&self.pipeline(*pipeline)?.pipeline),
                Command::BindVertexBuffer(buffer) => render_pass.set_vertex_buffer(0, self.buffer(*buffer)?.slice(..)),
                Command::BindIndexBuffer(buffer) => {
                    render_pass.set_index_buffer(self.buffer(*buffer)?.slice(..), wgpu::IndexFormat::Uint32)
                }
                Command::BindResourceSet { set, .. } => {
                    if let Some(group) = bind_group {
                        render_pass.set_bind_group(*set, group, &[]);
                    }
                }
                Command::Draw { vertex_count, instance_count, first_vertex, first_instance } => render_pass.draw(
                    *first_vertex..first_vertex + vertex_count,
                    *first_instance..first_instance + instance_count,
                ),
                Command::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance } => {
                    render_pass.draw_indexed(
                        *first_index..first_index + index_count,
                        *vertex_offset,
                        *first_instance..first_instance + instance_count,
                    )
                }
                Command::ExecuteSubCommand(sub) => render_pass.execute_bundles(std::iter::once(self.bundle(*sub)?)),
                // Usage tracking inserts the transitions.
                Command::Barrier(_) => {}
                Command::BeginRenderPass(_) | Command::EndRenderPass => {
                    return Err(DeviceError::Unsupported("nested render pass".to_string()))
                }
            }
        }
        Ok(())
    }
}

impl GpuDevice for WgpuDevice {
    fn window_size(&self, window: WindowId) -> Result<(u32, u32), DeviceError> {
        let entry = self.window(window)?;
        Ok((entry.config.width, entry.config.height))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle, DeviceError> {
        let texture = self.scoped("texture", || {
            Ok(self.device.create_texture(&wgpu::TextureDescriptor {
                label: desc.label,
                size: wgpu::Extent3d {
                    width: desc.size.0,
                    height: desc.size.1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: desc.format.into_wgpu(),
                usage: desc.usage.into_wgpu(),
                view_formats: &[],
            }))
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.allocate_id();
        self.textures.insert(id, TextureEntry { texture, view, desc: desc.clone() });
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), DeviceError> {
        let entry = self.texture(texture)?;
        if entry.desc.format.is_depth() {
            return Err(DeviceError::Unsupported("writing a depth texture".to_string()));
        }
        let expected = entry.desc.byte_len();
        if data.len() as u64 != expected {
            return Err(DeviceError::WriteOutOfBounds {
                what: "texture",
                len: data.len() as u64,
                capacity: expected,
            });
        }
        let (width, height) = entry.desc.size;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * entry.desc.format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        Ok(())
    }

    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), DeviceError> {
        Ok(self.texture(texture)?.desc.size)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), DeviceError> {
        let entry = self.textures.remove(&texture.0).ok_or(DeviceError::unknown("texture", texture.0))?;
        entry.texture.destroy();
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle, DeviceError> {
        let buffer = self.scoped("buffer", || {
            Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: desc.label,
                size: padded_len(desc.size),
                usage: desc.usage.into_wgpu(),
                mapped_at_creation: false,
            }))
        })?;
        let id = self.allocate_id();
        self.buffers.insert(id, BufferEntry { buffer, size: desc.size });
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), DeviceError> {
        let entry = self.buffers.get(&buffer.0).ok_or(DeviceError::unknown("buffer", buffer.0))?;
        let len = data.len() as u64;
        if len > entry.size {
            return Err(DeviceError::WriteOutOfBounds { what: "buffer", len, capacity: entry.size });
        }
        if len == 0 {
            return Ok(());
        }
        if len % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&entry.buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(padded_len(len) as usize, 0);
            self.queue.write_buffer(&entry.buffer, 0, &padded);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), DeviceError> {
        let entry = self.buffers.remove(&buffer.0).ok_or(DeviceError::unknown("buffer", buffer.0))?;
        entry.buffer.destroy();
        Ok(())
    }

    fn create_render_pass(&mut self, desc: &RenderPassDescriptor) -> Result<RenderPassHandle, DeviceError> {
        let (color_formats, depth_format) = match &desc.target {
            RenderTarget::Textures { colors, depth } => {
                let colors = colors
                    .iter()
                    .map(|texture| self.texture(*texture).map(|t| t.texture.format()))
                    .collect::<Result<Vec<_>, _>>()?;
                let depth = depth.map(|texture| self.texture(texture).map(|t| t.texture.format())).transpose()?;
                (colors, depth)
            }
            RenderTarget::Window(window) => (vec![self.window(*window)?.config.format], None),
        };
        let id = self.allocate_id();
        self.render_passes.insert(id, RenderPassEntry { desc: desc.clone(), color_formats, depth_format });
        Ok(RenderPassHandle(id))
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDescriptor) -> Result<PipelineHandle, DeviceError> {
        self.load_shader(desc.vertex.shader)?;
        self.load_shader(desc.fragment.shader)?;
        let entry = self.scoped("graphics pipeline", || self.build_pipeline(desc))?;
        let id = self.allocate_id();
        self.pipelines.insert(id, entry);
        log::debug!("created pipeline {:?}", desc.label);
        Ok(PipelineHandle(id))
    }

    fn create_command_buffer(&mut self, recordings: &[CommandList]) -> Result<CommandBufferHandle, DeviceError> {
        if recordings.is_empty() {
            return Err(DeviceError::Unsupported("command buffer without recordings".to_string()));
        }
        let id = self.allocate_id();
        self.command_buffers.insert(id, CommandBufferEntry::Primary(recordings.to_vec()));
        Ok(CommandBufferHandle(id))
    }

    fn update_command_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        recording: &CommandList,
    ) -> Result<(), DeviceError> {
        match self.command_buffers.get_mut(&command_buffer.0) {
            Some(CommandBufferEntry::Primary(recordings)) => {
                *recordings = vec![recording.clone()];
                Ok(())
            }
            _ => Err(DeviceError::unknown("command buffer", command_buffer.0)),
        }
    }

    fn create_sub_command_buffer(&mut self, recording: &SubCommandList) -> Result<CommandBufferHandle, DeviceError> {
        let bundle = self.scoped("sub command buffer", || self.encode_bundle(recording))?;
        let id = self.allocate_id();
        self.command_buffers.insert(id, CommandBufferEntry::Bundle(bundle));
        Ok(CommandBufferHandle(id))
    }

    fn destroy_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> Result<(), DeviceError> {
        self.command_buffers
            .remove(&command_buffer.0)
            .map(|_| ())
            .ok_or(DeviceError::unknown("command buffer", command_buffer.0))
    }

    fn execute(&mut self, command_buffer: CommandBufferHandle) -> Result<(), DeviceError> {
        let recording = match self.command_buffers.get(&command_buffer.0) {
            Some(CommandBufferEntry::Primary(recordings)) => {
                recordings[(self.frame_index % recordings.len() as u64) as usize].clone()
            }
            Some(CommandBufferEntry::Bundle(_)) => {
                return Err(DeviceError::Unsupported("executing a sub command buffer directly".to_string()))
            }
            None => return Err(DeviceError::unknown("command buffer", command_buffer.0)),
        };
        let commands = recording.commands();

        for command in commands {
            if let Command::BeginRenderPass(pass) = command {
                let window = match &self.render_pass(*pass)?.desc.target {
                    RenderTarget::Window(window) => Some(*window),
                    RenderTarget::Textures { .. } => None,
                };
                if let Some(window) = window {
                    self.acquire(window)?;
                }
            }
        }

        let bind_groups = self.bind_groups_for(commands)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("tessera_frame") });
        let mut index = 0;
        while index < commands.len() {
            match &commands[index] {
                Command::BeginRenderPass(pass) => {
                    let end = commands[index..]
                        .iter()
                        .position(|command| *command == Command::EndRenderPass)
                        .map(|offset| index + offset)
                        .ok_or_else(|| DeviceError::Unsupported("render pass without an end".to_string()))?;
                    self.encode_pass(&mut encoder, *pass, &commands[index + 1..end], &bind_groups[index + 1..end])?;
                    index = end + 1;
                }
                Command::Barrier(_) => index += 1,
                other => return Err(DeviceError::Unsupported(format!("{other:?} outside a render pass"))),
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        for window in &mut self.windows {
            if let Some(AcquiredFrame { texture, view }) = window.frame.take() {
                drop(view);
                texture.present();
            }
        }
        self.frame_index = self.frame_index.wrapping_add(1);
        log::trace!("presented frame {}", self.frame_index);
        Ok(())
    }
}
