//! Drawable registry: the GPU-side record of every registered mesh, skinned mesh, sprite and light.
//! Records hold weak references only; a record whose component has been dropped is pruned on the
//! next build and its handles are released exactly once.

use glam::Mat4;
use render_api::{
    BufferDescriptor, BufferHandle, CommandBufferHandle, ComponentId, ComponentRef, DeviceError, GpuDevice,
    LightComponent, MaterialComponent, MeshComponent, SkinnedMeshComponent, SpriteComponent, TextureHandle, Vertex,
};

use crate::error::Result;
use crate::gbuffer::{BoneData, GeometryPass, SceneData};
use crate::shadows::ShadowPass;
use crate::sprite::{sprite_quad, SpritePass, SpriteVertex};

/// Per-drawable pass participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawOptions {
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub lighting: bool,
}

impl DrawOptions {
    pub const MESH: Self = Self { cast_shadow: true, receive_shadow: true, lighting: true };
    pub const SKINNED: Self = Self { cast_shadow: true, receive_shadow: false, lighting: true };
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self::MESH
    }
}

#[derive(Debug, Clone)]
pub enum MeshSource {
    Static(ComponentRef<MeshComponent>),
    Skinned(ComponentRef<SkinnedMeshComponent>),
}

impl MeshSource {
    pub fn id(&self) -> ComponentId {
        match self {
            MeshSource::Static(r) => r.id(),
            MeshSource::Skinned(r) => r.id(),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            MeshSource::Static(r) => r.is_alive(),
            MeshSource::Skinned(r) => r.is_alive(),
        }
    }

    pub fn is_skinned(&self) -> bool {
        matches!(self, MeshSource::Skinned(_))
    }

    /// Enabled and visible; false once the component is gone.
    pub fn is_drawable(&self) -> bool {
        match self {
            MeshSource::Static(r) => r.upgrade().is_some_and(|c| {
                let mesh = c.borrow();
                mesh.enabled && mesh.visible
            }),
            MeshSource::Skinned(r) => r.upgrade().is_some_and(|c| {
                let skinned = c.borrow();
                skinned.mesh.enabled && skinned.mesh.visible
            }),
        }
    }
}

trait Release {
    fn release<D: GpuDevice>(self, device: &mut D) -> std::result::Result<(), DeviceError>;
}

#[derive(Debug)]
pub struct Drawable {
    source: MeshSource,
    material: ComponentRef<MaterialComponent>,
    options: DrawOptions,
    index_count: u32,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    scene_buffer: BufferHandle,
    bone_buffer: BufferHandle,
    shadow_sub: Option<CommandBufferHandle>,
    geometry_sub: CommandBufferHandle,
}

/// Shared inputs for creating a drawable's sub commands.
pub(crate) struct DrawablePasses<'a> {
    pub shadow: &'a ShadowPass,
    pub geometry: &'a GeometryPass,
}

impl Drawable {
    /// Uploads mesh data and records the shadow (if casting) and geometry sub commands.
    pub(crate) fn create<D: GpuDevice>(
        device: &mut D,
        source: MeshSource,
        material: ComponentRef<MaterialComponent>,
        options: DrawOptions,
        mesh: &MeshComponent,
        bones: &BoneData,
        diffuse: TextureHandle,
        passes: DrawablePasses<'_>,
    ) -> Result<Self> {
        let index_count = mesh.indices.len() as u32;
        let vertex_buffer = device.create_buffer(&BufferDescriptor::vertex::<Vertex>("mesh_vertices", mesh.vertices.len()))?;
        device.write_slice(vertex_buffer, &mesh.vertices)?;
        let index_buffer = device.create_buffer(&BufferDescriptor::index("mesh_indices", mesh.indices.len()))?;
        device.write_slice(index_buffer, &mesh.indices)?;
        let scene_buffer = device.create_buffer(&BufferDescriptor::uniform::<SceneData>("scene_uniform"))?;
        let bone_buffer = device.create_buffer(&BufferDescriptor::uniform::<BoneData>("bone_uniform"))?;
        device.write_value(bone_buffer, bones)?;

        let shadow_sub = if options.cast_shadow {
            let sub = passes
                .shadow
                .record_sub(vertex_buffer, index_buffer, index_count, scene_buffer, bone_buffer);
            Some(device.create_sub_command_buffer(&sub)?)
        } else {
            None
        };
        let sub = passes
            .geometry
            .record_sub(vertex_buffer, index_buffer, index_count, scene_buffer, bone_buffer, diffuse);
        let geometry_sub = device.create_sub_command_buffer(&sub)?;

        Ok(Self {
            source,
            material,
            options,
            index_count,
            vertex_buffer,
            index_buffer,
            scene_buffer,
            bone_buffer,
            shadow_sub,
            geometry_sub,
        })
    }

    pub fn id(&self) -> ComponentId { self.source.id() }
    pub fn source(&self) -> &MeshSource { &self.source }
    pub fn material(&self) -> &ComponentRef<MaterialComponent> { &self.material }
    pub fn options(&self) -> DrawOptions { self.options }
    pub fn index_count(&self) -> u32 { self.index_count }
    pub fn vertex_buffer(&self) -> BufferHandle { self.vertex_buffer }
    pub fn index_buffer(&self) -> BufferHandle { self.index_buffer }
    pub fn scene_buffer(&self) -> BufferHandle { self.scene_buffer }
    pub fn bone_buffer(&self) -> BufferHandle { self.bone_buffer }
    pub fn shadow_sub(&self) -> Option<CommandBufferHandle> { self.shadow_sub }
    pub fn geometry_sub(&self) -> CommandBufferHandle { self.geometry_sub }

    pub fn buffers(&self) -> [BufferHandle; 4] {
        [self.vertex_buffer, self.index_buffer, self.scene_buffer, self.bone_buffer]
    }

    /// Writes the per-object scene block and, for skinned meshes, the bone block. Skips expired
    /// sources.
    pub(crate) fn write_uniforms<D: GpuDevice>(&self, device: &mut D, view: Mat4, proj: Mat4) -> Result<()> {
        let DrawOptions { receive_shadow, lighting, .. } = self.options;
        match &self.source {
            MeshSource::Static(r) => {
                let Some(component) = r.upgrade() else { return Ok(()) };
                let mesh = component.borrow();
                let scene = SceneData::new(mesh.transform.world_matrix(), view, proj, receive_shadow, lighting);
                device.write_value(self.scene_buffer, &scene)?;
            }
            MeshSource::Skinned(r) => {
                let Some(component) = r.upgrade() else { return Ok(()) };
                let skinned = component.borrow();
                let scene =
                    SceneData::new(skinned.mesh.transform.world_matrix(), view, proj, receive_shadow, lighting);
                device.write_value(self.scene_buffer, &scene)?;
                device.write_value(self.bone_buffer, &BoneData::from_bones(&skinned.bones))?;
            }
        }
        Ok(())
    }
}

/// Keeps the first error of a release sequence so every remaining handle is still destroyed.
fn keep_first(first: &mut Option<DeviceError>, result: std::result::Result<(), DeviceError>) {
    if let Err(error) = result {
        log::warn!("release failed: {error}");
        first.get_or_insert(error);
    }
}

fn first_error(first: Option<DeviceError>) -> std::result::Result<(), DeviceError> {
    first.map_or(Ok(()), Err)
}

impl Release for Drawable {
    fn release<D: GpuDevice>(self, device: &mut D) -> std::result::Result<(), DeviceError> {
        let mut first = None;
        for buffer in self.buffers() {
            keep_first(&mut first, device.destroy_buffer(buffer));
        }
        if let Some(sub) = self.shadow_sub {
            keep_first(&mut first, device.destroy_command_buffer(sub));
        }
        keep_first(&mut first, device.destroy_command_buffer(self.geometry_sub));
        first_error(first)
    }
}

#[derive(Debug)]
pub struct SpriteDrawable {
    sprite: ComponentRef<SpriteComponent>,
    texture_size: (u32, u32),
    vertex_buffer: BufferHandle,
    sub_command: CommandBufferHandle,
}

impl SpriteDrawable {
    pub(crate) fn create<D: GpuDevice>(
        device: &mut D,
        reference: ComponentRef<SpriteComponent>,
        sprite: &SpriteComponent,
        pass: &SpritePass,
    ) -> Result<Self> {
        let texture_size = device.texture_size(sprite.texture)?;
        let vertex_buffer = device.create_buffer(&BufferDescriptor::vertex::<SpriteVertex>("sprite_vertices", 4))?;
        device.write_slice(vertex_buffer, &sprite_quad(texture_size, &sprite.transform, sprite.pivot))?;
        let sub_command = device.create_sub_command_buffer(&pass.record_sub(vertex_buffer, sprite.texture))?;
        Ok(Self { sprite: reference, texture_size, vertex_buffer, sub_command })
    }

    pub fn id(&self) -> ComponentId { self.sprite.id() }
    pub fn sprite(&self) -> &ComponentRef<SpriteComponent> { &self.sprite }
    pub fn texture_size(&self) -> (u32, u32) { self.texture_size }
    pub fn vertex_buffer(&self) -> BufferHandle { self.vertex_buffer }
    pub fn sub_command(&self) -> CommandBufferHandle { self.sub_command }

    pub fn is_drawable(&self) -> bool {
        self.sprite.upgrade().is_some_and(|c| {
            let sprite = c.borrow();
            sprite.enabled && sprite.visible
        })
    }

    /// Rewrites the quad from the sprite's current transform and pivot.
    pub(crate) fn write_quad<D: GpuDevice>(&self, device: &mut D) -> Result<()> {
        let Some(component) = self.sprite.upgrade() else { return Ok(()) };
        let sprite = component.borrow();
        device.write_slice(self.vertex_buffer, &sprite_quad(self.texture_size, &sprite.transform, sprite.pivot))?;
        Ok(())
    }
}

impl Release for SpriteDrawable {
    fn release<D: GpuDevice>(self, device: &mut D) -> std::result::Result<(), DeviceError> {
        let mut first = None;
        keep_first(&mut first, device.destroy_buffer(self.vertex_buffer));
        keep_first(&mut first, device.destroy_command_buffer(self.sub_command));
        first_error(first)
    }
}

/// Moves every item matching `pred` out of `items` and releases it. Returns how many were removed.
/// Every matched item is released even when one fails; the first failure is returned.
fn release_where<T: Release, D: GpuDevice>(
    items: &mut Vec<T>,
    device: &mut D,
    pred: impl Fn(&T) -> bool,
) -> std::result::Result<usize, DeviceError> {
    let (gone, kept): (Vec<T>, Vec<T>) = std::mem::take(items).into_iter().partition(|item| pred(item));
    *items = kept;
    let count = gone.len();
    let mut first = None;
    for item in gone {
        keep_first(&mut first, item.release(device));
    }
    first_error(first).map(|()| count)
}

#[derive(Debug, Default)]
pub struct Registry {
    drawables: Vec<Drawable>,
    sprites: Vec<SpriteDrawable>,
    lights: Vec<ComponentRef<LightComponent>>,
}

impl Registry {
    pub fn drawables(&self) -> &[Drawable] { &self.drawables }
    pub fn sprites(&self) -> &[SpriteDrawable] { &self.sprites }
    pub fn lights(&self) -> &[ComponentRef<LightComponent>] { &self.lights }

    pub(crate) fn push_drawable(&mut self, drawable: Drawable) {
        self.drawables.push(drawable);
    }

    pub(crate) fn push_sprite(&mut self, sprite: SpriteDrawable) {
        self.sprites.push(sprite);
    }

    pub(crate) fn push_light(&mut self, light: ComponentRef<LightComponent>) {
        self.lights.push(light);
    }

    /// Removes every drawable whose mesh (static or skinned) is `id`.
    pub(crate) fn remove_drawables<D: GpuDevice>(
        &mut self,
        device: &mut D,
        id: ComponentId,
    ) -> std::result::Result<usize, DeviceError> {
        release_where(&mut self.drawables, device, |d| d.id() == id)
    }

    pub(crate) fn remove_sprites<D: GpuDevice>(
        &mut self,
        device: &mut D,
        id: ComponentId,
    ) -> std::result::Result<usize, DeviceError> {
        release_where(&mut self.sprites, device, |s| s.id() == id)
    }

    pub(crate) fn remove_lights(&mut self, id: ComponentId) -> usize {
        let before = self.lights.len();
        self.lights.retain(|l| l.id() != id);
        before - self.lights.len()
    }

    pub(crate) fn prune_drawables<D: GpuDevice>(&mut self, device: &mut D) -> std::result::Result<usize, DeviceError> {
        release_where(&mut self.drawables, device, |d| !d.source.is_alive())
    }

    pub(crate) fn prune_sprites<D: GpuDevice>(&mut self, device: &mut D) -> std::result::Result<usize, DeviceError> {
        release_where(&mut self.sprites, device, |s| !s.sprite.is_alive())
    }

    pub(crate) fn prune_lights(&mut self) -> usize {
        let before = self.lights.len();
        self.lights.retain(|l| l.is_alive());
        before - self.lights.len()
    }

    /// Snapshot of live, enabled lights in registration order.
    pub fn active_lights(&self) -> Vec<LightComponent> {
        self.lights
            .iter()
            .filter_map(|l| l.upgrade())
            .map(|c| c.borrow().clone())
            .filter(|l| l.enabled)
            .collect()
    }

    /// Releases every drawable and sprite and forgets every light.
    pub(crate) fn clear<D: GpuDevice>(&mut self, device: &mut D) -> std::result::Result<(), DeviceError> {
        let drawables = release_where(&mut self.drawables, device, |_| true);
        let sprites = release_where(&mut self.sprites, device, |_| true);
        self.lights.clear();
        drawables.and(sprites).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::FrameResources;
    use glam::{Vec3, Vec4};
    use render_api::{Component, DeviceCall, RecordingDevice, TextureDescriptor, TextureFormat};

    struct Fixture {
        device: RecordingDevice,
        frame: FrameResources,
        shadow: ShadowPass,
        geometry: GeometryPass,
        sprite: SpritePass,
    }

    fn fixture() -> Fixture {
        let sizes = [(64, 64)];
        let mut device = RecordingDevice::with_windows(&sizes);
        let frame = FrameResources::new(&mut device, &sizes, 1).unwrap();
        let shadow = ShadowPass::new(&mut device, &frame).unwrap();
        let geometry = GeometryPass::new(&mut device, &frame).unwrap();
        let sprite = SpritePass::new(&mut device, &frame).unwrap();
        Fixture { device, frame, shadow, geometry, sprite }
    }

    fn drawable(fx: &mut Fixture, mesh: &Component<MeshComponent>, options: DrawOptions) -> Drawable {
        let material = Component::new(MaterialComponent::default());
        let diffuse = fx.frame.fallback_texture;
        Drawable::create(
            &mut fx.device,
            MeshSource::Static(mesh.downgrade()),
            material.downgrade(),
            options,
            &mesh.borrow(),
            &BoneData::disabled(),
            diffuse,
            DrawablePasses { shadow: &fx.shadow, geometry: &fx.geometry },
        )
        .unwrap()
    }

    #[test]
    fn create_uploads_mesh_and_records_subs() {
        let mut fx = fixture();
        let mesh = Component::new(MeshComponent::cube(1.0));
        let d = drawable(&mut fx, &mesh, DrawOptions::MESH);
        assert_eq!(d.index_count(), 36);
        assert_eq!(fx.device.buffer_values::<u32>(d.index_buffer()).unwrap(), mesh.borrow().indices);
        assert_eq!(fx.device.buffer_value::<BoneData>(d.bone_buffer()).unwrap().use_bone, 0);
        let shadow_sub = fx.device.sub_recording(d.shadow_sub().unwrap()).unwrap();
        assert_eq!(shadow_sub.render_pass(), fx.shadow.render_pass());
        let geometry_sub = fx.device.sub_recording(d.geometry_sub()).unwrap();
        assert_eq!(geometry_sub.render_pass(), fx.geometry.render_pass());
    }

    #[test]
    fn non_casters_have_no_shadow_sub() {
        let mut fx = fixture();
        let mesh = Component::new(MeshComponent::plane(1.0, 1.0));
        let options = DrawOptions { cast_shadow: false, ..DrawOptions::MESH };
        assert!(drawable(&mut fx, &mesh, options).shadow_sub().is_none());
    }

    #[test]
    fn release_destroys_each_handle_once() {
        let mut fx = fixture();
        let mesh = Component::new(MeshComponent::cube(1.0));
        let d = drawable(&mut fx, &mesh, DrawOptions::MESH);
        let buffers = d.buffers();
        let (shadow_sub, geometry_sub) = (d.shadow_sub().unwrap(), d.geometry_sub());
        let mut registry = Registry::default();
        registry.push_drawable(d);
        fx.device.clear_calls();

        assert_eq!(registry.remove_drawables(&mut fx.device, mesh.id()).unwrap(), 1);
        for buffer in buffers {
            assert_eq!(fx.device.count_calls(DeviceCall::DestroyBuffer(buffer)), 1);
        }
        assert_eq!(fx.device.count_calls(DeviceCall::DestroyCommandBuffer(shadow_sub)), 1);
        assert_eq!(fx.device.count_calls(DeviceCall::DestroyCommandBuffer(geometry_sub)), 1);
        assert_eq!(registry.remove_drawables(&mut fx.device, mesh.id()).unwrap(), 0);
    }

    #[test]
    fn failed_destroy_still_releases_the_rest() {
        let mut fx = fixture();
        let mesh = Component::new(MeshComponent::cube(1.0));
        let first = drawable(&mut fx, &mesh, DrawOptions::MESH);
        let second = drawable(&mut fx, &mesh, DrawOptions::MESH);
        let broken = first.vertex_buffer();
        let mut handles: Vec<_> = first.buffers()[1..].to_vec();
        handles.extend(second.buffers());
        let subs = [
            first.shadow_sub().unwrap(),
            first.geometry_sub(),
            second.shadow_sub().unwrap(),
            second.geometry_sub(),
        ];
        let mut registry = Registry::default();
        registry.push_drawable(first);
        registry.push_drawable(second);
        fx.device.destroy_buffer(broken).unwrap();

        let result = registry.remove_drawables(&mut fx.device, mesh.id());
        assert!(matches!(result, Err(DeviceError::UnknownHandle { kind: "buffer", .. })));
        assert!(registry.drawables().is_empty());
        assert!(handles.iter().all(|&b| !fx.device.contains_buffer(b)));
        assert!(subs.iter().all(|&c| !fx.device.contains_command_buffer(c)));
    }

    #[test]
    fn prune_only_drops_expired() {
        let mut fx = fixture();
        let kept = Component::new(MeshComponent::cube(1.0));
        let dropped = Component::new(MeshComponent::cube(1.0));
        let mut registry = Registry::default();
        let a = drawable(&mut fx, &kept, DrawOptions::MESH);
        let b = drawable(&mut fx, &dropped, DrawOptions::MESH);
        registry.push_drawable(a);
        registry.push_drawable(b);
        drop(dropped);
        assert_eq!(registry.prune_drawables(&mut fx.device).unwrap(), 1);
        assert_eq!(registry.drawables().len(), 1);
        assert_eq!(registry.drawables()[0].id(), kept.id());
    }

    #[test]
    fn hidden_mesh_is_not_drawable() {
        let mesh = Component::new(MeshComponent::cube(1.0));
        let source = MeshSource::Static(mesh.downgrade());
        assert!(source.is_drawable());
        mesh.borrow_mut().visible = false;
        assert!(!source.is_drawable());
        drop(mesh);
        assert!(!source.is_alive());
        assert!(!source.is_drawable());
    }

    #[test]
    fn sprite_quad_tracks_transform() {
        let mut fx = fixture();
        let texture = fx
            .device
            .create_texture(&TextureDescriptor::sampled("sprite", (10, 20), TextureFormat::Rgba8UnormSrgb))
            .unwrap();
        let sprite = Component::new(SpriteComponent::new(texture));
        let record = SpriteDrawable::create(&mut fx.device, sprite.downgrade(), &sprite.borrow(), &fx.sprite).unwrap();
        assert_eq!(record.texture_size(), (10, 20));

        sprite.borrow_mut().transform.position = Vec3::new(50.0, 60.0, 0.0);
        record.write_quad(&mut fx.device).unwrap();
        let quad = fx.device.buffer_values::<SpriteVertex>(record.vertex_buffer()).unwrap();
        assert_eq!(quad[0].position, [45.0, 50.0, 0.0]);
        assert_eq!(quad[3].position, [55.0, 70.0, 0.0]);
    }

    #[test]
    fn active_lights_skip_disabled_and_expired() {
        let on = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        let off = Component::new(LightComponent { enabled: false, ..LightComponent::default() });
        let gone = Component::new(LightComponent::point(Vec4::ONE, 2.0));
        let mut registry = Registry::default();
        for light in [&on, &off, &gone] {
            registry.push_light(light.downgrade());
        }
        drop(gone);
        assert_eq!(registry.active_lights().len(), 1);
        assert_eq!(registry.prune_lights(), 1);
        assert_eq!(registry.remove_lights(off.id()), 1);
        assert_eq!(registry.lights().len(), 1);
    }
}
