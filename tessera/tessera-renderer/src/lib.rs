//! Tessera renderer: shadow map + G-buffer + deferred lighting + sprite + present passes on top of
//! any [`GpuDevice`]. Scene components are observed through weak references; each pass keeps a
//! pre-recorded top-level command buffer that is only re-recorded when its dirty flag is set.

pub mod config;
pub mod error;
mod frame;
pub mod gbuffer;
pub mod graph;
pub mod light_pass;
pub mod present;
pub mod registry;
pub mod resources;
pub mod shadows;
pub mod sprite;
#[cfg(test)]
mod testing;

use render_api::{
    CameraComponent, Component, ComponentRef, GpuDevice, LightComponent, MaterialComponent, MeshComponent,
    SkinnedMeshComponent, SpriteComponent, WindowId,
};

pub use config::{RendererConfig, ShadowConfig, MAX_BONES, MAX_LIGHTS};
pub use error::{RendererError, Result};
pub use gbuffer::{BoneData, GeometryPass, SceneData};
pub use graph::{DirtyFlags, ExecuteWhen, PassKind, Stage, FRAME_ORDER};
pub use light_pass::{CameraData, LightBlock, LightData, LightingPass};
pub use present::PresentPass;
pub use registry::{DrawOptions, Drawable, MeshSource, Registry, SpriteDrawable};
pub use resources::FrameResources;
pub use shadows::{ShadowData, ShadowPass};
pub use sprite::{sprite_quad, SpritePass, SpriteVertex};

use registry::DrawablePasses;

pub struct Renderer<D: GpuDevice> {
    device: D,
    config: RendererConfig,
    frame: FrameResources,
    shadow: ShadowPass,
    geometry: GeometryPass,
    lighting: LightingPass,
    sprite: SpritePass,
    presents: Vec<PresentPass>,
    registry: Registry,
    camera: Option<ComponentRef<CameraComponent>>,
    dirty: DirtyFlags,
    /// Whether the last build had an active light to cast the shadow.
    shadow_lit: bool,
    built: bool,
}

fn live<T>(reference: &ComponentRef<T>, kind: &'static str) -> Result<Component<T>> {
    reference
        .upgrade()
        .ok_or_else(|| RendererError::ExpiredComponent { kind, id: reference.id() }.logged())
}

impl<D: GpuDevice> Renderer<D> {
    /// Creates every pass, pipeline and frame resource for `windows`. Any device failure aborts
    /// construction.
    pub fn new(mut device: D, windows: &[WindowId], config: RendererConfig) -> Result<Self> {
        if windows.is_empty() {
            return Err(RendererError::NoWindows.logged());
        }
        let sizes = windows
            .iter()
            .map(|&w| device.window_size(w))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let frame = FrameResources::new(&mut device, &sizes, config.supersampling)?;
        let shadow = ShadowPass::new(&mut device, &frame)?;
        let geometry = GeometryPass::new(&mut device, &frame)?;
        let lighting = LightingPass::new(&mut device, &frame, shadow.uniform(), config.clear_color)?;
        let sprite = SpritePass::new(&mut device, &frame)?;
        let presents = windows
            .iter()
            .zip(&frame.offscreen)
            .map(|(&window, &source)| PresentPass::new(&mut device, window, source, config.frame_count))
            .collect::<Result<Vec<_>>>()?;

        let (w, h) = frame.working_size();
        log::info!(
            "tessera renderer: {} window(s), working resolution {}x{}, {} frame(s) in flight",
            windows.len(),
            w,
            h,
            config.frame_count
        );
        Ok(Self {
            device,
            config,
            frame,
            shadow,
            geometry,
            lighting,
            sprite,
            presents,
            registry: Registry::default(),
            camera: None,
            dirty: DirtyFlags::initial(),
            shadow_lit: false,
            built: false,
        })
    }

    pub fn device(&self) -> &D { &self.device }
    pub fn device_mut(&mut self) -> &mut D { &mut self.device }
    pub fn config(&self) -> &RendererConfig { &self.config }
    pub fn frame_resources(&self) -> &FrameResources { &self.frame }
    pub fn dirty_flags(&self) -> DirtyFlags { self.dirty }
    pub fn is_built(&self) -> bool { self.built }
    pub fn registry(&self) -> &Registry { &self.registry }
    pub fn drawable_count(&self) -> usize { self.registry.drawables().len() }
    pub fn sprite_count(&self) -> usize { self.registry.sprites().len() }
    pub fn light_count(&self) -> usize { self.registry.lights().len() }
    pub fn shadow_pass(&self) -> &ShadowPass { &self.shadow }
    pub fn geometry_pass(&self) -> &GeometryPass { &self.geometry }
    pub fn lighting_pass(&self) -> &LightingPass { &self.lighting }
    pub fn sprite_pass(&self) -> &SpritePass { &self.sprite }
    pub fn present_passes(&self) -> &[PresentPass] { &self.presents }

    pub fn add_mesh(
        &mut self,
        mesh: ComponentRef<MeshComponent>,
        material: ComponentRef<MaterialComponent>,
    ) -> Result<()> {
        self.add_mesh_with(mesh, material, DrawOptions::MESH)
    }

    pub fn add_mesh_with(
        &mut self,
        mesh: ComponentRef<MeshComponent>,
        material: ComponentRef<MaterialComponent>,
        options: DrawOptions,
    ) -> Result<()> {
        let component = live(&mesh, "mesh")?;
        let diffuse = self.diffuse_of(&material)?;
        let data = component.borrow();
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(RendererError::EmptyMesh(mesh.id()).logged());
        }
        let drawable = Drawable::create(
            &mut self.device,
            MeshSource::Static(mesh.clone()),
            material,
            options,
            &data,
            &BoneData::disabled(),
            diffuse,
            DrawablePasses { shadow: &self.shadow, geometry: &self.geometry },
        )?;
        self.register(drawable);
        Ok(())
    }

    pub fn add_skinned_mesh(
        &mut self,
        mesh: ComponentRef<SkinnedMeshComponent>,
        material: ComponentRef<MaterialComponent>,
    ) -> Result<()> {
        self.add_skinned_mesh_with(mesh, material, DrawOptions::SKINNED)
    }

    pub fn add_skinned_mesh_with(
        &mut self,
        mesh: ComponentRef<SkinnedMeshComponent>,
        material: ComponentRef<MaterialComponent>,
        options: DrawOptions,
    ) -> Result<()> {
        let component = live(&mesh, "skinned mesh")?;
        let diffuse = self.diffuse_of(&material)?;
        let skinned = component.borrow();
        if skinned.mesh.vertices.is_empty() || skinned.mesh.indices.is_empty() {
            return Err(RendererError::EmptyMesh(mesh.id()).logged());
        }
        let drawable = Drawable::create(
            &mut self.device,
            MeshSource::Skinned(mesh.clone()),
            material,
            options,
            &skinned.mesh,
            &BoneData::from_bones(&skinned.bones),
            diffuse,
            DrawablePasses { shadow: &self.shadow, geometry: &self.geometry },
        )?;
        self.register(drawable);
        Ok(())
    }

    pub fn add_sprite(&mut self, sprite: ComponentRef<SpriteComponent>) -> Result<()> {
        let component = live(&sprite, "sprite")?;
        let record = SpriteDrawable::create(&mut self.device, sprite.clone(), &component.borrow(), &self.sprite)?;
        log::debug!("sprite {} registered", record.id());
        self.registry.push_sprite(record);
        self.dirty.mark(PassKind::Sprite);
        Ok(())
    }

    pub fn add_light(&mut self, light: ComponentRef<LightComponent>) -> Result<()> {
        live(&light, "light")?;
        log::debug!("light {} registered", light.id());
        self.registry.push_light(light);
        self.dirty.mark(PassKind::Lighting);
        self.dirty.mark(PassKind::Shadow);
        Ok(())
    }

    /// Removes every drawable registered for `mesh` and releases its GPU handles.
    pub fn remove_mesh(&mut self, mesh: &ComponentRef<MeshComponent>) -> Result<()> {
        live(mesh, "mesh")?;
        self.remove_drawables(mesh.id())
    }

    pub fn remove_skinned_mesh(&mut self, mesh: &ComponentRef<SkinnedMeshComponent>) -> Result<()> {
        live(mesh, "skinned mesh")?;
        self.remove_drawables(mesh.id())
    }

    pub fn remove_sprite(&mut self, sprite: &ComponentRef<SpriteComponent>) -> Result<()> {
        live(sprite, "sprite")?;
        let removed = self.registry.remove_sprites(&mut self.device, sprite.id())?;
        if removed > 0 {
            log::debug!("sprite {} removed", sprite.id());
            self.dirty.mark(PassKind::Sprite);
        }
        Ok(())
    }

    pub fn remove_light(&mut self, light: &ComponentRef<LightComponent>) -> Result<()> {
        live(light, "light")?;
        if self.registry.remove_lights(light.id()) > 0 {
            self.dirty.mark(PassKind::Lighting);
            self.dirty.mark(PassKind::Shadow);
        }
        Ok(())
    }

    pub fn set_camera(&mut self, camera: ComponentRef<CameraComponent>) -> Result<()> {
        live(&camera, "camera")?;
        self.camera = Some(camera);
        Ok(())
    }

    /// Releases every drawable and sprite, forgets every light and leaves the shadow, geometry and
    /// sprite command buffers holding empty passes. All dirty flags end up false; the camera is kept.
    pub fn clear_scene(&mut self) -> Result<()> {
        self.registry.clear(&mut self.device)?;
        let shadow = self.shadow.record(std::iter::empty());
        self.device.update_command_buffer(self.shadow.command_buffer(), &shadow)?;
        let geometry = self.geometry.record(std::iter::empty());
        self.device.update_command_buffer(self.geometry.command_buffer(), &geometry)?;
        let sprite = self.sprite.record(std::iter::empty());
        self.device.update_command_buffer(self.sprite.command_buffer(), &sprite)?;
        self.dirty = DirtyFlags::CLEAN;
        self.shadow_lit = false;
        log::debug!("scene cleared");
        Ok(())
    }

    fn diffuse_of(&self, material: &ComponentRef<MaterialComponent>) -> Result<render_api::TextureHandle> {
        let material = live(material, "material")?;
        let diffuse = material.borrow().diffuse();
        Ok(diffuse.unwrap_or(self.frame.fallback_texture))
    }

    fn register(&mut self, drawable: Drawable) {
        log::debug!(
            "drawable {} registered ({} indices, shadow caster: {})",
            drawable.id(),
            drawable.index_count(),
            drawable.options().cast_shadow
        );
        if drawable.options().cast_shadow {
            self.dirty.mark(PassKind::Shadow);
        }
        self.dirty.mark(PassKind::Geometry);
        self.registry.push_drawable(drawable);
    }

    fn remove_drawables(&mut self, id: render_api::ComponentId) -> Result<()> {
        let removed = self.registry.remove_drawables(&mut self.device, id)?;
        if removed > 0 {
            log::debug!("{removed} drawable(s) for component {id} removed");
            self.dirty.mark(PassKind::Shadow);
            self.dirty.mark(PassKind::Geometry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{material, renderer, sprite_texture};
    use glam::{Vec3, Vec4};
    use render_api::{DeviceCall, DeviceError, RecordingDevice, Vertex};

    #[test]
    fn construction_allocates_every_pass() {
        let r = renderer(&[(320, 240), (640, 480)]);
        assert_eq!(r.present_passes().len(), 2);
        assert_eq!(r.frame_resources().working_size(), (1280, 960));
        assert_eq!(r.dirty_flags(), DirtyFlags::initial());
        assert!(!r.is_built());
        for cb in [
            r.shadow_pass().command_buffer(),
            r.geometry_pass().command_buffer(),
            r.sprite_pass().command_buffer(),
        ] {
            assert_eq!(r.device().primary_recordings(cb).unwrap()[0].sub_commands().count(), 0);
        }
        let present = r.present_passes()[0].command_buffer();
        assert_eq!(r.device().primary_recordings(present).unwrap().len(), 3);
    }

    #[test]
    fn construction_fails_without_windows_or_on_device_failure() {
        let device = RecordingDevice::with_windows(&[(64, 64)]);
        assert!(matches!(
            Renderer::new(device, &[], RendererConfig::default()),
            Err(RendererError::NoWindows)
        ));

        let mut device = RecordingDevice::with_windows(&[(64, 64)]);
        device.set_fail_creation(true);
        let windows = device.windows();
        assert!(matches!(
            Renderer::new(device, &windows, RendererConfig::default()),
            Err(RendererError::Device(DeviceError::Creation { .. }))
        ));

        let device = RecordingDevice::with_windows(&[(64, 64)]);
        assert!(matches!(
            Renderer::new(device, &[WindowId(3)], RendererConfig::default()),
            Err(RendererError::Device(DeviceError::UnknownWindow(3)))
        ));
    }

    #[test]
    fn add_mesh_marks_passes_and_allocates() {
        let mut r = renderer(&[(64, 64)]);
        r.dirty = DirtyFlags::CLEAN;
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        assert_eq!(r.drawable_count(), 1);
        assert!(r.dirty_flags().shadow);
        assert!(r.dirty_flags().geometry);
        let d = &r.registry().drawables()[0];
        assert_eq!(d.options(), DrawOptions::MESH);
        assert!(d.buffers().iter().all(|&b| r.device().contains_buffer(b)));
    }

    #[test]
    fn material_without_textures_uses_fallback() {
        let mut r = renderer(&[(64, 64)]);
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        let sub = r.registry().drawables()[0].geometry_sub();
        let fallback = r.frame_resources().fallback_texture;
        let binds_fallback = r.device().sub_recording(sub).unwrap().commands().iter().any(|c| {
            matches!(c, render_api::Command::BindResourceSet { set: 1, resources }
                if resources.get(0) == Some(render_api::Binding::Texture(fallback)))
        });
        assert!(binds_fallback);
    }

    #[test]
    fn non_caster_leaves_shadow_clean() {
        let mut r = renderer(&[(64, 64)]);
        r.dirty = DirtyFlags::CLEAN;
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        let options = DrawOptions { cast_shadow: false, ..DrawOptions::MESH };
        r.add_mesh_with(mesh.downgrade(), mat.downgrade(), options).unwrap();
        assert!(!r.dirty_flags().shadow);
        assert!(r.registry().drawables()[0].shadow_sub().is_none());
    }

    #[test]
    fn expired_components_are_rejected_without_device_calls() {
        let mut r = renderer(&[(64, 64)]);
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mesh_ref = mesh.downgrade();
        drop(mesh);
        let mat = material(&[]);
        r.device_mut().clear_calls();

        let err = r.add_mesh(mesh_ref.clone(), mat.downgrade()).unwrap_err();
        assert!(matches!(err, RendererError::ExpiredComponent { kind: "mesh", .. }));
        let light = Component::new(LightComponent::default());
        let light_ref = light.downgrade();
        drop(light);
        assert!(r.add_light(light_ref).is_err());
        assert!(r.remove_mesh(&mesh_ref).is_err());
        assert!(r.device().calls().is_empty());
        assert_eq!(r.drawable_count(), 0);
        assert_eq!(r.light_count(), 0);
    }

    #[test]
    fn expired_material_is_rejected() {
        let mut r = renderer(&[(64, 64)]);
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        let mat_ref = mat.downgrade();
        drop(mat);
        let err = r.add_mesh(mesh.downgrade(), mat_ref).unwrap_err();
        assert!(matches!(err, RendererError::ExpiredComponent { kind: "material", .. }));
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let mut r = renderer(&[(64, 64)]);
        let mesh = Component::new(MeshComponent::new(vec![Vertex::new(Vec3::ZERO, Vec3::Y, [0.0; 2])], vec![]));
        let mat = material(&[]);
        assert_eq!(
            r.add_mesh(mesh.downgrade(), mat.downgrade()),
            Err(RendererError::EmptyMesh(mesh.id()))
        );
    }

    #[test]
    fn skinned_defaults_and_bone_upload() {
        let mut r = renderer(&[(64, 64)]);
        let bones = vec![render_api::Bone::new("root", glam::Mat4::from_translation(Vec3::X))];
        let skinned = Component::new(SkinnedMeshComponent::new(MeshComponent::cube(0.5), bones));
        let mat = material(&[]);
        r.add_skinned_mesh(skinned.downgrade(), mat.downgrade()).unwrap();
        let d = &r.registry().drawables()[0];
        assert!(d.source().is_skinned());
        assert_eq!(d.options(), DrawOptions::SKINNED);
        let block: BoneData = r.device().buffer_value(d.bone_buffer()).unwrap();
        assert_eq!(block.use_bone, 1);
        assert_eq!(block.transforms[0], glam::Mat4::from_translation(Vec3::X).to_cols_array());
        assert_eq!(block.transforms[1], glam::Mat4::IDENTITY.to_cols_array());
    }

    #[test]
    fn remove_releases_every_handle_once() {
        let mut r = renderer(&[(64, 64)]);
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        // The same mesh may be registered twice; remove drops both.
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        let owned: Vec<_> = r.registry().drawables().iter().flat_map(|d| d.buffers()).collect();
        r.dirty = DirtyFlags::CLEAN;
        r.device_mut().clear_calls();

        r.remove_mesh(&mesh.downgrade()).unwrap();
        assert_eq!(r.drawable_count(), 0);
        for buffer in owned {
            assert_eq!(r.device().count_calls(DeviceCall::DestroyBuffer(buffer)), 1);
        }
        assert!(r.dirty_flags().shadow && r.dirty_flags().geometry);

        let mesh_ref = mesh.downgrade();
        drop(mesh);
        r.device_mut().clear_calls();
        assert!(r.remove_mesh(&mesh_ref).is_err());
        assert!(r.device().calls().is_empty());
    }

    #[test]
    fn remove_skinned_mesh_releases_its_handles() {
        let mut r = renderer(&[(64, 64)]);
        let bones = vec![render_api::Bone::new("root", glam::Mat4::IDENTITY)];
        let skinned = Component::new(SkinnedMeshComponent::new(MeshComponent::cube(0.5), bones));
        let mat = material(&[]);
        r.add_skinned_mesh(skinned.downgrade(), mat.downgrade()).unwrap();
        let d = &r.registry().drawables()[0];
        let buffers = d.buffers();
        let subs = [d.shadow_sub().unwrap(), d.geometry_sub()];
        r.dirty = DirtyFlags::CLEAN;
        r.device_mut().clear_calls();

        r.remove_skinned_mesh(&skinned.downgrade()).unwrap();
        assert_eq!(r.drawable_count(), 0);
        for buffer in buffers {
            assert_eq!(r.device().count_calls(DeviceCall::DestroyBuffer(buffer)), 1);
        }
        for sub in subs {
            assert_eq!(r.device().count_calls(DeviceCall::DestroyCommandBuffer(sub)), 1);
        }
        assert!(r.dirty_flags().shadow && r.dirty_flags().geometry);
    }

    #[test]
    fn sprites_register_and_remove() {
        let mut r = renderer(&[(64, 64)]);
        let texture = sprite_texture(&mut r, (8, 4));
        let sprite = Component::new(SpriteComponent::new(texture));
        r.add_sprite(sprite.downgrade()).unwrap();
        assert_eq!(r.sprite_count(), 1);
        assert!(r.dirty_flags().sprite);
        let record = &r.registry().sprites()[0];
        assert_eq!(record.texture_size(), (8, 4));
        let vb = record.vertex_buffer();

        r.remove_sprite(&sprite.downgrade()).unwrap();
        assert_eq!(r.sprite_count(), 0);
        assert!(!r.device().contains_buffer(vb));
    }

    #[test]
    fn lights_mark_lighting_and_shadow() {
        let mut r = renderer(&[(64, 64)]);
        r.dirty = DirtyFlags::CLEAN;
        let light = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        r.add_light(light.downgrade()).unwrap();
        assert!(r.dirty_flags().lighting && r.dirty_flags().shadow);
        r.dirty = DirtyFlags::CLEAN;
        r.remove_light(&light.downgrade()).unwrap();
        assert_eq!(r.light_count(), 0);
        assert!(r.dirty_flags().lighting && r.dirty_flags().shadow);
    }

    #[test]
    fn set_camera_rejects_expired() {
        let mut r = renderer(&[(64, 64)]);
        let camera = Component::new(CameraComponent::new(Vec3::Z, Vec3::ZERO, 1.0));
        let camera_ref = camera.downgrade();
        drop(camera);
        assert!(matches!(
            r.set_camera(camera_ref),
            Err(RendererError::ExpiredComponent { kind: "camera", .. })
        ));
    }

    #[test]
    fn clear_scene_empties_everything() {
        let mut r = renderer(&[(64, 64)]);
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        let light = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        let texture = sprite_texture(&mut r, (4, 4));
        let sprite = Component::new(SpriteComponent::new(texture));
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        r.add_light(light.downgrade()).unwrap();
        r.add_sprite(sprite.downgrade()).unwrap();
        let buffers_before = r.device().live_buffers();

        r.clear_scene().unwrap();
        assert_eq!((r.drawable_count(), r.sprite_count(), r.light_count()), (0, 0, 0));
        assert_eq!(r.dirty_flags(), DirtyFlags::CLEAN);
        // 4 drawable buffers and 1 sprite vertex buffer are gone.
        assert_eq!(r.device().live_buffers(), buffers_before - 5);
        let shadow = r.device().primary_recordings(r.shadow_pass().command_buffer()).unwrap();
        assert_eq!(shadow[0].sub_commands().count(), 0);
    }
}
