//! Frame driver: `build` refreshes uniforms and re-records dirty passes; `render` executes the
//! pass command buffers in frame order and presents.

use render_api::{CameraComponent, GpuDevice};

use crate::error::{RendererError, Result};
use crate::graph::{PassKind, FRAME_ORDER};
use crate::light_pass::{CameraData, LightBlock};
use crate::registry::Drawable;
use crate::shadows::ShadowData;
use crate::Renderer;

impl<D: GpuDevice> Renderer<D> {
    /// Prunes expired registrations, writes every per-frame uniform and re-records the passes whose
    /// dirty flag is set. Fails without touching the device when no live, enabled camera is set.
    pub fn build(&mut self) -> Result<()> {
        let camera = self.active_camera()?;
        let view = camera.view_matrix();
        let proj = camera.projection_matrix();

        let pruned = self.registry.prune_drawables(&mut self.device)?;
        if pruned > 0 {
            log::debug!("pruned {pruned} expired drawable(s)");
            self.dirty.mark(PassKind::Shadow);
            self.dirty.mark(PassKind::Geometry);
        }
        for drawable in self.registry.drawables() {
            drawable.write_uniforms(&mut self.device, view, proj)?;
        }

        let pruned = self.registry.prune_sprites(&mut self.device)?;
        if pruned > 0 {
            log::debug!("pruned {pruned} expired sprite(s)");
            self.dirty.mark(PassKind::Sprite);
        }
        for sprite in self.registry.sprites() {
            sprite.write_quad(&mut self.device)?;
        }

        self.device
            .write_value(self.lighting.camera_buffer(), &CameraData::new(camera.position))?;

        if self.registry.prune_lights() > 0 {
            self.dirty.mark(PassKind::Lighting);
        }
        let lights = self.registry.active_lights();
        self.device
            .write_value(self.lighting.light_buffer(), &LightBlock::pack(&lights))?;
        self.dirty.rebuilt(PassKind::Lighting);

        let lit = match lights.first() {
            Some(light) => {
                let shadow = ShadowData::from_light(light.direction, self.frame.working_aspect(), &self.config.shadow);
                self.device.write_value(self.shadow.uniform(), &shadow)?;
                true
            }
            None => false,
        };
        // A pass recorded while unlit holds no casters.
        if lit && !self.shadow_lit {
            self.dirty.mark(PassKind::Shadow);
        }
        self.shadow_lit = lit;

        self.rerecord_dirty(lit)?;
        self.built = true;
        log::trace!(
            "built frame: {} drawable(s), {} sprite(s), {} light(s)",
            self.registry.drawables().len(),
            self.registry.sprites().len(),
            lights.len()
        );
        Ok(())
    }

    /// Executes shadow (if any drawables), geometry, lighting, sprite (if any sprites) and every
    /// window's present command buffer, then presents.
    pub fn render(&mut self) -> Result<()> {
        if !self.built {
            return Err(RendererError::NotBuilt.logged());
        }
        let drawables = self.registry.drawables().len();
        let sprites = self.registry.sprites().len();
        for stage in FRAME_ORDER {
            if !stage.when.holds(drawables, sprites) {
                continue;
            }
            match stage.pass {
                PassKind::Shadow => self.device.execute(self.shadow.command_buffer())?,
                PassKind::Geometry => self.device.execute(self.geometry.command_buffer())?,
                PassKind::Lighting => self.device.execute(self.lighting.command_buffer())?,
                PassKind::Sprite => self.device.execute(self.sprite.command_buffer())?,
                PassKind::PostEffect => {}
                PassKind::Present => {
                    for present in &self.presents {
                        self.device.execute(present.command_buffer())?;
                    }
                }
            }
        }
        self.device.present()?;
        Ok(())
    }

    fn active_camera(&self) -> Result<CameraComponent> {
        let reference = self.camera.as_ref().ok_or_else(|| RendererError::NoCamera.logged())?;
        let component = reference
            .upgrade()
            .ok_or_else(|| RendererError::ExpiredComponent { kind: "camera", id: reference.id() }.logged())?;
        let camera = component.borrow().clone();
        if !camera.enabled {
            return Err(RendererError::CameraDisabled(reference.id()).logged());
        }
        Ok(camera)
    }

    /// Without lights the shadow pass is recorded with no casters, so it never references a
    /// released sub command while it sits idle.
    fn rerecord_dirty(&mut self, lit: bool) -> Result<()> {
        if self.dirty.is_dirty(PassKind::Shadow) {
            let list = if lit {
                self.shadow
                    .record(self.registry.drawables().iter().filter_map(Drawable::shadow_sub))
            } else {
                self.shadow.record(std::iter::empty())
            };
            log::debug!("shadow pass re-recorded with {} caster(s)", list.sub_commands().count());
            self.device.update_command_buffer(self.shadow.command_buffer(), &list)?;
            self.dirty.rebuilt(PassKind::Shadow);
        }
        if self.dirty.is_dirty(PassKind::Geometry) {
            let list = self.geometry.record(
                self.registry
                    .drawables()
                    .iter()
                    .filter(|d| d.source().is_drawable())
                    .map(Drawable::geometry_sub),
            );
            self.device.update_command_buffer(self.geometry.command_buffer(), &list)?;
            self.dirty.rebuilt(PassKind::Geometry);
        }
        if self.dirty.is_dirty(PassKind::PostEffect) {
            self.dirty.rebuilt(PassKind::PostEffect);
        }
        if self.dirty.is_dirty(PassKind::Sprite) {
            let list = self.sprite.record(
                self.registry
                    .sprites()
                    .iter()
                    .filter(|s| s.is_drawable())
                    .map(|s| s.sub_command()),
            );
            self.device.update_command_buffer(self.sprite.command_buffer(), &list)?;
            self.dirty.rebuilt(PassKind::Sprite);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::gbuffer::{BoneData, SceneData};
    use crate::graph::DirtyFlags;
    use crate::light_pass::{LightBlock, LightData};
    use crate::shadows::ShadowData;
    use crate::sprite::SpriteVertex;
    use crate::testing::{camera, material, renderer, sprite_texture};
    use crate::{RendererError, MAX_LIGHTS};
    use glam::{Mat4, Vec3, Vec4};
    use render_api::{
        Bone, Component, DeviceCall, LightComponent, LightKind, MeshComponent, SkinnedMeshComponent, SpriteComponent,
    };

    #[test]
    fn build_without_camera_touches_nothing() {
        let mut r = renderer(&[(64, 64)]);
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        r.device_mut().clear_calls();

        assert_eq!(r.build(), Err(RendererError::NoCamera));

        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        cam.borrow_mut().enabled = false;
        assert_eq!(r.build(), Err(RendererError::CameraDisabled(cam.id())));

        let cam_id = cam.id();
        drop(cam);
        assert_eq!(
            r.build(),
            Err(RendererError::ExpiredComponent { kind: "camera", id: cam_id })
        );
        assert!(r.device().calls().is_empty());
        assert!(!r.is_built());
    }

    #[test]
    fn render_before_build_fails() {
        let mut r = renderer(&[(64, 64)]);
        assert_eq!(r.render(), Err(RendererError::NotBuilt));
        assert_eq!(r.device().frames_presented(), 0);
    }

    #[test]
    fn build_writes_scene_uniforms() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let mesh = Component::new(MeshComponent::cube(1.0));
        mesh.borrow_mut().transform.position = Vec3::new(1.0, 2.0, 3.0);
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        r.build().unwrap();

        let scene: SceneData = r.device().buffer_value(r.registry().drawables()[0].scene_buffer()).unwrap();
        assert_eq!(scene.world, Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)).to_cols_array());
        assert_eq!(scene.view, cam.borrow().view_matrix().to_cols_array());
        assert_eq!(scene.proj, cam.borrow().projection_matrix().to_cols_array());
        assert_eq!((scene.receive_shadow, scene.lighting), (1.0, 1.0));
    }

    #[test]
    fn build_packs_lights_and_shadow() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let sun = Component::new(LightComponent::directional(Vec4::new(1.0, 0.9, 0.8, 1.0), Vec3::new(0.0, -1.0, -1.0)));
        let lamp = Component::new(LightComponent::point(Vec4::ONE, 3.0));
        r.add_light(sun.downgrade()).unwrap();
        r.add_light(lamp.downgrade()).unwrap();
        r.build().unwrap();

        let block: LightBlock = r.device().buffer_value(r.lighting_pass().light_buffer()).unwrap();
        assert_eq!(block.lights[0], LightData::from(&*sun.borrow()));
        assert_eq!(block.lights[1].light_type, LightKind::Point.code());
        assert!(block.lights[2..MAX_LIGHTS].iter().all(|l| *l == LightData::default()));

        let shadow: ShadowData = r.device().buffer_value(r.shadow_pass().uniform()).unwrap();
        let expected = ShadowData::from_light(
            sun.borrow().direction,
            r.frame_resources().working_aspect(),
            &r.config().shadow,
        );
        assert_eq!(shadow, expected);
        assert!(!r.dirty_flags().lighting);
        assert!(!r.dirty_flags().shadow);

        let camera_data: crate::CameraData = r.device().buffer_value(r.lighting_pass().camera_buffer()).unwrap();
        assert_eq!(camera_data.position, cam.borrow().position.to_array());
    }

    #[test]
    fn build_without_lights_keeps_shadow_empty() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        r.build().unwrap();
        assert!(!r.dirty_flags().shadow);
        let shadow = r.device().primary_recordings(r.shadow_pass().command_buffer()).unwrap();
        assert_eq!(shadow[0].sub_commands().count(), 0);

        let sun = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        r.add_light(sun.downgrade()).unwrap();
        r.build().unwrap();
        let shadow = r.device().primary_recordings(r.shadow_pass().command_buffer()).unwrap();
        let casters: Vec<_> = shadow[0].sub_commands().collect();
        assert_eq!(casters, vec![r.registry().drawables()[0].shadow_sub().unwrap()]);
    }

    #[test]
    fn re_enabled_light_restores_casters() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let sun = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        sun.borrow_mut().enabled = false;
        r.add_light(sun.downgrade()).unwrap();
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        r.build().unwrap();
        let shadow = r.device().primary_recordings(r.shadow_pass().command_buffer()).unwrap();
        assert_eq!(shadow[0].sub_commands().count(), 0);

        sun.borrow_mut().enabled = true;
        r.build().unwrap();
        r.build().unwrap();
        let shadow = r.device().primary_recordings(r.shadow_pass().command_buffer()).unwrap();
        assert_eq!(shadow[0].sub_commands().count(), 1);
        assert!(!r.dirty_flags().shadow);
    }

    #[test]
    fn build_uploads_live_bones() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let bones = vec![Bone::new("root", Mat4::IDENTITY), Bone::new("tip", Mat4::IDENTITY)];
        let skinned = Component::new(SkinnedMeshComponent::new(MeshComponent::cube(0.5), bones));
        let mat = material(&[]);
        r.add_skinned_mesh(skinned.downgrade(), mat.downgrade()).unwrap();
        let bone_buffer = r.registry().drawables()[0].bone_buffer();

        let pose = Mat4::from_rotation_z(0.5) * Mat4::from_translation(Vec3::Y);
        skinned.borrow_mut().bones[0].transform = pose;
        r.build().unwrap();
        let block: BoneData = r.device().buffer_value(bone_buffer).unwrap();
        assert_eq!(block.use_bone, 1);
        assert_eq!(block.transforms[0], pose.to_cols_array());
        assert_eq!(block.transforms[1], Mat4::IDENTITY.to_cols_array());

        skinned.borrow_mut().bones[1].transform = Mat4::from_scale(Vec3::splat(2.0));
        r.build().unwrap();
        let block: BoneData = r.device().buffer_value(bone_buffer).unwrap();
        assert_eq!(block.transforms[1], Mat4::from_scale(Vec3::splat(2.0)).to_cols_array());
    }

    #[test]
    fn geometry_and_sprite_flags_stay_dirty() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let texture = sprite_texture(&mut r, (4, 4));
        let sprite = Component::new(SpriteComponent::new(texture));
        r.add_sprite(sprite.downgrade()).unwrap();
        r.build().unwrap();
        let flags = r.dirty_flags();
        assert!(flags.geometry && flags.sprite);
        assert!(!flags.shadow && !flags.lighting && !flags.post_effect);
    }

    #[test]
    fn hidden_drawables_skip_geometry_but_still_cast() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let sun = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        r.add_light(sun.downgrade()).unwrap();
        let shown = Component::new(MeshComponent::cube(1.0));
        let hidden = Component::new(MeshComponent::cube(1.0));
        hidden.borrow_mut().visible = false;
        let mat = material(&[]);
        r.add_mesh(shown.downgrade(), mat.downgrade()).unwrap();
        r.add_mesh(hidden.downgrade(), mat.downgrade()).unwrap();
        r.build().unwrap();

        let geometry = r.device().primary_recordings(r.geometry_pass().command_buffer()).unwrap();
        let subs: Vec<_> = geometry[0].sub_commands().collect();
        assert_eq!(subs, vec![r.registry().drawables()[0].geometry_sub()]);
        let shadow = r.device().primary_recordings(r.shadow_pass().command_buffer()).unwrap();
        assert_eq!(shadow[0].sub_commands().count(), 2);
    }

    #[test]
    fn build_prunes_expired_drawables_and_sprites() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let kept = Component::new(MeshComponent::cube(1.0));
        let dropped = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(kept.downgrade(), mat.downgrade()).unwrap();
        r.add_mesh(dropped.downgrade(), mat.downgrade()).unwrap();
        let texture = sprite_texture(&mut r, (4, 4));
        let sprite = Component::new(SpriteComponent::new(texture));
        r.add_sprite(sprite.downgrade()).unwrap();
        r.build().unwrap();
        let released = r.registry().drawables()[1].buffers();
        let sprite_vb = r.registry().sprites()[0].vertex_buffer();

        drop(dropped);
        drop(sprite);
        r.build().unwrap();
        assert_eq!(r.drawable_count(), 1);
        assert_eq!(r.sprite_count(), 0);
        for buffer in released {
            assert_eq!(r.device().count_calls(DeviceCall::DestroyBuffer(buffer)), 1);
        }
        assert!(!r.device().contains_buffer(sprite_vb));
        r.render().unwrap();
    }

    #[test]
    fn sprite_quads_follow_transforms() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let texture = sprite_texture(&mut r, (16, 8));
        let sprite = Component::new(SpriteComponent::new(texture));
        r.add_sprite(sprite.downgrade()).unwrap();
        sprite.borrow_mut().transform.position = Vec3::new(32.0, 32.0, 5.0);
        r.build().unwrap();
        let quad: Vec<SpriteVertex> = r.device().buffer_values(r.registry().sprites()[0].vertex_buffer()).unwrap();
        assert_eq!(quad[0].position, [24.0, 28.0, 1.0]);
        assert_eq!(quad[3].position, [40.0, 36.0, 1.0]);
    }

    #[test]
    fn render_executes_in_frame_order() {
        let mut r = renderer(&[(64, 64), (32, 32)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        let texture = sprite_texture(&mut r, (4, 4));
        let sprite = Component::new(SpriteComponent::new(texture));
        r.add_sprite(sprite.downgrade()).unwrap();
        r.build().unwrap();
        r.device_mut().clear_calls();
        r.render().unwrap();

        let expected = vec![
            r.shadow_pass().command_buffer(),
            r.geometry_pass().command_buffer(),
            r.lighting_pass().command_buffer(),
            r.sprite_pass().command_buffer(),
            r.present_passes()[0].command_buffer(),
            r.present_passes()[1].command_buffer(),
        ];
        assert_eq!(r.device().executed(), expected);
        assert_eq!(r.device().calls().last(), Some(&DeviceCall::Present));
        assert_eq!(r.device().frames_presented(), 1);
    }

    #[test]
    fn empty_scene_skips_shadow_and_sprite() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        r.build().unwrap();
        r.device_mut().clear_calls();
        r.render().unwrap();
        let expected = vec![
            r.geometry_pass().command_buffer(),
            r.lighting_pass().command_buffer(),
            r.present_passes()[0].command_buffer(),
        ];
        assert_eq!(r.device().executed(), expected);
    }

    #[test]
    fn clear_then_build_records_empty_passes() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let sun = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        r.add_light(sun.downgrade()).unwrap();
        let mesh = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(mesh.downgrade(), mat.downgrade()).unwrap();
        let texture = sprite_texture(&mut r, (4, 4));
        let sprite = Component::new(SpriteComponent::new(texture));
        r.add_sprite(sprite.downgrade()).unwrap();
        r.build().unwrap();
        r.render().unwrap();

        r.clear_scene().unwrap();
        assert_eq!(r.dirty_flags(), DirtyFlags::CLEAN);
        r.build().unwrap();
        for cb in [
            r.shadow_pass().command_buffer(),
            r.geometry_pass().command_buffer(),
            r.sprite_pass().command_buffer(),
        ] {
            let recordings = r.device().primary_recordings(cb).unwrap();
            assert_eq!(recordings[0].sub_commands().count(), 0);
        }
        r.render().unwrap();
    }

    #[test]
    fn removed_caster_leaves_no_stale_reference() {
        let mut r = renderer(&[(64, 64)]);
        let cam = camera();
        r.set_camera(cam.downgrade()).unwrap();
        let sun = Component::new(LightComponent::directional(Vec4::ONE, Vec3::NEG_Y));
        r.add_light(sun.downgrade()).unwrap();
        let a = Component::new(MeshComponent::cube(1.0));
        let b = Component::new(MeshComponent::cube(1.0));
        let mat = material(&[]);
        r.add_mesh(a.downgrade(), mat.downgrade()).unwrap();
        r.add_mesh(b.downgrade(), mat.downgrade()).unwrap();
        r.build().unwrap();
        r.render().unwrap();

        r.remove_mesh(&b.downgrade()).unwrap();
        r.build().unwrap();
        r.render().unwrap();
        let shadow = r.device().primary_recordings(r.shadow_pass().command_buffer()).unwrap();
        assert_eq!(shadow[0].sub_commands().count(), 1);
    }
}
