//! Shared pieces of the debug programs: texture upload helpers, the demo scene and a winit
//! application that drives a `Renderer<WgpuDevice>` for one window.

use std::sync::Arc;
use std::time::Instant;

use glam::{Vec3, Vec4};
use render_api::{
    CameraComponent, Component, DeviceError, GpuDevice, LightComponent, MaterialComponent, MeshComponent, Pivot,
    SpriteComponent, TextureDescriptor, TextureFormat, TextureHandle, Transform,
};
use tessera_bridge::{BridgeConfig, WgpuDevice};
use tessera_renderer::{Renderer, RendererConfig};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

/// Uploads tightly packed sRGB RGBA8 pixels as a sampled texture.
pub fn upload_rgba<D: GpuDevice>(
    renderer: &mut Renderer<D>,
    label: &'static str,
    size: (u32, u32),
    pixels: &[u8],
) -> Result<TextureHandle, DeviceError> {
    let device = renderer.device_mut();
    let texture = device.create_texture(&TextureDescriptor::sampled(label, size, TextureFormat::Rgba8UnormSrgb))?;
    device.write_texture(texture, pixels)?;
    Ok(texture)
}

/// Two-color checkerboard with `cell`-pixel squares.
pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Vec<u8> {
    let cell = cell.max(1);
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            if (x / cell + y / cell) % 2 == 0 { a } else { b }
        })
        .collect()
}

/// Components of the demo scene: a cube over a ground plane, one directional light, a camera and
/// a sprite badge. The renderer only holds weak references, so the scene keeps them alive.
pub struct DemoScene {
    pub cube: Component<MeshComponent>,
    pub ground: Component<MeshComponent>,
    pub light: Component<LightComponent>,
    pub camera: Component<CameraComponent>,
    pub materials: Vec<Component<MaterialComponent>>,
    pub sprites: Vec<Component<SpriteComponent>>,
}

impl DemoScene {
    pub fn new(aspect: f32) -> Self {
        let mut cube = MeshComponent::cube(0.5);
        cube.transform = Transform::from_position(Vec3::new(0.0, 0.75, 0.0));
        Self {
            cube: Component::new(cube),
            ground: Component::new(MeshComponent::plane(4.0, 4.0)),
            light: Component::new(LightComponent::directional(
                Vec4::new(0.9, 0.9, 0.85, 1.0),
                Vec3::new(-0.4, -1.0, -0.3),
            )),
            camera: Component::new(CameraComponent::new(Vec3::new(3.0, 3.0, 5.0), Vec3::ZERO, aspect)),
            materials: Vec::new(),
            sprites: Vec::new(),
        }
    }

    /// Uploads the scene's textures and registers every component.
    pub fn register<D: GpuDevice>(&mut self, renderer: &mut Renderer<D>) -> Result<(), String> {
        let crate_texture = upload_rgba(
            renderer,
            "cube_checker",
            (64, 64),
            &checkerboard(64, 8, [200, 120, 60, 255], [240, 220, 180, 255]),
        )
        .map_err(|e| e.to_string())?;
        let badge = upload_rgba(
            renderer,
            "badge",
            (32, 32),
            &checkerboard(32, 4, [40, 160, 220, 255], [255, 255, 255, 160]),
        )
        .map_err(|e| e.to_string())?;

        let cube_material = Component::new(MaterialComponent::new(vec![crate_texture]));
        // No textures: the renderer falls back to plain white.
        let ground_material = Component::new(MaterialComponent::new(Vec::new()));
        let mut sprite = SpriteComponent::new(badge);
        sprite.transform = Transform::from_position(Vec3::new(24.0, 24.0, 0.0)).with_scale(Vec3::splat(2.0));
        sprite.pivot = Pivot::UpperLeft;
        let sprite = Component::new(sprite);

        renderer.add_mesh(self.cube.downgrade(), cube_material.downgrade()).map_err(|e| e.to_string())?;
        renderer.add_mesh(self.ground.downgrade(), ground_material.downgrade()).map_err(|e| e.to_string())?;
        renderer.add_light(self.light.downgrade()).map_err(|e| e.to_string())?;
        renderer.add_sprite(sprite.downgrade()).map_err(|e| e.to_string())?;
        renderer.set_camera(self.camera.downgrade()).map_err(|e| e.to_string())?;

        self.materials.extend([cube_material, ground_material]);
        self.sprites.push(sprite);
        Ok(())
    }

    /// Spins the cube about Y.
    pub fn animate(&self, seconds: f32) {
        self.cube.borrow_mut().transform =
            Transform::from_position(Vec3::new(0.0, 0.75, 0.0)).with_rotation(Vec3::Y, seconds);
    }
}

/// What a window program shows.
pub trait WindowScene {
    fn title(&self) -> &str;
    fn populate(&mut self, renderer: &mut Renderer<WgpuDevice>, aspect: f32) -> Result<(), String>;
    fn update(&mut self, _seconds: f32) {}
    fn resized(&mut self, _aspect: f32) {}
}

/// winit application rendering one window with Tessera on wgpu.
pub struct WindowApp<S> {
    scene: S,
    bridge: BridgeConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<WgpuDevice>>,
    started: Instant,
}

impl<S: WindowScene> WindowApp<S> {
    pub fn new(scene: S, bridge: BridgeConfig) -> Self {
        Self {
            scene,
            bridge,
            window: None,
            renderer: None,
            started: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), String> {
        let attrs = Window::default_attributes()
            .with_title(self.scene.title())
            .with_inner_size(winit::dpi::LogicalSize::new(960, 540));
        let window = Arc::new(event_loop.create_window(attrs).map_err(|e| e.to_string())?);
        let size = window.inner_size();
        let config = RendererConfig::default();
        let bridge = BridgeConfig { frame_count: config.frame_count as u32, ..self.bridge.clone() };
        let device = WgpuDevice::new(vec![(window.clone(), (size.width, size.height))], &bridge)
            .map_err(|e| e.to_string())?;
        let mut renderer =
            Renderer::new(device, &[render_api::WindowId(0)], config).map_err(|e| e.to_string())?;
        self.scene.populate(&mut renderer, aspect(size.width, size.height))?;
        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn redraw(&mut self) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        self.scene.update(self.started.elapsed().as_secs_f32());
        if let Err(error) = renderer.build().and_then(|()| renderer.render()) {
            log::error!("frame failed: {error}");
        }
    }
}

fn aspect(width: u32, height: u32) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

impl<S: WindowScene> ApplicationHandler for WindowApp<S> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(error) = self.init(event_loop) {
            log::error!("startup failed: {error}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                self.scene.resized(aspect(size.width, size.height));
                if let Some(renderer) = self.renderer.as_mut() {
                    if let Err(error) = renderer.device_mut().resize(render_api::WindowId(0), (size.width, size.height)) {
                        log::warn!("resize failed: {error}");
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}
