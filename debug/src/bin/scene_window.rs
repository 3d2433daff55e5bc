//! Demo scene in a window: spinning cube over a ground plane, shadowed by one directional light,
//! with a sprite badge in the corner.
//! Run: cargo run -p debug --bin scene_window

use debug::{DemoScene, WindowApp, WindowScene};
use tessera_bridge::{BridgeConfig, WgpuDevice};
use tessera_renderer::Renderer;

struct SceneWindow {
    scene: DemoScene,
}

impl WindowScene for SceneWindow {
    fn title(&self) -> &str {
        "Tessera scene"
    }

    fn populate(&mut self, renderer: &mut Renderer<WgpuDevice>, aspect: f32) -> Result<(), String> {
        self.resized(aspect);
        self.scene.register(renderer)
    }

    fn update(&mut self, seconds: f32) {
        self.scene.animate(seconds);
    }

    fn resized(&mut self, aspect: f32) {
        self.scene.camera.borrow_mut().aspect = aspect;
    }
}

fn main() -> Result<(), String> {
    env_logger::init();
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let bridge = BridgeConfig {
        present_mode: wgpu::PresentMode::AutoVsync,
        ..BridgeConfig::default()
    };
    let mut app = WindowApp::new(SceneWindow { scene: DemoScene::new(16.0 / 9.0) }, bridge);
    event_loop.run_app(&mut app).map_err(|e| e.to_string())
}
