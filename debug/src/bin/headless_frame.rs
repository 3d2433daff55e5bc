//! Builds and renders a few frames of the demo scene against the recording device and logs what
//! reached the device. No GPU needed.
//! Run: RUST_LOG=debug cargo run -p debug --bin headless_frame

use debug::DemoScene;
use render_api::{DeviceCall, RecordingDevice, WindowId};
use tessera_renderer::{Renderer, RendererConfig};

const FRAMES: u32 = 3;

fn main() -> Result<(), String> {
    env_logger::init();
    let sizes = [(1280, 720), (640, 360)];
    let device = RecordingDevice::with_windows(&sizes);
    let windows: Vec<WindowId> = device.windows();
    let mut renderer = Renderer::new(device, &windows, RendererConfig::default()).map_err(|e| e.to_string())?;

    let mut scene = DemoScene::new(16.0 / 9.0);
    scene.register(&mut renderer)?;

    for frame in 0..FRAMES {
        scene.animate(frame as f32 * 0.1);
        renderer.device_mut().clear_calls();
        renderer.build().map_err(|e| e.to_string())?;
        renderer.render().map_err(|e| e.to_string())?;

        let calls = renderer.device().calls();
        let writes = calls.iter().filter(|call| matches!(call, DeviceCall::WriteBuffer(_))).count();
        let updates = calls.iter().filter(|call| matches!(call, DeviceCall::UpdateCommandBuffer(_))).count();
        let executes = renderer.device().executed().len();
        log::info!("frame {frame}: {writes} buffer writes, {updates} re-recorded passes, {executes} executions");
    }

    let working = renderer.frame_resources().working_size();
    println!(
        "rendered {} frames at working resolution {}x{}: {} drawables, {} sprites, {} lights",
        renderer.device().frames_presented(),
        working.0,
        working.1,
        renderer.drawable_count(),
        renderer.sprite_count(),
        renderer.light_count(),
    );
    Ok(())
}
