//! OBJ viewer: loads a model (and optionally its diffuse texture) and shows it on the demo ground
//! plane under the demo light.
//! Run: cargo run -p debug --bin model_window -- path/to/model.obj [path/to/diffuse.png]

use std::path::{Path, PathBuf};

use debug::{upload_rgba, WindowApp, WindowScene};
use glam::{Vec3, Vec4};
use render_api::{
    CameraComponent, Component, LightComponent, MaterialComponent, MeshComponent, Transform, Vertex,
};
use tessera_bridge::{BridgeConfig, WgpuDevice};
use tessera_renderer::Renderer;

/// Every model of the OBJ merged into one mesh, with V flipped to top-left texture origin.
fn load_obj(path: &Path) -> Result<MeshComponent, String> {
    let (models, _) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).map_err(|e| format!("load_obj: {e}"))?;
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for model in models {
        let mesh = model.mesh;
        let base = vertices.len() as u32;
        for i in 0..mesh.positions.len() / 3 {
            let position = Vec3::from_slice(&mesh.positions[i * 3..i * 3 + 3]);
            let normal = mesh
                .normals
                .get(i * 3..i * 3 + 3)
                .map(Vec3::from_slice)
                .unwrap_or(Vec3::Y);
            let uv = mesh
                .texcoords
                .get(i * 2..i * 2 + 2)
                .map(|t| [t[0], 1.0 - t[1]])
                .unwrap_or([0.0, 0.0]);
            vertices.push(Vertex::new(position, normal, uv));
        }
        indices.extend(mesh.indices.iter().map(|index| base + index));
    }
    if vertices.is_empty() || indices.is_empty() {
        return Err(format!("{} has no triangles", path.display()));
    }
    Ok(MeshComponent::new(vertices, indices))
}

/// Scale and offset that fit the mesh in a 2-unit box resting on y = 0.
fn fit_transform(mesh: &MeshComponent) -> Transform {
    let (min, max) = mesh.vertices.iter().fold((Vec3::MAX, Vec3::MIN), |(min, max), v| {
        let p = Vec3::from(v.position);
        (min.min(p), max.max(p))
    });
    let extent = (max - min).max_element().max(f32::EPSILON);
    let scale = 2.0 / extent;
    let center = (min + max) * 0.5;
    let offset = Vec3::new(-center.x, -min.y, -center.z) * scale;
    Transform::from_position(offset).with_scale(Vec3::splat(scale))
}

struct ModelWindow {
    obj: PathBuf,
    texture: Option<PathBuf>,
    _model: Option<Component<MeshComponent>>,
    ground: Component<MeshComponent>,
    light: Component<LightComponent>,
    camera: Component<CameraComponent>,
    _materials: Vec<Component<MaterialComponent>>,
}

impl WindowScene for ModelWindow {
    fn title(&self) -> &str {
        "Tessera model viewer"
    }

    fn populate(&mut self, renderer: &mut Renderer<WgpuDevice>, aspect: f32) -> Result<(), String> {
        self.resized(aspect);
        let mut mesh = load_obj(&self.obj)?;
        mesh.transform = fit_transform(&mesh);
        log::info!("{}: {} vertices, {} triangles", self.obj.display(), mesh.vertices.len(), mesh.indices.len() / 3);

        let textures = match &self.texture {
            Some(path) => {
                let image = image::open(path).map_err(|e| format!("{}: {e}", path.display()))?.to_rgba8();
                let size = image.dimensions();
                vec![upload_rgba(renderer, "model_diffuse", size, image.as_raw()).map_err(|e| e.to_string())?]
            }
            None => Vec::new(),
        };
        let model = Component::new(mesh);
        let model_material = Component::new(MaterialComponent::new(textures));
        let ground_material = Component::new(MaterialComponent::new(Vec::new()));

        renderer.add_mesh(model.downgrade(), model_material.downgrade()).map_err(|e| e.to_string())?;
        renderer.add_mesh(self.ground.downgrade(), ground_material.downgrade()).map_err(|e| e.to_string())?;
        renderer.add_light(self.light.downgrade()).map_err(|e| e.to_string())?;
        renderer.set_camera(self.camera.downgrade()).map_err(|e| e.to_string())?;

        self._model = Some(model);
        self._materials.extend([model_material, ground_material]);
        Ok(())
    }

    /// Orbits the camera around the model.
    fn update(&mut self, seconds: f32) {
        let angle = seconds * 0.3;
        self.camera.borrow_mut().position = Vec3::new(angle.sin() * 4.5, 2.5, angle.cos() * 4.5);
    }

    fn resized(&mut self, aspect: f32) {
        self.camera.borrow_mut().aspect = aspect;
    }
}

fn main() -> Result<(), String> {
    env_logger::init();
    let mut args = std::env::args_os().skip(1);
    let obj = args.next().map(PathBuf::from).ok_or("usage: model_window <model.obj> [diffuse.png]")?;
    let texture = args.next().map(PathBuf::from);

    let scene = ModelWindow {
        obj,
        texture,
        _model: None,
        ground: Component::new(MeshComponent::plane(4.0, 4.0)),
        light: Component::new(LightComponent::directional(Vec4::ONE, Vec3::new(0.3, -1.0, -0.5))),
        camera: Component::new(CameraComponent::new(Vec3::new(0.0, 2.5, 4.5), Vec3::new(0.0, 1.0, 0.0), 16.0 / 9.0)),
        _materials: Vec::new(),
    };
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = WindowApp::new(scene, BridgeConfig::default());
    event_loop.run_app(&mut app).map_err(|e| e.to_string())
}
