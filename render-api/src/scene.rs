//! Scene component data consumed by renderers. The host fills these; renderers observe them
//! through [`crate::ComponentRef`] and never mutate them.

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::device::TextureHandle;

/// Position, non-uniform scale and axis-angle rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub scale: Vec3,
    pub rotation_axis: Vec3,
    /// Radians. Sprites use it as a rotation in the screen plane.
    pub rotation_angle: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation_axis: Vec3::Z,
            rotation_angle: 0.0,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self { position, ..Default::default() }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, axis: Vec3, angle: f32) -> Self {
        self.rotation_axis = axis;
        self.rotation_angle = angle;
        self
    }

    /// Identity when the axis is degenerate.
    pub fn rotation(&self) -> Quat {
        match self.rotation_axis.try_normalize() {
            Some(axis) => Quat::from_axis_angle(axis, self.rotation_angle),
            None => Quat::IDENTITY,
        }
    }

    /// translate × rotate × scale
    pub fn world_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation(), self.position)
    }
}

/// Mesh vertex as laid out in vertex buffers (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    /// Bone indices, stored as floats.
    pub joints: [f32; 4],
    pub weights: [f32; 4],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2]) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv,
            joints: [0.0; 4],
            weights: [0.0; 4],
        }
    }

    pub fn with_skin(mut self, joints: [f32; 4], weights: [f32; 4]) -> Self {
        self.joints = joints;
        self.weights = weights;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshComponent {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub transform: Transform,
    pub visible: bool,
    pub enabled: bool,
}

impl MeshComponent {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            transform: Transform::default(),
            visible: true,
            enabled: true,
        }
    }

    /// Axis-aligned cube centered at the origin, 24 vertices with per-face normals.
    pub fn cube(half_extent: f32) -> Self {
        // (normal, right, up) with right × up = normal, so faces wind counter-clockwise
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, right, up) in FACES {
            let base = vertices.len() as u32;
            vertices.extend(face_quad(normal * half_extent, normal, right * half_extent, up * half_extent));
            indices.extend([base, base + 1, base + 3, base, base + 3, base + 2]);
        }
        Self::new(vertices, indices)
    }

    /// Horizontal plane at y = 0 facing +Y.
    pub fn plane(half_x: f32, half_z: f32) -> Self {
        let vertices = face_quad(Vec3::ZERO, Vec3::Y, Vec3::X * half_x, Vec3::NEG_Z * half_z).to_vec();
        Self::new(vertices, vec![0, 1, 3, 0, 3, 2])
    }
}

// bottom-left, bottom-right, top-left, top-right
fn face_quad(center: Vec3, normal: Vec3, right: Vec3, up: Vec3) -> [Vertex; 4] {
    [
        Vertex::new(center - right - up, normal, [0.0, 1.0]),
        Vertex::new(center + right - up, normal, [1.0, 1.0]),
        Vertex::new(center - right + up, normal, [0.0, 0.0]),
        Vertex::new(center + right + up, normal, [1.0, 0.0]),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// Current skinning matrix, updated by the animation system.
    pub transform: Mat4,
}

impl Bone {
    pub fn new(name: impl Into<String>, transform: Mat4) -> Self {
        Self { name: name.into(), transform }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkinnedMeshComponent {
    pub mesh: MeshComponent,
    pub bones: Vec<Bone>,
}

impl SkinnedMeshComponent {
    pub fn new(mesh: MeshComponent, bones: Vec<Bone>) -> Self {
        Self { mesh, bones }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialComponent {
    /// Ordered texture list; only the first entry is bound, as the diffuse texture.
    pub textures: Vec<TextureHandle>,
}

impl MaterialComponent {
    pub fn new(textures: Vec<TextureHandle>) -> Self {
        Self { textures }
    }

    pub fn diffuse(&self) -> Option<TextureHandle> {
        self.textures.first().copied()
    }
}

/// Where a sprite's position sits on its quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pivot {
    #[default]
    Center,
    UpperLeft,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteComponent {
    pub texture: TextureHandle,
    /// Pixel-space position; z is the depth in [0, 1].
    pub transform: Transform,
    pub pivot: Pivot,
    pub visible: bool,
    pub enabled: bool,
}

impl SpriteComponent {
    pub fn new(texture: TextureHandle) -> Self {
        Self {
            texture,
            transform: Transform::default(),
            pivot: Pivot::Center,
            visible: true,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightKind {
    #[default]
    Directional,
    Point,
}

impl LightKind {
    /// Code written to the light uniform array.
    pub fn code(self) -> u32 {
        match self {
            LightKind::Directional => 0,
            LightKind::Point => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightComponent {
    pub kind: LightKind,
    pub color: Vec4,
    /// Unit direction the light travels in; zero for point lights.
    pub direction: Vec3,
    pub range: f32,
    pub transform: Transform,
    pub enabled: bool,
}

impl Default for LightComponent {
    fn default() -> Self {
        Self {
            kind: LightKind::Directional,
            color: Vec4::new(0.9, 0.9, 0.9, 1.0),
            direction: Vec3::ZERO,
            range: 1.0,
            transform: Transform::default(),
            enabled: true,
        }
    }
}

impl LightComponent {
    pub fn directional(color: Vec4, direction: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            direction: direction.normalize_or_zero(),
            ..Default::default()
        }
    }

    pub fn point(color: Vec4, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            direction: Vec3::ZERO,
            range,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraComponent {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub enabled: bool,
}

impl CameraComponent {
    pub fn new(position: Vec3, target: Vec3, aspect: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y: 45f32.to_radians(),
            aspect,
            near: 0.1,
            far: 1000.0,
            enabled: true,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Depth range [0, 1].
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}
