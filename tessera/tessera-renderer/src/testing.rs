//! Shared fixtures for renderer tests.

use glam::Vec3;
use render_api::{
    CameraComponent, Component, GpuDevice, MaterialComponent, RecordingDevice, TextureDescriptor, TextureFormat,
    TextureHandle,
};

use crate::{Renderer, RendererConfig};

pub(crate) fn renderer(window_sizes: &[(u32, u32)]) -> Renderer<RecordingDevice> {
    let device = RecordingDevice::with_windows(window_sizes);
    let windows = device.windows();
    Renderer::new(device, &windows, RendererConfig::default()).unwrap()
}

pub(crate) fn material(textures: &[TextureHandle]) -> Component<MaterialComponent> {
    Component::new(MaterialComponent::new(textures.to_vec()))
}

pub(crate) fn camera() -> Component<CameraComponent> {
    Component::new(CameraComponent::new(Vec3::new(0.0, 3.0, 6.0), Vec3::ZERO, 1.0))
}

pub(crate) fn sprite_texture(renderer: &mut Renderer<RecordingDevice>, size: (u32, u32)) -> TextureHandle {
    renderer
        .device_mut()
        .create_texture(&TextureDescriptor::sampled("sprite", size, TextureFormat::Rgba8UnormSrgb))
        .unwrap()
}
