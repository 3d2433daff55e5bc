//! Tessera bridge: `WgpuDevice` implements `render_api::GpuDevice` on wgpu, owning the window
//! surfaces and the embedded WGSL shaders the renderer's pipelines name.

mod config;
mod conversions;
mod device;
pub mod shaders;

pub use config::BridgeConfig;
pub use device::WgpuDevice;
