/// Adapter and surface settings for [`crate::WgpuDevice`].
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub power_preference: wgpu::PowerPreference,
    /// Falls back to `Fifo` when the surface does not support it.
    pub present_mode: wgpu::PresentMode,
    /// Frames in flight; used as the surfaces' maximum frame latency.
    pub frame_count: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            present_mode: wgpu::PresentMode::Fifo,
            frame_count: 3,
        }
    }
}
