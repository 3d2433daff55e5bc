use render_api::{ComponentId, DeviceError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RendererError {
    #[error("{kind} component {id} has been destroyed")]
    ExpiredComponent { kind: &'static str, id: ComponentId },
    #[error("no camera has been set")]
    NoCamera,
    #[error("camera component {0} is disabled")]
    CameraDisabled(ComponentId),
    #[error("render() called before build()")]
    NotBuilt,
    #[error("renderer needs at least one output window")]
    NoWindows,
    #[error("mesh component {0} has no vertices or indices")]
    EmptyMesh(ComponentId),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type Result<T, E = RendererError> = std::result::Result<T, E>;

impl RendererError {
    /// Logs the error at error level and hands it back, for precondition failures.
    pub(crate) fn logged(self) -> Self {
        log::error!("{self}");
        self
    }
}
