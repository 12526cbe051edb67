#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("no outputs are available for capture")]
    NoCaptures,

    #[error("failed to connect to the wayland server")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("failed to dispatch event from wayland server")]
    Dispatch(#[from] wayland_client::DispatchError),

    #[error("buffer mapping failed: {0}")]
    BufferMap(String),

    #[error("buffer import failed: {0}")]
    BufferImport(String),

    #[error("gpu readback failed: {0}")]
    Gpu(String),

    #[error("unexpected compositor event: {0}")]
    Protocol(String),

    #[error("{0}")]
    Unimplemented(String),
}
