use compositor::CompositorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compositor(#[from] CompositorError),
    #[error("failed to read settings file {path}")]
    ReadSettings {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings")]
    ParseSettings(#[from] serde_json::Error),
    #[error("compositor thread panicked")]
    CompositorThreadPanicked,
}
