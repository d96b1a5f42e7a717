use frame_scheduler::PhaseTransitionError;
use resources::ResourceError;
use thiserror::Error;
use viewport::ViewportError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositorError {
    #[error("no renderer is bound")]
    NoRenderer,
    #[error("output surface context was lost")]
    ContextLost,
    #[error("output surface refused to bind to the compositor")]
    OutputSurfaceBindFailed,
    #[error("output surface offers no device to render with")]
    NoRenderingDevice,
    #[error("output surface cannot create a {0:?} renderer")]
    NoSuitableRenderer(render_protocol::RendererKind),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Phase(#[from] PhaseTransitionError),
    #[error(transparent)]
    Viewport(#[from] ViewportError),
}
