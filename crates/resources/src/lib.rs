//! Texture budget and upload bookkeeping for the compositor.
//!
//! `PrioritizedResourceManager` decides which textures may hold memory.
//! `ResourceProvider` tracks the contents uploaded into those textures and the
//! fences that tell when an upload became visible to the renderer.

use geometry::Size;
use render_protocol::ResourceId;
use thiserror::Error;

mod manager;
mod provider;

pub use manager::PrioritizedResourceManager;
pub use provider::{ResourceProvider, UploadState};

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("out of texture memory: requested {requested_bytes} bytes, {available_bytes} available")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
    },
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceId),
    #[error("resource provider lost its context")]
    ProviderLost,
}

pub fn texture_bytes(size: Size) -> usize {
    let width = usize::try_from(size.width.max(0)).unwrap_or(0);
    let height = usize::try_from(size.height.max(0)).unwrap_or(0);
    width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .unwrap_or(usize::MAX)
}
