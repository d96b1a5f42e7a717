//! Seams to the outside world: the output surface and renderer the frames go
//! to, and the host that owns the compositor.

use std::time::Duration;

use geometry::{Rect, Size};
use protocol::{AnimationEvent, ManagedMemoryStats};
use render_protocol::{
    RenderPassId, RenderPassIdHashMap, RenderPassList, RendererCapabilities, RendererKind,
};
use resources::ResourceProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputSurfaceCapabilities {
    pub has_parent_compositor: bool,
    pub has_context3d: bool,
    pub has_software_device: bool,
}

impl OutputSurfaceCapabilities {
    /// Renderer kind used for a surface with these capabilities, if any.
    pub fn preferred_renderer_kind(&self) -> Option<RendererKind> {
        if self.has_parent_compositor {
            Some(RendererKind::Delegating)
        } else if self.has_context3d {
            Some(RendererKind::Gl)
        } else if self.has_software_device {
            Some(RendererKind::Software)
        } else {
            None
        }
    }
}

pub trait OutputSurface {
    /// Returns false when the surface cannot be used by this compositor.
    fn bind_to_client(&mut self) -> bool;

    fn capabilities(&self) -> OutputSurfaceCapabilities;

    fn create_renderer(&mut self, kind: RendererKind) -> Option<Box<dyn Renderer>>;
}

pub trait Renderer {
    fn capabilities(&self) -> RendererCapabilities;

    fn kind(&self) -> RendererKind;

    fn decide_render_pass_allocations_for_frame(
        &mut self,
        render_passes: &RenderPassList,
        render_passes_by_id: &RenderPassIdHashMap,
    );

    fn have_cached_resources_for_render_pass_id(&self, id: RenderPassId) -> bool;

    /// Paints the passes in list order. Both containers must be empty on
    /// return.
    fn draw_frame(
        &mut self,
        render_passes: &mut RenderPassList,
        render_passes_by_id: &mut RenderPassIdHashMap,
        resources: &ResourceProvider,
    );

    fn finish(&mut self);

    fn swap_buffers(&mut self) -> bool;

    fn is_context_lost(&self) -> bool;

    fn viewport_changed(&mut self, device_viewport_size: Size);

    fn set_visible(&mut self, visible: bool);

    /// RGBA8 pixels of `rect` in the last drawn frame.
    fn get_framebuffer_pixels(&mut self, rect: Rect) -> Option<Vec<u8>>;

    fn send_managed_memory_stats(&mut self, stats: ManagedMemoryStats);

    fn receive_compositor_frame_ack(&mut self);
}

/// Host-side notifications raised by the compositor.
pub trait CompositorClient {
    fn set_needs_redraw_on_impl_thread(&mut self);

    fn set_needs_commit_on_impl_thread(&mut self);

    fn set_needs_manage_tiles_on_impl_thread(&mut self);

    fn on_can_draw_state_changed(&mut self, can_draw: bool);

    fn did_lose_output_surface_on_impl_thread(&mut self);

    fn on_swap_buffers_complete_on_impl_thread(&mut self);

    fn post_animation_events_to_main_thread_on_impl_thread(
        &mut self,
        events: Vec<AnimationEvent>,
        wall_clock_time: f64,
    );

    /// Asks the host to evict contents textures. Returns true when anything
    /// was evicted.
    fn reduce_contents_texture_memory_on_impl_thread(
        &mut self,
        limit_bytes: usize,
        priority_cutoff: i32,
    ) -> bool;

    fn send_managed_memory_stats(&mut self, stats: ManagedMemoryStats);

    fn on_vsync_parameters_changed(&mut self, timebase: Duration, interval: Duration);
}
