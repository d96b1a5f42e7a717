//! Compositor crate root.
//!
//! `Compositor` turns a retained layer tree into render passes for an
//! abstract renderer, and keeps scrolling, pinch-zoom and animations running
//! without a round trip to the host that owns the tree.
//!
//! Internal architecture overview:
//! - `compositor_frame`: drawability, frame preparation, submission and swap.
//! - `compositor_input`: hit testing and scroll/pinch routing.
//! - `compositor_animation`: layer, page-scale and scrollbar animation ticks.
//! - `compositor_memory`: memory policy, visibility and tile uploads.
//! - `compositor_commit`: commits, viewport changes, output-surface lifecycle.
//! - `layer`/`draw_properties`/`damage`/`occlusion`/`quad`/`render_pass`: the
//!   frame pipeline shared by the orchestration modules.

use std::time::Instant;

use frame_scheduler::{DelayBasedTimeSource, FramePhase, FramePhaseTracker};
use geometry::{PointF, Size};
use protocol::{ManagedMemoryPolicy, ManagedMemoryStats};
use render_protocol::{Color, LayerId, RendererCapabilities};
use resources::{PrioritizedResourceManager, ResourceProvider};
use viewport::PinchZoomViewport;

pub mod animation;
pub mod damage;
pub mod debug;
pub mod draw_properties;
pub mod frame;
pub mod headless;
pub mod layer;
pub mod layer_iterator;
pub mod occlusion;
pub mod output;
pub mod quad;
pub mod render_pass;
pub mod render_surface;
pub mod settings;
pub mod stats;

mod error;

pub use compositor_commit::CompositorFrameMetadata;
pub use compositor_input::{SCROLL_MOVE_THRESHOLD, SCROLL_PROPAGATION_ANGLE_THRESHOLD_DEGREES, ScrollStatus};
pub use error::CompositorError;
pub use frame::Frame;
pub use layer::{Layer, LayerContent, LayerTree, TiledContent};
pub use output::{CompositorClient, OutputSurface, OutputSurfaceCapabilities, Renderer};
pub use settings::{CompositorSettings, DebugState};
pub use stats::RenderingStats;

use debug::{DebugRect, DebugRectHistory};
use render_pass::RenderPassTextures;
use stats::FrameRateCounter;

struct OutputState {
    output_surface: Option<Box<dyn OutputSurface>>,
    renderer: Option<Box<dyn Renderer>>,
    resource_provider: ResourceProvider,
}

struct ViewportState {
    pinch_zoom_viewport: PinchZoomViewport,
    layout_viewport_size: Size,
    device_viewport_size: Size,
}

struct FrameState {
    phase: FramePhaseTracker,
    needs_update_draw_properties: bool,
    render_surface_layer_list: Vec<LayerId>,
    render_pass_textures: RenderPassTextures,
    background_color: Color,
    has_transparent_background: bool,
    contents_textures_purged: bool,
}

struct InputState {
    root_scroll_layer: Option<LayerId>,
    currently_scrolling_layer: Option<LayerId>,
    scroll_delta_is_in_viewport_space: bool,
    pinch_gesture_active: bool,
    previous_pinch_anchor: PointF,
}

struct AnimationState {
    needs_animate_layers: bool,
    page_scale_animation: Option<animation::PageScaleAnimation>,
    background_ticker: DelayBasedTimeSource,
}

struct MemoryState {
    visible: bool,
    policy: ManagedMemoryPolicy,
    resource_manager: PrioritizedResourceManager,
    last_sent_memory_stats: ManagedMemoryStats,
}

struct StatsState {
    time_origin: Instant,
    fps_counter: FrameRateCounter,
    debug_rect_history: DebugRectHistory,
    num_impl_thread_scrolls: u64,
    num_main_thread_scrolls: u64,
    cumulative_num_layers_drawn: u64,
    cumulative_num_missing_tiles: u64,
}

/// Produces frames from the active layer tree.
///
/// All methods run on the compositor's own thread. Notifications for the
/// owning host go through `C`.
pub struct Compositor<C: CompositorClient> {
    client: C,
    settings: CompositorSettings,
    debug_state: DebugState,
    tree: LayerTree,
    output_state: OutputState,
    viewport_state: ViewportState,
    frame_state: FrameState,
    input_state: InputState,
    animation_state: AnimationState,
    memory_state: MemoryState,
    stats_state: StatsState,
}

impl<C: CompositorClient> Compositor<C> {
    pub fn new(settings: CompositorSettings, client: C) -> Self {
        let policy = ManagedMemoryPolicy::default();
        let mut resource_manager = PrioritizedResourceManager::new(policy.bytes_limit(true));
        resource_manager.set_external_priority_cutoff(policy.priority_cutoff(true));
        let now = Instant::now();

        Self {
            client,
            debug_state: settings.initial_debug_state,
            tree: LayerTree::new(),
            output_state: OutputState {
                output_surface: None,
                renderer: None,
                resource_provider: ResourceProvider::new(settings.max_blocking_uploads),
            },
            viewport_state: ViewportState {
                pinch_zoom_viewport: PinchZoomViewport::default(),
                layout_viewport_size: Size::default(),
                device_viewport_size: Size::default(),
            },
            frame_state: FrameState {
                phase: FramePhaseTracker::default(),
                needs_update_draw_properties: true,
                render_surface_layer_list: Vec::new(),
                render_pass_textures: RenderPassTextures::default(),
                background_color: Color::WHITE,
                has_transparent_background: false,
                contents_textures_purged: false,
            },
            input_state: InputState {
                root_scroll_layer: None,
                currently_scrolling_layer: None,
                scroll_delta_is_in_viewport_space: false,
                pinch_gesture_active: false,
                previous_pinch_anchor: PointF::origin(),
            },
            animation_state: AnimationState {
                needs_animate_layers: false,
                page_scale_animation: None,
                background_ticker: DelayBasedTimeSource::new(
                    frame_scheduler::LOW_FREQUENCY_ANIMATION_INTERVAL,
                    now,
                ),
            },
            memory_state: MemoryState {
                visible: true,
                policy,
                resource_manager,
                last_sent_memory_stats: ManagedMemoryStats::default(),
            },
            stats_state: StatsState {
                time_origin: now,
                fps_counter: FrameRateCounter::new(true),
                debug_rect_history: DebugRectHistory::default(),
                num_impl_thread_scrolls: 0,
                num_main_thread_scrolls: 0,
                cumulative_num_layers_drawn: 0,
                cumulative_num_missing_tiles: 0,
            },
            settings,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    pub fn debug_state(&self) -> &DebugState {
        &self.debug_state
    }

    pub fn set_debug_state(&mut self, debug_state: DebugState) {
        self.debug_state = debug_state;
    }

    pub fn tree(&self) -> &LayerTree {
        &self.tree
    }

    /// Mutable access to the active tree. Draw properties are recomputed
    /// before the next use.
    pub fn tree_mut(&mut self) -> &mut LayerTree {
        self.set_needs_update_draw_properties();
        &mut self.tree
    }

    pub fn root_layer(&self) -> Option<LayerId> {
        self.tree.root()
    }

    pub fn root_scroll_layer(&self) -> Option<LayerId> {
        self.input_state.root_scroll_layer
    }

    pub fn currently_scrolling_layer(&self) -> Option<LayerId> {
        self.input_state.currently_scrolling_layer
    }

    pub fn pinch_gesture_active(&self) -> bool {
        self.input_state.pinch_gesture_active
    }

    pub fn pinch_zoom_viewport(&self) -> &PinchZoomViewport {
        &self.viewport_state.pinch_zoom_viewport
    }

    pub fn layout_viewport_size(&self) -> Size {
        self.viewport_state.layout_viewport_size
    }

    pub fn device_viewport_size(&self) -> Size {
        self.viewport_state.device_viewport_size
    }

    pub fn device_scale_factor(&self) -> f32 {
        self.viewport_state.pinch_zoom_viewport.device_scale_factor()
    }

    pub fn visible(&self) -> bool {
        self.memory_state.visible
    }

    pub fn managed_memory_policy(&self) -> ManagedMemoryPolicy {
        self.memory_state.policy
    }

    pub fn resource_manager(&self) -> &PrioritizedResourceManager {
        &self.memory_state.resource_manager
    }

    pub fn resource_provider(&self) -> &ResourceProvider {
        &self.output_state.resource_provider
    }

    pub fn renderer(&self) -> Option<&dyn Renderer> {
        self.output_state.renderer.as_deref()
    }

    pub fn renderer_capabilities(&self) -> Option<RendererCapabilities> {
        self.output_state.renderer.as_ref().map(|renderer| renderer.capabilities())
    }

    pub fn background_color(&self) -> Color {
        self.frame_state.background_color
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.frame_state.background_color = color;
    }

    pub fn has_transparent_background(&self) -> bool {
        self.frame_state.has_transparent_background
    }

    pub fn set_has_transparent_background(&mut self, transparent: bool) {
        self.frame_state.has_transparent_background = transparent;
    }

    pub fn contents_textures_purged(&self) -> bool {
        self.frame_state.contents_textures_purged
    }

    pub fn frame_phase(&self) -> FramePhase {
        self.frame_state.phase.phase()
    }

    pub fn needs_update_draw_properties(&self) -> bool {
        self.frame_state.needs_update_draw_properties
    }

    pub fn set_needs_update_draw_properties(&mut self) {
        self.frame_state.needs_update_draw_properties = true;
        self.frame_state.phase.invalidate();
    }

    /// Targets of the last draw-properties pass, root surface first.
    pub fn render_surface_layer_list(&self) -> &[LayerId] {
        &self.frame_state.render_surface_layer_list
    }

    pub fn debug_rects(&self) -> &[DebugRect] {
        self.stats_state.debug_rect_history.debug_rects()
    }

    pub fn layer_tree_as_text(&self) -> String {
        debug::layer_tree_as_text(&self.tree)
    }

    pub fn layer_tree_as_json(&self) -> String {
        debug::layer_tree_as_json(&self.tree)
    }
}

mod compositor_animation;

mod compositor_commit;

mod compositor_frame;

mod compositor_input;

mod compositor_memory;

#[cfg(test)]
mod tests;
