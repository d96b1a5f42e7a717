use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use geometry::{PointF, Rect, Region, Size, Vector2d, Vector2dF};
use pretty_assertions::assert_eq;
use protocol::{AnimationEvent, AnimationEventKind, ManagedMemoryPolicy, ManagedMemoryStats, ScrollInputType};
use render_protocol::{
    Color, DrawQuadMaterial, LayerId, RenderPassId, RenderPassIdHashMap, RenderPassList, RendererCapabilities,
    RendererKind,
};
use resources::ResourceProvider;

use super::*;
use crate::animation::{AnimationCurve, KeyframeAnimation};
use crate::compositor_memory::MEMORY_STATS_ROUNDING_STEP;
use crate::layer::TileState;

#[derive(Debug, Default)]
struct RecordingClient {
    redraws: usize,
    commits: usize,
    manage_tiles: usize,
    can_draw_changes: Vec<bool>,
    output_surface_losses: usize,
    swaps_completed: usize,
    animation_events: Vec<AnimationEvent>,
    memory_stats: Vec<ManagedMemoryStats>,
    evict_on_reduce: bool,
}

impl CompositorClient for RecordingClient {
    fn set_needs_redraw_on_impl_thread(&mut self) {
        self.redraws += 1;
    }

    fn set_needs_commit_on_impl_thread(&mut self) {
        self.commits += 1;
    }

    fn set_needs_manage_tiles_on_impl_thread(&mut self) {
        self.manage_tiles += 1;
    }

    fn on_can_draw_state_changed(&mut self, can_draw: bool) {
        self.can_draw_changes.push(can_draw);
    }

    fn did_lose_output_surface_on_impl_thread(&mut self) {
        self.output_surface_losses += 1;
    }

    fn on_swap_buffers_complete_on_impl_thread(&mut self) {
        self.swaps_completed += 1;
    }

    fn post_animation_events_to_main_thread_on_impl_thread(
        &mut self,
        events: Vec<AnimationEvent>,
        _wall_clock_time: f64,
    ) {
        self.animation_events.extend(events);
    }

    fn reduce_contents_texture_memory_on_impl_thread(&mut self, _limit_bytes: usize, _priority_cutoff: i32) -> bool {
        self.evict_on_reduce
    }

    fn send_managed_memory_stats(&mut self, stats: ManagedMemoryStats) {
        self.memory_stats.push(stats);
    }

    fn on_vsync_parameters_changed(&mut self, _timebase: Duration, _interval: Duration) {}
}

/// What the fake renderer saw of one drawn pass.
#[derive(Debug, Clone, PartialEq)]
struct DrawnPass {
    id: RenderPassId,
    materials: Vec<DrawQuadMaterial>,
}

#[derive(Debug, Default)]
struct FakeRendererState {
    frames: Vec<Vec<DrawnPass>>,
    swaps: usize,
    context_lost: bool,
    visible: bool,
    viewport: Size,
    memory_stats: Vec<ManagedMemoryStats>,
}

struct FakeRenderer {
    state: Rc<RefCell<FakeRendererState>>,
}

impl Renderer for FakeRenderer {
    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities {
            using_swap_complete_callback: false,
            ..RendererCapabilities::default()
        }
    }

    fn kind(&self) -> RendererKind {
        RendererKind::Software
    }

    fn decide_render_pass_allocations_for_frame(&mut self, _: &RenderPassList, _: &RenderPassIdHashMap) {}

    fn have_cached_resources_for_render_pass_id(&self, _id: RenderPassId) -> bool {
        false
    }

    fn draw_frame(
        &mut self,
        render_passes: &mut RenderPassList,
        render_passes_by_id: &mut RenderPassIdHashMap,
        _resources: &ResourceProvider,
    ) {
        let drawn = render_passes
            .iter()
            .filter_map(|id| render_passes_by_id.get(id))
            .map(|pass| DrawnPass {
                id: pass.id,
                materials: pass.quad_list.iter().map(|quad| quad.material.clone()).collect(),
            })
            .collect();
        self.state.borrow_mut().frames.push(drawn);
        render_passes.clear();
        render_passes_by_id.clear();
    }

    fn finish(&mut self) {}

    fn swap_buffers(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.context_lost {
            return false;
        }
        state.swaps += 1;
        true
    }

    fn is_context_lost(&self) -> bool {
        self.state.borrow().context_lost
    }

    fn viewport_changed(&mut self, device_viewport_size: Size) {
        self.state.borrow_mut().viewport = device_viewport_size;
    }

    fn set_visible(&mut self, visible: bool) {
        self.state.borrow_mut().visible = visible;
    }

    fn get_framebuffer_pixels(&mut self, _rect: Rect) -> Option<Vec<u8>> {
        None
    }

    fn send_managed_memory_stats(&mut self, stats: ManagedMemoryStats) {
        self.state.borrow_mut().memory_stats.push(stats);
    }

    fn receive_compositor_frame_ack(&mut self) {}
}

struct FakeOutputSurface {
    state: Rc<RefCell<FakeRendererState>>,
    capabilities: OutputSurfaceCapabilities,
}

impl FakeOutputSurface {
    fn software(state: Rc<RefCell<FakeRendererState>>) -> Box<Self> {
        Box::new(Self {
            state,
            capabilities: OutputSurfaceCapabilities {
                has_software_device: true,
                ..OutputSurfaceCapabilities::default()
            },
        })
    }
}

impl OutputSurface for FakeOutputSurface {
    fn bind_to_client(&mut self) -> bool {
        true
    }

    fn capabilities(&self) -> OutputSurfaceCapabilities {
        self.capabilities
    }

    fn create_renderer(&mut self, kind: RendererKind) -> Option<Box<dyn Renderer>> {
        (kind == RendererKind::Software).then(|| {
            self.state.borrow_mut().visible = true;
            Box::new(FakeRenderer {
                state: self.state.clone(),
            }) as Box<dyn Renderer>
        })
    }
}

const VIEWPORT: Size = Size::new(100, 100);
const RED: Color = Color::from_argb(255, 255, 0, 0);

fn compositor() -> (Compositor<RecordingClient>, Rc<RefCell<FakeRendererState>>) {
    compositor_with_settings(CompositorSettings::default())
}

fn compositor_with_settings(
    settings: CompositorSettings,
) -> (Compositor<RecordingClient>, Rc<RefCell<FakeRendererState>>) {
    let state = Rc::new(RefCell::new(FakeRendererState::default()));
    let mut compositor = Compositor::new(settings, RecordingClient::default());
    compositor.set_viewport_size(VIEWPORT, VIEWPORT);
    compositor
        .initialize_renderer(FakeOutputSurface::software(state.clone()))
        .expect("initialize renderer");
    (compositor, state)
}

fn container(tree: &mut LayerTree, id: u64, bounds: Size) -> LayerId {
    let layer = tree.insert(Layer::new(LayerId(id)));
    tree.get_mut(layer).set_bounds(bounds);
    layer
}

/// Root with a single opaque child covering the viewport.
fn opaque_child_tree() -> (LayerTree, LayerId) {
    let mut tree = LayerTree::new();
    let root = container(&mut tree, 1, VIEWPORT);
    let child = tree.insert(Layer::solid_color(LayerId(2), VIEWPORT, RED));
    tree.add_child(root, child);
    tree.set_root(Some(root));
    (tree, child)
}

/// Root, a scrolling layer and a 200x200 content layer inside it.
fn scrolling_tree() -> (LayerTree, LayerId) {
    let mut tree = LayerTree::new();
    let root = container(&mut tree, 1, VIEWPORT);
    let scroller = container(&mut tree, 2, VIEWPORT);
    tree.get_mut(scroller).set_scrollable(true);
    let content = tree.insert(Layer::solid_color(LayerId(3), Size::new(200, 200), RED));
    tree.add_child(root, scroller);
    tree.add_child(scroller, content);
    tree.set_root(Some(root));
    (tree, scroller)
}

fn draw_one_frame(compositor: &mut Compositor<RecordingClient>) -> bool {
    let mut frame = Frame::new();
    let draw = compositor.prepare_to_draw(&mut frame).expect("prepare");
    compositor.draw_layers(&mut frame).expect("draw");
    compositor.did_draw_all_layers(&frame);
    compositor.swap_buffers().expect("swap");
    draw
}

#[test]
fn cannot_draw_without_a_root_layer() {
    let (compositor, _) = compositor();
    assert!(!compositor.can_draw());
    assert!(!compositor.can_draw());
}

#[test]
fn cannot_draw_without_a_renderer_or_viewport() {
    let mut compositor = Compositor::new(CompositorSettings::default(), RecordingClient::default());
    compositor.set_root_layer(opaque_child_tree().0);
    assert!(!compositor.can_draw());
    compositor.set_viewport_size(VIEWPORT, VIEWPORT);
    assert!(!compositor.can_draw());

    let state = Rc::new(RefCell::new(FakeRendererState::default()));
    compositor
        .initialize_renderer(FakeOutputSurface::software(state))
        .expect("initialize renderer");
    assert!(compositor.can_draw());
    assert_eq!(compositor.client().can_draw_changes.last(), Some(&true));
}

#[test]
fn opaque_child_covering_the_viewport_needs_no_background_fill() {
    let (mut compositor, state) = compositor();
    compositor.set_root_layer(opaque_child_tree().0);
    assert!(compositor.can_draw());

    assert!(draw_one_frame(&mut compositor));

    let state = state.borrow();
    assert_eq!(state.frames.len(), 1);
    let passes = &state.frames[0];
    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].id, RenderPassId::new(LayerId(1), 0));
    assert_eq!(passes[0].materials, vec![DrawQuadMaterial::SolidColor { color: RED }]);
    assert_eq!(state.swaps, 1);
}

#[test]
fn uncovered_viewport_is_filled_with_the_background_color() {
    let (mut compositor, state) = compositor();
    let (mut tree, child) = opaque_child_tree();
    tree.get_mut(child).set_bounds(Size::new(50, 100));
    compositor.set_root_layer(tree);

    assert!(draw_one_frame(&mut compositor));

    let state = state.borrow();
    let materials = &state.frames[0][0].materials;
    assert!(materials.contains(&DrawQuadMaterial::SolidColor { color: RED }));
    assert!(materials.contains(&DrawQuadMaterial::SolidColor { color: Color::WHITE }));
}

#[test]
fn frame_containers_are_empty_after_drawing() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(opaque_child_tree().0);

    let mut frame = Frame::new();
    compositor.prepare_to_draw(&mut frame).expect("prepare");
    assert!(!frame.render_passes.is_empty());
    compositor.draw_layers(&mut frame).expect("draw");
    assert!(frame.render_passes.is_empty());
    assert!(frame.render_passes_by_id.is_empty());
}

#[test]
fn swap_without_a_completion_callback_completes_the_frame() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(opaque_child_tree().0);

    let mut frame = Frame::new();
    compositor.prepare_to_draw(&mut frame).expect("prepare");
    assert_eq!(compositor.frame_phase(), FramePhase::PassesBuilt);
    compositor.draw_layers(&mut frame).expect("draw");
    assert_eq!(compositor.frame_phase(), FramePhase::Submitted);
    assert!(compositor.swap_buffers().expect("swap"));
    assert_eq!(compositor.frame_phase(), FramePhase::Completed);
    assert_eq!(compositor.client().swaps_completed, 1);
}

#[test]
fn lost_context_refuses_frames_until_a_new_renderer_is_bound() {
    let (mut compositor, state) = compositor();
    compositor.set_root_layer(opaque_child_tree().0);
    assert!(draw_one_frame(&mut compositor));

    state.borrow_mut().context_lost = true;
    compositor.did_lose_output_surface();
    assert_eq!(compositor.client().output_surface_losses, 1);
    assert!(compositor.can_draw());
    let mut frame = Frame::new();
    assert!(matches!(
        compositor.prepare_to_draw(&mut frame),
        Err(CompositorError::ContextLost)
    ));
    assert!(!compositor.swap_buffers().expect("swap"));

    let fresh = Rc::new(RefCell::new(FakeRendererState::default()));
    compositor
        .initialize_renderer(FakeOutputSurface::software(fresh.clone()))
        .expect("reinitialize renderer");
    assert!(!compositor.resource_provider().is_context_lost());
    assert!(draw_one_frame(&mut compositor));
    assert_eq!(fresh.borrow().frames.len(), 1);
    assert_eq!(fresh.borrow().viewport, VIEWPORT);
}

#[test]
fn output_surface_without_a_device_is_rejected() {
    let state = Rc::new(RefCell::new(FakeRendererState::default()));
    let mut compositor = Compositor::new(CompositorSettings::default(), RecordingClient::default());
    let surface = Box::new(FakeOutputSurface {
        state,
        capabilities: OutputSurfaceCapabilities::default(),
    });
    assert!(matches!(
        compositor.initialize_renderer(surface),
        Err(CompositorError::NoRenderingDevice)
    ));
    assert!(compositor.renderer().is_none());
}

#[test]
fn surface_textures_over_budget_drop_the_frame() {
    let (mut compositor, state) = compositor();
    let mut tree = LayerTree::new();
    let root = container(&mut tree, 1, VIEWPORT);
    let group = container(&mut tree, 2, Size::new(50, 50));
    tree.get_mut(group).set_opacity(0.5);
    let first = tree.insert(Layer::solid_color(LayerId(3), Size::new(20, 20), RED));
    let second = tree.insert(Layer::solid_color(LayerId(4), Size::new(20, 20), RED));
    tree.get_mut(second).set_position(PointF::new(10.0, 10.0));
    tree.add_child(root, group);
    tree.add_child(group, first);
    tree.add_child(group, second);
    tree.set_root(Some(root));
    compositor.set_root_layer(tree);
    compositor.set_managed_memory_policy(ManagedMemoryPolicy::new(1));

    let mut frame = Frame::new();
    assert!(!compositor.prepare_to_draw(&mut frame).expect("prepare"));
    assert!(state.borrow().frames.is_empty());

    compositor.set_managed_memory_policy(ManagedMemoryPolicy::default());
    assert!(draw_one_frame(&mut compositor));
    assert_eq!(state.borrow().frames[0].len(), 2);
}

#[test]
fn pinch_zoom_is_clamped_to_the_maximum_scale() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(scrolling_tree().0);
    compositor
        .set_page_scale_factor_and_limits(1.0, 1.0, 3.0)
        .expect("page scale limits");

    compositor.pinch_gesture_begin();
    compositor
        .pinch_gesture_update(2.0, PointF::origin())
        .expect("first pinch update");
    compositor
        .pinch_gesture_update(2.0, PointF::origin())
        .expect("second pinch update");
    compositor.pinch_gesture_end();

    assert_eq!(compositor.pinch_zoom_viewport().total_page_scale_factor(), 3.0);
    assert!(!compositor.pinch_gesture_active());
    let scroll_info = compositor.process_scroll_deltas().expect("scroll deltas");
    assert_eq!(scroll_info.page_scale_delta, 3.0);
}

#[test]
fn max_scroll_offset_never_goes_negative() {
    let (mut compositor, _) = compositor();
    let (mut tree, scroller) = scrolling_tree();
    let content = LayerId(3);
    tree.get_mut(content).set_bounds(Size::new(40, 40));
    compositor.set_root_layer(tree);

    let layer = compositor.tree().layer(scroller).expect("scroller");
    assert_eq!(layer.max_scroll_offset(), Vector2d::zero());
}

#[test]
fn root_scroll_layer_scrolls_within_its_content() {
    let (mut compositor, _) = compositor();
    let (tree, scroller) = scrolling_tree();
    compositor.set_root_layer(tree);
    assert_eq!(compositor.root_scroll_layer(), Some(scroller));
    assert_eq!(
        compositor.tree().layer(scroller).expect("scroller").max_scroll_offset(),
        Vector2d::new(100, 100)
    );

    assert_eq!(
        compositor.scroll_begin(PointF::new(10.0, 10.0), ScrollInputType::Wheel),
        ScrollStatus::Started
    );
    assert!(compositor.scroll_by(PointF::new(10.0, 10.0), Vector2dF::new(0.0, 150.0)));
    compositor.scroll_end();

    let scroll_info = compositor.process_scroll_deltas().expect("scroll deltas");
    assert_eq!(scroll_info.scrolls.len(), 1);
    assert_eq!(scroll_info.scrolls[0].layer_id, scroller);
    assert_eq!(scroll_info.scrolls[0].scroll_delta, Vector2d::new(0, 100));
    assert_eq!(compositor.rendering_stats().num_impl_thread_scrolls, 1);
}

/// Outer scroller with room to move and a nested scroller that can only
/// take 6 pixels horizontally.
fn nested_scrollers(compositor: &mut Compositor<RecordingClient>) -> (LayerId, LayerId) {
    let mut tree = LayerTree::new();
    let root = container(&mut tree, 1, VIEWPORT);
    let outer = container(&mut tree, 2, VIEWPORT);
    tree.get_mut(outer).set_scrollable(true);
    let inner = tree.insert(Layer::solid_color(LayerId(3), Size::new(50, 50), RED));
    tree.get_mut(inner).set_scrollable(true);
    tree.add_child(root, outer);
    tree.add_child(outer, inner);
    tree.set_root(Some(root));
    compositor.set_root_layer(tree);

    let tree = compositor.tree_mut();
    tree.get_mut(outer).set_max_scroll_offset(Vector2d::new(20, 20));
    tree.get_mut(inner).set_max_scroll_offset(Vector2d::new(6, 0));
    (outer, inner)
}

#[test]
fn scroll_consumed_in_the_requested_direction_does_not_bubble() {
    let (mut compositor, _) = compositor();
    let (outer, inner) = nested_scrollers(&mut compositor);

    assert_eq!(
        compositor.scroll_begin(PointF::new(10.0, 10.0), ScrollInputType::Wheel),
        ScrollStatus::Started
    );
    assert_eq!(compositor.currently_scrolling_layer(), Some(inner));
    assert!(compositor.scroll_by(PointF::new(10.0, 10.0), Vector2dF::new(10.0, 0.0)));

    assert_eq!(compositor.tree().layer(inner).expect("inner").scroll_delta(), Vector2dF::new(6.0, 0.0));
    assert_eq!(compositor.tree().layer(outer).expect("outer").scroll_delta(), Vector2dF::zero());
    assert!(compositor.client().commits > 0);
    assert!(compositor.client().redraws > 0);
}

#[test]
fn gesture_scroll_consumed_in_the_requested_direction_does_not_bubble() {
    let (mut compositor, _) = compositor();
    let (outer, inner) = nested_scrollers(&mut compositor);

    assert_eq!(
        compositor.scroll_begin(PointF::new(10.0, 10.0), ScrollInputType::Gesture),
        ScrollStatus::Started
    );
    assert!(compositor.scroll_by(PointF::new(10.0, 10.0), Vector2dF::new(10.0, 0.0)));

    assert_eq!(compositor.tree().layer(inner).expect("inner").scroll_delta(), Vector2dF::new(6.0, 0.0));
    assert_eq!(compositor.tree().layer(outer).expect("outer").scroll_delta(), Vector2dF::zero());
}

#[test]
fn perpendicular_remainder_bubbles_to_the_parent() {
    let (mut compositor, _) = compositor();
    let (outer, inner) = nested_scrollers(&mut compositor);

    compositor.scroll_begin(PointF::new(10.0, 10.0), ScrollInputType::Wheel);
    assert!(compositor.scroll_by(PointF::new(10.0, 10.0), Vector2dF::new(0.0, 10.0)));

    assert_eq!(compositor.tree().layer(inner).expect("inner").scroll_delta(), Vector2dF::zero());
    assert_eq!(
        compositor.tree().layer(outer).expect("outer").scroll_delta(),
        Vector2dF::new(0.0, 10.0)
    );
}

#[test]
fn scroll_over_nothing_is_ignored() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(opaque_child_tree().0);
    assert_eq!(
        compositor.scroll_begin(PointF::new(10.0, 10.0), ScrollInputType::Wheel),
        ScrollStatus::Ignored
    );
    assert!(!compositor.scroll_by(PointF::new(10.0, 10.0), Vector2dF::new(0.0, 5.0)));
}

#[test]
fn wheel_handlers_send_wheel_scrolls_to_the_main_thread() {
    let (mut compositor, _) = compositor();
    let (_, inner) = nested_scrollers(&mut compositor);
    compositor
        .tree_mut()
        .get_mut(inner)
        .set_have_wheel_event_handlers(true);

    assert_eq!(
        compositor.scroll_begin(PointF::new(10.0, 10.0), ScrollInputType::Wheel),
        ScrollStatus::OnMainThread
    );
    assert_eq!(
        compositor.scroll_begin(PointF::new(10.0, 10.0), ScrollInputType::Gesture),
        ScrollStatus::Started
    );
    assert_eq!(compositor.rendering_stats().num_main_thread_scrolls, 1);
}

#[test]
fn touch_handler_region_is_hit_tested_in_layer_space() {
    let (mut compositor, _) = compositor();
    let (tree, child) = opaque_child_tree();
    compositor.set_root_layer(tree);
    compositor
        .tree_mut()
        .get_mut(child)
        .set_touch_event_handler_region(Region::from_rect(Rect::new(0, 0, 10, 10)));

    assert!(compositor.have_touch_event_handlers_at(PointF::new(5.0, 5.0)));
    assert!(!compositor.have_touch_event_handlers_at(PointF::new(50.0, 50.0)));
}

#[test]
fn layer_animation_events_are_posted_to_the_host() {
    let (mut compositor, _) = compositor();
    let (mut tree, child) = opaque_child_tree();
    tree.get_mut(child).animation_controller_mut().add_animation(KeyframeAnimation::new(
        7,
        AnimationCurve::Opacity { from: 1.0, to: 0.0 },
        1.0,
    ));
    compositor.set_root_layer(tree);

    let start = Instant::now();
    compositor.animate(start, 0.0).expect("animate");
    let events = &compositor.client().animation_events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AnimationEventKind::Started);
    assert_eq!(events[0].layer_id, child);
    assert_eq!(events[0].animation_id, 7);
    assert!(compositor.needs_animate());

    compositor
        .animate(start + Duration::from_secs(2), 2.0)
        .expect("animate to the end");
    assert_eq!(compositor.tree().layer(child).expect("child").opacity(), 0.0);
    assert!(
        compositor
            .client()
            .animation_events
            .iter()
            .any(|event| event.kind == AnimationEventKind::Finished)
    );
}

#[test]
fn page_scale_animation_commits_once_when_it_finishes() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(scrolling_tree().0);
    compositor
        .set_page_scale_factor_and_limits(1.0, 0.5, 4.0)
        .expect("page scale limits");

    let start = Instant::now();
    compositor.start_page_scale_animation(Vector2d::zero(), false, 2.0, start, Duration::from_millis(100));
    assert!(compositor.needs_animate());

    compositor
        .animate(start + Duration::from_millis(50), 0.05)
        .expect("animate halfway");
    let commits_before_end = compositor.client().commits;
    compositor
        .animate(start + Duration::from_millis(200), 0.2)
        .expect("animate past the end");

    assert_eq!(compositor.client().commits, commits_before_end + 1);
    assert_eq!(compositor.pinch_zoom_viewport().total_page_scale_factor(), 2.0);
    compositor
        .animate(start + Duration::from_millis(300), 0.3)
        .expect("animate after the end");
    assert_eq!(compositor.client().commits, commits_before_end + 1);
}

#[test]
fn hidden_compositor_ticks_animations_in_the_background() {
    let (mut compositor, state) = compositor();
    compositor.set_root_layer(opaque_child_tree().0);
    compositor.set_needs_animate_layers();
    assert!(!compositor.is_background_ticking());

    compositor.set_visible(false);
    assert!(compositor.is_background_ticking());
    assert!(!state.borrow().visible);

    compositor.set_visible(true);
    assert!(!compositor.is_background_ticking());
    assert!(state.borrow().visible);
}

#[test]
fn host_eviction_marks_contents_purged_until_the_next_commit() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(opaque_child_tree().0);
    compositor.client_mut().evict_on_reduce = true;

    compositor.set_visible(false);
    assert!(compositor.contents_textures_purged());
    assert!(!compositor.can_draw());
    assert_eq!(compositor.client().can_draw_changes.last(), Some(&false));

    compositor.client_mut().evict_on_reduce = false;
    compositor.set_visible(true);
    compositor.commit_complete();
    assert!(!compositor.contents_textures_purged());
    assert!(compositor.can_draw());
}

fn tiled_tree() -> (LayerTree, LayerId) {
    let mut tree = LayerTree::new();
    let root = container(&mut tree, 1, VIEWPORT);
    let tiled = tree.insert(Layer::tiled(
        LayerId(2),
        VIEWPORT,
        TiledContent::new(Size::new(50, 50), RED),
    ));
    tree.add_child(root, tiled);
    tree.set_root(Some(root));
    (tree, tiled)
}

fn tile_states(compositor: &Compositor<RecordingClient>, id: LayerId) -> Vec<TileState> {
    let layer = compositor.tree().layer(id).expect("tiled layer");
    let LayerContent::Tiled(tiled) = layer.content() else {
        panic!("layer {id} is not tiled");
    };
    tiled
        .tile_indices_covering(Rect::from_size(layer.content_bounds()))
        .into_iter()
        .map(|index| tiled.tile_state(index, compositor.resource_provider()))
        .collect()
}

#[test]
fn managed_tiles_become_ready_after_the_frame_that_flushed_them() {
    let (mut compositor, _) = compositor();
    let (tree, tiled) = tiled_tree();
    compositor.set_root_layer(tree);

    compositor.manage_tiles();
    assert_eq!(compositor.resource_provider().pending_upload_count(), 4);
    assert!(compositor.client().redraws > 0);
    assert_eq!(tile_states(&compositor, tiled), vec![TileState::Uploading; 4]);

    draw_one_frame(&mut compositor);
    draw_one_frame(&mut compositor);
    assert_eq!(compositor.resource_provider().pending_upload_count(), 0);
    assert_eq!(tile_states(&compositor, tiled), vec![TileState::Ready; 4]);
}

#[test]
fn memory_stats_are_rounded_and_only_sent_on_change() {
    let (mut compositor, state) = compositor();
    compositor.set_root_layer(tiled_tree().0);
    compositor.send_managed_memory_stats();
    assert!(compositor.client().memory_stats.is_empty());

    compositor.manage_tiles();
    compositor.send_managed_memory_stats();
    compositor.send_managed_memory_stats();

    let sent = &compositor.client().memory_stats;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bytes_allocated, MEMORY_STATS_ROUNDING_STEP);
    assert_eq!(state.borrow().memory_stats, sent.clone());
}

#[test]
fn hiding_with_a_zero_budget_evicts_tiles() {
    let (mut compositor, _) = compositor();
    let (tree, tiled) = tiled_tree();
    compositor.set_root_layer(tree);
    compositor.manage_tiles();
    assert!(compositor.resource_manager().memory_use_bytes() > 0);

    compositor.set_visible(false);
    assert_eq!(compositor.resource_manager().memory_use_bytes(), 0);
    assert_eq!(tile_states(&compositor, tiled), vec![TileState::Missing; 4]);
    assert!(compositor.client().manage_tiles > 0);
}

#[test]
fn detached_tree_can_be_reattached() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(scrolling_tree().0);
    let tree = compositor.detach_layer_tree();
    assert!(compositor.root_layer().is_none());
    assert!(!compositor.can_draw());

    compositor.set_root_layer(tree);
    assert_eq!(compositor.root_scroll_layer(), Some(LayerId(2)));
    assert!(compositor.can_draw());
}

#[test]
fn frame_metadata_reports_the_root_scroll_layer() {
    let (mut compositor, _) = compositor();
    compositor.set_root_layer(scrolling_tree().0);
    compositor
        .set_page_scale_factor_and_limits(1.0, 0.5, 4.0)
        .expect("page scale limits");

    let metadata = compositor.make_compositor_frame_metadata();
    assert_eq!(metadata.page_scale_factor, 1.0);
    assert_eq!(metadata.min_page_scale_factor, 0.5);
    assert_eq!(metadata.max_page_scale_factor, 4.0);
    assert_eq!(metadata.root_layer_size.width, 100.0);
    let json = serde_json::to_value(metadata).expect("serialize metadata");
    assert_eq!(json["max_page_scale_factor"], 4.0);
}
