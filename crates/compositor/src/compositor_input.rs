use std::time::Instant;

use geometry::{Point, PointF, Rect, RectF, Region, Transform, Vector2dF, project_vector, smallest_angle_between_vectors};
use protocol::ScrollInputType;
use render_protocol::LayerId;

use crate::animation::monotonic_seconds;
use crate::layer::{Layer, LayerTree};
use crate::layer_iterator::{LayerIteratorPosition, front_to_back};
use crate::{Compositor, CompositorClient, CompositorError};

/// Applied scrolls shorter than this do not count as scrolling.
pub const SCROLL_MOVE_THRESHOLD: f32 = 0.1;
/// A scroll applied within this angle of the request consumes all of it;
/// anything wider passes the perpendicular remainder to the ancestors.
pub const SCROLL_PROPAGATION_ANGLE_THRESHOLD_DEGREES: f32 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStatus {
    OnMainThread,
    Started,
    Ignored,
}

fn local_point(screen_space_transform: &Transform, screen_point: PointF) -> Option<PointF> {
    screen_space_transform
        .inverse()
        .map(|inverse| inverse.map_point(screen_point))
}

fn floored_point(point: PointF) -> Point {
    Point::new(point.x.floor() as i32, point.y.floor() as i32)
}

fn point_hits_rect(screen_point: PointF, screen_space_transform: &Transform, local_rect: RectF) -> bool {
    local_point(screen_space_transform, screen_point).is_some_and(|local| local_rect.contains_point(local))
}

fn point_hits_region(screen_point: PointF, screen_space_transform: &Transform, region: &Region) -> bool {
    local_point(screen_space_transform, screen_point)
        .is_some_and(|local| region.contains_point(floored_point(local)))
}

fn layer_clips_subtree(layer: &Layer) -> bool {
    layer.masks_to_bounds() || layer.mask_layer().is_some()
}

/// Whether a surface or a clipping ancestor hides `screen_point` from the
/// layer.
fn point_is_clipped_by_surface_or_clip_rect(tree: &LayerTree, screen_point: PointF, id: LayerId) -> bool {
    let mut current = Some(id);
    while let Some(id) = current {
        let layer = tree.get(id);
        if let Some(surface) = layer.render_surface() {
            let content_rect = surface.content_rect().to_f32();
            if !point_hits_rect(screen_point, &surface.screen_space_transform(), content_rect) {
                return true;
            }
        }
        if layer_clips_subtree(layer) {
            let target_screen_space = layer
                .draw_properties()
                .render_target
                .and_then(|target| tree.get(target).render_surface())
                .map(|surface| surface.screen_space_transform())
                .unwrap_or_default();
            let drawable = layer.draw_properties().drawable_content_rect.to_f32();
            if !point_hits_rect(screen_point, &target_screen_space, drawable) {
                return true;
            }
        }
        current = layer.parent();
    }
    false
}

fn layer_has_touch_event_handlers_at(tree: &LayerTree, screen_point: PointF, id: LayerId) -> bool {
    let layer = tree.get(id);
    if layer.touch_event_handler_region().is_empty() {
        return false;
    }
    let screen_space = layer.draw_properties().screen_space_transform;
    if !point_hits_region(screen_point, &screen_space, layer.touch_event_handler_region()) {
        return false;
    }
    !point_is_clipped_by_surface_or_clip_rect(tree, screen_point, id)
}

fn try_scroll(layer: &Layer, screen_point: PointF, input_type: ScrollInputType) -> ScrollStatus {
    if layer.should_scroll_on_main_thread() {
        tracing::trace!(layer = %layer.id(), "scroll on main thread: forced");
        return ScrollStatus::OnMainThread;
    }
    let screen_space = layer.draw_properties().screen_space_transform;
    if !screen_space.is_invertible() {
        return ScrollStatus::Ignored;
    }
    if !layer.non_fast_scrollable_region().is_empty()
        && point_hits_region(screen_point, &screen_space, layer.non_fast_scrollable_region())
    {
        tracing::trace!(layer = %layer.id(), "scroll on main thread: non-fast-scrollable region");
        return ScrollStatus::OnMainThread;
    }
    if input_type == ScrollInputType::Wheel && layer.have_wheel_event_handlers() {
        tracing::trace!(layer = %layer.id(), "scroll on main thread: wheel handlers");
        return ScrollStatus::OnMainThread;
    }
    if !layer.scrollable() {
        return ScrollStatus::Ignored;
    }
    ScrollStatus::Started
}

/// The layer that scrolls when `id` is hit: the layer itself, or the
/// scrollable parent of a content layer.
fn find_scroll_layer_for_content_layer(tree: &LayerTree, id: LayerId) -> Option<LayerId> {
    let layer = tree.get(id);
    if layer.scrollable() {
        return Some(id);
    }
    let parent = layer.parent()?;
    (layer.draws_content() && tree.get(parent).scrollable()).then_some(parent)
}

fn scroll_layer_with_local_delta(layer: &mut Layer, local_delta: Vector2dF) -> Vector2dF {
    let previous_delta = layer.scroll_delta();
    layer.scroll_by(local_delta);
    layer.scroll_delta() - previous_delta
}

impl<C: CompositorClient> Compositor<C> {
    /// Makes sure a render-surface layer list exists for hit testing.
    /// Returns false when there is nothing to hit.
    fn ensure_render_surface_layer_list(&mut self) -> bool {
        let Some(root) = self.tree.root() else {
            return false;
        };
        if self.output_state.renderer.is_none() {
            return false;
        }
        if !self.frame_state.render_surface_layer_list.is_empty() && self.tree.get(root).render_surface().is_some() {
            return true;
        }
        self.set_needs_update_draw_properties();
        self.update_draw_properties();
        !self.frame_state.render_surface_layer_list.is_empty()
    }

    /// Front-most layer whose content contains `screen_point`.
    fn find_layer_that_is_hit_by_point(&self, screen_point: PointF) -> Option<LayerId> {
        front_to_back(&self.tree, &self.frame_state.render_surface_layer_list)
            .into_iter()
            .filter_map(|position| match position {
                LayerIteratorPosition::Itself { layer, .. } => Some(layer),
                _ => None,
            })
            .find(|&id| {
                let layer = self.tree.get(id);
                let content_rect = Rect::from_size(layer.content_bounds()).to_f32();
                point_hits_rect(screen_point, &layer.draw_properties().screen_space_transform, content_rect)
                    && !point_is_clipped_by_surface_or_clip_rect(&self.tree, screen_point, id)
            })
    }

    /// Whether a touch at `viewport_point` lands on a registered touch
    /// handler region.
    pub fn have_touch_event_handlers_at(&mut self, viewport_point: PointF) -> bool {
        if !self.ensure_render_surface_layer_list() {
            return false;
        }
        let device_point = viewport_point.scaled(self.device_scale_factor());
        let mut current = self.find_layer_that_is_hit_by_point(device_point);
        while let Some(id) = current {
            if layer_has_touch_event_handlers_at(&self.tree, device_point, id) {
                return true;
            }
            current = self.tree.parent(id);
        }
        false
    }

    /// Picks the layer a scroll starting at `viewport_point` will move.
    pub fn scroll_begin(&mut self, viewport_point: PointF, input_type: ScrollInputType) -> ScrollStatus {
        let _span = tracing::trace_span!("scroll_begin", ?input_type).entered();
        self.input_state.currently_scrolling_layer = None;
        if !self.ensure_render_surface_layer_list() {
            return ScrollStatus::Ignored;
        }

        let device_point = viewport_point.scaled(self.device_scale_factor());
        let mut potentially_scrolling_layer = None;
        let mut current = self.find_layer_that_is_hit_by_point(device_point);
        while let Some(id) = current {
            let layer = self.tree.get(id);
            if try_scroll(layer, device_point, input_type) == ScrollStatus::OnMainThread {
                self.stats_state.num_main_thread_scrolls += 1;
                return ScrollStatus::OnMainThread;
            }
            if let Some(scroll_layer) = find_scroll_layer_for_content_layer(&self.tree, id) {
                match try_scroll(self.tree.get(scroll_layer), device_point, input_type) {
                    ScrollStatus::OnMainThread => {
                        self.stats_state.num_main_thread_scrolls += 1;
                        return ScrollStatus::OnMainThread;
                    }
                    ScrollStatus::Started if potentially_scrolling_layer.is_none() => {
                        potentially_scrolling_layer = Some(scroll_layer);
                    }
                    _ => {}
                }
            }
            current = layer.parent();
        }

        let Some(layer) = potentially_scrolling_layer else {
            return ScrollStatus::Ignored;
        };
        tracing::trace!(%layer, "scroll started on compositor");
        self.input_state.currently_scrolling_layer = Some(layer);
        self.input_state.scroll_delta_is_in_viewport_space = input_type == ScrollInputType::Gesture;
        self.stats_state.num_impl_thread_scrolls += 1;
        self.set_needs_update_draw_properties();
        ScrollStatus::Started
    }

    /// Scrolls the current layer and bubbles what it could not take to its
    /// ancestors. Returns whether anything moved.
    pub fn scroll_by(&mut self, viewport_point: PointF, scroll_delta: Vector2dF) -> bool {
        let Some(start) = self.input_state.currently_scrolling_layer else {
            return false;
        };
        let _span = tracing::trace_span!("scroll_by", layer = %start).entered();

        let mut pending_delta = scroll_delta;
        let mut did_scroll = false;
        let mut current = Some(start);
        while let Some(id) = current {
            current = self.tree.parent(id);
            if !self.tree.get(id).scrollable() {
                continue;
            }

            let applied_delta = if self.input_state.scroll_delta_is_in_viewport_space {
                let use_viewport = self.settings.page_scale_pinch_zoom_enabled
                    && Some(id) == self.input_state.root_scroll_layer;
                self.scroll_layer_with_viewport_space_delta(id, use_viewport, viewport_point, pending_delta)
            } else {
                scroll_layer_with_local_delta(self.tree.get_mut(id), pending_delta)
            };

            if applied_delta.length_squared() < SCROLL_MOVE_THRESHOLD * SCROLL_MOVE_THRESHOLD {
                continue;
            }
            did_scroll = true;
            self.notify_scrollbar_of_scroll(id);

            if smallest_angle_between_vectors(applied_delta, pending_delta)
                < SCROLL_PROPAGATION_ANGLE_THRESHOLD_DEGREES
            {
                break;
            }
            let perpendicular = Vector2dF::new(-applied_delta.y, applied_delta.x);
            pending_delta = project_vector(pending_delta, perpendicular);
            if pending_delta.floored().is_zero() {
                break;
            }
        }

        if did_scroll {
            self.client.set_needs_commit_on_impl_thread();
            self.client.set_needs_redraw_on_impl_thread();
            self.set_needs_update_draw_properties();
        }
        did_scroll
    }

    /// Scrolls by a delta given in viewport pixels. The delta is mapped into
    /// the layer's space so that the content under the pointer follows it.
    fn scroll_layer_with_viewport_space_delta(
        &mut self,
        id: LayerId,
        use_viewport: bool,
        viewport_point: PointF,
        viewport_delta: Vector2dF,
    ) -> Vector2dF {
        let scale = self.device_scale_factor();
        let screen_space = self.tree.get(id).draw_properties().screen_space_transform;
        let Some(inverse) = screen_space.inverse() else {
            return Vector2dF::zero();
        };
        let screen_point = viewport_point.scaled(scale);
        let screen_delta = viewport_delta.scaled(scale);
        let local_start = inverse.map_point(screen_point);
        let local_end = inverse.map_point(screen_point + screen_delta);

        let layer = self.tree.get_mut(id);
        let previous_delta = layer.scroll_delta();
        let unscrolled = layer.scroll_by(local_end - local_start);
        let scrolled_delta = layer.scroll_delta();

        let viewport_applied_pan = if use_viewport {
            match self.viewport_state.pinch_zoom_viewport.apply_scroll(unscrolled) {
                Ok(overflow) => unscrolled - overflow,
                Err(error) => {
                    tracing::warn!(%error, "viewport pan rejected");
                    Vector2dF::zero()
                }
            }
        } else {
            Vector2dF::zero()
        };

        let actual_local_end = local_start + (scrolled_delta + viewport_applied_pan - previous_delta);
        let actual_screen_end = screen_space.map_point(actual_local_end);
        let actual_viewport_end = actual_screen_end.scaled(1.0 / scale);
        actual_viewport_end - viewport_point
    }

    pub fn scroll_end(&mut self) {
        self.input_state.currently_scrolling_layer = None;
    }

    pub fn pinch_gesture_begin(&mut self) {
        self.input_state.pinch_gesture_active = true;
        self.input_state.previous_pinch_anchor = PointF::origin();
        if let Some(controller) = self.root_scroll_scrollbar_controller() {
            controller.did_pinch_gesture_begin();
        }
    }

    /// Zooms by `magnify_delta` around `anchor`, keeping the content under
    /// the anchor in place.
    pub fn pinch_gesture_update(&mut self, magnify_delta: f32, anchor: PointF) -> Result<(), CompositorError> {
        let _span = tracing::trace_span!("pinch_gesture_update", magnify_delta).entered();
        let Some(root_scroll) = self.input_state.root_scroll_layer else {
            return Ok(());
        };

        let page_scale_delta = self.viewport_state.pinch_zoom_viewport.page_scale_delta();
        let previous_scale_anchor = anchor.scaled(1.0 / page_scale_delta);
        self.set_page_scale_delta(page_scale_delta * magnify_delta)?;
        let page_scale_delta = self.viewport_state.pinch_zoom_viewport.page_scale_delta();
        let new_scale_anchor = anchor.scaled(1.0 / page_scale_delta);
        let mut movement = previous_scale_anchor - new_scale_anchor;
        self.input_state.previous_pinch_anchor = anchor;

        let overflow = if self.settings.page_scale_pinch_zoom_enabled {
            let page_scale_factor = self.viewport_state.pinch_zoom_viewport.page_scale_factor();
            movement = movement.scaled(1.0 / page_scale_factor);
            self.viewport_state.pinch_zoom_viewport.apply_scroll(movement)?
        } else {
            movement
        };
        self.tree.get_mut(root_scroll).scroll_by(overflow);

        let now = monotonic_seconds(Instant::now());
        if let Some(controller) = self.root_scroll_scrollbar_controller() {
            controller.did_pinch_gesture_update(now);
        }

        self.client.set_needs_commit_on_impl_thread();
        self.client.set_needs_redraw_on_impl_thread();
        self.set_needs_update_draw_properties();
        Ok(())
    }

    pub fn pinch_gesture_end(&mut self) {
        self.input_state.pinch_gesture_active = false;
        let now = monotonic_seconds(Instant::now());
        if let Some(controller) = self.root_scroll_scrollbar_controller() {
            controller.did_pinch_gesture_end(now);
        }
        self.client.set_needs_commit_on_impl_thread();
    }

    fn root_scroll_scrollbar_controller(&mut self) -> Option<&mut crate::animation::ScrollbarAnimationController> {
        let id = self.input_state.root_scroll_layer?;
        self.tree.layer_mut(id)?.scrollbar_animation_controller_mut()
    }

    fn notify_scrollbar_of_scroll(&mut self, id: LayerId) {
        let Some(layer) = self.tree.layer_mut(id) else {
            return;
        };
        let offset = layer.total_scroll_offset();
        if let Some(controller) = layer.scrollbar_animation_controller_mut() {
            controller.update_scroll_offset_at_time(offset, monotonic_seconds(Instant::now()));
        }
    }
}
