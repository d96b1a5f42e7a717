use std::time::{Duration, Instant};

use geometry::{Size, Vector2d};

use crate::animation::{PageScaleAnimation, monotonic_seconds};
use crate::{Compositor, CompositorClient, CompositorError};

impl<C: CompositorClient> Compositor<C> {
    /// Advances layer animations, then the page-scale animation, then the
    /// scrollbar fades.
    pub fn animate(&mut self, monotonic_time: Instant, wall_clock_time: f64) -> Result<(), CompositorError> {
        self.animate_layers(monotonic_time, wall_clock_time);
        self.animate_page_scale(monotonic_time)?;
        self.animate_scrollbars(monotonic_time);
        Ok(())
    }

    /// Whether anything is left for `animate` to advance.
    pub fn needs_animate(&self) -> bool {
        self.animation_state.needs_animate_layers || self.animation_state.page_scale_animation.is_some()
    }

    /// Asks for layer animations to run on the next tick, e.g. after the
    /// host added one.
    pub fn set_needs_animate_layers(&mut self) {
        self.animation_state.needs_animate_layers = true;
        let visible = self.memory_state.visible;
        self.set_background_ticking_enabled(!visible);
    }

    fn animate_layers(&mut self, monotonic_time: Instant, wall_clock_time: f64) {
        if !self.settings.accelerated_animation_enabled || !self.animation_state.needs_animate_layers {
            return;
        }
        let Some(root) = self.tree.root() else {
            return;
        };
        let _span = tracing::trace_span!("animate_layers").entered();

        let seconds = monotonic_seconds(monotonic_time);
        let mut events = Vec::new();
        let mut did_animate = false;
        let mut needs_animate_layers = false;
        for id in self.tree.subtree_pre_order(root) {
            let layer = self.tree.get_mut(id);
            let had_active_animation = layer.animation.has_active_animation();
            let events_before = events.len();
            let values = layer.animation.animate(id, seconds, &mut events);
            if had_active_animation || events.len() > events_before {
                did_animate = true;
            }
            if let Some(opacity) = values.opacity {
                layer.set_opacity(opacity);
            }
            if let Some(transform) = values.transform {
                layer.set_transform(transform);
            }
            needs_animate_layers |= layer.animation.has_active_animation();
        }
        self.animation_state.needs_animate_layers = needs_animate_layers;

        if !events.is_empty() {
            tracing::trace!(events = events.len(), "posting animation events");
            self.client
                .post_animation_events_to_main_thread_on_impl_thread(events, wall_clock_time);
        }
        if did_animate {
            self.client.set_needs_redraw_on_impl_thread();
            self.set_needs_update_draw_properties();
        }

        let visible = self.memory_state.visible;
        self.set_background_ticking_enabled(!visible && needs_animate_layers);
    }

    fn animate_page_scale(&mut self, monotonic_time: Instant) -> Result<(), CompositorError> {
        let Some(root_scroll) = self.input_state.root_scroll_layer else {
            return Ok(());
        };
        let Some(animation) = &self.animation_state.page_scale_animation else {
            return Ok(());
        };
        let seconds = monotonic_seconds(monotonic_time);
        let page_scale = animation.page_scale_factor_at_time(seconds);
        let mut next_scroll = animation.scroll_offset_at_time(seconds);
        let complete = animation.is_animation_complete_at_time(seconds);

        let page_scale_factor = self.viewport_state.pinch_zoom_viewport.page_scale_factor();
        self.set_page_scale_delta(page_scale / page_scale_factor)?;
        if !self.settings.page_scale_pinch_zoom_enabled {
            next_scroll = next_scroll.scaled(page_scale_factor);
        }
        let layer = self.tree.get_mut(root_scroll);
        let scroll_total = layer.total_scroll_offset();
        layer.scroll_by(next_scroll - scroll_total);
        self.client.set_needs_redraw_on_impl_thread();
        self.set_needs_update_draw_properties();

        if complete {
            tracing::debug!("page scale animation finished");
            self.animation_state.page_scale_animation = None;
            self.client.set_needs_commit_on_impl_thread();
        }
        Ok(())
    }

    fn animate_scrollbars(&mut self, monotonic_time: Instant) {
        let Some(root) = self.tree.root() else {
            return;
        };
        let seconds = monotonic_seconds(monotonic_time);
        let mut needs_redraw = false;
        for id in self.tree.subtree_pre_order(root) {
            if let Some(controller) = self.tree.get_mut(id).scrollbar_animation_controller_mut() {
                needs_redraw |= controller.animate(seconds);
            }
        }
        if needs_redraw {
            self.client.set_needs_redraw_on_impl_thread();
        }
    }

    /// Starts an animated zoom of the root scroll layer to `page_scale`.
    ///
    /// With `anchor_point` the target offset is a point that stays fixed
    /// on screen; otherwise it is the final scroll offset.
    pub fn start_page_scale_animation(
        &mut self,
        target_offset: Vector2d,
        anchor_point: bool,
        page_scale: f32,
        start_time: Instant,
        duration: Duration,
    ) {
        let Some(root_scroll) = self.input_state.root_scroll_layer else {
            return;
        };
        let viewport = self.viewport_state.pinch_zoom_viewport;
        let pinch_zoom_enabled = self.settings.page_scale_pinch_zoom_enabled;

        let mut scroll_total = self.tree.get(root_scroll).total_scroll_offset();
        let mut scaled_content_size = self.content_size().to_f32();
        if !pinch_zoom_enabled {
            let inverse_scale = 1.0 / viewport.page_scale_factor();
            scroll_total = scroll_total.scaled(inverse_scale);
            scaled_content_size = scaled_content_size.scaled(inverse_scale);
        }
        let viewport_size = self
            .viewport_state
            .device_viewport_size
            .to_f32()
            .scaled(1.0 / viewport.device_scale_factor());

        let mut animation = PageScaleAnimation::new(
            scroll_total,
            viewport.total_page_scale_factor(),
            viewport_size,
            scaled_content_size,
            monotonic_seconds(start_time),
        );
        let duration = duration.as_secs_f64();
        if anchor_point {
            let mut anchor = target_offset.to_f32();
            if !pinch_zoom_enabled {
                anchor = anchor.scaled(1.0 / page_scale);
            }
            animation.zoom_with_anchor(anchor, page_scale, duration);
        } else {
            let mut scaled_target = target_offset.to_f32();
            if !pinch_zoom_enabled {
                scaled_target = scaled_target.scaled(1.0 / page_scale);
            }
            animation.zoom_to(scaled_target, page_scale, duration);
        }
        tracing::debug!(page_scale, anchor_point, "page scale animation started");
        self.animation_state.page_scale_animation = Some(animation);

        self.set_needs_update_draw_properties();
        self.client.set_needs_redraw_on_impl_thread();
        self.client.set_needs_commit_on_impl_thread();
    }

    pub fn is_background_ticking(&self) -> bool {
        self.animation_state.background_ticker.is_active()
    }

    /// Runs one low-frequency animation step while invisible. Returns
    /// whether the step ran.
    pub fn background_tick(&mut self, now: Instant, wall_clock_time: f64) -> Result<bool, CompositorError> {
        if !self.animation_state.background_ticker.tick_if_due(now) {
            return Ok(false);
        }
        tracing::trace!("background animation tick");
        self.animate(now, wall_clock_time)?;
        Ok(true)
    }

    pub(crate) fn set_background_ticking_enabled(&mut self, enabled: bool) {
        let ticker = &mut self.animation_state.background_ticker;
        if ticker.is_active() != enabled {
            tracing::debug!(enabled, "background animation ticking");
        }
        ticker.set_active(enabled);
    }

    /// Size of the content scrolled by the root scroll layer.
    pub(crate) fn content_size(&self) -> Size {
        self.input_state
            .root_scroll_layer
            .and_then(|id| self.tree.layer(id))
            .and_then(|layer| layer.children().first().copied())
            .and_then(|child| self.tree.layer(child))
            .map(|child| child.content_bounds())
            .unwrap_or_default()
    }
}
