use std::collections::HashSet;

use frame_scheduler::FramePhase;
use geometry::Rect;
use render_protocol::{RendererCapabilities, RendererKind, ResourceId};

use crate::damage::track_damage_for_all_surfaces;
use crate::draw_properties::{DrawPropertiesInputs, calculate_draw_properties};
use crate::render_pass::{RenderPassCuller, RenderPassInputs, calculate_render_passes, remove_render_passes};
use crate::{Compositor, CompositorClient, CompositorError, Frame};

impl<C: CompositorClient> Compositor<C> {
    /// Whether a frame could be produced right now.
    pub fn can_draw(&self) -> bool {
        if self.tree.root().is_none() {
            tracing::trace!("cannot draw: no root layer");
            return false;
        }
        if self.viewport_state.device_viewport_size.is_empty() {
            tracing::trace!("cannot draw: empty device viewport");
            return false;
        }
        if self.output_state.renderer.is_none() {
            tracing::trace!("cannot draw: no renderer");
            return false;
        }
        if self.frame_state.contents_textures_purged {
            tracing::trace!("cannot draw: contents textures purged");
            return false;
        }
        true
    }

    pub fn is_context_lost(&self) -> bool {
        self.output_state
            .renderer
            .as_ref()
            .is_some_and(|renderer| renderer.is_context_lost())
    }

    /// Recomputes draw properties and the render-surface layer list when
    /// they are stale.
    pub fn update_draw_properties(&mut self) {
        if !self.frame_state.needs_update_draw_properties {
            return;
        }
        self.frame_state.render_surface_layer_list.clear();
        self.frame_state.needs_update_draw_properties = false;
        let Some(root) = self.tree.root() else {
            return;
        };

        if let Some(root_scroll) = self.input_state.root_scroll_layer {
            let impl_transform = self
                .viewport_state
                .pinch_zoom_viewport
                .impl_transform(self.settings.page_scale_pinch_zoom_enabled);
            if let Some(layer) = self.tree.layer_mut(root_scroll) {
                layer.set_impl_transform(impl_transform);
            }
        }

        let max_texture_size = self
            .renderer_capabilities()
            .unwrap_or_else(RendererCapabilities::default)
            .max_texture_size;
        let _span = tracing::trace_span!("update_draw_properties", layers = self.tree.len()).entered();
        let device_scale_factor = self.device_scale_factor();
        self.frame_state.render_surface_layer_list = calculate_draw_properties(
            &mut self.tree,
            DrawPropertiesInputs {
                root,
                device_viewport_size: self.viewport_state.device_viewport_size,
                device_scale_factor,
                max_texture_size,
            },
        );
    }

    /// Builds the render passes of the next frame into `frame`.
    ///
    /// Returns `Ok(false)` when the frame was built but should not be shown,
    /// e.g. because an animated layer is missing tiles or the surface
    /// textures do not fit in the memory budget.
    pub fn prepare_to_draw(&mut self, frame: &mut Frame) -> Result<bool, CompositorError> {
        assert!(self.can_draw(), "prepare_to_draw requires can_draw()");
        let _span = tracing::debug_span!("prepare_to_draw").entered();
        if self.is_context_lost() {
            tracing::warn!("refusing to prepare a frame after the output surface context was lost");
            return Err(CompositorError::ContextLost);
        }
        if self.frame_state.phase.phase() == FramePhase::Submitted {
            self.frame_state.phase.mark_completed()?;
        }

        self.check_for_completed_uploads();
        self.update_draw_properties();
        self.frame_state.phase.mark_draw_properties_computed()?;

        frame.clear();
        frame.render_surface_layer_list = self.frame_state.render_surface_layer_list.clone();
        track_damage_for_all_surfaces(&mut self.tree, &frame.render_surface_layer_list);

        let outcome = calculate_render_passes(
            &RenderPassInputs {
                tree: &self.tree,
                provider: &self.output_state.resource_provider,
                settings: &self.settings,
                debug_state: &self.debug_state,
                background_color: self.frame_state.background_color,
                has_transparent_background: self.frame_state.has_transparent_background,
            },
            frame,
        );
        self.stats_state.cumulative_num_layers_drawn += outcome.layers_drawn as u64;
        self.stats_state.cumulative_num_missing_tiles += outcome.missing_tiles as u64;
        for &id in &frame.will_draw_layers {
            if let Some(layer) = self.tree.layer_mut(id) {
                layer.will_draw();
            }
        }

        remove_render_passes(RenderPassCuller::NoQuads, frame);
        if let Err(error) = self
            .frame_state
            .render_pass_textures
            .reserve(&mut self.memory_state.resource_manager, frame)
        {
            tracing::warn!(%error, "dropping frame: render surface textures do not fit");
            return Ok(false);
        }

        let renderer = self
            .output_state
            .renderer
            .as_deref_mut()
            .ok_or(CompositorError::NoRenderer)?;
        renderer.decide_render_pass_allocations_for_frame(&frame.render_passes, &frame.render_passes_by_id);
        remove_render_passes(RenderPassCuller::CachedTextures(&*renderer), frame);
        self.frame_state.phase.mark_passes_built()?;

        tracing::debug!(
            passes = frame.render_passes.len(),
            layers_drawn = outcome.layers_drawn,
            missing_tiles = outcome.missing_tiles,
            draw_frame = outcome.draw_frame,
            "prepared frame"
        );
        Ok(outcome.draw_frame)
    }

    /// Hands the prepared passes to the renderer.
    pub fn draw_layers(&mut self, frame: &mut Frame) -> Result<(), CompositorError> {
        assert!(self.can_draw(), "draw_layers requires can_draw()");
        assert!(
            !frame.render_passes.is_empty(),
            "draw_layers requires a frame from prepare_to_draw"
        );
        let _span = tracing::debug_span!("draw_layers", passes = frame.render_passes.len()).entered();
        if self.is_context_lost() {
            tracing::warn!("refusing to draw after the output surface context was lost");
            return Err(CompositorError::ContextLost);
        }
        self.frame_state.phase.mark_submitted()?;

        let software = self
            .output_state
            .renderer
            .as_ref()
            .is_some_and(|renderer| renderer.kind() == RendererKind::Software);
        self.stats_state
            .fps_counter
            .save_time_stamp(self.stats_state.time_origin.elapsed(), software);

        if self.debug_state.show_hud_rects() {
            self.stats_state.debug_rect_history.save_debug_rects_for_current_frame(
                &self.tree,
                &frame.render_surface_layer_list,
                &frame.occluding_screen_space_rects,
                &frame.non_occluding_screen_space_rects,
                &self.debug_state,
            );
        }

        self.output_state.resource_provider.flush_uploads();
        let renderer = self
            .output_state
            .renderer
            .as_deref_mut()
            .ok_or(CompositorError::NoRenderer)?;
        renderer.draw_frame(
            &mut frame.render_passes,
            &mut frame.render_passes_by_id,
            &self.output_state.resource_provider,
        );
        if !frame.render_passes.is_empty() || !frame.render_passes_by_id.is_empty() {
            tracing::warn!(
                left = frame.render_passes.len(),
                "renderer did not consume every render pass"
            );
            frame.render_passes.clear();
            frame.render_passes_by_id.clear();
        }

        for &target in &frame.render_surface_layer_list {
            if let Some(surface) = self
                .tree
                .layer_mut(target)
                .and_then(|layer| layer.render_surface.as_mut())
            {
                surface.damage_tracker.did_draw_damaged_area();
            }
        }
        if let Some(root) = self.tree.root() {
            self.tree.reset_all_change_tracking_for_subtree(root);
        }
        Ok(())
    }

    /// Ends the frame for every layer that was asked to draw.
    pub fn did_draw_all_layers(&mut self, frame: &Frame) {
        for &id in &frame.will_draw_layers {
            if let Some(layer) = self.tree.layer_mut(id) {
                layer.did_draw();
            }
        }
        self.output_state.resource_provider.mark_pending_uploads_as_non_blocking();
    }

    pub fn finish_all_rendering(&mut self) {
        if let Some(renderer) = self.output_state.renderer.as_deref_mut() {
            renderer.finish();
        }
    }

    /// Presents the drawn frame. Returns false when nothing was presented.
    pub fn swap_buffers(&mut self) -> Result<bool, CompositorError> {
        let renderer = self
            .output_state
            .renderer
            .as_deref_mut()
            .ok_or(CompositorError::NoRenderer)?;
        let swapped = renderer.swap_buffers();
        if !swapped {
            tracing::debug!(context_lost = renderer.is_context_lost(), "swap did not present");
            return Ok(false);
        }
        if !renderer.capabilities().using_swap_complete_callback {
            self.on_swap_buffers_complete();
        }
        Ok(true)
    }

    /// RGBA8 pixels of `rect` in the last drawn frame.
    pub fn readback(&mut self, rect: Rect) -> Option<Vec<u8>> {
        self.output_state.renderer.as_deref_mut()?.get_framebuffer_pixels(rect)
    }

    pub fn on_swap_buffers_complete(&mut self) {
        self.output_state.resource_provider.mark_all_fences_passed();
        if self.frame_state.phase.phase() == FramePhase::Submitted {
            if let Err(error) = self.frame_state.phase.mark_completed() {
                tracing::warn!(%error, "swap completed out of order");
            }
        }
        self.client.on_swap_buffers_complete_on_impl_thread();
    }

    /// Damages tiles whose uploads finished since the last frame so they get
    /// drawn with their new contents.
    fn check_for_completed_uploads(&mut self) {
        let completed: HashSet<ResourceId> = self
            .output_state
            .resource_provider
            .check_for_completed_uploads()
            .into_iter()
            .collect();
        if completed.is_empty() {
            return;
        }
        let damaged = self
            .tree
            .layers_mut()
            .map(|layer| layer.did_complete_tile_uploads(&completed))
            .filter(|damaged| *damaged)
            .count();
        tracing::trace!(completed = completed.len(), damaged, "uploads completed");
    }
}
