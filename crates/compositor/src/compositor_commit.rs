use std::collections::HashSet;
use std::time::Duration;

use geometry::{Size, SizeF, Vector2d, Vector2dF};
use protocol::{LayerScrollDelta, ScrollAndScaleSet};
use render_protocol::{LayerId, ResourceId};
use resources::ResourceProvider;
use serde::Serialize;

use crate::layer::{LayerContent, LayerTree};
use crate::{Compositor, CompositorClient, CompositorError, OutputSurface, RenderingStats};

/// Pinch-zoom pulls that leave the page scale below this fraction of the
/// starting scale snap to the minimum scale when committed.
const PINCH_ZOOM_OUT_SENSITIVITY: f32 = 0.95;

/// Scroll and scale of the root scroll layer, attached to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CompositorFrameMetadata {
    pub root_scroll_offset: Vector2dF,
    pub page_scale_factor: f32,
    pub viewport_size: SizeF,
    pub root_layer_size: SizeF,
    pub min_page_scale_factor: f32,
    pub max_page_scale_factor: f32,
}

fn tile_resources(tree: &LayerTree) -> HashSet<ResourceId> {
    tree.layers()
        .filter_map(|layer| match layer.content() {
            LayerContent::Tiled(tiled) => Some(tiled.resources().map(|(_, resource)| resource)),
            LayerContent::None | LayerContent::SolidColor => None,
        })
        .flatten()
        .collect()
}

/// First scrollable layer in paint order.
fn find_root_scroll_layer(tree: &LayerTree) -> Option<LayerId> {
    let root = tree.root()?;
    tree.subtree_pre_order(root)
        .into_iter()
        .find(|&id| tree.get(id).scrollable())
}

impl<C: CompositorClient> Compositor<C> {
    pub fn begin_commit(&mut self) {
        tracing::trace!(phase = ?self.frame_state.phase.phase(), "begin commit");
    }

    pub fn commit_complete(&mut self) {
        let _span = tracing::debug_span!("commit_complete").entered();
        self.input_state.root_scroll_layer = find_root_scroll_layer(&self.tree);
        self.animation_state.needs_animate_layers = true;
        if self.frame_state.contents_textures_purged {
            self.reset_contents_textures_purged();
        }
        self.set_needs_update_draw_properties();
        if self.settings.impl_side_painting {
            self.update_draw_properties();
            self.client.set_needs_manage_tiles_on_impl_thread();
        }
        self.update_max_scroll_offset();
        self.send_managed_memory_stats();
    }

    /// Installs a committed tree. Tile textures of the previous tree that the
    /// new one does not reuse are released.
    pub fn set_root_layer(&mut self, tree: LayerTree) {
        let mut previous = std::mem::replace(&mut self.tree, tree);
        let reused = tile_resources(&self.tree);
        for layer in previous.layers_mut() {
            for resource in layer.did_lose_output_surface() {
                if reused.contains(&resource) {
                    continue;
                }
                self.memory_state.resource_manager.delete_texture(resource);
                self.output_state.resource_provider.delete_resource(resource);
            }
        }

        self.input_state.root_scroll_layer = find_root_scroll_layer(&self.tree);
        if self
            .input_state
            .currently_scrolling_layer
            .is_some_and(|id| !self.tree.contains(id))
        {
            self.input_state.currently_scrolling_layer = None;
        }
        self.animation_state.needs_animate_layers = true;
        self.frame_state.render_surface_layer_list.clear();
        self.set_needs_update_draw_properties();
        self.update_max_scroll_offset();
    }

    /// Takes the active tree out, leaving an empty one. Tile textures stay
    /// attached so the tree can be put back with `set_root_layer`.
    pub fn detach_layer_tree(&mut self) -> LayerTree {
        let tree = std::mem::take(&mut self.tree);
        self.input_state.root_scroll_layer = None;
        self.input_state.currently_scrolling_layer = None;
        self.frame_state.render_surface_layer_list.clear();
        self.set_needs_update_draw_properties();
        tree
    }

    pub fn set_viewport_size(&mut self, layout_viewport_size: Size, device_viewport_size: Size) {
        if layout_viewport_size == self.viewport_state.layout_viewport_size
            && device_viewport_size == self.viewport_state.device_viewport_size
        {
            return;
        }
        tracing::debug!(?layout_viewport_size, ?device_viewport_size, "viewport resized");
        self.viewport_state.layout_viewport_size = layout_viewport_size;
        self.viewport_state.device_viewport_size = device_viewport_size;
        self.viewport_state
            .pinch_zoom_viewport
            .set_layout_viewport_size(layout_viewport_size.to_f32());

        self.update_max_scroll_offset();
        if let Some(renderer) = self.output_state.renderer.as_deref_mut() {
            renderer.viewport_changed(device_viewport_size);
        }
        self.set_needs_update_draw_properties();
        let can_draw = self.can_draw();
        self.client.on_can_draw_state_changed(can_draw);
    }

    pub fn set_device_scale_factor(&mut self, device_scale_factor: f32) -> Result<(), CompositorError> {
        if device_scale_factor == self.device_scale_factor() {
            return Ok(());
        }
        self.viewport_state
            .pinch_zoom_viewport
            .set_device_scale_factor(device_scale_factor)?;
        self.update_max_scroll_offset();
        self.set_needs_update_draw_properties();
        Ok(())
    }

    /// Takes a committed page scale. The local delta is rebased onto the new
    /// factor and the sent delta resets.
    pub fn set_page_scale_factor_and_limits(
        &mut self,
        page_scale_factor: f32,
        min_page_scale_factor: f32,
        max_page_scale_factor: f32,
    ) -> Result<(), CompositorError> {
        if page_scale_factor == 0.0 {
            return Ok(());
        }
        let viewport = &mut self.viewport_state.pinch_zoom_viewport;
        let page_scale_change = page_scale_factor / viewport.page_scale_factor();
        viewport.set_page_scale_factor_and_limits(page_scale_factor, min_page_scale_factor, max_page_scale_factor)?;

        if !self.settings.page_scale_pinch_zoom_enabled && page_scale_change != 1.0 {
            self.adjust_scrolls_for_page_scale_change(page_scale_change);
        }

        let viewport = &self.viewport_state.pinch_zoom_viewport;
        let rebased_delta = viewport.page_scale_delta() / viewport.sent_page_scale_delta();
        self.set_page_scale_delta(rebased_delta)?;
        self.viewport_state.pinch_zoom_viewport.set_sent_page_scale_delta(1.0)?;
        Ok(())
    }

    pub fn set_page_scale_delta(&mut self, delta: f32) -> Result<(), CompositorError> {
        self.viewport_state.pinch_zoom_viewport.set_page_scale_delta(delta)?;
        self.update_max_scroll_offset();
        Ok(())
    }

    fn adjust_scrolls_for_page_scale_change(&mut self, page_scale_change: f32) {
        let Some(root_scroll) = self.input_state.root_scroll_layer else {
            return;
        };
        for id in self.tree.subtree_pre_order(root_scroll) {
            let layer = self.tree.get_mut(id);
            if layer.scrollable() {
                let scaled = layer.scroll_delta().scaled(page_scale_change);
                layer.set_scroll_delta(scaled);
            }
        }
    }

    /// Recomputes how far the root scroll layer can scroll for the current
    /// viewport and scale.
    pub fn update_max_scroll_offset(&mut self) {
        let Some(root_scroll) = self.input_state.root_scroll_layer else {
            return;
        };
        let Some(layer) = self.tree.layer(root_scroll) else {
            return;
        };
        if layer.children().is_empty() {
            return;
        }
        let viewport = &self.viewport_state.pinch_zoom_viewport;
        let device_scale_factor = viewport.device_scale_factor();

        let mut view_bounds = self.viewport_state.device_viewport_size.to_f32();
        let clip = layer.parent().and_then(|parent| self.tree.layer(parent));
        if let Some(clip) = clip.filter(|clip| clip.masks_to_bounds()) {
            view_bounds = clip.bounds().to_f32().scaled(device_scale_factor);
        }

        let mut content_bounds = self.content_size().to_f32();
        if self.settings.page_scale_pinch_zoom_enabled {
            content_bounds = content_bounds.scaled(1.0 / viewport.page_scale_factor());
        } else {
            view_bounds = view_bounds.scaled(1.0 / viewport.page_scale_delta());
        }

        let mut max_scroll = Vector2dF::new(
            content_bounds.width - view_bounds.width,
            content_bounds.height - view_bounds.height,
        )
        .scaled(1.0 / device_scale_factor);
        max_scroll.clamp_to_min(Vector2dF::zero());
        let max_scroll = max_scroll.floored();
        tracing::trace!(?max_scroll, "max scroll offset");
        self.tree.get_mut(root_scroll).set_max_scroll_offset(max_scroll);
    }

    /// Collects the scroll and scale the host has not seen yet and records
    /// them as sent.
    pub fn process_scroll_deltas(&mut self) -> Result<ScrollAndScaleSet, CompositorError> {
        let mut scroll_info = ScrollAndScaleSet::default();

        if self.input_state.pinch_gesture_active || self.animation_state.page_scale_animation.is_some() {
            self.viewport_state.pinch_zoom_viewport.set_sent_page_scale_delta(1.0)?;
            if !self.settings.page_scale_pinch_zoom_enabled && self.input_state.pinch_gesture_active {
                self.compute_pinch_zoom_deltas(&mut scroll_info)?;
            } else if self.animation_state.page_scale_animation.is_some() {
                self.compute_double_tap_zoom_deltas(&mut scroll_info)?;
            }
            return Ok(scroll_info);
        }

        if let Some(root) = self.tree.root() {
            for id in self.tree.subtree_pre_order(root) {
                let layer = self.tree.get_mut(id);
                let scroll_delta = layer.scroll_delta().floored();
                if scroll_delta.is_zero() {
                    continue;
                }
                scroll_info.scrolls.push(LayerScrollDelta {
                    layer_id: id,
                    scroll_delta,
                });
                layer.set_sent_scroll_delta(scroll_delta);
            }
        }
        scroll_info.page_scale_delta = self.viewport_state.pinch_zoom_viewport.page_scale_delta();
        self.viewport_state
            .pinch_zoom_viewport
            .set_sent_page_scale_delta(scroll_info.page_scale_delta)?;
        tracing::trace!(scrolls = scroll_info.scrolls.len(), "processed scroll deltas");
        Ok(scroll_info)
    }

    /// While pinching out far enough, commits the zoom to the minimum scale
    /// around the last anchor instead of the intermediate scale.
    fn compute_pinch_zoom_deltas(&mut self, scroll_info: &mut ScrollAndScaleSet) -> Result<(), CompositorError> {
        let Some(root_scroll) = self.input_state.root_scroll_layer else {
            return Ok(());
        };
        let viewport = self.viewport_state.pinch_zoom_viewport;
        if viewport.page_scale_delta() > PINCH_ZOOM_OUT_SENSITIVITY {
            return Ok(());
        }

        let scroll_begin = self
            .tree
            .get(root_scroll)
            .total_scroll_offset()
            .scaled(viewport.page_scale_delta());
        let scale_begin = viewport.total_page_scale_factor();
        let page_scale_delta_to_send = viewport.min_page_scale_factor() / viewport.page_scale_factor();
        let scaled_contents_size = self.content_size().to_f32().scaled(page_scale_delta_to_send);

        let anchor = self.input_state.previous_pinch_anchor.offset_from_origin();
        let mut scroll_end = (scroll_begin + anchor).scaled(viewport.min_page_scale_factor() / scale_begin) - anchor;
        let device_viewport = self.viewport_state.device_viewport_size.to_f32();
        scroll_end.clamp_to_max(Vector2dF::new(
            scaled_contents_size.width - device_viewport.width,
            scaled_contents_size.height - device_viewport.height,
        ));
        scroll_end.clamp_to_min(Vector2dF::zero());
        scroll_end = scroll_end
            .scaled(1.0 / page_scale_delta_to_send)
            .scaled(viewport.device_scale_factor());

        self.make_scroll_and_scale_set(
            scroll_info,
            scroll_end.rounded(),
            viewport.min_page_scale_factor(),
        )
    }

    fn compute_double_tap_zoom_deltas(&mut self, scroll_info: &mut ScrollAndScaleSet) -> Result<(), CompositorError> {
        let Some(animation) = &self.animation_state.page_scale_animation else {
            return Ok(());
        };
        let mut scaled_scroll_offset = animation.target_scroll_offset();
        let page_scale = animation.target_page_scale_factor();
        if !self.settings.page_scale_pinch_zoom_enabled {
            scaled_scroll_offset = scaled_scroll_offset.scaled(self.viewport_state.pinch_zoom_viewport.page_scale_factor());
        }
        self.make_scroll_and_scale_set(scroll_info, scaled_scroll_offset.floored(), page_scale)
    }

    fn make_scroll_and_scale_set(
        &mut self,
        scroll_info: &mut ScrollAndScaleSet,
        scroll_offset: Vector2d,
        page_scale: f32,
    ) -> Result<(), CompositorError> {
        let Some(root_scroll) = self.input_state.root_scroll_layer else {
            return Ok(());
        };
        let layer = self.tree.get_mut(root_scroll);
        let scroll_delta = scroll_offset - layer.scroll_offset();
        scroll_info.scrolls.push(LayerScrollDelta {
            layer_id: root_scroll,
            scroll_delta,
        });
        layer.set_sent_scroll_delta(scroll_delta);

        let viewport = &mut self.viewport_state.pinch_zoom_viewport;
        scroll_info.page_scale_delta = page_scale / viewport.page_scale_factor();
        viewport.set_sent_page_scale_delta(scroll_info.page_scale_delta)?;
        Ok(())
    }

    /// Binds a new output surface and creates the renderer for it. Every
    /// device resource of the previous surface is dropped first.
    pub fn initialize_renderer(&mut self, mut output_surface: Box<dyn OutputSurface>) -> Result<(), CompositorError> {
        let _span = tracing::debug_span!("initialize_renderer").entered();
        if let Some(root) = self.tree.root() {
            for id in self.tree.subtree_with_attachments(root) {
                let layer = self.tree.get_mut(id);
                layer.clear_render_surface();
                for resource in layer.did_lose_output_surface() {
                    self.memory_state.resource_manager.delete_texture(resource);
                }
            }
            self.frame_state.render_surface_layer_list.clear();
            self.set_needs_update_draw_properties();
        }
        self.frame_state
            .render_pass_textures
            .clear(&mut self.memory_state.resource_manager);
        self.output_state.renderer = None;
        self.output_state.output_surface = None;
        self.output_state.resource_provider = ResourceProvider::new(self.settings.max_blocking_uploads);
        self.frame_state.phase.abandon_frame();

        if !output_surface.bind_to_client() {
            tracing::warn!("output surface refused to bind");
            return Err(CompositorError::OutputSurfaceBindFailed);
        }
        let kind = output_surface
            .capabilities()
            .preferred_renderer_kind()
            .ok_or(CompositorError::NoRenderingDevice)?;
        let mut renderer = output_surface
            .create_renderer(kind)
            .ok_or(CompositorError::NoSuitableRenderer(kind))?;
        renderer.viewport_changed(self.viewport_state.device_viewport_size);
        if !self.memory_state.visible {
            renderer.set_visible(false);
        }
        tracing::info!(
            ?kind,
            max_texture_size = renderer.capabilities().max_texture_size,
            "renderer initialized"
        );

        self.output_state.renderer = Some(renderer);
        self.output_state.output_surface = Some(output_surface);
        self.memory_state.last_sent_memory_stats = Default::default();
        self.set_needs_update_draw_properties();
        let can_draw = self.can_draw();
        self.client.on_can_draw_state_changed(can_draw);
        Ok(())
    }

    /// The output surface reports its device is gone. Drawing is refused
    /// until `initialize_renderer` runs.
    pub fn did_lose_output_surface(&mut self) {
        tracing::warn!("output surface lost");
        self.output_state.resource_provider.set_context_lost();
        self.frame_state.phase.abandon_frame();
        self.client.did_lose_output_surface_on_impl_thread();
    }

    pub fn on_vsync_parameters_changed(&mut self, timebase: Duration, interval: Duration) {
        self.client.on_vsync_parameters_changed(timebase, interval);
    }

    pub fn on_send_frame_to_parent_compositor_ack(&mut self) {
        if let Some(renderer) = self.output_state.renderer.as_deref_mut() {
            renderer.receive_compositor_frame_ack();
        }
    }

    pub fn make_compositor_frame_metadata(&self) -> CompositorFrameMetadata {
        let viewport = &self.viewport_state.pinch_zoom_viewport;
        let mut metadata = CompositorFrameMetadata {
            page_scale_factor: viewport.total_page_scale_factor(),
            viewport_size: viewport.bounds().size(),
            min_page_scale_factor: viewport.min_page_scale_factor(),
            max_page_scale_factor: viewport.max_page_scale_factor(),
            ..CompositorFrameMetadata::default()
        };
        let Some(layer) = self
            .input_state
            .root_scroll_layer
            .and_then(|id| self.tree.layer(id))
        else {
            return metadata;
        };
        metadata.root_scroll_offset = layer.total_scroll_offset();
        metadata.root_layer_size = layer.bounds().to_f32();
        if !self.settings.page_scale_pinch_zoom_enabled {
            let inverse_scale = 1.0 / viewport.page_scale_factor();
            metadata.root_scroll_offset = metadata.root_scroll_offset.scaled(inverse_scale);
            metadata.root_layer_size = metadata.root_layer_size.scaled(inverse_scale);
        }
        metadata
    }

    /// Damages the whole root surface on the next frame.
    pub fn set_full_root_layer_damage(&mut self) {
        let Some(root) = self.tree.root() else {
            return;
        };
        if let Some(surface) = self.tree.get_mut(root).render_surface.as_mut() {
            surface.damage_tracker.force_full_damage_next_update();
        }
    }

    pub fn rendering_stats(&self) -> RenderingStats {
        let fps_counter = &self.stats_state.fps_counter;
        RenderingStats {
            num_frames_sent_to_screen: fps_counter.current_frame_number(),
            dropped_frame_count: fps_counter.dropped_frame_count(),
            num_impl_thread_scrolls: self.stats_state.num_impl_thread_scrolls,
            num_main_thread_scrolls: self.stats_state.num_main_thread_scrolls,
            num_layers_drawn: self.stats_state.cumulative_num_layers_drawn,
            num_missing_tiles: self.stats_state.cumulative_num_missing_tiles,
        }
    }
}
