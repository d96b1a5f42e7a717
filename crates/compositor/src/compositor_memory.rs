use std::collections::HashSet;

use geometry::Rect;
use protocol::{ManagedMemoryPolicy, ManagedMemoryStats, priority};
use render_protocol::{LayerId, ResourceId};

use crate::layer::{LayerContent, TileIndex};
use crate::{Compositor, CompositorClient};

/// Reported memory numbers are rounded up to this step so small changes do
/// not cause a message each frame.
pub const MEMORY_STATS_ROUNDING_STEP: usize = 8 * 1024 * 1024;
/// In-flight tile uploads allowed per raster thread.
pub const MAX_PENDING_UPLOADS_PER_RASTER_THREAD: usize = 16;

fn round_up(value: usize, step: usize) -> usize {
    value.div_ceil(step).saturating_mul(step)
}

fn rounded_memory_stats(stats: ManagedMemoryStats) -> ManagedMemoryStats {
    ManagedMemoryStats {
        bytes_visible: round_up(stats.bytes_visible, MEMORY_STATS_ROUNDING_STEP),
        bytes_visible_and_nearby: round_up(stats.bytes_visible_and_nearby, MEMORY_STATS_ROUNDING_STEP),
        bytes_allocated: round_up(stats.bytes_allocated, MEMORY_STATS_ROUNDING_STEP),
    }
}

/// Distance in content pixels between a tile and the visible rect, zero when
/// they overlap.
fn distance_to_visible(tile: Rect, visible: Rect) -> Option<i32> {
    if visible.is_empty() {
        return None;
    }
    let dx = (visible.x - tile.right()).max(tile.x - visible.right()).max(0);
    let dy = (visible.y - tile.bottom()).max(tile.y - visible.bottom()).max(0);
    Some(dx.max(dy))
}

impl<C: CompositorClient> Compositor<C> {
    pub fn set_visible(&mut self, visible: bool) {
        if self.memory_state.visible == visible {
            return;
        }
        tracing::debug!(visible, "visibility changed");
        self.memory_state.visible = visible;
        let policy = self.memory_state.policy;
        self.enforce_managed_memory_policy(&policy);

        let Some(renderer) = self.output_state.renderer.as_deref_mut() else {
            return;
        };
        renderer.set_visible(visible);
        let needs_animate_layers = self.animation_state.needs_animate_layers;
        self.set_background_ticking_enabled(!visible && needs_animate_layers);
    }

    pub fn set_managed_memory_policy(&mut self, policy: ManagedMemoryPolicy) {
        if self.memory_state.policy == policy {
            return;
        }
        self.memory_state.policy = policy;
        self.enforce_managed_memory_policy(&policy);
        self.client.set_needs_commit_on_impl_thread();
    }

    /// Shrinks texture memory to what `policy` allows in the current
    /// visibility. Never allocates.
    fn enforce_managed_memory_policy(&mut self, policy: &ManagedMemoryPolicy) {
        let visible = self.memory_state.visible;
        let limit_bytes = policy.bytes_limit(visible);
        let priority_cutoff = policy.priority_cutoff(visible);
        let _span = tracing::debug_span!("enforce_managed_memory_policy", visible, limit_bytes).entered();

        if self
            .client
            .reduce_contents_texture_memory_on_impl_thread(limit_bytes, priority_cutoff)
        {
            self.frame_state.contents_textures_purged = true;
            self.client.set_needs_commit_on_impl_thread();
            let can_draw = self.can_draw();
            self.client.on_can_draw_state_changed(can_draw);
        }

        let manager = &mut self.memory_state.resource_manager;
        let evicted = manager.reduce_memory_to_limits(limit_bytes, priority_cutoff);
        manager.set_max_memory_limit_bytes(limit_bytes);
        manager.set_external_priority_cutoff(priority_cutoff);
        manager.prioritize_textures();
        if !evicted.is_empty() {
            self.release_evicted_tiles(evicted);
        }
        self.send_managed_memory_stats();
    }

    /// Forgets tile textures that lost their backing. Surface textures stay
    /// registered and are backed again when the next frame reserves them.
    fn release_evicted_tiles(&mut self, evicted: Vec<ResourceId>) {
        let textures = &self.frame_state.render_pass_textures;
        let evicted: HashSet<ResourceId> = evicted
            .into_iter()
            .filter(|&texture| !textures.owns(texture))
            .collect();
        if evicted.is_empty() {
            return;
        }
        let dropped = self.tree.drop_tile_resources(&evicted);
        for &id in &evicted {
            self.memory_state.resource_manager.delete_texture(id);
            self.output_state.resource_provider.delete_resource(id);
        }
        tracing::debug!(evicted = evicted.len(), dropped, "evicted tile textures");
        if dropped > 0 {
            self.client.set_needs_manage_tiles_on_impl_thread();
            self.client.set_needs_redraw_on_impl_thread();
        }
    }

    pub fn set_contents_textures_purged(&mut self) {
        self.frame_state.contents_textures_purged = true;
        let can_draw = self.can_draw();
        self.client.on_can_draw_state_changed(can_draw);
    }

    pub fn reset_contents_textures_purged(&mut self) {
        self.frame_state.contents_textures_purged = false;
        let can_draw = self.can_draw();
        self.client.on_can_draw_state_changed(can_draw);
    }

    /// Reports memory use, rounded up, to the renderer and the host when it
    /// changed since the last report.
    pub fn send_managed_memory_stats(&mut self) {
        let Some(renderer) = self.output_state.renderer.as_deref_mut() else {
            return;
        };
        let stats = rounded_memory_stats(self.memory_state.resource_manager.memory_stats());
        if stats == self.memory_state.last_sent_memory_stats {
            return;
        }
        tracing::trace!(?stats, "sending managed memory stats");
        self.memory_state.last_sent_memory_stats = stats;
        renderer.send_managed_memory_stats(stats);
        self.client.send_managed_memory_stats(stats);
    }

    /// Starts uploads for tiles that have no current contents, most
    /// important first, within the memory budget and the in-flight limit.
    pub fn manage_tiles(&mut self) {
        let _span = tracing::trace_span!("manage_tiles").entered();
        if self.output_state.resource_provider.is_context_lost() {
            return;
        }
        self.update_draw_properties();
        let Some(root) = self.tree.root() else {
            return;
        };

        let budget = self.settings.num_raster_threads.max(1) * MAX_PENDING_UPLOADS_PER_RASTER_THREAD;
        let in_flight = self.output_state.resource_provider.pending_upload_count();
        if in_flight >= budget {
            return;
        }

        let mut candidates: Vec<(i32, LayerId, TileIndex)> = Vec::new();
        for id in self.tree.subtree_pre_order(root) {
            let layer = self.tree.get(id);
            let LayerContent::Tiled(tiled) = layer.content() else {
                continue;
            };
            let draw = layer.draw_properties();
            let draws_to_root = draw.render_target == Some(root);
            for index in tiled.tiles_needing_upload(Rect::from_size(layer.content_bounds())) {
                let priority = match distance_to_visible(tiled.tile_bounds(index), draw.visible_content_rect) {
                    Some(distance) => priority::priority_from_distance(distance, draws_to_root),
                    None => priority::NOT_VISIBLE_BASE,
                };
                candidates.push((priority, id, index));
            }
        }
        candidates.sort_by_key(|&(priority, _, _)| priority);

        let mut scheduled = 0usize;
        let mut deferred = false;
        for (priority, id, index) in candidates {
            if in_flight + scheduled >= budget {
                deferred = true;
                break;
            }
            let LayerContent::Tiled(tiled) = self.tree.get(id).content() else {
                continue;
            };
            let size = tiled.tile_bounds(index).size();
            let color = tiled.tile_color(index);
            let existing = tiled.tile(index).and_then(|tile| tile.resource());

            let manager = &mut self.memory_state.resource_manager;
            let resource = match existing {
                Some(resource) if manager.contains(resource) => {
                    if let Err(error) = manager.set_request_priority(resource, priority) {
                        tracing::warn!(%error, "tile texture vanished");
                        continue;
                    }
                    resource
                }
                _ => manager.create_texture(size, priority),
            };
            if let Err(error) = manager.acquire_backing(resource) {
                tracing::trace!(%error, priority, "tile uploads deferred by memory budget");
                if existing != Some(resource) {
                    manager.delete_texture(resource);
                }
                break;
            }
            if let Err(error) = self.output_state.resource_provider.begin_upload(resource, color, true) {
                tracing::warn!(%error, "tile upload failed");
                if existing != Some(resource) {
                    self.memory_state.resource_manager.delete_texture(resource);
                }
                break;
            }
            if let LayerContent::Tiled(tiled) = self.tree.get_mut(id).content_mut() {
                tiled.attach_resource(index, resource);
            }
            scheduled += 1;
        }

        if scheduled > 0 {
            tracing::trace!(scheduled, "tile uploads started");
            self.client.set_needs_redraw_on_impl_thread();
        }
        if deferred {
            self.client.set_needs_manage_tiles_on_impl_thread();
        }
    }
}
