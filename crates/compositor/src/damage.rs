//! Per-surface damage tracking.
//!
//! Each surface remembers the target-space rect every contributing layer
//! covered last frame. A frame's damage is built from layers that changed,
//! layers that repainted part of their content, contributing surfaces that
//! were themselves damaged, and rects of layers that disappeared.

use std::collections::HashMap;

use geometry::{Rect, RectF};
use render_protocol::{FilterOperations, LayerId};

use crate::layer::LayerTree;

#[derive(Debug, Clone, Default)]
pub struct DamageTracker {
    current_rect_history: HashMap<LayerId, RectF>,
    next_rect_history: HashMap<LayerId, RectF>,
    current_damage_rect: RectF,
    pending_damage: RectF,
    force_full_damage_next_update: bool,
}

impl DamageTracker {
    /// Damage accumulated since the last `did_draw_damaged_area`, in the
    /// surface's content space.
    pub fn current_damage_rect(&self) -> RectF {
        self.current_damage_rect
    }

    pub fn did_draw_damaged_area(&mut self) {
        self.current_damage_rect = RectF::default();
    }

    pub fn force_full_damage_next_update(&mut self) {
        self.force_full_damage_next_update = true;
    }

    /// Extra damage folded into the next update.
    pub fn add_damage_next_update(&mut self, rect: RectF) {
        self.pending_damage = self.pending_damage.union(&rect);
    }

    /// Recomputes damage for the surface owned by `target`.
    ///
    /// Contributing surfaces in the layer list must already have been
    /// updated for this frame.
    pub(crate) fn update_damage_tracking_state(&mut self, tree: &LayerTree, target: LayerId) {
        let owner = tree.get(target);
        let Some(surface) = owner.render_surface() else {
            return;
        };
        let property_changed_only_from_descendant =
            surface.surface_property_changed() && !tree.layer_property_changed(target);
        let content_rect = surface.content_rect().to_f32();

        let damage_from_active_layers = self.track_damage_from_active_layers(tree, target, surface.layer_list());
        let damage_from_surface_mask = track_damage_from_surface_mask(tree, owner.mask_layer());
        let damage_from_leftover_rects = self.track_damage_from_leftover_rects();

        let damage_for_this_update =
            if self.force_full_damage_next_update || property_changed_only_from_descendant {
                self.force_full_damage_next_update = false;
                content_rect
            } else {
                let mut damage = damage_from_active_layers
                    .union(&damage_from_surface_mask)
                    .union(&damage_from_leftover_rects)
                    .union(&self.pending_damage);
                if owner.filters().has_filter_that_moves_pixels() {
                    damage = expand_rect_with_filters(damage, owner.filters());
                }
                damage
            };
        self.pending_damage = RectF::default();

        self.current_damage_rect = self.current_damage_rect.union(&damage_for_this_update);
        std::mem::swap(&mut self.current_rect_history, &mut self.next_rect_history);
    }

    fn track_damage_from_active_layers(
        &mut self,
        tree: &LayerTree,
        target: LayerId,
        layer_list: &[LayerId],
    ) -> RectF {
        let mut damage = RectF::default();
        for &id in layer_list {
            let contributes_surface = id != target && tree.get(id).render_surface().is_some();
            if contributes_surface {
                self.extend_damage_for_render_surface(tree, id, &mut damage);
            } else {
                self.extend_damage_for_layer(tree, id, &mut damage);
            }
        }
        damage
    }

    /// Everything still in the current history belongs to layers that no
    /// longer contribute; their old rects are exposed now.
    fn track_damage_from_leftover_rects(&mut self) -> RectF {
        let mut damage = RectF::default();
        for (_, rect) in self.current_rect_history.drain() {
            damage = damage.union(&rect);
        }
        damage
    }

    /// Returns the rect saved last frame and whether the layer is new.
    fn remove_rect_from_current_frame(&mut self, id: LayerId) -> (RectF, bool) {
        match self.current_rect_history.remove(&id) {
            Some(rect) => (rect, false),
            None => (RectF::default(), true),
        }
    }

    fn save_rect_for_next_frame(&mut self, id: LayerId, rect: RectF) {
        self.next_rect_history.insert(id, rect);
    }

    fn extend_damage_for_layer(&mut self, tree: &LayerTree, id: LayerId, target_damage: &mut RectF) {
        let layer = tree.get(id);
        let (old_rect, layer_is_new) = self.remove_rect_from_current_frame(id);
        let draw_transform = layer.draw_properties().draw_transform;
        let rect_in_target = draw_transform.map_rect(Rect::from_size(layer.content_bounds()).to_f32());
        self.save_rect_for_next_frame(id, rect_in_target);

        if layer_is_new || tree.layer_property_changed(id) {
            *target_damage = target_damage.union(&rect_in_target).union(&old_rect);
        } else if !layer.update_rect().is_empty() {
            let update_in_target = draw_transform.map_rect(layer.update_rect());
            *target_damage = target_damage.union(&update_in_target);
        }
    }

    fn extend_damage_for_render_surface(
        &mut self,
        tree: &LayerTree,
        id: LayerId,
        target_damage: &mut RectF,
    ) {
        let layer = tree.get(id);
        let Some(surface) = layer.render_surface() else {
            return;
        };
        let (old_surface_rect, surface_is_new) = self.remove_rect_from_current_frame(id);
        let surface_rect_in_target = surface.drawable_content_rect(layer.has_replica());
        self.save_rect_for_next_frame(id, surface_rect_in_target);

        let damage_in_local_space = if surface_is_new
            || surface.surface_property_changed()
            || tree.layer_surface_property_changed(id)
        {
            *target_damage = target_damage.union(&old_surface_rect);
            surface.content_rect().to_f32()
        } else {
            surface.damage_tracker().current_damage_rect()
        };

        if !damage_in_local_space.is_empty() {
            let damage_in_target = surface.draw_transform().map_rect(damage_in_local_space);
            *target_damage = target_damage.union(&damage_in_target);
            if layer.has_replica() {
                let replica_damage = surface
                    .replica_draw_transform()
                    .map_rect(damage_in_local_space);
                *target_damage = target_damage.union(&replica_damage);
            }
        }

        let replica_mask = layer
            .replica_layer()
            .and_then(|replica| tree.get(replica).mask_layer());
        if let Some(replica_mask) = replica_mask {
            let (_, replica_is_new) = self.remove_rect_from_current_frame(replica_mask);
            let mask_layer = tree.get(replica_mask);
            let replica_mask_rect = surface
                .replica_draw_transform()
                .map_rect(Rect::from_size(mask_layer.bounds()).to_f32());
            self.save_rect_for_next_frame(replica_mask, replica_mask_rect);
            if replica_is_new
                || tree.layer_property_changed(replica_mask)
                || !mask_layer.update_rect().is_empty()
            {
                *target_damage = target_damage.union(&replica_mask_rect);
            }
        }

        if layer.background_filters().has_filter_that_moves_pixels() {
            expand_damage_inside_rect_with_filters(
                target_damage,
                surface_rect_in_target,
                layer.background_filters(),
            );
        }
    }
}

/// A changed mask damages the whole surface.
fn track_damage_from_surface_mask(tree: &LayerTree, mask: Option<LayerId>) -> RectF {
    let Some(mask) = mask else {
        return RectF::default();
    };
    let mask_layer = tree.get(mask);
    if !mask_layer.update_rect().is_empty() || tree.layer_property_changed(mask) {
        return Rect::from_size(mask_layer.content_bounds()).to_f32();
    }
    RectF::default()
}

fn expand_rect_with_filters(rect: RectF, filters: &FilterOperations) -> RectF {
    filters.expand_rect(rect.to_enclosing_rect()).to_f32()
}

/// Background filters read pixels around the damage, so the part of
/// `pre_filter_rect` they can reach is damaged too.
fn expand_damage_inside_rect_with_filters(
    damage: &mut RectF,
    pre_filter_rect: RectF,
    filters: &FilterOperations,
) {
    let expanded = expand_rect_with_filters(*damage, filters);
    let filter_rect = pre_filter_rect.intersect(&expanded);
    *damage = damage.union(&filter_rect);
}

/// Updates every surface's tracker, descendants before ancestors.
pub(crate) fn track_damage_for_all_surfaces(tree: &mut LayerTree, render_surface_layer_list: &[LayerId]) {
    for &target in render_surface_layer_list.iter().rev() {
        let Some(surface) = tree.get_mut(target).render_surface.as_mut() else {
            continue;
        };
        let mut tracker = std::mem::take(&mut surface.damage_tracker);
        tracker.update_damage_tracking_state(tree, target);
        if let Some(surface) = tree.get_mut(target).render_surface.as_mut() {
            surface.damage_tracker = tracker;
        }
    }
}

#[cfg(test)]
mod tests {
    use geometry::{PointF, Size};
    use render_protocol::{Color, FilterOperation};

    use super::*;
    use crate::draw_properties::{DrawPropertiesInputs, calculate_draw_properties};
    use crate::layer::Layer;

    struct Scene {
        tree: LayerTree,
        root: LayerId,
        child: LayerId,
    }

    impl Scene {
        fn new() -> Self {
            let mut tree = LayerTree::new();
            let root = tree.insert(Layer::new(LayerId(1)));
            tree.get_mut(root).set_bounds(Size::new(100, 100));
            let child = tree.insert(Layer::solid_color(LayerId(2), Size::new(10, 10), Color::WHITE));
            tree.get_mut(child).set_position(PointF::new(20.0, 20.0));
            tree.add_child(root, child);
            tree.set_root(Some(root));
            Self { tree, root, child }
        }

        fn update(&mut self) -> RectF {
            let list = calculate_draw_properties(
                &mut self.tree,
                DrawPropertiesInputs {
                    root: self.root,
                    device_viewport_size: Size::new(100, 100),
                    device_scale_factor: 1.0,
                    max_texture_size: 4096,
                },
            );
            track_damage_for_all_surfaces(&mut self.tree, &list);
            self.tree.reset_all_change_tracking_for_subtree(self.root);
            let surface = self
                .tree
                .layer_mut(self.root)
                .and_then(|root| root.render_surface.as_mut())
                .expect("root surface");
            let damage = surface.damage_tracker.current_damage_rect();
            surface.damage_tracker.did_draw_damaged_area();
            damage
        }
    }

    #[test]
    fn new_layer_damages_its_rect_then_nothing() {
        let mut scene = Scene::new();
        assert_eq!(scene.update(), RectF::new(20.0, 20.0, 10.0, 10.0));
        assert!(scene.update().is_empty());
    }

    #[test]
    fn moved_layer_damages_old_and_new_rects() {
        let mut scene = Scene::new();
        scene.update();
        scene
            .tree
            .get_mut(scene.child)
            .set_position(PointF::new(40.0, 20.0));
        assert_eq!(scene.update(), RectF::new(20.0, 20.0, 30.0, 10.0));
    }

    #[test]
    fn update_rect_damages_only_the_repainted_part() {
        let mut scene = Scene::new();
        scene.update();
        scene
            .tree
            .get_mut(scene.child)
            .set_needs_display_rect(RectF::new(0.0, 0.0, 2.0, 3.0));
        assert_eq!(scene.update(), RectF::new(20.0, 20.0, 2.0, 3.0));
    }

    #[test]
    fn removed_layer_exposes_its_old_rect() {
        let mut scene = Scene::new();
        scene.update();
        scene.tree.remove_subtree(scene.child);
        assert_eq!(scene.update(), RectF::new(20.0, 20.0, 10.0, 10.0));
    }

    #[test]
    fn forced_full_damage_covers_the_surface_once() {
        let mut scene = Scene::new();
        scene.update();
        scene
            .tree
            .layer_mut(scene.root)
            .and_then(|root| root.render_surface.as_mut())
            .expect("root surface")
            .damage_tracker
            .force_full_damage_next_update();
        assert_eq!(scene.update(), RectF::new(0.0, 0.0, 100.0, 100.0));
        assert!(scene.update().is_empty());
    }

    #[test]
    fn background_filter_expands_damage_inside_the_surface() {
        let mut damage = RectF::new(10.0, 10.0, 2.0, 2.0);
        let filters = FilterOperations::new(vec![FilterOperation::Blur { std_deviation: 1.0 }]);
        expand_damage_inside_rect_with_filters(&mut damage, RectF::new(0.0, 0.0, 12.0, 12.0), &filters);
        assert_eq!(damage.right(), 12.0);
        assert!(damage.x < 10.0);
    }
}
