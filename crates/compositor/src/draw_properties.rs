//! Draw-property pass.
//!
//! Walks the layer tree once, depth first, with an explicit stack. On the way
//! down each layer gets its transforms, opacity and clip, and the pass decides
//! which layers own a render surface. On the way up every surface gets its
//! content rect and is either kept or dropped when nothing inside it draws.
//! A second walk over the resulting surface list computes visible content
//! rects.

use std::collections::HashMap;

use geometry::{Rect, RectF, Size, Transform};
use protocol::TargetProperty;
use render_protocol::LayerId;

use crate::layer::LayerTree;
use crate::render_surface::RenderSurface;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawPropertiesInputs {
    pub root: LayerId,
    pub device_viewport_size: Size,
    pub device_scale_factor: f32,
    pub max_texture_size: i32,
}

/// State a layer inherits from its ancestors.
#[derive(Debug, Clone, Copy)]
struct Inherited {
    /// Maps the parent's layer space into the current target space.
    parent_matrix: Transform,
    /// Maps the parent's layer space into screen space.
    full_hierarchy_matrix: Transform,
    clip_rect_in_target: Rect,
    ancestor_clips_subtree: bool,
    target: LayerId,
    opacity: f32,
    opacity_is_animating: bool,
    transform_to_target_is_animating: bool,
    transform_to_screen_is_animating: bool,
}

#[derive(Debug, Clone, Copy)]
struct ExitState {
    layer: LayerId,
    parent: Option<LayerId>,
    parent_target: LayerId,
    owns_surface: bool,
    is_root: bool,
    surface_list_index: usize,
    ancestor_clips_subtree: bool,
}

enum Visit {
    Enter(LayerId, Inherited),
    Exit(ExitState),
}

/// Computes draw properties for every layer under `inputs.root` and returns
/// the render-surface layer list: owners of surfaces that draw, ancestors
/// before descendants.
pub fn calculate_draw_properties(tree: &mut LayerTree, inputs: DrawPropertiesInputs) -> Vec<LayerId> {
    let root = inputs.root;
    let viewport_rect = Rect::from_size(inputs.device_viewport_size);
    let drawing_descendants = count_drawing_descendants(tree, root);

    let mut render_surface_layer_list: Vec<LayerId> = Vec::new();
    let mut subtree_rects: HashMap<LayerId, Rect> = HashMap::new();
    let device_scale = Transform::from_scale(inputs.device_scale_factor, inputs.device_scale_factor);
    let mut stack = vec![Visit::Enter(
        root,
        Inherited {
            parent_matrix: device_scale,
            full_hierarchy_matrix: device_scale,
            clip_rect_in_target: viewport_rect,
            ancestor_clips_subtree: true,
            target: root,
            opacity: 1.0,
            opacity_is_animating: false,
            transform_to_target_is_animating: false,
            transform_to_screen_is_animating: false,
        },
    )];

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(id, inherited) => {
                let is_root = id == root;
                let layer = tree.get(id);
                let local = local_transform(tree, id);
                let skip_subtree = !is_root
                    && ((layer.opacity() == 0.0 && !layer.is_animating(TargetProperty::Opacity))
                        || !local.is_invertible());
                if skip_subtree {
                    clear_surfaces_in_subtree(tree, id);
                    continue;
                }

                let combined = inherited.parent_matrix.multiply(&local);
                let screen_space = inherited.full_hierarchy_matrix.multiply(&local);
                let owns_surface = is_root
                    || subtree_should_render_to_separate_surface(
                        tree,
                        id,
                        &combined,
                        drawing_descendants.get(&id).copied().unwrap_or(0),
                    );
                let transform_animating = layer.is_animating(TargetProperty::Transform);
                let opacity_animating = layer.is_animating(TargetProperty::Opacity);
                let animating_to_target =
                    transform_animating || inherited.transform_to_target_is_animating;
                let animating_to_screen =
                    transform_animating || inherited.transform_to_screen_is_animating;
                let bounds = layer.bounds();
                let draws_content = layer.draws_content() && !bounds.is_empty();
                let masks_to_bounds = layer.masks_to_bounds();
                let children: Vec<LayerId> = layer.children().to_vec();
                let parent = layer.parent();
                let replica_local = layer
                    .replica_layer()
                    .map(|replica| local_transform(tree, replica));
                let opacity = layer.opacity();

                let surface_list_index = render_surface_layer_list.len();
                let mut children_inherit;
                let layer_drawable;

                if owns_surface {
                    render_surface_layer_list.push(id);
                    let layer = tree.get_mut(id);
                    let surface = layer
                        .render_surface
                        .get_or_insert_with(|| RenderSurface::new(id));
                    surface.layer_list.clear();
                    surface.screen_space_transforms_are_animating = animating_to_screen;

                    if is_root {
                        surface.draw_transform = Transform::identity();
                        surface.screen_space_transform = Transform::identity();
                        surface.replica_draw_transform = Transform::identity();
                        surface.replica_screen_space_transform = Transform::identity();
                        surface.draw_opacity = 1.0;
                        surface.draw_opacity_is_animating = false;
                        surface.target_surface_transforms_are_animating = false;
                        surface.is_clipped = false;
                        surface.set_clip_rect(viewport_rect);

                        layer_drawable = combined
                            .map_rect(RectF::from_size(bounds.to_f32()))
                            .to_enclosing_rect()
                            .intersect(&viewport_rect);
                        layer.draw.draw_transform = combined;
                        layer.draw.screen_space_transform = screen_space;
                        layer.draw.opacity = opacity;
                        layer.draw.is_clipped = true;
                        layer.draw.clip_rect = viewport_rect;
                        layer.draw.draw_transform_is_animating = animating_to_target;
                        layer.draw.opacity_is_animating = opacity_animating;

                        children_inherit = Inherited {
                            parent_matrix: combined,
                            full_hierarchy_matrix: screen_space,
                            clip_rect_in_target: viewport_rect,
                            ancestor_clips_subtree: true,
                            target: id,
                            opacity,
                            opacity_is_animating: opacity_animating,
                            transform_to_target_is_animating: animating_to_target,
                            transform_to_screen_is_animating: animating_to_screen,
                        };
                    } else {
                        surface.draw_transform = combined;
                        surface.screen_space_transform = screen_space;
                        if let Some(replica_local) = replica_local {
                            surface.replica_draw_transform = combined.multiply(&replica_local);
                            surface.replica_screen_space_transform =
                                screen_space.multiply(&replica_local);
                        }
                        surface.draw_opacity = inherited.opacity * opacity;
                        surface.draw_opacity_is_animating =
                            opacity_animating || inherited.opacity_is_animating;
                        surface.target_surface_transforms_are_animating = animating_to_target;
                        surface.is_clipped = inherited.ancestor_clips_subtree;
                        surface.set_clip_rect(if inherited.ancestor_clips_subtree {
                            inherited.clip_rect_in_target
                        } else {
                            Rect::default()
                        });

                        layer_drawable = Rect::from_size(bounds);
                        layer.draw.draw_transform = Transform::identity();
                        layer.draw.screen_space_transform = screen_space;
                        layer.draw.opacity = 1.0;
                        layer.draw.is_clipped = false;
                        layer.draw.clip_rect = Rect::default();
                        layer.draw.draw_transform_is_animating = false;
                        layer.draw.opacity_is_animating = false;

                        children_inherit = Inherited {
                            parent_matrix: Transform::identity(),
                            full_hierarchy_matrix: screen_space,
                            clip_rect_in_target: Rect::default(),
                            ancestor_clips_subtree: false,
                            target: id,
                            opacity: 1.0,
                            opacity_is_animating: false,
                            transform_to_target_is_animating: false,
                            transform_to_screen_is_animating: animating_to_screen,
                        };
                    }
                    layer.draw.render_target = Some(id);
                    layer.draw.screen_space_transform_is_animating = animating_to_screen;
                    layer.draw.drawable_content_rect = layer_drawable;
                    if draws_content {
                        if let Some(surface) = layer.render_surface.as_mut() {
                            surface.layer_list.push(id);
                        }
                    }
                } else {
                    let layer = tree.get_mut(id);
                    layer.clear_render_surface();
                    let draw_opacity = inherited.opacity * opacity;
                    let mut drawable = combined
                        .map_rect(RectF::from_size(bounds.to_f32()))
                        .to_enclosing_rect();
                    if inherited.ancestor_clips_subtree {
                        drawable = drawable.intersect(&inherited.clip_rect_in_target);
                    }
                    layer_drawable = drawable;
                    layer.draw.draw_transform = combined;
                    layer.draw.screen_space_transform = screen_space;
                    layer.draw.opacity = draw_opacity;
                    layer.draw.is_clipped = inherited.ancestor_clips_subtree;
                    layer.draw.clip_rect = inherited.clip_rect_in_target;
                    layer.draw.render_target = Some(inherited.target);
                    layer.draw.drawable_content_rect = drawable;
                    layer.draw.draw_transform_is_animating = animating_to_target;
                    layer.draw.screen_space_transform_is_animating = animating_to_screen;
                    layer.draw.opacity_is_animating =
                        opacity_animating || inherited.opacity_is_animating;
                    if draws_content {
                        target_surface_mut(tree, inherited.target).layer_list.push(id);
                    }

                    children_inherit = Inherited {
                        parent_matrix: combined,
                        full_hierarchy_matrix: screen_space,
                        clip_rect_in_target: inherited.clip_rect_in_target,
                        ancestor_clips_subtree: inherited.ancestor_clips_subtree,
                        target: inherited.target,
                        opacity: draw_opacity,
                        opacity_is_animating: opacity_animating || inherited.opacity_is_animating,
                        transform_to_target_is_animating: animating_to_target,
                        transform_to_screen_is_animating: animating_to_screen,
                    };
                }

                if masks_to_bounds {
                    let bounds_in_target = if owns_surface && !is_root {
                        Rect::from_size(bounds)
                    } else {
                        combined
                            .map_rect(RectF::from_size(bounds.to_f32()))
                            .to_enclosing_rect()
                    };
                    children_inherit.clip_rect_in_target = if children_inherit.ancestor_clips_subtree
                    {
                        children_inherit.clip_rect_in_target.intersect(&bounds_in_target)
                    } else {
                        bounds_in_target
                    };
                    children_inherit.ancestor_clips_subtree = true;
                }

                subtree_rects.insert(
                    id,
                    if draws_content {
                        layer_drawable
                    } else {
                        Rect::default()
                    },
                );
                stack.push(Visit::Exit(ExitState {
                    layer: id,
                    parent: if is_root { None } else { parent },
                    parent_target: inherited.target,
                    owns_surface,
                    is_root,
                    surface_list_index,
                    ancestor_clips_subtree: inherited.ancestor_clips_subtree,
                }));
                for child in children.into_iter().rev() {
                    stack.push(Visit::Enter(child, children_inherit));
                }
            }
            Visit::Exit(state) => {
                let subtree_rect = subtree_rects.remove(&state.layer).unwrap_or_default();
                let rect_for_parent = if state.is_root {
                    target_surface_mut(tree, state.layer).set_content_rect(viewport_rect);
                    subtree_rect
                } else if state.owns_surface {
                    finish_surface(
                        tree,
                        &state,
                        subtree_rect,
                        inputs.max_texture_size,
                        &mut render_surface_layer_list,
                    )
                } else {
                    subtree_rect
                };
                if let Some(parent) = state.parent {
                    if let Some(parent_rect) = subtree_rects.get_mut(&parent) {
                        *parent_rect = parent_rect.union(&rect_for_parent);
                    }
                }
            }
        }
    }

    calculate_visible_rects(tree, &render_surface_layer_list);
    tracing::trace!(
        surfaces = render_surface_layer_list.len(),
        "calculated draw properties"
    );
    render_surface_layer_list
}

/// Sizes a finished non-root surface. Returns the surface's drawable rect in
/// the parent target, or an empty rect when the surface was dropped.
fn finish_surface(
    tree: &mut LayerTree,
    state: &ExitState,
    subtree_rect: Rect,
    max_texture_size: i32,
    render_surface_layer_list: &mut Vec<LayerId>,
) -> Rect {
    let id = state.layer;
    let layer = tree.get(id);
    let has_replica = layer.has_replica();
    let mask = layer.mask_layer();
    let replica = layer.replica_layer();
    let replica_mask = replica.and_then(|replica| tree.get(replica).mask_layer());

    let surface = target_surface_mut(tree, id);
    let mut content_rect = subtree_rect;
    if !has_replica && state.ancestor_clips_subtree && !content_rect.is_empty() {
        let clip_in_surface =
            calculate_visible_rect(surface.clip_rect(), content_rect, &surface.draw_transform);
        content_rect = content_rect.intersect(&clip_in_surface);
    }
    content_rect.width = content_rect.width.min(max_texture_size);
    content_rect.height = content_rect.height.min(max_texture_size);
    surface.set_content_rect(content_rect);
    let mut drawable = surface.drawable_content_rect(has_replica).to_enclosing_rect();
    if surface.is_clipped() {
        drawable = drawable.intersect(&surface.clip_rect());
    }

    if content_rect.is_empty() {
        for removed in render_surface_layer_list.drain(state.surface_list_index..) {
            tree.get_mut(removed).clear_render_surface();
        }
        return Rect::default();
    }

    let owner_draw_transform = tree.get(id).draw.draw_transform;
    for attached in [mask, replica, replica_mask].into_iter().flatten() {
        let attached_layer = tree.get_mut(attached);
        attached_layer.draw.draw_transform = owner_draw_transform;
        attached_layer.draw.visible_content_rect = Rect::from_size(attached_layer.bounds());
        attached_layer.draw.render_target = Some(id);
    }
    target_surface_mut(tree, state.parent_target)
        .layer_list
        .push(id);
    drawable
}

/// Position, transform and scroll of one layer relative to its parent.
fn local_transform(tree: &LayerTree, id: LayerId) -> Transform {
    let layer = tree.get(id);
    let position = layer.position();
    let scroll = layer.total_scroll_offset();
    let mut local = Transform::from_translation(position.x, position.y);
    local.concat(&layer.impl_transform());
    local.concat(&layer.transform());
    local.translate(-scroll.x, -scroll.y);
    local
}

fn subtree_should_render_to_separate_surface(
    tree: &LayerTree,
    id: LayerId,
    combined: &Transform,
    drawing_descendants: usize,
) -> bool {
    let layer = tree.get(id);
    if layer.mask_layer().is_some()
        || layer.replica_layer().is_some()
        || !layer.filters().is_empty()
        || !layer.background_filters().is_empty()
        || layer.force_render_surface()
    {
        return true;
    }
    if layer.masks_to_bounds()
        && !combined.preserves_axis_alignment()
        && drawing_descendants > 0
    {
        return true;
    }
    if layer.opacity() != 1.0 {
        if layer.draws_content() && drawing_descendants > 0 {
            return true;
        }
        if drawing_descendants > 1 {
            return true;
        }
    }
    false
}

/// Number of descendants that draw content, per layer.
fn count_drawing_descendants(tree: &LayerTree, root: LayerId) -> HashMap<LayerId, usize> {
    let order = tree.subtree_pre_order(root);
    let mut counts: HashMap<LayerId, usize> = HashMap::with_capacity(order.len());
    for id in order.iter().rev() {
        let layer = tree.get(*id);
        let mut count = 0;
        for child in layer.children() {
            count += counts.get(child).copied().unwrap_or(0);
            if tree.get(*child).draws_content() {
                count += 1;
            }
        }
        counts.insert(*id, count);
    }
    counts
}

fn clear_surfaces_in_subtree(tree: &mut LayerTree, id: LayerId) {
    for layer in tree.subtree_pre_order(id) {
        tree.get_mut(layer).clear_render_surface();
    }
}

fn target_surface_mut(tree: &mut LayerTree, target: LayerId) -> &mut RenderSurface {
    tree.get_mut(target)
        .render_surface
        .as_mut()
        .unwrap_or_else(|| panic!("render target {target} has no render surface"))
}

fn calculate_visible_rects(tree: &mut LayerTree, render_surface_layer_list: &[LayerId]) {
    for &target in render_surface_layer_list {
        let Some(surface) = tree.get(target).render_surface() else {
            continue;
        };
        let target_content_rect = surface.content_rect();
        let layers = surface.layer_list().to_vec();
        for id in layers {
            let layer = tree.get_mut(id);
            if id != target && layer.render_surface.is_some() {
                continue;
            }
            let visible_in_target = layer.draw.drawable_content_rect.intersect(&target_content_rect);
            let content_rect = Rect::from_size(layer.content_bounds());
            layer.draw.visible_content_rect =
                calculate_visible_rect(visible_in_target, content_rect, &layer.draw.draw_transform);
        }
    }
}

/// Part of `layer_rect` (layer space) that lands inside `target_rect`
/// (target space) under `transform`.
pub(crate) fn calculate_visible_rect(target_rect: Rect, layer_rect: Rect, transform: &Transform) -> Rect {
    if layer_rect.is_empty() {
        return Rect::default();
    }
    let layer_in_target = transform.map_rect(layer_rect.to_f32()).to_enclosing_rect();
    if target_rect.contains_rect(&layer_in_target) {
        return layer_rect;
    }
    let minimal_in_target = target_rect.intersect(&layer_in_target);
    if minimal_in_target.is_empty() {
        return Rect::default();
    }
    let Some(inverse) = transform.inverse() else {
        return layer_rect;
    };
    inverse
        .map_rect(minimal_in_target.to_f32())
        .to_enclosing_rect()
        .intersect(&layer_rect)
}

#[cfg(test)]
mod tests {
    use geometry::PointF;
    use render_protocol::{Color, FilterOperation, FilterOperations};

    use super::*;
    use crate::layer::Layer;

    fn inputs(root: LayerId) -> DrawPropertiesInputs {
        DrawPropertiesInputs {
            root,
            device_viewport_size: Size::new(100, 100),
            device_scale_factor: 1.0,
            max_texture_size: 4096,
        }
    }

    fn solid(tree: &mut LayerTree, id: u64, bounds: Size) -> LayerId {
        tree.insert(Layer::solid_color(LayerId(id), bounds, Color::WHITE))
    }

    #[test]
    fn root_owns_the_only_surface_for_plain_children() {
        let mut tree = LayerTree::new();
        let root = tree.insert(Layer::new(LayerId(1)));
        tree.get_mut(root).set_bounds(Size::new(100, 100));
        let child = solid(&mut tree, 2, Size::new(10, 10));
        tree.get_mut(child).set_position(PointF::new(20.0, 30.0));
        tree.add_child(root, child);
        tree.set_root(Some(root));

        let list = calculate_draw_properties(&mut tree, inputs(root));
        assert_eq!(list, vec![root]);
        let surface = tree.get(root).render_surface().expect("root surface");
        assert_eq!(surface.layer_list(), &[child]);
        assert_eq!(surface.content_rect(), Rect::new(0, 0, 100, 100));
        let draw = tree.get(child).draw_properties();
        assert_eq!(draw.drawable_content_rect, Rect::new(20, 30, 10, 10));
        assert_eq!(draw.visible_content_rect, Rect::new(0, 0, 10, 10));
        assert_eq!(draw.render_target, Some(root));
    }

    #[test]
    fn translucent_layer_with_two_drawing_children_gets_a_surface() {
        let mut tree = LayerTree::new();
        let root = tree.insert(Layer::new(LayerId(1)));
        tree.get_mut(root).set_bounds(Size::new(100, 100));
        let group = tree.insert(Layer::new(LayerId(2)));
        tree.get_mut(group).set_bounds(Size::new(50, 50));
        tree.get_mut(group).set_opacity(0.5);
        tree.get_mut(group).set_position(PointF::new(10.0, 10.0));
        let first = solid(&mut tree, 3, Size::new(10, 10));
        let second = solid(&mut tree, 4, Size::new(10, 10));
        tree.get_mut(second).set_position(PointF::new(20.0, 0.0));
        tree.add_child(root, group);
        tree.add_child(group, first);
        tree.add_child(group, second);
        tree.set_root(Some(root));

        let list = calculate_draw_properties(&mut tree, inputs(root));
        assert_eq!(list, vec![root, group]);
        let surface = tree.get(group).render_surface().expect("group surface");
        assert_eq!(surface.content_rect(), Rect::new(0, 0, 30, 10));
        assert_eq!(surface.draw_opacity(), 0.5);
        assert_eq!(surface.layer_list(), &[first, second]);
        assert_eq!(tree.get(first).draw_properties().opacity, 1.0);
        assert_eq!(
            tree.get(root).render_surface().expect("root").layer_list(),
            &[group]
        );
    }

    #[test]
    fn surface_without_drawing_content_is_dropped() {
        let mut tree = LayerTree::new();
        let root = tree.insert(Layer::new(LayerId(1)));
        let filtered = tree.insert(Layer::new(LayerId(2)));
        tree.get_mut(filtered)
            .set_filters(FilterOperations::new(vec![FilterOperation::Grayscale(1.0)]));
        tree.add_child(root, filtered);
        tree.set_root(Some(root));

        let list = calculate_draw_properties(&mut tree, inputs(root));
        assert_eq!(list, vec![root]);
        assert!(tree.get(filtered).render_surface().is_none());
    }

    #[test]
    fn masks_to_bounds_clips_descendants() {
        let mut tree = LayerTree::new();
        let root = tree.insert(Layer::new(LayerId(1)));
        let clip = tree.insert(Layer::new(LayerId(2)));
        tree.get_mut(clip).set_bounds(Size::new(20, 20));
        tree.get_mut(clip).set_masks_to_bounds(true);
        let content = solid(&mut tree, 3, Size::new(50, 50));
        tree.get_mut(content).set_position(PointF::new(10.0, 10.0));
        tree.add_child(root, clip);
        tree.add_child(clip, content);
        tree.set_root(Some(root));

        calculate_draw_properties(&mut tree, inputs(root));
        let draw = tree.get(content).draw_properties();
        assert!(draw.is_clipped);
        assert_eq!(draw.drawable_content_rect, Rect::new(10, 10, 10, 10));
        assert_eq!(draw.visible_content_rect, Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn zero_opacity_subtree_is_skipped() {
        let mut tree = LayerTree::new();
        let root = tree.insert(Layer::new(LayerId(1)));
        let hidden = solid(&mut tree, 2, Size::new(10, 10));
        tree.get_mut(hidden).set_opacity(0.0);
        tree.add_child(root, hidden);
        tree.set_root(Some(root));

        calculate_draw_properties(&mut tree, inputs(root));
        assert!(
            tree.get(root)
                .render_surface()
                .expect("root")
                .layer_list()
                .is_empty()
        );
    }

    #[test]
    fn visible_rect_is_inverse_projected_into_layer_space() {
        let transform = Transform::from_scale(2.0, 2.0);
        let visible = calculate_visible_rect(
            Rect::new(0, 0, 10, 10),
            Rect::new(0, 0, 20, 20),
            &transform,
        );
        assert_eq!(visible, Rect::new(0, 0, 5, 5));
    }
}
