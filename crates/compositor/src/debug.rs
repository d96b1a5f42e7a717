//! Debug overlays and textual dumps of the layer tree.

use std::fmt::Write as _;

use geometry::{Rect, RectF, Transform};
use render_protocol::LayerId;
use serde::Serialize;
use serde_json::{Value, json};

use crate::layer::{Layer, LayerContent, LayerTree};
use crate::settings::DebugState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DebugRectType {
    PaintRect,
    PropertyChangedRect,
    SurfaceDamageRect,
    ScreenSpaceRect,
    ReplicaScreenSpaceRect,
    OccludingRect,
    NonOccludingRect,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DebugRect {
    pub kind: DebugRectType,
    pub rect: RectF,
}

/// Screen-space rects of the last drawn frame, kept for the overlay.
#[derive(Debug, Clone, Default)]
pub struct DebugRectHistory {
    debug_rects: Vec<DebugRect>,
}

impl DebugRectHistory {
    pub fn debug_rects(&self) -> &[DebugRect] {
        &self.debug_rects
    }

    pub fn save_debug_rects_for_current_frame(
        &mut self,
        tree: &LayerTree,
        render_surface_layer_list: &[LayerId],
        occluding_screen_space_rects: &[Rect],
        non_occluding_screen_space_rects: &[Rect],
        debug_state: &DebugState,
    ) {
        self.debug_rects.clear();
        let Some(root) = tree.root() else {
            return;
        };
        if debug_state.show_paint_rects {
            self.save_paint_rects(tree, root);
        }
        if debug_state.show_property_changed_rects {
            self.save_property_changed_rects(tree, render_surface_layer_list);
        }
        if debug_state.show_surface_damage_rects {
            self.save_surface_damage_rects(tree, render_surface_layer_list);
        }
        if debug_state.show_screen_space_rects {
            self.save_screen_space_rects(tree, render_surface_layer_list);
        }
        if debug_state.show_occluding_rects {
            self.push_all(DebugRectType::OccludingRect, occluding_screen_space_rects);
        }
        if debug_state.show_non_occluding_rects {
            self.push_all(DebugRectType::NonOccludingRect, non_occluding_screen_space_rects);
        }
    }

    fn push(&mut self, kind: DebugRectType, rect: RectF) {
        self.debug_rects.push(DebugRect { kind, rect });
    }

    fn push_all(&mut self, kind: DebugRectType, rects: &[Rect]) {
        for rect in rects {
            self.push(kind, rect.to_f32());
        }
    }

    fn save_paint_rects(&mut self, tree: &LayerTree, root: LayerId) {
        for id in tree.subtree_with_attachments(root) {
            let layer = tree.get(id);
            if layer.update_rect().is_empty() || !layer.draws_content() {
                continue;
            }
            let screen_space = layer.draw_properties().screen_space_transform;
            self.push(DebugRectType::PaintRect, screen_space.map_rect(layer.update_rect()));
        }
    }

    fn save_property_changed_rects(&mut self, tree: &LayerTree, render_surface_layer_list: &[LayerId]) {
        for &target in render_surface_layer_list {
            let Some(surface) = tree.get(target).render_surface() else {
                continue;
            };
            for &id in surface.layer_list() {
                let layer = tree.get(id);
                if id != target && layer.render_surface().is_some() {
                    continue;
                }
                if !tree.layer_property_changed(id) {
                    continue;
                }
                let bounds = Rect::from_size(layer.content_bounds()).to_f32();
                self.push(
                    DebugRectType::PropertyChangedRect,
                    layer.draw_properties().screen_space_transform.map_rect(bounds),
                );
            }
        }
    }

    fn save_surface_damage_rects(&mut self, tree: &LayerTree, render_surface_layer_list: &[LayerId]) {
        for &target in render_surface_layer_list {
            let Some(surface) = tree.get(target).render_surface() else {
                continue;
            };
            let damage = surface.damage_tracker().current_damage_rect();
            self.push(
                DebugRectType::SurfaceDamageRect,
                surface.screen_space_transform().map_rect(damage),
            );
        }
    }

    fn save_screen_space_rects(&mut self, tree: &LayerTree, render_surface_layer_list: &[LayerId]) {
        for &target in render_surface_layer_list {
            let layer = tree.get(target);
            let Some(surface) = layer.render_surface() else {
                continue;
            };
            let content_rect = surface.content_rect().to_f32();
            self.push(
                DebugRectType::ScreenSpaceRect,
                surface.screen_space_transform().map_rect(content_rect),
            );
            if layer.has_replica() {
                self.push(
                    DebugRectType::ReplicaScreenSpaceRect,
                    surface.replica_screen_space_transform().map_rect(content_rect),
                );
            }
        }
    }
}

fn layer_type_name(layer: &Layer) -> &'static str {
    match layer.content() {
        LayerContent::None => "Layer",
        LayerContent::SolidColor => "SolidColorLayer",
        LayerContent::Tiled(_) => "TiledLayer",
    }
}

fn write_transform(out: &mut String, indent: &str, label: &str, transform: &Transform) {
    let rows = transform.to_matrix3x3();
    let _ = writeln!(
        out,
        "{indent}{label}: {:.2}, {:.2}, {:.2} // {:.2}, {:.2}, {:.2}",
        rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2]
    );
}

fn dump_layer(out: &mut String, tree: &LayerTree, id: LayerId, depth: usize) {
    let layer = tree.get(id);
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{indent}{}({})", layer_type_name(layer), layer.debug_name());
    let properties = "  ".repeat(depth + 1);
    let bounds = layer.bounds();
    let position = layer.position();
    let _ = writeln!(out, "{properties}layer_id: {}", layer.id().0);
    let _ = writeln!(out, "{properties}bounds: {}, {} pixels", bounds.width, bounds.height);
    let _ = writeln!(out, "{properties}opacity: {:.2}", layer.opacity());
    let _ = writeln!(out, "{properties}contents_opaque: {}", layer.contents_opaque());
    let _ = writeln!(out, "{properties}scrollable: {}", layer.scrollable());
    let _ = writeln!(out, "{properties}position: {:.2}, {:.2}", position.x, position.y);
    write_transform(out, &properties, "draw_transform", &layer.draw_properties().draw_transform);
    let visible = layer.draw_properties().visible_content_rect;
    let _ = writeln!(
        out,
        "{properties}visible_content_rect: ({}, {}, {}, {})",
        visible.x, visible.y, visible.width, visible.height
    );
    if let Some(mask) = layer.mask_layer() {
        let _ = writeln!(out, "{properties}mask layer:");
        dump_layer(out, tree, mask, depth + 2);
    }
    if let Some(replica) = layer.replica_layer() {
        let _ = writeln!(out, "{properties}replica layer:");
        dump_layer(out, tree, replica, depth + 2);
    }
    for &child in layer.children() {
        dump_layer(out, tree, child, depth + 1);
    }
}

fn dump_render_surfaces(out: &mut String, tree: &LayerTree, id: LayerId) {
    let layer = tree.get(id);
    if let Some(surface) = layer.render_surface() {
        let content = surface.content_rect();
        let damage = surface.damage_tracker().current_damage_rect();
        let _ = writeln!(out, " RenderSurface(owner: {})", surface.owner());
        let _ = writeln!(
            out,
            "   content_rect: ({}, {}, {}, {})",
            content.x, content.y, content.width, content.height
        );
        write_transform(out, "   ", "draw_transform", &surface.draw_transform());
        let _ = writeln!(
            out,
            "   current damage rect is: {:.2}, {:.2}, {:.2}, {:.2}",
            damage.x, damage.y, damage.width, damage.height
        );
    }
    for &child in layer.children() {
        dump_render_surfaces(out, tree, child);
    }
}

/// Human-readable dump of the tree followed by its render surfaces.
pub fn layer_tree_as_text(tree: &LayerTree) -> String {
    let mut out = String::new();
    let Some(root) = tree.root() else {
        return out;
    };
    dump_layer(&mut out, tree, root, 0);
    out.push_str("RenderSurfaces:\n");
    dump_render_surfaces(&mut out, tree, root);
    out
}

fn layer_as_json(tree: &LayerTree, id: LayerId) -> Value {
    let layer = tree.get(id);
    let bounds = layer.bounds();
    let children: Vec<Value> = layer
        .children()
        .iter()
        .map(|&child| layer_as_json(tree, child))
        .collect();
    json!({
        "LayerType": layer_type_name(layer),
        "LayerId": layer.id().0,
        "Bounds": [bounds.width, bounds.height],
        "Opacity": layer.opacity(),
        "DrawsContent": layer.draws_content(),
        "DrawTransform": layer.draw_properties().draw_transform.to_matrix3x3(),
        "Children": children,
    })
}

/// Pretty-printed JSON of the tree. Empty object when there is no root.
pub fn layer_tree_as_json(tree: &LayerTree) -> String {
    let value = match tree.root() {
        Some(root) => layer_as_json(tree, root),
        None => json!({}),
    };
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use geometry::Size;
    use render_protocol::Color;

    use super::*;
    use crate::draw_properties::{DrawPropertiesInputs, calculate_draw_properties};

    fn tree() -> (LayerTree, Vec<LayerId>) {
        let mut tree = LayerTree::new();
        let root = tree.insert(Layer::new(LayerId(1)));
        let mut child = Layer::solid_color(LayerId(2), Size::new(10, 20), Color::WHITE);
        child.set_debug_name("child");
        let child = tree.insert(child);
        tree.add_child(root, child);
        tree.set_root(Some(root));
        let list = calculate_draw_properties(
            &mut tree,
            DrawPropertiesInputs {
                root,
                device_viewport_size: Size::new(100, 100),
                device_scale_factor: 1.0,
                max_texture_size: 4096,
            },
        );
        (tree, list)
    }

    #[test]
    fn text_dump_lists_layers_then_surfaces() {
        let (tree, _) = tree();
        let text = layer_tree_as_text(&tree);
        assert!(text.starts_with("Layer()\n"));
        assert!(text.contains("  SolidColorLayer(child)\n"));
        assert!(text.contains("    bounds: 10, 20 pixels\n"));
        assert!(text.contains("RenderSurfaces:\n RenderSurface(owner: layer#1)\n"));
        assert_eq!(layer_tree_as_text(&LayerTree::new()), "");
    }

    #[test]
    fn json_dump_nests_children() {
        let (tree, _) = tree();
        let value: Value = serde_json::from_str(&layer_tree_as_json(&tree)).expect("valid json");
        assert_eq!(value["LayerId"], 1);
        assert_eq!(value["Children"][0]["Bounds"], json!([10, 20]));
        assert_eq!(value["Children"][0]["LayerType"], "SolidColorLayer");
    }

    #[test]
    fn screen_space_rects_follow_debug_state() {
        let (tree, list) = tree();
        let mut history = DebugRectHistory::default();
        let debug_state = DebugState {
            show_screen_space_rects: true,
            show_occluding_rects: true,
            ..DebugState::default()
        };
        history.save_debug_rects_for_current_frame(&tree, &list, &[Rect::new(0, 0, 10, 20)], &[], &debug_state);

        assert_eq!(
            history.debug_rects(),
            &[
                DebugRect {
                    kind: DebugRectType::ScreenSpaceRect,
                    rect: RectF::new(0.0, 0.0, 100.0, 100.0),
                },
                DebugRect {
                    kind: DebugRectType::OccludingRect,
                    rect: RectF::new(0.0, 0.0, 10.0, 20.0),
                },
            ]
        );
    }
}
