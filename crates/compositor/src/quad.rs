//! Quads for layers and surfaces, and the culler they pass through on the way
//! into a render pass.

use geometry::{Rect, RectF};
use render_protocol::{Color, DrawQuad, DrawQuadMaterial, LayerId, RenderPass, ResourceId, SharedQuadState};
use resources::ResourceProvider;

use crate::layer::{Layer, LayerContent, LayerTree, TileState};
use crate::occlusion::{OcclusionQuery, OcclusionTracker};

/// Solid-colour layers are split into quads of this size so that occlusion
/// can drop the hidden ones.
pub const SOLID_COLOR_QUAD_SIZE: i32 = 256;

pub const DEFAULT_CHECKERBOARD_COLOR: Color = Color::from_argb(255, 241, 241, 241);

pub const CONTENT_LAYER_BORDER_COLOR: Color = Color::from_argb(128, 0, 128, 32);
pub const TILED_LAYER_BORDER_COLOR: Color = Color::from_argb(128, 255, 128, 0);
pub const SURFACE_BORDER_COLOR: Color = Color::from_argb(100, 0, 0, 255);
pub const SURFACE_REPLICA_BORDER_COLOR: Color = Color::from_argb(100, 160, 0, 255);
pub const CULLED_TILE_BORDER_COLOR: Color = Color::from_argb(120, 160, 160, 160);
pub const DEBUG_BORDER_WIDTH: i32 = 2;
pub const CULLED_TILE_BORDER_WIDTH: i32 = 1;

/// Side results of appending one layer's quads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendQuadsData {
    pub had_occlusion_from_outside_target_surface: bool,
    pub num_missing_tiles: usize,
    pub had_incomplete_tile: bool,
}

/// Sink that drops or trims quads hidden by content already in front of
/// them.
pub struct QuadCuller<'a> {
    render_pass: &'a mut RenderPass,
    occlusion: &'a mut OcclusionTracker,
    render_target: LayerId,
    create_debug_border_quads: bool,
}

impl<'a> QuadCuller<'a> {
    pub fn new(
        render_pass: &'a mut RenderPass,
        occlusion: &'a mut OcclusionTracker,
        render_target: LayerId,
        create_debug_border_quads: bool,
    ) -> Self {
        Self {
            render_pass,
            occlusion,
            render_target,
            create_debug_border_quads,
        }
    }

    pub fn use_shared_quad_state(&mut self, state: SharedQuadState) -> usize {
        self.render_pass.append_shared_quad_state(state)
    }

    /// Appends a layer quad trimmed to its unoccluded part. Returns false
    /// when the quad was fully hidden.
    pub fn append(&mut self, quad: DrawQuad, data: &mut AppendQuadsData) -> bool {
        let state = self.render_pass.shared_quad_state(&quad);
        let unoccluded = self.occlusion.unoccluded_content_rect(
            self.render_target,
            &OcclusionQuery {
                content_rect: quad.rect,
                draw_transform: state.content_to_target_transform,
                is_clipped: state.is_clipped,
                clip_rect_in_target: state.clip_rect,
            },
        );
        data.had_occlusion_from_outside_target_surface |= unoccluded.has_occlusion_from_outside_target_surface;
        self.append_internal(quad, unoccluded.rect)
    }

    /// Appends the quad compositing `owner`'s surface (or its replica) into
    /// the parent target. Only occlusion from outside the surface applies.
    pub fn append_surface(
        &mut self,
        tree: &LayerTree,
        owner: LayerId,
        for_replica: bool,
        quad: DrawQuad,
        data: &mut AppendQuadsData,
    ) -> bool {
        let unoccluded = self
            .occlusion
            .unoccluded_contributing_surface_content_rect(tree, owner, for_replica, quad.rect);
        data.had_occlusion_from_outside_target_surface |= unoccluded.has_occlusion_from_outside_target_surface;
        self.append_internal(quad, unoccluded.rect)
    }

    fn append_internal(&mut self, mut quad: DrawQuad, culled_rect: Rect) -> bool {
        let keep_quad = !culled_rect.is_empty();
        if keep_quad {
            quad.visible_rect = culled_rect;
        }

        let state = self.render_pass.shared_quad_state(&quad);
        let transform = state.content_to_target_transform;
        let opaque_draw_rect = if state.opacity == 1.0 {
            quad.opaque_rect
        } else {
            Rect::default()
        };
        let metrics = self.occlusion.overdraw_metrics_mut();
        metrics.did_cull_for_drawing(&transform, quad.rect, culled_rect);
        metrics.did_draw(&transform, culled_rect, opaque_draw_rect);

        if !keep_quad {
            return false;
        }
        if self.create_debug_border_quads && !quad.is_debug_quad() && quad.visible_rect != quad.rect {
            self.render_pass.append_quad(DrawQuad::new(
                DrawQuadMaterial::DebugBorder {
                    color: CULLED_TILE_BORDER_COLOR,
                    width: CULLED_TILE_BORDER_WIDTH,
                },
                quad.visible_rect,
                Rect::default(),
                quad.shared_quad_state_index,
            ));
        }
        self.render_pass.append_quad(quad);
        true
    }
}

fn layer_shared_quad_state(layer: &Layer) -> SharedQuadState {
    let draw = layer.draw_properties();
    SharedQuadState {
        content_to_target_transform: draw.draw_transform,
        visible_content_rect: draw.visible_content_rect,
        clipped_rect_in_target: draw.drawable_content_rect,
        clip_rect: draw.clip_rect,
        is_clipped: draw.is_clipped,
        opacity: draw.opacity,
    }
}

/// Appends the quads a layer draws for itself into its target's pass.
pub fn append_layer_quads(
    layer: &Layer,
    provider: &ResourceProvider,
    culler: &mut QuadCuller<'_>,
    data: &mut AppendQuadsData,
) {
    let shared_quad_state_index = culler.use_shared_quad_state(layer_shared_quad_state(layer));
    let content_rect = Rect::from_size(layer.content_bounds());

    if culler.create_debug_border_quads {
        let color = match layer.content() {
            LayerContent::Tiled(_) => TILED_LAYER_BORDER_COLOR,
            LayerContent::None | LayerContent::SolidColor => CONTENT_LAYER_BORDER_COLOR,
        };
        culler.append(
            DrawQuad::new(
                DrawQuadMaterial::DebugBorder {
                    color,
                    width: DEBUG_BORDER_WIDTH,
                },
                content_rect,
                Rect::default(),
                shared_quad_state_index,
            ),
            data,
        );
    }

    match layer.content() {
        LayerContent::None => {}
        LayerContent::SolidColor => {
            let color = layer.background_color();
            let mut y = 0;
            while y < content_rect.height {
                let mut x = 0;
                while x < content_rect.width {
                    let rect = Rect::new(
                        x,
                        y,
                        SOLID_COLOR_QUAD_SIZE.min(content_rect.width - x),
                        SOLID_COLOR_QUAD_SIZE.min(content_rect.height - y),
                    );
                    let opaque_rect = if color.is_opaque() { rect } else { Rect::default() };
                    culler.append(
                        DrawQuad::new(
                            DrawQuadMaterial::SolidColor { color },
                            rect,
                            opaque_rect,
                            shared_quad_state_index,
                        ),
                        data,
                    );
                    x += SOLID_COLOR_QUAD_SIZE;
                }
                y += SOLID_COLOR_QUAD_SIZE;
            }
        }
        LayerContent::Tiled(tiled) => {
            let visible = layer.draw_properties().visible_content_rect.intersect(&content_rect);
            for index in tiled.tile_indices_covering(visible) {
                let tile_rect = tiled.tile_bounds(index).intersect(&visible);
                if tile_rect.is_empty() {
                    continue;
                }
                let state = tiled.tile_state(index, provider);
                let resource = tiled.tile(index).and_then(|tile| tile.resource());
                let quad = match (state, resource) {
                    (TileState::Ready, Some(resource_id)) => {
                        let opaque_rect = if layer.contents_opaque() {
                            tile_rect
                        } else {
                            Rect::default()
                        };
                        DrawQuad::new(
                            DrawQuadMaterial::Tile { resource_id },
                            tile_rect,
                            opaque_rect,
                            shared_quad_state_index,
                        )
                    }
                    (state, _) => {
                        data.num_missing_tiles += 1;
                        data.had_incomplete_tile |= state == TileState::Uploading;
                        DrawQuad::new(
                            DrawQuadMaterial::Checkerboard {
                                color: DEFAULT_CHECKERBOARD_COLOR,
                            },
                            tile_rect,
                            Rect::default(),
                            shared_quad_state_index,
                        )
                    }
                };
                culler.append(quad, data);
            }
        }
    }
}

/// Resource of a mask layer's contents, if it has a ready one.
fn mask_resource(tree: &LayerTree, mask: Option<LayerId>, provider: &ResourceProvider) -> Option<ResourceId> {
    let mask = tree.get(mask?);
    if !mask.draws_content() || mask.bounds().is_empty() {
        return None;
    }
    let LayerContent::Tiled(tiled) = mask.content() else {
        return None;
    };
    match tiled.tile_state((0, 0), provider) {
        TileState::Ready => tiled.tile((0, 0)).and_then(|tile| tile.resource()),
        TileState::Missing | TileState::Uploading => None,
    }
}

fn usable_mask(tree: &LayerTree, mask: Option<LayerId>) -> Option<LayerId> {
    mask.filter(|&id| {
        let layer = tree.get(id);
        layer.draws_content() && !layer.bounds().is_empty()
    })
}

/// Appends the render-pass quad that composites `owner`'s surface into its
/// parent target, or the replica's quad when `for_replica` is set.
pub fn append_surface_quads(
    tree: &LayerTree,
    owner: LayerId,
    for_replica: bool,
    provider: &ResourceProvider,
    culler: &mut QuadCuller<'_>,
    data: &mut AppendQuadsData,
) {
    let layer = tree.get(owner);
    let surface = layer
        .render_surface()
        .unwrap_or_else(|| panic!("contributing surface {owner} has no render surface"));
    debug_assert!(!for_replica || layer.has_replica());

    let draw_transform = if for_replica {
        surface.replica_draw_transform()
    } else {
        surface.draw_transform()
    };
    let content_rect = surface.content_rect();
    let shared_quad_state_index = culler.use_shared_quad_state(SharedQuadState {
        content_to_target_transform: draw_transform,
        visible_content_rect: content_rect,
        clipped_rect_in_target: draw_transform.map_rect(content_rect.to_f32()).to_enclosing_rect(),
        clip_rect: surface.clip_rect(),
        is_clipped: surface.is_clipped(),
        opacity: surface.draw_opacity(),
    });

    if culler.create_debug_border_quads {
        let color = if for_replica {
            SURFACE_REPLICA_BORDER_COLOR
        } else {
            SURFACE_BORDER_COLOR
        };
        culler.append(
            DrawQuad::new(
                DrawQuadMaterial::DebugBorder {
                    color,
                    width: DEBUG_BORDER_WIDTH,
                },
                content_rect,
                Rect::default(),
                shared_quad_state_index,
            ),
            data,
        );
    }

    // A replica gets its own mask only when the surface has none.
    let mut mask = usable_mask(tree, layer.mask_layer());
    if mask.is_none() && for_replica {
        let replica_mask = layer
            .replica_layer()
            .and_then(|replica| tree.get(replica).mask_layer());
        mask = usable_mask(tree, replica_mask);
    }
    let contents_changed_since_last_frame = if surface.damage_tracker().current_damage_rect().is_empty() {
        RectF::default()
    } else {
        content_rect.to_f32()
    };

    let quad = DrawQuad::new(
        DrawQuadMaterial::RenderPass {
            render_pass_id: surface.render_pass_id(),
            is_replica: for_replica,
            mask_resource_id: mask_resource(tree, mask, provider),
            contents_changed_since_last_frame,
            filters: layer.filters().clone(),
            background_filters: layer.background_filters().clone(),
        },
        content_rect,
        Rect::default(),
        shared_quad_state_index,
    );
    culler.append_surface(tree, owner, for_replica, quad, data);
}

#[cfg(test)]
mod tests {
    use geometry::{Size, Transform};
    use render_protocol::RenderPassId;

    use super::*;
    use crate::draw_properties::{DrawPropertiesInputs, calculate_draw_properties};
    use crate::layer::TiledContent;
    use crate::layer_iterator::LayerIteratorPosition;

    fn pass() -> RenderPass {
        RenderPass::new(
            RenderPassId::new(LayerId(1), 0),
            Rect::new(0, 0, 600, 600),
            RectF::default(),
            Transform::identity(),
        )
    }

    fn single_layer_tree(layer: Layer) -> (LayerTree, LayerId, LayerId) {
        let mut tree = LayerTree::new();
        let root = tree.insert(Layer::new(LayerId(1)));
        let child = tree.insert(layer);
        tree.add_child(root, child);
        tree.set_root(Some(root));
        calculate_draw_properties(
            &mut tree,
            DrawPropertiesInputs {
                root,
                device_viewport_size: Size::new(600, 600),
                device_scale_factor: 1.0,
                max_texture_size: 4096,
            },
        );
        (tree, root, child)
    }

    #[test]
    fn solid_color_layer_is_split_into_quads() {
        let (tree, root, child) =
            single_layer_tree(Layer::solid_color(LayerId(2), Size::new(300, 100), Color::WHITE));
        let mut pass = pass();
        let mut occlusion = OcclusionTracker::new(Rect::new(0, 0, 600, 600), false);
        occlusion.enter_layer(&tree, LayerIteratorPosition::Itself { layer: child, target: root });
        let mut data = AppendQuadsData::default();
        let provider = ResourceProvider::new(4);
        append_layer_quads(
            tree.get(child),
            &provider,
            &mut QuadCuller::new(&mut pass, &mut occlusion, root, false),
            &mut data,
        );

        let rects: Vec<Rect> = pass.quad_list.iter().map(|quad| quad.rect).collect();
        assert_eq!(rects, vec![Rect::new(0, 0, 256, 100), Rect::new(256, 0, 44, 100)]);
        assert!(pass.validate().is_ok());
        assert_eq!(data, AppendQuadsData::default());
    }

    #[test]
    fn missing_tiles_become_checkerboard() {
        let content = TiledContent::new(Size::new(50, 50), Color::WHITE);
        let (tree, root, child) = single_layer_tree(Layer::tiled(LayerId(2), Size::new(100, 50), content));
        let mut pass = pass();
        let mut occlusion = OcclusionTracker::new(Rect::new(0, 0, 600, 600), false);
        occlusion.enter_layer(&tree, LayerIteratorPosition::Itself { layer: child, target: root });
        let mut data = AppendQuadsData::default();
        let provider = ResourceProvider::new(4);
        append_layer_quads(
            tree.get(child),
            &provider,
            &mut QuadCuller::new(&mut pass, &mut occlusion, root, false),
            &mut data,
        );

        assert_eq!(data.num_missing_tiles, 2);
        assert!(pass.quad_list.iter().all(|quad| matches!(
            quad.material,
            DrawQuadMaterial::Checkerboard { color } if color == DEFAULT_CHECKERBOARD_COLOR
        )));
    }

    #[test]
    fn occluded_quads_are_dropped_and_trimmed_ones_get_a_border() {
        let (tree, root, child) =
            single_layer_tree(Layer::solid_color(LayerId(2), Size::new(300, 100), Color::WHITE));
        let mut pass = pass();
        let mut occlusion = OcclusionTracker::new(Rect::new(0, 0, 600, 600), false);
        let position = LayerIteratorPosition::Itself { layer: child, target: root };
        // The layer occludes itself once it has been left.
        occlusion.enter_layer(&tree, position);
        occlusion.leave_layer(&tree, position);
        let mut culler = QuadCuller::new(&mut pass, &mut occlusion, root, true);
        let index = culler.use_shared_quad_state(SharedQuadState::default());
        let mut data = AppendQuadsData::default();

        let hidden = DrawQuad::new(
            DrawQuadMaterial::SolidColor { color: Color::BLACK },
            Rect::new(0, 0, 50, 50),
            Rect::default(),
            index,
        );
        assert!(!culler.append(hidden, &mut data));
        let partial = DrawQuad::new(
            DrawQuadMaterial::SolidColor { color: Color::BLACK },
            Rect::new(250, 0, 100, 50),
            Rect::default(),
            index,
        );
        assert!(culler.append(partial, &mut data));

        assert_eq!(pass.quad_list.len(), 2);
        assert!(pass.quad_list[0].is_debug_quad());
        assert_eq!(pass.quad_list[1].visible_rect, Rect::new(300, 0, 50, 50));
    }
}
