//! Builds the frame's render passes from the render-surface layer list.

use std::collections::HashMap;

use geometry::RectF;
use protocol::priority;
use render_protocol::{
    Color, DrawQuad, DrawQuadMaterial, LayerId, RenderPass, RenderPassId, ResourceId, SharedQuadState,
};
use resources::{PrioritizedResourceManager, ResourceError, ResourceProvider};

use crate::frame::Frame;
use crate::layer::LayerTree;
use crate::layer_iterator::{LayerIteratorPosition, front_to_back};
use crate::occlusion::{OcclusionQuery, OcclusionTracker};
use crate::output::Renderer;
use crate::quad::{AppendQuadsData, QuadCuller, append_layer_quads, append_surface_quads};
use crate::settings::{CompositorSettings, DebugState};

pub struct RenderPassInputs<'a> {
    pub tree: &'a LayerTree,
    pub provider: &'a ResourceProvider,
    pub settings: &'a CompositorSettings,
    pub debug_state: &'a DebugState,
    pub background_color: Color,
    pub has_transparent_background: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderPassesOutcome {
    /// False when a layer moved by an animation is missing tiles; the frame
    /// is built but should not be shown.
    pub draw_frame: bool,
    pub layers_drawn: usize,
    pub missing_tiles: usize,
}

fn render_pass_id_of(tree: &LayerTree, target: LayerId) -> RenderPassId {
    tree.get(target)
        .render_surface()
        .map(|surface| surface.render_pass_id())
        .unwrap_or_else(|| panic!("render target {target} has no render surface"))
}

/// Creates one pass per surface and fills them with quads, walking layers
/// front to back so occlusion can cull as it goes. Damage must already be
/// tracked for every surface.
pub fn calculate_render_passes(inputs: &RenderPassInputs<'_>, frame: &mut Frame) -> RenderPassesOutcome {
    let tree = inputs.tree;
    let _span = tracing::trace_span!(
        "calculate_render_passes",
        surfaces = frame.render_surface_layer_list.len()
    )
    .entered();

    for &owner in frame.render_surface_layer_list.clone().iter().rev() {
        let surface = tree
            .get(owner)
            .render_surface()
            .unwrap_or_else(|| panic!("surface list entry {owner} has no render surface"));
        frame.append_render_pass(RenderPass::new(
            surface.render_pass_id(),
            surface.content_rect(),
            surface.damage_tracker().current_damage_rect(),
            surface.screen_space_transform(),
        ));
    }

    let Some(&root) = frame.render_surface_layer_list.first() else {
        return RenderPassesOutcome {
            draw_frame: true,
            ..RenderPassesOutcome::default()
        };
    };
    let root_content_rect = tree
        .get(root)
        .render_surface()
        .map(|surface| surface.content_rect())
        .unwrap_or_default();
    let mut occlusion = OcclusionTracker::new(root_content_rect, inputs.settings.show_overdraw_in_tracing);
    occlusion.set_minimum_tracking_size(inputs.settings.minimum_occlusion_tracking_size);
    if inputs.debug_state.show_occluding_rects || inputs.debug_state.show_non_occluding_rects {
        occlusion.record_screen_space_rects();
    }
    let show_debug_borders = inputs.debug_state.show_debug_borders;

    let mut outcome = RenderPassesOutcome {
        draw_frame: true,
        ..RenderPassesOutcome::default()
    };
    for position in front_to_back(tree, &frame.render_surface_layer_list) {
        let target_pass_id = render_pass_id_of(tree, position.target());
        occlusion.enter_layer(tree, position);
        let mut data = AppendQuadsData::default();

        match position {
            LayerIteratorPosition::ContributingSurface { layer, .. } => {
                let target_pass = frame.render_pass_mut(target_pass_id);
                let mut culler = QuadCuller::new(target_pass, &mut occlusion, layer, show_debug_borders);
                append_surface_quads(tree, layer, false, inputs.provider, &mut culler, &mut data);
                if tree.get(layer).has_replica() {
                    append_surface_quads(tree, layer, true, inputs.provider, &mut culler, &mut data);
                }
            }
            LayerIteratorPosition::Itself { layer, target } => {
                let draw = tree.get(layer).draw_properties();
                if !draw.visible_content_rect.is_empty() {
                    let occluded = occlusion.occluded(
                        target,
                        &OcclusionQuery {
                            content_rect: draw.visible_content_rect,
                            draw_transform: draw.draw_transform,
                            is_clipped: draw.is_clipped,
                            clip_rect_in_target: draw.clip_rect,
                        },
                    );
                    if occluded.rect.is_empty() {
                        data.had_occlusion_from_outside_target_surface |=
                            occluded.has_occlusion_from_outside_target_surface;
                    } else {
                        frame.will_draw_layers.push(layer);
                        let target_pass = frame.render_pass_mut(target_pass_id);
                        let mut culler = QuadCuller::new(target_pass, &mut occlusion, target, show_debug_borders);
                        append_layer_quads(tree.get(layer), inputs.provider, &mut culler, &mut data);
                    }
                    outcome.layers_drawn += 1;
                }
            }
            LayerIteratorPosition::TargetSurface { .. } => {}
        }

        if data.had_occlusion_from_outside_target_surface {
            frame.render_pass_mut(target_pass_id).has_occlusion_from_outside_target_surface = true;
        }
        if data.num_missing_tiles > 0 {
            outcome.missing_tiles += data.num_missing_tiles;
            let draw = tree.get(position.layer()).draw_properties();
            if draw.screen_space_transform_is_animating || draw.draw_transform_is_animating {
                tracing::trace!(layer = %position.layer(), "animating layer is missing tiles");
                outcome.draw_frame = false;
            }
        }
        frame.contains_incomplete_tile |= data.had_incomplete_tile;

        occlusion.leave_layer(tree, position);
    }

    if !inputs.has_transparent_background {
        let root_pass_id = render_pass_id_of(tree, root);
        let root_pass = frame.render_pass_mut(root_pass_id);
        root_pass.has_transparent_background = false;
        append_quads_to_fill_screen(root_pass, tree, root, inputs.background_color, &occlusion);
    }

    if outcome.draw_frame {
        occlusion.overdraw_metrics().record_metrics();
    }
    if inputs.debug_state.show_occluding_rects {
        frame.occluding_screen_space_rects = occlusion.take_occluding_screen_space_rects();
    }
    if inputs.debug_state.show_non_occluding_rects {
        frame.non_occluding_screen_space_rects = occlusion.take_non_occluding_screen_space_rects();
    }
    outcome
}

/// Covers the screen area no opaque content reached with the background
/// colour. Quads bypass the culler.
fn append_quads_to_fill_screen(
    root_pass: &mut RenderPass,
    tree: &LayerTree,
    root: LayerId,
    background_color: Color,
    occlusion: &OcclusionTracker,
) {
    if background_color.alpha() == 0 {
        return;
    }
    let fill_region = occlusion.compute_visible_region_in_screen();
    if fill_region.is_empty() {
        return;
    }
    let root_layer = tree.get(root);
    let root_target_rect = root_layer
        .render_surface()
        .map(|surface| surface.content_rect())
        .unwrap_or_default();
    let shared_quad_state_index = root_pass.append_shared_quad_state(SharedQuadState {
        content_to_target_transform: root_layer.draw_properties().draw_transform,
        visible_content_rect: root_target_rect,
        clipped_rect_in_target: root_target_rect,
        clip_rect: root_target_rect,
        is_clipped: false,
        opacity: 1.0,
    });
    let Some(to_layer_space) = root_layer.draw_properties().screen_space_transform.inverse() else {
        tracing::warn!(layer = %root, "root screen-space transform is not invertible");
        return;
    };
    for rect in fill_region.rects() {
        let layer_rect = to_layer_space.map_rect(rect.to_f32()).to_enclosing_rect();
        root_pass.append_quad(DrawQuad::new(
            DrawQuadMaterial::SolidColor {
                color: background_color,
            },
            layer_rect,
            if background_color.is_opaque() {
                layer_rect
            } else {
                Default::default()
            },
            shared_quad_state_index,
        ));
    }
}

/// Decides which render-pass quads let their pass be dropped from the frame.
pub enum RenderPassCuller<'a> {
    /// Passes nothing draws into. Walks the list from the first pass.
    NoQuads,
    /// Passes whose texture is cached and whose contents did not change.
    /// Walks the list from the root pass.
    CachedTextures(&'a dyn Renderer),
}

impl RenderPassCuller<'_> {
    fn first(&self, len: usize) -> Option<usize> {
        match self {
            RenderPassCuller::NoQuads => (len > 0).then_some(0),
            RenderPassCuller::CachedTextures(_) => len.checked_sub(1),
        }
    }

    fn next(&self, index: usize, len: usize) -> Option<usize> {
        match self {
            RenderPassCuller::NoQuads => (index + 1 < len).then_some(index + 1),
            RenderPassCuller::CachedTextures(_) => index.checked_sub(1),
        }
    }

    fn should_remove_render_pass(
        &self,
        render_pass_id: RenderPassId,
        contents_changed_since_last_frame: RectF,
        frame: &Frame,
    ) -> bool {
        match self {
            RenderPassCuller::NoQuads => {
                let Some(pass) = frame.render_pass(render_pass_id) else {
                    return false;
                };
                pass.quads_back_to_front().all(|quad| {
                    quad.render_pass_id()
                        .is_some_and(|contributing| frame.render_pass(contributing).is_none())
                })
            }
            RenderPassCuller::CachedTextures(renderer) => {
                if !contents_changed_since_last_frame.is_empty() {
                    tracing::trace!(?render_pass_id, "pass has damage");
                    return false;
                }
                if !renderer.have_cached_resources_for_render_pass_id(render_pass_id) {
                    tracing::trace!(?render_pass_id, "pass has no cached texture");
                    return false;
                }
                tracing::trace!(?render_pass_id, "pass dropped for cached texture");
                true
            }
        }
    }
}

/// Drops every pass the culler rejects, along with the passes drawing into
/// it.
pub fn remove_render_passes(culler: RenderPassCuller<'_>, frame: &mut Frame) {
    let mut next = culler.first(frame.render_passes.len());
    while let Some(mut index) = next {
        let pass_id = frame.render_passes[index];
        let candidates: Vec<(RenderPassId, RectF)> = frame
            .render_pass(pass_id)
            .map(|pass| {
                pass.quads_back_to_front()
                    .filter_map(|quad| match &quad.material {
                        DrawQuadMaterial::RenderPass {
                            render_pass_id,
                            contents_changed_since_last_frame,
                            ..
                        } => Some((*render_pass_id, *contents_changed_since_last_frame)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (render_pass_id, contents_changed) in candidates {
            if !culler.should_remove_render_pass(render_pass_id, contents_changed, frame) {
                continue;
            }
            // Removed passes all precede `index`, so the distance from the
            // end stays valid.
            let position_from_end = frame.render_passes.len() - index;
            remove_render_passes_recursive(render_pass_id, frame);
            index = frame.render_passes.len() - position_from_end;
        }
        next = culler.next(index, frame.render_passes.len());
    }
}

fn remove_render_passes_recursive(render_pass_id: RenderPassId, frame: &mut Frame) {
    let mut pending = vec![render_pass_id];
    while let Some(id) = pending.pop() {
        // Already gone when both a surface and its replica referenced it.
        let Some(position) = frame.render_passes.iter().position(|pass| *pass == id) else {
            continue;
        };
        frame.render_passes.remove(position);
        let Some(removed) = frame.render_passes_by_id.remove(&id) else {
            continue;
        };
        let mut contributing: Vec<RenderPassId> = removed.contributing_pass_ids_back_to_front().collect();
        contributing.reverse();
        pending.extend(contributing);
    }
}

/// Textures backing the non-root passes, reserved in the texture budget at
/// render-surface priority and kept across frames.
#[derive(Debug, Default)]
pub struct RenderPassTextures {
    textures: HashMap<RenderPassId, ResourceId>,
}

impl RenderPassTextures {
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn texture(&self, id: RenderPassId) -> Option<ResourceId> {
        self.textures.get(&id).copied()
    }

    pub fn owns(&self, texture: ResourceId) -> bool {
        self.textures.values().any(|owned| *owned == texture)
    }

    /// Releases textures of passes no longer in the frame and backs every
    /// other non-root pass. Fails when the budget cannot hold them.
    pub fn reserve(&mut self, manager: &mut PrioritizedResourceManager, frame: &Frame) -> Result<(), ResourceError> {
        let root = frame.render_passes.last().copied();
        self.textures.retain(|id, texture| {
            let keep = Some(*id) != root && frame.render_passes_by_id.contains_key(id);
            if !keep {
                manager.delete_texture(*texture);
            }
            keep
        });
        for id in &frame.render_passes {
            if Some(*id) == root {
                continue;
            }
            let Some(pass) = frame.render_pass(*id) else {
                continue;
            };
            let size = pass.output_rect.size();
            let texture = match self.textures.get(id) {
                Some(&texture) if manager.size(texture) == Some(size) => texture,
                existing => {
                    if let Some(&stale) = existing {
                        manager.delete_texture(stale);
                    }
                    let texture = manager.create_texture(size, priority::RENDER_SURFACE);
                    self.textures.insert(*id, texture);
                    texture
                }
            };
            manager.acquire_backing(texture)?;
        }
        Ok(())
    }

    pub fn clear(&mut self, manager: &mut PrioritizedResourceManager) {
        for (_, texture) in self.textures.drain() {
            manager.delete_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use geometry::{Rect, Transform};

    use super::*;

    fn pass_quad(pass: &mut RenderPass, contributing: RenderPassId, changed: RectF) {
        let index = pass.append_shared_quad_state(SharedQuadState::default());
        pass.append_quad(DrawQuad::new(
            DrawQuadMaterial::RenderPass {
                render_pass_id: contributing,
                is_replica: false,
                mask_resource_id: None,
                contents_changed_since_last_frame: changed,
                filters: Default::default(),
                background_filters: Default::default(),
            },
            Rect::new(0, 0, 10, 10),
            Rect::default(),
            index,
        ));
    }

    fn solid_quad(pass: &mut RenderPass) {
        let index = pass.append_shared_quad_state(SharedQuadState::default());
        pass.append_quad(DrawQuad::new(
            DrawQuadMaterial::SolidColor { color: Color::BLACK },
            Rect::new(0, 0, 10, 10),
            Rect::default(),
            index,
        ));
    }

    fn id(layer: u64) -> RenderPassId {
        RenderPassId::new(LayerId(layer), 0)
    }

    fn new_pass(layer: u64) -> RenderPass {
        RenderPass::new(id(layer), Rect::new(0, 0, 10, 10), RectF::default(), Transform::identity())
    }

    #[test]
    fn empty_passes_are_removed_recursively() {
        let mut frame = Frame::new();
        // 3 draws nothing but pass 2, 2 draws nothing at all.
        frame.append_render_pass(new_pass(2));
        let mut middle = new_pass(3);
        pass_quad(&mut middle, id(2), RectF::default());
        frame.append_render_pass(middle);
        let mut root = new_pass(1);
        pass_quad(&mut root, id(3), RectF::default());
        solid_quad(&mut root);
        frame.append_render_pass(root);

        remove_render_passes(RenderPassCuller::NoQuads, &mut frame);

        assert_eq!(frame.render_passes, vec![id(1)]);
        assert_eq!(frame.render_passes_by_id.len(), 1);
    }

    #[test]
    fn removing_an_already_removed_pass_is_a_no_op() {
        let mut frame = Frame::new();
        frame.append_render_pass(new_pass(2));
        let mut root = new_pass(1);
        // Surface and replica quads share the pass id.
        pass_quad(&mut root, id(2), RectF::default());
        pass_quad(&mut root, id(2), RectF::default());
        frame.append_render_pass(root);

        remove_render_passes(RenderPassCuller::NoQuads, &mut frame);
        assert_eq!(frame.render_passes, vec![id(1)]);
        remove_render_passes_recursive(id(2), &mut frame);
        assert_eq!(frame.render_passes, vec![id(1)]);
    }

    #[test]
    fn textures_are_reserved_for_non_root_passes() {
        let mut frame = Frame::new();
        frame.append_render_pass(new_pass(2));
        frame.append_render_pass(new_pass(1));
        let mut manager = PrioritizedResourceManager::new(1024);
        let mut textures = RenderPassTextures::default();

        textures.reserve(&mut manager, &frame).expect("fits the budget");
        assert_eq!(textures.len(), 1);
        let texture = textures.texture(id(2)).expect("texture for the child pass");
        assert!(manager.has_backing(texture));
        assert_eq!(manager.memory_use_bytes(), 400);

        let mut tiny = PrioritizedResourceManager::new(100);
        let mut starved = RenderPassTextures::default();
        assert!(matches!(
            starved.reserve(&mut tiny, &frame),
            Err(ResourceError::OutOfMemory { .. })
        ));

        textures.clear(&mut manager);
        assert_eq!(manager.resource_count(), 0);
    }
}
