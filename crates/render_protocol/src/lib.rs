//! Data model handed from the frame builder to a renderer.
//!
//! A frame is an ordered list of [`RenderPass`]es. Each pass owns its
//! [`SharedQuadState`]s and [`DrawQuad`]s. Quads are stored front-to-back in the
//! order the builder appends them; renderers paint them back-to-front.

use std::collections::HashMap;
use std::fmt;

use geometry::{Rect, RectF, Transform};
use serde::{Deserialize, Serialize};

mod filters;

pub use filters::{FilterOperation, FilterOperations, FilterOutsets};

slotmap::new_key_type! {
    pub struct ResourceId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "layer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RenderPassId {
    pub layer_id: LayerId,
    pub index: u32,
}

impl RenderPassId {
    pub const fn new(layer_id: LayerId, index: u32) -> Self {
        Self { layer_id, index }
    }
}

/// Packed `0xAARRGGBB` colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub const TRANSPARENT: Color = Color(0x0000_0000);
    pub const BLACK: Color = Color(0xFF00_0000);
    pub const WHITE: Color = Color(0xFFFF_FFFF);

    pub const fn from_argb(alpha: u8, red: u8, green: u8, blue: u8) -> Self {
        Color(
            ((alpha as u32) << 24) | ((red as u32) << 16) | ((green as u32) << 8) | (blue as u32),
        )
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }

    pub const fn is_opaque(self) -> bool {
        self.alpha() == 0xFF
    }
}

/// Per-layer state shared by every quad the layer appends to a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedQuadState {
    pub content_to_target_transform: Transform,
    pub visible_content_rect: Rect,
    pub clipped_rect_in_target: Rect,
    pub clip_rect: Rect,
    pub is_clipped: bool,
    pub opacity: f32,
}

impl Default for SharedQuadState {
    fn default() -> Self {
        Self {
            content_to_target_transform: Transform::identity(),
            visible_content_rect: Rect::default(),
            clipped_rect_in_target: Rect::default(),
            clip_rect: Rect::default(),
            is_clipped: false,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawQuadMaterial {
    SolidColor {
        color: Color,
    },
    Tile {
        resource_id: ResourceId,
    },
    Checkerboard {
        color: Color,
    },
    RenderPass {
        render_pass_id: RenderPassId,
        is_replica: bool,
        mask_resource_id: Option<ResourceId>,
        contents_changed_since_last_frame: RectF,
        filters: FilterOperations,
        background_filters: FilterOperations,
    },
    DebugBorder {
        color: Color,
        width: i32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawQuad {
    pub material: DrawQuadMaterial,
    pub rect: Rect,
    pub opaque_rect: Rect,
    pub visible_rect: Rect,
    pub needs_blending: bool,
    pub shared_quad_state_index: usize,
}

impl DrawQuad {
    pub fn new(
        material: DrawQuadMaterial,
        rect: Rect,
        opaque_rect: Rect,
        shared_quad_state_index: usize,
    ) -> Self {
        Self {
            material,
            rect,
            opaque_rect,
            visible_rect: rect,
            needs_blending: false,
            shared_quad_state_index,
        }
    }

    /// Id of the pass this quad composites, if it is a render-pass quad.
    pub fn render_pass_id(&self) -> Option<RenderPassId> {
        match &self.material {
            DrawQuadMaterial::RenderPass { render_pass_id, .. } => Some(*render_pass_id),
            _ => None,
        }
    }

    pub fn is_debug_quad(&self) -> bool {
        matches!(self.material, DrawQuadMaterial::DebugBorder { .. })
    }

    pub fn is_render_pass_quad(&self) -> bool {
        matches!(self.material, DrawQuadMaterial::RenderPass { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPassValidationReason {
    SharedQuadStateOutOfRange {
        quad_index: usize,
        shared_quad_state_index: usize,
    },
    SharedQuadStateOrderViolated {
        quad_index: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassValidationError {
    pub render_pass_id: RenderPassId,
    pub reason: RenderPassValidationReason,
}

impl fmt::Display for RenderPassValidationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            RenderPassValidationReason::SharedQuadStateOutOfRange {
                quad_index,
                shared_quad_state_index,
            } => write!(
                formatter,
                "quad {quad_index} in pass {:?} references missing shared quad state {shared_quad_state_index}",
                self.render_pass_id
            ),
            RenderPassValidationReason::SharedQuadStateOrderViolated { quad_index } => write!(
                formatter,
                "quad {quad_index} in pass {:?} references a shared quad state older than its predecessor",
                self.render_pass_id
            ),
        }
    }
}

impl std::error::Error for RenderPassValidationError {}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    pub id: RenderPassId,
    pub output_rect: Rect,
    pub damage_rect: RectF,
    pub transform_to_root_target: Transform,
    pub has_transparent_background: bool,
    pub has_occlusion_from_outside_target_surface: bool,
    pub shared_quad_state_list: Vec<SharedQuadState>,
    pub quad_list: Vec<DrawQuad>,
}

impl RenderPass {
    pub fn new(
        id: RenderPassId,
        output_rect: Rect,
        damage_rect: RectF,
        transform_to_root_target: Transform,
    ) -> Self {
        Self {
            id,
            output_rect,
            damage_rect,
            transform_to_root_target,
            has_transparent_background: true,
            has_occlusion_from_outside_target_surface: false,
            shared_quad_state_list: Vec::new(),
            quad_list: Vec::new(),
        }
    }

    /// Appends a shared quad state and returns the index quads must use.
    pub fn append_shared_quad_state(&mut self, state: SharedQuadState) -> usize {
        self.shared_quad_state_list.push(state);
        self.shared_quad_state_list.len() - 1
    }

    pub fn append_quad(&mut self, quad: DrawQuad) {
        self.quad_list.push(quad);
    }

    pub fn shared_quad_state(&self, quad: &DrawQuad) -> &SharedQuadState {
        self.shared_quad_state_list
            .get(quad.shared_quad_state_index)
            .unwrap_or_else(|| {
                panic!(
                    "quad in pass {:?} references missing shared quad state {}",
                    self.id, quad.shared_quad_state_index
                )
            })
    }

    /// Quads in paint order.
    pub fn quads_back_to_front(&self) -> impl Iterator<Item = &DrawQuad> {
        self.quad_list.iter().rev()
    }

    /// Ids of the passes this pass composites, in paint order.
    pub fn contributing_pass_ids_back_to_front(&self) -> impl Iterator<Item = RenderPassId> + '_ {
        self.quads_back_to_front()
            .filter_map(DrawQuad::render_pass_id)
    }

    /// Every quad must reference an appended shared quad state, and the
    /// referenced indices never go back to an older state.
    pub fn validate(&self) -> Result<(), RenderPassValidationError> {
        let mut previous_index = 0usize;
        for (quad_index, quad) in self.quad_list.iter().enumerate() {
            let shared_quad_state_index = quad.shared_quad_state_index;
            if shared_quad_state_index >= self.shared_quad_state_list.len() {
                return Err(RenderPassValidationError {
                    render_pass_id: self.id,
                    reason: RenderPassValidationReason::SharedQuadStateOutOfRange {
                        quad_index,
                        shared_quad_state_index,
                    },
                });
            }
            if shared_quad_state_index < previous_index {
                return Err(RenderPassValidationError {
                    render_pass_id: self.id,
                    reason: RenderPassValidationReason::SharedQuadStateOrderViolated { quad_index },
                });
            }
            previous_index = shared_quad_state_index;
        }
        Ok(())
    }
}

pub type RenderPassList = Vec<RenderPassId>;
pub type RenderPassIdHashMap = HashMap<RenderPassId, RenderPass>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    Delegating,
    Gl,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererCapabilities {
    pub using_partial_swap: bool,
    pub using_set_visibility: bool,
    pub using_swap_complete_callback: bool,
    pub using_accelerated_painting: bool,
    pub allow_partial_texture_updates: bool,
    pub max_texture_size: i32,
}

impl Default for RendererCapabilities {
    fn default() -> Self {
        Self {
            using_partial_swap: false,
            using_set_visibility: false,
            using_swap_complete_callback: false,
            using_accelerated_painting: false,
            allow_partial_texture_updates: false,
            max_texture_size: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass_id(layer: u64) -> RenderPassId {
        RenderPassId::new(LayerId(layer), 0)
    }

    fn solid_quad(rect: Rect, shared_quad_state_index: usize) -> DrawQuad {
        DrawQuad::new(
            DrawQuadMaterial::SolidColor {
                color: Color::WHITE,
            },
            rect,
            rect,
            shared_quad_state_index,
        )
    }

    fn render_pass_quad(target: RenderPassId, shared_quad_state_index: usize) -> DrawQuad {
        DrawQuad::new(
            DrawQuadMaterial::RenderPass {
                render_pass_id: target,
                is_replica: false,
                mask_resource_id: None,
                contents_changed_since_last_frame: RectF::default(),
                filters: FilterOperations::default(),
                background_filters: FilterOperations::default(),
            },
            Rect::new(0, 0, 10, 10),
            Rect::default(),
            shared_quad_state_index,
        )
    }

    #[test]
    fn quads_back_to_front_reverses_append_order() {
        let mut pass = RenderPass::new(
            pass_id(1),
            Rect::new(0, 0, 100, 100),
            RectF::default(),
            Transform::identity(),
        );
        let state = pass.append_shared_quad_state(SharedQuadState::default());
        pass.append_quad(solid_quad(Rect::new(0, 0, 1, 1), state));
        pass.append_quad(solid_quad(Rect::new(1, 1, 1, 1), state));

        let rects: Vec<Rect> = pass.quads_back_to_front().map(|quad| quad.rect).collect();
        assert_eq!(rects, vec![Rect::new(1, 1, 1, 1), Rect::new(0, 0, 1, 1)]);
    }

    #[test]
    fn contributing_pass_ids_skip_non_pass_quads() {
        let mut pass = RenderPass::new(
            pass_id(1),
            Rect::new(0, 0, 100, 100),
            RectF::default(),
            Transform::identity(),
        );
        let state = pass.append_shared_quad_state(SharedQuadState::default());
        pass.append_quad(render_pass_quad(pass_id(2), state));
        pass.append_quad(solid_quad(Rect::new(0, 0, 5, 5), state));
        pass.append_quad(render_pass_quad(pass_id(3), state));

        let ids: Vec<RenderPassId> = pass.contributing_pass_ids_back_to_front().collect();
        assert_eq!(ids, vec![pass_id(3), pass_id(2)]);
    }

    #[test]
    fn validate_rejects_dangling_shared_quad_state() {
        let mut pass = RenderPass::new(
            pass_id(4),
            Rect::new(0, 0, 10, 10),
            RectF::default(),
            Transform::identity(),
        );
        pass.append_quad(solid_quad(Rect::new(0, 0, 1, 1), 0));

        let error = pass.validate().expect_err("missing shared quad state must fail");
        assert_eq!(
            error.reason,
            RenderPassValidationReason::SharedQuadStateOutOfRange {
                quad_index: 0,
                shared_quad_state_index: 0,
            }
        );
    }

    #[test]
    fn validate_rejects_shared_quad_state_going_backwards() {
        let mut pass = RenderPass::new(
            pass_id(4),
            Rect::new(0, 0, 10, 10),
            RectF::default(),
            Transform::identity(),
        );
        let first = pass.append_shared_quad_state(SharedQuadState::default());
        let second = pass.append_shared_quad_state(SharedQuadState::default());
        pass.append_quad(solid_quad(Rect::new(0, 0, 1, 1), second));
        pass.append_quad(solid_quad(Rect::new(0, 0, 1, 1), first));

        let error = pass.validate().expect_err("order violation must fail");
        assert_eq!(
            error.reason,
            RenderPassValidationReason::SharedQuadStateOrderViolated { quad_index: 1 }
        );
        pass.quad_list.pop();
        pass.validate().expect("remaining quads are valid");
    }

    #[test]
    fn color_channels_unpack_argb() {
        let color = Color::from_argb(0x80, 0x10, 0x20, 0x30);
        assert_eq!(color.alpha(), 0x80);
        assert_eq!(color.red(), 0x10);
        assert_eq!(color.green(), 0x20);
        assert_eq!(color.blue(), 0x30);
        assert!(!color.is_opaque());
        assert!(Color::BLACK.is_opaque());
    }
}
