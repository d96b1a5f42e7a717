use geometry::{Rect, RectF, Transform};
use render_protocol::{LayerId, RenderPassId};

use crate::damage::DamageTracker;

/// Offscreen target owned by a layer that composites in isolation.
///
/// The owner is referenced by id. Transforms map the surface's content space
/// into the space of the surface it draws into.
#[derive(Debug, Clone)]
pub struct RenderSurface {
    owner: LayerId,
    pub(crate) draw_transform: Transform,
    pub(crate) screen_space_transform: Transform,
    pub(crate) replica_draw_transform: Transform,
    pub(crate) replica_screen_space_transform: Transform,
    pub(crate) draw_opacity: f32,
    pub(crate) draw_opacity_is_animating: bool,
    pub(crate) target_surface_transforms_are_animating: bool,
    pub(crate) screen_space_transforms_are_animating: bool,
    pub(crate) is_clipped: bool,
    clip_rect: Rect,
    content_rect: Rect,
    surface_property_changed: bool,
    pub(crate) layer_list: Vec<LayerId>,
    pub(crate) damage_tracker: DamageTracker,
}

impl RenderSurface {
    pub fn new(owner: LayerId) -> Self {
        Self {
            owner,
            draw_transform: Transform::identity(),
            screen_space_transform: Transform::identity(),
            replica_draw_transform: Transform::identity(),
            replica_screen_space_transform: Transform::identity(),
            draw_opacity: 1.0,
            draw_opacity_is_animating: false,
            target_surface_transforms_are_animating: false,
            screen_space_transforms_are_animating: false,
            is_clipped: false,
            clip_rect: Rect::default(),
            content_rect: Rect::default(),
            surface_property_changed: false,
            layer_list: Vec::new(),
            damage_tracker: DamageTracker::default(),
        }
    }

    pub fn owner(&self) -> LayerId {
        self.owner
    }

    pub fn render_pass_id(&self) -> RenderPassId {
        RenderPassId::new(self.owner, 0)
    }

    pub fn draw_transform(&self) -> Transform {
        self.draw_transform
    }

    pub fn screen_space_transform(&self) -> Transform {
        self.screen_space_transform
    }

    pub fn replica_draw_transform(&self) -> Transform {
        self.replica_draw_transform
    }

    pub fn replica_screen_space_transform(&self) -> Transform {
        self.replica_screen_space_transform
    }

    pub fn draw_opacity(&self) -> f32 {
        self.draw_opacity
    }

    pub fn is_clipped(&self) -> bool {
        self.is_clipped
    }

    pub fn clip_rect(&self) -> Rect {
        self.clip_rect
    }

    pub fn content_rect(&self) -> Rect {
        self.content_rect
    }

    pub fn layer_list(&self) -> &[LayerId] {
        &self.layer_list
    }

    pub fn damage_tracker(&self) -> &DamageTracker {
        &self.damage_tracker
    }

    /// Set when the content or clip rect changed since the last reset.
    pub fn surface_property_changed(&self) -> bool {
        self.surface_property_changed
    }

    pub(crate) fn set_clip_rect(&mut self, clip_rect: Rect) {
        if self.clip_rect == clip_rect {
            return;
        }
        self.surface_property_changed = true;
        self.clip_rect = clip_rect;
    }

    pub(crate) fn set_content_rect(&mut self, content_rect: Rect) {
        if self.content_rect == content_rect {
            return;
        }
        self.surface_property_changed = true;
        self.content_rect = content_rect;
    }

    pub(crate) fn reset_property_changed_flag(&mut self) {
        self.surface_property_changed = false;
    }

    /// Target-space bounds covered by the surface, and by its replica when
    /// the owner has one.
    pub fn drawable_content_rect(&self, has_replica: bool) -> RectF {
        let content_rect = self.content_rect.to_f32();
        let mut drawable = self.draw_transform.map_rect(content_rect);
        if has_replica {
            drawable = drawable.union(&self.replica_draw_transform.map_rect(content_rect));
        }
        drawable
    }
}
