//! Occlusion tracking for the front-to-back quad walk.
//!
//! The tracker keeps one entry per render target being visited. Each entry
//! holds the opaque area found so far inside the target, and the opaque area
//! inherited from targets further out, both in the target's space.

use geometry::{Rect, Region, Size, Transform};
use render_protocol::{FilterOperations, LayerId};

use crate::layer::LayerTree;
use crate::layer_iterator::LayerIteratorPosition;

#[derive(Debug, Clone)]
struct StackObject {
    target: LayerId,
    occlusion_from_outside_target: Region,
    occlusion_from_inside_target: Region,
}

impl StackObject {
    fn new(target: LayerId) -> Self {
        Self {
            target,
            occlusion_from_outside_target: Region::new(),
            occlusion_from_inside_target: Region::new(),
        }
    }
}

/// Content rect a quad still has to draw, in content space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnoccludedRect {
    pub rect: Rect,
    pub has_occlusion_from_outside_target_surface: bool,
}

/// Geometry of the content being tested against occlusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionQuery {
    pub content_rect: Rect,
    pub draw_transform: Transform,
    pub is_clipped: bool,
    pub clip_rect_in_target: Rect,
}

/// Pixel counts for one frame, in target space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverdrawMetrics {
    record_metrics_for_frame: bool,
    pixels_drawn_opaque: f32,
    pixels_drawn_translucent: f32,
    pixels_culled_for_drawing: f32,
}

impl OverdrawMetrics {
    pub fn new(record_metrics_for_frame: bool) -> Self {
        Self {
            record_metrics_for_frame,
            ..Self::default()
        }
    }

    pub fn pixels_drawn_opaque(&self) -> f32 {
        self.pixels_drawn_opaque
    }

    pub fn pixels_drawn_translucent(&self) -> f32 {
        self.pixels_drawn_translucent
    }

    pub fn pixels_culled_for_drawing(&self) -> f32 {
        self.pixels_culled_for_drawing
    }

    pub fn did_cull_for_drawing(&mut self, transform: &Transform, before_cull_rect: Rect, after_cull_rect: Rect) {
        if !self.record_metrics_for_frame {
            return;
        }
        let before = area_of_mapped_rect(transform, before_cull_rect);
        let after = area_of_mapped_rect(transform, after_cull_rect);
        self.pixels_culled_for_drawing += before - after;
    }

    pub fn did_draw(&mut self, transform: &Transform, after_cull_rect: Rect, opaque_rect: Rect) {
        if !self.record_metrics_for_frame {
            return;
        }
        let after_cull = area_of_mapped_rect(transform, after_cull_rect);
        let opaque = area_of_mapped_rect(transform, opaque_rect.intersect(&after_cull_rect));
        self.pixels_drawn_opaque += opaque;
        self.pixels_drawn_translucent += after_cull - opaque;
    }

    pub fn record_metrics(&self) {
        if !self.record_metrics_for_frame {
            return;
        }
        tracing::trace!(
            opaque = self.pixels_drawn_opaque,
            translucent = self.pixels_drawn_translucent,
            culled = self.pixels_culled_for_drawing,
            "overdraw"
        );
    }
}

fn area_of_mapped_rect(transform: &Transform, rect: Rect) -> f32 {
    if rect.is_empty() {
        return 0.0;
    }
    rect.area() as f32 * transform.determinant().abs()
}

#[derive(Debug, Clone)]
pub struct OcclusionTracker {
    stack: Vec<StackObject>,
    screen_space_clip_rect: Rect,
    minimum_tracking_size: Size,
    overdraw_metrics: OverdrawMetrics,
    occluding_screen_space_rects: Option<Vec<Rect>>,
    non_occluding_screen_space_rects: Option<Vec<Rect>>,
}

impl OcclusionTracker {
    pub fn new(screen_space_clip_rect: Rect, record_metrics_for_frame: bool) -> Self {
        Self {
            stack: Vec::new(),
            screen_space_clip_rect,
            minimum_tracking_size: Size::default(),
            overdraw_metrics: OverdrawMetrics::new(record_metrics_for_frame),
            occluding_screen_space_rects: None,
            non_occluding_screen_space_rects: None,
        }
    }

    pub fn set_minimum_tracking_size(&mut self, size: Size) {
        self.minimum_tracking_size = size;
    }

    /// Starts collecting screen-space debug rects for opaque and
    /// non-opaque layer content.
    pub fn record_screen_space_rects(&mut self) {
        self.occluding_screen_space_rects = Some(Vec::new());
        self.non_occluding_screen_space_rects = Some(Vec::new());
    }

    pub fn take_occluding_screen_space_rects(&mut self) -> Vec<Rect> {
        self.occluding_screen_space_rects.take().unwrap_or_default()
    }

    pub fn take_non_occluding_screen_space_rects(&mut self) -> Vec<Rect> {
        self.non_occluding_screen_space_rects
            .take()
            .unwrap_or_default()
    }

    pub fn overdraw_metrics(&self) -> &OverdrawMetrics {
        &self.overdraw_metrics
    }

    pub fn overdraw_metrics_mut(&mut self) -> &mut OverdrawMetrics {
        &mut self.overdraw_metrics
    }

    pub fn enter_layer(&mut self, tree: &LayerTree, position: LayerIteratorPosition) {
        match position {
            LayerIteratorPosition::Itself { target, .. } => self.enter_render_target(tree, target),
            LayerIteratorPosition::TargetSurface { target } => {
                self.finished_render_target(tree, target)
            }
            LayerIteratorPosition::ContributingSurface { .. } => {}
        }
    }

    pub fn leave_layer(&mut self, tree: &LayerTree, position: LayerIteratorPosition) {
        match position {
            LayerIteratorPosition::Itself { layer, .. } => self.mark_occluded_behind_layer(tree, layer),
            LayerIteratorPosition::ContributingSurface { target, .. } => {
                self.leave_to_render_target(tree, target)
            }
            LayerIteratorPosition::TargetSurface { .. } => {}
        }
    }

    fn enter_render_target(&mut self, tree: &LayerTree, new_target: LayerId) {
        if self
            .stack
            .last()
            .is_some_and(|top| top.target == new_target)
        {
            return;
        }
        let old_target = self.stack.last().map(|top| top.target);
        let old_ancestor_that_moves_pixels =
            old_target.and_then(|old| nearest_ancestor_that_moves_pixels(tree, old));
        let new_ancestor_that_moves_pixels = nearest_ancestor_that_moves_pixels(tree, new_target);
        self.stack.push(StackObject::new(new_target));

        let entering_subtree_that_moves_pixels = new_ancestor_that_moves_pixels.is_some()
            && new_ancestor_that_moves_pixels != old_ancestor_that_moves_pixels;
        let new_layer = tree.get(new_target);
        let inverse_new_target_screen_space = new_layer
            .render_surface()
            .and_then(|surface| surface.screen_space_transform().inverse());
        let entering_root_target = new_layer.parent().is_none();

        let (Some(old_target), Some(inverse_new_target_screen_space)) =
            (old_target, inverse_new_target_screen_space)
        else {
            return;
        };
        if self.stack.len() <= 1 || entering_subtree_that_moves_pixels || entering_root_target {
            return;
        }
        let Some(old_surface) = tree.get(old_target).render_surface() else {
            return;
        };
        let old_target_to_new_target =
            inverse_new_target_screen_space.multiply(&old_surface.screen_space_transform());
        let last = self.stack.len() - 1;
        let mut outside = transform_surface_opaque_region(
            &self.stack[last - 1].occlusion_from_outside_target,
            None,
            &old_target_to_new_target,
        );
        outside.union(&transform_surface_opaque_region(
            &self.stack[last - 1].occlusion_from_inside_target,
            None,
            &old_target_to_new_target,
        ));
        self.stack[last].occlusion_from_outside_target = outside;
    }

    fn finished_render_target(&mut self, tree: &LayerTree, finished_target: LayerId) {
        self.enter_render_target(tree, finished_target);
        let layer = tree.get(finished_target);
        let Some(surface) = layer.render_surface() else {
            return;
        };
        let occlusion_does_not_escape = layer.mask_layer().is_some()
            || surface.draw_opacity() < 1.0
            || layer.filters().has_filter_that_affects_opacity();
        if occlusion_does_not_escape {
            if let Some(top) = self.stack.last_mut() {
                top.occlusion_from_outside_target.clear();
                top.occlusion_from_inside_target.clear();
            }
        }
    }

    fn leave_to_render_target(&mut self, tree: &LayerTree, new_target: LayerId) {
        let Some(last) = self.stack.len().checked_sub(1) else {
            return;
        };
        let surface_will_be_at_top_after_pop =
            self.stack.len() > 1 && self.stack[last - 1].target == new_target;
        let old_target = self.stack[last].target;
        let old_layer = tree.get(old_target);
        let Some(old_surface) = old_layer.render_surface() else {
            return;
        };
        let old_clip = old_surface.is_clipped().then(|| old_surface.clip_rect());

        let mut inside_in_new_target = transform_surface_opaque_region(
            &self.stack[last].occlusion_from_inside_target,
            old_clip,
            &old_surface.draw_transform(),
        );
        let replica_has_mask = old_layer
            .replica_layer()
            .is_some_and(|replica| tree.get(replica).mask_layer().is_some());
        if old_layer.has_replica() && !replica_has_mask {
            inside_in_new_target.intersect(&transform_surface_opaque_region(
                &self.stack[last].occlusion_from_inside_target,
                old_clip,
                &old_surface.replica_draw_transform(),
            ));
        }
        let outside_in_new_target = transform_surface_opaque_region(
            &self.stack[last].occlusion_from_outside_target,
            None,
            &old_surface.draw_transform(),
        );

        let background_filters = old_layer.background_filters();
        let moves_pixels = background_filters.has_filter_that_moves_pixels();
        let mut unoccluded_surface_rect = Rect::default();
        let mut unoccluded_replica_rect = Rect::default();
        if moves_pixels {
            unoccluded_surface_rect = self
                .unoccluded_contributing_surface_content_rect(
                    tree,
                    old_target,
                    false,
                    old_surface.content_rect(),
                )
                .rect;
            if old_layer.has_replica() {
                unoccluded_replica_rect = self
                    .unoccluded_contributing_surface_content_rect(
                        tree,
                        old_target,
                        true,
                        old_surface.content_rect(),
                    )
                    .rect;
            }
        }

        let new_target_is_root = tree.get(new_target).parent().is_none();
        if surface_will_be_at_top_after_pop {
            self.stack.pop();
            if let Some(top) = self.stack.last_mut() {
                top.occlusion_from_inside_target.union(&inside_in_new_target);
                if !new_target_is_root {
                    top.occlusion_from_outside_target.union(&outside_in_new_target);
                }
            }
        } else if let Some(top) = self.stack.last_mut() {
            top.target = new_target;
            top.occlusion_from_inside_target = inside_in_new_target;
            if new_target_is_root {
                top.occlusion_from_outside_target.clear();
            } else {
                top.occlusion_from_outside_target = outside_in_new_target;
            }
        }

        if !moves_pixels {
            return;
        }
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        let mut reduce = |surface_rect: Rect, transform: &Transform| {
            let clip = old_clip;
            reduce_occlusion_below_surface(
                surface_rect,
                transform,
                clip,
                background_filters,
                &mut top.occlusion_from_inside_target,
            );
            reduce_occlusion_below_surface(
                surface_rect,
                transform,
                clip,
                background_filters,
                &mut top.occlusion_from_outside_target,
            );
        };
        reduce(unoccluded_surface_rect, &old_surface.draw_transform());
        if old_layer.has_replica() {
            reduce(unoccluded_replica_rect, &old_surface.replica_draw_transform());
        }
    }

    fn mark_occluded_behind_layer(&mut self, tree: &LayerTree, id: LayerId) {
        if self.stack.is_empty() {
            return;
        }
        let layer = tree.get(id);
        let draw = layer.draw_properties();
        if draw.opacity < 1.0 {
            return;
        }
        let opaque_contents = layer.visible_content_opaque_region();
        if opaque_contents.is_empty() {
            return;
        }
        if !draw.draw_transform.preserves_axis_alignment() {
            return;
        }
        let Some(target_surface) = draw
            .render_target
            .and_then(|target| tree.get(target).render_surface())
        else {
            return;
        };
        let mut clip_rect_in_target = screen_space_clip_rect_in_target_surface(
            target_surface.screen_space_transform(),
            target_surface.content_rect(),
            self.screen_space_clip_rect,
        );
        clip_rect_in_target = if draw.is_clipped {
            clip_rect_in_target.intersect(&draw.clip_rect)
        } else {
            clip_rect_in_target.intersect(&target_surface.content_rect())
        };
        let target_screen_space = target_surface.screen_space_transform();

        for rect in opaque_contents.rects() {
            let transformed = draw
                .draw_transform
                .map_rect(rect.to_f32())
                .to_enclosed_rect()
                .intersect(&clip_rect_in_target);
            if transformed.width < self.minimum_tracking_size.width
                || transformed.height < self.minimum_tracking_size.height
            {
                continue;
            }
            if let Some(top) = self.stack.last_mut() {
                top.occlusion_from_inside_target.union_rect(transformed);
            }
            if let Some(rects) = &mut self.occluding_screen_space_rects {
                rects.push(
                    target_screen_space
                        .map_rect(transformed.to_f32())
                        .to_enclosed_rect(),
                );
            }
        }

        let Some(rects) = &mut self.non_occluding_screen_space_rects else {
            return;
        };
        let mut non_opaque_contents = Region::from_rect(Rect::from_size(layer.content_bounds()));
        non_opaque_contents.subtract(&opaque_contents);
        for rect in non_opaque_contents.rects() {
            let transformed = draw
                .draw_transform
                .map_rect(rect.to_f32())
                .to_enclosed_rect()
                .intersect(&clip_rect_in_target);
            if transformed.is_empty() {
                continue;
            }
            rects.push(
                target_screen_space
                    .map_rect(transformed.to_f32())
                    .to_enclosed_rect(),
            );
        }
    }

    /// True when nothing of `query.content_rect` would be visible in
    /// `render_target`.
    pub fn occluded(&self, render_target: LayerId, query: &OcclusionQuery) -> UnoccludedRect {
        let Some(top) = self.stack.last() else {
            return UnoccludedRect {
                rect: query.content_rect,
                has_occlusion_from_outside_target_surface: false,
            };
        };
        if query.content_rect.is_empty() {
            return UnoccludedRect::default();
        }
        debug_assert_eq!(top.target, render_target, "occlusion queried for a target that is not current");
        if query.draw_transform.inverse().is_none() {
            return UnoccludedRect {
                rect: query.content_rect,
                has_occlusion_from_outside_target_surface: false,
            };
        }
        let (without_outside, with_outside) = unoccluded_bounds_in_target(
            query.draw_transform.map_rect(query.content_rect.to_f32()).to_enclosing_rect(),
            query.is_clipped.then_some(query.clip_rect_in_target),
            Some(top),
        );
        UnoccludedRect {
            rect: with_outside,
            has_occlusion_from_outside_target_surface: rect_shrank(without_outside, with_outside),
        }
    }

    /// Content-space part of `query.content_rect` not hidden by anything
    /// drawn in front of it.
    pub fn unoccluded_content_rect(&self, render_target: LayerId, query: &OcclusionQuery) -> UnoccludedRect {
        let unchanged = UnoccludedRect {
            rect: query.content_rect,
            has_occlusion_from_outside_target_surface: false,
        };
        let Some(top) = self.stack.last() else {
            return unchanged;
        };
        if query.content_rect.is_empty() {
            return unchanged;
        }
        debug_assert_eq!(top.target, render_target, "occlusion queried for a target that is not current");
        let Some(inverse) = query.draw_transform.inverse() else {
            return unchanged;
        };
        let (without_outside, with_outside) = unoccluded_bounds_in_target(
            query.draw_transform.map_rect(query.content_rect.to_f32()).to_enclosing_rect(),
            query.is_clipped.then_some(query.clip_rect_in_target),
            Some(top),
        );
        UnoccludedRect {
            rect: inverse
                .map_rect(with_outside.to_f32())
                .to_enclosing_rect()
                .intersect(&query.content_rect),
            has_occlusion_from_outside_target_surface: rect_shrank(without_outside, with_outside),
        }
    }

    /// Like `unoccluded_content_rect` for the quad compositing `layer`'s
    /// surface into its parent target. Must be called while `layer` is still
    /// the current target.
    pub fn unoccluded_contributing_surface_content_rect(
        &self,
        tree: &LayerTree,
        layer: LayerId,
        for_replica: bool,
        content_rect: Rect,
    ) -> UnoccludedRect {
        let unchanged = UnoccludedRect {
            rect: content_rect,
            has_occlusion_from_outside_target_surface: false,
        };
        if content_rect.is_empty() {
            return unchanged;
        }
        let Some(surface) = tree.get(layer).render_surface() else {
            return unchanged;
        };
        debug_assert!(
            self.stack.last().is_some_and(|top| top.target == layer),
            "contributing surface {layer} is not the current target"
        );
        let draw_transform = if for_replica {
            surface.replica_draw_transform()
        } else {
            surface.draw_transform()
        };
        let Some(inverse) = draw_transform.inverse() else {
            return unchanged;
        };
        let outside = self
            .stack
            .len()
            .checked_sub(2)
            .and_then(|index| self.stack.get(index));
        let (without_outside, with_outside) = unoccluded_bounds_in_target(
            draw_transform.map_rect(content_rect.to_f32()).to_enclosing_rect(),
            surface.is_clipped().then(|| surface.clip_rect()),
            outside,
        );
        UnoccludedRect {
            rect: inverse
                .map_rect(with_outside.to_f32())
                .to_enclosing_rect()
                .intersect(&content_rect),
            has_occlusion_from_outside_target_surface: rect_shrank(without_outside, with_outside),
        }
    }

    /// Screen area not covered by opaque content. Valid once the walk is back
    /// at the root target.
    pub fn compute_visible_region_in_screen(&self) -> Region {
        let mut visible = Region::from_rect(self.screen_space_clip_rect);
        if let Some(top) = self.stack.last() {
            visible.subtract(&top.occlusion_from_inside_target);
        }
        visible
    }
}

/// Bounds of the unoccluded region before and after subtracting occlusion
/// from outside the target.
fn unoccluded_bounds_in_target(
    rect_in_target: Rect,
    clip_rect_in_target: Option<Rect>,
    occlusion: Option<&StackObject>,
) -> (Rect, Rect) {
    let mut unoccluded = Region::from_rect(rect_in_target);
    if let Some(clip) = clip_rect_in_target {
        unoccluded.intersect_rect(clip);
    }
    let Some(occlusion) = occlusion else {
        let bounds = unoccluded.bounds();
        return (bounds, bounds);
    };
    unoccluded.subtract(&occlusion.occlusion_from_inside_target);
    let without_outside = unoccluded.bounds();
    unoccluded.subtract(&occlusion.occlusion_from_outside_target);
    (without_outside, unoccluded.bounds())
}

fn rect_shrank(before: Rect, after: Rect) -> bool {
    let mut difference = Region::from_rect(before);
    difference.subtract_rect(after);
    !difference.is_empty()
}

/// Maps an opaque region into another target. Regions that would stop being
/// axis-aligned are dropped.
fn transform_surface_opaque_region(region: &Region, clip_rect_in_new_target: Option<Rect>, transform: &Transform) -> Region {
    if region.is_empty() || !transform.preserves_axis_alignment() {
        return Region::new();
    }
    let mut transformed = Region::new();
    for rect in region.rects() {
        let mut mapped = transform.map_rect(rect.to_f32()).to_enclosed_rect();
        if let Some(clip) = clip_rect_in_new_target {
            mapped = mapped.intersect(&clip);
        }
        transformed.union_rect(mapped);
    }
    transformed
}

/// Background filters pull pixels from around the surface, so opaque
/// content below it no longer hides what the filter reads.
fn reduce_occlusion_below_surface(
    surface_rect: Rect,
    surface_transform: &Transform,
    surface_clip: Option<Rect>,
    filters: &FilterOperations,
    occlusion_in_target: &mut Region,
) {
    if surface_rect.is_empty() {
        return;
    }
    let mut affected_area = surface_transform
        .map_rect(surface_rect.to_f32())
        .to_enclosing_rect();
    if let Some(clip) = surface_clip {
        affected_area = affected_area.intersect(&clip);
    }
    if affected_area.is_empty() {
        return;
    }
    let outsets = filters.outsets();
    affected_area = affected_area.inset(-outsets.left, -outsets.top, -outsets.right, -outsets.bottom);

    let mut affected_occlusion = occlusion_in_target.clone();
    affected_occlusion.intersect_rect(affected_area);
    occlusion_in_target.subtract_rect(affected_area);
    for rect in affected_occlusion.rects() {
        let shrink_left = if rect.x == affected_area.x { 0 } else { outsets.right };
        let shrink_top = if rect.y == affected_area.y { 0 } else { outsets.bottom };
        let shrink_right = if rect.right() == affected_area.right() {
            0
        } else {
            outsets.left
        };
        let shrink_bottom = if rect.bottom() == affected_area.bottom() {
            0
        } else {
            outsets.top
        };
        occlusion_in_target.union_rect(rect.inset(shrink_left, shrink_top, shrink_right, shrink_bottom));
    }
}

fn screen_space_clip_rect_in_target_surface(
    target_screen_space_transform: Transform,
    target_content_rect: Rect,
    screen_space_clip_rect: Rect,
) -> Rect {
    match target_screen_space_transform.inverse() {
        Some(inverse) => inverse
            .map_rect(screen_space_clip_rect.to_f32())
            .to_enclosing_rect(),
        None => target_content_rect,
    }
}

/// Closest render target, starting at `target` itself, whose owner has a
/// filter that moves pixels.
fn nearest_ancestor_that_moves_pixels(tree: &LayerTree, target: LayerId) -> Option<LayerId> {
    let mut current = Some(target);
    while let Some(id) = current {
        let layer = tree.get(id);
        if layer.filters().has_filter_that_moves_pixels() {
            return Some(id);
        }
        current = layer
            .parent()
            .and_then(|parent| tree.get(parent).draw_properties().render_target);
    }
    None
}
