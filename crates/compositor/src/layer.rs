//! Retained layer tree.
//!
//! Layers live in a slot map and are addressed by the `LayerId` the upstream
//! model assigned. Parent, child, mask and replica links are ids. Mask and
//! replica layers are not children of their owner: they are reachable only
//! through the owner's links.

use std::collections::{BTreeMap, HashMap, HashSet};

use bitflags::bitflags;
use geometry::{PointF, Rect, RectF, Region, Size, Transform, Vector2d, Vector2dF};
use protocol::TargetProperty;
use render_protocol::{Color, FilterOperations, LayerId, ResourceId};
use resources::{ResourceProvider, UploadState};
use slotmap::SlotMap;

use crate::animation::{LayerAnimationController, ScrollbarAnimationController};
use crate::render_surface::RenderSurface;

slotmap::new_key_type! {
    struct LayerKey;
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct LayerChanges: u8 {
        /// A property of this layer alone changed.
        const PROPERTY_CHANGED = 1 << 0;
        /// A property that moves every descendant changed.
        const SUBTREE_PROPERTY_CHANGED = 1 << 1;
        /// Opacity or transform changed; damages the owning surface.
        const SURFACE_PROPERTY_CHANGED = 1 << 2;
    }
}

/// Grid coordinate of a tile, column first.
pub type TileIndex = (i32, i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Missing,
    Uploading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub color: Color,
    resource: Option<ResourceId>,
    needs_upload: bool,
}

impl Tile {
    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }
}

/// Content painted as a grid of textured tiles. Each tile's pixels are a
/// single colour, which is what gets uploaded into the tile's texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TiledContent {
    tile_size: Size,
    default_color: Color,
    tiles: BTreeMap<TileIndex, Tile>,
}

impl TiledContent {
    pub fn new(tile_size: Size, default_color: Color) -> Self {
        assert!(
            !tile_size.is_empty(),
            "tiled content requires a non-empty tile size"
        );
        Self {
            tile_size,
            default_color,
            tiles: BTreeMap::new(),
        }
    }

    pub fn tile_size(&self) -> Size {
        self.tile_size
    }

    pub fn tile(&self, index: TileIndex) -> Option<&Tile> {
        self.tiles.get(&index)
    }

    pub fn tile_bounds(&self, index: TileIndex) -> Rect {
        Rect::new(
            index.0 * self.tile_size.width,
            index.1 * self.tile_size.height,
            self.tile_size.width,
            self.tile_size.height,
        )
    }

    /// Tiles overlapping `rect`, row by row.
    pub fn tile_indices_covering(&self, rect: Rect) -> Vec<TileIndex> {
        if rect.is_empty() {
            return Vec::new();
        }
        let first_column = rect.x.div_euclid(self.tile_size.width);
        let last_column = (rect.right() - 1).div_euclid(self.tile_size.width);
        let first_row = rect.y.div_euclid(self.tile_size.height);
        let last_row = (rect.bottom() - 1).div_euclid(self.tile_size.height);
        let mut indices = Vec::new();
        for row in first_row..=last_row {
            for column in first_column..=last_column {
                indices.push((column, row));
            }
        }
        indices
    }

    pub fn tile_state(&self, index: TileIndex, provider: &ResourceProvider) -> TileState {
        match self.tiles.get(&index).and_then(|tile| tile.resource) {
            None => TileState::Missing,
            Some(resource) => match provider.upload_state(resource) {
                UploadState::Ready => TileState::Ready,
                UploadState::Missing => TileState::Missing,
                UploadState::Pending { .. } | UploadState::InFlight { .. } => TileState::Uploading,
            },
        }
    }

    pub fn set_tile_color(&mut self, index: TileIndex, color: Color) {
        let default_color = self.default_color;
        let tile = self.tiles.entry(index).or_insert(Tile {
            color: default_color,
            resource: None,
            needs_upload: true,
        });
        tile.color = color;
        tile.needs_upload = true;
    }

    pub(crate) fn invalidate(&mut self, rect: Rect) {
        for index in self.tile_indices_covering(rect) {
            if let Some(tile) = self.tiles.get_mut(&index) {
                tile.needs_upload = true;
            }
        }
    }

    /// Tiles in `rect` that need a texture or new contents.
    pub(crate) fn tiles_needing_upload(&self, rect: Rect) -> Vec<TileIndex> {
        self.tile_indices_covering(rect)
            .into_iter()
            .filter(|index| {
                self.tiles
                    .get(index)
                    .is_none_or(|tile| tile.resource.is_none() || tile.needs_upload)
            })
            .collect()
    }

    pub(crate) fn tile_color(&self, index: TileIndex) -> Color {
        self.tiles
            .get(&index)
            .map(|tile| tile.color)
            .unwrap_or(self.default_color)
    }

    pub(crate) fn attach_resource(&mut self, index: TileIndex, resource: ResourceId) {
        let default_color = self.default_color;
        let tile = self.tiles.entry(index).or_insert(Tile {
            color: default_color,
            resource: None,
            needs_upload: true,
        });
        tile.resource = Some(resource);
        tile.needs_upload = false;
    }

    pub(crate) fn resources(&self) -> impl Iterator<Item = (TileIndex, ResourceId)> + '_ {
        self.tiles
            .iter()
            .filter_map(|(index, tile)| tile.resource.map(|resource| (*index, resource)))
    }

    /// Detaches the given resources. Returns how many tiles became missing.
    pub(crate) fn drop_resources(&mut self, evicted: &HashSet<ResourceId>) -> usize {
        let mut dropped = 0;
        for tile in self.tiles.values_mut() {
            if tile.resource.is_some_and(|resource| evicted.contains(&resource)) {
                tile.resource = None;
                dropped += 1;
            }
        }
        dropped
    }

    pub(crate) fn drop_all_resources(&mut self) -> Vec<ResourceId> {
        self.tiles
            .values_mut()
            .filter_map(|tile| tile.resource.take())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerContent {
    None,
    SolidColor,
    Tiled(TiledContent),
}

/// Properties derived by the draw-properties pass. Only meaningful after the
/// pass ran for the current tree state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrawProperties {
    pub draw_transform: Transform,
    pub screen_space_transform: Transform,
    pub opacity: f32,
    pub visible_content_rect: Rect,
    pub drawable_content_rect: Rect,
    pub clip_rect: Rect,
    pub is_clipped: bool,
    pub render_target: Option<LayerId>,
    pub draw_transform_is_animating: bool,
    pub screen_space_transform_is_animating: bool,
    pub opacity_is_animating: bool,
}

#[derive(Debug, Clone)]
pub struct Layer {
    id: LayerId,
    parent: Option<LayerId>,
    children: Vec<LayerId>,
    mask_layer: Option<LayerId>,
    replica_layer: Option<LayerId>,

    position: PointF,
    transform: Transform,
    impl_transform: Transform,
    bounds: Size,
    scroll_offset: Vector2d,
    scroll_delta: Vector2dF,
    sent_scroll_delta: Vector2d,
    max_scroll_offset: Vector2d,
    scrollable: bool,
    draws_content: bool,
    contents_opaque: bool,
    opaque_rect: Rect,
    opacity: f32,
    masks_to_bounds: bool,
    force_render_surface: bool,
    filters: FilterOperations,
    background_filters: FilterOperations,
    background_color: Color,
    content: LayerContent,
    touch_event_handler_region: Region,
    non_fast_scrollable_region: Region,
    should_scroll_on_main_thread: bool,
    have_wheel_event_handlers: bool,
    debug_name: String,

    pub(crate) animation: LayerAnimationController,
    scrollbar_animation: Option<ScrollbarAnimationController>,

    changes: LayerChanges,
    update_rect: RectF,
    drawing: bool,

    pub(crate) draw: DrawProperties,
    pub(crate) render_surface: Option<RenderSurface>,
}

impl Layer {
    pub fn new(id: LayerId) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            mask_layer: None,
            replica_layer: None,
            position: PointF::origin(),
            transform: Transform::identity(),
            impl_transform: Transform::identity(),
            bounds: Size::default(),
            scroll_offset: Vector2d::zero(),
            scroll_delta: Vector2dF::zero(),
            sent_scroll_delta: Vector2d::zero(),
            max_scroll_offset: Vector2d::zero(),
            scrollable: false,
            draws_content: false,
            contents_opaque: false,
            opaque_rect: Rect::default(),
            opacity: 1.0,
            masks_to_bounds: false,
            force_render_surface: false,
            filters: FilterOperations::default(),
            background_filters: FilterOperations::default(),
            background_color: Color::TRANSPARENT,
            content: LayerContent::None,
            touch_event_handler_region: Region::new(),
            non_fast_scrollable_region: Region::new(),
            should_scroll_on_main_thread: false,
            have_wheel_event_handlers: false,
            debug_name: String::new(),
            animation: LayerAnimationController::default(),
            scrollbar_animation: None,
            changes: LayerChanges::empty(),
            update_rect: RectF::default(),
            drawing: false,
            draw: DrawProperties {
                opacity: 1.0,
                ..DrawProperties::default()
            },
            render_surface: None,
        }
    }

    /// Layer that paints one solid colour over its bounds.
    pub fn solid_color(id: LayerId, bounds: Size, color: Color) -> Self {
        let mut layer = Self::new(id);
        layer.bounds = bounds;
        layer.draws_content = true;
        layer.background_color = color;
        layer.contents_opaque = color.is_opaque();
        layer.content = LayerContent::SolidColor;
        layer
    }

    pub fn tiled(id: LayerId, bounds: Size, content: TiledContent) -> Self {
        let mut layer = Self::new(id);
        layer.bounds = bounds;
        layer.draws_content = true;
        layer.background_color = content.default_color;
        layer.content = LayerContent::Tiled(content);
        layer
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    pub fn mask_layer(&self) -> Option<LayerId> {
        self.mask_layer
    }

    pub fn replica_layer(&self) -> Option<LayerId> {
        self.replica_layer
    }

    pub fn position(&self) -> PointF {
        self.position
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn impl_transform(&self) -> Transform {
        self.impl_transform
    }

    pub fn bounds(&self) -> Size {
        self.bounds
    }

    pub fn content_bounds(&self) -> Size {
        self.bounds
    }

    pub fn scroll_offset(&self) -> Vector2d {
        self.scroll_offset
    }

    pub fn scroll_delta(&self) -> Vector2dF {
        self.scroll_delta
    }

    pub fn sent_scroll_delta(&self) -> Vector2d {
        self.sent_scroll_delta
    }

    pub fn max_scroll_offset(&self) -> Vector2d {
        self.max_scroll_offset
    }

    pub fn total_scroll_offset(&self) -> Vector2dF {
        self.scroll_offset.to_f32() + self.scroll_delta
    }

    pub fn scrollable(&self) -> bool {
        self.scrollable
    }

    pub fn draws_content(&self) -> bool {
        self.draws_content
    }

    pub fn contents_opaque(&self) -> bool {
        self.contents_opaque
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn masks_to_bounds(&self) -> bool {
        self.masks_to_bounds
    }

    pub fn force_render_surface(&self) -> bool {
        self.force_render_surface
    }

    pub fn filters(&self) -> &FilterOperations {
        &self.filters
    }

    pub fn background_filters(&self) -> &FilterOperations {
        &self.background_filters
    }

    pub fn background_color(&self) -> Color {
        self.background_color
    }

    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut LayerContent {
        &mut self.content
    }

    pub fn touch_event_handler_region(&self) -> &Region {
        &self.touch_event_handler_region
    }

    pub fn non_fast_scrollable_region(&self) -> &Region {
        &self.non_fast_scrollable_region
    }

    pub fn should_scroll_on_main_thread(&self) -> bool {
        self.should_scroll_on_main_thread
    }

    pub fn have_wheel_event_handlers(&self) -> bool {
        self.have_wheel_event_handlers
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn animation_controller(&self) -> &LayerAnimationController {
        &self.animation
    }

    pub fn animation_controller_mut(&mut self) -> &mut LayerAnimationController {
        &mut self.animation
    }

    pub fn scrollbar_animation_controller(&self) -> Option<&ScrollbarAnimationController> {
        self.scrollbar_animation.as_ref()
    }

    pub(crate) fn scrollbar_animation_controller_mut(
        &mut self,
    ) -> Option<&mut ScrollbarAnimationController> {
        self.scrollbar_animation.as_mut()
    }

    pub fn changes(&self) -> LayerChanges {
        self.changes
    }

    pub fn update_rect(&self) -> RectF {
        self.update_rect
    }

    pub fn draw_properties(&self) -> &DrawProperties {
        &self.draw
    }

    pub fn render_surface(&self) -> Option<&RenderSurface> {
        self.render_surface.as_ref()
    }

    pub fn has_replica(&self) -> bool {
        self.replica_layer.is_some()
    }

    /// Opaque part of the visible content, in content space.
    pub fn visible_content_opaque_region(&self) -> Region {
        let visible = self.draw.visible_content_rect;
        if self.contents_opaque {
            return Region::from_rect(visible);
        }
        Region::from_rect(self.opaque_rect.intersect(&visible))
    }

    pub fn set_position(&mut self, position: PointF) {
        if self.position == position {
            return;
        }
        self.position = position;
        self.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_bounds(&mut self, bounds: Size) {
        if self.bounds == bounds {
            return;
        }
        self.bounds = bounds;
        self.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_transform(&mut self, transform: Transform) {
        if self.transform == transform {
            return;
        }
        self.transform = transform;
        self.changes |= LayerChanges::SURFACE_PROPERTY_CHANGED;
    }

    pub(crate) fn set_impl_transform(&mut self, transform: Transform) {
        if self.impl_transform == transform {
            return;
        }
        self.impl_transform = transform;
        self.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        if self.opacity == opacity {
            return;
        }
        self.opacity = opacity;
        self.changes |= LayerChanges::SURFACE_PROPERTY_CHANGED;
    }

    pub fn set_masks_to_bounds(&mut self, masks_to_bounds: bool) {
        if self.masks_to_bounds == masks_to_bounds {
            return;
        }
        self.masks_to_bounds = masks_to_bounds;
        self.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_force_render_surface(&mut self, force: bool) {
        self.force_render_surface = force;
    }

    pub fn set_draws_content(&mut self, draws_content: bool) {
        if self.draws_content == draws_content {
            return;
        }
        self.draws_content = draws_content;
        self.changes |= LayerChanges::PROPERTY_CHANGED;
    }

    pub fn set_contents_opaque(&mut self, opaque: bool) {
        if self.contents_opaque == opaque {
            return;
        }
        self.contents_opaque = opaque;
        self.changes |= LayerChanges::PROPERTY_CHANGED;
    }

    pub fn set_opaque_rect(&mut self, rect: Rect) {
        self.opaque_rect = rect;
    }

    pub fn set_background_color(&mut self, color: Color) {
        if self.background_color == color {
            return;
        }
        self.background_color = color;
        self.changes |= LayerChanges::PROPERTY_CHANGED;
    }

    pub fn set_filters(&mut self, filters: FilterOperations) {
        if self.filters == filters {
            return;
        }
        self.filters = filters;
        self.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_background_filters(&mut self, filters: FilterOperations) {
        if self.background_filters == filters {
            return;
        }
        self.background_filters = filters;
        self.changes |= LayerChanges::PROPERTY_CHANGED;
    }

    pub fn set_content(&mut self, content: LayerContent) {
        self.content = content;
        self.changes |= LayerChanges::PROPERTY_CHANGED;
    }

    pub fn set_scrollable(&mut self, scrollable: bool) {
        self.scrollable = scrollable;
    }

    pub fn set_scroll_offset(&mut self, offset: Vector2d) {
        if self.scroll_offset == offset {
            return;
        }
        self.scroll_offset = offset;
        self.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_scroll_delta(&mut self, delta: Vector2dF) {
        if self.scroll_delta == delta {
            return;
        }
        self.scroll_delta = delta;
        self.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_sent_scroll_delta(&mut self, delta: Vector2d) {
        self.sent_scroll_delta = delta;
    }

    pub fn set_max_scroll_offset(&mut self, offset: Vector2d) {
        self.max_scroll_offset = offset;
    }

    pub fn set_touch_event_handler_region(&mut self, region: Region) {
        self.touch_event_handler_region = region;
    }

    pub fn set_non_fast_scrollable_region(&mut self, region: Region) {
        self.non_fast_scrollable_region = region;
    }

    pub fn set_should_scroll_on_main_thread(&mut self, value: bool) {
        self.should_scroll_on_main_thread = value;
    }

    pub fn set_have_wheel_event_handlers(&mut self, value: bool) {
        self.have_wheel_event_handlers = value;
    }

    pub fn set_debug_name(&mut self, name: impl Into<String>) {
        self.debug_name = name.into();
    }

    pub fn set_scrollbar_animation_controller(
        &mut self,
        controller: Option<ScrollbarAnimationController>,
    ) {
        self.scrollbar_animation = controller;
    }

    /// Marks part of the content as repainted.
    pub fn set_needs_display_rect(&mut self, rect: RectF) {
        if rect.is_empty() {
            return;
        }
        self.update_rect = if self.update_rect.is_empty() {
            rect
        } else {
            self.update_rect.union(&rect)
        };
        if let LayerContent::Tiled(tiled) = &mut self.content {
            tiled.invalidate(rect.to_enclosing_rect());
        }
    }

    /// Scrolls within `[0, max_scroll_offset]` and returns the part of
    /// `scroll` that could not be applied.
    pub fn scroll_by(&mut self, scroll: Vector2dF) -> Vector2dF {
        let min_delta = -self.scroll_offset.to_f32();
        let max_delta = (self.max_scroll_offset - self.scroll_offset).to_f32();
        let requested = self.scroll_delta + scroll;
        let mut new_delta = requested;
        new_delta.clamp_to_min(min_delta);
        new_delta.clamp_to_max(max_delta);
        let unscrolled = requested - new_delta;
        self.set_scroll_delta(new_delta);
        unscrolled
    }

    pub(crate) fn reset_change_tracking(&mut self) {
        self.changes = LayerChanges::empty();
        self.update_rect = RectF::default();
        if let Some(surface) = &mut self.render_surface {
            surface.reset_property_changed_flag();
        }
    }

    /// True between the frame build that picked this layer and the end of
    /// that frame.
    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    pub(crate) fn will_draw(&mut self) {
        self.drawing = true;
    }

    pub(crate) fn did_draw(&mut self) {
        self.drawing = false;
    }

    /// Damages the tiles whose upload just completed. Unlike
    /// `set_needs_display_rect` this does not ask for the tiles again.
    pub(crate) fn did_complete_tile_uploads(&mut self, completed: &HashSet<ResourceId>) -> bool {
        let LayerContent::Tiled(tiled) = &self.content else {
            return false;
        };
        let mut damaged = RectF::default();
        for (index, resource) in tiled.resources() {
            if !completed.contains(&resource) {
                continue;
            }
            let bounds = tiled.tile_bounds(index).to_f32();
            damaged = if damaged.is_empty() {
                bounds
            } else {
                damaged.union(&bounds)
            };
        }
        if damaged.is_empty() {
            return false;
        }
        self.update_rect = if self.update_rect.is_empty() {
            damaged
        } else {
            self.update_rect.union(&damaged)
        };
        true
    }

    pub(crate) fn clear_render_surface(&mut self) {
        self.render_surface = None;
    }

    /// Drops device state after the output surface was lost. Returns the
    /// tile resources that must be released.
    pub(crate) fn did_lose_output_surface(&mut self) -> Vec<ResourceId> {
        match &mut self.content {
            LayerContent::Tiled(tiled) => tiled.drop_all_resources(),
            LayerContent::None | LayerContent::SolidColor => Vec::new(),
        }
    }

    pub(crate) fn is_animating(&self, property: TargetProperty) -> bool {
        self.animation.is_animating(property)
    }
}

#[derive(Debug, Default)]
pub struct LayerTree {
    layers: SlotMap<LayerKey, Layer>,
    index: HashMap<LayerId, LayerKey>,
    root: Option<LayerId>,
}

impl LayerTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn root(&self) -> Option<LayerId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<LayerId>) {
        if let Some(root) = root {
            assert!(self.contains(root), "root {root} is not in the tree");
        }
        self.root = root;
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn insert(&mut self, layer: Layer) -> LayerId {
        let id = layer.id;
        assert!(!self.contains(id), "layer {id} inserted twice");
        let key = self.layers.insert(layer);
        self.index.insert(id, key);
        id
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.index.get(&id).and_then(|key| self.layers.get(*key))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        let key = *self.index.get(&id)?;
        self.layers.get_mut(key)
    }

    pub(crate) fn get(&self, id: LayerId) -> &Layer {
        self.layer(id)
            .unwrap_or_else(|| panic!("layer {id} is not in the tree"))
    }

    pub(crate) fn get_mut(&mut self, id: LayerId) -> &mut Layer {
        self.layer_mut(id)
            .unwrap_or_else(|| panic!("layer {id} is not in the tree"))
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    pub(crate) fn layers_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.layers.values_mut()
    }

    pub fn parent(&self, id: LayerId) -> Option<LayerId> {
        self.layer(id).and_then(|layer| layer.parent)
    }

    pub fn add_child(&mut self, parent: LayerId, child: LayerId) {
        assert!(parent != child, "layer {parent} cannot parent itself");
        self.remove_from_parent(child);
        self.get_mut(child).parent = Some(parent);
        let parent_layer = self.get_mut(parent);
        parent_layer.children.push(child);
        parent_layer.changes |= LayerChanges::PROPERTY_CHANGED;
        self.get_mut(child).changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn remove_from_parent(&mut self, child: LayerId) {
        let Some(parent) = self.get_mut(child).parent.take() else {
            return;
        };
        if let Some(parent_layer) = self.layer_mut(parent) {
            parent_layer.children.retain(|id| *id != child);
            parent_layer.changes |= LayerChanges::PROPERTY_CHANGED;
        }
    }

    pub fn set_mask_layer(&mut self, owner: LayerId, mask: Option<LayerId>) {
        if let Some(mask) = mask {
            assert!(self.contains(mask), "mask {mask} is not in the tree");
        }
        let layer = self.get_mut(owner);
        if layer.mask_layer == mask {
            return;
        }
        layer.mask_layer = mask;
        layer.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    pub fn set_replica_layer(&mut self, owner: LayerId, replica: Option<LayerId>) {
        if let Some(replica) = replica {
            assert!(self.contains(replica), "replica {replica} is not in the tree");
        }
        let layer = self.get_mut(owner);
        if layer.replica_layer == replica {
            return;
        }
        layer.replica_layer = replica;
        layer.changes |= LayerChanges::SUBTREE_PROPERTY_CHANGED;
    }

    /// Removes `id`, its descendants and their mask and replica layers.
    /// Returns the removed layers.
    pub fn remove_subtree(&mut self, id: LayerId) -> Vec<Layer> {
        self.remove_from_parent(id);
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(key) = self.index.remove(&current) else {
                continue;
            };
            let Some(layer) = self.layers.remove(key) else {
                continue;
            };
            pending.extend(layer.children.iter().copied());
            pending.extend(layer.mask_layer);
            pending.extend(layer.replica_layer);
            removed.push(layer);
        }
        if self.root.is_some_and(|root| !self.contains(root)) {
            self.root = None;
        }
        removed
    }

    /// Layers of the subtree rooted at `id` in paint order (parent before
    /// children). Mask and replica layers are not included.
    pub fn subtree_pre_order(&self, id: LayerId) -> Vec<LayerId> {
        let mut order = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(layer) = self.layer(current) else {
                continue;
            };
            order.push(current);
            pending.extend(layer.children.iter().rev().copied());
        }
        order
    }

    /// Like `subtree_pre_order`, followed by every reachable mask and
    /// replica layer (and their masks).
    pub fn subtree_with_attachments(&self, id: LayerId) -> Vec<LayerId> {
        let mut order = self.subtree_pre_order(id);
        let mut attachments = Vec::new();
        let mut pending: Vec<LayerId> = order.clone();
        while let Some(current) = pending.pop() {
            let layer = self.get(current);
            for attached in [layer.mask_layer, layer.replica_layer].into_iter().flatten() {
                attachments.push(attached);
                pending.push(attached);
            }
        }
        order.extend(attachments);
        order
    }

    /// True when this layer or any ancestor changed a property that moves
    /// this layer.
    pub fn layer_property_changed(&self, id: LayerId) -> bool {
        let layer = self.get(id);
        if layer
            .changes
            .intersects(LayerChanges::PROPERTY_CHANGED | LayerChanges::SUBTREE_PROPERTY_CHANGED)
        {
            return true;
        }
        let mut current = layer.parent;
        while let Some(ancestor) = current {
            let ancestor = self.get(ancestor);
            if ancestor.changes.contains(LayerChanges::SUBTREE_PROPERTY_CHANGED) {
                return true;
            }
            current = ancestor.parent;
        }
        false
    }

    /// True when opacity or transform changed on this layer or on an
    /// ancestor below the nearest render surface.
    pub fn layer_surface_property_changed(&self, id: LayerId) -> bool {
        let layer = self.get(id);
        if layer.changes.contains(LayerChanges::SURFACE_PROPERTY_CHANGED) {
            return true;
        }
        let mut current = layer.parent;
        while let Some(ancestor) = current {
            let ancestor = self.get(ancestor);
            if ancestor.render_surface.is_some() {
                break;
            }
            if ancestor.changes.contains(LayerChanges::SURFACE_PROPERTY_CHANGED) {
                return true;
            }
            current = ancestor.parent;
        }
        false
    }

    pub fn reset_all_change_tracking_for_subtree(&mut self, id: LayerId) {
        for layer in self.subtree_with_attachments(id) {
            self.get_mut(layer).reset_change_tracking();
        }
    }

    /// Acknowledges a committed scroll offset: the deltas that were sent are
    /// now part of the offset.
    pub fn apply_committed_scroll_offset(&mut self, id: LayerId, offset: Vector2d) {
        let layer = self.get_mut(id);
        let remaining = layer.scroll_delta - layer.sent_scroll_delta.to_f32();
        layer.set_scroll_offset(offset);
        layer.set_scroll_delta(remaining);
        layer.sent_scroll_delta = Vector2d::zero();
    }

    /// Detaches evicted texture resources from every tiled layer.
    pub(crate) fn drop_tile_resources(&mut self, evicted: &HashSet<ResourceId>) -> usize {
        let mut dropped = 0;
        for layer in self.layers.values_mut() {
            if let LayerContent::Tiled(tiled) = &mut layer.content {
                dropped += tiled.drop_resources(evicted);
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_chain() -> LayerTree {
        let mut tree = LayerTree::new();
        for id in 1..=3 {
            tree.insert(Layer::new(LayerId(id)));
        }
        tree.set_root(Some(LayerId(1)));
        tree.add_child(LayerId(1), LayerId(2));
        tree.add_child(LayerId(2), LayerId(3));
        tree.reset_all_change_tracking_for_subtree(LayerId(1));
        tree
    }

    #[test]
    fn scroll_by_clamps_and_returns_remainder() {
        let mut layer = Layer::new(LayerId(1));
        layer.set_scroll_offset(Vector2d::new(5, 0));
        layer.set_max_scroll_offset(Vector2d::new(20, 10));

        let unscrolled = layer.scroll_by(Vector2dF::new(30.0, -3.0));
        assert_eq!(unscrolled, Vector2dF::new(15.0, -3.0));
        assert_eq!(layer.scroll_delta(), Vector2dF::new(15.0, 0.0));

        let unscrolled = layer.scroll_by(Vector2dF::new(-25.0, 4.0));
        assert_eq!(unscrolled, Vector2dF::new(-5.0, 0.0));
        assert_eq!(layer.total_scroll_offset(), Vector2dF::new(0.0, 4.0));
    }

    #[test]
    fn subtree_property_change_reaches_descendants_only() {
        let mut tree = tree_with_chain();
        tree.get_mut(LayerId(2)).set_position(PointF::new(4.0, 4.0));

        assert!(!tree.layer_property_changed(LayerId(1)));
        assert!(tree.layer_property_changed(LayerId(2)));
        assert!(tree.layer_property_changed(LayerId(3)));

        tree.reset_all_change_tracking_for_subtree(LayerId(1));
        assert!(!tree.layer_property_changed(LayerId(3)));
    }

    #[test]
    fn opacity_change_is_a_surface_property_change() {
        let mut tree = tree_with_chain();
        tree.get_mut(LayerId(2)).set_opacity(0.5);
        assert!(!tree.layer_property_changed(LayerId(3)));
        assert!(tree.layer_surface_property_changed(LayerId(3)));
    }

    #[test]
    fn remove_subtree_takes_masks_and_replicas() {
        let mut tree = tree_with_chain();
        tree.insert(Layer::new(LayerId(10)));
        tree.insert(Layer::new(LayerId(11)));
        tree.set_mask_layer(LayerId(3), Some(LayerId(10)));
        tree.set_replica_layer(LayerId(2), Some(LayerId(11)));

        let removed = tree.remove_subtree(LayerId(2));
        assert_eq!(removed.len(), 4);
        assert_eq!(tree.len(), 1);
        assert!(tree.get(LayerId(1)).children().is_empty());
    }

    #[test]
    fn committed_scroll_offset_keeps_unsent_delta() {
        let mut tree = tree_with_chain();
        let layer = tree.get_mut(LayerId(2));
        layer.set_max_scroll_offset(Vector2d::new(100, 100));
        layer.scroll_by(Vector2dF::new(7.5, 0.0));
        layer.set_sent_scroll_delta(Vector2d::new(7, 0));

        tree.apply_committed_scroll_offset(LayerId(2), Vector2d::new(7, 0));
        let layer = tree.get(LayerId(2));
        assert_eq!(layer.scroll_offset(), Vector2d::new(7, 0));
        assert_eq!(layer.scroll_delta(), Vector2dF::new(0.5, 0.0));
        assert_eq!(layer.sent_scroll_delta(), Vector2d::zero());
    }

    #[test]
    fn tile_indices_cover_partial_tiles() {
        let tiled = TiledContent::new(Size::new(10, 10), Color::WHITE);
        assert_eq!(
            tiled.tile_indices_covering(Rect::new(5, 0, 10, 11)),
            vec![(0, 0), (1, 0), (0, 1), (1, 1)]
        );
        assert!(tiled.tile_indices_covering(Rect::default()).is_empty());
    }
}
