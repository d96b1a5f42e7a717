use geometry::Rect;
use render_protocol::{LayerId, RenderPass, RenderPassId, RenderPassIdHashMap, RenderPassList};

/// Everything `prepare_to_draw` produces for one frame.
///
/// Starts empty. The renderer drains both pass containers in `draw_layers`.
#[derive(Debug, Default)]
pub struct Frame {
    pub render_surface_layer_list: Vec<LayerId>,
    pub render_passes: RenderPassList,
    pub render_passes_by_id: RenderPassIdHashMap,
    pub will_draw_layers: Vec<LayerId>,
    pub occluding_screen_space_rects: Vec<Rect>,
    pub non_occluding_screen_space_rects: Vec<Rect>,
    pub contains_incomplete_tile: bool,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_render_pass(&mut self, pass: RenderPass) {
        let id = pass.id;
        let previous = self.render_passes_by_id.insert(id, pass);
        assert!(previous.is_none(), "render pass {id:?} appended twice");
        self.render_passes.push(id);
    }

    pub fn render_pass(&self, id: RenderPassId) -> Option<&RenderPass> {
        self.render_passes_by_id.get(&id)
    }

    pub(crate) fn render_pass_mut(&mut self, id: RenderPassId) -> &mut RenderPass {
        self.render_passes_by_id
            .get_mut(&id)
            .unwrap_or_else(|| panic!("render pass {id:?} missing from frame"))
    }

    /// The pass drawn last, into the root surface.
    pub fn root_render_pass(&self) -> Option<&RenderPass> {
        self.render_passes
            .last()
            .and_then(|id| self.render_passes_by_id.get(id))
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
