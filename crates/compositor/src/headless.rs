//! CPU renderer and output surface for running without a GPU.
//!
//! Passes are painted into RGBA8 buffers. Every target pixel is mapped back
//! into quad space, so any invertible affine transform is handled.

use std::collections::HashMap;

use geometry::{PointF, Rect, Size};
use protocol::ManagedMemoryStats;
use render_protocol::{
    Color, DrawQuad, DrawQuadMaterial, RenderPass, RenderPassId, RenderPassIdHashMap, RenderPassList,
    RendererCapabilities, RendererKind, SharedQuadState,
};
use resources::ResourceProvider;

use crate::output::{OutputSurface, OutputSurfaceCapabilities, Renderer};
use crate::quad::DEFAULT_CHECKERBOARD_COLOR;

const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PixelBuffer {
    size: Size,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    fn new(size: Size) -> Self {
        let width = usize::try_from(size.width.max(0)).unwrap_or(0);
        let height = usize::try_from(size.height.max(0)).unwrap_or(0);
        Self {
            size,
            pixels: vec![0; width * height * BYTES_PER_PIXEL],
        }
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.size.width || y >= self.size.height {
            return None;
        }
        let width = usize::try_from(self.size.width).ok()?;
        let x = usize::try_from(x).ok()?;
        let y = usize::try_from(y).ok()?;
        Some((y * width + x) * BYTES_PER_PIXEL)
    }

    fn get(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        let offset = self.offset(x, y)?;
        let mut pixel = [0; 4];
        pixel.copy_from_slice(&self.pixels[offset..offset + BYTES_PER_PIXEL]);
        Some(pixel)
    }

    /// Source-over blend of a straight-alpha RGBA pixel.
    fn blend(&mut self, x: i32, y: i32, source: [u8; 4], opacity: f32) {
        let Some(offset) = self.offset(x, y) else {
            return;
        };
        let alpha = f32::from(source[3]) / 255.0 * opacity;
        if alpha <= 0.0 {
            return;
        }
        let destination = &mut self.pixels[offset..offset + BYTES_PER_PIXEL];
        let destination_alpha = f32::from(destination[3]) / 255.0;
        let out_alpha = alpha + destination_alpha * (1.0 - alpha);
        for channel in 0..3 {
            let src = f32::from(source[channel]);
            let dst = f32::from(destination[channel]);
            let value = if out_alpha > 0.0 {
                (src * alpha + dst * destination_alpha * (1.0 - alpha)) / out_alpha
            } else {
                0.0
            };
            destination[channel] = value.round().clamp(0.0, 255.0) as u8;
        }
        destination[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    fn clear(&mut self, color: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.copy_from_slice(&color);
        }
    }
}

fn rgba(color: Color) -> [u8; 4] {
    [color.red(), color.green(), color.blue(), color.alpha()]
}

/// Renderer that paints into memory.
#[derive(Debug)]
pub struct SoftwareRenderer {
    viewport_size: Size,
    framebuffer: PixelBuffer,
    pass_textures: HashMap<RenderPassId, PixelBuffer>,
    visible: bool,
    context_lost: bool,
    frames_drawn: u64,
    swap_count: u64,
    frame_acks: u64,
    last_memory_stats: Option<ManagedMemoryStats>,
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            viewport_size: Size::default(),
            framebuffer: PixelBuffer::new(Size::default()),
            pass_textures: HashMap::new(),
            visible: true,
            context_lost: false,
            frames_drawn: 0,
            swap_count: 0,
            frame_acks: 0,
            last_memory_stats: None,
        }
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn swap_count(&self) -> u64 {
        self.swap_count
    }

    pub fn last_memory_stats(&self) -> Option<ManagedMemoryStats> {
        self.last_memory_stats
    }

    /// Simulates losing the device.
    pub fn lose_context(&mut self) {
        self.context_lost = true;
    }

    fn draw_pass(
        &mut self,
        pass: &RenderPass,
        is_root: bool,
        resources: &ResourceProvider,
    ) {
        let output_rect = pass.output_rect;
        let mut target = if is_root {
            std::mem::replace(&mut self.framebuffer, PixelBuffer::new(Size::default()))
        } else {
            PixelBuffer::new(output_rect.size())
        };
        if pass.has_transparent_background {
            target.clear([0, 0, 0, 0]);
        }
        for quad in pass.quads_back_to_front() {
            let state = pass.shared_quad_state(quad);
            self.draw_quad(&mut target, output_rect, quad, state, resources);
        }
        if is_root {
            self.framebuffer = target;
        } else {
            self.pass_textures.insert(pass.id, target);
        }
    }

    fn draw_quad(
        &self,
        target: &mut PixelBuffer,
        output_rect: Rect,
        quad: &DrawQuad,
        state: &SharedQuadState,
        resources: &ResourceProvider,
    ) {
        let transform = state.content_to_target_transform;
        let Some(inverse) = transform.inverse() else {
            return;
        };
        let mut bounds = transform.map_rect(quad.visible_rect.to_f32()).to_enclosing_rect();
        if state.is_clipped {
            bounds = bounds.intersect(&state.clip_rect);
        }
        bounds = bounds.intersect(&output_rect);
        if bounds.is_empty() {
            return;
        }
        let texture = match &quad.material {
            DrawQuadMaterial::RenderPass { render_pass_id, .. } => match self.pass_textures.get(render_pass_id) {
                Some(texture) => Some(texture),
                None => return,
            },
            _ => None,
        };
        for y in bounds.y..bounds.bottom() {
            for x in bounds.x..bounds.right() {
                let center = PointF::new(x as f32 + 0.5, y as f32 + 0.5);
                let source = inverse.map_point(center);
                let (qx, qy) = (source.x.floor() as i32, source.y.floor() as i32);
                let visible = quad.visible_rect;
                if qx < visible.x || qy < visible.y || qx >= visible.right() || qy >= visible.bottom() {
                    continue;
                }
                let Some(pixel) = sample(quad, texture, qx, qy, resources) else {
                    continue;
                };
                target.blend(x - output_rect.x, y - output_rect.y, pixel, state.opacity);
            }
        }
    }
}

fn sample(
    quad: &DrawQuad,
    texture: Option<&PixelBuffer>,
    x: i32,
    y: i32,
    resources: &ResourceProvider,
) -> Option<[u8; 4]> {
    match &quad.material {
        DrawQuadMaterial::SolidColor { color } | DrawQuadMaterial::Checkerboard { color } => Some(rgba(*color)),
        DrawQuadMaterial::Tile { resource_id } => Some(rgba(
            resources
                .contents(*resource_id)
                .unwrap_or(DEFAULT_CHECKERBOARD_COLOR),
        )),
        DrawQuadMaterial::RenderPass { .. } => {
            let rect = quad.rect;
            texture?.get(x - rect.x, y - rect.y)
        }
        DrawQuadMaterial::DebugBorder { color, width } => {
            let rect = quad.rect;
            let on_border = x < rect.x + width
                || y < rect.y + width
                || x >= rect.right() - width
                || y >= rect.bottom() - width;
            on_border.then(|| rgba(*color))
        }
    }
}

impl Renderer for SoftwareRenderer {
    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities {
            using_partial_swap: false,
            using_set_visibility: true,
            using_swap_complete_callback: false,
            ..RendererCapabilities::default()
        }
    }

    fn kind(&self) -> RendererKind {
        RendererKind::Software
    }

    fn decide_render_pass_allocations_for_frame(
        &mut self,
        render_passes: &RenderPassList,
        render_passes_by_id: &RenderPassIdHashMap,
    ) {
        self.pass_textures.retain(|id, texture| {
            render_passes_by_id
                .get(id)
                .is_some_and(|pass| render_passes.contains(id) && pass.output_rect.size() == texture.size)
        });
    }

    fn have_cached_resources_for_render_pass_id(&self, id: RenderPassId) -> bool {
        self.pass_textures.contains_key(&id)
    }

    fn draw_frame(
        &mut self,
        render_passes: &mut RenderPassList,
        render_passes_by_id: &mut RenderPassIdHashMap,
        resources: &ResourceProvider,
    ) {
        if self.framebuffer.size != self.viewport_size {
            self.framebuffer = PixelBuffer::new(self.viewport_size);
        }
        let root = render_passes.last().copied();
        for id in render_passes.iter() {
            if let Some(pass) = render_passes_by_id.get(id) {
                self.draw_pass(pass, Some(*id) == root, resources);
            }
        }
        render_passes.clear();
        render_passes_by_id.clear();
        self.frames_drawn += 1;
    }

    fn finish(&mut self) {}

    fn swap_buffers(&mut self) -> bool {
        if self.context_lost {
            return false;
        }
        self.swap_count += 1;
        true
    }

    fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    fn viewport_changed(&mut self, device_viewport_size: Size) {
        self.viewport_size = device_viewport_size;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if !visible {
            self.pass_textures.clear();
        }
    }

    fn get_framebuffer_pixels(&mut self, rect: Rect) -> Option<Vec<u8>> {
        if rect.is_empty() || !Rect::from_size(self.framebuffer.size).contains_rect(&rect) {
            return None;
        }
        let mut pixels = Vec::with_capacity(resources::texture_bytes(rect.size()));
        for y in rect.y..rect.bottom() {
            let start = self.framebuffer.offset(rect.x, y)?;
            let end = start + usize::try_from(rect.width).ok()? * BYTES_PER_PIXEL;
            pixels.extend_from_slice(&self.framebuffer.pixels[start..end]);
        }
        Some(pixels)
    }

    fn send_managed_memory_stats(&mut self, stats: ManagedMemoryStats) {
        self.last_memory_stats = Some(stats);
    }

    fn receive_compositor_frame_ack(&mut self) {
        self.frame_acks += 1;
    }
}

/// Output surface backed by a software device.
#[derive(Debug)]
pub struct HeadlessOutputSurface {
    bound: bool,
}

impl Default for HeadlessOutputSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessOutputSurface {
    pub fn new() -> Self {
        Self { bound: false }
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }
}

impl OutputSurface for HeadlessOutputSurface {
    fn bind_to_client(&mut self) -> bool {
        self.bound = true;
        true
    }

    fn capabilities(&self) -> OutputSurfaceCapabilities {
        OutputSurfaceCapabilities {
            has_software_device: true,
            ..OutputSurfaceCapabilities::default()
        }
    }

    fn create_renderer(&mut self, kind: RendererKind) -> Option<Box<dyn Renderer>> {
        match kind {
            RendererKind::Software => Some(Box::new(SoftwareRenderer::new())),
            RendererKind::Delegating | RendererKind::Gl => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use geometry::{RectF, Transform};
    use render_protocol::LayerId;

    use super::*;

    fn solid_pass(id: RenderPassId, output: Rect, quad_rect: Rect, color: Color, transform: Transform) -> RenderPass {
        let mut pass = RenderPass::new(id, output, RectF::default(), Transform::identity());
        let index = pass.append_shared_quad_state(SharedQuadState {
            content_to_target_transform: transform,
            ..SharedQuadState::default()
        });
        pass.append_quad(DrawQuad::new(DrawQuadMaterial::SolidColor { color }, quad_rect, quad_rect, index));
        pass
    }

    #[test]
    fn paints_solid_quads_into_the_framebuffer() {
        let mut renderer = SoftwareRenderer::new();
        renderer.viewport_changed(Size::new(4, 4));
        let root = RenderPassId::new(LayerId(1), 0);
        let mut list = vec![root];
        let mut by_id = RenderPassIdHashMap::new();
        by_id.insert(
            root,
            solid_pass(
                root,
                Rect::new(0, 0, 4, 4),
                Rect::new(0, 0, 2, 2),
                Color::from_argb(255, 255, 0, 0),
                Transform::from_translation(1.0, 1.0),
            ),
        );

        renderer.draw_frame(&mut list, &mut by_id, &ResourceProvider::new(1));

        assert!(list.is_empty() && by_id.is_empty());
        let pixels = renderer
            .get_framebuffer_pixels(Rect::new(0, 0, 4, 4))
            .expect("framebuffer covers the viewport");
        let at = |x: usize, y: usize| &pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(0, 0), &[0, 0, 0, 0]);
        assert_eq!(at(1, 1), &[255, 0, 0, 255]);
        assert_eq!(at(2, 2), &[255, 0, 0, 255]);
        assert_eq!(at(3, 3), &[0, 0, 0, 0]);
    }

    #[test]
    fn child_passes_are_cached_until_allocation_drops_them() {
        let mut renderer = SoftwareRenderer::new();
        renderer.viewport_changed(Size::new(4, 4));
        let child = RenderPassId::new(LayerId(2), 0);
        let root = RenderPassId::new(LayerId(1), 0);
        let mut list = vec![child, root];
        let mut by_id = RenderPassIdHashMap::new();
        by_id.insert(
            child,
            solid_pass(child, Rect::new(0, 0, 2, 2), Rect::new(0, 0, 2, 2), Color::WHITE, Transform::identity()),
        );
        by_id.insert(
            root,
            solid_pass(root, Rect::new(0, 0, 4, 4), Rect::new(0, 0, 4, 4), Color::BLACK, Transform::identity()),
        );
        renderer.decide_render_pass_allocations_for_frame(&list, &by_id);
        renderer.draw_frame(&mut list, &mut by_id, &ResourceProvider::new(1));
        assert!(renderer.have_cached_resources_for_render_pass_id(child));

        renderer.decide_render_pass_allocations_for_frame(&vec![root], &RenderPassIdHashMap::new());
        assert!(!renderer.have_cached_resources_for_render_pass_id(child));
    }

    #[test]
    fn headless_surface_only_creates_software_renderers() {
        let mut surface = HeadlessOutputSurface::new();
        assert!(surface.bind_to_client());
        assert_eq!(
            surface.capabilities().preferred_renderer_kind(),
            Some(RendererKind::Software)
        );
        assert!(surface.create_renderer(RendererKind::Gl).is_none());
        assert!(surface.create_renderer(RendererKind::Software).is_some());
    }
}
