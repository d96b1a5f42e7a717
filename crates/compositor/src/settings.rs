use geometry::Size;
use serde::{Deserialize, Serialize};

/// Overlay and instrumentation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugState {
    pub show_fps_counter: bool,
    pub show_debug_borders: bool,
    pub show_paint_rects: bool,
    pub show_property_changed_rects: bool,
    pub show_surface_damage_rects: bool,
    pub show_screen_space_rects: bool,
    pub show_replica_screen_space_rects: bool,
    pub show_occluding_rects: bool,
    pub show_non_occluding_rects: bool,
    pub continuous_painting: bool,
}

impl DebugState {
    pub fn show_hud_info(&self) -> bool {
        self.show_fps_counter || self.continuous_painting || self.show_hud_rects()
    }

    pub fn show_hud_rects(&self) -> bool {
        self.show_paint_rects
            || self.show_property_changed_rects
            || self.show_surface_damage_rects
            || self.show_screen_space_rects
            || self.show_replica_screen_space_rects
            || self.show_occluding_rects
            || self.show_non_occluding_rects
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorSettings {
    pub accelerated_animation_enabled: bool,
    pub impl_side_painting: bool,
    pub page_scale_pinch_zoom_enabled: bool,
    /// Bounds the number of uploads kept in flight by `manage_tiles`.
    pub num_raster_threads: usize,
    pub minimum_occlusion_tracking_size: Size,
    pub show_overdraw_in_tracing: bool,
    pub can_use_lcd_text: bool,
    pub should_clear_root_render_pass: bool,
    pub max_blocking_uploads: usize,
    pub default_tile_size: Size,
    pub initial_debug_state: DebugState,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            accelerated_animation_enabled: true,
            impl_side_painting: false,
            page_scale_pinch_zoom_enabled: false,
            num_raster_threads: 1,
            minimum_occlusion_tracking_size: Size::default(),
            show_overdraw_in_tracing: false,
            can_use_lcd_text: true,
            should_clear_root_render_pass: true,
            max_blocking_uploads: 256,
            default_tile_size: Size::new(256, 256),
            initial_debug_state: DebugState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: CompositorSettings =
            serde_json::from_str(r#"{ "impl_side_painting": true, "initial_debug_state": { "show_fps_counter": true } }"#)
                .expect("parse settings");
        assert!(settings.impl_side_painting);
        assert!(settings.initial_debug_state.show_fps_counter);
        assert!(settings.initial_debug_state.show_hud_info());
        assert_eq!(settings.max_blocking_uploads, 256);
        assert_eq!(settings.default_tile_size, Size::new(256, 256));
    }
}
