//! Per-tick animation state: layer property animations, the page-scale
//! animation started by double-tap zoom, and scrollbar fades.

use std::sync::OnceLock;
use std::time::Instant;

use geometry::{SizeF, Transform, Vector2dF};
use protocol::{AnimationEvent, AnimationEventKind, TargetProperty};
use render_protocol::LayerId;

static TIME_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Seconds since the process-wide animation time origin. The origin is fixed
/// by the first call.
pub fn monotonic_seconds(time: Instant) -> f64 {
    let origin = *TIME_ORIGIN.get_or_init(|| time);
    time.saturating_duration_since(origin).as_secs_f64()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnimationCurve {
    Opacity { from: f32, to: f32 },
    Transform { from: Transform, to: Transform },
}

impl AnimationCurve {
    pub fn target_property(&self) -> TargetProperty {
        match self {
            AnimationCurve::Opacity { .. } => TargetProperty::Opacity,
            AnimationCurve::Transform { .. } => TargetProperty::Transform,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    WaitingForStart,
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeAnimation {
    id: u32,
    curve: AnimationCurve,
    duration: f64,
    run_state: RunState,
    start_time: Option<f64>,
}

impl KeyframeAnimation {
    pub fn new(id: u32, curve: AnimationCurve, duration: f64) -> Self {
        Self {
            id,
            curve,
            duration,
            run_state: RunState::WaitingForStart,
            start_time: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn target_property(&self) -> TargetProperty {
        self.curve.target_property()
    }

    fn progress(&self, monotonic_time: f64) -> f64 {
        let start = self.start_time.unwrap_or(monotonic_time);
        if self.duration <= 0.0 {
            return 1.0;
        }
        ((monotonic_time - start) / self.duration).clamp(0.0, 1.0)
    }
}

/// Values produced by one animation tick for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnimatedValues {
    pub opacity: Option<f32>,
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerAnimationController {
    animations: Vec<KeyframeAnimation>,
}

impl LayerAnimationController {
    pub fn add_animation(&mut self, animation: KeyframeAnimation) {
        self.animations.retain(|existing| existing.id != animation.id);
        self.animations.push(animation);
    }

    pub fn remove_animation(&mut self, id: u32) {
        self.animations.retain(|animation| animation.id != id);
    }

    pub fn animations(&self) -> &[KeyframeAnimation] {
        &self.animations
    }

    pub fn has_active_animation(&self) -> bool {
        self.animations
            .iter()
            .any(|animation| animation.run_state != RunState::Finished)
    }

    pub fn is_animating(&self, property: TargetProperty) -> bool {
        self.animations.iter().any(|animation| {
            animation.run_state != RunState::Finished && animation.target_property() == property
        })
    }

    /// Starts waiting animations, advances running ones and drops the ones
    /// that finished. Started and finished events are appended to `events`.
    pub fn animate(
        &mut self,
        layer_id: LayerId,
        monotonic_time: f64,
        events: &mut Vec<AnimationEvent>,
    ) -> AnimatedValues {
        let mut values = AnimatedValues::default();
        for animation in &mut self.animations {
            if animation.run_state == RunState::WaitingForStart {
                animation.run_state = RunState::Running;
                animation.start_time = Some(monotonic_time);
                events.push(event(layer_id, animation, AnimationEventKind::Started, monotonic_time));
            }
            if animation.run_state != RunState::Running {
                continue;
            }
            let progress = animation.progress(monotonic_time) as f32;
            match animation.curve {
                AnimationCurve::Opacity { from, to } => {
                    values.opacity = Some(from + (to - from) * progress);
                }
                AnimationCurve::Transform { from, to } => {
                    values.transform = Some(blend_transforms(&from, &to, progress));
                }
            }
            if progress >= 1.0 {
                animation.run_state = RunState::Finished;
                events.push(event(layer_id, animation, AnimationEventKind::Finished, monotonic_time));
            }
        }
        self.animations
            .retain(|animation| animation.run_state != RunState::Finished);
        values
    }
}

fn event(
    layer_id: LayerId,
    animation: &KeyframeAnimation,
    kind: AnimationEventKind,
    monotonic_time: f64,
) -> AnimationEvent {
    AnimationEvent {
        kind,
        layer_id,
        animation_id: animation.id,
        target_property: animation.target_property(),
        monotonic_time,
    }
}

fn blend_transforms(from: &Transform, to: &Transform, progress: f32) -> Transform {
    let from = from.to_matrix3x3();
    let to = to.to_matrix3x3();
    let mut blended = [[0.0f32; 3]; 3];
    for row in 0..3 {
        for column in 0..3 {
            blended[row][column] = from[row][column] + (to[row][column] - from[row][column]) * progress;
        }
    }
    Transform::from_matrix3x3(blended)
}

/// Animated zoom from the current scroll/scale to a target, used for
/// double-tap zoom.
///
/// With an anchor the zoom keeps that viewport point fixed on screen;
/// without one the scroll offset is interpolated linearly. Page scale is
/// interpolated in log space so the zoom looks uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct PageScaleAnimation {
    scroll_start: Vector2dF,
    page_scale_start: f32,
    window_size: SizeF,
    content_size: SizeF,
    anchor_mode: bool,
    anchor: Vector2dF,
    scroll_end: Vector2dF,
    page_scale_end: f32,
    start_time: f64,
    duration: f64,
}

impl PageScaleAnimation {
    pub fn new(
        scroll_start: Vector2dF,
        page_scale_start: f32,
        window_size: SizeF,
        content_size: SizeF,
        start_time: f64,
    ) -> Self {
        Self {
            scroll_start,
            page_scale_start,
            window_size,
            content_size,
            anchor_mode: false,
            anchor: Vector2dF::zero(),
            scroll_end: scroll_start,
            page_scale_end: page_scale_start,
            start_time,
            duration: 0.0,
        }
    }

    pub fn zoom_to(&mut self, final_scroll: Vector2dF, final_page_scale: f32, duration: f64) {
        if self.page_scale_start == final_page_scale {
            self.scroll_end = final_scroll;
            self.page_scale_end = final_page_scale;
            self.duration = duration;
            self.anchor_mode = false;
            return;
        }
        // The anchor sits at the same ratio along the sides of the start and
        // end rects.
        let scale = self.page_scale_start / final_page_scale;
        let start_width = self.window_size.width;
        let start_height = self.window_size.height;
        let end_x = final_scroll.x * scale;
        let end_y = final_scroll.y * scale;
        let end_width = start_width * scale;
        let end_height = start_height * scale;
        let ratio_x = (self.scroll_start.x - end_x) / (end_width - start_width);
        let ratio_y = (self.scroll_start.y - end_y) / (end_height - start_height);
        let anchor = Vector2dF::new(start_width * ratio_x, start_height * ratio_y);
        self.zoom_with_anchor(anchor, final_page_scale, duration);
    }

    pub fn zoom_with_anchor(&mut self, anchor: Vector2dF, final_page_scale: f32, duration: f64) {
        let scale = final_page_scale / self.page_scale_start;
        let mut scroll_end = (self.scroll_start + anchor).scaled(scale) - anchor;
        scroll_end.clamp_to_min(Vector2dF::zero());
        let scaled_content = self.content_size.scaled(scale);
        let mut max_scroll = Vector2dF::new(
            scaled_content.width - self.window_size.width,
            scaled_content.height - self.window_size.height,
        );
        max_scroll.clamp_to_min(Vector2dF::zero());
        scroll_end.clamp_to_max(max_scroll);

        self.scroll_end = scroll_end;
        self.anchor = anchor;
        self.page_scale_end = final_page_scale;
        self.duration = duration;
        self.anchor_mode = true;
    }

    pub fn target_scroll_offset(&self) -> Vector2dF {
        self.scroll_end
    }

    pub fn target_page_scale_factor(&self) -> f32 {
        self.page_scale_end
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn is_animation_complete_at_time(&self, time: f64) -> bool {
        time >= self.end_time()
    }

    pub fn scroll_offset_at_time(&self, time: f64) -> Vector2dF {
        self.scroll_offset_at_ratio(self.progress_ratio_for_time(time))
    }

    pub fn page_scale_factor_at_time(&self, time: f64) -> f32 {
        self.page_scale_factor_at_ratio(self.progress_ratio_for_time(time))
    }

    fn progress_ratio_for_time(&self, time: f64) -> f32 {
        if self.is_animation_complete_at_time(time) {
            return 1.0;
        }
        ((time - self.start_time) / self.duration) as f32
    }

    fn scroll_offset_at_ratio(&self, ratio: f32) -> Vector2dF {
        if ratio <= 0.0 {
            return self.scroll_start;
        }
        if ratio >= 1.0 {
            return self.scroll_end;
        }
        let current_page_scale = self.page_scale_factor_at_ratio(ratio);
        if self.anchor_mode {
            let document_anchor = (self.scroll_start + self.anchor)
                .scaled(current_page_scale / self.page_scale_start);
            return document_anchor - self.anchor;
        }
        let scaled_start = self
            .scroll_start
            .scaled(current_page_scale / self.page_scale_start);
        let scaled_end = self
            .scroll_end
            .scaled(current_page_scale / self.page_scale_end);
        scaled_start + (scaled_end - scaled_start).scaled(ratio)
    }

    fn page_scale_factor_at_ratio(&self, ratio: f32) -> f32 {
        if ratio <= 0.0 {
            return self.page_scale_start;
        }
        if ratio >= 1.0 {
            return self.page_scale_end;
        }
        let log_diff = (self.page_scale_end / self.page_scale_start).ln() * ratio;
        self.page_scale_start * log_diff.exp()
    }
}

pub const DEFAULT_SCROLLBAR_FADEOUT_DELAY: f64 = 0.3;
pub const DEFAULT_SCROLLBAR_FADEOUT_LENGTH: f64 = 0.3;

/// Linear scrollbar fade: fully visible for `fadeout_delay` seconds after the
/// last scroll, then fading out over `fadeout_length`. Held at full opacity
/// while a pinch is in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollbarAnimationController {
    fadeout_delay: f64,
    fadeout_length: f64,
    last_awaken_time: Option<f64>,
    pinch_gesture_in_effect: bool,
    current_offset: Vector2dF,
    opacity: f32,
}

impl Default for ScrollbarAnimationController {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBAR_FADEOUT_DELAY, DEFAULT_SCROLLBAR_FADEOUT_LENGTH)
    }
}

impl ScrollbarAnimationController {
    pub fn new(fadeout_delay: f64, fadeout_length: f64) -> Self {
        Self {
            fadeout_delay,
            fadeout_length,
            last_awaken_time: None,
            pinch_gesture_in_effect: false,
            current_offset: Vector2dF::zero(),
            opacity: 0.0,
        }
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Returns true while the scrollbar is still visible and needs redraws.
    pub fn animate(&mut self, monotonic_time: f64) -> bool {
        self.opacity = self.opacity_at_time(monotonic_time);
        if self.opacity == 0.0 {
            self.last_awaken_time = None;
        }
        self.opacity > 0.0
    }

    pub fn did_pinch_gesture_begin(&mut self) {
        self.pinch_gesture_in_effect = true;
    }

    pub fn did_pinch_gesture_update(&mut self, _monotonic_time: f64) {
        self.pinch_gesture_in_effect = true;
    }

    pub fn did_pinch_gesture_end(&mut self, monotonic_time: f64) {
        self.pinch_gesture_in_effect = false;
        self.last_awaken_time = Some(monotonic_time);
    }

    pub fn update_scroll_offset_at_time(&mut self, offset: Vector2dF, monotonic_time: f64) {
        if offset == self.current_offset {
            return;
        }
        self.current_offset = offset;
        self.last_awaken_time = Some(monotonic_time);
    }

    fn opacity_at_time(&self, monotonic_time: f64) -> f32 {
        if self.pinch_gesture_in_effect {
            return 1.0;
        }
        let Some(last_awaken_time) = self.last_awaken_time else {
            return 0.0;
        };
        let delta = monotonic_time - last_awaken_time;
        if delta <= self.fadeout_delay {
            return 1.0;
        }
        let fade_end = self.fadeout_delay + self.fadeout_length;
        if delta < fade_end {
            return ((fade_end - delta) / self.fadeout_length) as f32;
        }
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_animation_reports_start_and_finish_once() {
        let layer = LayerId(4);
        let mut controller = LayerAnimationController::default();
        controller.add_animation(KeyframeAnimation::new(
            1,
            AnimationCurve::Opacity { from: 0.0, to: 1.0 },
            2.0,
        ));
        let mut events = Vec::new();

        let values = controller.animate(layer, 10.0, &mut events);
        assert_eq!(values.opacity, Some(0.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AnimationEventKind::Started);
        assert!(controller.is_animating(TargetProperty::Opacity));

        let values = controller.animate(layer, 11.0, &mut events);
        assert_eq!(values.opacity, Some(0.5));
        assert_eq!(events.len(), 1);

        let values = controller.animate(layer, 12.5, &mut events);
        assert_eq!(values.opacity, Some(1.0));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, AnimationEventKind::Finished);
        assert!(!controller.has_active_animation());
    }

    #[test]
    fn transform_animation_blends_translation() {
        let mut controller = LayerAnimationController::default();
        controller.add_animation(KeyframeAnimation::new(
            7,
            AnimationCurve::Transform {
                from: Transform::identity(),
                to: Transform::from_translation(100.0, 0.0),
            },
            1.0,
        ));
        let mut events = Vec::new();
        controller.animate(LayerId(1), 0.0, &mut events);
        let values = controller.animate(LayerId(1), 0.25, &mut events);
        let transform = values.transform.expect("transform value");
        assert_eq!(transform.translation(), Vector2dF::new(25.0, 0.0));
        assert!(controller.is_animating(TargetProperty::Transform));
        assert!(!controller.is_animating(TargetProperty::Opacity));
    }

    #[test]
    fn page_scale_animation_finishes_exactly_at_duration() {
        let mut animation = PageScaleAnimation::new(
            Vector2dF::zero(),
            1.0,
            SizeF::new(100.0, 100.0),
            SizeF::new(400.0, 400.0),
            5.0,
        );
        animation.zoom_with_anchor(Vector2dF::new(50.0, 50.0), 2.0, 1.0);

        assert!(!animation.is_animation_complete_at_time(5.999));
        assert!(animation.is_animation_complete_at_time(6.0));
        assert_eq!(animation.page_scale_factor_at_time(6.0), 2.0);
        assert_eq!(animation.target_scroll_offset(), Vector2dF::new(50.0, 50.0));

        let halfway = animation.page_scale_factor_at_time(5.5);
        assert!((halfway - std::f32::consts::SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn pure_translation_zoom_interpolates_scroll_linearly() {
        let mut animation = PageScaleAnimation::new(
            Vector2dF::zero(),
            1.0,
            SizeF::new(100.0, 100.0),
            SizeF::new(400.0, 400.0),
            0.0,
        );
        animation.zoom_to(Vector2dF::new(40.0, 20.0), 1.0, 2.0);
        assert_eq!(animation.scroll_offset_at_time(1.0), Vector2dF::new(20.0, 10.0));
        assert_eq!(animation.scroll_offset_at_time(3.0), Vector2dF::new(40.0, 20.0));
    }

    #[test]
    fn scrollbar_fades_after_delay_and_holds_during_pinch() {
        let mut scrollbar = ScrollbarAnimationController::new(1.0, 2.0);
        scrollbar.update_scroll_offset_at_time(Vector2dF::new(0.0, 10.0), 0.0);

        assert!(scrollbar.animate(0.5));
        assert_eq!(scrollbar.opacity(), 1.0);
        assert!(scrollbar.animate(2.0));
        assert_eq!(scrollbar.opacity(), 0.5);
        assert!(!scrollbar.animate(3.0));

        scrollbar.did_pinch_gesture_begin();
        assert!(scrollbar.animate(100.0));
        scrollbar.did_pinch_gesture_end(100.0);
        assert!(scrollbar.animate(100.5));
        assert!(!scrollbar.animate(104.0));
    }
}
