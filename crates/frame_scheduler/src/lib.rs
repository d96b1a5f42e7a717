use std::time::Duration;

mod phase;
mod time_source;

pub use phase::{FramePhase, FramePhaseTracker, PhaseTransitionError};
pub use time_source::DelayBasedTimeSource;

pub const DEFAULT_VSYNC_INTERVAL: Duration = Duration::from_micros(16_667);
pub const LOW_FREQUENCY_ANIMATION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerConfig {
    pub vsync_interval: Duration,
    pub low_frequency_animation_interval: Duration,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            vsync_interval: DEFAULT_VSYNC_INTERVAL,
            low_frequency_animation_interval: LOW_FREQUENCY_ANIMATION_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerInput {
    pub frame_sequence_id: u64,
    pub visible: bool,
    pub can_draw: bool,
    pub needs_redraw: bool,
    pub needs_animate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerUpdateReason {
    Activated,
    Tick,
    BackgroundTick,
    Deactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerDecision {
    pub frame_sequence_id: u64,
    pub scheduler_active: bool,
    pub animate: bool,
    pub draw: bool,
    pub next_tick_interval: Option<Duration>,
    pub update_reason: Option<SchedulerUpdateReason>,
}

/// Decides, once per tick, whether the compositor animates and draws.
///
/// Visible work ticks at the vsync interval. Animations on an invisible
/// compositor keep ticking at the low-frequency interval without drawing.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    config: FrameSchedulerConfig,
    scheduler_active: bool,
}

impl FrameScheduler {
    pub fn new(config: FrameSchedulerConfig) -> Self {
        Self {
            config,
            scheduler_active: false,
        }
    }

    pub fn config(&self) -> FrameSchedulerConfig {
        self.config
    }

    pub fn is_active(&self) -> bool {
        self.scheduler_active
    }

    pub fn schedule_frame(&mut self, input: FrameSchedulerInput) -> FrameSchedulerDecision {
        if self.config.vsync_interval.is_zero() {
            panic!("invalid frame scheduler config: vsync_interval must be non-zero");
        }

        if input.visible && (input.needs_redraw || input.needs_animate) {
            let was_inactive = !self.scheduler_active;
            self.scheduler_active = true;
            tracing::trace!(
                frame = input.frame_sequence_id,
                can_draw = input.can_draw,
                "scheduling visible frame"
            );
            return FrameSchedulerDecision {
                frame_sequence_id: input.frame_sequence_id,
                scheduler_active: true,
                animate: input.needs_animate,
                draw: input.can_draw,
                next_tick_interval: Some(self.config.vsync_interval),
                update_reason: Some(if was_inactive {
                    SchedulerUpdateReason::Activated
                } else {
                    SchedulerUpdateReason::Tick
                }),
            };
        }

        if !input.visible && input.needs_animate {
            self.scheduler_active = true;
            return FrameSchedulerDecision {
                frame_sequence_id: input.frame_sequence_id,
                scheduler_active: true,
                animate: true,
                draw: false,
                next_tick_interval: Some(self.config.low_frequency_animation_interval),
                update_reason: Some(SchedulerUpdateReason::BackgroundTick),
            };
        }

        if self.scheduler_active {
            self.scheduler_active = false;
            return FrameSchedulerDecision {
                frame_sequence_id: input.frame_sequence_id,
                scheduler_active: false,
                animate: false,
                draw: false,
                next_tick_interval: None,
                update_reason: Some(SchedulerUpdateReason::Deactivated),
            };
        }

        FrameSchedulerDecision {
            frame_sequence_id: input.frame_sequence_id,
            scheduler_active: false,
            animate: false,
            draw: false,
            next_tick_interval: None,
            update_reason: None,
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(FrameSchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(frame_sequence_id: u64) -> FrameSchedulerInput {
        FrameSchedulerInput {
            frame_sequence_id,
            visible: true,
            can_draw: true,
            needs_redraw: false,
            needs_animate: false,
        }
    }

    #[test]
    fn activates_on_first_redraw_request() {
        let mut scheduler = FrameScheduler::default();

        let decision = scheduler.schedule_frame(FrameSchedulerInput {
            needs_redraw: true,
            ..input(42)
        });

        assert!(decision.scheduler_active);
        assert!(decision.draw);
        assert!(!decision.animate);
        assert_eq!(decision.next_tick_interval, Some(DEFAULT_VSYNC_INTERVAL));
        assert_eq!(decision.update_reason, Some(SchedulerUpdateReason::Activated));
    }

    #[test]
    fn ticks_while_animating() {
        let mut scheduler = FrameScheduler::default();

        let _first = scheduler.schedule_frame(FrameSchedulerInput {
            needs_animate: true,
            ..input(1)
        });
        let second = scheduler.schedule_frame(FrameSchedulerInput {
            needs_animate: true,
            can_draw: false,
            ..input(2)
        });

        assert!(second.animate);
        assert!(!second.draw);
        assert_eq!(second.update_reason, Some(SchedulerUpdateReason::Tick));
    }

    #[test]
    fn invisible_animation_ticks_at_low_frequency_without_drawing() {
        let mut scheduler = FrameScheduler::default();

        let decision = scheduler.schedule_frame(FrameSchedulerInput {
            visible: false,
            needs_animate: true,
            needs_redraw: true,
            ..input(3)
        });

        assert!(decision.animate);
        assert!(!decision.draw);
        assert_eq!(
            decision.next_tick_interval,
            Some(LOW_FREQUENCY_ANIMATION_INTERVAL)
        );
        assert_eq!(
            decision.update_reason,
            Some(SchedulerUpdateReason::BackgroundTick)
        );
    }

    #[test]
    fn deactivates_once_work_runs_out() {
        let mut scheduler = FrameScheduler::default();

        let _ = scheduler.schedule_frame(FrameSchedulerInput {
            needs_redraw: true,
            ..input(1)
        });
        let decision = scheduler.schedule_frame(input(2));
        assert!(!decision.scheduler_active);
        assert_eq!(
            decision.update_reason,
            Some(SchedulerUpdateReason::Deactivated)
        );

        let idle = scheduler.schedule_frame(input(3));
        assert_eq!(idle.update_reason, None);
        assert_eq!(idle.next_tick_interval, None);
    }
}
