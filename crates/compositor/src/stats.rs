use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

pub const TIME_STAMP_HISTORY_SIZE: usize = 136;
/// Intervals shorter than this only happen when frames are produced faster
/// than the display can show them.
pub const FRAME_TOO_FAST: Duration = Duration::from_micros(1_000_000 / 70);
/// Intervals longer than this mean nothing was animating.
pub const FRAME_TOO_SLOW: Duration = Duration::from_millis(250);
pub const DROPPED_FRAME_TIME: Duration = Duration::from_millis(20);

/// Swap timestamps of recent frames, used for the FPS display and the
/// dropped-frame count.
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    has_impl_thread: bool,
    time_stamps: VecDeque<Duration>,
    frame_count: u64,
    dropped_frame_count: u64,
}

impl FrameRateCounter {
    pub fn new(has_impl_thread: bool) -> Self {
        Self {
            has_impl_thread,
            time_stamps: VecDeque::with_capacity(TIME_STAMP_HISTORY_SIZE),
            frame_count: 0,
            dropped_frame_count: 0,
        }
    }

    pub fn current_frame_number(&self) -> u64 {
        self.frame_count
    }

    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frame_count
    }

    pub fn time_stamp_history_size(&self) -> usize {
        self.time_stamps.len()
    }

    pub fn save_time_stamp(&mut self, time_stamp: Duration, software: bool) {
        if self.time_stamps.len() == TIME_STAMP_HISTORY_SIZE {
            self.time_stamps.pop_front();
        }
        self.time_stamps.push_back(time_stamp);
        self.frame_count += 1;

        let Some(interval) = self.recent_frame_interval(self.time_stamps.len() - 1) else {
            return;
        };
        if self.has_impl_thread && !software && interval > DROPPED_FRAME_TIME {
            self.dropped_frame_count += 1;
        }
    }

    fn recent_frame_interval(&self, index: usize) -> Option<Duration> {
        let current = self.time_stamps.get(index)?;
        let previous = self.time_stamps.get(index.checked_sub(1)?)?;
        Some(current.saturating_sub(*previous))
    }

    fn is_bad_frame_interval(&self, interval: Duration) -> bool {
        let too_fast = if self.has_impl_thread {
            interval.is_zero()
        } else {
            interval < FRAME_TOO_FAST
        };
        too_fast || interval > FRAME_TOO_SLOW
    }

    /// Mean rate over the most recent run of plausible intervals.
    pub fn average_fps(&self) -> f64 {
        let mut frames = 0u32;
        let mut total = Duration::ZERO;
        for index in (1..self.time_stamps.len()).rev() {
            let Some(interval) = self.recent_frame_interval(index) else {
                break;
            };
            if !self.is_bad_frame_interval(interval) {
                frames += 1;
                total += interval;
            } else if frames > 0 {
                break;
            }
        }
        if frames == 0 || total.is_zero() {
            return 0.0;
        }
        f64::from(frames) / total.as_secs_f64()
    }
}

/// Counters reported by `rendering_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RenderingStats {
    pub num_frames_sent_to_screen: u64,
    pub dropped_frame_count: u64,
    pub num_impl_thread_scrolls: u64,
    pub num_main_thread_scrolls: u64,
    pub num_layers_drawn: u64,
    pub num_missing_tiles: u64,
}
