use std::collections::VecDeque;
use std::time::Duration;

use compositor::CompositorClient;
use crossbeam_channel::{Sender, TrySendError};
use protocol::{AnimationEvent, ImplToMainMsg, ManagedMemoryStats};

/// `CompositorClient` for a compositor running on its own thread.
///
/// Requests that concern the compositor thread itself (redraw, tile
/// management, output-surface recovery) are latched for the `FrameDriver`.
/// Everything meant for the main context is sent as `ImplToMainMsg`.
pub struct ChannelClient {
    feedback: Sender<ImplToMainMsg>,
    backlog: VecDeque<ImplToMainMsg>,
    needs_redraw: bool,
    needs_manage_tiles: bool,
    commit_requested: bool,
    output_surface_lost: bool,
    can_draw: bool,
    disconnected: bool,
}

impl ChannelClient {
    pub fn new(feedback: Sender<ImplToMainMsg>) -> Self {
        Self {
            feedback,
            backlog: VecDeque::new(),
            needs_redraw: false,
            needs_manage_tiles: false,
            commit_requested: false,
            output_surface_lost: false,
            can_draw: false,
            disconnected: false,
        }
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    pub fn take_needs_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }

    pub fn take_needs_manage_tiles(&mut self) -> bool {
        std::mem::take(&mut self.needs_manage_tiles)
    }

    pub fn take_commit_requested(&mut self) -> bool {
        std::mem::take(&mut self.commit_requested)
    }

    pub fn take_output_surface_lost(&mut self) -> bool {
        std::mem::take(&mut self.output_surface_lost)
    }

    /// Last can-draw state the compositor reported.
    pub fn can_draw(&self) -> bool {
        self.can_draw
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn send(&mut self, message: ImplToMainMsg) {
        if self.disconnected {
            return;
        }
        if !self.backlog.is_empty() {
            self.backlog.push_back(message);
            self.flush();
            return;
        }
        self.try_send(message);
    }

    /// Retries messages that did not fit in the channel earlier.
    pub fn flush(&mut self) {
        while let Some(message) = self.backlog.pop_front() {
            if !self.try_send(message) {
                break;
            }
        }
    }

    fn try_send(&mut self, message: ImplToMainMsg) -> bool {
        match self.feedback.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::trace!(backlog = self.backlog.len() + 1, "feedback channel full");
                self.backlog.push_front(message);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("main context stopped listening for feedback");
                self.disconnected = true;
                self.backlog.clear();
                false
            }
        }
    }
}

impl CompositorClient for ChannelClient {
    fn set_needs_redraw_on_impl_thread(&mut self) {
        self.needs_redraw = true;
    }

    fn set_needs_commit_on_impl_thread(&mut self) {
        if !self.commit_requested {
            self.commit_requested = true;
            self.send(ImplToMainMsg::NeedsCommit);
        }
    }

    fn set_needs_manage_tiles_on_impl_thread(&mut self) {
        self.needs_manage_tiles = true;
    }

    fn on_can_draw_state_changed(&mut self, can_draw: bool) {
        self.can_draw = can_draw;
    }

    fn did_lose_output_surface_on_impl_thread(&mut self) {
        self.output_surface_lost = true;
        self.send(ImplToMainMsg::DidLoseOutputSurface);
    }

    fn on_swap_buffers_complete_on_impl_thread(&mut self) {
        self.send(ImplToMainMsg::SwapBuffersComplete);
    }

    fn post_animation_events_to_main_thread_on_impl_thread(
        &mut self,
        events: Vec<AnimationEvent>,
        _wall_clock_time: f64,
    ) {
        self.send(ImplToMainMsg::AnimationEvents(events));
    }

    /// Contents textures live in the main context, which cannot evict
    /// synchronously from here.
    fn reduce_contents_texture_memory_on_impl_thread(&mut self, _limit_bytes: usize, _priority_cutoff: i32) -> bool {
        false
    }

    fn send_managed_memory_stats(&mut self, stats: ManagedMemoryStats) {
        self.send(ImplToMainMsg::ManagedMemoryStats(stats));
    }

    fn on_vsync_parameters_changed(&mut self, timebase: Duration, interval: Duration) {
        self.send(ImplToMainMsg::VSyncParametersChanged {
            timebase_micros: u64::try_from(timebase.as_micros()).unwrap_or(u64::MAX),
            interval_micros: u64::try_from(interval.as_micros()).unwrap_or(u64::MAX),
        });
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn messages_that_do_not_fit_wait_in_order() {
        let (sender, receiver) = bounded(1);
        let mut client = ChannelClient::new(sender);
        client.on_swap_buffers_complete_on_impl_thread();
        client.set_needs_commit_on_impl_thread();
        client.did_lose_output_surface_on_impl_thread();
        assert_eq!(client.backlog_len(), 2);

        assert_eq!(receiver.try_recv(), Ok(ImplToMainMsg::SwapBuffersComplete));
        client.flush();
        assert_eq!(receiver.try_recv(), Ok(ImplToMainMsg::NeedsCommit));
        client.flush();
        assert_eq!(receiver.try_recv(), Ok(ImplToMainMsg::DidLoseOutputSurface));
        assert_eq!(client.backlog_len(), 0);
    }

    #[test]
    fn commit_request_is_sent_once_until_taken() {
        let (sender, receiver) = bounded(8);
        let mut client = ChannelClient::new(sender);
        client.set_needs_commit_on_impl_thread();
        client.set_needs_commit_on_impl_thread();
        assert!(client.take_commit_requested());
        client.set_needs_commit_on_impl_thread();

        assert_eq!(receiver.try_iter().count(), 2);
    }

    #[test]
    fn local_requests_are_latched_not_sent() {
        let (sender, receiver) = bounded(8);
        let mut client = ChannelClient::new(sender);
        client.set_needs_redraw_on_impl_thread();
        client.set_needs_manage_tiles_on_impl_thread();
        client.on_can_draw_state_changed(true);

        assert!(receiver.is_empty());
        assert!(client.take_needs_redraw());
        assert!(!client.take_needs_redraw());
        assert!(client.take_needs_manage_tiles());
        assert!(client.can_draw());
    }
}
