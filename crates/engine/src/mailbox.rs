use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use protocol::{FeedbackFrame, ImplToMainMsg};

/// Main-side end of the feedback channel. Messages are folded into one
/// pending `FeedbackFrame` until the main context takes it.
pub struct FeedbackMailbox {
    receiver: Receiver<ImplToMainMsg>,
    pending: FeedbackFrame,
    disconnected: bool,
}

impl FeedbackMailbox {
    pub fn new(receiver: Receiver<ImplToMainMsg>) -> Self {
        Self {
            receiver,
            pending: FeedbackFrame::default(),
            disconnected: false,
        }
    }

    /// Folds every message already sent. Returns how many were read.
    pub fn poll(&mut self) -> usize {
        let mut received = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    self.pending.apply(message);
                    received += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        received
    }

    /// Waits up to `timeout` for one message, then folds the rest.
    pub fn wait(&mut self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => {
                self.pending.apply(message);
                1 + self.poll()
            }
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                self.disconnected = true;
                0
            }
        }
    }

    pub fn take(&mut self) -> FeedbackFrame {
        self.poll();
        std::mem::take(&mut self.pending)
    }

    /// Puts back a frame the main context could not act on yet. Anything
    /// received since is merged on top of it.
    pub fn requeue(&mut self, frame: FeedbackFrame) {
        let newer = std::mem::take(&mut self.pending);
        self.pending = FeedbackFrame::merge_mailbox(frame, newer);
    }

    pub fn pending(&self) -> &FeedbackFrame {
        &self.pending
    }

    /// The compositor side hung up.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;
    use geometry::Vector2d;
    use pretty_assertions::assert_eq;
    use protocol::{LayerScrollDelta, ManagedMemoryStats, ScrollAndScaleSet};
    use render_protocol::LayerId;
    use smallvec::smallvec;

    use super::*;

    fn scroll(layer: u64, y: i32) -> ImplToMainMsg {
        ImplToMainMsg::ScrollAndScale(ScrollAndScaleSet {
            scrolls: smallvec![LayerScrollDelta {
                layer_id: LayerId(layer),
                scroll_delta: Vector2d::new(0, y),
            }],
            page_scale_delta: 1.0,
        })
    }

    #[test]
    fn messages_fold_into_one_frame() {
        let (sender, receiver) = unbounded();
        let mut mailbox = FeedbackMailbox::new(receiver);
        sender.send(ImplToMainMsg::NeedsCommit).expect("send");
        sender.send(scroll(2, 10)).expect("send");
        sender.send(scroll(2, 25)).expect("send");
        sender.send(ImplToMainMsg::SwapBuffersComplete).expect("send");

        let frame = mailbox.take();
        assert!(frame.needs_commit);
        assert_eq!(frame.frame_number, 1);
        let scroll_and_scale = frame.scroll_and_scale.expect("scroll feedback");
        assert_eq!(scroll_and_scale.scrolls.len(), 1);
        assert_eq!(scroll_and_scale.scrolls[0].scroll_delta, Vector2d::new(0, 25));
        assert_eq!(mailbox.take(), FeedbackFrame::default());
    }

    #[test]
    fn requeued_frame_keeps_newer_memory_stats() {
        let (sender, receiver) = unbounded();
        let mut mailbox = FeedbackMailbox::new(receiver);
        let old_stats = ManagedMemoryStats {
            bytes_allocated: 1,
            ..ManagedMemoryStats::default()
        };
        let new_stats = ManagedMemoryStats {
            bytes_allocated: 2,
            ..ManagedMemoryStats::default()
        };
        sender.send(ImplToMainMsg::ManagedMemoryStats(old_stats)).expect("send");
        let stale = mailbox.take();

        sender.send(ImplToMainMsg::ManagedMemoryStats(new_stats)).expect("send");
        mailbox.poll();
        mailbox.requeue(stale);
        assert_eq!(mailbox.take().memory_stats, Some(new_stats));
    }

    #[test]
    fn dropped_sender_is_reported() {
        let (sender, receiver) = unbounded::<ImplToMainMsg>();
        let mut mailbox = FeedbackMailbox::new(receiver);
        drop(sender);
        assert_eq!(mailbox.wait(Duration::from_millis(1)), 0);
        assert!(mailbox.is_disconnected());
    }
}
