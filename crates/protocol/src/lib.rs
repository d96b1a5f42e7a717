//! Value messages exchanged between the compositor context and the main
//! context. Everything here is plain data; no message borrows compositor
//! state.

use std::collections::HashSet;
use std::hash::Hash;

use geometry::{PointF, Size, Vector2d, Vector2dF};
use render_protocol::LayerId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod priority;

pub trait DedupKey {
    type Key: Eq + Hash;

    fn dedup_key(&self) -> Self::Key;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityCutoff {
    AllowNothing,
    AllowRequiredOnly,
    AllowNiceToHave,
    AllowEverything,
}

impl PriorityCutoff {
    pub fn to_priority(self) -> i32 {
        match self {
            PriorityCutoff::AllowNothing => priority::ALLOW_NOTHING_CUTOFF,
            PriorityCutoff::AllowRequiredOnly => priority::ALLOW_VISIBLE_ONLY_CUTOFF,
            PriorityCutoff::AllowNiceToHave => priority::ALLOW_VISIBLE_AND_NEARBY_CUTOFF,
            PriorityCutoff::AllowEverything => priority::ALLOW_EVERYTHING_CUTOFF,
        }
    }
}

/// Memory budget handed down by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedMemoryPolicy {
    pub bytes_limit_when_visible: usize,
    pub priority_cutoff_when_visible: PriorityCutoff,
    pub bytes_limit_when_not_visible: usize,
    pub priority_cutoff_when_not_visible: PriorityCutoff,
}

impl ManagedMemoryPolicy {
    pub const DEFAULT_BYTES_LIMIT: usize = 64 * 1024 * 1024;

    pub fn new(bytes_limit_when_visible: usize) -> Self {
        Self {
            bytes_limit_when_visible,
            priority_cutoff_when_visible: PriorityCutoff::AllowEverything,
            bytes_limit_when_not_visible: 0,
            priority_cutoff_when_not_visible: PriorityCutoff::AllowNothing,
        }
    }

    pub fn bytes_limit(&self, visible: bool) -> usize {
        if visible {
            self.bytes_limit_when_visible
        } else {
            self.bytes_limit_when_not_visible
        }
    }

    pub fn priority_cutoff(&self, visible: bool) -> i32 {
        if visible {
            self.priority_cutoff_when_visible.to_priority()
        } else {
            self.priority_cutoff_when_not_visible.to_priority()
        }
    }
}

impl Default for ManagedMemoryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BYTES_LIMIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManagedMemoryStats {
    pub bytes_visible: usize,
    pub bytes_visible_and_nearby: usize,
    pub bytes_allocated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerScrollDelta {
    pub layer_id: LayerId,
    pub scroll_delta: Vector2d,
}

/// Scroll and page-scale changes the compositor applied since the last
/// commit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollAndScaleSet {
    pub scrolls: SmallVec<[LayerScrollDelta; 4]>,
    pub page_scale_delta: f32,
}

impl Default for ScrollAndScaleSet {
    fn default() -> Self {
        Self {
            scrolls: SmallVec::new(),
            page_scale_delta: 1.0,
        }
    }
}

impl ScrollAndScaleSet {
    pub fn is_empty(&self) -> bool {
        self.scrolls.is_empty() && self.page_scale_delta == 1.0
    }

    /// Folds a newer set into this one. Per-layer deltas are cumulative since
    /// the last commit, so the newer value for a layer wins.
    pub fn merge_newer(&mut self, newer: ScrollAndScaleSet) {
        for incoming in newer.scrolls {
            match self
                .scrolls
                .iter_mut()
                .find(|existing| existing.layer_id == incoming.layer_id)
            {
                Some(existing) => existing.scroll_delta = incoming.scroll_delta,
                None => self.scrolls.push(incoming),
            }
        }
        self.page_scale_delta = newer.page_scale_delta;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationEventKind {
    Started,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetProperty {
    Transform,
    Opacity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationEvent {
    pub kind: AnimationEventKind,
    pub layer_id: LayerId,
    pub animation_id: u32,
    pub target_property: TargetProperty,
    pub monotonic_time: f64,
}

impl DedupKey for AnimationEvent {
    type Key = (LayerId, u32, AnimationEventKind);

    fn dedup_key(&self) -> Self::Key {
        (self.layer_id, self.animation_id, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollInputType {
    Wheel,
    Gesture,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    ScrollBegin {
        point: PointF,
        input_type: ScrollInputType,
    },
    ScrollBy {
        point: PointF,
        delta: Vector2dF,
    },
    ScrollEnd,
    PinchBegin,
    PinchUpdate {
        magnify_delta: f32,
        anchor: PointF,
    },
    PinchEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MainToImplMsg<Commit> {
    Commit(Commit),
    SetVisible(bool),
    SetViewportSize { layout: Size, device: Size },
    SetManagedMemoryPolicy(ManagedMemoryPolicy),
    Input(InputEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImplToMainMsg {
    NeedsCommit,
    AnimationEvents(Vec<AnimationEvent>),
    ScrollAndScale(ScrollAndScaleSet),
    DidLoseOutputSurface,
    SwapBuffersComplete,
    ManagedMemoryStats(ManagedMemoryStats),
    ContentsTexturesEvicted,
    VSyncParametersChanged {
        timebase_micros: u64,
        interval_micros: u64,
    },
}

/// Feedback accumulated for the main context between two reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedbackFrame {
    pub frame_number: u64,
    pub needs_commit: bool,
    pub output_surface_lost: bool,
    pub scroll_and_scale: Option<ScrollAndScaleSet>,
    pub animation_events: Vec<AnimationEvent>,
    pub memory_stats: Option<ManagedMemoryStats>,
}

impl FeedbackFrame {
    pub fn merge_mailbox(mut current: Self, newer: Self) -> Self {
        current.frame_number = current.frame_number.max(newer.frame_number);
        current.needs_commit |= newer.needs_commit;
        current.output_surface_lost |= newer.output_surface_lost;
        if let Some(incoming) = newer.scroll_and_scale {
            match &mut current.scroll_and_scale {
                Some(existing) => existing.merge_newer(incoming),
                None => current.scroll_and_scale = Some(incoming),
            }
        }
        merge_unique_by_key(&mut current.animation_events, newer.animation_events);
        if newer.memory_stats.is_some() {
            current.memory_stats = newer.memory_stats;
        }
        current
    }

    pub fn apply(&mut self, message: ImplToMainMsg) {
        match message {
            ImplToMainMsg::NeedsCommit | ImplToMainMsg::ContentsTexturesEvicted => {
                self.needs_commit = true;
            }
            ImplToMainMsg::AnimationEvents(events) => {
                merge_unique_by_key(&mut self.animation_events, events);
            }
            ImplToMainMsg::ScrollAndScale(set) => match &mut self.scroll_and_scale {
                Some(existing) => existing.merge_newer(set),
                None => self.scroll_and_scale = Some(set),
            },
            ImplToMainMsg::DidLoseOutputSurface => self.output_surface_lost = true,
            ImplToMainMsg::SwapBuffersComplete => {
                self.frame_number = self.frame_number.saturating_add(1);
            }
            ImplToMainMsg::ManagedMemoryStats(stats) => self.memory_stats = Some(stats),
            ImplToMainMsg::VSyncParametersChanged { .. } => {}
        }
    }
}

fn merge_unique_by_key<T>(current: &mut Vec<T>, incoming: Vec<T>)
where
    T: DedupKey,
{
    let mut existing_keys: HashSet<T::Key> = current.iter().map(T::dedup_key).collect();
    for item in incoming {
        let item_key = item.dedup_key();
        if existing_keys.insert(item_key) {
            current.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;

    fn started(layer: u64, animation_id: u32) -> AnimationEvent {
        AnimationEvent {
            kind: AnimationEventKind::Started,
            layer_id: LayerId(layer),
            animation_id,
            target_property: TargetProperty::Opacity,
            monotonic_time: 1.0,
        }
    }

    fn scroll(layer: u64, x: i32, y: i32) -> LayerScrollDelta {
        LayerScrollDelta {
            layer_id: LayerId(layer),
            scroll_delta: Vector2d::new(x, y),
        }
    }

    #[test]
    fn mailbox_merge_is_idempotent_and_keeps_newest_scrolls() {
        let current = FeedbackFrame {
            frame_number: 10,
            needs_commit: false,
            output_surface_lost: false,
            scroll_and_scale: Some(ScrollAndScaleSet {
                scrolls: smallvec![scroll(1, 3, 0), scroll(2, 0, 5)],
                page_scale_delta: 1.0,
            }),
            animation_events: vec![started(1, 1)],
            memory_stats: None,
        };
        let newer = FeedbackFrame {
            frame_number: 9,
            needs_commit: true,
            output_surface_lost: false,
            scroll_and_scale: Some(ScrollAndScaleSet {
                scrolls: smallvec![scroll(1, 7, 0)],
                page_scale_delta: 1.5,
            }),
            animation_events: vec![started(1, 1), started(2, 1)],
            memory_stats: Some(ManagedMemoryStats {
                bytes_visible: 8,
                bytes_visible_and_nearby: 8,
                bytes_allocated: 16,
            }),
        };

        let once = FeedbackFrame::merge_mailbox(current, newer.clone());
        let twice = FeedbackFrame::merge_mailbox(once.clone(), newer);
        assert_eq!(once.frame_number, 10);
        assert!(once.needs_commit);
        assert_eq!(once.animation_events.len(), 2);
        let scrolls = once.scroll_and_scale.as_ref().expect("scrolls merged");
        assert_eq!(scrolls.scrolls.as_slice(), &[scroll(1, 7, 0), scroll(2, 0, 5)]);
        assert_eq!(scrolls.page_scale_delta, 1.5);
        assert_eq!(once, twice);
    }

    #[test]
    fn apply_folds_messages_into_the_frame() {
        let mut frame = FeedbackFrame::default();
        frame.apply(ImplToMainMsg::ContentsTexturesEvicted);
        frame.apply(ImplToMainMsg::AnimationEvents(vec![started(3, 2)]));
        frame.apply(ImplToMainMsg::AnimationEvents(vec![started(3, 2)]));
        frame.apply(ImplToMainMsg::SwapBuffersComplete);
        frame.apply(ImplToMainMsg::DidLoseOutputSurface);

        assert!(frame.needs_commit);
        assert!(frame.output_surface_lost);
        assert_eq!(frame.animation_events.len(), 1);
        assert_eq!(frame.frame_number, 1);
    }

    #[test]
    fn policy_selects_limits_by_visibility() {
        let policy = ManagedMemoryPolicy {
            bytes_limit_when_visible: 100,
            priority_cutoff_when_visible: PriorityCutoff::AllowNiceToHave,
            bytes_limit_when_not_visible: 10,
            priority_cutoff_when_not_visible: PriorityCutoff::AllowNothing,
        };
        assert_eq!(policy.bytes_limit(true), 100);
        assert_eq!(policy.bytes_limit(false), 10);
        assert_eq!(
            policy.priority_cutoff(true),
            priority::ALLOW_VISIBLE_AND_NEARBY_CUTOFF
        );
        assert_eq!(policy.priority_cutoff(false), i32::MIN);
    }
}
