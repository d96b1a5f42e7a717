use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    NeedsUpdate,
    DrawPropertiesComputed,
    PassesBuilt,
    Submitted,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal frame phase transition from {from:?} to {to:?}")]
pub struct PhaseTransitionError {
    pub from: FramePhase,
    pub to: FramePhase,
}

/// Tracks where the current frame is in the prepare/draw cycle.
///
/// Invalidations that arrive while passes are built or submitted are held
/// until the frame completes, so a frame in flight is never torn down.
#[derive(Debug, Clone)]
pub struct FramePhaseTracker {
    phase: FramePhase,
    invalidation_deferred: bool,
}

impl Default for FramePhaseTracker {
    fn default() -> Self {
        Self {
            phase: FramePhase::NeedsUpdate,
            invalidation_deferred: false,
        }
    }
}

impl FramePhaseTracker {
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn has_deferred_invalidation(&self) -> bool {
        self.invalidation_deferred
    }

    pub fn invalidate(&mut self) {
        match self.phase {
            FramePhase::PassesBuilt | FramePhase::Submitted => self.invalidation_deferred = true,
            _ => self.phase = FramePhase::NeedsUpdate,
        }
    }

    pub fn mark_draw_properties_computed(&mut self) -> Result<(), PhaseTransitionError> {
        self.transition(FramePhase::DrawPropertiesComputed, |from| {
            from != FramePhase::Submitted
        })?;
        self.invalidation_deferred = false;
        Ok(())
    }

    pub fn mark_passes_built(&mut self) -> Result<(), PhaseTransitionError> {
        self.transition(FramePhase::PassesBuilt, |from| {
            from == FramePhase::DrawPropertiesComputed
        })
    }

    pub fn mark_submitted(&mut self) -> Result<(), PhaseTransitionError> {
        self.transition(FramePhase::Submitted, |from| from == FramePhase::PassesBuilt)
    }

    pub fn mark_completed(&mut self) -> Result<(), PhaseTransitionError> {
        self.transition(FramePhase::Completed, |from| from == FramePhase::Submitted)?;
        if self.invalidation_deferred {
            self.invalidation_deferred = false;
            self.phase = FramePhase::NeedsUpdate;
        }
        Ok(())
    }

    /// Drops the frame in flight, e.g. after the output surface was lost.
    pub fn abandon_frame(&mut self) {
        self.phase = FramePhase::NeedsUpdate;
        self.invalidation_deferred = false;
    }

    fn transition(
        &mut self,
        to: FramePhase,
        allowed: impl FnOnce(FramePhase) -> bool,
    ) -> Result<(), PhaseTransitionError> {
        let from = self.phase;
        if !allowed(from) {
            return Err(PhaseTransitionError { from, to });
        }
        self.phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_reaches_completed() {
        let mut tracker = FramePhaseTracker::default();
        tracker.mark_draw_properties_computed().expect("compute");
        tracker.mark_passes_built().expect("build");
        tracker.mark_submitted().expect("submit");
        tracker.mark_completed().expect("complete");
        assert_eq!(tracker.phase(), FramePhase::Completed);
    }

    #[test]
    fn submit_requires_built_passes() {
        let mut tracker = FramePhaseTracker::default();
        let error = tracker.mark_submitted().expect_err("cannot submit");
        assert_eq!(
            error,
            PhaseTransitionError {
                from: FramePhase::NeedsUpdate,
                to: FramePhase::Submitted,
            }
        );
    }

    #[test]
    fn invalidation_during_submission_is_applied_on_completion() {
        let mut tracker = FramePhaseTracker::default();
        tracker.mark_draw_properties_computed().expect("compute");
        tracker.mark_passes_built().expect("build");
        tracker.mark_submitted().expect("submit");

        tracker.invalidate();
        assert_eq!(tracker.phase(), FramePhase::Submitted);
        assert!(tracker.has_deferred_invalidation());

        tracker.mark_completed().expect("complete");
        assert_eq!(tracker.phase(), FramePhase::NeedsUpdate);
        assert!(!tracker.has_deferred_invalidation());
    }

    #[test]
    fn invalidation_when_idle_applies_immediately() {
        let mut tracker = FramePhaseTracker::default();
        tracker.mark_draw_properties_computed().expect("compute");
        tracker.invalidate();
        assert_eq!(tracker.phase(), FramePhase::NeedsUpdate);
    }
}
