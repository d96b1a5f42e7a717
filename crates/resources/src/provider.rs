use render_protocol::{Color, ResourceId};
use slotmap::SecondaryMap;

use crate::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Missing,
    Pending { blocking: bool },
    InFlight { fence: u64 },
    Ready,
}

#[derive(Debug, Clone, Copy)]
struct ResourceRecord {
    state: UploadState,
    contents: Color,
}

/// Upload pipeline for texture contents.
///
/// Uploads start pending, are flushed to the device with a fence when a frame
/// is drawn, and become ready once that fence has passed. Completion is only
/// ever observed by polling `check_for_completed_uploads`.
#[derive(Debug)]
pub struct ResourceProvider {
    records: SecondaryMap<ResourceId, ResourceRecord>,
    max_blocking_uploads: usize,
    next_fence: u64,
    passed_fence: u64,
    context_lost: bool,
}

impl ResourceProvider {
    pub fn new(max_blocking_uploads: usize) -> Self {
        Self {
            records: SecondaryMap::new(),
            max_blocking_uploads,
            next_fence: 1,
            passed_fence: 0,
            context_lost: false,
        }
    }

    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    pub fn set_context_lost(&mut self) {
        self.context_lost = true;
    }

    pub fn upload_state(&self, id: ResourceId) -> UploadState {
        self.records
            .get(id)
            .map(|record| record.state)
            .unwrap_or(UploadState::Missing)
    }

    /// Contents of a resource whose upload has completed.
    pub fn contents(&self, id: ResourceId) -> Option<Color> {
        self.records
            .get(id)
            .filter(|record| record.state == UploadState::Ready)
            .map(|record| record.contents)
    }

    pub fn blocking_upload_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| matches!(record.state, UploadState::Pending { blocking: true }))
            .count()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| {
                matches!(
                    record.state,
                    UploadState::Pending { .. } | UploadState::InFlight { .. }
                )
            })
            .count()
    }

    pub fn can_begin_blocking_upload(&self) -> bool {
        self.blocking_upload_count() < self.max_blocking_uploads
    }

    pub fn begin_upload(
        &mut self,
        id: ResourceId,
        contents: Color,
        blocking: bool,
    ) -> Result<(), ResourceError> {
        if self.context_lost {
            return Err(ResourceError::ProviderLost);
        }
        let blocking = blocking && self.can_begin_blocking_upload();
        self.records.insert(
            id,
            ResourceRecord {
                state: UploadState::Pending { blocking },
                contents,
            },
        );
        Ok(())
    }

    /// Sends every pending upload to the device behind one new fence.
    pub fn flush_uploads(&mut self) -> Option<u64> {
        if self.context_lost {
            return None;
        }
        let fence = self.next_fence;
        let mut flushed = 0usize;
        for record in self.records.values_mut() {
            if let UploadState::Pending { .. } = record.state {
                record.state = UploadState::InFlight { fence };
                flushed += 1;
            }
        }
        if flushed == 0 {
            return None;
        }
        self.next_fence += 1;
        tracing::trace!(fence, flushed, "flushed uploads");
        Some(fence)
    }

    pub fn mark_fence_passed(&mut self, fence: u64) {
        self.passed_fence = self.passed_fence.max(fence);
    }

    pub fn mark_all_fences_passed(&mut self) {
        self.passed_fence = self.next_fence.saturating_sub(1);
    }

    /// Moves uploads whose fence has passed to ready and returns their ids.
    pub fn check_for_completed_uploads(&mut self) -> Vec<ResourceId> {
        let passed = self.passed_fence;
        let mut completed = Vec::new();
        for (id, record) in self.records.iter_mut() {
            if let UploadState::InFlight { fence } = record.state {
                if fence <= passed {
                    record.state = UploadState::Ready;
                    completed.push(id);
                }
            }
        }
        completed
    }

    pub fn mark_pending_uploads_as_non_blocking(&mut self) {
        for record in self.records.values_mut() {
            if let UploadState::Pending { blocking: true } = record.state {
                record.state = UploadState::Pending { blocking: false };
            }
        }
    }

    pub fn delete_resource(&mut self, id: ResourceId) {
        self.records.remove(id);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
