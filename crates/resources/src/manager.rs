use geometry::Size;
use protocol::{ManagedMemoryPolicy, ManagedMemoryStats, priority};
use render_protocol::ResourceId;
use slotmap::SlotMap;

use crate::{ResourceError, texture_bytes};

#[derive(Debug, Clone)]
struct PrioritizedResource {
    size: Size,
    bytes: usize,
    priority: i32,
    has_backing: bool,
}

/// Hands out texture memory by priority within a byte budget.
///
/// Smaller priorities are more important. A texture may hold a backing only
/// while its priority is at or below the current cutoff; all textures sharing
/// one priority are accepted or rejected together.
#[derive(Debug)]
pub struct PrioritizedResourceManager {
    resources: SlotMap<ResourceId, PrioritizedResource>,
    max_memory_limit_bytes: usize,
    external_priority_cutoff: i32,
    priority_cutoff: i32,
    memory_use_bytes: usize,
}

impl Default for PrioritizedResourceManager {
    fn default() -> Self {
        Self::new(ManagedMemoryPolicy::DEFAULT_BYTES_LIMIT)
    }
}

impl PrioritizedResourceManager {
    pub fn new(max_memory_limit_bytes: usize) -> Self {
        Self {
            resources: SlotMap::with_key(),
            max_memory_limit_bytes,
            external_priority_cutoff: priority::ALLOW_EVERYTHING_CUTOFF,
            priority_cutoff: priority::ALLOW_EVERYTHING_CUTOFF,
            memory_use_bytes: 0,
        }
    }

    pub fn max_memory_limit_bytes(&self) -> usize {
        self.max_memory_limit_bytes
    }

    pub fn set_max_memory_limit_bytes(&mut self, bytes: usize) {
        self.max_memory_limit_bytes = bytes;
    }

    pub fn set_external_priority_cutoff(&mut self, cutoff: i32) {
        self.external_priority_cutoff = cutoff;
    }

    pub fn priority_cutoff(&self) -> i32 {
        self.priority_cutoff
    }

    pub fn memory_use_bytes(&self) -> usize {
        self.memory_use_bytes
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn create_texture(&mut self, size: Size, priority: i32) -> ResourceId {
        self.resources.insert(PrioritizedResource {
            size,
            bytes: texture_bytes(size),
            priority,
            has_backing: false,
        })
    }

    pub fn size(&self, id: ResourceId) -> Option<Size> {
        self.resources.get(id).map(|resource| resource.size)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn set_request_priority(&mut self, id: ResourceId, priority: i32) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource(id))?;
        resource.priority = priority;
        Ok(())
    }

    pub fn has_backing(&self, id: ResourceId) -> bool {
        self.resources
            .get(id)
            .is_some_and(|resource| resource.has_backing)
    }

    pub fn is_above_priority_cutoff(&self, id: ResourceId) -> bool {
        self.resources
            .get(id)
            .is_some_and(|resource| resource.priority <= self.priority_cutoff)
    }

    /// Recomputes the cutoff from the requested priorities and the budget.
    pub fn prioritize_textures(&mut self) {
        let mut ordered: Vec<(i32, ResourceId, usize)> = self
            .resources
            .iter()
            .map(|(id, resource)| (resource.priority, id, resource.bytes))
            .collect();
        ordered.sort_unstable();

        self.priority_cutoff = self.external_priority_cutoff;
        let mut cumulative_bytes = 0usize;
        for (priority, _, bytes) in ordered {
            if priority > self.priority_cutoff {
                break;
            }
            let next = cumulative_bytes.saturating_add(bytes);
            if next > self.max_memory_limit_bytes {
                self.priority_cutoff = priority.saturating_sub(1);
                break;
            }
            cumulative_bytes = next;
        }
        tracing::trace!(
            cutoff = self.priority_cutoff,
            bytes = cumulative_bytes,
            "prioritized textures"
        );
    }

    pub fn acquire_backing(&mut self, id: ResourceId) -> Result<(), ResourceError> {
        let cutoff = self.priority_cutoff;
        let limit = self.max_memory_limit_bytes;
        let memory_use = self.memory_use_bytes;
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource(id))?;
        if resource.has_backing {
            return Ok(());
        }
        let available_bytes = limit.saturating_sub(memory_use);
        if resource.priority > cutoff || resource.bytes > available_bytes {
            return Err(ResourceError::OutOfMemory {
                requested_bytes: resource.bytes,
                available_bytes,
            });
        }
        resource.has_backing = true;
        self.memory_use_bytes = memory_use + resource.bytes;
        Ok(())
    }

    /// Evicts backings above `priority_cutoff`, then the least important ones
    /// until memory use fits in `limit_bytes`. Returns the evicted ids.
    pub fn reduce_memory_to_limits(&mut self, limit_bytes: usize, priority_cutoff: i32) -> Vec<ResourceId> {
        let mut backed: Vec<(i32, ResourceId)> = self
            .resources
            .iter()
            .filter(|(_, resource)| resource.has_backing)
            .map(|(id, resource)| (resource.priority, id))
            .collect();
        backed.sort_unstable_by(|first, second| second.cmp(first));

        let mut evicted = Vec::new();
        for (priority, id) in backed {
            if priority <= priority_cutoff && self.memory_use_bytes <= limit_bytes {
                break;
            }
            self.evict_backing(id);
            evicted.push(id);
        }
        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                memory_use_bytes = self.memory_use_bytes,
                limit_bytes,
                "reduced texture memory"
            );
        }
        evicted
    }

    pub fn release_backing(&mut self, id: ResourceId) {
        self.evict_backing(id);
    }

    pub fn delete_texture(&mut self, id: ResourceId) {
        self.evict_backing(id);
        self.resources.remove(id);
    }

    pub fn clear_all_memory(&mut self) -> Vec<ResourceId> {
        self.reduce_memory_to_limits(0, priority::ALLOW_NOTHING_CUTOFF)
    }

    pub fn memory_stats(&self) -> ManagedMemoryStats {
        let mut stats = ManagedMemoryStats {
            bytes_allocated: self.memory_use_bytes,
            ..ManagedMemoryStats::default()
        };
        for resource in self.resources.values() {
            if resource.priority <= priority::ALLOW_VISIBLE_ONLY_CUTOFF {
                stats.bytes_visible += resource.bytes;
            }
            if resource.priority <= priority::ALLOW_VISIBLE_AND_NEARBY_CUTOFF {
                stats.bytes_visible_and_nearby += resource.bytes;
            }
        }
        stats
    }

    fn evict_backing(&mut self, id: ResourceId) {
        if let Some(resource) = self.resources.get_mut(id) {
            if resource.has_backing {
                resource.has_backing = false;
                self.memory_use_bytes -= resource.bytes;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TILE: Size = Size::new(16, 16);
    const TILE_BYTES: usize = 16 * 16 * 4;

    #[test]
    fn cutoff_rejects_whole_priority_bucket_that_overflows() {
        let mut manager = PrioritizedResourceManager::new(TILE_BYTES * 2);
        let visible = manager.create_texture(TILE, priority::VISIBLE_DRAWS_TO_ROOT_SURFACE);
        let nearby_a = manager.create_texture(TILE, priority::NOT_VISIBLE_BASE);
        let nearby_b = manager.create_texture(TILE, priority::NOT_VISIBLE_BASE);

        manager.prioritize_textures();

        assert!(manager.is_above_priority_cutoff(visible));
        assert!(!manager.is_above_priority_cutoff(nearby_a));
        assert!(!manager.is_above_priority_cutoff(nearby_b));
        assert_eq!(manager.priority_cutoff(), priority::NOT_VISIBLE_BASE - 1);
    }

    #[test]
    fn acquire_backing_fails_below_cutoff() {
        let mut manager = PrioritizedResourceManager::new(TILE_BYTES);
        let first = manager.create_texture(TILE, priority::RENDER_SURFACE);
        let second = manager.create_texture(TILE, priority::LINGERING);
        manager.prioritize_textures();

        manager.acquire_backing(first).expect("budget fits one tile");
        assert_eq!(manager.memory_use_bytes(), TILE_BYTES);
        assert_eq!(
            manager.acquire_backing(second),
            Err(ResourceError::OutOfMemory {
                requested_bytes: TILE_BYTES,
                available_bytes: 0,
            })
        );
    }

    #[test]
    fn reduce_memory_evicts_least_important_first() {
        let mut manager = PrioritizedResourceManager::new(TILE_BYTES * 3);
        let visible = manager.create_texture(TILE, priority::VISIBLE_DRAWS_TO_ROOT_SURFACE);
        let surface = manager.create_texture(TILE, priority::RENDER_SURFACE);
        let lingering = manager.create_texture(TILE, priority::LINGERING);
        manager.prioritize_textures();
        for id in [visible, surface, lingering] {
            manager.acquire_backing(id).expect("fits");
        }

        let evicted = manager.reduce_memory_to_limits(TILE_BYTES * 2, priority::ALLOW_EVERYTHING_CUTOFF);
        assert_eq!(evicted, vec![lingering]);

        let evicted = manager.reduce_memory_to_limits(TILE_BYTES * 2, priority::ALLOW_NOTHING_CUTOFF);
        assert_eq!(evicted, vec![surface, visible]);
        assert_eq!(manager.memory_use_bytes(), 0);
        assert!(manager.contains(visible));
        assert!(!manager.has_backing(visible));
    }

    #[test]
    fn memory_stats_split_by_priority() {
        let mut manager = PrioritizedResourceManager::default();
        let visible = manager.create_texture(TILE, priority::VISIBLE_DRAWS_TO_ROOT_SURFACE);
        manager.create_texture(TILE, priority::NOT_VISIBLE_BASE + 10);
        manager.create_texture(TILE, priority::NOT_VISIBLE_LIMIT);
        manager.prioritize_textures();
        manager.acquire_backing(visible).expect("fits");

        assert_eq!(
            manager.memory_stats(),
            ManagedMemoryStats {
                bytes_visible: TILE_BYTES,
                bytes_visible_and_nearby: TILE_BYTES * 2,
                bytes_allocated: TILE_BYTES,
            }
        );
    }

    #[test]
    fn unknown_resource_is_reported() {
        let mut manager = PrioritizedResourceManager::default();
        let id = manager.create_texture(TILE, 0);
        manager.delete_texture(id);
        assert_eq!(
            manager.set_request_priority(id, 1),
            Err(ResourceError::UnknownResource(id))
        );
    }
}
