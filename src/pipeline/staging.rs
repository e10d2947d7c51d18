use std::collections::BTreeSet;

use crate::gpu::{Accelerator, DeviceRegistry, MemoryHandle};

/// Device groups touched by one facade call.
///
/// Every stage runs with its input kept alive, so until commit the track's
/// previous handle is always still valid.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    created: Vec<MemoryHandle>,
    superseded: Vec<MemoryHandle>,
}

impl Staging {
    pub fn created(&mut self, handle: MemoryHandle) {
        self.created.push(handle);
    }

    pub fn superseded(&mut self, handle: MemoryHandle) {
        self.superseded.push(handle);
    }

    /// Free every group the call left behind, except `current` (the track's
    /// final handle). Groups this call created are always released; `keep`
    /// only spares the groups the track held before the call.
    pub fn commit<A: Accelerator>(
        self,
        registry: &DeviceRegistry<A>,
        current: Option<MemoryHandle>,
        keep: bool,
    ) {
        let superseded = if keep { Vec::new() } else { self.superseded };
        let stale: BTreeSet<MemoryHandle> = self
            .created
            .into_iter()
            .chain(superseded)
            .filter(|&h| Some(h) != current)
            .collect();
        for handle in stale {
            if let Err(e) = registry.free(handle) {
                log::warn!("Could not free superseded {}: {}", handle, e);
            }
        }
    }

    /// Free every group the call created. Groups that existed before the
    /// call are left untouched.
    pub fn rollback<A: Accelerator>(self, registry: &DeviceRegistry<A>) {
        for handle in self.created {
            let _ = registry.free(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HostAccelerator;
    use std::sync::Arc;

    fn registry() -> DeviceRegistry<HostAccelerator> {
        DeviceRegistry::new(Arc::new(HostAccelerator::new()), 1)
    }

    fn group(registry: &DeviceRegistry<HostAccelerator>) -> MemoryHandle {
        registry.push(&[vec![0.0f32; 128]]).unwrap()
    }

    #[test]
    fn test_keep_spares_only_prior_groups() {
        let registry = registry();
        let prior = group(&registry);
        let pushed = group(&registry);
        let output = group(&registry);

        let mut staging = Staging::default();
        staging.created(pushed);
        staging.created(output);
        staging.superseded(prior);
        staging.superseded(pushed);
        staging.superseded(output);
        staging.commit(&registry, None, true);

        assert!(registry.contains(prior));
        assert!(!registry.contains(pushed));
        assert!(!registry.contains(output));
    }

    #[test]
    fn test_commit_keeps_current() {
        let registry = registry();
        let prior = group(&registry);
        let output = group(&registry);

        let mut staging = Staging::default();
        staging.created(output);
        staging.superseded(prior);
        staging.commit(&registry, Some(output), false);

        assert!(!registry.contains(prior));
        assert!(registry.contains(output));
    }

    #[test]
    fn test_rollback_frees_created_only() {
        let registry = registry();
        let prior = group(&registry);
        let created = group(&registry);

        let mut staging = Staging::default();
        staging.created(created);
        staging.superseded(prior);
        staging.rollback(&registry);

        assert!(registry.contains(prior));
        assert_eq!(registry.live_groups(), 1);
    }
}
