#[cfg(debug_assertions)]
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Shader,
}

/// Debug-build ledger of live device handles. Release builds track nothing
/// and never report.
///
/// The engine tracks buffers and shadow textures. Shaders are owned by the
/// caller, so `Shader` is only recorded by callers that track their own.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    #[cfg(debug_assertions)]
    live: BTreeSet<(ResourceKind, u32)>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub fn track(&mut self, kind: ResourceKind, id: u32) {
        #[cfg(debug_assertions)]
        if !self.live.insert((kind, id)) {
            log::warn!("{:?} #{} tracked twice", kind, id);
        }
    }

    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub fn release(&mut self, kind: ResourceKind, id: u32) {
        #[cfg(debug_assertions)]
        if !self.live.remove(&(kind, id)) {
            log::warn!("{:?} #{} released but was not tracked", kind, id);
        }
    }

    pub fn live_count(&self) -> usize {
        self.leaks().len()
    }

    pub fn leaks(&self) -> Vec<(ResourceKind, u32)> {
        #[cfg(debug_assertions)]
        {
            self.live.iter().copied().collect()
        }
        #[cfg(not(debug_assertions))]
        {
            Vec::new()
        }
    }

    /// Logs one error per handle still alive and returns how many there were.
    pub fn report_leaks(&self) -> usize {
        let leaks = self.leaks();
        for (kind, id) in &leaks {
            log::error!("Leaked {:?} #{} was never released", kind, id);
        }
        leaks.len()
    }
}

#[cfg(all(test, debug_assertions))]
mod tests {
    use super::*;

    #[test]
    fn released_handles_are_not_reported() {
        let mut tracker = ResourceTracker::new();
        tracker.track(ResourceKind::Buffer, 1);
        tracker.track(ResourceKind::Texture, 1);
        tracker.track(ResourceKind::Buffer, 2);
        tracker.release(ResourceKind::Buffer, 1);

        assert_eq!(
            tracker.leaks(),
            vec![(ResourceKind::Buffer, 2), (ResourceKind::Texture, 1)]
        );
        assert_eq!(tracker.report_leaks(), 2);
    }

    #[test]
    fn kinds_do_not_alias() {
        let mut tracker = ResourceTracker::new();
        tracker.track(ResourceKind::Shader, 7);
        tracker.release(ResourceKind::Buffer, 7);
        assert_eq!(tracker.live_count(), 1);
    }
}
