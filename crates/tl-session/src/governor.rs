//! Work-ahead governor.
//!
//! One governor is shared by every session in the process. A session may
//! transcode faster than realtime only while it holds a [`WorkAheadPermit`];
//! dropping the permit releases the slot on every exit path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounds how many sessions may work ahead at once.
#[derive(Debug)]
pub struct WorkAheadGovernor {
    active: AtomicUsize,
    limit: usize,
}

impl WorkAheadGovernor {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            limit,
        })
    }

    /// Take a work-ahead slot if one is free.
    pub fn try_acquire(self: &Arc<Self>) -> Option<WorkAheadPermit> {
        let limit = self.limit;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < limit).then_some(active + 1)
            })
            .ok()
            .map(|_| WorkAheadPermit {
                governor: Arc::clone(self),
            })
    }

    /// Sessions currently working ahead.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// A held work-ahead slot. Released on drop.
#[derive(Debug)]
pub struct WorkAheadPermit {
    governor: Arc<WorkAheadGovernor>,
}

impl Drop for WorkAheadPermit {
    fn drop(&mut self) {
        self.governor.active.fetch_sub(1, Ordering::AcqRel);
    }
}
