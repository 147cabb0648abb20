use std::{
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

/// Hands out process-unique ids. Ids are never reused.
#[derive(Debug)]
pub(crate) struct IdGenerator {
    counter: AtomicU64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(NonZeroU64);

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }
}

impl IdGenerator {
    #[inline(always)]
    pub fn create(&self) -> ResourceId {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and a 64-bit counter does not wrap in practice.
        ResourceId(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }
}

impl ResourceId {
    #[inline(always)]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}
