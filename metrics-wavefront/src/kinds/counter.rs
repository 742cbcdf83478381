use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

/// A monotonic or bidirectional integer counter.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    inner: Arc<AtomicI64>,
}

impl Counter {
    /// Creates a new `Counter` starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter by `value`.
    pub fn inc(&self, value: i64) {
        self.inner.fetch_add(value, Ordering::AcqRel);
    }

    /// Decrements the counter by `value`.
    pub fn dec(&self, value: i64) {
        self.inner.fetch_sub(value, Ordering::AcqRel);
    }

    /// Sets the counter to an absolute value.
    pub fn set(&self, value: i64) {
        self.inner.store(value, Ordering::Release);
    }

    /// Gets the current value of the counter.
    pub fn count(&self) -> i64 {
        self.inner.load(Ordering::Acquire)
    }

    /// Resets the counter to zero.
    pub fn clear(&self) {
        self.set(0);
    }
}

impl PartialEq for Counter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Counter {}
