use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

type GaugeFn = dyn Fn() -> f64 + Send + Sync;

struct Inner {
    value: AtomicU64,
    callback: Option<Box<GaugeFn>>,
}

/// A point-in-time floating-point value.
///
/// A gauge either holds a value that is set directly, or computes its value on every read from a
/// callback given at registration.
#[derive(Clone)]
pub struct Gauge {
    inner: Arc<Inner>,
}

impl Gauge {
    /// Creates a new `Gauge` holding `NaN` until a value is set.
    pub fn new() -> Self {
        Self::with_default(f64::NAN)
    }

    /// Creates a new `Gauge` holding `default` until a value is set.
    pub fn with_default(default: f64) -> Self {
        Self { inner: Arc::new(Inner { value: AtomicU64::new(default.to_bits()), callback: None }) }
    }

    /// Creates a new `Gauge` whose value is computed by `f` on every read.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                value: AtomicU64::new(f64::NAN.to_bits()),
                callback: Some(Box::new(f)),
            }),
        }
    }

    /// Sets the gauge to `value`.
    ///
    /// Has no visible effect on callback gauges.
    pub fn set(&self, value: f64) {
        self.inner.value.store(value.to_bits(), Ordering::Release);
    }

    /// Adds `value` to the gauge.
    pub fn increment(&self, value: f64) {
        self.inner
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |current| {
                Some((f64::from_bits(current) + value).to_bits())
            })
            .expect("should never fail to update gauge");
    }

    /// Subtracts `value` from the gauge.
    pub fn decrement(&self, value: f64) {
        self.increment(-value);
    }

    /// Gets the current value of the gauge.
    pub fn value(&self) -> f64 {
        match &self.inner.callback {
            Some(f) => f(),
            None => f64::from_bits(self.inner.value.load(Ordering::Acquire)),
        }
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Gauge {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge")
            .field("value", &self.value())
            .field("callback", &self.inner.callback.is_some())
            .finish()
    }
}
