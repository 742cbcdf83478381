//! Concrete metric types.
//!
//! Every type here is a cheap, cloneable handle: clones share the same underlying state, and two
//! handles compare equal only when they point at the same metric.
mod counter;
pub use self::counter::Counter;

mod ewma;

mod gauge;
pub use self::gauge::Gauge;

mod histogram;
pub use self::histogram::{Histogram, HistogramSnapshot};

mod meter;
pub use self::meter::{Meter, MeterSnapshot};

mod timer;
pub use self::timer::{Timer, TimerContext};
