use std::time::Duration;

/// Interval at which meters fold their uncounted events into the moving averages.
pub(crate) const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// An exponentially-weighted moving average of an event rate, in events per second.
#[derive(Debug)]
pub(crate) struct Ewma {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    /// Creates an average that decays over the given number of minutes.
    pub fn minutes(minutes: u64) -> Self {
        let interval = TICK_INTERVAL.as_secs_f64();
        let alpha = 1.0 - (-interval / 60.0 / minutes as f64).exp();
        Self { alpha, rate: 0.0, initialized: false }
    }

    /// Folds `count` events observed over one tick interval into the average.
    pub fn tick(&mut self, count: u64) {
        let instant_rate = count as f64 / TICK_INTERVAL.as_secs_f64();
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }

    /// Gets the current rate in events per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::Ewma;

    #[test]
    fn first_tick_sets_rate() {
        let mut ewma = Ewma::minutes(1);
        ewma.tick(10);
        assert_eq!(ewma.rate(), 2.0);
    }

    #[test]
    fn decays_towards_zero() {
        let mut ewma = Ewma::minutes(1);
        ewma.tick(10);
        for _ in 0..12 {
            ewma.tick(0);
        }
        // One minute of silence leaves roughly 1/e of the original rate.
        assert!((ewma.rate() - 2.0 * (-1.0f64).exp()).abs() < 1e-9);
    }
}
