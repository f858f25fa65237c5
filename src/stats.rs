use serde::{Deserialize, Serialize};

/// Aggregate counts of the epidemic model after a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpidemicCounts {
    pub step: usize,
    pub infected: usize,
    pub recovered: usize,
    pub susceptible: usize,
    pub vaccinated: usize,
    pub deaths: usize,
    pub alive: usize,
    pub total_infections: usize,
    pub total_recoveries: usize,
}

/// Append-only time series sampled every `sample_every` steps.
#[derive(Debug, Clone)]
pub struct Collector<T> {
    sample_every: usize,
    samples: Vec<T>,
}

impl<T> Collector<T> {
    pub fn new(sample_every: usize) -> Self {
        Self {
            sample_every: sample_every.max(1),
            samples: Vec::new(),
        }
    }

    pub fn is_due(&self, step: usize) -> bool {
        step % self.sample_every == 0
    }

    pub fn push(&mut self, sample: T) -> &T {
        self.samples.push(sample);
        &self.samples[self.samples.len() - 1]
    }

    pub fn samples(&self) -> &[T] {
        &self.samples
    }
}

/// Running mean and variance (Welford).
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
    max: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;

        self.max = self.max.max(val);
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
            max: self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_matches_direct_formulas() {
        let vals = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut acc = Accumulator::new();
        vals.iter().for_each(|&val| acc.add(val));
        let report = acc.report();
        assert!((report.mean - 5.0).abs() < 1e-12);
        assert!((report.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(report.max, 9.0);
    }

    #[test]
    fn collector_samples_at_frequency() {
        let mut series = Collector::new(3);
        for step in 0..10 {
            if series.is_due(step) {
                series.push(step);
            }
        }
        assert_eq!(series.samples(), &[0, 3, 6, 9]);
    }
}
