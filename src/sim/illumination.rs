//! Time-indexed sunlit fraction driving the top boundary.
//!
//! Orbital models live outside this crate; they hand over either a sampled
//! profile or implement [`IlluminationSource`] directly.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// One sample of the sunlit fraction, held until the next sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IlluminationSample {
    /// Time in s.
    pub time: f64,
    /// Sunlit fraction in [0, 1].
    pub fraction: f64,
}

/// How the boundary samples the profile over one timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IlluminationSampling {
    /// Value at the start of the step.
    #[default]
    StepStart,
    /// Exact mean over the step interval.
    StepAverage,
}

/// Anything that can report the sunlit fraction at a given time.
pub trait IlluminationSource: Send + Sync {
    fn fraction_at(&self, time: f64) -> f64;

    /// Mean sunlit fraction over `[start, end]`.
    fn mean_over(&self, start: f64, _end: f64) -> f64 {
        self.fraction_at(start)
    }

    /// Time span covered by the source, if bounded.
    fn duration(&self) -> Option<f64> {
        None
    }

    /// Fraction applied to the step `[start, start + dt]`.
    fn sample(&self, sampling: IlluminationSampling, start: f64, dt: f64) -> f64 {
        match sampling {
            IlluminationSampling::StepStart => self.fraction_at(start),
            IlluminationSampling::StepAverage => self.mean_over(start, start + dt),
        }
    }
}

/// Piecewise-constant (zero-order hold) sunlit fraction.
///
/// Before the first sample the first value applies, after the last sample
/// the last value is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IlluminationProfile {
    samples: Vec<IlluminationSample>,
}

impl IlluminationProfile {
    /// Validate and wrap samples: non-empty, finite, time non-decreasing,
    /// fractions in [0, 1].
    pub fn new(samples: Vec<IlluminationSample>) -> Result<Self, ConfigurationError> {
        if samples.is_empty() {
            return Err(ConfigurationError::InvalidIllumination(
                "profile has no samples".into(),
            ));
        }
        for (i, s) in samples.iter().enumerate() {
            if !s.time.is_finite() || s.time < 0.0 {
                return Err(ConfigurationError::InvalidIllumination(format!(
                    "sample {i}: time must be finite and non-negative (got {})",
                    s.time
                )));
            }
            if !(0.0..=1.0).contains(&s.fraction) {
                return Err(ConfigurationError::InvalidIllumination(format!(
                    "sample {i}: sunlit fraction must be in [0, 1] (got {})",
                    s.fraction
                )));
            }
        }
        if let Some(i) = samples.windows(2).position(|w| w[1].time < w[0].time) {
            return Err(ConfigurationError::InvalidIllumination(format!(
                "sample {}: time {} precedes {}",
                i + 1,
                samples[i + 1].time,
                samples[i].time
            )));
        }
        Ok(Self { samples })
    }

    /// Same fraction at all times.
    pub fn constant(fraction: f64) -> Result<Self, ConfigurationError> {
        Self::new(vec![IlluminationSample {
            time: 0.0,
            fraction,
        }])
    }

    /// Lit/eclipsed flags sampled at `times`.
    pub fn from_flags(times: &[f64], lit: &[bool]) -> Result<Self, ConfigurationError> {
        if times.len() != lit.len() {
            return Err(ConfigurationError::InvalidIllumination(format!(
                "{} times but {} flags",
                times.len(),
                lit.len()
            )));
        }
        let samples = times
            .iter()
            .zip(lit)
            .map(|(&time, &l)| IlluminationSample {
                time,
                fraction: if l { 1.0 } else { 0.0 },
            })
            .collect();
        Self::new(samples)
    }

    /// Periodic orbit that starts each period in eclipse.
    ///
    /// The profile covers `periods` full orbits; its duration is
    /// `periods * orbit_period`.
    pub fn eclipse_cycle(
        orbit_period: f64,
        eclipse_duration: f64,
        periods: usize,
    ) -> Result<Self, ConfigurationError> {
        if !(orbit_period.is_finite() && orbit_period > 0.0) {
            return Err(ConfigurationError::InvalidIllumination(format!(
                "orbit period must be positive (got {orbit_period})"
            )));
        }
        if !(0.0..=orbit_period).contains(&eclipse_duration) {
            return Err(ConfigurationError::InvalidIllumination(format!(
                "eclipse duration must be in [0, {orbit_period}] s (got {eclipse_duration})"
            )));
        }
        if periods == 0 {
            return Err(ConfigurationError::InvalidIllumination(
                "eclipse cycle needs at least one period".into(),
            ));
        }

        let mut samples = Vec::with_capacity(2 * periods + 1);
        for k in 0..periods {
            let start = k as f64 * orbit_period;
            samples.push(IlluminationSample {
                time: start,
                fraction: 0.0,
            });
            samples.push(IlluminationSample {
                time: start + eclipse_duration,
                fraction: 1.0,
            });
        }
        samples.push(IlluminationSample {
            time: periods as f64 * orbit_period,
            fraction: 0.0,
        });
        Self::new(samples)
    }

    pub fn samples(&self) -> &[IlluminationSample] {
        &self.samples
    }

    /// Time of the last sample in s.
    pub fn end_time(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.time)
    }

    /// Index of the sample in effect at `time`.
    fn active(&self, time: f64) -> usize {
        self.samples
            .partition_point(|s| s.time <= time)
            .saturating_sub(1)
    }
}

impl IlluminationSource for IlluminationProfile {
    fn fraction_at(&self, time: f64) -> f64 {
        self.samples[self.active(time)].fraction
    }

    fn mean_over(&self, start: f64, end: f64) -> f64 {
        if end <= start {
            return self.fraction_at(start);
        }
        let mut acc = 0.0;
        let mut cursor = start;
        while cursor < end {
            let next = self.samples.partition_point(|s| s.time <= cursor);
            let segment_end = self.samples.get(next).map_or(end, |s| s.time.min(end));
            acc += self.fraction_at(cursor) * (segment_end - cursor);
            cursor = segment_end;
        }
        acc / (end - start)
    }

    fn duration(&self) -> Option<f64> {
        let end = self.end_time();
        (end > 0.0).then_some(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: f64, fraction: f64) -> IlluminationSample {
        IlluminationSample { time, fraction }
    }

    #[test]
    fn test_zero_order_hold_lookup() {
        let p = IlluminationProfile::new(vec![
            sample(10.0, 0.2),
            sample(20.0, 1.0),
            sample(30.0, 0.0),
        ])
        .unwrap();
        assert_eq!(p.fraction_at(0.0), 0.2);
        assert_eq!(p.fraction_at(10.0), 0.2);
        assert_eq!(p.fraction_at(19.999), 0.2);
        assert_eq!(p.fraction_at(20.0), 1.0);
        assert_eq!(p.fraction_at(1e6), 0.0);
        assert_eq!(p.duration(), Some(30.0));
    }

    #[test]
    fn test_mean_over_interval() {
        let p = IlluminationProfile::new(vec![sample(0.0, 0.0), sample(10.0, 1.0)]).unwrap();
        assert!((p.mean_over(5.0, 15.0) - 0.5).abs() < 1e-12);
        assert!((p.mean_over(0.0, 10.0)).abs() < 1e-12);
        assert!((p.mean_over(12.0, 20.0) - 1.0).abs() < 1e-12);
        assert_eq!(p.mean_over(7.0, 7.0), 0.0);

        assert_eq!(p.sample(IlluminationSampling::StepStart, 8.0, 4.0), 0.0);
        assert!((p.sample(IlluminationSampling::StepAverage, 8.0, 4.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_eclipse_cycle_shape() {
        let p = IlluminationProfile::eclipse_cycle(5400.0, 1800.0, 5).unwrap();
        assert_eq!(p.duration(), Some(27000.0));
        assert_eq!(p.fraction_at(0.0), 0.0);
        assert_eq!(p.fraction_at(1799.0), 0.0);
        assert_eq!(p.fraction_at(1800.0), 1.0);
        assert_eq!(p.fraction_at(5399.0), 1.0);
        assert_eq!(p.fraction_at(5400.0), 0.0);
        assert!((p.mean_over(0.0, 27000.0) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_and_flags() {
        let c = IlluminationProfile::constant(0.75).unwrap();
        assert_eq!(c.fraction_at(1e9), 0.75);
        assert_eq!(c.duration(), None);

        let f = IlluminationProfile::from_flags(&[0.0, 1.0, 2.0], &[true, false, true]).unwrap();
        assert_eq!(f.fraction_at(1.5), 0.0);
        assert_eq!(f.fraction_at(2.0), 1.0);
        assert!(IlluminationProfile::from_flags(&[0.0], &[true, false]).is_err());
    }

    #[test]
    fn test_invalid_profiles() {
        assert!(IlluminationProfile::new(vec![]).is_err());
        assert!(IlluminationProfile::new(vec![sample(0.0, 1.5)]).is_err());
        assert!(IlluminationProfile::new(vec![sample(f64::NAN, 1.0)]).is_err());
        let err = IlluminationProfile::new(vec![sample(5.0, 1.0), sample(4.0, 0.0)]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidIllumination(_)));
        assert!(IlluminationProfile::eclipse_cycle(100.0, 200.0, 1).is_err());
        assert!(IlluminationProfile::eclipse_cycle(100.0, 20.0, 0).is_err());

        // Repeated times are allowed; the later sample wins.
        let step = IlluminationProfile::new(vec![sample(0.0, 1.0), sample(0.0, 0.0)]).unwrap();
        assert_eq!(step.fraction_at(0.0), 0.0);
    }
}
