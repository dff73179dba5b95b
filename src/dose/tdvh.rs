use crate::error::ConfigurationError;

/// Dose rate delivered to a compartment during a segment, in dose units per second
///
/// Every variant is a pure function of the compartment index.
#[derive(Debug, Clone)]
pub enum DoseRate {
    /// Same rate in every compartment
    Constant(f64),
    /// One rate per compartment index; compartments past the end receive no dose
    PerOrgan(Vec<f64>),
    /// Arbitrary function of the compartment index
    Function(fn(usize) -> f64),
}

impl DoseRate {
    /// Dose rate in compartment `organ`
    #[inline(always)]
    pub fn evaluate(&self, organ: usize) -> f64 {
        match self {
            DoseRate::Constant(rate) => *rate,
            DoseRate::PerOrgan(rates) => rates.get(organ).copied().unwrap_or(0.0),
            DoseRate::Function(f) => f(organ),
        }
    }
}

impl From<f64> for DoseRate {
    fn from(rate: f64) -> Self {
        DoseRate::Constant(rate)
    }
}

impl From<Vec<f64>> for DoseRate {
    fn from(rates: Vec<f64>) -> Self {
        DoseRate::PerOrgan(rates)
    }
}

impl From<fn(usize) -> f64> for DoseRate {
    fn from(f: fn(usize) -> f64) -> Self {
        DoseRate::Function(f)
    }
}

/// One interval of a dose schedule
#[derive(Debug, Clone)]
pub enum Segment {
    /// Irradiation at the given rate
    Dose { duration: f64, rate: DoseRate },
    /// No dose
    Idle { duration: f64 },
}

impl Segment {
    /// Length of the segment, in seconds
    pub fn duration(&self) -> f64 {
        match self {
            Segment::Dose { duration, .. } | Segment::Idle { duration } => *duration,
        }
    }

    /// Dose rate, or `None` for an idle segment
    pub fn rate(&self) -> Option<&DoseRate> {
        match self {
            Segment::Dose { rate, .. } => Some(rate),
            Segment::Idle { .. } => None,
        }
    }
}

/// Time-dependent dose schedule
///
/// An ordered list of segments. Applied at a start time `s`, segment `k` is active on
/// `[s + end[k-1], s + end[k])`, where `end[k]` is the cumulative duration of the first
/// `k + 1` segments. Segments are kept exactly as added; adjacent segments are never merged.
///
/// # Example
///
/// ```
/// use blooddvh::prelude::*;
///
/// let mut tdvh = Tdvh::new();
/// tdvh.add(10.0, Some(DoseRate::Constant(2.0)))
///     .unwrap()
///     .add(10.0, None)
///     .unwrap();
/// assert_eq!(tdvh.total_duration(), 20.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Tdvh {
    segments: Vec<Segment>,
    ends: Vec<f64>,
}

impl Tdvh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schedule from `(duration, rate)` pairs
    pub fn from_segments<I>(segments: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (f64, Option<DoseRate>)>,
    {
        let mut tdvh = Self::new();
        for (duration, rate) in segments {
            tdvh.add(duration, rate)?;
        }
        Ok(tdvh)
    }

    /// Append a segment
    ///
    /// # Arguments
    ///
    /// * `duration` - Segment length in seconds, strictly positive
    /// * `rate` - Dose rate during the segment; `None` for no dose
    pub fn add(
        &mut self,
        duration: f64,
        rate: Option<DoseRate>,
    ) -> Result<&mut Self, ConfigurationError> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ConfigurationError::InvalidDuration {
                context: format!("segment {}", self.segments.len()),
                value: duration,
            });
        }
        let segment = match rate {
            Some(rate) => Segment::Dose { duration, rate },
            None => Segment::Idle { duration },
        };
        self.ends.push(self.total_duration() + duration);
        self.segments.push(segment);
        Ok(self)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of all segment durations, in seconds
    pub fn total_duration(&self) -> f64 {
        self.ends.last().copied().unwrap_or(0.0)
    }

    /// Segment active at `offset` seconds after the start time, with its index
    ///
    /// Returns `None` outside `[0, total_duration)`.
    pub fn segment_at(&self, offset: f64) -> Option<(usize, &Segment)> {
        if offset < 0.0 || offset >= self.total_duration() {
            return None;
        }
        let k = self.ends.partition_point(|&end| end <= offset);
        self.segments.get(k).map(|segment| (k, segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Tdvh {
        Tdvh::from_segments([
            (10.0, Some(DoseRate::Constant(2.0))),
            (10.0, None),
            (10.0, Some(DoseRate::Function(|_| 5.0))),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_non_positive_duration() {
        let mut tdvh = Tdvh::new();
        assert!(matches!(
            tdvh.add(0.0, None),
            Err(ConfigurationError::InvalidDuration { .. })
        ));
        assert!(tdvh.add(-1.0, Some(DoseRate::Constant(1.0))).is_err());
        assert!(tdvh.add(f64::NAN, None).is_err());
        assert!(tdvh.is_empty());
    }

    #[test]
    fn segment_boundaries_are_half_open() {
        let tdvh = schedule();
        assert_eq!(tdvh.total_duration(), 30.0);
        assert_eq!(tdvh.segment_at(0.0).map(|(k, _)| k), Some(0));
        assert_eq!(tdvh.segment_at(9.999).map(|(k, _)| k), Some(0));
        assert_eq!(tdvh.segment_at(10.0).map(|(k, _)| k), Some(1));
        assert_eq!(tdvh.segment_at(29.0).map(|(k, _)| k), Some(2));
        assert!(tdvh.segment_at(30.0).is_none());
        assert!(tdvh.segment_at(-0.5).is_none());
    }

    #[test]
    fn idle_segments_have_no_rate() {
        let tdvh = schedule();
        assert!(tdvh.segments()[1].rate().is_none());
        assert_eq!(tdvh.segments()[2].rate().map(|r| r.evaluate(3)), Some(5.0));
    }

    #[test]
    fn adjacent_segments_are_not_merged() {
        let tdvh = Tdvh::from_segments([(5.0, None), (5.0, None)]).unwrap();
        assert_eq!(tdvh.len(), 2);
    }

    #[test]
    fn per_organ_rates() {
        let rate = DoseRate::from(vec![1.0, 0.5]);
        assert_eq!(rate.evaluate(1), 0.5);
        assert_eq!(rate.evaluate(4), 0.0);
        assert_eq!(DoseRate::from(3.0).evaluate(9), 3.0);
    }
}
