//! Rate & forecast windows: an ordered series of half-open intervals
//! carrying a value (price or forecast power), with slicing and
//! integration operations used by the charge planner and battery mode
//! decision.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RateWindowError {
    #[error("interval [{0}, {1}) is empty or inverted")]
    InvertedInterval(DateTime<Utc>, DateTime<Utc>),
    #[error("intervals overlap: [{0}, {1}) and [{2}, {3})")]
    Overlap(DateTime<Utc>, DateTime<Utc>, DateTime<Utc>, DateTime<Utc>),
}

/// A single half-open interval `[start, end)` carrying a constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
}

impl RateInterval {
    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// An immutable, cheaply clonable snapshot of sorted, disjoint, half-open
/// intervals. Construction validates ordering and disjointness so every
/// consumer can rely on monotone, non-overlapping intervals.
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    intervals: Arc<[RateInterval]>,
}

impl RateWindow {
    pub fn empty() -> Self {
        Self { intervals: Arc::from(Vec::new()) }
    }

    /// Builds a window from intervals already in start-ascending order.
    /// Rejects inverted or overlapping intervals.
    pub fn from_sorted(intervals: Vec<RateInterval>) -> Result<Self, RateWindowError> {
        for w in intervals.windows(2) {
            let (a, b) = (w[0], w[1]);
            if a.end <= a.start {
                return Err(RateWindowError::InvertedInterval(a.start, a.end));
            }
            if b.start < a.end {
                return Err(RateWindowError::Overlap(a.start, a.end, b.start, b.end));
            }
        }
        if let Some(last) = intervals.last() {
            if last.end <= last.start {
                return Err(RateWindowError::InvertedInterval(last.start, last.end));
            }
        }
        Ok(Self { intervals: Arc::from(intervals) })
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn as_slice(&self) -> &[RateInterval] {
        &self.intervals
    }

    /// Value in effect at an instant, or `None` if `at` falls outside
    /// every interval.
    pub fn at(&self, at: DateTime<Utc>) -> Option<f64> {
        self.intervals.iter().find(|i| i.contains(at)).map(|i| i.value)
    }

    /// Sub-window covering `[from, to)`, splitting boundary intervals so
    /// the returned window exactly covers the requested range (clipped
    /// to whatever source intervals exist).
    pub fn slice(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> RateWindow {
        if to <= from {
            return RateWindow::empty();
        }
        let mut out = Vec::new();
        for i in self.intervals.iter() {
            let start = i.start.max(from);
            let end = i.end.min(to);
            if start < end {
                out.push(RateInterval { start, end, value: i.value });
            }
        }
        RateWindow { intervals: Arc::from(out) }
    }

    /// Intervals sorted ascending by value; ties broken by start time
    /// then by original position, so the ordering is fully deterministic
    /// regardless of the container the caller built this from.
    pub fn sort_by_value_asc(&self) -> Vec<RateInterval> {
        let mut indexed: Vec<(usize, RateInterval)> =
            self.intervals.iter().copied().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| {
            a.value
                .partial_cmp(&b.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.start.cmp(&b.start))
                .then(ia.cmp(ib))
        });
        indexed.into_iter().map(|(_, iv)| iv).collect()
    }

    /// Trapezoidal-equivalent integral over `[from, to)`: since values
    /// are piecewise-constant, this is simply value * duration summed
    /// across the clipped intervals. Units are value * hours.
    pub fn integrate(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        self.slice(from, to)
            .intervals
            .iter()
            .map(|i| i.value * i.duration_hours())
            .sum()
    }
}
