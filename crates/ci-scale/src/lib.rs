#![forbid(unsafe_code)]

use std::collections::HashMap;

use ci_types::{CountAggregate, FiveNumberSummary, RateAggregate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScaleError {
    #[error("band padding must be in [0, 1), got {padding}")]
    InvalidPadding { padding: f64 },
    #[error("scale bounds must be finite, got [{lo}, {hi}]")]
    NonFiniteBounds { lo: f64, hi: f64 },
    #[error("band extent must be finite and non-negative, got {extent}")]
    InvalidExtent { extent: f64 },
    #[error("duplicate band key {key:?}")]
    DuplicateKey { key: String },
}

/// A slot assigned to one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub start: f64,
    pub width: f64,
}

impl Band {
    #[must_use]
    pub fn center(&self) -> f64 {
        self.start + self.width / 2.0
    }

    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.width
    }
}

/// Ordinal scale: `N` keys share `[0, extent]` in equal steps of
/// `extent / N`. Each band is `step * (1 - padding)` wide and sits centred in
/// its step, so the `step * padding` gap is split evenly around it.
///
/// Key order is whatever the caller supplies.
#[derive(Debug, Clone, PartialEq)]
pub struct BandScale {
    keys: Vec<String>,
    positions: HashMap<String, usize>,
    extent: f64,
    padding: f64,
}

impl BandScale {
    pub fn new<I, S>(keys: I, extent: f64, padding: f64) -> Result<Self, ScaleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !(0.0..1.0).contains(&padding) {
            return Err(ScaleError::InvalidPadding { padding });
        }
        if !extent.is_finite() || extent < 0.0 {
            return Err(ScaleError::InvalidExtent { extent });
        }

        let mut ordered = Vec::new();
        let mut positions = HashMap::new();
        for key in keys {
            let key = key.into();
            if positions.contains_key(&key) {
                return Err(ScaleError::DuplicateKey { key });
            }
            positions.insert(key.clone(), ordered.len());
            ordered.push(key);
        }

        Ok(Self {
            keys: ordered,
            positions,
            extent,
            padding,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Distance between the starts of adjacent bands; zero for an empty scale.
    #[must_use]
    pub fn step(&self) -> f64 {
        if self.keys.is_empty() {
            0.0
        } else {
            self.extent / self.keys.len() as f64
        }
    }

    #[must_use]
    pub fn bandwidth(&self) -> f64 {
        self.step() * (1.0 - self.padding)
    }

    #[must_use]
    pub fn band(&self, key: &str) -> Option<Band> {
        let index = *self.positions.get(key)?;
        let step = self.step();
        Some(Band {
            start: index as f64 * step + step * self.padding / 2.0,
            width: self.bandwidth(),
        })
    }

    /// Start coordinate of `key`'s band.
    #[must_use]
    pub fn position(&self, key: &str) -> Option<f64> {
        self.band(key).map(|band| band.start)
    }
}

/// Numeric scale mapping `[d0, d1]` onto `[r0, r1]`, clamped at the range
/// edges. A collapsed domain (`d0 == d1`) maps every value to `r0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearScale {
    domain: (f64, f64),
    range: (f64, f64),
}

impl LinearScale {
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Result<Self, ScaleError> {
        for (lo, hi) in [domain, range] {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(ScaleError::NonFiniteBounds { lo, hi });
            }
        }
        Ok(Self { domain, range })
    }

    #[must_use]
    pub fn domain(&self) -> (f64, f64) {
        self.domain
    }

    #[must_use]
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    #[must_use]
    pub fn map(&self, value: f64) -> f64 {
        let (d0, d1) = self.domain;
        let (r0, r1) = self.range;
        if d0 == d1 || value.is_nan() {
            return r0;
        }
        let mapped = r0 + (value - d0) / (d1 - d0) * (r1 - r0);
        mapped.clamp(r0.min(r1), r0.max(r1))
    }

    /// `count + 1` evenly spaced domain values from `d0` to `d1`, for axis
    /// labels. A collapsed domain yields the single value.
    #[must_use]
    pub fn ticks(&self, count: usize) -> Vec<f64> {
        let (d0, d1) = self.domain;
        if d0 == d1 || count == 0 {
            return vec![d0];
        }
        let step = (d1 - d0) / count as f64;
        (0..=count).map(|i| d0 + step * i as f64).collect()
    }
}

/// Domain for charts whose values are rates in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateDomain {
    /// `[0, max observed rate]`, falling back to `[0, 1]` when nothing is
    /// observed above zero.
    #[default]
    ObservedMax,
    Unit,
}

impl RateDomain {
    #[must_use]
    pub fn resolve(self, rates: &[RateAggregate]) -> (f64, f64) {
        match self {
            Self::Unit => (0.0, 1.0),
            Self::ObservedMax => {
                let max = rates.iter().map(|r| r.rate).fold(0.0_f64, f64::max);
                if max > 0.0 { (0.0, max) } else { (0.0, 1.0) }
            }
        }
    }
}

/// Domain for charts of raw quantities (ages, hours).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityDomain {
    /// Smallest `min` to largest `max` across the summaries.
    #[default]
    Observed,
    Fixed { min: f64, max: f64 },
}

impl QuantityDomain {
    #[must_use]
    pub fn resolve(self, summaries: &[FiveNumberSummary]) -> (f64, f64) {
        match self {
            Self::Fixed { min, max } => (min, max),
            Self::Observed => {
                let lo = summaries.iter().map(|s| s.min).fold(f64::INFINITY, f64::min);
                let hi = summaries
                    .iter()
                    .map(|s| s.max)
                    .fold(f64::NEG_INFINITY, f64::max);
                if lo.is_finite() && hi.is_finite() {
                    (lo, hi)
                } else {
                    (0.0, 0.0)
                }
            }
        }
    }
}

/// `[0, largest count]`; `[0, 0]` when there are no counts.
#[must_use]
pub fn count_domain(counts: &[CountAggregate]) -> (f64, f64) {
    let max = counts.iter().map(|c| c.count).max().unwrap_or(0);
    (0.0, max as f64)
}
