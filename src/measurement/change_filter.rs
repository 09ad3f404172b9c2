//! Change-gated emission.

use crate::core::{DecimalPlaces, EmittedWeight};

/// Slack applied to epsilon so that e.g. `10.01 - 10.00` still counts as one unit.
const RESOLUTION_TOLERANCE: f64 = 1e-9;

/// Suppresses readings that differ from the last emitted one by less than
/// one unit at their resolution.
#[derive(Clone, Debug, Default)]
pub struct ChangeFilter {
    baseline: Option<f64>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the weight to emit, or `None` when the change is below epsilon.
    ///
    /// The first reading after construction or [`reset`](Self::reset) is
    /// always emitted.
    pub fn accept(&mut self, value: f64, decimal_places: DecimalPlaces) -> Option<EmittedWeight> {
        if let Some(last) = self.baseline {
            let epsilon = decimal_places.epsilon();
            if (value - last).abs() < epsilon * (1.0 - RESOLUTION_TOLERANCE) {
                return None;
            }
        }
        self.baseline = Some(value);
        Some(EmittedWeight {
            value,
            decimal_places: decimal_places.get(),
        })
    }

    /// Last emitted value, if any.
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Forgets the baseline.
    pub fn reset(&mut self) {
        self.baseline = None;
    }
}
