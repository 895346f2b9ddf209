use crate::error::{MdpError, Result};

/// Names and resolution of the per-tick feature vector produced by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    resolution: Option<f64>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>, resolution: Option<f64>) -> Result<FeatureSchema> {
        if names.is_empty() {
            return Err(MdpError::InvalidConfig("feature schema has no features".to_string()));
        }
        if let Some(r) = resolution {
            if !(r.is_finite() && r > 0.0) {
                return Err(MdpError::InvalidConfig(format!(
                    "feature resolution must be positive, got {}",
                    r
                )));
            }
        }
        Ok(FeatureSchema { names, resolution })
    }

    /// Traffic light state and normalised distance to the goal, rounded to three decimals.
    pub fn intersection() -> FeatureSchema {
        FeatureSchema {
            names: vec!["lightIsRed".to_string(), "distanceToGoal".to_string()],
            resolution: Some(0.001),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn arity(&self) -> usize {
        self.names.len()
    }

    pub fn resolution(&self) -> Option<f64> {
        self.resolution
    }

    /// Checks arity and finiteness and snaps every value to the resolution grid. Two
    /// observations denote the same state exactly when their canonical vectors are equal.
    pub fn canonicalize(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.arity() {
            return Err(MdpError::FeatureArity {
                expected: self.arity(),
                found: features.len(),
            });
        }
        features
            .iter()
            .zip(self.names.iter())
            .map(|(&value, name)| {
                if !value.is_finite() {
                    return Err(MdpError::NonFiniteFeature {
                        name: name.clone(),
                        value,
                    });
                }
                Ok(match self.resolution {
                    Some(r) => quantize(value, r),
                    None => value,
                })
            })
            .collect()
    }
}

/// Rounds `value` to the nearest multiple of `resolution`. Negative zero is folded into zero.
pub fn quantize(value: f64, resolution: f64) -> f64 {
    let scale = 1.0 / resolution;
    let q = (value * scale).round() / scale;
    if q == 0.0 {
        0.0
    } else {
        q
    }
}
