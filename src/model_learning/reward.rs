use ndarray::{arr1, Array1};

use super::registry::StateRegistry;
use crate::error::{MdpError, Result};

/// Reward that is linear in the state features, r(s) = phi(s) . w, as produced by the
/// feature-matching reward learner.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearReward {
    weights: Array1<f64>,
}

impl LinearReward {
    pub fn new(weights: &[f64]) -> LinearReward {
        LinearReward {
            weights: arr1(weights),
        }
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn reward(&self, features: &[f64]) -> Result<f64> {
        self.check_arity(features.len())?;
        Ok(arr1(features).dot(&self.weights))
    }

    /// Reward of every registered state, indexed by state id.
    pub fn state_rewards(&self, registry: &StateRegistry) -> Result<Array1<f64>> {
        self.check_arity(registry.schema().arity())?;
        Ok(registry.feature_matrix().dot(&self.weights))
    }

    fn check_arity(&self, found: usize) -> Result<()> {
        if found != self.weights.len() {
            return Err(MdpError::FeatureArity {
                expected: self.weights.len(),
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_learning::features::FeatureSchema;
    use float_eq::assert_float_eq;

    #[test]
    fn rewards_are_feature_dot_weights() {
        let mut registry = StateRegistry::new(FeatureSchema::intersection());
        registry.add_state(&[0.0, 1.0]).unwrap();
        registry.add_state(&[1.0, 0.5]).unwrap();
        let reward = LinearReward::new(&[0.416, -0.476]);
        let r = reward.state_rewards(&registry).unwrap();
        assert_float_eq!(r[0], -0.476, abs <= 1e-12);
        assert_float_eq!(r[1], 0.416 - 0.238, abs <= 1e-12);
        assert_float_eq!(reward.reward(&[1.0, 0.5]).unwrap(), r[1], abs <= 1e-12);
    }

    #[test]
    fn weight_count_must_match_features() {
        let registry = StateRegistry::new(FeatureSchema::intersection());
        let reward = LinearReward::new(&[1.0, -1.0, 0.5]);
        assert!(reward.state_rewards(&registry).is_err());
        assert!(reward.reward(&[1.0]).is_err());
    }
}
