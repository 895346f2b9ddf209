pub mod capture;
pub mod demonstration;
pub mod features;
pub mod probability;
pub mod recorder;
pub mod registry;
pub mod relation;
pub mod reward;
pub mod trajectory;

use std::fmt;

use crate::error::{MdpError, Result};

/// The two controls the vehicle agent can issue every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    NoBrake = 0,
    Brake = 1,
}

impl Action {
    pub const COUNT: usize = 2;

    /// Index order, matching the action axis of the probability tensor.
    pub const ALL: [Action; 2] = [Action::NoBrake, Action::Brake];

    /// Order in which a capture round exercises the actions: stop first, then go.
    pub const CAPTURE_ORDER: [Action; 2] = [Action::Brake, Action::NoBrake];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Action> {
        match index {
            0 => Ok(Action::NoBrake),
            1 => Ok(Action::Brake),
            x => Err(MdpError::UnknownAction(x)),
        }
    }

    pub fn from_brake(brake: bool) -> Action {
        if brake {
            Action::Brake
        } else {
            Action::NoBrake
        }
    }

    /// Parses an action cell from a trajectory file. Recorders have written the brake flag as
    /// `True`/`False`, `1`/`0` and `1.0`/`0.0`.
    pub fn parse(value: &str) -> Result<Action> {
        let v = value.trim();
        match v.to_ascii_lowercase().as_str() {
            "true" => return Ok(Action::Brake),
            "false" => return Ok(Action::NoBrake),
            _ => {}
        }
        match v.parse::<f64>() {
            Ok(x) if x == 0.0 => Ok(Action::NoBrake),
            Ok(x) if x == 1.0 => Ok(Action::Brake),
            _ => Err(MdpError::InvalidActionValue(value.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", Action::Brake)]
    #[case("0", Action::NoBrake)]
    #[case("1.0", Action::Brake)]
    #[case(" 0.0 ", Action::NoBrake)]
    #[case("True", Action::Brake)]
    #[case("false", Action::NoBrake)]
    fn parse_recorded_action_values(#[case] input: &str, #[case] expected: Action) {
        assert_eq!(Action::parse(input).unwrap(), expected);
    }

    #[test]
    fn parse_rejects_other_values() {
        assert!(Action::parse("2").is_err());
        assert!(Action::parse("brake").is_err());
        assert!(Action::parse("").is_err());
    }

    #[test]
    fn index_round_trip() {
        for a in Action::ALL.iter() {
            assert_eq!(Action::from_index(a.index()).unwrap(), *a);
        }
        assert!(Action::from_index(2).is_err());
    }
}
