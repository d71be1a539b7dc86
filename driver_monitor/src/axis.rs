use std::{fmt, str::FromStr};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize,
)]
pub enum AxisId {
    X,
    Y,
    Z,
    X2,
    Y2,
    Z2,
    E0,
    E1,
    E2,
    E3,
    E4,
}

impl AxisId {
    pub const ALL: [AxisId; 11] = [
        AxisId::X,
        AxisId::Y,
        AxisId::Z,
        AxisId::X2,
        AxisId::Y2,
        AxisId::Z2,
        AxisId::E0,
        AxisId::E1,
        AxisId::E2,
        AxisId::E3,
        AxisId::E4,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AxisId::X => "X",
            AxisId::Y => "Y",
            AxisId::Z => "Z",
            AxisId::X2 => "X2",
            AxisId::Y2 => "Y2",
            AxisId::Z2 => "Z2",
            AxisId::E0 => "E0",
            AxisId::E1 => "E1",
            AxisId::E2 => "E2",
            AxisId::E3 => "E3",
            AxisId::E4 => "E4",
        }
    }

    /// G-code axis letter this driver moves; dual drivers share the letter
    /// of their primary axis.
    pub fn letter(self) -> AxisFilter {
        match self {
            AxisId::X | AxisId::X2 => AxisFilter::X,
            AxisId::Y | AxisId::Y2 => AxisFilter::Y,
            AxisId::Z | AxisId::Z2 => AxisFilter::Z,
            _ => AxisFilter::E,
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown axis: {0}")]
pub struct AxisParseError(String);

impl FromStr for AxisId {
    type Err = AxisParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AxisId::ALL
            .into_iter()
            .find(|axis| axis.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| AxisParseError(s.to_string()))
    }
}

bitflags! {
    /// Axis letters named on a command line. Empty selects every axis.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AxisFilter: u8 {
        const X = 0b0001;
        const Y = 0b0010;
        const Z = 0b0100;
        const E = 0b1000;
    }
}

impl AxisFilter {
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'X' => Some(AxisFilter::X),
            'Y' => Some(AxisFilter::Y),
            'Z' => Some(AxisFilter::Z),
            'E' => Some(AxisFilter::E),
            _ => None,
        }
    }

    pub fn matches(&self, axis: AxisId) -> bool {
        self.is_empty() || self.contains(axis.letter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_back() {
        for axis in AxisId::ALL {
            assert_eq!(axis.label().parse::<AxisId>().unwrap(), axis);
        }
        assert!("W".parse::<AxisId>().is_err());
    }

    #[test]
    fn empty_filter_selects_everything() {
        let filter = AxisFilter::empty();
        assert!(AxisId::ALL.iter().all(|axis| filter.matches(*axis)));
    }

    #[test]
    fn filter_selects_dual_and_extruder_drivers() {
        let filter = AxisFilter::X | AxisFilter::E;
        assert!(filter.matches(AxisId::X));
        assert!(filter.matches(AxisId::X2));
        assert!(filter.matches(AxisId::E3));
        assert!(!filter.matches(AxisId::Y));
        assert!(!filter.matches(AxisId::Z2));
    }
}
