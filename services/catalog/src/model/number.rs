use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A channel number: decimal, finite, non-negative.
///
/// Fractional values are legal — `8.5` slots a channel between `8` and `9` —
/// and provider-sourced fractions are preserved verbatim. Two numbers that
/// compare equal as values are the same number; there is no `1` vs `1.0`
/// distinction. The constructor rejects NaN and infinities, which is what
/// makes the manual `Eq`/`Ord` impls sound.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct ChannelNumber(f64);

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("invalid channel number: {0}")]
pub struct InvalidNumber(pub f64);

impl ChannelNumber {
    pub fn new(value: f64) -> Result<Self, InvalidNumber> {
        if !value.is_finite() || value < 0.0 {
            return Err(InvalidNumber(value));
        }
        // Collapse -0.0 onto 0.0 so the two are one representation.
        let value = if value == 0.0 { 0.0 } else { value };
        Ok(Self(value))
    }

    pub fn from_int(value: u32) -> Self {
        Self(f64::from(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_integer(&self) -> bool {
        self.0.fract() == 0.0
    }
}

impl PartialEq for ChannelNumber {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ChannelNumber {}

impl PartialOrd for ChannelNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integer() {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl TryFrom<f64> for ChannelNumber {
    type Error = InvalidNumber;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for ChannelNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn equal_by_value_regardless_of_representation() {
        let a = ChannelNumber::new(1.0).expect("valid");
        let b = ChannelNumber::from_int(1);
        assert_eq!(a, b);
        assert_eq!(
            ChannelNumber::new(-0.0).expect("valid"),
            ChannelNumber::new(0.0).expect("valid")
        );
    }

    #[test]
    fn rejects_nan_infinity_and_negatives() {
        assert!(ChannelNumber::new(f64::NAN).is_err());
        assert!(ChannelNumber::new(f64::INFINITY).is_err());
        assert!(ChannelNumber::new(-1.5).is_err());
    }

    #[test]
    fn fractional_values_survive_and_order() {
        let mut set = BTreeSet::new();
        for value in [8.5, 8.0, 9.0] {
            set.insert(ChannelNumber::new(value).expect("valid"));
        }
        let ordered: Vec<f64> = set.iter().map(ChannelNumber::value).collect();
        assert_eq!(ordered, vec![8.0, 8.5, 9.0]);
    }

    #[test]
    fn display_trims_integral_values() {
        assert_eq!(ChannelNumber::new(5.0).expect("valid").to_string(), "5");
        assert_eq!(ChannelNumber::new(8.5).expect("valid").to_string(), "8.5");
    }

    #[test]
    fn deserialization_enforces_the_invariant() {
        let number: ChannelNumber = serde_json::from_str("8.5").expect("valid");
        assert_eq!(number.value(), 8.5);
        assert!(serde_json::from_str::<ChannelNumber>("-3").is_err());
    }
}
