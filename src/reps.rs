// src/reps.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Words that mark a set as "to failure". Stored text is compared case-insensitively.
const FAILURE_WORDS: [&str; 4] = ["failure", "falha", "amrap", "max"];

/// A rep target or a recorded rep count.
///
/// Stored in the database as text (`"10"`, `"10-12"`, `"failure"`), so
/// free-form values typed by a user survive a round trip through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Reps {
    Fixed(u32),
    Range(u32, u32),
    ToFailure,
}

impl Reps {
    /// The rep count used by the 1RM estimator and volume math.
    ///
    /// For a range this is the lower bound (the number before the dash).
    /// Sets to failure have no known count and count as a single rep.
    pub const fn effective_count(&self) -> u32 {
        match self {
            Self::Fixed(n) => *n,
            Self::Range(low, _) => *low,
            Self::ToFailure => 1,
        }
    }

    /// Lenient parse used when reading stored text: anything that isn't a
    /// number or a range is treated as a set to failure.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(Self::ToFailure)
    }
}

impl Default for Reps {
    fn default() -> Self {
        Self::Range(10, 12)
    }
}

impl fmt::Display for Reps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Range(low, high) => write!(f, "{low}-{high}"),
            Self::ToFailure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid reps value: '{0}' (expected e.g. \"10\", \"10-12\" or \"failure\")")]
pub struct ParseRepsError(pub String);

/// Reads the digits at the start of `s`, ignoring anything after them ("12+" -> 12).
fn leading_number(s: &str) -> Option<u32> {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

impl FromStr for Reps {
    type Err = ParseRepsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if FAILURE_WORDS
            .iter()
            .any(|w| trimmed.eq_ignore_ascii_case(w))
        {
            return Ok(Self::ToFailure);
        }

        let (first, rest) = match trimmed.split_once('-') {
            Some((a, b)) => (a.trim(), Some(b.trim())),
            None => (trimmed, None),
        };
        let low = leading_number(first).ok_or_else(|| ParseRepsError(s.to_string()))?;

        match rest.and_then(leading_number) {
            Some(high) if high != low => Ok(Self::Range(low.min(high), low.max(high))),
            _ => Ok(Self::Fixed(low)),
        }
    }
}

impl From<Reps> for String {
    fn from(value: Reps) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Reps {
    type Error = ParseRepsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!("10".parse::<Reps>().unwrap(), Reps::Fixed(10));
        assert_eq!("10-12".parse::<Reps>().unwrap(), Reps::Range(10, 12));
        assert_eq!(" 8 - 10 ".parse::<Reps>().unwrap(), Reps::Range(8, 10));
        assert_eq!("12+".parse::<Reps>().unwrap(), Reps::Fixed(12));
        assert_eq!("8-".parse::<Reps>().unwrap(), Reps::Fixed(8));
        assert_eq!("Falha".parse::<Reps>().unwrap(), Reps::ToFailure);
        assert_eq!("FAILURE".parse::<Reps>().unwrap(), Reps::ToFailure);
    }

    #[test]
    fn reversed_range_is_normalized() {
        assert_eq!("12-10".parse::<Reps>().unwrap(), Reps::Range(10, 12));
        assert_eq!("12-10".parse::<Reps>().unwrap().effective_count(), 10);
    }

    #[test]
    fn rejects_text_but_lenient_parse_falls_back() {
        assert!("lots".parse::<Reps>().is_err());
        assert!("".parse::<Reps>().is_err());
        assert_eq!(Reps::parse_lenient("lots"), Reps::ToFailure);
        assert_eq!(Reps::parse_lenient("lots").effective_count(), 1);
    }

    #[test]
    fn effective_count_uses_lower_bound() {
        assert_eq!(Reps::Range(10, 12).effective_count(), 10);
        assert_eq!(Reps::Fixed(5).effective_count(), 5);
        assert_eq!(Reps::default().to_string(), "10-12");
    }
}
