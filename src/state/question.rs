use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use utoipa::ToSchema;

/// One of the four answer labels shown to participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum AnswerOption {
    /// First option.
    A,
    /// Second option.
    B,
    /// Third option.
    C,
    /// Fourth option.
    D,
}

impl AnswerOption {
    /// Every option in display order.
    pub const ALL: [AnswerOption; 4] = [
        AnswerOption::A,
        AnswerOption::B,
        AnswerOption::C,
        AnswerOption::D,
    ];

    fn label(self) -> char {
        match self {
            AnswerOption::A => 'A',
            AnswerOption::B => 'B',
            AnswerOption::C => 'C',
            AnswerOption::D => 'D',
        }
    }
}

impl fmt::Display for AnswerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Raised when an option label or ordering cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerParseError {
    /// Label outside of `A`..`D`.
    #[error("unknown answer option `{0}`")]
    UnknownOption(String),
    /// An ordering must list every option exactly once.
    #[error("answer sequence must list A, B, C and D exactly once (got `{0}`)")]
    NotAPermutation(String),
}

impl FromStr for AnswerOption {
    type Err = AnswerParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(AnswerOption::A),
            "B" => Ok(AnswerOption::B),
            "C" => Ok(AnswerOption::C),
            "D" => Ok(AnswerOption::D),
            other => Err(AnswerParseError::UnknownOption(other.to_string())),
        }
    }
}

/// Ordered option labels submitted for a fastest-finger question, e.g. `C,A,D,B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnswerSequence(Vec<AnswerOption>);

impl AnswerSequence {
    /// Borrow the ordered options.
    pub fn options(&self) -> &[AnswerOption] {
        &self.0
    }
}

impl FromStr for AnswerSequence {
    type Err = AnswerParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let options = value
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<AnswerOption>, _>>()?;

        let mut sorted = options.clone();
        sorted.sort();
        if sorted != AnswerOption::ALL {
            return Err(AnswerParseError::NotAPermutation(value.to_string()));
        }

        Ok(Self(options))
    }
}

impl TryFrom<Vec<AnswerOption>> for AnswerSequence {
    type Error = AnswerParseError;

    fn try_from(options: Vec<AnswerOption>) -> Result<Self, Self::Error> {
        let joined = options
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        joined.parse()
    }
}

impl fmt::Display for AnswerSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&labels)
    }
}

impl Serialize for AnswerSequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AnswerSequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Question played during a fastest-finger round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FffQuestion {
    /// Identifier from the question bank.
    pub id: String,
    /// Question text.
    pub text: String,
    /// Option texts keyed by position (A..D).
    pub options: Vec<String>,
    /// Ordering that counts as correct.
    #[schema(value_type = String, example = "B,A,D,C")]
    pub correct_order: AnswerSequence,
}

/// Main game question the audience is polled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MainGameQuestion {
    /// Identifier from the question bank.
    pub id: String,
    /// 1-based position on the money ladder.
    pub number: u32,
    /// Question text.
    pub text: String,
    /// Option texts keyed by position (A..D).
    pub options: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sequences_case_and_space_insensitively() {
        let seq: AnswerSequence = " c, a ,D,b".parse().unwrap();
        assert_eq!(
            seq.options(),
            &[AnswerOption::C, AnswerOption::A, AnswerOption::D, AnswerOption::B]
        );
        assert_eq!(seq.to_string(), "C,A,D,B");
    }

    #[test]
    fn rejects_repeated_or_missing_options() {
        assert!(matches!(
            "A,A,B,C".parse::<AnswerSequence>(),
            Err(AnswerParseError::NotAPermutation(_))
        ));
        assert!(matches!(
            "A,B,C".parse::<AnswerSequence>(),
            Err(AnswerParseError::NotAPermutation(_))
        ));
        assert!(matches!(
            "A,B,C,E".parse::<AnswerSequence>(),
            Err(AnswerParseError::UnknownOption(_))
        ));
    }

    #[test]
    fn sequence_serializes_as_comma_separated_string() {
        let seq: AnswerSequence = "B,A,D,C".parse().unwrap();
        assert_eq!(serde_json::to_string(&seq).unwrap(), "\"B,A,D,C\"");
        let back: AnswerSequence = serde_json::from_str("\"B,A,D,C\"").unwrap();
        assert_eq!(back, seq);
    }
}
