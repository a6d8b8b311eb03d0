use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::None)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
            Direction::None => write!(f, "none"),
        }
    }
}

/// Outcome of one confluence-scoring pass at bar close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    /// Winning confluence score, clamped to [0, 100].
    pub strength: Decimal,
    /// Informational conviction measure in [0, 100] for the UI.
    pub confidence: Decimal,
    pub reasons: Vec<String>,
}

impl Signal {
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            direction: Direction::None,
            strength: Decimal::ZERO,
            confidence: Decimal::ZERO,
            reasons: vec![reason.into()],
        }
    }
}
