pub mod candle;
pub mod signal;
pub mod trade;

pub use candle::*;
pub use signal::*;
pub use trade::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker identifier used in strategy keys and journal rows. Deribit is the
/// only connected venue today; the key keeps the slot so rows stay stable
/// when more venues land.
pub const DEFAULT_BROKER: &str = "deribit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Testnet,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Live => "live",
            Environment::Testnet => "testnet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "live" | "prod" | "production" => Some(Environment::Live),
            "testnet" | "test" => Some(Environment::Testnet),
            _ => None,
        }
    }

    pub fn all() -> [Environment; 2] {
        [Environment::Live, Environment::Testnet]
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identity of one running strategy instance. One executor, one open
/// position and one `user_strategies` row exist per key at most.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyKey {
    pub user_id: String,
    pub strategy_name: String,
    pub instrument: String,
    pub broker: String,
    pub environment: Environment,
}

impl StrategyKey {
    pub fn new(
        user_id: impl Into<String>,
        strategy_name: impl Into<String>,
        instrument: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            strategy_name: strategy_name.into(),
            instrument: instrument.into(),
            broker: DEFAULT_BROKER.to_string(),
            environment,
        }
    }

    /// Ticker events carry no strategy name; the pump routes on this pair.
    pub fn routing_key(&self) -> (String, String) {
        (self.user_id.clone(), self.instrument.clone())
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.user_id, self.strategy_name, self.instrument, self.broker, self.environment
        )
    }
}
