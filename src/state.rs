//! Persisted session state.
//!
//! The layout mirrors what earlier deployments wrote to disk, hence the
//! PascalCase field names:
//!
//! ```text
//! { GameId, CurrentRound: RoundState | null, History: RoundState[] }
//! RoundState = { GameOptions, RoundId, RoundStage, Hash, Secret, LuckyNumber }
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    options::GameOptions,
    round::RoundStage,
    types::{RoundId, SessionId, StateError},
};

/// Persisted form of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoundState {
    /// Options the round was created with, as saved.
    ///
    /// Older saves may carry only some fields; the rest are taken from the
    /// restoring session, see [`RoundState::options_over`].
    #[serde(default)]
    pub game_options: Map<String, Value>,
    /// Round identifier.
    pub round_id: RoundId,
    /// Stage at the time of saving.
    pub round_stage: RoundStage,
    /// Commitment hash.
    pub hash: String,
    /// Commitment secret.
    pub secret: String,
    /// Outcome.
    pub lucky_number: i64,
}

impl RoundState {
    /// Returns the saved options merged field by field over `base`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Parse`] if a saved field has the wrong shape, or
    /// [`StateError::Options`] if the merged options are invalid.
    pub fn options_over(&self, base: &GameOptions) -> Result<GameOptions, StateError> {
        let mut merged = options_record(base);
        merged.extend(self.game_options.iter().map(|(key, value)| (key.clone(), value.clone())));

        let options: GameOptions = serde_json::from_value(Value::Object(merged))?;
        options.validate()?;
        Ok(options)
    }
}

/// Returns the persisted record of `options`.
pub(crate) fn options_record(options: &GameOptions) -> Map<String, Value> {
    match serde_json::to_value(options) {
        Ok(Value::Object(record)) => record,
        _ => Map::new(),
    }
}

/// Persisted form of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameState {
    /// Session identifier.
    pub game_id: SessionId,
    /// The round that was current when saving.
    pub current_round: Option<RoundState>,
    /// Retired rounds, oldest first.
    #[serde(default)]
    pub history: Vec<RoundState>,
}

impl GameState {
    /// Serializes the state to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl FromStr for GameState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}
