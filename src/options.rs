//! Session and round configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{fairness::HashAlgorithm, round::RoundStage, types::OptionsError};

/// Durations of the timed stages, in milliseconds.
///
/// Each duration belongs to the edge leading *into* a stage; the edge into
/// [`RoundStage::Finished`] is never timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StageDurations {
    /// Time spent in [`RoundStage::OpenedForBetting`].
    pub open_for_betting_duration: u64,
    /// Time spent in [`RoundStage::ClosedForBetting`].
    pub closed_for_betting_info_duration: u64,
    /// Time spent in [`RoundStage::RollStarted`].
    pub roll_duration: u64,
    /// Time spent in [`RoundStage::RollEnded`].
    pub finished_info_duration: u64,
}

impl Default for StageDurations {
    fn default() -> Self {
        Self {
            open_for_betting_duration: 20_000,
            closed_for_betting_info_duration: 3_000,
            roll_duration: 7_000,
            finished_info_duration: 3_000,
        }
    }
}

impl StageDurations {
    /// Uniform durations, handy for simulations.
    pub const fn uniform(millis: u64) -> Self {
        Self {
            open_for_betting_duration: millis,
            closed_for_betting_info_duration: millis,
            roll_duration: millis,
            finished_info_duration: millis,
        }
    }

    /// Returns the duration of the edge leading into `stage`.
    pub const fn entering(&self, stage: RoundStage) -> Duration {
        let millis = match stage {
            RoundStage::OpenedForBetting => self.open_for_betting_duration,
            RoundStage::ClosedForBetting => self.closed_for_betting_info_duration,
            RoundStage::RollStarted => self.roll_duration,
            RoundStage::RollEnded => self.finished_info_duration,
            RoundStage::Created | RoundStage::Finished | RoundStage::Cancelled => 0,
        };
        Duration::from_millis(millis)
    }

    /// Returns true if every stage is untimed.
    pub const fn all_zero(&self) -> bool {
        self.open_for_betting_duration == 0
            && self.closed_for_betting_info_duration == 0
            && self.roll_duration == 0
            && self.finished_info_duration == 0
    }
}

/// Configuration of a session.
///
/// Every round takes its own copy of the options at creation time, so
/// replacing a session's options never rewrites rounds already created.
///
/// Missing fields fall back to [`GameOptions::default`] when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GameOptions {
    /// Start newly made rounds automatically.
    pub auto_start_new_round: bool,
    /// Make a new round automatically when the session starts and whenever
    /// the current round ends.
    pub auto_make_new_round: bool,
    /// Number of retired rounds kept in history; `0` keeps all of them.
    pub max_history_items: usize,
    /// Smallest possible outcome (inclusive).
    pub min_lucky_number: i64,
    /// Largest possible outcome (inclusive).
    pub max_lucky_number: i64,
    /// Keyed-hash algorithm of the commitment.
    pub round_hash_algorithm: HashAlgorithm,
    /// Length of the generated secret, in characters.
    pub round_secret_length: usize,
    /// Durations of the timed stages.
    pub round_stage_durations: StageDurations,
    /// When resuming a round mid-sequence, move to the next stage at once
    /// instead of replaying the current stage from the beginning.
    pub immediately_jump_to_the_next_stage_when_the_game_starts: bool,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            auto_start_new_round: true,
            auto_make_new_round: true,
            max_history_items: 10,
            min_lucky_number: 0,
            max_lucky_number: 14,
            round_hash_algorithm: HashAlgorithm::Sha224,
            round_secret_length: 32,
            round_stage_durations: StageDurations::default(),
            immediately_jump_to_the_next_stage_when_the_game_starts: false,
        }
    }
}

impl GameOptions {
    /// Checks the options for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `min_lucky_number` is greater than `max_lucky_number`
    /// - `round_secret_length` is zero
    /// - every stage duration is zero while rounds are made and started
    ///   automatically, which would chain rounds without ever yielding
    pub const fn validate(&self) -> Result<(), OptionsError> {
        if self.min_lucky_number > self.max_lucky_number {
            return Err(OptionsError::InvalidLuckyRange {
                min: self.min_lucky_number,
                max: self.max_lucky_number,
            });
        }

        if self.round_secret_length == 0 {
            return Err(OptionsError::EmptySecret);
        }

        if self.auto_make_new_round
            && self.auto_start_new_round
            && self.round_stage_durations.all_zero()
        {
            return Err(OptionsError::NoTimedStage);
        }

        Ok(())
    }
}
