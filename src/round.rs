//! Round stage engine.
//!
//! A [`Round`] walks a fixed table of stages, spending a configured amount of
//! time in each one:
//!
//! ```text
//! Created -> OpenedForBetting -> ClosedForBetting -> RollStarted -> RollEnded -> Finished
//! ```
//!
//! Any stage but `Finished` can be cut short by [`Round::cancel`], which moves
//! straight to `Cancelled`. Both `Finished` and `Cancelled` are terminal.
//!
//! The round never waits on its own. After entering a timed stage it asks the
//! [`Scheduler`] for a continuation and records the returned token; handing
//! that token back to [`Round::fire`] moves the round on.

use std::{fmt, mem, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    fairness::Commitment,
    options::GameOptions,
    state::{RoundState, options_record},
    traits::{EntropySource, RoundObserver, Scheduler},
    types::{Reveal, RoundId, RoundInfo, StateError, TimerToken},
};

/// Stage of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundStage {
    /// Outcome committed, not started yet.
    Created,
    /// Bets are accepted.
    OpenedForBetting,
    /// Bets are no longer accepted.
    ClosedForBetting,
    /// The wheel is spinning.
    RollStarted,
    /// The wheel stopped on the outcome.
    RollEnded,
    /// The round completed.
    Finished,
    /// The round was cut short.
    Cancelled,
}

/// Forward transitions as `(current, next)` pairs.
const STAGE_MAP: [(RoundStage, RoundStage); 5] = [
    (RoundStage::Created, RoundStage::OpenedForBetting),
    (RoundStage::OpenedForBetting, RoundStage::ClosedForBetting),
    (RoundStage::ClosedForBetting, RoundStage::RollStarted),
    (RoundStage::RollStarted, RoundStage::RollEnded),
    (RoundStage::RollEnded, RoundStage::Finished),
];

impl RoundStage {
    /// Returns the stage following this one, or `None` for terminal stages.
    pub fn next(self) -> Option<Self> {
        STAGE_MAP.iter().find(|(current, _)| *current == self).map(|(_, next)| *next)
    }

    /// Returns the stage preceding this one.
    ///
    /// Stages without a predecessor, including `Cancelled`, map to `Created`.
    pub fn previous(self) -> Self {
        STAGE_MAP.iter().find(|(_, next)| *next == self).map_or(Self::Created, |(prev, _)| *prev)
    }

    /// Returns true for `Finished` and `Cancelled`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    /// Human readable label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::OpenedForBetting => "Opened For Betting..",
            Self::ClosedForBetting => "Closed For Betting!",
            Self::RollStarted => "Roll Started",
            Self::RollEnded => "Roll Ended",
            Self::Finished => "Round Finished!",
            Self::Cancelled => "CANCELLED!",
        }
    }
}

impl fmt::Display for RoundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One round: identity, options snapshot, stage, timing and commitment.
pub struct Round {
    id: RoundId,
    options: GameOptions,
    stage: RoundStage,
    commitment: Commitment,
    /// Pending continuation, if the current stage is timed.
    timer: Option<TimerToken>,
    stage_started_at: Option<u64>,
    stage_ends_at: Option<u64>,
}

impl fmt::Debug for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Round")
            .field("id", &self.id)
            .field("stage", &self.stage)
            .field("hash", &self.commitment.hash())
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl Round {
    /// Creates a fresh round with a newly drawn commitment.
    ///
    /// The round keeps its own copy of `options`.
    pub fn new(options: GameOptions, entropy: &mut (impl EntropySource + ?Sized)) -> Self {
        let id = RoundId::from(entropy.unique_id());
        let commitment = Commitment::generate(&options, entropy);
        debug!(round = %id, hash = commitment.hash(), "round created");

        Self {
            id,
            options,
            stage: RoundStage::Created,
            commitment,
            timer: None,
            stage_started_at: None,
            stage_ends_at: None,
        }
    }

    /// Rebuilds a round from its persisted state.
    ///
    /// Saved options are merged over `base`. The saved secret and outcome
    /// are reused, and must reproduce the saved hash under the merged
    /// algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::HashMismatch`] if the saved hash does not match,
    /// or any error of [`RoundState::options_over`].
    pub fn restore(state: RoundState, base: &GameOptions) -> Result<Self, StateError> {
        let game_options = state.options_over(base)?;
        let RoundState { round_id, round_stage, hash, secret, lucky_number, .. } = state;
        let commitment =
            Commitment::from_reveal(secret, lucky_number, game_options.round_hash_algorithm);

        if !commitment.matches(game_options.round_hash_algorithm, &hash) {
            return Err(StateError::HashMismatch { round_id });
        }

        debug!(round = %round_id, stage = %round_stage, "round restored");

        Ok(Self {
            id: round_id,
            options: game_options,
            stage: round_stage,
            commitment,
            timer: None,
            stage_started_at: None,
            stage_ends_at: None,
        })
    }

    /// Returns the round identifier.
    pub const fn id(&self) -> &RoundId {
        &self.id
    }

    /// Returns the options this round was created with.
    pub const fn options(&self) -> &GameOptions {
        &self.options
    }

    /// Returns the current stage.
    pub const fn stage(&self) -> RoundStage {
        self.stage
    }

    /// Returns the commitment hash.
    pub fn hash(&self) -> &str {
        self.commitment.hash()
    }

    /// Returns true once the round reached `Finished` or `Cancelled`.
    pub const fn is_finished_or_cancelled(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Returns the secret and outcome, once the round is over.
    ///
    /// While the round is still running only the hash is public.
    pub fn reveal(&self) -> Option<Reveal> {
        self.is_finished_or_cancelled().then(|| Reveal {
            secret: self.commitment.secret().to_owned(),
            lucky_number: self.commitment.lucky_number(),
        })
    }

    /// Unix time (seconds) at which the current stage started.
    pub const fn stage_started_at(&self) -> Option<u64> {
        self.stage_started_at
    }

    /// Unix time (seconds) at which the current stage will end.
    pub const fn stage_ends_at(&self) -> Option<u64> {
        self.stage_ends_at
    }

    /// Time left in the current stage, given the current unix time in
    /// milliseconds.
    pub fn stage_remaining(&self, now_millis: u64) -> Duration {
        self.stage_ends_at
            .map(|ends_at| ends_at.saturating_mul(1000).saturating_sub(now_millis))
            .map_or(Duration::ZERO, Duration::from_millis)
    }

    /// Returns the pending continuation, if any.
    pub const fn pending_timer(&self) -> Option<TimerToken> {
        self.timer
    }

    /// Returns a notification snapshot of the round.
    pub fn info(&self) -> RoundInfo {
        RoundInfo {
            id: self.id.clone(),
            stage: self.stage,
            hash: self.commitment.hash().to_owned(),
            stage_started_at: self.stage_started_at,
            stage_ends_at: self.stage_ends_at,
            reveal: self.reveal(),
        }
    }

    /// Returns the persisted form of the round.
    ///
    /// Unlike [`Round::info`] this always carries the secret and outcome.
    pub fn state(&self) -> RoundState {
        RoundState {
            game_options: options_record(&self.options),
            round_id: self.id.clone(),
            round_stage: self.stage,
            hash: self.commitment.hash().to_owned(),
            secret: self.commitment.secret().to_owned(),
            lucky_number: self.commitment.lucky_number(),
        }
    }

    /// Starts or resumes the round.
    ///
    /// A round in `Created` simply advances. A round restored in the middle
    /// of its sequence either replays its current stage with the full
    /// duration, or, when
    /// [`immediately_jump_to_the_next_stage_when_the_game_starts`](GameOptions::immediately_jump_to_the_next_stage_when_the_game_starts)
    /// is set, moves on to the next stage at once. Terminal rounds are left
    /// untouched.
    pub fn start<S, O>(&mut self, scheduler: &mut S, observer: &mut O)
    where
        S: Scheduler + ?Sized,
        O: RoundObserver + ?Sized,
    {
        self.cancel_timer(scheduler);

        if self.stage != RoundStage::Created
            && !self.is_finished_or_cancelled()
            && !self.options.immediately_jump_to_the_next_stage_when_the_game_starts
        {
            self.stage = self.stage.previous();
        }

        self.advance(scheduler, observer);
    }

    /// Moves the round forward.
    ///
    /// Untimed stages are passed through within the same call, so one call
    /// may emit several transitions. Does nothing on a terminal round.
    pub fn advance<S, O>(&mut self, scheduler: &mut S, observer: &mut O)
    where
        S: Scheduler + ?Sized,
        O: RoundObserver + ?Sized,
    {
        while let Some(next) = self.stage.next() {
            let duration = self.options.round_stage_durations.entering(next);

            observer.before_stage_change(self);

            let now = scheduler.now_millis();
            if next.is_terminal() {
                self.stage_started_at = None;
                self.stage_ends_at = None;
            } else {
                self.stage_started_at = Some(now / 1000);
                self.stage_ends_at =
                    Some(now.saturating_add(duration_millis(duration)).div_ceil(1000));
            }
            let previous = mem::replace(&mut self.stage, next);
            trace!(round = %self.id, %previous, stage = %next, "stage changed");

            observer.stage_changed(previous, self);

            if !duration.is_zero() {
                self.cancel_timer(scheduler);
                self.timer = Some(scheduler.schedule(duration));
                return;
            }
        }
    }

    /// Handles a fired continuation.
    ///
    /// Returns false, without touching the round, if `token` is not the
    /// round's pending continuation.
    pub fn fire<S, O>(&mut self, token: TimerToken, scheduler: &mut S, observer: &mut O) -> bool
    where
        S: Scheduler + ?Sized,
        O: RoundObserver + ?Sized,
    {
        if self.timer != Some(token) {
            return false;
        }

        self.timer = None;
        self.advance(scheduler, observer);
        true
    }

    /// Cancels the round.
    ///
    /// Clears the pending continuation and moves to `Cancelled`, whatever the
    /// current stage. The commitment is left untouched.
    pub fn cancel<S, O>(&mut self, scheduler: &mut S, observer: &mut O)
    where
        S: Scheduler + ?Sized,
        O: RoundObserver + ?Sized,
    {
        self.cancel_timer(scheduler);
        self.stage_started_at = None;
        self.stage_ends_at = None;

        observer.before_stage_change(self);
        let previous = mem::replace(&mut self.stage, RoundStage::Cancelled);
        debug!(round = %self.id, %previous, "round cancelled");
        observer.stage_changed(previous, self);
    }

    fn cancel_timer<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) {
        if let Some(token) = self.timer.take() {
            scheduler.cancel(token);
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
