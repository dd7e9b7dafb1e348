//! Core trait abstractions for the croupier engine.
//!
//! The engine itself is single-threaded and never blocks. Everything it needs
//! from the outside world goes through one of these traits:
//!
//! - [`Scheduler`]: the clock and the delayed continuation of a round's stage
//! - [`EntropySource`]: secure randomness and unique identifiers
//! - [`RoundObserver`]: synchronous receiver of a round's stage transitions

use std::time::Duration;

use crate::{
    round::{Round, RoundStage},
    types::TimerToken,
};

/// Clock and delayed-task scheduling.
///
/// A scheduler never calls back into the engine itself. When a scheduled
/// delay elapses, whoever drives the scheduler hands the token back to
/// [`Session::fire`](crate::Session::fire) (or [`Round::fire`]), which
/// ignores tokens that were cancelled or superseded in the meantime.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use croupier::{Scheduler, TimerToken};
///
/// struct Immediate { next: u64 }
///
/// impl Scheduler for Immediate {
///     fn now_millis(&self) -> u64 { 0 }
///     fn schedule(&mut self, _delay: Duration) -> TimerToken {
///         self.next += 1;
///         TimerToken(self.next)
///     }
///     fn cancel(&mut self, _token: TimerToken) {}
/// }
/// ```
pub trait Scheduler: Send {
    /// Returns the current time in milliseconds since the unix epoch.
    fn now_millis(&self) -> u64;

    /// Schedules a continuation to fire after `delay`.
    fn schedule(&mut self, delay: Duration) -> TimerToken;

    /// Cancels a pending continuation.
    ///
    /// Cancelling an unknown or already fired token is a no-op.
    fn cancel(&mut self, token: TimerToken);
}

/// Source of secure randomness and unique identifiers.
pub trait EntropySource: Send {
    /// Returns a random alphanumeric string of `len` characters.
    fn random_string(&mut self, len: usize) -> String;

    /// Returns an integer drawn uniformly from `min..=max`.
    ///
    /// Callers guarantee `min <= max`.
    fn random_integer(&mut self, min: i64, max: i64) -> i64;

    /// Returns a fresh unique identifier.
    fn unique_id(&mut self) -> String;
}

/// Receiver of a round's stage transitions.
///
/// Callbacks run inline, in the middle of the transition, and only get
/// shared access to the round. They cannot veto or re-enter the transition.
pub trait RoundObserver {
    /// Called before the round leaves its current stage.
    fn before_stage_change(&mut self, round: &Round);

    /// Called after the round entered a new stage.
    fn stage_changed(&mut self, previous: RoundStage, round: &Round);
}

impl RoundObserver for () {
    fn before_stage_change(&mut self, _round: &Round) {}

    fn stage_changed(&mut self, _previous: RoundStage, _round: &Round) {}
}

impl<O: RoundObserver + ?Sized> RoundObserver for &mut O {
    fn before_stage_change(&mut self, round: &Round) {
        (**self).before_stage_change(round);
    }

    fn stage_changed(&mut self, previous: RoundStage, round: &Round) {
        (**self).stage_changed(previous, round);
    }
}
