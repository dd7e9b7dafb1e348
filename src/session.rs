//! Session orchestrator.
//!
//! The [`Session`] is the main entry point of croupier. It owns the current
//! round and a bounded history of retired rounds, forwards every stage
//! transition of the current round to its own listeners, and decides what
//! happens when a round ends: make and start the next one, or complete a
//! pending graceful stop.

use std::{collections::VecDeque, fmt, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    events::EventBus,
    options::GameOptions,
    providers::{ManualScheduler, OsEntropy},
    round::{Round, RoundStage},
    state::GameState,
    traits::{EntropySource, RoundObserver, Scheduler},
    types::{
        EventName, Notification, OptionsError, SessionError, SessionId, SessionInfo, StateError,
        TimerToken,
    },
};

/// Forwards a round's transitions to the session bus and remembers whether
/// the round reached a terminal stage along the way.
struct RoundBridge<'a> {
    events: &'a mut EventBus,
    ended: bool,
}

impl<'a> RoundBridge<'a> {
    fn new(events: &'a mut EventBus) -> Self {
        Self { events, ended: false }
    }
}

impl RoundObserver for RoundBridge<'_> {
    fn before_stage_change(&mut self, round: &Round) {
        self.events.before_stage_change(round);
    }

    fn stage_changed(&mut self, previous: RoundStage, round: &Round) {
        self.events.stage_changed(previous, round);
        self.ended |= round.is_finished_or_cancelled();
    }
}

/// A long-lived sequence of rounds.
///
/// The session is a plain single-threaded state machine: every operation
/// runs to completion, publishing notifications synchronously as it goes.
/// Stage timers are delegated to the [`Scheduler`] `S`; fired tokens must be
/// handed back through [`Session::fire`]. See [`spawn`](crate::spawn) for a tokio
/// driver and [`Session::advance_clock`] for a virtual clock.
///
/// # Example
///
/// ```ignore
/// use croupier::{EventName, GameOptions, ManualScheduler, Session};
///
/// let mut session = Session::new(GameOptions::default(), ManualScheduler::new(0))?;
/// session.on(EventName::RoundStageChanged, |n| println!("{n}"));
///
/// session.start()?;
/// session.advance_clock(std::time::Duration::from_secs(60));
/// session.stop(true);
/// ```
pub struct Session<S: Scheduler> {
    id: SessionId,
    options: GameOptions,
    running: bool,
    /// Set by a graceful stop until the current round ends.
    waiting_to_end: bool,
    current_round: Option<Round>,
    /// Retired rounds, oldest first.
    history: VecDeque<Round>,
    events: EventBus,
    scheduler: S,
    entropy: Box<dyn EntropySource>,
}

impl<S: Scheduler + fmt::Debug> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("running", &self.running)
            .field("waiting_to_end", &self.waiting_to_end)
            .field("current_round", &self.current_round)
            .field("history", &self.history.len())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl<S: Scheduler> Session<S> {
    /// Creates a session drawing entropy from the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` fail [`GameOptions::validate`].
    pub fn new(options: GameOptions, scheduler: S) -> Result<Self, OptionsError> {
        Self::with_entropy(options, scheduler, OsEntropy)
    }

    /// Creates a session with a custom entropy source.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` fail [`GameOptions::validate`].
    pub fn with_entropy(
        options: GameOptions,
        scheduler: S,
        entropy: impl EntropySource + 'static,
    ) -> Result<Self, OptionsError> {
        options.validate()?;

        let mut entropy: Box<dyn EntropySource> = Box::new(entropy);
        let id = SessionId::from(entropy.unique_id());
        debug!(session = %id, "session created");

        Ok(Self {
            id,
            options,
            running: false,
            waiting_to_end: false,
            current_round: None,
            history: VecDeque::new(),
            events: EventBus::new(),
            scheduler,
            entropy,
        })
    }

    /// Loads persisted state into this session.
    ///
    /// Takes over the saved session id, the current round with its saved
    /// stage and commitment, and the saved history (trimmed to this
    /// session's history cap). Options missing from a saved round are taken
    /// from this session's options. A running session is stopped first, and
    /// its current round cancelled. Call [`Session::start`] afterwards to
    /// resume.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::HashMismatch`] if any saved round's hash does
    /// not match its secret and outcome, or [`StateError::Options`] if a
    /// saved round's merged options are invalid.
    pub fn restore(mut self, state: GameState) -> Result<Self, StateError> {
        let GameState { game_id, current_round, history } = state;

        let restore = |state| Round::restore(state, &self.options);
        let current_round = current_round.map(restore).transpose()?;
        let history = history.into_iter().map(restore).collect::<Result<Vec<_>, _>>()?;

        self.stop(false);
        if let Some(token) = self.current_round.as_ref().and_then(Round::pending_timer) {
            self.scheduler.cancel(token);
        }

        self.id = game_id;
        self.current_round = current_round;
        self.history.clear();
        self.add_to_history(history);

        info!(
            session = %self.id,
            stage = ?self.current_round.as_ref().map(Round::stage),
            history = self.history.len(),
            "session restored"
        );
        Ok(self)
    }

    /// Loads persisted state from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Parse`] for malformed JSON, or any error of
    /// [`Session::restore`].
    pub fn restore_json(self, json: &str) -> Result<Self, StateError> {
        self.restore(json.parse()?)
    }

    /// Returns the session identifier.
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the session options.
    pub const fn options(&self) -> &GameOptions {
        &self.options
    }

    /// Returns whether the session is running.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Returns whether a graceful stop waits for the current round to end.
    pub const fn is_waiting_to_end(&self) -> bool {
        self.waiting_to_end
    }

    /// Returns the current round.
    pub const fn current_round(&self) -> Option<&Round> {
        self.current_round.as_ref()
    }

    /// Returns the retired rounds, oldest first.
    pub const fn history(&self) -> &VecDeque<Round> {
        &self.history
    }

    /// Returns the scheduler.
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Returns a notification snapshot of the session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            running: self.running,
            waiting_to_end: self.waiting_to_end,
            current_round: self.current_round.as_ref().map(Round::info),
            history_len: self.history.len(),
        }
    }

    /// Returns the persisted form of the session.
    pub fn state(&self) -> GameState {
        GameState {
            game_id: self.id.clone(),
            current_round: self.current_round.as_ref().map(Round::state),
            history: self.history.iter().map(Round::state).collect(),
        }
    }

    /// Returns the persisted form of the session as JSON.
    pub fn state_json(&self) -> Result<String, serde_json::Error> {
        self.state().to_json()
    }

    /// Subscribes `listener` to one notification channel.
    pub fn on<F>(&mut self, name: EventName, listener: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.events.on(name, listener);
    }

    /// Subscribes `listener` to every notification channel.
    pub fn on_any<F>(&mut self, listener: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.events.on_any(listener);
    }

    /// Replaces the session options, merged over the defaults by the caller.
    ///
    /// Only rounds made afterwards see the new options; the current round
    /// and the history keep the options they were created with.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` fail [`GameOptions::validate`].
    pub fn set_options(&mut self, options: GameOptions) -> Result<(), OptionsError> {
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Appends retired rounds to the history, evicting the oldest entries
    /// beyond the history cap.
    pub fn add_to_history(&mut self, rounds: impl IntoIterator<Item = Round>) {
        self.history.extend(rounds);

        let cap = self.options.max_history_items;
        if cap > 0 && self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    /// Retires the current round and makes a fresh one from the current
    /// options.
    ///
    /// A current round that is still active is cancelled first. The new
    /// round is not started.
    pub fn make_new_round(&mut self) {
        if let Some(mut previous) = self.current_round.take() {
            if !previous.is_finished_or_cancelled() {
                // The retired round no longer drives the session, so its
                // cancellation is published but not acted upon.
                previous.cancel(&mut self.scheduler, &mut self.events);
            }
            debug!(round = %previous.id(), stage = %previous.stage(), "round retired");
            self.add_to_history([previous]);
        }

        let round = Round::new(self.options.clone(), &mut *self.entropy);
        info!(session = %self.id, round = %round.id(), hash = round.hash(), "new round");
        self.current_round = Some(round);
    }

    /// Starts the session.
    ///
    /// Makes a round if automatic round creation is enabled and there is no
    /// active round, then starts the current round if automatic start is
    /// enabled. A restored round that is still active is resumed rather than
    /// replaced. Does nothing if the session is already running.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RoundNotFound`] if there is no current round
    /// and automatic round creation is disabled. The session is left stopped
    /// and nothing is published.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.running {
            return Ok(());
        }

        if self.current_round.is_none() && !self.options.auto_make_new_round {
            warn!(session = %self.id, "start requested without a round");
            return Err(SessionError::RoundNotFound);
        }

        self.emit_session(EventName::BeforeGameStart);
        self.running = true;

        let needs_round =
            self.current_round.as_ref().is_none_or(Round::is_finished_or_cancelled);
        if self.options.auto_make_new_round && needs_round {
            self.make_new_round();
        }

        if self.options.auto_start_new_round {
            self.start_round();
        }

        info!(session = %self.id, "session started");
        self.emit_session(EventName::GameStarted);
        Ok(())
    }

    /// Stops the session.
    ///
    /// With `wait_for_round` set and a round still in play, the stop is
    /// deferred until that round finishes or is cancelled. Otherwise the
    /// session stops at once, cancelling the current round if it is still
    /// active. Does nothing if the session is not running.
    pub fn stop(&mut self, wait_for_round: bool) {
        if !self.running {
            return;
        }

        let round_active =
            self.current_round.as_ref().is_some_and(|round| !round.is_finished_or_cancelled());

        if round_active && wait_for_round {
            info!(session = %self.id, "stop deferred until the current round ends");
            self.waiting_to_end = true;
            return;
        }

        self.emit_session(EventName::BeforeGameStop);
        self.waiting_to_end = false;
        self.running = false;

        if round_active {
            self.cancel_round();
        }

        info!(session = %self.id, "session stopped");
        self.emit_session(EventName::GameStopped);
    }

    /// Starts or resumes the current round.
    pub fn start_round(&mut self) {
        self.drive_round(|round, scheduler, bridge| round.start(scheduler, bridge));
    }

    /// Cancels the current round.
    pub fn cancel_round(&mut self) {
        self.drive_round(|round, scheduler, bridge| round.cancel(scheduler, bridge));
    }

    /// Hands a fired scheduler token to the current round.
    ///
    /// Returns false if the token is not the current round's pending
    /// continuation, e.g. because it was superseded or cancelled.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        let mut fired = false;
        self.drive_round(|round, scheduler, bridge| {
            fired = round.fire(token, scheduler, bridge);
        });

        if !fired {
            debug!(?token, "ignoring stale continuation");
        }
        fired
    }

    /// Runs `op` on the current round with its transitions bridged to the
    /// session, then applies the end-of-round policy.
    fn drive_round<F>(&mut self, op: F)
    where
        F: FnOnce(&mut Round, &mut S, &mut RoundBridge<'_>),
    {
        let Some(round) = self.current_round.as_mut() else {
            return;
        };

        let mut bridge = RoundBridge::new(&mut self.events);
        op(round, &mut self.scheduler, &mut bridge);

        if bridge.ended {
            self.on_round_ended();
        }
    }

    fn on_round_ended(&mut self) {
        if self.running && !self.waiting_to_end && self.options.auto_make_new_round {
            self.make_new_round();

            if self.options.auto_start_new_round {
                self.start_round();
            }
        }

        if self.waiting_to_end {
            self.stop(true);
        }
    }

    fn emit_session(&mut self, name: EventName) {
        let info = self.info();
        let notification = match name {
            EventName::BeforeGameStart => Notification::BeforeGameStart(info),
            EventName::GameStarted => Notification::GameStarted(info),
            EventName::BeforeGameStop => Notification::BeforeGameStop(info),
            EventName::GameStopped => Notification::GameStopped(info),
            EventName::BeforeRoundStageChange | EventName::RoundStageChanged => return,
        };
        self.events.emit(&notification);
    }
}

impl Session<ManualScheduler> {
    /// Moves the virtual clock forward by `by`, firing every continuation
    /// that falls due on the way, in order.
    pub fn advance_clock(&mut self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let until = self.scheduler.now_millis().saturating_add(by);

        while let Some(token) = self.scheduler.pop_due(until) {
            self.fire(token);
        }
        self.scheduler.set_now(until);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rstest::rstest;

    use super::*;
    use crate::{
        fairness::{HashAlgorithm, commitment_hash},
        options::StageDurations,
        providers::SeededEntropy,
        types::RoundId,
    };

    type Log = Arc<Mutex<Vec<Notification>>>;

    fn session_with(options: GameOptions) -> (Session<ManualScheduler>, Log) {
        let mut session =
            Session::with_entropy(options, ManualScheduler::new(0), SeededEntropy::new(11))
                .unwrap();
        let log = Log::default();
        let sink = Arc::clone(&log);
        session.on_any(move |n| sink.lock().unwrap().push(n.clone()));
        (session, log)
    }

    fn names(log: &Log) -> Vec<EventName> {
        log.lock().unwrap().iter().map(Notification::name).collect()
    }

    fn count(log: &Log, name: EventName) -> usize {
        names(log).into_iter().filter(|n| *n == name).count()
    }

    fn stage(session: &Session<ManualScheduler>) -> Option<RoundStage> {
        session.current_round().map(Round::stage)
    }

    #[test]
    fn test_start_opens_first_round() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();

        assert!(session.is_running());
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
        assert_eq!(
            names(&log),
            vec![
                EventName::BeforeGameStart,
                EventName::BeforeRoundStageChange,
                EventName::RoundStageChanged,
                EventName::GameStarted,
            ]
        );
        assert!(matches!(
            &log.lock().unwrap()[2],
            Notification::RoundStageChanged { previous: RoundStage::Created, .. }
        ));
    }

    #[test]
    fn test_start_twice_is_noop() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();
        session.start().unwrap();

        assert_eq!(count(&log, EventName::BeforeGameStart), 1);
        assert_eq!(count(&log, EventName::GameStarted), 1);
    }

    #[test]
    fn test_start_without_round_fails() {
        let options = GameOptions { auto_make_new_round: false, ..Default::default() };
        let (mut session, log) = session_with(options);

        assert_eq!(session.start(), Err(SessionError::RoundNotFound));
        assert!(!session.is_running());
        assert!(log.lock().unwrap().is_empty());

        // With a round in place the same session starts fine.
        session.make_new_round();
        session.start().unwrap();
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
    }

    #[test]
    fn test_manual_round_start() {
        let options = GameOptions { auto_start_new_round: false, ..Default::default() };
        let (mut session, _log) = session_with(options);

        session.start().unwrap();
        assert_eq!(stage(&session), Some(RoundStage::Created));

        session.start_round();
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
    }

    #[test]
    fn test_rounds_continue_automatically() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();
        let first = session.current_round().unwrap().id().clone();

        // One full round is 33 seconds.
        session.advance_clock(Duration::from_secs(33));

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].id(), &first);
        assert_eq!(session.history()[0].stage(), RoundStage::Finished);
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
        assert_ne!(session.current_round().unwrap().id(), &first);
        assert_eq!(count(&log, EventName::RoundStageChanged), 6);
    }

    #[test]
    fn test_history_keeps_most_recent_rounds() {
        let options = GameOptions { max_history_items: 10, ..Default::default() };
        let (mut session, _log) = session_with(options);
        session.start().unwrap();

        let mut created: Vec<RoundId> = Vec::new();
        for _ in 0..15 {
            created.push(session.current_round().unwrap().id().clone());
            session.cancel_round();
        }

        let history: Vec<_> = session.history().iter().map(|r| r.id().clone()).collect();
        assert_eq!(history.len(), 10);
        assert_eq!(history, created[5..]);
        assert!(session.history().iter().all(|r| r.stage() == RoundStage::Cancelled));
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
    }

    #[test]
    fn test_unbounded_history() {
        let options = GameOptions { max_history_items: 0, ..Default::default() };
        let (mut session, _log) = session_with(options);
        session.start().unwrap();

        for _ in 0..25 {
            session.cancel_round();
        }
        assert_eq!(session.history().len(), 25);
    }

    #[test]
    fn test_graceful_stop_waits_for_round() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();

        // 20s betting + 3s closed puts the round in RollStarted.
        session.advance_clock(Duration::from_secs(23));
        assert_eq!(stage(&session), Some(RoundStage::RollStarted));

        session.stop(true);
        assert!(session.is_running());
        assert!(session.is_waiting_to_end());
        assert_eq!(count(&log, EventName::GameStopped), 0);

        session.advance_clock(Duration::from_secs(7));
        assert_eq!(stage(&session), Some(RoundStage::RollEnded));
        assert_eq!(count(&log, EventName::GameStopped), 0);

        session.advance_clock(Duration::from_secs(3));
        assert_eq!(stage(&session), Some(RoundStage::Finished));
        assert!(!session.is_running());
        assert!(!session.is_waiting_to_end());
        assert_eq!(count(&log, EventName::GameStopped), 1);
        assert!(session.history().is_empty());

        let tail: Vec<_> = names(&log).into_iter().rev().take(3).collect();
        assert_eq!(
            tail,
            vec![EventName::GameStopped, EventName::BeforeGameStop, EventName::RoundStageChanged]
        );

        // Nothing else fires afterwards.
        session.advance_clock(Duration::from_secs(120));
        assert_eq!(count(&log, EventName::GameStopped), 1);
        assert_eq!(session.scheduler().pending(), 0);
    }

    #[test]
    fn test_forced_stop_cancels_round() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();

        session.stop(false);

        assert!(!session.is_running());
        assert_eq!(stage(&session), Some(RoundStage::Cancelled));
        assert_eq!(count(&log, EventName::GameStopped), 1);
        assert_eq!(session.scheduler().pending(), 0);
        assert!(session.history().is_empty());

        let tail: Vec<_> = names(&log).into_iter().rev().take(4).collect();
        assert_eq!(
            tail,
            vec![
                EventName::GameStopped,
                EventName::RoundStageChanged,
                EventName::BeforeRoundStageChange,
                EventName::BeforeGameStop,
            ]
        );
    }

    #[test]
    fn test_forced_stop_overrides_pending_graceful_stop() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();

        session.stop(true);
        session.stop(false);

        assert!(!session.is_running());
        assert!(!session.is_waiting_to_end());
        assert_eq!(count(&log, EventName::GameStopped), 1);
    }

    #[test]
    fn test_stop_when_not_running_is_noop() {
        let (mut session, log) = session_with(GameOptions::default());
        session.stop(false);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_without_round() {
        let options = GameOptions { auto_make_new_round: false, ..Default::default() };
        let (mut session, log) = session_with(options);
        session.make_new_round();
        session.start().unwrap();

        // Cancelling with auto-make off leaves the terminal round in place.
        session.cancel_round();
        assert_eq!(stage(&session), Some(RoundStage::Cancelled));

        session.stop(true);
        assert!(!session.is_running());
        assert_eq!(count(&log, EventName::GameStopped), 1);
    }

    #[test]
    fn test_restart_after_stop_makes_new_round() {
        let (mut session, _log) = session_with(GameOptions::default());
        session.start().unwrap();
        session.stop(false);
        let stopped = session.current_round().unwrap().id().clone();

        session.start().unwrap();

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].id(), &stopped);
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
    }

    #[test]
    fn test_make_new_round_cancels_active_round() {
        let options = GameOptions { auto_start_new_round: false, ..Default::default() };
        let (mut session, log) = session_with(options);
        session.start().unwrap();
        session.start_round();

        session.make_new_round();

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].stage(), RoundStage::Cancelled);
        assert_eq!(stage(&session), Some(RoundStage::Created));
        // The cancellation was published but did not chain another round.
        assert_eq!(count(&log, EventName::RoundStageChanged), 2);
    }

    #[test]
    fn test_round_options_are_snapshots() {
        let (mut session, _log) = session_with(GameOptions::default());
        session.start().unwrap();

        let options = GameOptions {
            round_hash_algorithm: HashAlgorithm::Sha512,
            max_lucky_number: 36,
            ..Default::default()
        };
        session.set_options(options).unwrap();

        let current = session.current_round().unwrap();
        assert_eq!(current.options().round_hash_algorithm, HashAlgorithm::Sha224);
        assert_eq!(current.hash().len(), 56);

        session.cancel_round();
        let next = session.current_round().unwrap();
        assert_eq!(next.options().max_lucky_number, 36);
        assert_eq!(next.hash().len(), 128);
        assert_eq!(session.history()[0].options().round_hash_algorithm, HashAlgorithm::Sha224);
    }

    #[test]
    fn test_set_options_validates() {
        let (mut session, _log) = session_with(GameOptions::default());
        let invalid = GameOptions { round_secret_length: 0, ..Default::default() };
        assert_eq!(session.set_options(invalid), Err(OptionsError::EmptySecret));
    }

    #[test]
    fn test_many_rounds_stay_in_range() {
        let options = GameOptions {
            auto_start_new_round: false,
            max_history_items: 0,
            ..Default::default()
        };
        let (mut session, _log) = session_with(options);

        for _ in 0..10_000 {
            session.make_new_round();
        }

        assert_eq!(session.history().len(), 9_999);
        for round in session.history() {
            let state = round.state();
            assert!((0..=14).contains(&state.lucky_number));
            assert_eq!(state.hash.len(), HashAlgorithm::Sha224.hex_len());
        }
    }

    #[test]
    fn test_restore_replays_current_stage() {
        let (mut saved, _log) = session_with(GameOptions::default());
        saved.start().unwrap();
        saved.advance_clock(Duration::from_secs(21));
        assert_eq!(stage(&saved), Some(RoundStage::ClosedForBetting));
        let json = saved.state_json().unwrap();

        let (restored, log) = session_with(GameOptions::default());
        let mut restored = restored.restore_json(&json).unwrap();
        assert_eq!(restored.id(), saved.id());
        assert_eq!(restored.current_round().unwrap().hash(), saved.current_round().unwrap().hash());

        restored.start().unwrap();
        assert_eq!(stage(&restored), Some(RoundStage::ClosedForBetting));
        assert!(matches!(
            &log.lock().unwrap()[2],
            Notification::RoundStageChanged { previous: RoundStage::OpenedForBetting, .. }
        ));

        // The full three seconds of ClosedForBetting are replayed.
        restored.advance_clock(Duration::from_millis(2_999));
        assert_eq!(stage(&restored), Some(RoundStage::ClosedForBetting));
        restored.advance_clock(Duration::from_millis(1));
        assert_eq!(stage(&restored), Some(RoundStage::RollStarted));
    }

    #[test]
    fn test_restore_can_jump_to_next_stage() {
        let (mut saved, _log) = session_with(GameOptions::default());
        saved.start().unwrap();
        saved.advance_clock(Duration::from_secs(21));
        let mut state = saved.state();
        if let Some(round) = state.current_round.as_mut() {
            round
                .game_options
                .insert("ImmediatelyJumpToTheNextStageWhenTheGameStarts".to_owned(), true.into());
        }

        let (restored, _log) = session_with(GameOptions::default());
        let mut restored = restored.restore(state).unwrap();
        restored.start().unwrap();

        assert_eq!(stage(&restored), Some(RoundStage::RollStarted));
    }

    #[test]
    fn test_restore_history_and_trim() {
        let (mut saved, _log) =
            session_with(GameOptions { max_history_items: 0, ..Default::default() });
        saved.start().unwrap();
        for _ in 0..6 {
            saved.cancel_round();
        }
        let state = saved.state();
        assert_eq!(state.history.len(), 6);

        let (restored, _log) =
            session_with(GameOptions { max_history_items: 4, ..Default::default() });
        let restored = restored.restore(state.clone()).unwrap();

        let ids: Vec<_> = restored.history().iter().map(|r| r.id().clone()).collect();
        let expected: Vec<_> = state.history[2..].iter().map(|r| r.round_id.clone()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_restore_rejects_tampered_round() {
        let (mut saved, _log) = session_with(GameOptions::default());
        saved.start().unwrap();
        let mut state = saved.state();
        if let Some(round) = state.current_round.as_mut() {
            round.secret.push('x');
        }

        let (restored, _log) = session_with(GameOptions::default());
        assert!(matches!(restored.restore(state), Err(StateError::HashMismatch { .. })));
    }

    #[rstest]
    #[case::garbage("not json")]
    #[case::wrong_shape(r#"{"GameId": []}"#)]
    fn test_restore_rejects_malformed_json(#[case] json: &str) {
        let (session, _log) = session_with(GameOptions::default());
        assert!(matches!(session.restore_json(json), Err(StateError::Parse(_))));
    }

    #[test]
    fn test_restore_merges_partial_round_options() {
        let options = GameOptions {
            round_hash_algorithm: HashAlgorithm::Sha512,
            max_lucky_number: 36,
            ..Default::default()
        };
        let (session, _log) = session_with(options);
        let hash = commitment_hash(HashAlgorithm::Sha512, "secret", 7);
        let json = format!(
            r#"{{"GameId":"g","CurrentRound":{{"GameOptions":{{"MaxHistoryItems":2}},
                "RoundId":"r","RoundStage":"RollStarted","Hash":"{hash}",
                "Secret":"secret","LuckyNumber":7}},"History":[]}}"#
        );

        let session = session.restore_json(&json).unwrap();
        let round = session.current_round().unwrap();
        assert_eq!(round.hash(), hash);
        assert_eq!(round.options().round_hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(round.options().max_lucky_number, 36);
        assert_eq!(round.options().max_history_items, 2);
    }

    #[test]
    fn test_restore_rejects_invalid_round_options() {
        let (session, _log) = session_with(GameOptions::default());
        let json = r#"{"GameId":"g","CurrentRound":{"GameOptions":{"RoundSecretLength":0},
            "RoundId":"r","RoundStage":"Created","Hash":"","Secret":"","LuckyNumber":0}}"#;

        assert!(matches!(
            session.restore_json(json),
            Err(StateError::Options(OptionsError::EmptySecret))
        ));
    }

    #[test]
    fn test_restore_stops_running_session() {
        let (mut saved, _log) = session_with(GameOptions::default());
        saved.start().unwrap();
        let state = saved.state();

        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();
        session.advance_clock(Duration::from_secs(5));

        let mut session = session.restore(state).unwrap();
        assert!(!session.is_running());
        assert_eq!(session.scheduler().pending(), 0);
        assert_eq!(count(&log, EventName::GameStopped), 1);

        session.start().unwrap();
        assert!(session.is_running());
        assert_eq!(session.current_round().unwrap().id(), saved.current_round().unwrap().id());
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
        assert_eq!(session.scheduler().pending(), 1);
    }

    #[test]
    fn test_restore_without_current_round() {
        let (session, _log) = session_with(GameOptions::default());
        let mut session = session
            .restore_json(r#"{"GameId":"saved","CurrentRound":null,"History":[]}"#)
            .unwrap();
        assert_eq!(session.id().as_str(), "saved");
        assert!(session.current_round().is_none());

        session.start().unwrap();
        assert_eq!(stage(&session), Some(RoundStage::OpenedForBetting));
    }

    #[test]
    fn test_stale_tokens_are_ignored() {
        let (mut session, _log) = session_with(GameOptions::default());
        assert!(!session.fire(TimerToken(999)));

        session.start().unwrap();
        let token = session.current_round().unwrap().pending_timer().unwrap();
        session.cancel_round();
        assert!(!session.fire(token));
    }

    #[test]
    fn test_notifications_reveal_only_terminal_rounds() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();
        session.advance_clock(Duration::from_secs(33));

        let log = log.lock().unwrap();
        for notification in log.iter() {
            if let Some(round) = notification.round() {
                assert_eq!(round.reveal.is_some(), round.stage.is_terminal());
            }
        }
        assert!(log.iter().any(|n| n.round().is_some_and(|r| r.reveal.is_some())));
    }

    #[test]
    fn test_session_info_in_notifications() {
        let (mut session, log) = session_with(GameOptions::default());
        session.start().unwrap();

        let log = log.lock().unwrap();
        let before = log[0].session().unwrap();
        let started = log[3].session().unwrap();
        assert!(!before.running);
        assert!(before.current_round.is_none());
        assert!(started.running);
        assert_eq!(
            started.current_round.as_ref().map(|r| r.stage),
            Some(RoundStage::OpenedForBetting)
        );
    }

    #[test]
    fn test_untimed_rounds_without_auto_start() {
        let options = GameOptions {
            auto_start_new_round: false,
            round_stage_durations: StageDurations::uniform(0),
            ..Default::default()
        };
        let (mut session, _log) = session_with(options);
        session.start().unwrap();

        // The whole sequence runs within the call, then the next round waits.
        session.start_round();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].stage(), RoundStage::Finished);
        assert_eq!(stage(&session), Some(RoundStage::Created));
    }
}
