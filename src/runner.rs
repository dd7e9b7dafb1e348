//! Tokio driver for a [`Session`].
//!
//! [`spawn`] moves a session onto its own task. From then on the session is
//! only reached through a [`SessionHandle`]: commands are queued and applied
//! one at a time, in between fired stage timers, so listener code never runs
//! concurrently with a session operation.

use std::pin::Pin;

use futures::{Stream, stream};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    session::Session,
    state::GameState,
    traits::Scheduler,
    types::{Notification, SessionError, TimerToken},
};

/// Stream of notifications published by a running session.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Notifications buffered per subscriber before it starts lagging.
const NOTIFICATION_CAPACITY: usize = 256;

enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Stop { wait_for_round: bool },
    MakeNewRound,
    StartRound,
    CancelRound,
    State(oneshot::Sender<GameState>),
    Shutdown,
}

/// Cloneable handle to a session running on its own task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    notifications: broadcast::Sender<Notification>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::RunnerClosed)
    }

    /// Starts the session. See [`Session::start`].
    ///
    /// # Errors
    ///
    /// Returns the session's own error, or [`SessionError::RunnerClosed`] if
    /// the runner has exited.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx))?;
        rx.await.map_err(|_| SessionError::RunnerClosed)?
    }

    /// Stops the session. See [`Session::stop`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RunnerClosed`] if the runner has exited.
    pub fn stop(&self, wait_for_round: bool) -> Result<(), SessionError> {
        self.send(Command::Stop { wait_for_round })
    }

    /// Retires the current round and makes a new one. See
    /// [`Session::make_new_round`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RunnerClosed`] if the runner has exited.
    pub fn make_new_round(&self) -> Result<(), SessionError> {
        self.send(Command::MakeNewRound)
    }

    /// Starts or resumes the current round.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RunnerClosed`] if the runner has exited.
    pub fn start_round(&self) -> Result<(), SessionError> {
        self.send(Command::StartRound)
    }

    /// Cancels the current round.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RunnerClosed`] if the runner has exited.
    pub fn cancel_round(&self) -> Result<(), SessionError> {
        self.send(Command::CancelRound)
    }

    /// Returns the persisted form of the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RunnerClosed`] if the runner has exited.
    pub async fn state(&self) -> Result<GameState, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::State(tx))?;
        rx.await.map_err(|_| SessionError::RunnerClosed)
    }

    /// Asks the runner to exit, handing the session back through the join
    /// handle returned by [`spawn`].
    ///
    /// The session is not stopped; stop it first for a clean shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RunnerClosed`] if the runner has exited.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown)
    }

    /// Subscribes to every notification published from now on.
    ///
    /// A subscriber that falls too far behind skips the oldest
    /// notifications.
    pub fn subscribe(&self) -> NotificationStream {
        let rx = self.notifications.subscribe();
        Box::pin(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => return Some((notification, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}

/// Moves `session` onto a new tokio task.
///
/// `timers` is the receiving end of the session's scheduler, e.g. the one
/// returned by [`TokioScheduler::new`](crate::TokioScheduler::new). The
/// task exits once [`SessionHandle::shutdown`] is called or every handle is
/// dropped, and yields the session back.
pub fn spawn<S>(
    mut session: Session<S>,
    mut timers: mpsc::UnboundedReceiver<TimerToken>,
) -> (SessionHandle, JoinHandle<Session<S>>)
where
    S: Scheduler + 'static,
{
    let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
    let publisher = notifications.clone();
    session.on_any(move |notification| {
        // No subscribers is fine.
        let _ = publisher.send(notification.clone());
    });

    let (commands, mut rx) = mpsc::unbounded_channel();
    let handle = SessionHandle { commands, notifications };

    let task = tokio::spawn(async move {
        info!(session = %session.id(), "session runner started");

        loop {
            tokio::select! {
                Some(token) = timers.recv() => {
                    session.fire(token);
                }
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => apply(&mut session, command),
                },
            }
        }

        info!(session = %session.id(), "session runner exited");
        session
    });

    (handle, task)
}

fn apply<S: Scheduler>(session: &mut Session<S>, command: Command) {
    match command {
        Command::Start(reply) => {
            let _ = reply.send(session.start());
        }
        Command::Stop { wait_for_round } => session.stop(wait_for_round),
        Command::MakeNewRound => session.make_new_round(),
        Command::StartRound => session.start_round(),
        Command::CancelRound => session.cancel_round(),
        Command::State(reply) => {
            let _ = reply.send(session.state());
        }
        Command::Shutdown => debug!("shutdown handled by the runner loop"),
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{
        options::GameOptions,
        providers::{SeededEntropy, TokioScheduler},
        round::RoundStage,
        types::EventName,
    };

    fn spawn_with(options: GameOptions) -> (SessionHandle, JoinHandle<Session<TokioScheduler>>) {
        let (scheduler, timers) = TokioScheduler::new();
        let session = Session::with_entropy(options, scheduler, SeededEntropy::new(5)).unwrap();
        spawn(session, timers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_round_and_stops_gracefully() {
        let (handle, task) = spawn_with(GameOptions::default());
        let mut notifications = handle.subscribe();

        handle.start().await.unwrap();
        handle.stop(true).unwrap();

        let mut stages = Vec::new();
        while let Some(notification) = notifications.next().await {
            if let Notification::RoundStageChanged { round, .. } = &notification {
                stages.push(round.stage);
            }
            if notification.name() == EventName::GameStopped {
                break;
            }
        }

        assert_eq!(
            stages,
            vec![
                RoundStage::OpenedForBetting,
                RoundStage::ClosedForBetting,
                RoundStage::RollStarted,
                RoundStage::RollEnded,
                RoundStage::Finished,
            ]
        );

        handle.shutdown().unwrap();
        let session = task.await.unwrap();
        assert!(!session.is_running());
        assert!(session.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_error_is_returned() {
        let options = GameOptions { auto_make_new_round: false, ..Default::default() };
        let (handle, _task) = spawn_with(options);

        assert_eq!(handle.start().await, Err(SessionError::RoundNotFound));

        handle.make_new_round().unwrap();
        assert_eq!(handle.start().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reflects_commands() {
        let options = GameOptions { auto_start_new_round: false, ..Default::default() };
        let (handle, _task) = spawn_with(options);

        handle.start().await.unwrap();
        let state = handle.state().await.unwrap();
        assert_eq!(state.current_round.map(|r| r.round_stage), Some(RoundStage::Created));

        handle.start_round().unwrap();
        handle.cancel_round().unwrap();
        let state = handle.state().await.unwrap();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].round_stage, RoundStage::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_runner() {
        let (handle, task) = spawn_with(GameOptions::default());
        handle.shutdown().unwrap();
        task.await.unwrap();

        assert_eq!(handle.start().await, Err(SessionError::RunnerClosed));
        assert_eq!(handle.stop(false), Err(SessionError::RunnerClosed));
        assert!(handle.state().await.is_err());
    }
}
