//! Roulette session runner using the croupier library.
#![allow(unreachable_pub, dead_code, clippy::missing_const_for_fn, clippy::option_if_let_else)]
//!
//! Runs a session on the tokio timer and logs every stage of every round,
//! revealing the secret and lucky number once a round is over.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default options
//! croupier
//!
//! # Resume from and save to a state file
//! croupier --state-file croupier.json
//!
//! # Play three rounds with options from a config file
//! croupier --config croupier.toml --rounds 3
//! ```
//!
//! Ctrl+C stops once the current round has ended. A second Ctrl+C cancels
//! the round and stops at once.

mod config;

use std::path::Path;

use croupier::{
    Notification, NotificationStream, RoundStage, Session, SessionHandle, TokioScheduler,
};
use futures::StreamExt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    info!(?config, "loaded configuration");

    let (scheduler, timers) = TokioScheduler::new();
    let mut session = Session::new(config.options.clone(), scheduler)?;

    if let Some(path) = config.state_file.as_deref().filter(|path| path.exists()) {
        let json = std::fs::read_to_string(path)?;
        session = session.restore_json(&json)?;
        info!(path = %path.display(), "resuming saved session");
    }

    let (handle, task) = croupier::spawn(session, timers);
    let mut notifications = handle.subscribe();
    handle.start().await?;

    tokio::select! {
        () = report(&mut notifications, &handle, config.rounds) => {}
        () = shutdown_signal() => {
            info!("stopping after the current round, press Ctrl+C again to cancel it");
            handle.stop(true)?;

            tokio::select! {
                () = report(&mut notifications, &handle, None) => {}
                _ = signal::ctrl_c() => {
                    handle.stop(false)?;
                    report(&mut notifications, &handle, None).await;
                }
            }
        }
    }

    handle.shutdown()?;
    let session = task.await?;

    if let Some(path) = &config.state_file {
        save(&session, path)?;
    }

    info!(session = %session.id(), rounds = session.history().len(), "croupier stopped");
    Ok(())
}

/// Logs notifications until the session stops.
///
/// With `rounds` set, asks for a graceful stop once that many rounds have
/// been opened, so the last one still plays out.
async fn report(
    notifications: &mut NotificationStream,
    handle: &SessionHandle,
    rounds: Option<u64>,
) {
    let mut opened = 0;

    while let Some(notification) = notifications.next().await {
        match &notification {
            Notification::RoundStageChanged { round, .. } => {
                info!(
                    round = %round.id,
                    hash = %round.hash,
                    ends_at = ?round.stage_ends_at,
                    "{}",
                    round.stage.label()
                );

                if let Some(reveal) = &round.reveal {
                    info!(
                        round = %round.id,
                        lucky_number = reveal.lucky_number,
                        secret = %reveal.secret,
                        "outcome revealed"
                    );
                }

                if round.stage == RoundStage::OpenedForBetting {
                    opened += 1;
                    if rounds.is_some_and(|limit| opened >= limit) {
                        if let Err(err) = handle.stop(true) {
                            warn!(%err, "failed to request stop");
                        }
                    }
                }
            }
            Notification::GameStopped(_) => return,
            _ => {}
        }
    }
}

fn save(session: &Session<TokioScheduler>, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, session.state_json()?)?;
    info!(path = %path.display(), "saved session state");
    Ok(())
}

/// Waits for SIGINT or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
