//! Core types for the croupier session engine.
//!
//! This module contains identifiers, the notification vocabulary shared by
//! rounds and sessions, and the error types used throughout the crate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::round::RoundStage;

/// Opaque identifier of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

/// Opaque identifier of a round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(SessionId);
string_id!(RoundId);

/// Handle returned by a [`Scheduler`](crate::Scheduler) for a pending
/// delayed continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// Name of a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// Emitted before a session starts.
    BeforeGameStart,
    /// Emitted once a session has started.
    GameStarted,
    /// Emitted before a session stops.
    BeforeGameStop,
    /// Emitted once a session has stopped.
    GameStopped,
    /// Emitted before a round leaves its current stage.
    BeforeRoundStageChange,
    /// Emitted after a round entered a new stage.
    RoundStageChanged,
}

impl EventName {
    /// All channel names, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::BeforeGameStart,
        Self::GameStarted,
        Self::BeforeGameStop,
        Self::GameStopped,
        Self::BeforeRoundStageChange,
        Self::RoundStageChanged,
    ];

    /// Returns the channel name as a string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeGameStart => "BeforeGameStart",
            Self::GameStarted => "GameStarted",
            Self::BeforeGameStop => "BeforeGameStop",
            Self::GameStopped => "GameStopped",
            Self::BeforeRoundStageChange => "BeforeRoundStageChange",
            Self::RoundStageChanged => "RoundStageChanged",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The revealed half of a round's commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reveal {
    /// The secret used as the keyed-hash key.
    pub secret: String,
    /// The outcome of the round.
    pub lucky_number: i64,
}

/// Point-in-time view of a round, as carried by notifications.
///
/// The reveal is only populated once the round reached a terminal stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundInfo {
    /// Round identifier.
    pub id: RoundId,
    /// Stage at the time the snapshot was taken.
    pub stage: RoundStage,
    /// Commitment hash published at round creation.
    pub hash: String,
    /// Unix time (seconds) at which the current stage started.
    pub stage_started_at: Option<u64>,
    /// Unix time (seconds) at which the current stage will end.
    pub stage_ends_at: Option<u64>,
    /// Secret and outcome, once revealed.
    pub reveal: Option<Reveal>,
}

/// Point-in-time view of a session, as carried by notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Whether the session is running.
    pub running: bool,
    /// Whether a graceful stop is pending on the current round.
    pub waiting_to_end: bool,
    /// The current round, if any.
    pub current_round: Option<RoundInfo>,
    /// Number of retired rounds kept in history.
    pub history_len: usize,
}

/// A notification published on one of the [`EventName`] channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// See [`EventName::BeforeGameStart`].
    BeforeGameStart(SessionInfo),
    /// See [`EventName::GameStarted`].
    GameStarted(SessionInfo),
    /// See [`EventName::BeforeGameStop`].
    BeforeGameStop(SessionInfo),
    /// See [`EventName::GameStopped`].
    GameStopped(SessionInfo),
    /// See [`EventName::BeforeRoundStageChange`].
    BeforeRoundStageChange {
        /// The round, still in the stage it is about to leave.
        round: RoundInfo,
    },
    /// See [`EventName::RoundStageChanged`].
    RoundStageChanged {
        /// The stage the round left.
        previous: RoundStage,
        /// The round, already in its new stage.
        round: RoundInfo,
    },
}

impl Notification {
    /// Returns the channel this notification is published on.
    pub const fn name(&self) -> EventName {
        match self {
            Self::BeforeGameStart(_) => EventName::BeforeGameStart,
            Self::GameStarted(_) => EventName::GameStarted,
            Self::BeforeGameStop(_) => EventName::BeforeGameStop,
            Self::GameStopped(_) => EventName::GameStopped,
            Self::BeforeRoundStageChange { .. } => EventName::BeforeRoundStageChange,
            Self::RoundStageChanged { .. } => EventName::RoundStageChanged,
        }
    }

    /// Returns the session payload of a session-level notification.
    pub const fn session(&self) -> Option<&SessionInfo> {
        match self {
            Self::BeforeGameStart(info)
            | Self::GameStarted(info)
            | Self::BeforeGameStop(info)
            | Self::GameStopped(info) => Some(info),
            _ => None,
        }
    }

    /// Returns the round payload of a round-level notification.
    pub const fn round(&self) -> Option<&RoundInfo> {
        match self {
            Self::BeforeRoundStageChange { round } | Self::RoundStageChanged { round, .. } => {
                Some(round)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundStageChanged { previous, round } => {
                write!(f, "{} {{ round: {}, {} -> {} }}", self.name(), round.id, previous, round.stage)
            }
            Self::BeforeRoundStageChange { round } => {
                write!(f, "{} {{ round: {}, stage: {} }}", self.name(), round.id, round.stage)
            }
            Self::BeforeGameStart(info)
            | Self::GameStarted(info)
            | Self::BeforeGameStop(info)
            | Self::GameStopped(info) => write!(f, "{} {{ session: {} }}", self.name(), info.id),
        }
    }
}

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// `start` was called with no current round while automatic round
    /// creation is disabled.
    #[error("no rounds were found to start")]
    RoundNotFound,

    /// The runner task owning the session has exited.
    #[error("session runner closed")]
    RunnerClosed,
}

/// Errors raised when validating [`GameOptions`](crate::GameOptions).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    /// The outcome bounds are inverted.
    #[error("invalid lucky number range: min {min} is greater than max {max}")]
    InvalidLuckyRange {
        /// Configured lower bound.
        min: i64,
        /// Configured upper bound.
        max: i64,
    },

    /// The configured secret length is zero.
    #[error("round secret length must be greater than zero")]
    EmptySecret,

    /// Every stage duration is zero while rounds auto-continue.
    #[error("at least one stage duration must be non-zero when rounds auto-continue")]
    NoTimedStage,
}

/// Errors raised while restoring persisted state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The serialized state could not be parsed.
    #[error("failed to parse game state: {0}")]
    Parse(#[from] serde_json::Error),

    /// A saved round's hash does not match its secret and outcome.
    #[error("hash mismatch for round {round_id}")]
    HashMismatch {
        /// The offending round.
        round_id: RoundId,
    },

    /// The options of the restoring session are invalid.
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
}
