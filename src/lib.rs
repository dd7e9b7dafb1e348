#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/croupier-rs/croupier/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod events;
pub use events::{EventBus, Listener};

mod fairness;
pub use fairness::{Commitment, HashAlgorithm, commitment_hash};

mod options;
pub use options::{GameOptions, StageDurations};

mod providers;
pub use providers::{ManualScheduler, OsEntropy, SeededEntropy, TokioScheduler};

mod round;
pub use round::{Round, RoundStage};

mod runner;
pub use runner::{NotificationStream, SessionHandle, spawn};

mod session;
pub use session::Session;

mod state;
pub use state::{GameState, RoundState};

mod traits;
pub use traits::{EntropySource, RoundObserver, Scheduler};

mod types;
pub use types::{
    EventName, Notification, OptionsError, Reveal, RoundId, RoundInfo, SessionError, SessionId,
    SessionInfo, StateError, TimerToken,
};
