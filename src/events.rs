//! Synchronous publish/subscribe of notifications.

use std::{collections::HashMap, fmt};

use crate::{
    round::{Round, RoundStage},
    traits::RoundObserver,
    types::{EventName, Notification},
};

/// A notification listener.
///
/// Listeners run inline while the notification is being published and only
/// get to read it; they cannot reach back into the session that emits it.
pub type Listener = Box<dyn FnMut(&Notification) + Send>;

/// Typed channels of listeners, one per [`EventName`], plus a wildcard list
/// that receives every notification.
#[derive(Default)]
pub struct EventBus {
    channels: HashMap<EventName, Vec<Listener>>,
    wildcard: Vec<Listener>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels: HashMap<_, _> =
            self.channels.iter().map(|(name, listeners)| (*name, listeners.len())).collect();
        f.debug_struct("EventBus")
            .field("channels", &channels)
            .field("wildcard", &self.wildcard.len())
            .finish()
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to one channel.
    pub fn on<F>(&mut self, name: EventName, listener: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.channels.entry(name).or_default().push(Box::new(listener));
    }

    /// Subscribes `listener` to every channel.
    pub fn on_any<F>(&mut self, listener: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.wildcard.push(Box::new(listener));
    }

    /// Number of listeners that will see a notification on `name`.
    pub fn listener_count(&self, name: EventName) -> usize {
        self.channels.get(&name).map_or(0, Vec::len) + self.wildcard.len()
    }

    /// Publishes a notification.
    ///
    /// Channel listeners run first, in subscription order, then the wildcard
    /// listeners.
    pub fn emit(&mut self, notification: &Notification) {
        if let Some(listeners) = self.channels.get_mut(&notification.name()) {
            for listener in listeners.iter_mut() {
                listener(notification);
            }
        }

        for listener in &mut self.wildcard {
            listener(notification);
        }
    }
}

/// Publishes a round's transitions as round-level notifications.
impl RoundObserver for EventBus {
    fn before_stage_change(&mut self, round: &Round) {
        self.emit(&Notification::BeforeRoundStageChange { round: round.info() });
    }

    fn stage_changed(&mut self, previous: RoundStage, round: &Round) {
        self.emit(&Notification::RoundStageChanged { previous, round: round.info() });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        options::GameOptions,
        providers::{ManualScheduler, SeededEntropy},
    };

    fn collector(bus: &mut EventBus, name: Option<EventName>) -> Arc<Mutex<Vec<EventName>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = move |n: &Notification| sink.lock().unwrap().push(n.name());
        match name {
            Some(name) => bus.on(name, listener),
            None => bus.on_any(listener),
        }
        seen
    }

    #[test]
    fn test_channel_listeners_only_see_their_channel() {
        let mut bus = EventBus::new();
        let changed = collector(&mut bus, Some(EventName::RoundStageChanged));
        let all = collector(&mut bus, None);

        let mut round = Round::new(GameOptions::default(), &mut SeededEntropy::new(3));
        round.start(&mut ManualScheduler::new(0), &mut bus);

        assert_eq!(*changed.lock().unwrap(), vec![EventName::RoundStageChanged]);
        assert_eq!(
            *all.lock().unwrap(),
            vec![EventName::BeforeRoundStageChange, EventName::RoundStageChanged]
        );
    }

    #[test]
    fn test_listener_count() {
        let mut bus = EventBus::new();
        assert_eq!(bus.listener_count(EventName::GameStarted), 0);

        bus.on(EventName::GameStarted, |_| {});
        bus.on_any(|_| {});

        assert_eq!(bus.listener_count(EventName::GameStarted), 2);
        assert_eq!(bus.listener_count(EventName::GameStopped), 1);
    }

    #[test]
    fn test_round_notifications_carry_stages() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on_any(move |n| sink.lock().unwrap().push(n.clone()));

        let mut round = Round::new(GameOptions::default(), &mut SeededEntropy::new(3));
        round.start(&mut ManualScheduler::new(0), &mut bus);

        let seen = seen.lock().unwrap();
        assert!(matches!(
            &seen[0],
            Notification::BeforeRoundStageChange { round } if round.stage == RoundStage::Created
        ));
        assert!(matches!(
            &seen[1],
            Notification::RoundStageChanged { previous: RoundStage::Created, round }
                if round.stage == RoundStage::OpenedForBetting
        ));
    }
}
