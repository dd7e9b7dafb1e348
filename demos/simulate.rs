//! Simulated Croupier Session
//!
//! Plays a batch of rounds on a virtual clock and checks every reveal:
//! - Driving a `Session` with `ManualScheduler` instead of wall-clock time
//! - Collecting revealed outcomes from `RoundStageChanged` notifications
//! - Recomputing each commitment hash with `commitment_hash`
//!
//! Run with: `cargo run --example simulate`

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use croupier::{
    EventName, GameOptions, ManualScheduler, Notification, RoundInfo, RoundStage, Session,
    commitment_hash,
};

const ROUNDS: usize = 1_000;

fn main() {
    let options = GameOptions::default();
    let algorithm = options.round_hash_algorithm;
    let mut session =
        Session::new(options.clone(), ManualScheduler::new(0)).expect("default options are valid");

    // Keep every finished round as published
    let finished: Arc<Mutex<Vec<RoundInfo>>> = Arc::default();
    let sink = Arc::clone(&finished);
    session.on(EventName::RoundStageChanged, move |notification| {
        if let Notification::RoundStageChanged { round, .. } = notification {
            if round.stage == RoundStage::Finished {
                sink.lock().expect("lock poisoned").push(round.clone());
            }
        }
    });

    session.start().expect("start failed");
    while finished.lock().expect("lock poisoned").len() < ROUNDS {
        session.advance_clock(Duration::from_secs(1));
    }
    session.stop(false);

    let finished = finished.lock().expect("lock poisoned");
    let span = (options.max_lucky_number - options.min_lucky_number + 1) as usize;
    let mut counts = vec![0usize; span];

    for round in finished.iter() {
        let reveal = round.reveal.as_ref().expect("finished rounds are revealed");
        assert_eq!(
            commitment_hash(algorithm, &reveal.secret, reveal.lucky_number),
            round.hash,
            "round {} does not match its commitment",
            round.id
        );
        counts[(reveal.lucky_number - options.min_lucky_number) as usize] += 1;
    }

    println!("Verified {} rounds ({algorithm})", finished.len());
    for (offset, count) in counts.iter().enumerate() {
        println!("{:>3}: {count}", options.min_lucky_number + offset as i64);
    }
}
