//! Property tests for grant/revoke sequences

use std::sync::Arc;

use keyholder::leadership::{LeadershipListener, LeadershipState, PublishRequest};
use proptest::prelude::*;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
enum Notification {
    Granted,
    Revoked,
}

fn notification() -> impl Strategy<Value = Notification> {
    prop_oneof![Just(Notification::Granted), Just(Notification::Revoked)]
}

fn drain(rx: &mut mpsc::Receiver<PublishRequest>) -> Vec<u64> {
    let mut terms = Vec::new();
    while let Ok(request) = rx.try_recv() {
        terms.push(request.term);
    }
    terms
}

proptest! {
    #[test]
    fn flag_matches_last_notification(sequence in prop::collection::vec(notification(), 1..64)) {
        let (tx, _rx) = mpsc::channel(128);
        let state = LeadershipState::new(tx);

        for n in &sequence {
            match n {
                Notification::Granted => state.granted(),
                Notification::Revoked => state.revoked(),
            }
        }

        let expected = matches!(sequence.last(), Some(Notification::Granted));
        prop_assert_eq!(state.is_leader(), expected);
    }

    #[test]
    fn one_publish_request_per_promotion(sequence in prop::collection::vec(notification(), 0..64)) {
        let (tx, mut rx) = mpsc::channel(128);
        let state = LeadershipState::new(tx);

        let mut leader = false;
        let mut promotions = 0u64;
        for n in &sequence {
            match n {
                Notification::Granted => {
                    if !leader {
                        promotions += 1;
                    }
                    leader = true;
                    state.granted();
                }
                Notification::Revoked => {
                    leader = false;
                    state.revoked();
                }
            }
        }

        let terms = drain(&mut rx);
        prop_assert_eq!(terms.len() as u64, promotions);
        prop_assert_eq!(terms, (1..=promotions).collect::<Vec<_>>());
        prop_assert_eq!(state.current_term(), promotions);
    }
}

#[test]
fn documented_examples() {
    let (tx, _rx) = mpsc::channel(8);
    let state = LeadershipState::new(tx);
    state.granted();
    state.granted();
    state.revoked();
    assert!(!state.is_leader());

    let (tx, _rx) = mpsc::channel(8);
    let state = LeadershipState::new(tx);
    state.revoked();
    state.granted();
    assert!(state.is_leader());
}

#[test]
fn listener_is_usable_as_trait_object() {
    let (tx, mut rx) = mpsc::channel(8);
    let state = Arc::new(LeadershipState::new(tx));
    let listener: Arc<dyn LeadershipListener> = state.clone();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let listener = Arc::clone(&listener);
            std::thread::spawn(move || listener.granted())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(state.is_leader());
    assert_eq!(drain(&mut rx), vec![1]);
}
