//! Placement races against a single wallet and against synchronization.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use oddsbook::engine::SyncOutcome;
use oddsbook::types::{BetStatus, BookError};

use crate::mock_feed::{final_score, fixture, snapshot, Book};

#[test]
fn concurrent_placements_never_overdraw() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 5;
    let stake = dec!(7);
    let funds = dec!(100);

    let book = Book::new();
    book.apply(vec![fixture("race", "A", "B", &[("A", 1.9), ("B", 1.9)])]);
    let user = book.funded_user("racer", funds);
    let option = book.option("race", "A");

    let accepted = AtomicUsize::new(0);
    let refused = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..PER_THREAD {
                    match book.bets.place_bet(user.id, stake, &[option]) {
                        Ok(_) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(BookError::InsufficientFunds { .. }) => {
                            refused.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            });
        }
    });

    let accepted = accepted.load(Ordering::SeqCst);
    assert_eq!(accepted + refused.load(Ordering::SeqCst), THREADS * PER_THREAD);
    assert!(Decimal::from(accepted) * stake <= funds);
    // 100 / 7 → exactly 14 stakes fit
    assert_eq!(accepted, 14);
    assert_eq!(book.balance(&user), funds - Decimal::from(accepted) * stake);
    assert_eq!(book.bets.bets_for_user(user.id).unwrap().len(), accepted);
    book.assert_ledgers_consistent();
}

#[test]
fn placement_racing_odds_updates_and_settlement() {
    let book = Book::new();
    let game = fixture("live", "A", "B", &[("A", 2.0), ("B", 1.8)]);
    book.apply(vec![game.clone()]);
    let option = book.option("live", "A");

    let users: Vec<_> = (0..4)
        .map(|i| book.funded_user(&format!("u{i}"), dec!(50)))
        .collect();

    thread::scope(|s| {
        // Odds keep moving while bettors place
        s.spawn(|| {
            for step in 1..=20i64 {
                let mut moved = game.clone();
                if let Some(books) = moved.bookmakers.as_mut() {
                    let market = &mut books[0].markets[0];
                    market.last_update += step;
                    market.outcomes[0].price = 2.0 + step as f64 / 100.0;
                }
                book.apply(vec![moved]);
            }
        });
        let book = &book;
        for user in &users {
            s.spawn(move || {
                for _ in 0..5 {
                    let _ = book.bets.place_bet(user.id, dec!(5), &[option]);
                }
            });
        }
    });

    book.apply(vec![final_score(game, "1", "0")]);

    for user in &users {
        let bets = book.bets.bets_for_user(user.id).unwrap();
        assert_eq!(bets.len(), 5);
        let expected: Decimal = dec!(50)
            - dec!(25)
            + bets.iter().map(|b| b.potential_payout().unwrap()).sum::<Decimal>();
        assert!(bets.iter().all(|b| b.status == BetStatus::Won));
        assert!(bets.iter().all(|b| b.legs[0].odds >= dec!(2.0) && b.legs[0].odds <= dec!(2.2)));
        assert_eq!(book.balance(user), expected);
    }
    book.assert_ledgers_consistent();
}

#[test]
fn overlapping_runs_from_threads_are_skipped_not_doubled() {
    const CALLS_PER_THREAD: usize = 10;
    let book = Book::new();
    for i in 0..(2 * CALLS_PER_THREAD) {
        book.feed.push(snapshot(vec![fixture(
            &format!("ov-{i}"),
            "A",
            "B",
            &[("A", 1.8), ("B", 2.1)],
        )]));
    }

    let completed = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                for _ in 0..CALLS_PER_THREAD {
                    match tokio_test::block_on(book.sync.run_synchronization()) {
                        Ok(SyncOutcome::Completed(_)) => completed.fetch_add(1, Ordering::SeqCst),
                        Ok(SyncOutcome::Skipped) => skipped.fetch_add(1, Ordering::SeqCst),
                        Err(e) => panic!("unexpected error: {e}"),
                    };
                }
            });
        }
    });

    let completed = completed.load(Ordering::SeqCst);
    assert_eq!(completed + skipped.load(Ordering::SeqCst), 2 * CALLS_PER_THREAD);
    // Skipped runs never consume a snapshot
    assert_eq!(book.feed.remaining(), 2 * CALLS_PER_THREAD - completed);
    assert_eq!(book.store.stats().events, completed);
}
