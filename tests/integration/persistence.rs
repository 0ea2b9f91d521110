//! State survives a save/load cycle and settlement continues afterwards.

use rust_decimal_macros::dec;
use std::sync::Arc;

use oddsbook::storage::{self, Repository};
use oddsbook::types::BetStatus;

use crate::mock_feed::{final_score, fixture, Book};

fn temp_path() -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("oddsbook_it_state_{}.json", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}

#[test]
fn restart_then_settle() {
    let path = temp_path();
    let game = fixture("persist", "A", "B", &[("A", 1.8), ("B", 2.5)]);

    let (user, bet_id, event_id) = {
        let book = Book::new();
        book.apply(vec![game.clone()]);
        let user = book.funded_user("keeper", dec!(60));
        let bet = book
            .bets
            .place_bet(user.id, dec!(20), &[book.option("persist", "B")])
            .unwrap();
        storage::save_state(&book.store, Some(&path)).unwrap();
        (user, bet.id, book.event("persist").id)
    };

    let restored = storage::load_state(Some(&path)).unwrap().unwrap();
    let book = Book::with_store(Arc::new(restored));

    // Indexes rebuilt on load
    let pending = book.store.read(|r| r.pending_bets_on_event(event_id)).unwrap();
    assert_eq!(pending.len(), 1);
    let again = book.ledger.open_wallet("keeper", None, None).unwrap();
    assert_eq!(again.wallet_id, user.wallet_id);

    // Same feed event maps onto the stored row, no duplicate
    let report = book.apply(vec![final_score(game, "0", "1")]);
    assert_eq!(report.events_created, 0);
    assert_eq!(report.events_completed, 1);

    assert_eq!(book.bets.bet(bet_id).unwrap().status, BetStatus::Won);
    assert_eq!(book.balance(&user), dec!(90.00));
    book.assert_ledgers_consistent();

    storage::delete_state(Some(&path)).unwrap();
}
