//! Settlement scenarios driven through the synchronizer.

use oddsbook::types::{BetStatus, BookError, EventResult, TransactionType};
use rust_decimal_macros::dec;

use crate::mock_feed::{final_score, fixture, Book};

#[test]
fn away_win_pays_backer_of_away_team_only() {
    let book = Book::new();
    let game = fixture("ab-1", "A", "B", &[("A", 1.6), ("B", 2.5)]);
    book.apply(vec![game.clone()]);

    let user = book.funded_user("punter", dec!(100));
    let on_b = book.bets.place_bet(user.id, dec!(20), &[book.option("ab-1", "B")]).unwrap();
    let on_a = book.bets.place_bet(user.id, dec!(20), &[book.option("ab-1", "A")]).unwrap();
    assert_eq!(book.balance(&user), dec!(60));

    let report = book.apply(vec![final_score(game, "1", "3")]);
    assert_eq!(report.events_completed, 1);
    assert_eq!(book.event("ab-1").result, Some(EventResult::AwayTeamWin));

    let won = book.bets.bet(on_b.id).unwrap();
    assert_eq!(won.status, BetStatus::Won);
    assert_eq!(won.legs[0].status, BetStatus::Won);
    assert_eq!(book.bets.bet(on_a.id).unwrap().status, BetStatus::Lost);

    let credits: Vec<_> = book
        .ledger
        .transactions(user.wallet_id)
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionType::BetWon)
        .collect();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount, dec!(50.00));
    assert_eq!(credits[0].bet_id, Some(on_b.id));
    assert_eq!(book.balance(&user), dec!(110));
    book.assert_ledgers_consistent();
}

#[test]
fn two_leg_parlay_credits_product_of_snapshot_odds() {
    let book = Book::new();
    let g1 = fixture("p-1", "A", "B", &[("A", 2.0), ("B", 1.8)]);
    let g2 = fixture("p-2", "C", "D", &[("C", 1.5), ("D", 2.6)]);
    book.apply(vec![g1.clone(), g2.clone()]);

    let user = book.funded_user("parlay", dec!(10));
    let bet = book
        .bets
        .place_bet(user.id, dec!(10), &[book.option("p-1", "A"), book.option("p-2", "C")])
        .unwrap();
    assert_eq!(book.bets.potential_payout(bet.id).unwrap(), dec!(30.00));
    assert_eq!(book.balance(&user), dec!(0));

    // Prices move after placement; the snapshot still governs the payout
    let mut moved = fixture("p-2", "C", "D", &[("C", 1.1), ("D", 6.0)]);
    if let Some(books) = moved.bookmakers.as_mut() {
        books[0].markets[0].last_update += 30;
    }
    book.apply(vec![moved]);

    book.apply(vec![final_score(g1, "2", "0")]);
    assert_eq!(book.bets.bet(bet.id).unwrap().status, BetStatus::Pending);
    assert_eq!(book.balance(&user), dec!(0));

    book.apply(vec![final_score(g2, "1", "0")]);
    assert_eq!(book.bets.bet(bet.id).unwrap().status, BetStatus::Won);
    assert_eq!(book.balance(&user), dec!(30.00));
    book.assert_ledgers_consistent();
}

#[test]
fn settling_twice_changes_no_balance() {
    let book = Book::new();
    let game = fixture("twice", "A", "B", &[("A", 1.9), ("B", 1.9)]);
    book.apply(vec![game.clone()]);
    let user = book.funded_user("u", dec!(50));
    book.bets.place_bet(user.id, dec!(10), &[book.option("twice", "A")]).unwrap();

    let done = final_score(game, "1", "0");
    book.apply(vec![done.clone()]);
    let balance = book.balance(&user);
    let entries = book.ledger.transactions(user.wallet_id).unwrap().len();

    // Feed repeats the completion, then an operator re-runs settlement
    let again = book.apply(vec![done]);
    assert_eq!(again.events_completed, 0);
    let manual = book.bets.settle_event(book.event("twice").id).unwrap();
    assert!(manual.settled.is_empty());

    assert_eq!(book.balance(&user), balance);
    assert_eq!(book.ledger.transactions(user.wallet_id).unwrap().len(), entries);
}

#[test]
fn void_event_refunds_stake_in_full() {
    let book = Book::new();
    let game = fixture("void", "A", "B", &[("A", 1.9), ("B", 1.9)]);
    book.apply(vec![game.clone()]);
    let user = book.funded_user("u", dec!(40));
    let bet = book.bets.place_bet(user.id, dec!(12.50), &[book.option("void", "B")]).unwrap();

    // Completed with no usable score
    let mut done = game;
    done.completed = Some(true);
    let report = book.apply(vec![done]);
    assert_eq!(report.events_completed, 1);
    assert_eq!(book.event("void").result, None);

    let stored = book.bets.bet(bet.id).unwrap();
    assert_eq!(stored.status, BetStatus::Canceled);
    assert!(stored.legs.iter().all(|l| l.status == BetStatus::Canceled));
    assert_eq!(book.balance(&user), dec!(40));
    book.assert_ledgers_consistent();
}

#[test]
fn parlay_with_void_leg_is_refunded_once_decided() {
    let book = Book::new();
    let g1 = fixture("v-1", "A", "B", &[("A", 2.0), ("B", 1.8)]);
    let g2 = fixture("v-2", "C", "D", &[("C", 1.5), ("D", 2.6)]);
    book.apply(vec![g1.clone(), g2.clone()]);
    let user = book.funded_user("u", dec!(10));
    let bet = book
        .bets
        .place_bet(user.id, dec!(10), &[book.option("v-1", "A"), book.option("v-2", "C")])
        .unwrap();

    book.apply(vec![final_score(g1, "x", "y")]);
    assert_eq!(book.bets.bet(bet.id).unwrap().status, BetStatus::Pending);

    book.apply(vec![final_score(g2, "3", "1")]);
    assert_eq!(book.bets.bet(bet.id).unwrap().status, BetStatus::Canceled);
    assert_eq!(book.balance(&user), dec!(10));
}

#[test]
fn draw_settles_three_way_market() {
    let book = Book::new();
    let game = fixture("draw", "A", "B", &[("A", 2.7), ("Draw", 3.2), ("B", 2.6)]);
    book.apply(vec![game.clone()]);
    let user = book.funded_user("u", dec!(30));
    let on_draw = book.bets.place_bet(user.id, dec!(10), &[book.option("draw", "Draw")]).unwrap();
    let on_home = book.bets.place_bet(user.id, dec!(10), &[book.option("draw", "A")]).unwrap();

    book.apply(vec![final_score(game, "2", "2")]);
    assert_eq!(book.event("draw").result, Some(EventResult::Draw));
    assert_eq!(book.bets.bet(on_draw.id).unwrap().status, BetStatus::Won);
    assert_eq!(book.bets.bet(on_home.id).unwrap().status, BetStatus::Lost);
    assert_eq!(book.balance(&user), dec!(42.00));
}

#[test]
fn long_parlay_with_unrepresentable_payout_is_refused() {
    let book = Book::new();
    let games: Vec<_> = (0..12)
        .map(|i| {
            let (home, away) = (format!("H{i}"), format!("A{i}"));
            fixture(&format!("lp-{i}"), &home, &away, &[(home.as_str(), 1001.0), (away.as_str(), 1.01)])
        })
        .collect();
    book.apply(games.clone());

    let user = book.funded_user("longshot", dec!(100));
    let selections: Vec<_> = (0..12)
        .map(|i| book.option(&format!("lp-{i}"), &format!("H{i}")))
        .collect();
    let err = book.bets.place_bet(user.id, dec!(10), &selections).unwrap_err();
    assert!(matches!(err, BookError::InvalidBetRequest(_)));
    assert_eq!(book.balance(&user), dec!(100));

    // A shorter parlay on the same games still settles with the rest
    let bet = book.bets.place_bet(user.id, dec!(10), &selections[..2]).unwrap();
    let finished: Vec<_> = games.into_iter().map(|g| final_score(g, "1", "0")).collect();
    let report = book.apply(finished);
    assert_eq!(report.events_completed, 12);
    assert_eq!(book.bets.bet(bet.id).unwrap().status, BetStatus::Won);
    assert_eq!(book.balance(&user), dec!(10020100.00));
    book.assert_ledgers_consistent();
}
