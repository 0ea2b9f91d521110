//! ODDSBOOK: Sportsbook core service
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the store from disk (or creates it fresh), and runs the
//! synchronization loop with graceful shutdown.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use oddsbook::config::AppConfig;
use oddsbook::engine::{Ledger, SyncOutcome, SyncReport, Synchronizer};
use oddsbook::feed::odds_api::OddsApiClient;
use oddsbook::storage::{self, MemoryStore};

const BANNER: &str = r#"
  ___  ____  ____  ____  ____   ___   ___  _  __
 / _ \|  _ \|  _ \/ ___|| __ ) / _ \ / _ \| |/ /
| | | | | | | | | \___ \|  _ \| | | | | | | ' /
| |_| | |_| | |_| |___) | |_) | |_| | |_| | . \
 \___/|____/|____/|____/|____/ \___/ \___/|_|\_\

  Sportsbook core: odds sync, bets, wallet ledger
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        sync_interval_secs = cfg.service.sync_interval_secs,
        markets = ?cfg.feed.markets,
        bookmakers = ?cfg.feed.bookmakers,
        "ODDSBOOK starting up"
    );

    // -- Restore or create the store -------------------------------------

    let state_file = cfg.service.state_file.as_deref();
    let store = match storage::load_state(state_file)? {
        Some(store) => Arc::new(store),
        None => {
            info!("Fresh store");
            Arc::new(MemoryStore::new())
        }
    };
    audit_wallets(&store);

    // -- Initialise components -------------------------------------------

    let api_key = AppConfig::resolve_env(&cfg.feed.api_key_env)
        .context("The Odds API key is required to run the synchronizer")?;
    let feed = OddsApiClient::new(&cfg.feed, SecretString::new(api_key))?;
    let synchronizer = Synchronizer::new(store.clone(), Box::new(feed));

    // -- Main loop -------------------------------------------------------

    let sync_interval = Duration::from_secs(cfg.service.sync_interval_secs);
    let mut interval = tokio::time::interval(sync_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.service.sync_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match synchronizer.run_synchronization().await {
                    Ok(SyncOutcome::Completed(report)) => {
                        log_sync_report(&report);
                        // Persist state after each cycle
                        if let Err(e) = storage::save_state(&store, state_file) {
                            error!(error = %e, "Failed to save state");
                        }
                    }
                    Ok(SyncOutcome::Skipped) => {}
                    Err(e) => {
                        error!(error = %e, "Synchronization failed, retrying next cycle");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Save final state
    storage::save_state(&store, state_file)?;
    let stats = store.stats();
    info!(
        events = stats.events,
        bets = stats.bets,
        wallets = stats.wallets,
        "ODDSBOOK shut down cleanly."
    );

    Ok(())
}

/// Recompute every wallet balance from its log and report drift.
fn audit_wallets(store: &Arc<MemoryStore>) {
    let ledger = Ledger::new(store.clone());
    let mut drifted = 0usize;
    for wallet in store.wallets() {
        match ledger.audit(wallet.id) {
            Ok(audit) if !audit.is_consistent() => drifted += 1,
            Ok(_) => {}
            Err(e) => warn!(wallet = %wallet.id, error = %e, "Wallet audit failed"),
        }
    }
    if drifted > 0 {
        warn!(drifted, "Ledger audit found inconsistent wallets");
    } else {
        info!(wallets = store.stats().wallets, "Ledger audit clean");
    }
}

/// Log a human-readable cycle summary.
fn log_sync_report(report: &SyncReport) {
    info!(
        sports = report.sports_created + report.sports_updated,
        events_created = report.events_created,
        events_updated = report.events_updated,
        markets = report.markets_created + report.markets_updated,
        odds_updates = report.options_updated,
        scores = report.score_updates_appended,
        completed = report.events_completed,
        settled = report.bets_settled(),
        rejected = report.rejected.len(),
        "Cycle complete"
    );
    for settlement in &report.settlements {
        for (bet_id, reason) in &settlement.integrity_gaps {
            warn!(
                event = %settlement.event_id,
                bet = %bet_id,
                reason = %reason,
                "Bet needs manual review"
            );
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("oddsbook=info"));

    let json_logging = std::env::var("ODDSBOOK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
