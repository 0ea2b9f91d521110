//! End-to-end tests: scripted feed → synchronizer → bet engine → ledger.

mod mock_feed;

mod concurrency;
mod persistence;
mod settlement;
