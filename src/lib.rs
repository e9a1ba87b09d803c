//! Review crawler
//!
//! Imports reviews a user received on third-party platforms into the review
//! ledger. A signed request starts an asynchronous scraping run; a
//! reconciliation loop polls the run, normalizes its results into canonical
//! reviews and hands them to the ledger.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
