pub mod actor;
pub mod auth;
pub mod job_store;
pub mod ledger;
pub mod normalize;
pub mod orchestrator;
pub mod platform;
pub mod reconciler;
