//! API endpoint handlers.
//!
//! Handlers are thin: they decode the request and hand it to the intake
//! service on the blocking pool.

pub mod config;
pub mod documents;
pub mod drafts;
pub mod health;
pub mod ledger;
