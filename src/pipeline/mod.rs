pub mod case_key;
pub mod classify;
pub mod extraction;
pub mod import;
pub mod processor; // upload → draft → ledger orchestrator
pub mod reconcile;
