pub mod api;
pub mod config;
pub mod core_state;
pub mod db;
pub mod drafts;
pub mod ledger;
pub mod models;
pub mod pipeline;
