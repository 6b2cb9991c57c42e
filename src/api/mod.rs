//! HTTP API for the review UI and uploaders.
//!
//! Routes are nested under `/api/`. Every handler runs its database work
//! on the blocking pool with the runtime that was current when the request
//! arrived.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::intake_router;
pub use server::{start_server, IntakeServer};
pub use types::ApiContext;
