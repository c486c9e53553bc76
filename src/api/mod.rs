//! HTTP surface: leadership and token diagnostics plus the health probes
//! polled by the orchestrator.

pub mod handlers;
pub mod routes;
pub mod server;

pub use routes::{build_router, ApiState};
pub use server::start_api_server;
