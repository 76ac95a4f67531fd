//! WebAPI - Signaling and status endpoints
//!
//! ## Responsibilities
//!
//! - Viewer offer/hangup exchange
//! - Worker and session status
//! - Liveness check

mod routes;

pub use routes::create_router;
