//! PolicyStore - Camera inventory and detection policies
//!
//! ## Responsibilities
//!
//! - Fetch the desired camera set for reconciliation
//! - Fetch per-camera bed ROI zones and inactivity policies
//! - Append triggered safety events to `edge_events`
//!
//! ## Design Principles
//!
//! - Read-only over configuration; the admin console owns the schema
//! - A dropped connection is retried once on a fresh pool connection,
//!   further failures surface to the caller, which treats them as transient

mod repository;
mod types;

pub use repository::PolicyRepository;
pub use types::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;

/// Build the pool without connecting. The first query opens a connection,
/// so the service starts while the database is down.
pub fn connect_lazy(database_url: &str, acquire_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(acquire_timeout)
        .connect_lazy(database_url)?;
    Ok(pool)
}

/// Source of camera configuration and per-camera policies
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch_cameras(&self) -> Result<Vec<CameraConfig>>;

    async fn fetch_bed_roi_zone(&self, ip_address: &str) -> Result<Option<BedRoiZone>>;

    async fn fetch_inactivity_policy(&self, ip_address: &str) -> Result<Option<InactivityPolicy>>;
}

/// Destination for persisted safety events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn log_edge_event(&self, record: &EdgeEventRecord) -> Result<()>;
}

/// Postgres-backed policy store
#[derive(Clone)]
pub struct PolicyStore {
    repo: PolicyRepository,
}

impl PolicyStore {
    /// Create new PolicyStore
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: PolicyRepository::new(pool),
        }
    }

    async fn with_reconnect<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match f().await {
            Err(e) if is_connection_error(&e) => {
                tracing::warn!(operation, error = %e, "Database connection lost, retrying");
                f().await
            }
            other => other,
        }
    }
}

fn is_connection_error(e: &Error) -> bool {
    matches!(
        e,
        Error::Sqlx(
            sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Tls(_)
                | sqlx::Error::Protocol(_)
        )
    )
}

#[async_trait]
impl PolicySource for PolicyStore {
    async fn fetch_cameras(&self) -> Result<Vec<CameraConfig>> {
        self.with_reconnect("fetch_cameras", || self.repo.get_connected_cameras())
            .await
    }

    async fn fetch_bed_roi_zone(&self, ip_address: &str) -> Result<Option<BedRoiZone>> {
        self.with_reconnect("fetch_bed_roi_zone", || self.repo.get_bed_roi_zone(ip_address))
            .await
    }

    async fn fetch_inactivity_policy(&self, ip_address: &str) -> Result<Option<InactivityPolicy>> {
        self.with_reconnect("fetch_inactivity_policy", || {
            self.repo.get_inactivity_policy(ip_address)
        })
        .await
    }
}

#[async_trait]
impl EventSink for PolicyStore {
    async fn log_edge_event(&self, record: &EdgeEventRecord) -> Result<()> {
        self.with_reconnect("log_edge_event", || self.repo.insert_edge_event(record))
            .await
    }
}
