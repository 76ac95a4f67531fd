//! PolicyStore Repository
//!
//! Database access layer over the console's Postgres schema

use super::types::*;
use crate::error::Result;
use sqlx::PgPool;

/// Policy repository for database operations
#[derive(Clone)]
pub struct PolicyRepository {
    pool: PgPool,
}

impl PolicyRepository {
    /// Create new repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========================================
    // Cameras
    // ========================================

    /// Connected IPCs with their fall detection flag
    pub async fn get_connected_cameras(&self) -> Result<Vec<CameraConfig>> {
        let cameras = sqlx::query_as::<_, CameraConfig>(
            r#"
            SELECT
                host(ci.ip_address) AS ip_address,
                ci.mac_address::text AS mac_address,
                ci.ipc_name,
                ci.custom_name,
                COALESCE(ci.ipc_account, '') AS ipc_account,
                COALESCE(ci.ipc_password, '') AS ipc_password,
                COALESCE(fdp.enabled, FALSE) AS fall_detection_enabled
            FROM connected_ipc ci
            LEFT JOIN ipc_fall_detection_policy fdp
                ON fdp.ip_address = ci.ip_address
            ORDER BY ci.ip_address
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(cameras)
    }

    // ========================================
    // Policies
    // ========================================

    /// Enabled bed ROI zone for a camera
    pub async fn get_bed_roi_zone(&self, ip_address: &str) -> Result<Option<BedRoiZone>> {
        let row = sqlx::query_as::<_, BedRoiRow>(
            r#"
            SELECT
                host(ip_address) AS ip_address,
                points::text AS points,
                enabled,
                quiet_start,
                quiet_end
            FROM ipc_bed_roi_zones
            WHERE enabled = TRUE AND ip_address = $1::inet
            LIMIT 1
            "#,
        )
        .bind(ip_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BedRoiZone::from))
    }

    /// Inactivity policy for a camera
    pub async fn get_inactivity_policy(&self, ip_address: &str) -> Result<Option<InactivityPolicy>> {
        let policy = sqlx::query_as::<_, InactivityPolicy>(
            r#"
            SELECT
                COALESCE(enabled, FALSE) AS enabled,
                COALESCE(idle_minutes, 0) AS idle_minutes,
                quiet_start,
                quiet_end,
                COALESCE(quiet_enabled, FALSE) AS quiet_enabled
            FROM ipc_inactivity_policy
            WHERE ip_address = $1::inet
            LIMIT 1
            "#,
        )
        .bind(ip_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(policy)
    }

    // ========================================
    // Events
    // ========================================

    /// Append one edge event
    pub async fn insert_edge_event(&self, record: &EdgeEventRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO edge_events (event_type, payload, occurred_at) VALUES ($1, $2, $3)",
        )
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
