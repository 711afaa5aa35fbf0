//! Capture session lifecycle.
//!
//! A session is created `running`, accumulates frame and detection
//! counters while frames are ingested, and is frozen once `stopped`.
//! Stopping records a summary of what the session saw.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{InventoryError, InventoryResult};
use crate::models::{
    asset_from_row, session_from_row, ImageAsset, SessionState, StreamSession, ASSET_COLUMNS,
    SESSION_COLUMNS,
};

/// Summary stored on a stopped session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub frames_processed: i64,
    pub detections_count: i64,
    /// Detections per label, including ones already resolved.
    pub labels: BTreeMap<String, i64>,
}

pub async fn start_session(pool: &SqlitePool) -> InventoryResult<StreamSession> {
    let id = Uuid::new_v4().simple().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query("INSERT INTO stream_sessions (id, started_at, state) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(now)
        .bind(SessionState::Running.as_str())
        .execute(pool)
        .await?;

    tracing::info!(session_id = %id, "capture session started");
    get_session(pool, &id).await
}

pub async fn find_session(pool: &SqlitePool, id: &str) -> InventoryResult<Option<StreamSession>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM stream_sessions WHERE id = ?",
        SESSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(session_from_row).transpose()
}

pub async fn get_session(pool: &SqlitePool, id: &str) -> InventoryResult<StreamSession> {
    find_session(pool, id)
        .await?
        .ok_or_else(|| InventoryError::SessionNotFound(id.to_string()))
}

/// All sessions, newest first.
pub async fn list_sessions(pool: &SqlitePool) -> InventoryResult<Vec<StreamSession>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM stream_sessions ORDER BY started_at DESC, rowid DESC",
        SESSION_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(session_from_row).collect()
}

/// Stored frames of a session in ingest order.
pub async fn session_assets(pool: &SqlitePool, id: &str) -> InventoryResult<Vec<ImageAsset>> {
    get_session(pool, id).await?;
    let rows = sqlx::query(&format!(
        "SELECT {} FROM image_assets WHERE session_id = ? ORDER BY id ASC",
        ASSET_COLUMNS
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(asset_from_row).collect()
}

/// Stops a session and records its summary.
///
/// Stopping an already stopped session returns it unchanged.
pub async fn stop_session(pool: &SqlitePool, id: &str) -> InventoryResult<StreamSession> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!(
        "SELECT {} FROM stream_sessions WHERE id = ?",
        SESSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| InventoryError::SessionNotFound(id.to_string()))?;
    let session = session_from_row(&row)?;

    if session.state == SessionState::Stopped {
        return Ok(session);
    }

    let label_rows = sqlx::query(
        "SELECT label, COUNT(*) AS n FROM detections WHERE session_id = ? GROUP BY label",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;
    let mut labels = BTreeMap::new();
    for row in &label_rows {
        labels.insert(row.try_get::<String, _>("label")?, row.try_get::<i64, _>("n")?);
    }

    let summary = SessionSummary {
        frames_processed: session.frames_processed,
        detections_count: session.detections_count,
        labels,
    };

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "UPDATE stream_sessions SET state = ?, stopped_at = ?, summary_json = ? WHERE id = ? AND state = ?",
    )
    .bind(SessionState::Stopped.as_str())
    .bind(now)
    .bind(serde_json::to_string(&summary)?)
    .bind(id)
    .bind(SessionState::Running.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        session_id = %id,
        frames = summary.frames_processed,
        detections = summary.detections_count,
        "capture session stopped"
    );
    get_session(pool, id).await
}

/// CLI entry point: prints every session.
pub async fn run_list_sessions(pool: &SqlitePool) -> anyhow::Result<()> {
    let sessions = list_sessions(pool).await?;
    if sessions.is_empty() {
        println!("No capture sessions.");
        return Ok(());
    }

    println!(
        "{:<34} {:<8} {:>7} {:>10}  STARTED",
        "SESSION", "STATE", "FRAMES", "DETECTIONS"
    );
    for s in &sessions {
        println!(
            "{:<34} {:<8} {:>7} {:>10}  {}",
            s.id,
            s.state,
            s.frames_processed,
            s.detections_count,
            s.started_at.format("%Y-%m-%dT%H:%M:%SZ")
        );
    }
    Ok(())
}
