//! Frame intake pipeline.
//!
//! Coordinates one upload end to end: session check → payload storage →
//! detection → normalization → zone tagging → storage of the asset and its
//! detections → live event. The database writes of one frame happen in a
//! single transaction, and the event is only published once they commit.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::config::StorageConfig;
use crate::detector::Detector;
use crate::error::{InventoryError, InventoryResult};
use crate::events::{DetectionEvent, EventHub, SessionEvent};
use crate::geometry::zone_for_point;
use crate::models::{AssetKind, RawDetection, SessionState};
use crate::normalize::{frame_size, normalize_bbox, track_token, FrameSize};
use crate::sessions;
use crate::taxonomy;

/// Everything the intake pipeline needs besides the upload itself.
pub struct IngestContext<'a> {
    pub pool: &'a SqlitePool,
    pub storage: &'a StorageConfig,
    pub detector: &'a dyn Detector,
    pub events: &'a EventHub,
}

/// One uploaded frame or video chunk.
#[derive(Debug, Clone)]
pub struct FrameUpload {
    pub session_id: String,
    pub seq: i64,
    pub kind: AssetKind,
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Capture time reported by the client, in seconds.
    pub frame_ts: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub accepted: bool,
    /// Events retained in the session log after this frame.
    pub queued: usize,
    pub frame_id: i64,
    pub asset_id: i64,
    pub detections: usize,
    pub width: u32,
    pub height: u32,
}

pub async fn ingest_frame(
    ctx: &IngestContext<'_>,
    upload: FrameUpload,
) -> InventoryResult<IngestReceipt> {
    let session = sessions::get_session(ctx.pool, &upload.session_id).await?;
    if session.state != SessionState::Running {
        return Err(InventoryError::InvalidState(format!(
            "session {} is {}",
            session.id, session.state
        )));
    }
    if upload.seq < 0 {
        return Err(InventoryError::Validation("seq must be >= 0".to_string()));
    }

    let dir = ctx.storage.session_dir(&session.id);
    tokio::fs::create_dir_all(&dir).await?;
    let name = safe_filename(&upload.filename);
    let dest = store_payload(&dir, upload.seq, &name, &upload.bytes).await?;

    match process_stored_frame(ctx, &upload, &dest).await {
        Ok(receipt) => Ok(receipt),
        Err(e) => {
            // The file was created by this call and nothing references it
            remove_orphan(&dest).await;
            Err(e)
        }
    }
}

/// Writes the payload to a file that did not exist before.
///
/// The first choice is `<seq>_<name>`; a repeated upload of the same seq
/// and name gets `<seq>-<n>_<name>` so earlier assets keep their bytes.
async fn store_payload(
    dir: &Path,
    seq: i64,
    name: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            dir.join(format!("{}_{}", seq, name))
        } else {
            dir.join(format!("{}-{}_{}", seq, attempt, name))
        };
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        match opened {
            Ok(mut file) => {
                let written = match file.write_all(bytes).await {
                    Ok(()) => file.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    drop(file);
                    remove_orphan(&candidate).await;
                    return Err(e);
                }
                if attempt > 0 {
                    tracing::debug!(
                        path = %candidate.display(),
                        "frame name taken, stored under suffix"
                    );
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

async fn remove_orphan(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned frame");
    }
}

async fn process_stored_frame(
    ctx: &IngestContext<'_>,
    upload: &FrameUpload,
    dest: &Path,
) -> InventoryResult<IngestReceipt> {
    let raw = ctx
        .detector
        .detect(dest)
        .await
        .map_err(|e| InventoryError::Detector(format!("{}: {:#}", ctx.detector.name(), e)))?;

    let decode_path: PathBuf = dest.to_path_buf();
    let size = tokio::task::spawn_blocking(move || frame_size(&decode_path))
        .await
        .map_err(|e| InventoryError::Io(std::io::Error::other(e)))?;

    let zones: Vec<_> = taxonomy::list_zones(ctx.pool)
        .await?
        .into_iter()
        .filter(|z| z.polygon.is_some())
        .collect();

    let content_hash = format!("{:x}", Sha256::digest(&upload.bytes));
    let asset_path = dest.to_string_lossy().to_string();
    let now = chrono::Utc::now().timestamp();

    let mut tx = ctx.pool.begin().await?;

    let asset_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO image_assets (session_id, kind, path, width, height, content_hash, captured_at, state)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'uploaded')
        RETURNING id
        "#,
    )
    .bind(&upload.session_id)
    .bind(upload.kind.as_str())
    .bind(&asset_path)
    .bind((!size.is_placeholder()).then_some(i64::from(size.width)))
    .bind((!size.is_placeholder()).then_some(i64::from(size.height)))
    .bind(&content_hash)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let mut payload = Vec::with_capacity(raw.len());
    for (i, det) in raw.iter().enumerate() {
        let event = detection_event(i, det, size);
        let (cx, cy) = det.bbox.center();
        let zone = zone_for_point(
            (cx / f64::from(size.width), cy / f64::from(size.height)),
            &zones,
        )
        .map(|z| z.name.clone());

        sqlx::query(
            r#"
            INSERT INTO detections (session_id, asset_path, label, confidence, bbox_json, frame_ts, barcode, zone)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&upload.session_id)
        .bind(&asset_path)
        .bind(&det.label)
        .bind(det.confidence)
        .bind(serde_json::to_string(&det.bbox)?)
        .bind(upload.frame_ts)
        .bind(det.barcode.as_deref().filter(|b| !b.is_empty()))
        .bind(zone)
        .execute(&mut *tx)
        .await?;

        payload.push(event);
    }

    // Counters only move while the session is running; a concurrent stop
    // turns this frame into an InvalidState failure and rolls it back.
    let updated = sqlx::query(
        r#"
        UPDATE stream_sessions
        SET frames_processed = frames_processed + 1,
            detections_count = detections_count + ?
        WHERE id = ? AND state = ?
        "#,
    )
    .bind(raw.len() as i64)
    .bind(&upload.session_id)
    .bind(SessionState::Running.as_str())
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(InventoryError::InvalidState(format!(
            "session {} stopped during ingest",
            upload.session_id
        )));
    }

    tx.commit().await?;

    let detections = payload.len();
    let queued = ctx.events.publish(
        &upload.session_id,
        SessionEvent::Detections {
            frame_id: upload.seq,
            width: size.width,
            height: size.height,
            detections: payload,
        },
    );

    tracing::info!(
        session_id = %upload.session_id,
        seq = upload.seq,
        asset_id,
        detections,
        width = size.width,
        height = size.height,
        "frame ingested"
    );

    Ok(IngestReceipt {
        accepted: true,
        queued,
        frame_id: upload.seq,
        asset_id,
        detections,
        width: size.width,
        height: size.height,
    })
}

fn detection_event(index: usize, det: &RawDetection, size: FrameSize) -> DetectionEvent {
    DetectionEvent {
        label: det.label.clone(),
        conf: det.confidence,
        bbox: det.bbox,
        norm: normalize_bbox(&det.bbox, size),
        track_id: track_token(index),
    }
}

/// Reduces a client-supplied filename to a safe basename.
pub fn safe_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "frame.bin".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("frame.jpg"), "frame.jpg");
        assert_eq!(safe_filename("../../etc/passwd"), "passwd");
        assert_eq!(safe_filename("my frame (1).png"), "my_frame__1_.png");
        assert_eq!(safe_filename(""), "frame.bin");
        assert_eq!(safe_filename(".."), "frame.bin");
        assert_eq!(safe_filename(".hidden"), "hidden");
    }

    #[test]
    fn test_detection_event_tokens_and_norm() {
        let det = RawDetection {
            label: "wrench".to_string(),
            confidence: 0.9,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            barcode: None,
        };
        let size = FrameSize {
            width: 100,
            height: 200,
        };
        let ev = detection_event(2, &det, size);
        assert_eq!(ev.track_id, "srv-2");
        assert_eq!(ev.norm, [0.0, 0.0, 0.1, 0.05]);
        assert_eq!(ev.conf, 0.9);
    }
}
