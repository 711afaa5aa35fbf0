//! Core data models used throughout the inventory.
//!
//! These types represent the capture sessions, stored frames, raw
//! detections and durable items that flow through the intake and review
//! pipeline, together with the row mappers that read them back from
//! SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

use crate::error::{InventoryError, InventoryResult};

/// Pixel-space bounding box, serialized as `[x, y, w, h]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

impl From<[f64; 4]> for BBox {
    fn from([x, y, w, h]: [f64; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

/// One result returned by a [`Detector`](crate::detector::Detector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BBox,
    #[serde(default)]
    pub barcode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionState::Running),
            "stopped" => Ok(SessionState::Stopped),
            other => Err(InventoryError::InvalidState(format!(
                "unknown session state '{}'",
                other
            ))),
        }
    }
}

/// One capture session.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub frames_processed: i64,
    pub detections_count: i64,
    pub summary: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    #[default]
    Frame,
    Video,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Frame => "frame",
            AssetKind::Video => "video",
        }
    }
}

impl FromStr for AssetKind {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frame" => Ok(AssetKind::Frame),
            "video" => Ok(AssetKind::Video),
            other => Err(InventoryError::Validation(format!(
                "unknown asset kind '{}'",
                other
            ))),
        }
    }
}

/// A stored frame or video chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ImageAsset {
    pub id: i64,
    pub session_id: String,
    pub kind: AssetKind,
    pub path: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    pub state: String,
}

/// A raw detection, unresolved until `item_id` is set by review.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub id: i64,
    pub item_id: Option<i64>,
    pub session_id: String,
    pub asset_path: String,
    pub label: String,
    pub confidence: f64,
    pub bbox: BBox,
    pub frame_ts: Option<f64>,
    pub barcode: Option<String>,
    pub zone: Option<String>,
    pub crop_path: Option<String>,
}

/// Durable inventory record.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub quantity: i64,
    pub zone: Option<String>,
    pub shelf_label: Option<String>,
    pub confidence: f64,
    pub notes: Option<String>,
    pub image_path: Option<String>,
    pub crop_path: Option<String>,
    pub barcode: Option<String>,
    pub serial_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named physical area. Polygon vertices are image-relative `[x, y]`.
#[derive(Debug, Clone, Serialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    pub polygon: Option<Vec<[f64; 2]>>,
    pub marker_type: Option<String>,
    pub marker_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub synonyms: Vec<String>,
}

// ============ Row mapping ============

pub(crate) const SESSION_COLUMNS: &str =
    "id, started_at, stopped_at, state, frames_processed, detections_count, summary_json";

pub(crate) const DETECTION_COLUMNS: &str = "id, item_id, session_id, asset_path, label, confidence, bbox_json, frame_ts, barcode, zone, crop_path";

pub(crate) const ITEM_COLUMNS: &str = "id, name, category, quantity, zone, shelf_label, confidence, notes, image_path, crop_path, barcode, serial_text, created_at, updated_at";

pub(crate) const ZONE_COLUMNS: &str = "id, name, polygon_json, marker_type, marker_id, notes";

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

pub(crate) fn session_from_row(row: &SqliteRow) -> InventoryResult<StreamSession> {
    let state: String = row.try_get("state")?;
    let stopped_at: Option<i64> = row.try_get("stopped_at")?;
    let summary_json: Option<String> = row.try_get("summary_json")?;
    let summary: Option<serde_json::Value> = summary_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(StreamSession {
        id: row.try_get("id")?,
        started_at: ts(row.try_get("started_at")?),
        stopped_at: stopped_at.map(ts),
        state: state.parse()?,
        frames_processed: row.try_get("frames_processed")?,
        detections_count: row.try_get("detections_count")?,
        summary,
    })
}

pub(crate) const ASSET_COLUMNS: &str =
    "id, session_id, kind, path, width, height, content_hash, captured_at, state";

pub(crate) fn asset_from_row(row: &SqliteRow) -> InventoryResult<ImageAsset> {
    let kind: String = row.try_get("kind")?;
    Ok(ImageAsset {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        kind: kind.parse()?,
        path: row.try_get("path")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        content_hash: row.try_get("content_hash")?,
        captured_at: ts(row.try_get("captured_at")?),
        state: row.try_get("state")?,
    })
}

pub(crate) fn detection_from_row(row: &SqliteRow) -> InventoryResult<Detection> {
    let bbox_json: String = row.try_get("bbox_json")?;
    Ok(Detection {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        session_id: row.try_get("session_id")?,
        asset_path: row.try_get("asset_path")?,
        label: row.try_get("label")?,
        confidence: row.try_get("confidence")?,
        bbox: serde_json::from_str(&bbox_json)?,
        frame_ts: row.try_get("frame_ts")?,
        barcode: row.try_get("barcode")?,
        zone: row.try_get("zone")?,
        crop_path: row.try_get("crop_path")?,
    })
}

pub(crate) fn item_from_row(row: &SqliteRow) -> InventoryResult<Item> {
    Ok(Item {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        quantity: row.try_get("quantity")?,
        zone: row.try_get("zone")?,
        shelf_label: row.try_get("shelf_label")?,
        confidence: row.try_get("confidence")?,
        notes: row.try_get("notes")?,
        image_path: row.try_get("image_path")?,
        crop_path: row.try_get("crop_path")?,
        barcode: row.try_get("barcode")?,
        serial_text: row.try_get("serial_text")?,
        created_at: ts(row.try_get("created_at")?),
        updated_at: ts(row.try_get("updated_at")?),
    })
}

pub(crate) fn zone_from_row(row: &SqliteRow) -> InventoryResult<Zone> {
    let polygon_json: Option<String> = row.try_get("polygon_json")?;
    let polygon: Option<Vec<[f64; 2]>> = polygon_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(Zone {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        polygon,
        marker_type: row.try_get("marker_type")?,
        marker_id: row.try_get("marker_id")?,
        notes: row.try_get("notes")?,
    })
}

pub(crate) fn category_from_row(row: &SqliteRow) -> InventoryResult<Category> {
    let synonyms_json: String = row.try_get("synonyms_json")?;
    Ok(Category {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        parent_id: row.try_get("parent_id")?,
        synonyms: serde_json::from_str(&synonyms_json)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_serializes_as_array() {
        let bbox = BBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(serde_json::to_string(&bbox).unwrap(), "[1.0,2.0,3.0,4.0]");
        let back: BBox = serde_json::from_str("[0, 0, 10, 10]").unwrap();
        assert_eq!(back, BBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_bbox_center() {
        assert_eq!(BBox::new(10.0, 20.0, 30.0, 40.0).center(), (25.0, 40.0));
    }

    #[test]
    fn test_session_state_parse() {
        assert_eq!("running".parse::<SessionState>().unwrap(), SessionState::Running);
        assert_eq!("stopped".parse::<SessionState>().unwrap(), SessionState::Stopped);
        assert!("paused".parse::<SessionState>().is_err());
    }

    #[test]
    fn test_asset_kind_default_is_frame() {
        assert_eq!(AssetKind::default(), AssetKind::Frame);
        assert_eq!("video".parse::<AssetKind>().unwrap(), AssetKind::Video);
    }
}
