//! Review of unresolved detections.
//!
//! Unresolved detections of a session are grouped into *proposals*: one
//! group per barcode, or per label when a detection has no barcode. An
//! operator then resolves each proposal:
//!
//! | Action | Effect |
//! |--------|--------|
//! | accept | creates an item and attaches every detection of the group |
//! | reject | deletes every detection of the group |
//! | merge  | attaches every detection of the group to an existing item |
//!
//! Each resolution re-reads the unresolved set inside its own transaction,
//! so it applies to the whole group or to nothing. A proposal that has
//! already been resolved is reported as [`InventoryError::ProposalNotFound`].
//!
//! Grouping by label means that two different physical items of the same
//! class collapse into one proposal until they carry barcodes.

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;

use crate::error::{InventoryError, InventoryResult};
use crate::items::{fetch_item, insert_item, DetectedAttributes, ItemFields};
use crate::models::{detection_from_row, Detection, Item, DETECTION_COLUMNS};

/// Where a group's key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    Barcode,
    Label,
}

/// Unresolved detections sharing one key, in detection order.
#[derive(Debug, Clone)]
pub struct ProposalGroup {
    pub key: String,
    pub source: KeySource,
    pub detections: Vec<Detection>,
}

impl ProposalGroup {
    pub fn mean_confidence(&self) -> f64 {
        if self.detections.is_empty() {
            return 0.0;
        }
        let total: f64 = self.detections.iter().map(|d| d.confidence).sum();
        total / self.detections.len() as f64
    }

    pub fn detection_ids(&self) -> Vec<i64> {
        self.detections.iter().map(|d| d.id).collect()
    }

    fn first(&self) -> &Detection {
        &self.detections[0]
    }

    pub fn to_proposal(&self) -> Proposal {
        let first = self.first();
        Proposal {
            temp_id: self.key.clone(),
            key_source: self.source,
            name_guess: first.label.clone(),
            category_guess: first.label.clone(),
            zone_guess: first.zone.clone(),
            confidence: self.mean_confidence(),
            barcode: first.barcode.clone(),
            crop_paths: self
                .detections
                .iter()
                .filter_map(|d| d.crop_path.clone())
                .filter(|p| !p.is_empty())
                .collect(),
            detection_ids: self.detection_ids(),
        }
    }
}

/// A candidate inventory item shown to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct Proposal {
    pub temp_id: String,
    pub key_source: KeySource,
    pub name_guess: String,
    pub category_guess: String,
    pub zone_guess: Option<String>,
    pub confidence: f64,
    pub barcode: Option<String>,
    pub crop_paths: Vec<String>,
    pub detection_ids: Vec<i64>,
}

/// Grouping key of a detection: its barcode if non-empty, else its label.
pub fn group_key(det: &Detection) -> (String, KeySource) {
    match det.barcode.as_deref() {
        Some(code) if !code.is_empty() => (code.to_string(), KeySource::Barcode),
        _ => (det.label.clone(), KeySource::Label),
    }
}

/// Partitions detections into groups in one pass.
///
/// Groups are ordered by the first appearance of their key. Keys compare
/// as plain strings, so a barcode equal to some label shares its group.
pub fn group_detections(detections: Vec<Detection>) -> Vec<ProposalGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<ProposalGroup> = Vec::new();

    for det in detections {
        let (key, source) = group_key(&det);
        match index.get(&key) {
            Some(&i) => groups[i].detections.push(det),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(ProposalGroup {
                    key,
                    source,
                    detections: vec![det],
                });
            }
        }
    }

    groups
}

async fn unresolved_detections(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> InventoryResult<Vec<Detection>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM detections WHERE session_id = ? AND item_id IS NULL ORDER BY id ASC",
        DETECTION_COLUMNS
    ))
    .bind(session_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(detection_from_row).collect()
}

async fn find_group(
    conn: &mut SqliteConnection,
    session_id: &str,
    temp_id: &str,
) -> InventoryResult<ProposalGroup> {
    let detections = unresolved_detections(conn, session_id).await?;
    group_detections(detections)
        .into_iter()
        .find(|g| g.key == temp_id)
        .ok_or_else(|| InventoryError::ProposalNotFound(temp_id.to_string()))
}

/// Points every detection of the group at `item_id`.
///
/// Only unresolved rows are touched, so a resolved detection is never
/// reassigned.
async fn attach_group(
    conn: &mut SqliteConnection,
    group: &ProposalGroup,
    item_id: i64,
) -> InventoryResult<()> {
    for det in &group.detections {
        let updated = sqlx::query("UPDATE detections SET item_id = ? WHERE id = ? AND item_id IS NULL")
            .bind(item_id)
            .bind(det.id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if updated != 1 {
            return Err(InventoryError::ProposalNotFound(group.key.clone()));
        }
    }
    Ok(())
}

/// Current proposals of a session.
pub async fn list_proposals(pool: &SqlitePool, session_id: &str) -> InventoryResult<Vec<Proposal>> {
    let mut conn = pool.acquire().await?;
    let detections = unresolved_detections(&mut conn, session_id).await?;
    Ok(group_detections(detections)
        .iter()
        .map(ProposalGroup::to_proposal)
        .collect())
}

/// Outcome of accepting or merging a proposal.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub item: Item,
    pub detection_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptRequest {
    pub temp_id: String,
    #[serde(flatten)]
    pub fields: ItemFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectRequest {
    pub temp_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub temp_id: String,
    pub target_item_id: i64,
}

/// Creates an item from `fields` and attaches the whole group to it.
pub async fn accept(
    pool: &SqlitePool,
    session_id: &str,
    temp_id: &str,
    fields: ItemFields,
) -> InventoryResult<Resolution> {
    fields.validate()?;
    let mut tx = pool.begin().await?;

    let group = find_group(&mut tx, session_id, temp_id).await?;
    let first = group.first();
    let detected = DetectedAttributes {
        confidence: group.mean_confidence(),
        barcode: first.barcode.clone().filter(|b| !b.is_empty()),
        image_path: Some(first.asset_path.clone()),
        crop_path: group
            .detections
            .iter()
            .find_map(|d| d.crop_path.clone().filter(|p| !p.is_empty())),
    };

    let item = insert_item(&mut tx, &fields, &detected).await?;
    attach_group(&mut tx, &group, item.id).await?;

    tx.commit().await?;

    tracing::info!(
        session_id,
        temp_id,
        item_id = item.id,
        detections = group.detections.len(),
        "proposal accepted"
    );
    Ok(Resolution {
        item,
        detection_ids: group.detection_ids(),
    })
}

/// Deletes every detection of the group. Returns the deleted ids.
pub async fn reject(pool: &SqlitePool, session_id: &str, temp_id: &str) -> InventoryResult<Vec<i64>> {
    let mut tx = pool.begin().await?;

    let group = find_group(&mut tx, session_id, temp_id).await?;
    for det in &group.detections {
        sqlx::query("DELETE FROM detections WHERE id = ? AND item_id IS NULL")
            .bind(det.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!(
        session_id,
        temp_id,
        detections = group.detections.len(),
        "proposal rejected"
    );
    Ok(group.detection_ids())
}

/// Attaches the group to an existing item without creating a new one.
///
/// The target keeps the higher of its own and the group's confidence, and
/// picks up the group's barcode if it has none.
pub async fn merge(
    pool: &SqlitePool,
    session_id: &str,
    temp_id: &str,
    target_item_id: i64,
) -> InventoryResult<Resolution> {
    let mut tx = pool.begin().await?;

    let target = fetch_item(&mut tx, target_item_id).await?;
    let group = find_group(&mut tx, session_id, temp_id).await?;
    attach_group(&mut tx, &group, target.id).await?;

    let confidence = target.confidence.max(group.mean_confidence());
    let barcode = target
        .barcode
        .clone()
        .or_else(|| group.first().barcode.clone().filter(|b| !b.is_empty()));
    sqlx::query("UPDATE items SET confidence = ?, barcode = ?, updated_at = ? WHERE id = ?")
        .bind(confidence)
        .bind(&barcode)
        .bind(chrono::Utc::now().timestamp())
        .bind(target.id)
        .execute(&mut *tx)
        .await?;

    let item = fetch_item(&mut tx, target.id).await?;
    tx.commit().await?;

    tracing::info!(
        session_id,
        temp_id,
        item_id = item.id,
        detections = group.detections.len(),
        "proposal merged"
    );
    Ok(Resolution {
        item,
        detection_ids: group.detection_ids(),
    })
}

/// CLI entry point: prints the proposals of a session.
pub async fn run_review(pool: &SqlitePool, session_id: &str) -> anyhow::Result<()> {
    let proposals = list_proposals(pool, session_id).await?;
    if proposals.is_empty() {
        println!("No proposals for session {}.", session_id);
        return Ok(());
    }

    println!("{} proposal(s) for session {}:", proposals.len(), session_id);
    for p in &proposals {
        println!(
            "  {:<24} by {:<7} conf {:.2}  detections {:>3}  zone {}",
            p.temp_id,
            match p.key_source {
                KeySource::Barcode => "barcode",
                KeySource::Label => "label",
            },
            p.confidence,
            p.detection_ids.len(),
            p.zone_guess.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
