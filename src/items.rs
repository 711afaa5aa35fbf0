//! Inventory item storage.
//!
//! Items are created either directly or by accepting a review proposal.
//! Used by both the `garage items` CLI command and the `/api/items`
//! endpoints.

use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::{InventoryError, InventoryResult};
use crate::models::{detection_from_row, item_from_row, Detection, Item, DETECTION_COLUMNS, ITEM_COLUMNS};

/// Operator-editable item fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemFields {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub shelf_label: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub serial_text: Option<String>,
}

fn default_quantity() -> i64 {
    1
}

impl ItemFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            quantity: default_quantity(),
            zone: None,
            shelf_label: None,
            notes: None,
            barcode: None,
            serial_text: None,
        }
    }

    pub fn validate(&self) -> InventoryResult<()> {
        if self.name.trim().is_empty() {
            return Err(InventoryError::Validation(
                "item name must not be empty".to_string(),
            ));
        }
        if self.quantity < 0 {
            return Err(InventoryError::Validation(
                "item quantity must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Values carried over from detections when an item is created by review.
#[derive(Debug, Clone, Default)]
pub(crate) struct DetectedAttributes {
    pub confidence: f64,
    pub barcode: Option<String>,
    pub image_path: Option<String>,
    pub crop_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
    pub zone: Option<String>,
    pub category: Option<String>,
}

pub async fn list_items(pool: &SqlitePool, filter: &ItemFilter) -> InventoryResult<Vec<Item>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM items
        WHERE (? IS NULL OR zone = ?)
          AND (? IS NULL OR category = ?)
        ORDER BY id ASC
        "#,
        ITEM_COLUMNS
    ))
    .bind(&filter.zone)
    .bind(&filter.zone)
    .bind(&filter.category)
    .bind(&filter.category)
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

pub async fn get_item(pool: &SqlitePool, id: i64) -> InventoryResult<Item> {
    fetch_item(&mut *pool.acquire().await?, id).await
}

pub(crate) async fn fetch_item(
    conn: &mut sqlx::SqliteConnection,
    id: i64,
) -> InventoryResult<Item> {
    let row = sqlx::query(&format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(InventoryError::ItemNotFound(id))?;
    item_from_row(&row)
}

pub async fn create_item(pool: &SqlitePool, fields: ItemFields) -> InventoryResult<Item> {
    let mut conn = pool.acquire().await?;
    let item = insert_item(&mut conn, &fields, &DetectedAttributes::default()).await?;
    tracing::info!(item_id = item.id, name = %item.name, "item created");
    Ok(item)
}

pub(crate) async fn insert_item(
    conn: &mut sqlx::SqliteConnection,
    fields: &ItemFields,
    detected: &DetectedAttributes,
) -> InventoryResult<Item> {
    fields.validate()?;
    let now = chrono::Utc::now().timestamp();

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO items (name, category, quantity, zone, shelf_label, confidence, notes,
                           image_path, crop_path, barcode, serial_text, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(fields.name.trim())
    .bind(&fields.category)
    .bind(fields.quantity)
    .bind(&fields.zone)
    .bind(&fields.shelf_label)
    .bind(detected.confidence)
    .bind(&fields.notes)
    .bind(&detected.image_path)
    .bind(&detected.crop_path)
    .bind(fields.barcode.as_deref().or(detected.barcode.as_deref()))
    .bind(&fields.serial_text)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    fetch_item(conn, id).await
}

/// Replaces every editable field of an item.
pub async fn update_item(pool: &SqlitePool, id: i64, fields: ItemFields) -> InventoryResult<Item> {
    fields.validate()?;
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        UPDATE items SET name = ?, category = ?, quantity = ?, zone = ?, shelf_label = ?,
                         notes = ?, barcode = ?, serial_text = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(fields.name.trim())
    .bind(&fields.category)
    .bind(fields.quantity)
    .bind(&fields.zone)
    .bind(&fields.shelf_label)
    .bind(&fields.notes)
    .bind(&fields.barcode)
    .bind(&fields.serial_text)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(InventoryError::ItemNotFound(id));
    }
    get_item(pool, id).await
}

/// Deletes an item, returning its detections to the unresolved set.
///
/// Returns the number of detections detached.
pub async fn delete_item(pool: &SqlitePool, id: i64) -> InventoryResult<u64> {
    let mut tx = pool.begin().await?;

    let detached = sqlx::query("UPDATE detections SET item_id = NULL WHERE item_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let deleted = sqlx::query("DELETE FROM items WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(InventoryError::ItemNotFound(id));
    }

    tx.commit().await?;
    tracing::info!(item_id = id, detached, "item deleted");
    Ok(detached)
}

/// Detections resolved into an item, oldest first.
pub async fn item_detections(pool: &SqlitePool, id: i64) -> InventoryResult<Vec<Detection>> {
    get_item(pool, id).await?;
    let rows = sqlx::query(&format!(
        "SELECT {} FROM detections WHERE item_id = ? ORDER BY id ASC",
        DETECTION_COLUMNS
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(detection_from_row).collect()
}

/// CLI entry point: prints the inventory as a table.
pub async fn run_list_items(pool: &SqlitePool, filter: &ItemFilter) -> anyhow::Result<()> {
    let items = list_items(pool, filter).await?;
    if items.is_empty() {
        println!("No items.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<24} {:<20} {:<14} {:>4}  {:>5}",
        "ID", "NAME", "CATEGORY", "ZONE", "QTY", "CONF"
    );
    for item in &items {
        println!(
            "{:>5}  {:<24} {:<20} {:<14} {:>4}  {:>5.2}",
            item.id,
            item.name,
            item.category.as_deref().unwrap_or("-"),
            item.zone.as_deref().unwrap_or("-"),
            item.quantity,
            item.confidence
        );
    }
    println!();
    println!("{} item(s)", items.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_fields_defaults() {
        let fields: ItemFields = serde_json::from_str(r#"{"name": "Hammer"}"#).unwrap();
        assert_eq!(fields.quantity, 1);
        assert!(fields.category.is_none());
        assert!(fields.validate().is_ok());
    }

    #[test]
    fn test_item_fields_validation() {
        assert!(ItemFields::named("  ").validate().is_err());
        let mut fields = ItemFields::named("Hammer");
        fields.quantity = -1;
        assert!(fields.validate().is_err());
        fields.quantity = 0;
        assert!(fields.validate().is_ok());
    }
}
