//! Zones and categories.
//!
//! Both are small named lookup tables used to tag items. Requests are
//! typed and reject unknown fields, so a misspelt field is an error rather
//! than silently dropped.

use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::{InventoryError, InventoryResult};
use crate::models::{category_from_row, zone_from_row, Category, Zone, ZONE_COLUMNS};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneRequest {
    pub name: String,
    /// Image-relative vertices, each coordinate in `[0, 1]`.
    #[serde(default)]
    pub polygon: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub marker_type: Option<String>,
    #[serde(default)]
    pub marker_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ZoneRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            polygon: None,
            marker_type: None,
            marker_id: None,
            notes: None,
        }
    }

    pub fn validate(&self) -> InventoryResult<()> {
        if self.name.trim().is_empty() {
            return Err(InventoryError::Validation(
                "zone name must not be empty".to_string(),
            ));
        }
        if let Some(polygon) = &self.polygon {
            if polygon.len() < 3 {
                return Err(InventoryError::Validation(
                    "zone polygon needs at least 3 vertices".to_string(),
                ));
            }
            let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
            if !polygon.iter().all(|[x, y]| in_range(*x) && in_range(*y)) {
                return Err(InventoryError::Validation(
                    "zone polygon coordinates must be in [0, 1]".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl CategoryRequest {
    pub fn validate(&self) -> InventoryResult<()> {
        if self.name.trim().is_empty() {
            return Err(InventoryError::Validation(
                "category name must not be empty".to_string(),
            ));
        }
        if self.synonyms.iter().any(|s| s.trim().is_empty()) {
            return Err(InventoryError::Validation(
                "category synonyms must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// All zones ordered by id.
pub async fn list_zones(pool: &SqlitePool) -> InventoryResult<Vec<Zone>> {
    let rows = sqlx::query(&format!("SELECT {} FROM zones ORDER BY id ASC", ZONE_COLUMNS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(zone_from_row).collect()
}

pub async fn create_zone(pool: &SqlitePool, req: ZoneRequest) -> InventoryResult<Zone> {
    req.validate()?;
    let name = req.name.trim().to_string();
    let polygon_json = req.polygon.as_ref().map(serde_json::to_string).transpose()?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO zones (name, polygon_json, marker_type, marker_id, notes)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&name)
    .bind(&polygon_json)
    .bind(&req.marker_type)
    .bind(&req.marker_id)
    .bind(&req.notes)
    .fetch_one(pool)
    .await
    .map_err(|e| InventoryError::from_unique(e, format!("zone '{}' already exists", name)))?;

    tracing::info!(zone_id = id, zone = %name, "zone created");

    Ok(Zone {
        id,
        name,
        polygon: req.polygon,
        marker_type: req.marker_type,
        marker_id: req.marker_id,
        notes: req.notes,
    })
}

/// All categories ordered by id.
pub async fn list_categories(pool: &SqlitePool) -> InventoryResult<Vec<Category>> {
    let rows =
        sqlx::query("SELECT id, name, parent_id, synonyms_json FROM categories ORDER BY id ASC")
            .fetch_all(pool)
            .await?;
    rows.iter().map(category_from_row).collect()
}

pub async fn create_category(pool: &SqlitePool, req: CategoryRequest) -> InventoryResult<Category> {
    req.validate()?;
    let name = req.name.trim().to_string();
    let synonyms: Vec<String> = req.synonyms.iter().map(|s| s.trim().to_string()).collect();

    if let Some(parent_id) = req.parent_id {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE id = ?")
            .bind(parent_id)
            .fetch_optional(pool)
            .await?;
        if exists.is_none() {
            return Err(InventoryError::CategoryNotFound(parent_id));
        }
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO categories (name, parent_id, synonyms_json) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(&name)
    .bind(req.parent_id)
    .bind(serde_json::to_string(&synonyms)?)
    .fetch_one(pool)
    .await
    .map_err(|e| InventoryError::from_unique(e, format!("category '{}' already exists", name)))?;

    Ok(Category {
        id,
        name,
        parent_id: req.parent_id,
        synonyms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_request_rejects_unknown_fields() {
        let parsed: Result<ZoneRequest, _> =
            serde_json::from_str(r#"{"name": "bench", "colour": "red"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_zone_polygon_validation() {
        let mut req = ZoneRequest::named("bench");
        assert!(req.validate().is_ok());

        req.polygon = Some(vec![[0.0, 0.0], [1.0, 0.0]]);
        assert!(req.validate().is_err());

        req.polygon = Some(vec![[0.0, 0.0], [1.5, 0.0], [1.0, 1.0]]);
        assert!(req.validate().is_err());

        req.polygon = Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_blank_names_rejected() {
        assert!(ZoneRequest::named("   ").validate().is_err());
        let cat: CategoryRequest = serde_json::from_str(r#"{"name": ""}"#).unwrap();
        assert!(cat.validate().is_err());
    }

    #[test]
    fn test_category_request_defaults() {
        let cat: CategoryRequest = serde_json::from_str(r#"{"name": "Tools"}"#).unwrap();
        assert!(cat.parent_id.is_none());
        assert!(cat.synonyms.is_empty());
        assert!(cat.validate().is_ok());
    }
}
