use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Fixed garage taxonomy seeded by `garage init`.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Tools",
    "Fasteners",
    "Adhesives/Chemicals",
    "Electrical/Cords/Batteries",
    "Paint/Finishing",
    "Safety/PPE",
    "Lawn/Outdoor",
    "Automotive",
    "Hardware/Misc",
    "Resin-Bound Supplies",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    seed_default_categories(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Inventory items
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            category TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            zone TEXT,
            shelf_label TEXT,
            confidence REAL NOT NULL DEFAULT 0.0,
            notes TEXT,
            image_path TEXT,
            crop_path TEXT,
            barcode TEXT,
            serial_text TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Capture sessions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stream_sessions (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            stopped_at INTEGER,
            state TEXT NOT NULL DEFAULT 'running',
            frames_processed INTEGER NOT NULL DEFAULT 0,
            detections_count INTEGER NOT NULL DEFAULT 0,
            summary_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Stored frames and video chunks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            path TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            content_hash TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'uploaded',
            FOREIGN KEY (session_id) REFERENCES stream_sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Raw detections, resolved into items by review
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id INTEGER,
            session_id TEXT NOT NULL,
            asset_path TEXT NOT NULL,
            label TEXT NOT NULL,
            confidence REAL NOT NULL,
            bbox_json TEXT NOT NULL,
            frame_ts REAL,
            barcode TEXT,
            zone TEXT,
            crop_path TEXT,
            FOREIGN KEY (item_id) REFERENCES items(id),
            FOREIGN KEY (session_id) REFERENCES stream_sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS zones (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            polygon_json TEXT,
            marker_type TEXT,
            marker_id TEXT,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            parent_id INTEGER,
            synonyms_json TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (parent_id) REFERENCES categories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_detections_session_item ON detections(session_id, item_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_detections_item_id ON detections(item_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_image_assets_session ON image_assets(session_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stream_sessions_started ON stream_sessions(started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Inserts [`DEFAULT_CATEGORIES`] that are not present yet.
///
/// Returns the number of categories actually created.
pub async fn seed_default_categories(pool: &SqlitePool) -> Result<u64> {
    let mut created = 0;
    for name in DEFAULT_CATEGORIES {
        let result = sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
        created += result.rows_affected();
    }
    Ok(created)
}
