//! Error taxonomy shared by every library operation.
//!
//! Domain failures (missing sessions, proposals, items) are distinct
//! variants so the HTTP layer can map them onto client errors, while
//! store and I/O failures pass through untouched and surface as server
//! errors.

/// Result alias used by the inventory library.
pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("item not found: {0}")]
    ItemNotFound(i64),

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("category not found: {0}")]
    CategoryNotFound(i64),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("detector failed: {0}")]
    Detector(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl InventoryError {
    /// True for every "referenced entity is absent" variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            InventoryError::SessionNotFound(_)
                | InventoryError::ItemNotFound(_)
                | InventoryError::ProposalNotFound(_)
                | InventoryError::CategoryNotFound(_)
        )
    }

    /// Maps a unique-constraint violation onto [`InventoryError::Conflict`],
    /// leaving every other store error as-is.
    pub(crate) fn from_unique(err: sqlx::Error, message: impl Into<String>) -> Self {
        let unique = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);
        if unique {
            InventoryError::Conflict(message.into())
        } else {
            InventoryError::Store(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_grouping() {
        assert!(InventoryError::SessionNotFound("s".into()).is_not_found());
        assert!(InventoryError::ItemNotFound(3).is_not_found());
        assert!(InventoryError::ProposalNotFound("wrench".into()).is_not_found());
        assert!(!InventoryError::InvalidState("stopped".into()).is_not_found());
        assert!(!InventoryError::Validation("name".into()).is_not_found());
    }

    #[test]
    fn test_messages() {
        let err = InventoryError::ProposalNotFound("wrench".into());
        assert_eq!(err.to_string(), "proposal not found: wrench");
    }
}
