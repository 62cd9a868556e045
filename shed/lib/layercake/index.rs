use sqlx::{Pool, Row, Sqlite};

use crate::{ShedError, ShedResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Parent links that the graph driver cannot express.
///
/// Namespaced layers are stored by the driver as roots. The index remembers which layer each
/// one was copied from, so that garbage collection can still walk from child to parent. Each
/// child has at most one parent; links are a set, not a log.
#[derive(Debug, Clone)]
pub struct LayerIndex {
    pool: Pool<Sqlite>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerIndex {
    /// Creates an index stored in the graph database.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Records that `child` was derived from `parent`.
    ///
    /// Fails with `AlreadyExists` if `child` is already linked.
    pub async fn link(&self, child: &str, parent: &str) -> ShedResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO layer_links (child, parent)
            VALUES (?, ?)
            ON CONFLICT(child) DO NOTHING
            "#,
        )
        .bind(child)
        .bind(parent)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ShedError::AlreadyExists(format!("layer link for {child}")));
        }

        Ok(())
    }

    /// Returns the recorded parent of `child`.
    pub async fn parent_of(&self, child: &str) -> ShedResult<Option<String>> {
        let row = sqlx::query("SELECT parent FROM layer_links WHERE child = ?")
            .bind(child)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<String, _>("parent")))
    }

    /// Returns true if any layer is linked to `parent`.
    pub async fn has_children(&self, parent: &str) -> ShedResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM layer_links WHERE parent = ?) AS linked")
            .bind(parent)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<bool, _>("linked"))
    }

    /// Returns true if `child` has a recorded parent.
    pub async fn is_linked(&self, child: &str) -> ShedResult<bool> {
        Ok(self.parent_of(child).await?.is_some())
    }

    /// Forgets the link for `child`. Missing links are ignored.
    pub async fn unlink(&self, child: &str) -> ShedResult<()> {
        sqlx::query("DELETE FROM layer_links WHERE child = ?")
            .bind(child)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
