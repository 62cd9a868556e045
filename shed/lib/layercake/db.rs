use std::path::Path;

use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tokio::fs;

use crate::ShedResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the graph database.
pub static GRAPH_DB_MIGRATOR: Migrator = sqlx::migrate!("lib/layercake/migrations");

/// The file name of the graph database under the graph root.
pub const GRAPH_DB_FILENAME: &str = "graph.db";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Opens the graph database at `db_path`, creating it and running migrations as needed.
pub async fn init_graph_db(db_path: impl AsRef<Path>) -> ShedResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await?;

    GRAPH_DB_MIGRATOR.run(&pool).await?;

    Ok(pool)
}
