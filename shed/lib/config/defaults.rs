use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the graph root that holds backing files when none is configured.
pub const DEFAULT_BACKING_STORE_DIR: &str = "backing_stores";

/// The file under the graph root that holds the graph database.
pub const GRAPH_DB_FILENAME: &str = "graph.db";

/// How many times an unmount is attempted before giving up.
pub const DEFAULT_UNMOUNT_ATTEMPTS: u32 = 10;

/// The pause between unmount attempts.
pub const DEFAULT_UNMOUNT_DELAY: Duration = Duration::from_millis(100);
