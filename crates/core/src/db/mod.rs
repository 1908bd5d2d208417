//! Workspace layout and result persistence.
//!
//! - `WorkspaceLayout`: computed paths for workspace directories/files.
//! - `ResultsDb`: SQLite store of analysis runs and their per-file records.
//! - `AnalysisRecord`: summary row describing one stored run.
//! - `WorkspaceContext`: layout + config + open database bundled together.

mod context;
mod layout;
mod models;
mod results_db;
mod util;

pub use context::WorkspaceContext;
pub use layout::WorkspaceLayout;
pub use models::AnalysisRecord;
pub use results_db::{DbError, DbResult, ResultsDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_engine_config, open_results_db, resolve_db_path};
