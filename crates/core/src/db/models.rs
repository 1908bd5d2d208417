use serde::{Deserialize, Serialize};

/// One stored analysis run, as listed by `ResultsDb::list_analyses`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisRecord {
    pub id: i64,
    pub firmware_uid: String,
    pub parent_flag: bool,
    pub file_count: usize,
    pub executable_count: usize,
    pub incomplete_count: usize,
    /// RFC 3339 timestamp.
    pub created_at: String,
}
