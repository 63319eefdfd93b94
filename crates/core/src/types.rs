/// All database primary keys are integer ids assigned by the analysis backend.
pub type DbId = i64;

/// Identifier of the analysis job a tracker subscription is scoped to.
pub type JobId = DbId;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
