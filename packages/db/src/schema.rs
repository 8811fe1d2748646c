//! Database schema definitions using SurrealQL.
//!
//! Domain records are stored as JSON in `data`; the top-level fields are
//! copies used for filtering and ordering.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?;
    db.query(TASK_SCHEMA).await?;
    db.query(TASK_GROUP_SCHEMA).await?;
    db.query(WORKER_SCHEMA).await?;
    db.query(PIPELINE_SCHEMA).await?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Every table, for test resets.
pub const TABLES: [&str; 5] = ["job", "task", "task_group", "worker", "pipeline"];

const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS ulid ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string;
DEFINE FIELD IF NOT EXISTS job_type ON job TYPE string;
DEFINE FIELD IF NOT EXISTS variant_id ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS data ON job TYPE string;

DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_variant ON job FIELDS variant_id, status;
DEFINE INDEX IF NOT EXISTS job_ulid ON job FIELDS ulid;
"#;

const TASK_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS task SCHEMALESS;

DEFINE FIELD IF NOT EXISTS ulid ON task TYPE string;
DEFINE FIELD IF NOT EXISTS status ON task TYPE string;
DEFINE FIELD IF NOT EXISTS task_type ON task TYPE string;
DEFINE FIELD IF NOT EXISTS priority ON task TYPE int;
DEFINE FIELD IF NOT EXISTS job_id ON task TYPE string;
DEFINE FIELD IF NOT EXISTS task_group_id ON task TYPE string;
DEFINE FIELD IF NOT EXISTS worker_id ON task TYPE option<string>;
DEFINE FIELD IF NOT EXISTS data ON task TYPE string;

-- Broker polling: queued tasks of a type by priority, then age
DEFINE INDEX IF NOT EXISTS task_dispatch ON task FIELDS status, task_type, priority;
DEFINE INDEX IF NOT EXISTS task_worker ON task FIELDS worker_id, status, task_type;
DEFINE INDEX IF NOT EXISTS task_group ON task FIELDS task_group_id;
DEFINE INDEX IF NOT EXISTS task_job ON task FIELDS job_id;
"#;

const TASK_GROUP_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS task_group SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_id ON task_group TYPE string;
DEFINE FIELD IF NOT EXISTS pipeline_id ON task_group TYPE string;
DEFINE FIELD IF NOT EXISTS data ON task_group TYPE string;

DEFINE INDEX IF NOT EXISTS task_group_job ON task_group FIELDS job_id;
"#;

const WORKER_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS worker SCHEMALESS;

DEFINE FIELD IF NOT EXISTS ulid ON worker TYPE string;
DEFINE FIELD IF NOT EXISTS name ON worker TYPE string;
DEFINE FIELD IF NOT EXISTS data ON worker TYPE string;
"#;

const PIPELINE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS pipeline SCHEMALESS;

DEFINE FIELD IF NOT EXISTS ulid ON pipeline TYPE string;
DEFINE FIELD IF NOT EXISTS job_id ON pipeline TYPE string;
DEFINE FIELD IF NOT EXISTS status ON pipeline TYPE string;
DEFINE FIELD IF NOT EXISTS data ON pipeline TYPE string;

DEFINE INDEX IF NOT EXISTS pipeline_job ON pipeline FIELDS job_id;
"#;
