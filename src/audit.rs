//! Append-only audit trail, written with plain sqlx next to the ORM.

use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// One audit row. `user_id` is empty for system actions such as payment callbacks.
#[derive(Debug)]
pub struct AuditEntry<'a> {
    pub user_id: Option<Uuid>,
    pub action: &'a str,
    pub resource: &'a str,
    pub metadata: Value,
}

pub async fn insert(pool: &DbPool, entry: &AuditEntry<'_>) -> AppResult<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.user_id)
    .bind(entry.action)
    .bind(entry.resource)
    .bind(&entry.metadata)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Best-effort: a failed audit write is logged and never fails the caller.
pub async fn record(
    pool: &DbPool,
    user_id: Option<Uuid>,
    action: &str,
    resource: &str,
    metadata: Value,
) {
    let entry = AuditEntry {
        user_id,
        action,
        resource,
        metadata,
    };
    if let Err(err) = insert(pool, &entry).await {
        tracing::warn!(error = %err, action, "audit log failed");
    }
}
