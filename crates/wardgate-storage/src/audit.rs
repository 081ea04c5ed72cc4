//! Append-only audit log queries.

use sqlx::Row;
use wardgate_core::{AuditEntry, Decision, Resolution};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::time::{epoch_to_iso, iso_to_epoch};

impl Database {
    /// Append an audit entry. Entries are never updated after insert.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn log_audit(&self, entry: &AuditEntry) -> StorageResult<()> {
        let args_json = serde_json::to_string(&entry.args)
            .map_err(|e| StorageError::Query(e.to_string()))?;
        let execution_result = entry
            .execution_result
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| StorageError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO audit_log \
             (timestamp, request_id, tool_name, args, signature, decision, \
              resolution, resolved_by, resolved_at, execution_result, agent_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(epoch_to_iso(entry.timestamp))
        .bind(&entry.request_id)
        .bind(&entry.tool_name)
        .bind(args_json)
        .bind(&entry.signature)
        .bind(entry.decision.to_string())
        .bind(entry.resolution.map(|r| r.to_string()))
        .bind(&entry.resolved_by)
        .bind(entry.resolved_at.map(epoch_to_iso))
        .bind(execution_result)
        .bind(&entry.agent_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Return audit entries newest-first, up to `limit`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure, [`StorageError::Corrupt`]
    /// if a stored row no longer decodes.
    pub async fn query_audit(&self, limit: u32) -> StorageResult<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(row_to_audit).collect()
    }
}

fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> StorageResult<AuditEntry> {
    let args_json: String = row.try_get("args")?;
    let decision_text: String = row.try_get("decision")?;
    let resolution_text: Option<String> = row.try_get("resolution")?;
    let resolved_at_iso: Option<String> = row.try_get("resolved_at")?;
    let execution_json: Option<String> = row.try_get("execution_result")?;
    let timestamp_iso: String = row.try_get("timestamp")?;

    let decision: Decision = decision_text
        .parse()
        .map_err(StorageError::Corrupt)?;
    let resolution: Option<Resolution> = resolution_text
        .map(|t| t.parse().map_err(StorageError::Corrupt))
        .transpose()?;

    Ok(AuditEntry {
        request_id: row.try_get("request_id")?,
        timestamp: iso_to_epoch(&timestamp_iso)?,
        tool_name: row.try_get("tool_name")?,
        args: serde_json::from_str(&args_json)
            .map_err(|e| StorageError::Corrupt(format!("bad args JSON: {e}")))?,
        signature: row.try_get("signature")?,
        decision,
        resolution,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: resolved_at_iso.as_deref().map(iso_to_epoch).transpose()?,
        execution_result: execution_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StorageError::Corrupt(format!("bad result JSON: {e}")))?,
        agent_id: row.try_get("agent_id")?,
    })
}
