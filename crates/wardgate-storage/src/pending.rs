//! Pending-request queries: the durable side of `ask` approvals.

use sqlx::Row;
use wardgate_core::PendingRecord;

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::time::{epoch_to_iso, iso_to_epoch};

impl Database {
    /// Insert the durable twin of a freshly suspended request.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure (including a duplicate
    /// request id).
    pub async fn insert_pending(&self, record: &PendingRecord) -> StorageResult<()> {
        let args_json = serde_json::to_string(&record.args)
            .map_err(|e| StorageError::Query(e.to_string()))?;
        sqlx::query(
            "INSERT INTO pending_requests \
             (request_id, tool_name, args, signature, message_id, chat_id, result, \
              created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.request_id)
        .bind(&record.tool_name)
        .bind(args_json)
        .bind(&record.signature)
        .bind(&record.message_id)
        .bind(record.chat_id)
        .bind(&record.result)
        .bind(epoch_to_iso(record.created_at))
        .bind(epoch_to_iso(record.expires_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Look up a pending record by request id.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn get_pending(&self, request_id: &str) -> StorageResult<Option<PendingRecord>> {
        let row = sqlx::query("SELECT * FROM pending_requests WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_pending).transpose()
    }

    /// Record the messenger message once the approval prompt is posted.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn set_pending_message(
        &self,
        request_id: &str,
        message_id: &str,
        chat_id: Option<i64>,
    ) -> StorageResult<()> {
        sqlx::query("UPDATE pending_requests SET message_id = ?, chat_id = ? WHERE request_id = ?")
            .bind(message_id)
            .bind(chat_id)
            .bind(request_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Queue a serialized result on a record whose agent is offline.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn set_pending_result(&self, request_id: &str, result_json: &str) -> StorageResult<()> {
        sqlx::query("UPDATE pending_requests SET result = ? WHERE request_id = ?")
            .bind(result_json)
            .bind(request_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Return and delete every record carrying a queued result.
    ///
    /// Called on agent reconnect; an immediate second drain returns empty.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn drain_results(&self) -> StorageResult<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT request_id, result FROM pending_requests WHERE result IS NOT NULL",
        )
        .fetch_all(self.pool())
        .await?;

        let mut drained = Vec::with_capacity(rows.len());
        for row in &rows {
            let request_id: String = row.try_get("request_id")?;
            let result: String = row.try_get("result")?;
            drained.push((request_id, result));
        }

        for (request_id, _) in &drained {
            sqlx::query("DELETE FROM pending_requests WHERE request_id = ?")
                .bind(request_id)
                .execute(self.pool())
                .await?;
        }

        Ok(drained)
    }

    /// Delete a pending record after its result was delivered.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn delete_pending(&self, request_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM pending_requests WHERE request_id = ?")
            .bind(request_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete rows whose window closed before `now`, returning them so the
    /// caller can audit them and edit their messenger prompts. Idempotent.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn cleanup_stale(&self, now: f64) -> StorageResult<Vec<PendingRecord>> {
        let cutoff = epoch_to_iso(now);
        let rows = sqlx::query("SELECT * FROM pending_requests WHERE expires_at < ?")
            .bind(&cutoff)
            .fetch_all(self.pool())
            .await?;
        let stale: Vec<PendingRecord> = rows
            .iter()
            .map(row_to_pending)
            .collect::<StorageResult<_>>()?;

        sqlx::query("DELETE FROM pending_requests WHERE expires_at < ?")
            .bind(&cutoff)
            .execute(self.pool())
            .await?;

        Ok(stale)
    }

    /// Return unexpired rows, for re-arming approval timers after a restart.
    ///
    /// # Errors
    ///
    /// [`StorageError::Query`] on database failure.
    pub async fn load_active(&self, now: f64) -> StorageResult<Vec<PendingRecord>> {
        let rows = sqlx::query("SELECT * FROM pending_requests WHERE expires_at >= ?")
            .bind(epoch_to_iso(now))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_pending).collect()
    }
}

fn row_to_pending(row: &sqlx::sqlite::SqliteRow) -> StorageResult<PendingRecord> {
    let args_json: String = row.try_get("args")?;
    let created_at: String = row.try_get("created_at")?;
    let expires_at: String = row.try_get("expires_at")?;

    Ok(PendingRecord {
        request_id: row.try_get("request_id")?,
        tool_name: row.try_get("tool_name")?,
        args: serde_json::from_str(&args_json)
            .map_err(|e| StorageError::Corrupt(format!("bad args JSON: {e}")))?,
        signature: row.try_get("signature")?,
        message_id: row.try_get("message_id")?,
        chat_id: row.try_get("chat_id")?,
        result: row.try_get("result")?,
        created_at: iso_to_epoch(&created_at)?,
        expires_at: iso_to_epoch(&expires_at)?,
    })
}
