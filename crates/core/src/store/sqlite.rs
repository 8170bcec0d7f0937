//! SQLite-backed upload store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::warn;

use super::cipher::CredentialCipher;
use super::store::{BatchFilter, StoreError, UploadStore};
use super::types::{
    Batch, BatchStats, BatchSummary, CancelledRequest, Completion, NewUploadRequest, Preset,
    PresetDraft, RetryCopy, RetrySelection, StructuredError, UploadRequest, UploadStatus,
};
use crate::metadata::{Label, Statement};
use crate::source::SourceKind;

const PRESET_COLUMNS: &str = "id, user_id, source, title, title_template, labels, categories, exclude_from_date_category, is_default, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, batch_id, user_id, source, source_key, collection, title, wikitext, status, task_handle, error, success, statements, labels, credential, created_at, updated_at";

fn db(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn json_err(e: serde_json::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite-backed upload store.
///
/// Credentials are encrypted before they reach the database. Without an
/// explicit cipher the store uses a per-process key, so queued credentials
/// do not survive a restart.
pub struct SqliteUploadStore {
    conn: Mutex<Connection>,
    cipher: CredentialCipher,
}

impl SqliteUploadStore {
    /// Open or create the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cipher: CredentialCipher::ephemeral(),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cipher: CredentialCipher::ephemeral(),
        })
    }

    /// Encrypt credentials with `cipher` instead of a per-process key.
    pub fn with_cipher(mut self, cipher: CredentialCipher) -> Self {
        self.cipher = cipher;
        self
    }

    fn seal(&self, credential: Option<&str>) -> Result<Option<String>, StoreError> {
        Ok(credential.map(|c| self.cipher.encrypt(c)).transpose()?)
    }

    /// Replace the stored ciphertext with the plain credential.
    ///
    /// A credential that cannot be opened (written under another key) is
    /// dropped; the pipeline then fails the request for lack of one.
    fn reveal(&self, mut request: UploadRequest) -> UploadRequest {
        if let Some(sealed) = request.credential.take() {
            match self.cipher.decrypt(&sealed) {
                Ok(credential) => request.credential = Some(credential),
                Err(e) => {
                    warn!(request_id = request.id, error = %e, "Stored credential cannot be decrypted");
                }
            }
        }
        request
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                edit_group_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS upload_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id INTEGER NOT NULL REFERENCES batches(id),
                user_id TEXT NOT NULL,
                source TEXT NOT NULL,
                source_key TEXT NOT NULL,
                collection TEXT,
                title TEXT NOT NULL,
                wikitext TEXT,
                status TEXT NOT NULL,
                task_handle TEXT,
                error TEXT,
                success TEXT,
                statements TEXT NOT NULL DEFAULT '[]',
                labels TEXT NOT NULL DEFAULT '[]',
                credential TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS presets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                title_template TEXT NOT NULL,
                labels TEXT,
                categories TEXT,
                exclude_from_date_category INTEGER NOT NULL DEFAULT 0,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_batches_user_id ON batches(user_id);
            CREATE INDEX IF NOT EXISTS idx_requests_status ON upload_requests(status);
            CREATE INDEX IF NOT EXISTS idx_presets_user_source ON presets(user_id, source);
            CREATE INDEX IF NOT EXISTS idx_requests_batch_status ON upload_requests(batch_id, status);
            CREATE INDEX IF NOT EXISTS idx_requests_user_id ON upload_requests(user_id);
            "#,
        )
        .map_err(db)
    }

    fn build_where_clause(filter: &BatchFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref user_id) = filter.user_id {
            conditions.push("b.user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<Batch> {
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;
        Ok(Batch {
            id: row.get(0)?,
            user_id: row.get(1)?,
            edit_group_id: row.get(2)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<BatchSummary> {
        let batch = Self::row_to_batch(row)?;
        let stats = BatchStats {
            total: row.get(5)?,
            queued: row.get(6)?,
            in_progress: row.get(7)?,
            completed: row.get(8)?,
            failed: row.get(9)?,
            cancelled: row.get(10)?,
            duplicate: row.get(11)?,
        };
        Ok(BatchSummary { batch, stats })
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<UploadRequest> {
        let source: String = row.get(3)?;
        let source: SourceKind = source
            .parse()
            .map_err(|e: crate::source::SourceError| conversion_error(3, e.to_string()))?;
        let status: String = row.get(8)?;
        let status: UploadStatus = status.parse().map_err(|e| conversion_error(8, e))?;

        let error_json: Option<String> = row.get(10)?;
        let statements_json: String = row.get(12)?;
        let labels_json: String = row.get(13)?;
        let created_at: String = row.get(15)?;
        let updated_at: String = row.get(16)?;

        // JSON columns are only ever written by this store
        let error: Option<StructuredError> =
            error_json.and_then(|json| serde_json::from_str(&json).ok());
        let statements: Vec<Statement> = serde_json::from_str(&statements_json).unwrap_or_default();
        let labels: Vec<Label> = serde_json::from_str(&labels_json).unwrap_or_default();

        Ok(UploadRequest {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            user_id: row.get(2)?,
            source,
            key: row.get(4)?,
            collection: row.get(5)?,
            title: row.get(6)?,
            wikitext: row.get(7)?,
            status,
            task_handle: row.get(9)?,
            error,
            success: row.get(11)?,
            statements,
            labels,
            credential: row.get(14)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_preset(row: &rusqlite::Row) -> rusqlite::Result<Preset> {
        let source: String = row.get(2)?;
        let source: SourceKind = source
            .parse()
            .map_err(|e: crate::source::SourceError| conversion_error(2, e.to_string()))?;
        let labels_json: Option<String> = row.get(5)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;

        Ok(Preset {
            id: row.get(0)?,
            user_id: row.get(1)?,
            source,
            title: row.get(3)?,
            title_template: row.get(4)?,
            labels: labels_json.and_then(|json| serde_json::from_str::<Label>(&json).ok()),
            categories: row.get(6)?,
            exclude_from_date_category: row.get(7)?,
            is_default: row.get(8)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn query_preset(conn: &Connection, id: i64) -> Result<Option<Preset>, StoreError> {
        let result = conn.query_row(
            &format!("SELECT {} FROM presets WHERE id = ?", PRESET_COLUMNS),
            params![id],
            Self::row_to_preset,
        );

        match result {
            Ok(preset) => Ok(Some(preset)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db(e)),
        }
    }

    fn insert_batch(
        conn: &Connection,
        user_id: &str,
        edit_group_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Batch, StoreError> {
        conn.execute(
            "INSERT INTO batches (user_id, edit_group_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![user_id, edit_group_id, now.to_rfc3339(), now.to_rfc3339()],
        )
        .map_err(db)?;

        Ok(Batch {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            edit_group_id: edit_group_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Insert one queued request. `sealed_credential` is what gets stored;
    /// the returned request carries the plain one from `item`.
    fn insert_request(
        conn: &Connection,
        batch_id: i64,
        user_id: &str,
        item: &NewUploadRequest,
        sealed_credential: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UploadRequest, StoreError> {
        let statements_json = serde_json::to_string(&item.statements).map_err(json_err)?;
        let labels_json = serde_json::to_string(&item.labels).map_err(json_err)?;
        let status = UploadStatus::Queued;

        conn.execute(
            "INSERT INTO upload_requests (batch_id, user_id, source, source_key, collection, title, wikitext, status, statements, labels, credential, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                batch_id,
                user_id,
                item.source.as_str(),
                item.key,
                item.collection,
                item.title,
                item.wikitext,
                status.as_str(),
                statements_json,
                labels_json,
                sealed_credential,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(db)?;

        Ok(UploadRequest {
            id: conn.last_insert_rowid(),
            batch_id,
            user_id: user_id.to_string(),
            source: item.source,
            key: item.key.clone(),
            collection: item.collection.clone(),
            title: item.title.clone(),
            wikitext: item.wikitext.clone(),
            status,
            task_handle: None,
            error: None,
            success: None,
            statements: item.statements.clone(),
            labels: item.labels.clone(),
            credential: item.credential.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn touch_batch(conn: &Connection, batch_id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        conn.execute(
            "UPDATE batches SET updated_at = ? WHERE id = ?",
            params![now.to_rfc3339(), batch_id],
        )
        .map_err(db)?;
        Ok(())
    }

    fn request_state(
        conn: &Connection,
        id: i64,
    ) -> Result<Option<(UploadStatus, Option<String>)>, StoreError> {
        let result = conn.query_row(
            "SELECT status, task_handle FROM upload_requests WHERE id = ?",
            params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        );

        match result {
            Ok((status, handle)) => {
                let status = status.parse().map_err(StoreError::Database)?;
                Ok(Some((status, handle)))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db(e)),
        }
    }

    fn batch_exists(conn: &Connection, batch_id: i64) -> Result<bool, StoreError> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM batches WHERE id = ?",
                params![batch_id],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(count > 0)
    }
}

impl UploadStore for SqliteUploadStore {
    fn create_batch(&self, user_id: &str, edit_group_id: &str) -> Result<Batch, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::insert_batch(&conn, user_id, edit_group_id, Utc::now())
    }

    fn get_batch(&self, id: i64) -> Result<Option<Batch>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            "SELECT id, user_id, edit_group_id, created_at, updated_at FROM batches WHERE id = ?",
            params![id],
            Self::row_to_batch,
        );

        match result {
            Ok(batch) => Ok(Some(batch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db(e)),
        }
    }

    fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<BatchSummary>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT b.id, b.user_id, b.edit_group_id, b.created_at, b.updated_at, \
             COUNT(r.id), \
             COALESCE(SUM(CASE WHEN r.status = 'queued' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN r.status = 'in_progress' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN r.status = 'completed' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN r.status = 'failed' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN r.status = 'cancelled' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN r.status IN ('duplicated_sdc_updated', 'duplicated_sdc_not_updated') THEN 1 ELSE 0 END), 0) \
             FROM batches b LEFT JOIN upload_requests r ON r.batch_id = b.id \
             {} GROUP BY b.id ORDER BY b.id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_summary)
            .map_err(db)?;

        let mut summaries = Vec::new();
        for row_result in rows {
            summaries.push(row_result.map_err(db)?);
        }

        Ok(summaries)
    }

    fn count_batches(&self, filter: &BatchFilter) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM batches b {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db)
    }

    fn batch_stats(&self, batch_id: i64) -> Result<BatchStats, StoreError> {
        let conn = self.conn.lock().unwrap();

        if !Self::batch_exists(&conn, batch_id)? {
            return Err(StoreError::NotFound(format!("batch {}", batch_id)));
        }

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM upload_requests WHERE batch_id = ? GROUP BY status")
            .map_err(db)?;
        let rows = stmt
            .query_map(params![batch_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db)?;

        let mut stats = BatchStats::default();
        for row_result in rows {
            let (status, count) = row_result.map_err(db)?;
            let status: UploadStatus = status.parse().map_err(StoreError::Database)?;
            stats.record(status, count);
        }

        Ok(stats)
    }

    fn create_requests(
        &self,
        batch_id: i64,
        user_id: &str,
        items: &[NewUploadRequest],
    ) -> Result<Vec<UploadRequest>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db)?;

        if !Self::batch_exists(&tx, batch_id)? {
            return Err(StoreError::NotFound(format!("batch {}", batch_id)));
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let sealed = self.seal(item.credential.as_deref())?;
            created.push(Self::insert_request(&tx, batch_id, user_id, item, sealed, now)?);
        }
        Self::touch_batch(&tx, batch_id, now)?;

        tx.commit().map_err(db)?;
        Ok(created)
    }

    fn get_request(&self, id: i64) -> Result<Option<UploadRequest>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            &format!("SELECT {} FROM upload_requests WHERE id = ?", REQUEST_COLUMNS),
            params![id],
            Self::row_to_request,
        );

        match result {
            Ok(request) => Ok(Some(self.reveal(request))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db(e)),
        }
    }

    fn list_requests(&self, batch_id: i64) -> Result<Vec<UploadRequest>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM upload_requests WHERE batch_id = ? ORDER BY id ASC",
                REQUEST_COLUMNS
            ))
            .map_err(db)?;
        let rows = stmt
            .query_map(params![batch_id], Self::row_to_request)
            .map_err(db)?;

        let mut requests = Vec::new();
        for row_result in rows {
            requests.push(self.reveal(row_result.map_err(db)?));
        }

        Ok(requests)
    }

    fn list_requests_by_status(
        &self,
        status: UploadStatus,
    ) -> Result<Vec<UploadRequest>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM upload_requests WHERE status = ? ORDER BY id ASC",
                REQUEST_COLUMNS
            ))
            .map_err(db)?;
        let rows = stmt
            .query_map(params![status.as_str()], Self::row_to_request)
            .map_err(db)?;

        let mut requests = Vec::new();
        for row_result in rows {
            requests.push(self.reveal(row_result.map_err(db)?));
        }

        Ok(requests)
    }

    fn attach_task_handle(&self, id: i64, handle: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn
            .execute(
                "UPDATE upload_requests SET task_handle = ?, updated_at = ? WHERE id = ? AND status = 'queued' AND task_handle IS NULL",
                params![handle, Utc::now().to_rfc3339(), id],
            )
            .map_err(db)?;

        if changed == 1 {
            return Ok(());
        }

        match Self::request_state(&conn, id)? {
            None => Err(StoreError::NotFound(format!("upload request {}", id))),
            Some((_, Some(_))) => Err(StoreError::AlreadyDispatched(id)),
            Some((status, None)) => Err(StoreError::InvalidState {
                request_id: id,
                current_status: status,
                operation: "dispatch".to_string(),
            }),
        }
    }

    fn detach_task_handle(&self, id: i64, handle: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn
            .execute(
                "UPDATE upload_requests SET task_handle = NULL, updated_at = ? WHERE id = ? AND status = 'queued' AND task_handle = ?",
                params![Utc::now().to_rfc3339(), id, handle],
            )
            .map_err(db)?;

        Ok(changed == 1)
    }

    fn begin_processing(
        &self,
        id: i64,
        handle: &str,
    ) -> Result<Option<UploadRequest>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            &format!(
                "UPDATE upload_requests SET status = 'in_progress', updated_at = ? WHERE id = ? AND status = 'queued' AND task_handle = ? RETURNING {}",
                REQUEST_COLUMNS
            ),
            params![Utc::now().to_rfc3339(), id, handle],
            Self::row_to_request,
        );

        match result {
            Ok(request) => Ok(Some(self.reveal(request))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db(e)),
        }
    }

    fn finish(&self, id: i64, completion: &Completion) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        if !completion.status.is_pipeline_outcome() {
            let current = Self::request_state(&conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("upload request {}", id)))?;
            return Err(StoreError::InvalidState {
                request_id: id,
                current_status: current.0,
                operation: format!("finish as {}", completion.status),
            });
        }

        let error_json = completion
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        let changed = conn
            .execute(
                "UPDATE upload_requests SET status = ?, error = ?, success = ?, task_handle = NULL, credential = NULL, updated_at = ? WHERE id = ? AND status = 'in_progress'",
                params![
                    completion.status.as_str(),
                    error_json,
                    completion.success,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .map_err(db)?;

        Ok(changed == 1)
    }

    fn clear_credential(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE upload_requests SET credential = NULL WHERE id = ?",
            params![id],
        )
        .map_err(db)?;
        Ok(())
    }

    fn cancel_queued(&self, batch_id: i64) -> Result<Vec<CancelledRequest>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let cancelled = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, task_handle FROM upload_requests WHERE batch_id = ? AND status = 'queued' ORDER BY id ASC",
                )
                .map_err(db)?;
            let rows = stmt
                .query_map(params![batch_id], |row| {
                    Ok(CancelledRequest {
                        id: row.get(0)?,
                        task_handle: row.get(1)?,
                    })
                })
                .map_err(db)?;

            let mut cancelled = Vec::new();
            for row_result in rows {
                cancelled.push(row_result.map_err(db)?);
            }
            cancelled
        };

        if !cancelled.is_empty() {
            let now = Utc::now();
            tx.execute(
                "UPDATE upload_requests SET status = 'cancelled', task_handle = NULL, credential = NULL, updated_at = ? WHERE batch_id = ? AND status = 'queued'",
                params![now.to_rfc3339(), batch_id],
            )
            .map_err(db)?;
            Self::touch_batch(&tx, batch_id, now)?;
        }

        tx.commit().map_err(db)?;
        Ok(cancelled)
    }

    fn retry_into_new_batch(
        &self,
        selection: &RetrySelection,
    ) -> Result<Option<RetryCopy>, StoreError> {
        if selection.request_ids.is_empty() {
            return Ok(None);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let originals = {
            let placeholders = vec!["?"; selection.request_ids.len()].join(", ");
            let mut sql = format!(
                "SELECT {} FROM upload_requests WHERE status = 'failed' AND id IN ({})",
                REQUEST_COLUMNS, placeholders
            );

            let mut params: Vec<Box<dyn rusqlite::ToSql>> = selection
                .request_ids
                .iter()
                .map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>)
                .collect();
            if let Some(ref owner) = selection.owner {
                sql.push_str(" AND user_id = ?");
                params.push(Box::new(owner.clone()));
            }
            sql.push_str(" ORDER BY id ASC");

            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = tx.prepare(&sql).map_err(db)?;
            let rows = stmt
                .query_map(param_refs.as_slice(), Self::row_to_request)
                .map_err(db)?;

            let mut originals = Vec::new();
            for row_result in rows {
                originals.push(row_result.map_err(db)?);
            }
            originals
        };

        if originals.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let batch = Self::insert_batch(&tx, &selection.requested_by, &selection.edit_group_id, now)?;

        let sealed = self.seal(selection.credential.as_deref())?;
        let mut requests = Vec::with_capacity(originals.len());
        for original in &originals {
            let copy = original.retry_copy(selection.credential.clone());
            requests.push(Self::insert_request(
                &tx,
                batch.id,
                &selection.requested_by,
                &copy,
                sealed.clone(),
                now,
            )?);
        }

        tx.commit().map_err(db)?;
        Ok(Some(RetryCopy { batch, requests }))
    }

    fn save_preset(
        &self,
        user_id: &str,
        preset_id: Option<i64>,
        draft: &PresetDraft,
    ) -> Result<Option<Preset>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let labels_json = draft
            .labels
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        let now = Utc::now().to_rfc3339();

        let id = match preset_id {
            Some(id) => {
                match Self::query_preset(&tx, id)? {
                    Some(existing) if existing.user_id == user_id => {}
                    _ => return Ok(None),
                }
                tx.execute(
                    "UPDATE presets SET source = ?, title = ?, title_template = ?, labels = ?, categories = ?, exclude_from_date_category = ?, is_default = ?, updated_at = ? WHERE id = ?",
                    params![
                        draft.source.as_str(),
                        draft.title,
                        draft.title_template,
                        labels_json,
                        draft.categories,
                        draft.exclude_from_date_category,
                        draft.is_default,
                        now,
                        id,
                    ],
                )
                .map_err(db)?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO presets (user_id, source, title, title_template, labels, categories, exclude_from_date_category, is_default, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        user_id,
                        draft.source.as_str(),
                        draft.title,
                        draft.title_template,
                        labels_json,
                        draft.categories,
                        draft.exclude_from_date_category,
                        draft.is_default,
                        now,
                        now,
                    ],
                )
                .map_err(db)?;
                tx.last_insert_rowid()
            }
        };

        if draft.is_default {
            tx.execute(
                "UPDATE presets SET is_default = 0, updated_at = ? WHERE user_id = ? AND source = ? AND id != ? AND is_default = 1",
                params![now, user_id, draft.source.as_str(), id],
            )
            .map_err(db)?;
        }

        let preset = Self::query_preset(&tx, id)?;
        tx.commit().map_err(db)?;
        Ok(preset)
    }

    fn get_preset(&self, id: i64) -> Result<Option<Preset>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_preset(&conn, id)
    }

    fn list_presets(&self, user_id: &str, source: SourceKind) -> Result<Vec<Preset>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM presets WHERE user_id = ? AND source = ? ORDER BY created_at DESC, id DESC",
                PRESET_COLUMNS
            ))
            .map_err(db)?;
        let rows = stmt
            .query_map(params![user_id, source.as_str()], Self::row_to_preset)
            .map_err(db)?;

        let mut presets = Vec::new();
        for row_result in rows {
            presets.push(row_result.map_err(db)?);
        }

        Ok(presets)
    }

    fn delete_preset(&self, id: i64, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn
            .execute(
                "DELETE FROM presets WHERE id = ? AND user_id = ?",
                params![id, user_id],
            )
            .map_err(db)?;

        Ok(changed == 1)
    }
}
