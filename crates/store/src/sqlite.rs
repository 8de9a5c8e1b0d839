//! SQLite-backed operation log and session store.
//!
//! The durable source of truth. One connection behind an async mutex;
//! blocking work is pushed onto the blocking pool. Sequence assignment
//! runs inside a transaction while the connection is held, so two racing
//! appends to one `(sandbox, table, record)` group can never claim the
//! same sequence; the UNIQUE index backstops that invariant.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};
use std::sync::Arc;

use sandboxer_core::{
    clock, ids,
    traits::{OperationStore, SessionStore},
    types::{NewOperation, Operation, OperationRecord, SandboxSession},
    Error, Result,
};

/// SQLite persistence for sandbox sessions and their operation logs.
pub struct SqliteStore {
    conn: Arc<tokio::sync::Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(tokio::sync::Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sandbox_sessions (
                id             TEXT PRIMARY KEY,
                token          TEXT NOT NULL UNIQUE,
                client_address TEXT NOT NULL,
                client_agent   TEXT NOT NULL,
                expires_at     INTEGER NOT NULL,
                initial_state  TEXT NOT NULL,
                metadata       TEXT NOT NULL,
                created_at     INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_expires
                ON sandbox_sessions (expires_at);

            CREATE TABLE IF NOT EXISTS sandbox_operations (
                id             TEXT PRIMARY KEY,
                sandbox_id     TEXT NOT NULL,
                table_name     TEXT NOT NULL,
                record_id      TEXT NOT NULL,
                operation      TEXT NOT NULL,
                data           TEXT NOT NULL,
                changed_fields TEXT,
                sequence       INTEGER NOT NULL DEFAULT 0,
                created_at     INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_operations_group
                ON sandbox_operations (sandbox_id, table_name, record_id);
            CREATE INDEX IF NOT EXISTS idx_operations_created
                ON sandbox_operations (sandbox_id, created_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_operations_sequence
                ON sandbox_operations (sandbox_id, table_name, record_id, sequence);",
        )
        .map_err(|e| Error::storage(format!("Schema error: {}", e)))
    }
}

/// One raw log row before payload decoding.
struct RawOperation {
    id: String,
    sandbox_id: String,
    table_name: String,
    record_id: String,
    operation: String,
    data: String,
    changed_fields: Option<String>,
    sequence: i64,
    created_at: i64,
}

impl RawOperation {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sandbox_id: row.get(1)?,
            table_name: row.get(2)?,
            record_id: row.get(3)?,
            operation: row.get(4)?,
            data: row.get(5)?,
            changed_fields: row.get(6)?,
            sequence: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<OperationRecord> {
        let operation = Operation::parse(&self.operation)
            .ok_or_else(|| Error::corrupt_record(format!("unknown operation '{}'", self.operation)))?;
        let data = serde_json::from_str(&self.data)
            .map_err(|e| Error::corrupt_record(format!("undecodable data for {}: {}", self.id, e)))?;
        let changed_fields = match self.changed_fields {
            Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
                Error::corrupt_record(format!("undecodable diff for {}: {}", self.id, e))
            })?),
            None => None,
        };

        Ok(OperationRecord {
            id: self.id,
            sandbox_id: self.sandbox_id,
            table_name: self.table_name,
            record_id: self.record_id,
            operation,
            data,
            changed_fields,
            sequence: self.sequence,
            created_at: self.created_at,
        })
    }
}

/// Decode rows, dropping corrupt ones with a warning so resolution treats
/// them as absent.
fn decode_surviving(raws: Vec<RawOperation>) -> Vec<OperationRecord> {
    let mut records = Vec::with_capacity(raws.len());
    for raw in raws {
        match raw.decode() {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(error = %e, "Skipping corrupt operation record"),
        }
    }
    records
}

const OPERATION_COLUMNS: &str =
    "id, sandbox_id, table_name, record_id, operation, data, changed_fields, sequence, created_at";

#[async_trait]
impl OperationStore for SqliteStore {
    async fn append_next(&self, op: NewOperation) -> Result<OperationRecord> {
        let conn = self.conn.clone();

        let data_json = serde_json::to_string(&op.data)?;
        let changed_json = op
            .changed_fields
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();

            // One retry with a freshly computed sequence if the UNIQUE
            // index reports a race.
            for attempt in 0..2 {
                let tx = conn
                    .transaction()
                    .map_err(|e| Error::storage(format!("Transaction error: {}", e)))?;

                let next_sequence: i64 = tx
                    .query_row(
                        "SELECT COALESCE(MAX(sequence) + 1, 0) FROM sandbox_operations
                         WHERE sandbox_id = ?1 AND table_name = ?2 AND record_id = ?3",
                        params![op.sandbox_id, op.table_name, op.record_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| Error::storage(format!("Sequence query error: {}", e)))?;

                let record = OperationRecord {
                    id: ids::new_id(),
                    sandbox_id: op.sandbox_id.clone(),
                    table_name: op.table_name.clone(),
                    record_id: op.record_id.clone(),
                    operation: op.operation,
                    data: op.data.clone(),
                    changed_fields: op.changed_fields.clone(),
                    sequence: next_sequence,
                    created_at: clock::now_unix(),
                };

                let inserted = tx.execute(
                    "INSERT INTO sandbox_operations
                     (id, sandbox_id, table_name, record_id, operation, data, changed_fields, sequence, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        record.id,
                        record.sandbox_id,
                        record.table_name,
                        record.record_id,
                        record.operation.as_str(),
                        data_json,
                        changed_json,
                        record.sequence,
                        record.created_at
                    ],
                );

                match inserted {
                    Ok(_) => {
                        tx.commit()
                            .map_err(|e| Error::storage(format!("Commit error: {}", e)))?;
                        return Ok(record);
                    }
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation && attempt == 0 =>
                    {
                        tracing::warn!(
                            table = %op.table_name,
                            record = %op.record_id,
                            "Sequence race detected, retrying append"
                        );
                        continue;
                    }
                    Err(e) => return Err(Error::storage(format!("Insert error: {}", e))),
                }
            }

            Err(Error::SequenceConflict {
                table: op.table_name.clone(),
                record: op.record_id.clone(),
            })
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn records_for_table(
        &self,
        sandbox_id: &str,
        table: &str,
    ) -> Result<Vec<OperationRecord>> {
        let conn = self.conn.clone();
        let sandbox_id = sandbox_id.to_string();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM sandbox_operations
                     WHERE sandbox_id = ?1 AND table_name = ?2
                     ORDER BY sequence ASC, created_at ASC, rowid ASC",
                    OPERATION_COLUMNS
                ))
                .map_err(|e| Error::storage(format!("Prepare error: {}", e)))?;

            let raws = stmt
                .query_map(params![sandbox_id, table], RawOperation::from_row)
                .map_err(|e| Error::storage(format!("Query error: {}", e)))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::storage(format!("Row error: {}", e)))?;

            Ok(decode_surviving(raws))
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn latest_for_record(
        &self,
        sandbox_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>> {
        let conn = self.conn.clone();
        let sandbox_id = sandbox_id.to_string();
        let table = table.to_string();
        let record_id = record_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM sandbox_operations
                     WHERE sandbox_id = ?1 AND table_name = ?2 AND record_id = ?3
                     ORDER BY sequence DESC, created_at DESC, rowid DESC",
                    OPERATION_COLUMNS
                ))
                .map_err(|e| Error::storage(format!("Prepare error: {}", e)))?;

            let raws = stmt
                .query_map(params![sandbox_id, table, record_id], RawOperation::from_row)
                .map_err(|e| Error::storage(format!("Query error: {}", e)))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::storage(format!("Row error: {}", e)))?;

            // Highest-sequence record that still decodes.
            Ok(decode_surviving(raws).into_iter().next())
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn delete_for_sandbox(&self, sandbox_id: &str) -> Result<usize> {
        let conn = self.conn.clone();
        let sandbox_id = sandbox_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "DELETE FROM sandbox_operations WHERE sandbox_id = ?1",
                params![sandbox_id],
            )
            .map_err(|e| Error::storage(format!("Delete error: {}", e)))
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert(&self, session: &SandboxSession) -> Result<()> {
        let conn = self.conn.clone();
        let session = session.clone();
        let initial_state = serde_json::to_string(&session.initial_state)?;
        let metadata = serde_json::to_string(&session.metadata)?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO sandbox_sessions
                 (id, token, client_address, client_agent, expires_at, initial_state, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id,
                    session.token,
                    session.client_address,
                    session.client_agent,
                    session.expires_at,
                    initial_state,
                    metadata,
                    session.created_at
                ],
            )
            .map_err(|e| Error::storage(format!("Insert error: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SandboxSession>> {
        self.find_session("token = ?1", token.to_string()).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SandboxSession>> {
        self.find_session("id = ?1", id.to_string()).await
    }

    async fn expired_ids(&self, now: i64) -> Result<Vec<String>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare("SELECT id FROM sandbox_sessions WHERE expires_at <= ?1")
                .map_err(|e| Error::storage(format!("Prepare error: {}", e)))?;

            let ids = stmt
                .query_map(params![now], |row| row.get(0))
                .map_err(|e| Error::storage(format!("Query error: {}", e)))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| Error::storage(format!("Row error: {}", e)));
            ids
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM sandbox_sessions WHERE id = ?1", params![id])
                .map_err(|e| Error::storage(format!("Delete error: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }
}

impl SqliteStore {
    async fn find_session(
        &self,
        predicate: &'static str,
        value: String,
    ) -> Result<Option<SandboxSession>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, token, client_address, client_agent, expires_at,
                            initial_state, metadata, created_at
                     FROM sandbox_sessions WHERE {}",
                    predicate
                ))
                .map_err(|e| Error::storage(format!("Prepare error: {}", e)))?;

            let row = stmt
                .query_map(params![value], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                })
                .map_err(|e| Error::storage(format!("Query error: {}", e)))?
                .next()
                .transpose()
                .map_err(|e| Error::storage(format!("Row error: {}", e)))?;

            let Some((id, token, client_address, client_agent, expires_at, state, meta, created_at)) =
                row
            else {
                return Ok(None);
            };

            let initial_state = match serde_json::from_str(&state) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(session = %id, error = %e, "Skipping session with corrupt snapshot");
                    return Ok(None);
                }
            };
            let metadata = match serde_json::from_str(&meta) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(session = %id, error = %e, "Skipping session with corrupt metadata");
                    return Ok(None);
                }
            };

            Ok(Some(SandboxSession {
                id,
                token,
                client_address,
                client_agent,
                expires_at,
                initial_state,
                metadata,
                created_at,
            }))
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }
}
