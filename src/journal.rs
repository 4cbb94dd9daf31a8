/// SQLite journal of erase operations
///
/// Every state transition and periodic progress is written here, so the audit
/// trail survives a crash. On the next start, rows still non-terminal are
/// reported as `Failed` with cause `Interrupted`; they are never resumed.
use crate::executor::{EraseOperation, FailureCause, OperationState};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct OperationJournal {
    conn: Connection,
    path: PathBuf,
    /// Exclusive flock on `<journal>.lock`, released when the journal is dropped
    _lock: Option<File>,
}

impl OperationJournal {
    /// Open or create the journal database, creating parent directories.
    ///
    /// Only one journal handle per file may exist at a time, across processes.
    /// A second open fails instead of recovering the other owner's live
    /// operations as interrupted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create journal directory {}", parent.display())
                })?;
            }
        }

        let lock = Self::acquire_lock(&path)?;

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open journal {}", path.display()))?;

        // WAL for crash resilience; NORMAL sync keeps transitions cheap
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("Failed to set synchronous mode")?;

        Self::with_connection(conn, path, Some(lock))
    }

    /// Journal that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory journal")?;
        Self::with_connection(conn, PathBuf::from(":memory:"), None)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open journal lock {}", lock_path.display()))?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                anyhow::bail!(
                    "Journal {} is in use by another process",
                    path.display()
                );
            }
            return Err(err)
                .with_context(|| format!("Failed to lock journal {}", lock_path.display()));
        }

        Ok(file)
    }

    fn with_connection(conn: Connection, path: PathBuf, lock: Option<File>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                operation_id TEXT PRIMARY KEY NOT NULL,
                device_id TEXT NOT NULL,
                method_id TEXT NOT NULL,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_operations_device ON operations(device_id);
            CREATE INDEX IF NOT EXISTS idx_operations_state ON operations(state);
            "#,
        )
        .context("Failed to create journal schema")?;

        Ok(Self {
            conn,
            path,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the row for this operation
    pub fn record(&mut self, operation: &EraseOperation) -> Result<()> {
        let start = Instant::now();
        let record = serde_json::to_string(operation).context("Failed to serialize operation")?;

        let tx = self
            .conn
            .transaction()
            .context("Failed to begin journal transaction")?;
        tx.execute(
            r#"
            INSERT INTO operations
                (operation_id, device_id, method_id, state, record, started_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(operation_id) DO UPDATE SET
                state = excluded.state,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
            params![
                operation.operation_id,
                operation.device_id,
                operation.method_id,
                operation.state.as_str(),
                record,
                operation.started_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )
        .context("Failed to write journal row")?;
        tx.commit().context("Failed to commit journal transaction")?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                operation_id = %operation.operation_id,
                "journal write exceeded 100ms"
            );
        }

        Ok(())
    }

    pub fn load(&self, operation_id: &str) -> Result<Option<EraseOperation>> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM operations WHERE operation_id = ?1",
                params![operation_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query journal")?;

        record
            .map(|json| serde_json::from_str(&json).context("Corrupt journal record"))
            .transpose()
    }

    /// All journaled operations, oldest first
    pub fn load_all(&self) -> Result<Vec<EraseOperation>> {
        let mut stmt = self
            .conn
            .prepare("SELECT operation_id, record FROM operations ORDER BY operation_id")
            .context("Failed to prepare journal query")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("Failed to query journal")?;

        let mut operations = Vec::new();
        for row in rows {
            let (operation_id, json) = row.context("Failed to read journal row")?;
            match serde_json::from_str::<EraseOperation>(&json) {
                Ok(operation) => operations.push(operation),
                Err(e) => {
                    tracing::warn!(
                        operation_id = %operation_id,
                        error = %e,
                        "skipping corrupt journal record"
                    )
                }
            }
        }

        Ok(operations)
    }

    /// Mark every non-terminal row as `Failed/Interrupted` and return them
    pub fn recover_interrupted(&mut self) -> Result<Vec<EraseOperation>> {
        let mut recovered = Vec::new();

        for mut operation in self.load_all()? {
            if operation.is_terminal() {
                continue;
            }
            operation.fail(FailureCause::Interrupted);

            tracing::warn!(
                operation_id = %operation.operation_id,
                device_id = %operation.device_id,
                passes_completed = operation.passes_completed,
                "operation was interrupted by a previous process exit"
            );

            self.record(&operation)?;
            recovered.push(operation);
        }

        Ok(recovered)
    }
}
