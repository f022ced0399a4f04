use std::io;
use std::path::{Path, PathBuf};

use rusqlite::ffi::ErrorCode;
use rusqlite::{Connection, Error as SqliteError, OpenFlags};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub struct DatabaseBootstrap {
    pub context: DatabaseContext,
    pub recovered: bool,
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseBootstrap> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);

    match establish_context(&db_path) {
        Ok(context) => {
            info!(
                target: "database_bootstrap",
                path = %db_path.display(),
                "cache database ready"
            );
            Ok(DatabaseBootstrap {
                context,
                recovered: false,
            })
        }
        Err(AppError::Database(err)) if should_attempt_recovery(&err, &db_path) => {
            warn!(
                target: "database_bootstrap",
                path = %db_path.display(),
                error = %err,
                "cache database failed to open, recreating"
            );
            remove_store_files(&db_path)?;
            let context = establish_context(&db_path)?;
            Ok(DatabaseBootstrap {
                context,
                recovered: true,
            })
        }
        Err(err) => Err(err),
    }
}

pub fn open_in_memory() -> AppResult<Connection> {
    let connection = Connection::open_in_memory()?;
    run_migrations(&connection)?;
    Ok(connection)
}

fn establish_context(db_path: &Path) -> AppResult<DatabaseContext> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    connection.pragma_update(None, "journal_mode", "WAL")?;
    run_migrations(&connection)?;
    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );
        "#,
    )?;
    Ok(())
}

fn should_attempt_recovery(err: &SqliteError, db_path: &Path) -> bool {
    if !db_path.exists() {
        return false;
    }

    match err {
        SqliteError::SqliteFailure(code, message) => {
            matches!(code.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
                || message
                    .as_deref()
                    .map(|msg| msg.contains("database disk image is malformed"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn remove_store_files(db_path: &Path) -> AppResult<()> {
    remove_if_exists(db_path)?;
    remove_if_exists(&sibling_path(db_path, "-wal")?)?;
    remove_if_exists(&sibling_path(db_path, "-shm")?)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(err)),
    }
}

fn sibling_path(db_path: &Path, suffix: &str) -> AppResult<PathBuf> {
    let file_name = db_path
        .file_name()
        .ok_or_else(|| AppError::Path(format!("{} has no file name", db_path.display())))?;
    let mut buf = db_path.to_path_buf();
    buf.set_file_name(format!("{}{suffix}", file_name.to_string_lossy()));
    Ok(buf)
}
